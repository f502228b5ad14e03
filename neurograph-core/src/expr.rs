//! Expression builders.
//!
//! Each builder appends one node (occasionally two) to the graph its arguments
//! belong to and returns the new expression. Shapes are checked immediately;
//! values are only computed when requested.

use crate::dim::Dim;
use crate::error::NeuroGraphError;
use crate::graph::{ComputationGraph, Expression};
use crate::model::{LookupParameterHandle, ParameterHandle};
use crate::nodes::*;
use crate::tensor::Tensor;

/// Graph shared by all `xs`.
fn common_graph(xs: &[&Expression]) -> Result<ComputationGraph, NeuroGraphError> {
    let first = xs
        .first()
        .ok_or_else(|| NeuroGraphError::NotSupported("operator with no arguments".to_string()))?;
    for x in &xs[1..] {
        if !first.same_graph(x) {
            return Err(NeuroGraphError::NotSupported(
                "combining expressions from different graphs".to_string(),
            ));
        }
    }
    first.graph()
}

fn apply(op: impl Node + 'static, xs: &[&Expression]) -> Result<Expression, NeuroGraphError> {
    let cg = common_graph(xs)?;
    let args: Vec<usize> = xs.iter().map(|x| x.index()).collect();
    cg.add_function(Box::new(op), &args)
}

fn apply_list(op: impl Node + 'static, xs: &[Expression]) -> Result<Expression, NeuroGraphError> {
    let refs: Vec<&Expression> = xs.iter().collect();
    apply(op, &refs)
}

// ---- leaves ----

/// Adds a constant input holding `values` under shape `dim`.
///
/// # Arguments
/// * `cg` - Graph receiving the node.
/// * `dim` - Shape of the input, including its batch count.
/// * `values` - Column-major values; must hold `dim.size()` entries.
///
/// # Errors
/// `TensorCreationError` when `values` does not match `dim`.
pub fn input(cg: &ComputationGraph, dim: &Dim, values: Vec<f32>) -> Result<Expression, NeuroGraphError> {
    input_tensor(cg, Tensor::from_vec(values, dim)?)
}

/// Adds a constant input holding an existing tensor.
pub fn input_tensor(cg: &ComputationGraph, value: Tensor) -> Result<Expression, NeuroGraphError> {
    cg.add_function(Box::new(InputNode::new(value)), &[])
}

/// Adds a scalar constant.
pub fn input_scalar(cg: &ComputationGraph, value: f32) -> Result<Expression, NeuroGraphError> {
    input_tensor(cg, Tensor::scalar(value))
}

/// Adds a constant input of zeros.
pub fn zeroes(cg: &ComputationGraph, dim: &Dim) -> Result<Expression, NeuroGraphError> {
    cg.add_function(Box::new(InputNode::zeroes(dim)), &[])
}

/// Adds a node reading the current values of a dense parameter.
///
/// Gradients reaching this node are accumulated into the parameter by
/// [`ComputationGraph::backward`].
///
/// # Errors
/// `LockError` if the parameter lock is poisoned when the shape is read.
pub fn parameter(cg: &ComputationGraph, p: &ParameterHandle) -> Result<Expression, NeuroGraphError> {
    cg.add_function(Box::new(ParameterNode::new(p.clone())), &[])
}

/// Row `index` of a lookup table. Gradients flow back into that row only.
pub fn lookup(cg: &ComputationGraph, p: &LookupParameterHandle, index: usize) -> Result<Expression, NeuroGraphError> {
    lookup_batch(cg, p, &[index])
}

/// One row per batch element.
pub fn lookup_batch(
    cg: &ComputationGraph,
    p: &LookupParameterHandle,
    indices: &[usize],
) -> Result<Expression, NeuroGraphError> {
    let node = LookupNode::new(p.clone(), indices.to_vec(), true)?;
    cg.add_function(Box::new(node), &[])
}

/// Like [`lookup`], but no gradient flows back into the table.
pub fn const_lookup(cg: &ComputationGraph, p: &LookupParameterHandle, index: usize) -> Result<Expression, NeuroGraphError> {
    const_lookup_batch(cg, p, &[index])
}

/// Batched [`const_lookup`].
pub fn const_lookup_batch(
    cg: &ComputationGraph,
    p: &LookupParameterHandle,
    indices: &[usize],
) -> Result<Expression, NeuroGraphError> {
    let node = LookupNode::new(p.clone(), indices.to_vec(), false)?;
    cg.add_function(Box::new(node), &[])
}

// ---- arithmetic ----

/// Element-wise sum of any number of arguments.
///
/// Arguments with a single batch element broadcast against batched ones and
/// receive the sum of the per-batch gradients.
///
/// # Errors
/// `NotSupported` for an empty list or expressions from different graphs,
/// `ShapeMismatch` when the argument shapes differ.
pub fn sum(xs: &[Expression]) -> Result<Expression, NeuroGraphError> {
    apply_list(Sum, xs)
}

/// `x + y`
pub fn add(x: &Expression, y: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(Sum, &[x, y])
}

/// `x - y`, built as a sum with a negated `y`.
pub fn sub(x: &Expression, y: &Expression) -> Result<Expression, NeuroGraphError> {
    let minus_y = neg(y)?;
    apply(Sum, &[x, &minus_y])
}

/// `-x`
pub fn neg(x: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(ScalarAffine::new("neg", -1.0, 0.0), &[x])
}

/// `x + c`
pub fn add_scalar(x: &Expression, c: f32) -> Result<Expression, NeuroGraphError> {
    apply(ScalarAffine::new("add_scalar", 1.0, c), &[x])
}

/// `c - x`
pub fn scalar_minus(c: f32, x: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(ScalarAffine::new("scalar_minus", -1.0, c), &[x])
}

/// `x * c`
pub fn mul_scalar(x: &Expression, c: f32) -> Result<Expression, NeuroGraphError> {
    apply(ScalarAffine::new("mul_scalar", c, 0.0), &[x])
}

/// `x / c`
pub fn div_scalar(x: &Expression, c: f32) -> Result<Expression, NeuroGraphError> {
    apply(ScalarAffine::new("div_scalar", 1.0 / c, 0.0), &[x])
}

/// Element-wise product.
pub fn cwise_multiply(x: &Expression, y: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(CwiseMultiply, &[x, y])
}

/// Element-wise quotient `x / y`.
pub fn cdiv(x: &Expression, y: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(CwiseQuotient, &[x, y])
}

/// Adds the column vector `bias` to every column of `x`.
pub fn colwise_add(x: &Expression, bias: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(ColwiseAdd, &[x, bias])
}

/// Matrix product `x * y`.
///
/// # Arguments
/// * `x` - An `r x k` matrix.
/// * `y` - A `k x c` matrix.
///
/// # Returns
/// An `r x c` expression, batched when either argument is.
///
/// # Errors
/// `ShapeMismatch` when the inner dimensions differ.
pub fn matmul(x: &Expression, y: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(MatrixMultiply, &[x, y])
}

/// `xs[0] + xs[1] * xs[2] + xs[3] * xs[4] + ...`
pub fn affine_transform(xs: &[Expression]) -> Result<Expression, NeuroGraphError> {
    apply_list(AffineTransform, xs)
}

/// Element-wise minimum; ties route the gradient to `x`.
pub fn min(x: &Expression, y: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(BinaryExtremum::min(), &[x, y])
}

/// Element-wise maximum; ties route the gradient to `x`.
pub fn max(x: &Expression, y: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(BinaryExtremum::max(), &[x, y])
}

// ---- nonlinearities ----

fn elementwise(kind: ElementwiseKind, x: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(Elementwise::new(kind), &[x])
}

/// Hyperbolic tangent.
pub fn tanh(x: &Expression) -> Result<Expression, NeuroGraphError> {
    elementwise(ElementwiseKind::Tanh, x)
}

/// Logistic sigmoid `1 / (1 + exp(-x))`.
pub fn logistic(x: &Expression) -> Result<Expression, NeuroGraphError> {
    elementwise(ElementwiseKind::Logistic, x)
}

/// `max(0, x)`, with derivative 0 at 0.
pub fn rectify(x: &Expression) -> Result<Expression, NeuroGraphError> {
    elementwise(ElementwiseKind::Rectify, x)
}

/// Exponential linear unit with slope parameter `alpha` for negative inputs.
pub fn elu(x: &Expression, alpha: f32) -> Result<Expression, NeuroGraphError> {
    elementwise(ElementwiseKind::Elu(alpha), x)
}

pub fn exp(x: &Expression) -> Result<Expression, NeuroGraphError> {
    elementwise(ElementwiseKind::Exp, x)
}

pub fn log(x: &Expression) -> Result<Expression, NeuroGraphError> {
    elementwise(ElementwiseKind::Log, x)
}

pub fn sqrt(x: &Expression) -> Result<Expression, NeuroGraphError> {
    elementwise(ElementwiseKind::Sqrt, x)
}

pub fn square(x: &Expression) -> Result<Expression, NeuroGraphError> {
    elementwise(ElementwiseKind::Square, x)
}

pub fn cube(x: &Expression) -> Result<Expression, NeuroGraphError> {
    elementwise(ElementwiseKind::Cube, x)
}

pub fn softsign(x: &Expression) -> Result<Expression, NeuroGraphError> {
    elementwise(ElementwiseKind::Softsign, x)
}

/// Softmax over each column, computed after subtracting the column maximum.
pub fn softmax(x: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(Softmax, &[x])
}

/// Log of [`softmax`], evaluated without forming the softmax itself.
pub fn log_softmax(x: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(LogSoftmax, &[x])
}

// ---- reductions ----

/// Sum of all elements, one scalar per batch element.
pub fn sum_elements(x: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(SumElements, &[x])
}

/// Sums the columns of a matrix into one column.
pub fn sum_cols(x: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(SumCols, &[x])
}

/// Sums over the batch dimension.
pub fn sum_batches(x: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(SumBatches, &[x])
}

/// Element-wise mean of same-shaped arguments.
pub fn average(xs: &[Expression]) -> Result<Expression, NeuroGraphError> {
    apply_list(Average, xs)
}

/// Element-wise maximum of a list; ties go to the first argument.
pub fn max_of(xs: &[Expression]) -> Result<Expression, NeuroGraphError> {
    apply_list(MaxOf, xs)
}

/// Element-wise `log(sum_i exp(xs[i]))`, stabilized by the running maximum.
pub fn logsumexp(xs: &[Expression]) -> Result<Expression, NeuroGraphError> {
    apply_list(LogSumExp, xs)
}

// ---- shape ----

/// Stacks arguments vertically.
pub fn concatenate(xs: &[Expression]) -> Result<Expression, NeuroGraphError> {
    apply_list(Concatenate, xs)
}

/// Places arguments side by side.
pub fn concatenate_cols(xs: &[Expression]) -> Result<Expression, NeuroGraphError> {
    apply_list(ConcatenateCols, xs)
}

/// Reinterprets `x` under `dim`.
///
/// # Errors
/// `ShapeMismatch` when `dim` does not hold the same number of elements per
/// batch element as `x`.
pub fn reshape(x: &Expression, dim: &Dim) -> Result<Expression, NeuroGraphError> {
    apply(Reshape::new(dim.clone()), &[x])
}

/// Matrix transpose of every batch element.
pub fn transpose(x: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(Transpose, &[x])
}

/// Selects row `index` of a vector.
///
/// # Errors
/// `ShapeMismatch` when `x` is not a vector, `IndexOutOfBounds` for an index
/// past the last row.
pub fn pick(x: &Expression, index: usize) -> Result<Expression, NeuroGraphError> {
    apply(Pick::new(vec![index]), &[x])
}

/// One index per batch element.
pub fn pick_batch(x: &Expression, indices: &[usize]) -> Result<Expression, NeuroGraphError> {
    apply(Pick::new(indices.to_vec()), &[x])
}

/// Rows `[start, end)` of a vector.
pub fn pick_range(x: &Expression, start: usize, end: usize) -> Result<Expression, NeuroGraphError> {
    apply(PickRange::new(start, end), &[x])
}

/// Columns `[start, end)` of a matrix.
pub fn column_slices(x: &Expression, start: usize, end: usize) -> Result<Expression, NeuroGraphError> {
    apply(ColumnSlices::new(start, end), &[x])
}

/// Sums each group of `nrows` consecutive rows into one row.
pub fn fold_rows(x: &Expression, nrows: usize) -> Result<Expression, NeuroGraphError> {
    apply(FoldRows::new(nrows), &[x])
}

// ---- losses ----

/// Inner product of two same-shaped vectors.
pub fn dot_product(x: &Expression, y: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(DotProduct, &[x, y])
}

/// `sum((x - y)^2)`
pub fn squared_distance(x: &Expression, y: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(SquaredDistance, &[x, y])
}

/// `sum(|x - y|)`
pub fn l1_distance(x: &Expression, y: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(L1Distance, &[x, y])
}

/// Huber distance between `x` and `y`, quadratic below `c` and linear beyond.
pub fn huber_distance(x: &Expression, y: &Expression, c: f32) -> Result<Expression, NeuroGraphError> {
    apply(HuberDistance::new(c), &[x, y])
}

/// Binary cross entropy of probabilities `x` against targets `y`.
pub fn binary_log_loss(x: &Expression, y: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(BinaryLogLoss, &[x, y])
}

/// Multi-class hinge loss of the score vector `x` for the gold class `index`.
///
/// # Arguments
/// * `x` - Class scores.
/// * `index` - Gold class, applied to every batch element.
/// * `margin` - Required gap between the gold score and every other score.
///
/// # Returns
/// One scalar per batch element.
pub fn hinge(x: &Expression, index: usize, margin: f32) -> Result<Expression, NeuroGraphError> {
    apply(Hinge::new(vec![index], margin), &[x])
}

/// [`hinge`] with one gold class per batch element.
pub fn hinge_batch(x: &Expression, indices: &[usize], margin: f32) -> Result<Expression, NeuroGraphError> {
    apply(Hinge::new(indices.to_vec(), margin), &[x])
}

/// Element-wise `max(0, margin - x + y)`.
pub fn pairwise_rank_loss(x: &Expression, y: &Expression, margin: f32) -> Result<Expression, NeuroGraphError> {
    apply(PairwiseRankLoss::new(margin), &[x, y])
}

/// Negative log-likelihood of `label` under a Poisson with rate `exp(x)`.
pub fn poisson_loss(x: &Expression, label: usize) -> Result<Expression, NeuroGraphError> {
    apply(PoissonLoss::new(vec![label]), &[x])
}

/// [`poisson_loss`] with one label per batch element.
pub fn poisson_loss_batch(x: &Expression, labels: &[usize]) -> Result<Expression, NeuroGraphError> {
    apply(PoissonLoss::new(labels.to_vec()), &[x])
}

// ---- convolution ----

/// Row-wise convolution of `x` (`r x n`) with `filter` (`r x k`) without
/// padding, giving `n - k + 1` columns.
///
/// # Errors
/// `ShapeMismatch` when the row counts differ, when either argument has no
/// columns, or when the filter is wider than `x`.
pub fn conv1d_narrow(x: &Expression, filter: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(Conv1dNarrow, &[x, filter])
}

/// Row-wise convolution padded with `k - 1` zero columns on each side, giving `n + k - 1` columns.
pub fn conv1d_wide(x: &Expression, filter: &Expression) -> Result<Expression, NeuroGraphError> {
    apply(Conv1dWide, &[x, filter])
}

/// Keeps the `k` largest values of each row in their original column order.
pub fn kmax_pooling(x: &Expression, k: usize) -> Result<Expression, NeuroGraphError> {
    apply(KMaxPooling::new(k), &[x])
}

// ---- stochastic ----

/// Inverted dropout with drop probability `p`.
///
/// The mask is drawn from the graph's seeded generator at evaluation time and
/// reused by backward.
///
/// # Errors
/// `ConfigurationError` unless `0 <= p < 1`.
pub fn dropout(x: &Expression, p: f32) -> Result<Expression, NeuroGraphError> {
    apply(Dropout::new(p)?, &[x])
}

/// Drops whole batch elements with probability `p`.
pub fn block_dropout(x: &Expression, p: f32) -> Result<Expression, NeuroGraphError> {
    apply(BlockDropout::new(p)?, &[x])
}

/// Adds Gaussian noise with standard deviation `stddev` at evaluation time.
pub fn noise(x: &Expression, stddev: f32) -> Result<Expression, NeuroGraphError> {
    apply(GaussianNoise::new(stddev)?, &[x])
}

#[cfg(test)]
#[path = "expr_test.rs"]
mod tests;
