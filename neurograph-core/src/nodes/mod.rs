//! Operator library.
//!
//! Every operator is a [`Node`]: it infers its output shape from the shapes of
//! its arguments, computes its value from their values, and accumulates the
//! gradient of each argument from the gradient of its output.

use crate::dim::Dim;
use crate::error::{shape_mismatch, NeuroGraphError};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use std::fmt;

pub mod activation;
pub mod arithmetic;
pub mod conv;
pub mod input;
pub mod linalg;
pub mod loss;
pub mod reduce;
pub mod shape;
pub mod stochastic;

pub use activation::{Elementwise, ElementwiseKind, LogSoftmax, Softmax};
pub use arithmetic::{
    AffineTransform, BinaryExtremum, ColwiseAdd, CwiseMultiply, CwiseQuotient, MatrixMultiply,
    ScalarAffine, Sum,
};
pub use conv::{Conv1dNarrow, Conv1dWide, KMaxPooling};
pub use input::{InputNode, LookupNode, ParameterNode};
pub use loss::{
    BinaryLogLoss, DotProduct, Hinge, HuberDistance, L1Distance, PairwiseRankLoss, PoissonLoss,
    SquaredDistance,
};
pub use reduce::{Average, LogSumExp, MaxOf, SumBatches, SumCols, SumElements};
pub use shape::{
    ColumnSlices, Concatenate, ConcatenateCols, FoldRows, Pick, PickRange, Reshape, Transpose,
};
pub use stochastic::{BlockDropout, Dropout, GaussianNoise};

/// Contract shared by every operator in a computation graph.
///
/// `forward` overwrites `fx`, which has already been sized to the shape returned
/// by `dim_forward`. `backward` must **add** its contribution to `d_edxi`; it
/// never overwrites, since an argument may feed several consumers.
pub trait Node: fmt::Debug {
    /// Short operator name used in errors and graph dumps.
    fn name(&self) -> &'static str;

    /// Output shape for the given argument shapes, or `ShapeMismatch`.
    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError>;

    /// Computes the value of the node. Stochastic nodes draw from `rng`.
    fn forward(
        &mut self,
        xs: &[&Tensor],
        fx: &mut Tensor,
        rng: &mut StdRng,
    ) -> Result<(), NeuroGraphError>;

    /// Accumulates `dE/dx_i` into `d_edxi` given `dE/df`.
    fn backward(
        &self,
        xs: &[&Tensor],
        fx: &Tensor,
        d_edf: &Tensor,
        i: usize,
        d_edxi: &mut Tensor,
    ) -> Result<(), NeuroGraphError>;

    /// `true` for nodes that read trainable parameters.
    fn has_parameters(&self) -> bool {
        false
    }

    /// Pushes the gradient of this node into the parameters it reads.
    fn accumulate_grad(&self, _g: &Tensor) -> Result<(), NeuroGraphError> {
        Err(NeuroGraphError::NotSupported(format!(
            "{} has no parameters to accumulate gradients into",
            self.name()
        )))
    }

    /// Replaces the stored value of an input node.
    fn set_value(&mut self, _value: Tensor) -> Result<(), NeuroGraphError> {
        Err(NeuroGraphError::NotSupported(format!(
            "{} does not hold an assignable value",
            self.name()
        )))
    }

    /// Human readable form used by graph dumps, e.g. `tanh(v3)`.
    fn describe(&self, args: &[String]) -> String {
        format!("{}({})", self.name(), args.join(", "))
    }
}

/// Checks the argument count of a node.
pub(crate) fn expect_args(op: &str, xs: &[&Dim], n: usize) -> Result<(), NeuroGraphError> {
    if xs.len() != n {
        return Err(shape_mismatch(op, format!("{} arguments", n), xs.len()));
    }
    Ok(())
}

/// Batch count of the output of a node whose arguments may broadcast.
///
/// Every argument must have either one batch element or the common count.
pub(crate) fn broadcast_batch(op: &str, xs: &[&Dim]) -> Result<usize, NeuroGraphError> {
    let bd = xs.iter().map(|d| d.batch_elems()).max().unwrap_or(1);
    for d in xs {
        if d.batch_elems() != 1 && d.batch_elems() != bd {
            return Err(shape_mismatch(op, format!("batch 1 or {}", bd), d));
        }
    }
    Ok(bd)
}

/// Checks that all arguments share one per-element shape and returns the output
/// shape with the broadcast batch count.
pub(crate) fn same_shape(op: &str, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
    let first = xs
        .first()
        .ok_or_else(|| shape_mismatch(op, "at least one argument", 0))?;
    for d in &xs[1..] {
        if !same_element_shape(first, d) {
            return Err(shape_mismatch(op, first, d));
        }
    }
    let bd = broadcast_batch(op, xs)?;
    Ok(first.rebatch(bd))
}

/// Per-element shape equality, ignoring trailing unit dimensions.
pub(crate) fn same_element_shape(a: &Dim, b: &Dim) -> bool {
    fn trimmed(d: &[usize]) -> &[usize] {
        let mut n = d.len();
        while n > 0 && d[n - 1] == 1 {
            n -= 1;
        }
        &d[..n]
    }
    trimmed(a.dims()) == trimmed(b.dims())
}

/// Number of batch elements of an output tensor.
pub(crate) fn batches(fx: &Tensor) -> usize {
    fx.dim().batch_elems()
}

/// `d_edxi += a * d_edf`, summing over batch elements when `d_edxi` broadcasts.
pub(crate) fn accumulate_scaled(d_edf: &Tensor, d_edxi: &mut Tensor, a: f32) {
    for b in 0..batches(d_edf) {
        for (g, d) in d_edxi.batch_mut(b).iter_mut().zip(d_edf.batch(b)) {
            *g += a * d;
        }
    }
}

#[cfg(test)]
#[path = "nodes_test.rs"]
mod tests;
