use super::linalg::{gemm_nn, gemm_nt, gemm_tn};
use super::{batches, broadcast_batch, expect_args, same_shape, Node};
use crate::dim::Dim;
use crate::error::{shape_mismatch, NeuroGraphError};
use crate::tensor::Tensor;
use rand::rngs::StdRng;

/// n-ary element-wise sum. Arguments with one batch element broadcast.
#[derive(Debug, Default)]
pub struct Sum;

impl Node for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        same_shape("sum", xs)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        fx.zero();
        for b in 0..batches(fx) {
            let out = fx.batch_mut(b);
            for x in xs {
                for (o, v) in out.iter_mut().zip(x.batch(b)) {
                    *o += v;
                }
            }
        }
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        for b in 0..batches(d_edf) {
            for (g, d) in d_edxi.batch_mut(b).iter_mut().zip(d_edf.batch(b)) {
                *g += d;
            }
        }
        Ok(())
    }

    fn describe(&self, args: &[String]) -> String {
        args.join(" + ")
    }
}

/// `scale * x + shift`, covering negation and the scalar-constant operators.
#[derive(Debug)]
pub struct ScalarAffine {
    label: &'static str,
    scale: f32,
    shift: f32,
}

impl ScalarAffine {
    pub fn new(label: &'static str, scale: f32, shift: f32) -> Self {
        ScalarAffine { label, scale, shift }
    }
}

impl Node for ScalarAffine {
    fn name(&self) -> &'static str {
        self.label
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args(self.label, xs, 1)?;
        Ok(xs[0].clone())
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        for (o, x) in fx.values_mut().iter_mut().zip(xs[0].values()) {
            *o = self.scale * x + self.shift;
        }
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        d_edxi.add_scaled(d_edf, self.scale)
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} * {} + {}", self.scale, args[0], self.shift)
    }
}

/// Element-wise product of two arguments of the same shape.
#[derive(Debug, Default)]
pub struct CwiseMultiply;

impl Node for CwiseMultiply {
    fn name(&self) -> &'static str {
        "cwise_multiply"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("cwise_multiply", xs, 2)?;
        same_shape("cwise_multiply", xs)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        for b in 0..batches(fx) {
            let (a, c) = (xs[0].batch(b), xs[1].batch(b));
            for ((o, x), y) in fx.batch_mut(b).iter_mut().zip(a).zip(c) {
                *o = x * y;
            }
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let other = xs[1 - i];
        for b in 0..batches(d_edf) {
            let (d, y) = (d_edf.batch(b), other.batch(b));
            for ((g, d), y) in d_edxi.batch_mut(b).iter_mut().zip(d).zip(y) {
                *g += d * y;
            }
        }
        Ok(())
    }
}

/// Element-wise quotient `x0 / x1`.
#[derive(Debug, Default)]
pub struct CwiseQuotient;

impl Node for CwiseQuotient {
    fn name(&self) -> &'static str {
        "cdiv"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("cdiv", xs, 2)?;
        same_shape("cdiv", xs)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        for b in 0..batches(fx) {
            let (a, c) = (xs[0].batch(b), xs[1].batch(b));
            for ((o, x), y) in fx.batch_mut(b).iter_mut().zip(a).zip(c) {
                *o = x / y;
            }
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        for b in 0..batches(d_edf) {
            let (d, y, f) = (d_edf.batch(b), xs[1].batch(b), fx.batch(b));
            let g = d_edxi.batch_mut(b);
            for k in 0..g.len() {
                if i == 0 {
                    g[k] += d[k] / y[k];
                } else {
                    g[k] -= d[k] * f[k] / y[k];
                }
            }
        }
        Ok(())
    }
}

/// Adds a column vector to every column of a matrix.
#[derive(Debug, Default)]
pub struct ColwiseAdd;

impl Node for ColwiseAdd {
    fn name(&self) -> &'static str {
        "colwise_add"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("colwise_add", xs, 2)?;
        let (x, bias) = (xs[0], xs[1]);
        if x.ndims() > 2 || bias.rows() != x.rows() || bias.cols() != 1 || bias.ndims() > 2 {
            return Err(shape_mismatch("colwise_add", format!("{{{},1}}", x.rows()), bias));
        }
        Ok(x.rebatch(broadcast_batch("colwise_add", xs)?))
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let rows = fx.dim().rows();
        for b in 0..batches(fx) {
            let (x, bias) = (xs[0].batch(b), xs[1].batch(b));
            let out = fx.batch_mut(b);
            for (k, o) in out.iter_mut().enumerate() {
                *o = x[k] + bias[k % rows];
            }
        }
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let rows = fx.dim().rows();
        for b in 0..batches(d_edf) {
            let d = d_edf.batch(b);
            let g = d_edxi.batch_mut(b);
            for (k, dk) in d.iter().enumerate() {
                if i == 0 {
                    g[k] += dk;
                } else {
                    g[k % rows] += dk;
                }
            }
        }
        Ok(())
    }
}

/// Matrix product of two (batched) matrices.
#[derive(Debug, Default)]
pub struct MatrixMultiply;

impl Node for MatrixMultiply {
    fn name(&self) -> &'static str {
        "matmul"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("matmul", xs, 2)?;
        let (a, b) = (xs[0], xs[1]);
        if a.ndims() > 2 || b.ndims() > 2 || a.cols() != b.rows() {
            return Err(shape_mismatch(
                "matmul",
                format!("{{{},{}}} x {{{},_}}", a.rows(), a.cols(), a.cols()),
                b,
            ));
        }
        let bd = broadcast_batch("matmul", xs)?;
        Ok(Dim::with_batch(&[a.rows(), b.cols()], bd))
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let (m, k, n) = (xs[0].dim().rows(), xs[0].dim().cols(), xs[1].dim().cols());
        fx.zero();
        for b in 0..batches(fx) {
            gemm_nn(xs[0].batch(b), xs[1].batch(b), fx.batch_mut(b), m, k, n);
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let (m, k, n) = (xs[0].dim().rows(), xs[0].dim().cols(), xs[1].dim().cols());
        for b in 0..batches(d_edf) {
            if i == 0 {
                gemm_nt(d_edf.batch(b), xs[1].batch(b), d_edxi.batch_mut(b), m, k, n);
            } else {
                gemm_tn(xs[0].batch(b), d_edf.batch(b), d_edxi.batch_mut(b), m, k, n);
            }
        }
        Ok(())
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} * {}", args[0], args[1])
    }
}

/// `b + W1 x1 + W2 x2 + ...` with arguments `[b, W1, x1, W2, x2, ...]`.
///
/// A bias with a single column is added to every column of the result.
#[derive(Debug, Default)]
pub struct AffineTransform;

impl Node for AffineTransform {
    fn name(&self) -> &'static str {
        "affine_transform"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        if xs.len() < 3 || xs.len() % 2 == 0 {
            return Err(shape_mismatch(
                "affine_transform",
                "an odd number of arguments >= 3",
                xs.len(),
            ));
        }
        let rows = xs[1].rows();
        let cols = xs[2].cols();
        for pair in xs[1..].chunks(2) {
            let (w, x) = (pair[0], pair[1]);
            if w.ndims() > 2 || x.ndims() > 2 || w.rows() != rows || w.cols() != x.rows() || x.cols() != cols {
                return Err(shape_mismatch(
                    "affine_transform",
                    format!("{{{},{}}} x {{{},{}}}", rows, w.cols(), w.cols(), cols),
                    format!("{} x {}", w, x),
                ));
            }
        }
        let bias = xs[0];
        if bias.ndims() > 2 || bias.rows() != rows || (bias.cols() != cols && bias.cols() != 1) {
            return Err(shape_mismatch("affine_transform", format!("{{{},{}}}", rows, cols), bias));
        }
        let bd = broadcast_batch("affine_transform", xs)?;
        Ok(Dim::with_batch(&[rows, cols], bd))
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let rows = fx.dim().rows();
        for b in 0..batches(fx) {
            let bias = xs[0].batch(b);
            let out = fx.batch_mut(b);
            for (k, o) in out.iter_mut().enumerate() {
                *o = bias[k % bias.len().max(1)];
            }
            for pair in xs[1..].chunks(2) {
                let (w, x) = (pair[0], pair[1]);
                gemm_nn(w.batch(b), x.batch(b), out, rows, w.dim().cols(), x.dim().cols());
            }
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let rows = fx.dim().rows();
        for b in 0..batches(d_edf) {
            let d = d_edf.batch(b);
            if i == 0 {
                let g = d_edxi.batch_mut(b);
                let len = g.len();
                for (k, dk) in d.iter().enumerate() {
                    g[k % len] += dk;
                }
            } else if i % 2 == 1 {
                let x = xs[i + 1];
                gemm_nt(d, x.batch(b), d_edxi.batch_mut(b), rows, x.dim().rows(), x.dim().cols());
            } else {
                let w = xs[i - 1];
                gemm_tn(w.batch(b), d, d_edxi.batch_mut(b), rows, w.dim().cols(), fx.dim().cols());
            }
        }
        Ok(())
    }
}

/// Element-wise maximum or minimum of two arguments.
///
/// Sub-gradient: on ties the whole gradient goes to the first argument.
#[derive(Debug)]
pub struct BinaryExtremum {
    is_max: bool,
}

impl BinaryExtremum {
    pub fn max() -> Self {
        BinaryExtremum { is_max: true }
    }

    pub fn min() -> Self {
        BinaryExtremum { is_max: false }
    }

    /// `true` when argument `i` is selected for the pair `(x0, x1)`.
    fn selects(&self, i: usize, x0: f32, x1: f32) -> bool {
        let first = if self.is_max { x0 >= x1 } else { x0 <= x1 };
        if i == 0 {
            first
        } else {
            !first
        }
    }
}

impl Node for BinaryExtremum {
    fn name(&self) -> &'static str {
        if self.is_max {
            "max"
        } else {
            "min"
        }
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args(self.name(), xs, 2)?;
        same_shape(self.name(), xs)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        for b in 0..batches(fx) {
            let (a, c) = (xs[0].batch(b), xs[1].batch(b));
            for ((o, &x), &y) in fx.batch_mut(b).iter_mut().zip(a).zip(c) {
                *o = if self.selects(0, x, y) { x } else { y };
            }
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        for b in 0..batches(d_edf) {
            let (d, a, c) = (d_edf.batch(b), xs[0].batch(b), xs[1].batch(b));
            let g = d_edxi.batch_mut(b);
            for k in 0..d.len() {
                if self.selects(i, a[k], c[k]) {
                    g[k] += d[k];
                }
            }
        }
        Ok(())
    }
}
