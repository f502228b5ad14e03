use super::{batches, expect_args, Node};
use crate::dim::Dim;
use crate::error::NeuroGraphError;
use crate::numeric;
use crate::tensor::Tensor;
use rand::rngs::StdRng;

/// Scalar functions applied independently to every element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ElementwiseKind {
    Tanh,
    Logistic,
    /// Derivative is 0 at 0.
    Rectify,
    /// Exponential linear unit with the given scale for negative inputs.
    Elu(f32),
    Exp,
    Log,
    Sqrt,
    Square,
    Cube,
    Softsign,
}

impl ElementwiseKind {
    fn apply(self, x: f32) -> f32 {
        match self {
            ElementwiseKind::Tanh => x.tanh(),
            ElementwiseKind::Logistic => 1.0 / (1.0 + (-x).exp()),
            ElementwiseKind::Rectify => x.max(0.0),
            ElementwiseKind::Elu(alpha) => {
                if x > 0.0 {
                    x
                } else {
                    alpha * (x.exp() - 1.0)
                }
            }
            ElementwiseKind::Exp => x.exp(),
            ElementwiseKind::Log => x.ln(),
            ElementwiseKind::Sqrt => x.sqrt(),
            ElementwiseKind::Square => x * x,
            ElementwiseKind::Cube => x * x * x,
            ElementwiseKind::Softsign => x / (1.0 + x.abs()),
        }
    }

    /// `df/dx` expressed through the input `x` and the output `f`.
    fn derivative(self, x: f32, f: f32) -> f32 {
        match self {
            ElementwiseKind::Tanh => 1.0 - f * f,
            ElementwiseKind::Logistic => f * (1.0 - f),
            ElementwiseKind::Rectify => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ElementwiseKind::Elu(alpha) => {
                if x > 0.0 {
                    1.0
                } else {
                    f + alpha
                }
            }
            ElementwiseKind::Exp => f,
            ElementwiseKind::Log => 1.0 / x,
            ElementwiseKind::Sqrt => 0.5 / f,
            ElementwiseKind::Square => 2.0 * x,
            ElementwiseKind::Cube => 3.0 * x * x,
            ElementwiseKind::Softsign => {
                let d = 1.0 + x.abs();
                1.0 / (d * d)
            }
        }
    }

    fn label(self) -> &'static str {
        match self {
            ElementwiseKind::Tanh => "tanh",
            ElementwiseKind::Logistic => "logistic",
            ElementwiseKind::Rectify => "rectify",
            ElementwiseKind::Elu(_) => "elu",
            ElementwiseKind::Exp => "exp",
            ElementwiseKind::Log => "log",
            ElementwiseKind::Sqrt => "sqrt",
            ElementwiseKind::Square => "square",
            ElementwiseKind::Cube => "cube",
            ElementwiseKind::Softsign => "softsign",
        }
    }
}

#[derive(Debug)]
pub struct Elementwise {
    kind: ElementwiseKind,
}

impl Elementwise {
    pub fn new(kind: ElementwiseKind) -> Self {
        Elementwise { kind }
    }
}

impl Node for Elementwise {
    fn name(&self) -> &'static str {
        self.kind.label()
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args(self.name(), xs, 1)?;
        Ok(xs[0].clone())
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let kind = self.kind;
        for (o, &x) in fx.values_mut().iter_mut().zip(xs[0].values()) {
            *o = kind.apply(x);
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let (x, f, d) = (xs[0].values(), fx.values(), d_edf.values());
        for (k, g) in d_edxi.values_mut().iter_mut().enumerate() {
            *g += d[k] * self.kind.derivative(x[k], f[k]);
        }
        Ok(())
    }
}

/// Softmax over each column, computed with the column maximum subtracted.
#[derive(Debug, Default)]
pub struct Softmax;

impl Node for Softmax {
    fn name(&self) -> &'static str {
        "softmax"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("softmax", xs, 1)?;
        Ok(xs[0].clone())
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let rows = fx.dim().rows();
        for b in 0..batches(fx) {
            let x = xs[0].batch(b);
            let out = fx.batch_mut(b);
            for (xc, oc) in x.chunks(rows).zip(out.chunks_mut(rows)) {
                let m = xc.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let mut z = 0.0;
                for (o, &v) in oc.iter_mut().zip(xc) {
                    *o = (v - m).exp();
                    z += *o;
                }
                oc.iter_mut().for_each(|o| *o /= z);
            }
        }
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let rows = fx.dim().rows();
        for b in 0..batches(fx) {
            let (f, d) = (fx.batch(b), d_edf.batch(b));
            let g = d_edxi.batch_mut(b);
            for ((fc, dc), gc) in f.chunks(rows).zip(d.chunks(rows)).zip(g.chunks_mut(rows)) {
                let dot: f32 = fc.iter().zip(dc).map(|(a, c)| a * c).sum();
                for k in 0..gc.len() {
                    gc[k] += fc[k] * (dc[k] - dot);
                }
            }
        }
        Ok(())
    }
}

/// Log-softmax over each column.
#[derive(Debug, Default)]
pub struct LogSoftmax;

impl Node for LogSoftmax {
    fn name(&self) -> &'static str {
        "log_softmax"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("log_softmax", xs, 1)?;
        Ok(xs[0].clone())
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let rows = fx.dim().rows();
        for b in 0..batches(fx) {
            let x = xs[0].batch(b);
            let out = fx.batch_mut(b);
            for (xc, oc) in x.chunks(rows).zip(out.chunks_mut(rows)) {
                let z = numeric::logsumexp(xc);
                for (o, &v) in oc.iter_mut().zip(xc) {
                    *o = v - z;
                }
            }
        }
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let rows = fx.dim().rows();
        for b in 0..batches(fx) {
            let (f, d) = (fx.batch(b), d_edf.batch(b));
            let g = d_edxi.batch_mut(b);
            for ((fc, dc), gc) in f.chunks(rows).zip(d.chunks(rows)).zip(g.chunks_mut(rows)) {
                let total: f32 = dc.iter().sum();
                for k in 0..gc.len() {
                    gc[k] += dc[k] - fc[k].exp() * total;
                }
            }
        }
        Ok(())
    }
}
