//! Distances and losses. Each produces one scalar per batch element unless noted.

use super::{batches, expect_args, same_shape, Node};
use crate::dim::Dim;
use crate::error::{shape_mismatch, NeuroGraphError};
use crate::tensor::Tensor;
use rand::rngs::StdRng;

fn scalar_dim(op: &str, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
    expect_args(op, xs, 2)?;
    let d = same_shape(op, xs)?;
    Ok(Dim::with_batch(&[1], d.batch_elems()))
}

/// Applies `f(x, y)` element-wise and sums per batch element.
fn reduce_pairs(xs: &[&Tensor], fx: &mut Tensor, f: impl Fn(f32, f32) -> f32) {
    for b in 0..batches(fx) {
        let (x, y) = (xs[0].batch(b), xs[1].batch(b));
        fx.batch_mut(b)[0] = x.iter().zip(y).map(|(&a, &c)| f(a, c)).sum();
    }
}

/// `g_i += dE/df * df/dx_i`, with `df/dx_0 = grad(x, y)` and `df/dx_1 = -grad(x, y)`.
fn backward_pairs(
    xs: &[&Tensor],
    d_edf: &Tensor,
    i: usize,
    d_edxi: &mut Tensor,
    grad: impl Fn(f32, f32) -> f32,
) {
    let sign = if i == 0 { 1.0 } else { -1.0 };
    for b in 0..batches(d_edf) {
        let d = d_edf.batch(b)[0];
        let (x, y) = (xs[0].batch(b), xs[1].batch(b));
        for ((g, &a), &c) in d_edxi.batch_mut(b).iter_mut().zip(x).zip(y) {
            *g += sign * d * grad(a, c);
        }
    }
}

#[derive(Debug, Default)]
pub struct DotProduct;

impl Node for DotProduct {
    fn name(&self) -> &'static str {
        "dot_product"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        scalar_dim("dot_product", xs)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        reduce_pairs(xs, fx, |a, c| a * c);
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let other = xs[1 - i];
        for b in 0..batches(d_edf) {
            let d = d_edf.batch(b)[0];
            for (g, &o) in d_edxi.batch_mut(b).iter_mut().zip(other.batch(b)) {
                *g += d * o;
            }
        }
        Ok(())
    }
}

/// `sum((x - y)^2)`
#[derive(Debug, Default)]
pub struct SquaredDistance;

impl Node for SquaredDistance {
    fn name(&self) -> &'static str {
        "squared_distance"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        scalar_dim("squared_distance", xs)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        reduce_pairs(xs, fx, |a, c| (a - c) * (a - c));
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        backward_pairs(xs, d_edf, i, d_edxi, |a, c| 2.0 * (a - c));
        Ok(())
    }
}

/// `sum(|x - y|)`. Sub-gradient 0 where `x == y`.
#[derive(Debug, Default)]
pub struct L1Distance;

impl Node for L1Distance {
    fn name(&self) -> &'static str {
        "l1_distance"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        scalar_dim("l1_distance", xs)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        reduce_pairs(xs, fx, |a, c| (a - c).abs());
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        backward_pairs(xs, d_edf, i, d_edxi, |a, c| {
            let r = a - c;
            if r > 0.0 {
                1.0
            } else if r < 0.0 {
                -1.0
            } else {
                0.0
            }
        });
        Ok(())
    }
}

/// Huber distance: `r^2` for `|r| < c`, `c (2|r| - c)` beyond, with `r = x - y`.
#[derive(Debug)]
pub struct HuberDistance {
    c: f32,
}

impl HuberDistance {
    pub fn new(c: f32) -> Self {
        HuberDistance { c }
    }
}

impl Node for HuberDistance {
    fn name(&self) -> &'static str {
        "huber_distance"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        scalar_dim("huber_distance", xs)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let c = self.c;
        reduce_pairs(xs, fx, |a, b| {
            let r = a - b;
            if r.abs() < c {
                r * r
            } else {
                c * (2.0 * r.abs() - c)
            }
        });
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let c = self.c;
        backward_pairs(xs, d_edf, i, d_edxi, |a, b| {
            let r = a - b;
            if r.abs() < c {
                2.0 * r
            } else {
                2.0 * c * r.signum()
            }
        });
        Ok(())
    }
}

/// Binary cross entropy of predicted probabilities `x` against targets `y`.
#[derive(Debug, Default)]
pub struct BinaryLogLoss;

impl Node for BinaryLogLoss {
    fn name(&self) -> &'static str {
        "binary_log_loss"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        scalar_dim("binary_log_loss", xs)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        reduce_pairs(xs, fx, |x, y| -(y * x.ln() + (1.0 - y) * (1.0 - x).ln()));
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        for b in 0..batches(d_edf) {
            let d = d_edf.batch(b)[0];
            let (x, y) = (xs[0].batch(b), xs[1].batch(b));
            for (k, g) in d_edxi.batch_mut(b).iter_mut().enumerate() {
                let (p, t) = (x[k], y[k]);
                *g += if i == 0 {
                    d * ((1.0 - t) / (1.0 - p) - t / p)
                } else {
                    d * ((1.0 - p).ln() - p.ln())
                };
            }
        }
        Ok(())
    }
}

/// Multi-class hinge loss `sum_{j != t} max(0, m - x_t + x_j)`.
///
/// A term exactly at the margin boundary counts as inactive.
#[derive(Debug)]
pub struct Hinge {
    indices: Vec<usize>,
    margin: f32,
}

impl Hinge {
    pub fn new(indices: Vec<usize>, margin: f32) -> Self {
        Hinge { indices, margin }
    }

    fn target(&self, b: usize) -> usize {
        if self.indices.len() == 1 {
            self.indices[0]
        } else {
            self.indices[b]
        }
    }
}

impl Node for Hinge {
    fn name(&self) -> &'static str {
        "hinge"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("hinge", xs, 1)?;
        let x = xs[0];
        if !x.is_vector() {
            return Err(shape_mismatch("hinge", "a vector", x));
        }
        if let Some(&bad) = self.indices.iter().find(|&&t| t >= x.rows()) {
            return Err(NeuroGraphError::IndexOutOfBounds {
                index: bad,
                len: x.rows(),
            });
        }
        let n = self.indices.len();
        if n == 0 || (n > 1 && x.batch_elems() != 1 && x.batch_elems() != n) {
            return Err(shape_mismatch("hinge", format!("{} indices", x.batch_elems()), n));
        }
        Ok(Dim::with_batch(&[1], x.batch_elems().max(n)))
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        for b in 0..batches(fx) {
            let x = xs[0].batch(b);
            let t = self.target(b);
            let loss: f32 = x
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != t)
                .map(|(_, &xj)| (self.margin - x[t] + xj).max(0.0))
                .sum();
            fx.batch_mut(b)[0] = loss;
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        for b in 0..batches(d_edf) {
            let d = d_edf.batch(b)[0];
            let x = xs[0].batch(b);
            let t = self.target(b);
            let g = d_edxi.batch_mut(b);
            for j in 0..x.len() {
                if j != t && self.margin - x[t] + x[j] > 0.0 {
                    g[j] += d;
                    g[t] -= d;
                }
            }
        }
        Ok(())
    }
}

/// Element-wise `max(0, m - x + y)`; the output has the shape of `x`.
#[derive(Debug)]
pub struct PairwiseRankLoss {
    margin: f32,
}

impl PairwiseRankLoss {
    pub fn new(margin: f32) -> Self {
        PairwiseRankLoss { margin }
    }
}

impl Node for PairwiseRankLoss {
    fn name(&self) -> &'static str {
        "pairwise_rank_loss"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("pairwise_rank_loss", xs, 2)?;
        same_shape("pairwise_rank_loss", xs)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        for b in 0..batches(fx) {
            let (x, y) = (xs[0].batch(b), xs[1].batch(b));
            for ((o, &a), &c) in fx.batch_mut(b).iter_mut().zip(x).zip(y) {
                *o = (self.margin - a + c).max(0.0);
            }
        }
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let sign = if i == 0 { -1.0 } else { 1.0 };
        for b in 0..batches(d_edf) {
            let (f, d) = (fx.batch(b), d_edf.batch(b));
            for (k, g) in d_edxi.batch_mut(b).iter_mut().enumerate() {
                if f[k] > 0.0 {
                    *g += sign * d[k];
                }
            }
        }
        Ok(())
    }
}

/// Negative log-likelihood of a count `y` under a Poisson with rate `exp(x)`.
#[derive(Debug)]
pub struct PoissonLoss {
    labels: Vec<usize>,
}

impl PoissonLoss {
    pub fn new(labels: Vec<usize>) -> Self {
        PoissonLoss { labels }
    }

    fn label(&self, b: usize) -> usize {
        if self.labels.len() == 1 {
            self.labels[0]
        } else {
            self.labels[b]
        }
    }
}

/// `ln(y!)`
fn log_factorial(y: usize) -> f32 {
    (2..=y).map(|k| (k as f32).ln()).sum()
}

impl Node for PoissonLoss {
    fn name(&self) -> &'static str {
        "poisson_loss"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("poisson_loss", xs, 1)?;
        let x = xs[0];
        if !x.is_scalar() {
            return Err(shape_mismatch("poisson_loss", "{1}", x));
        }
        let n = self.labels.len();
        if n == 0 || (n > 1 && x.batch_elems() != 1 && x.batch_elems() != n) {
            return Err(shape_mismatch("poisson_loss", format!("{} labels", x.batch_elems()), n));
        }
        Ok(Dim::with_batch(&[1], x.batch_elems().max(n)))
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        for b in 0..batches(fx) {
            let x = xs[0].batch(b)[0];
            let y = self.label(b);
            fx.batch_mut(b)[0] = x.exp() - y as f32 * x + log_factorial(y);
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        for b in 0..batches(d_edf) {
            let x = xs[0].batch(b)[0];
            d_edxi.batch_mut(b)[0] += d_edf.batch(b)[0] * (x.exp() - self.label(b) as f32);
        }
        Ok(())
    }
}
