//! Row-wise one dimensional convolutions and k-max pooling over columns.

use super::{batches, broadcast_batch, expect_args, Node};
use crate::dim::Dim;
use crate::error::{shape_mismatch, NeuroGraphError};
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use std::cmp::Ordering;

/// Geometry shared by the narrow and wide convolutions.
///
/// Row `i` of the output is the convolution of row `i` of `x` (`r x n`) with
/// row `i` of the filter (`r x k`), with `x` padded by `pad` zero columns on
/// each side.
struct ConvShape {
    rows: usize,
    n: usize,
    k: usize,
    pad: usize,
    out_cols: usize,
}

impl ConvShape {
    fn of(xs: &[&Tensor], out: &Tensor, pad: usize) -> Self {
        ConvShape {
            rows: xs[0].dim().rows(),
            n: xs[0].dim().cols(),
            k: xs[1].dim().cols(),
            pad,
            out_cols: out.dim().cols(),
        }
    }

    /// Calls `f(out_index, x_index, filter_index)` for every product term.
    fn for_each_term(&self, mut f: impl FnMut(usize, usize, usize)) {
        for j in 0..self.out_cols {
            for t in 0..self.k {
                let col = j + t;
                if col < self.pad || col - self.pad >= self.n {
                    continue;
                }
                let xc = col - self.pad;
                for i in 0..self.rows {
                    f(j * self.rows + i, xc * self.rows + i, t * self.rows + i);
                }
            }
        }
    }
}

fn conv_dim(op: &str, xs: &[&Dim], wide: bool) -> Result<Dim, NeuroGraphError> {
    expect_args(op, xs, 2)?;
    let (x, f) = (xs[0], xs[1]);
    if x.ndims() > 2 || f.ndims() > 2 || x.rows() != f.rows() {
        return Err(shape_mismatch(op, format!("filter with {} rows", x.rows()), f));
    }
    if x.cols() == 0 || f.cols() == 0 {
        return Err(shape_mismatch(op, "input and filter with at least one column", format!("{} and {}", x, f)));
    }
    let cols = if wide {
        x.cols() + f.cols() - 1
    } else {
        if f.cols() > x.cols() {
            return Err(shape_mismatch(op, format!("filter with at most {} columns", x.cols()), f));
        }
        x.cols() - f.cols() + 1
    };
    let bd = broadcast_batch(op, xs)?;
    Ok(Dim::with_batch(&[x.rows(), cols], bd))
}

fn conv_forward(xs: &[&Tensor], fx: &mut Tensor, pad: usize) {
    let shape = ConvShape::of(xs, fx, pad);
    fx.zero();
    for b in 0..batches(fx) {
        let (x, f) = (xs[0].batch(b), xs[1].batch(b));
        let out = fx.batch_mut(b);
        shape.for_each_term(|o, xi, fi| out[o] += x[xi] * f[fi]);
    }
}

fn conv_backward(xs: &[&Tensor], fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor, pad: usize) {
    let shape = ConvShape::of(xs, fx, pad);
    for b in 0..batches(d_edf) {
        let d = d_edf.batch(b);
        let other = xs[1 - i].batch(b);
        let g = d_edxi.batch_mut(b);
        if i == 0 {
            shape.for_each_term(|o, xi, fi| g[xi] += d[o] * other[fi]);
        } else {
            shape.for_each_term(|o, xi, fi| g[fi] += d[o] * other[xi]);
        }
    }
}

/// Convolution without padding: `n - k + 1` output columns.
#[derive(Debug, Default)]
pub struct Conv1dNarrow;

impl Node for Conv1dNarrow {
    fn name(&self) -> &'static str {
        "conv1d_narrow"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        conv_dim("conv1d_narrow", xs, false)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        conv_forward(xs, fx, 0);
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        conv_backward(xs, fx, d_edf, i, d_edxi, 0);
        Ok(())
    }
}

/// Convolution with `k - 1` zero columns on each side: `n + k - 1` output columns.
#[derive(Debug, Default)]
pub struct Conv1dWide;

impl Node for Conv1dWide {
    fn name(&self) -> &'static str {
        "conv1d_wide"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        conv_dim("conv1d_wide", xs, true)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let pad = xs[1].dim().cols().saturating_sub(1);
        conv_forward(xs, fx, pad);
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let pad = xs[1].dim().cols().saturating_sub(1);
        conv_backward(xs, fx, d_edf, i, d_edxi, pad);
        Ok(())
    }
}

/// Keeps the `k` largest values of each row, in their original column order.
///
/// Ties go to the leftmost column. The selected columns are remembered from
/// the forward pass for backward.
#[derive(Debug)]
pub struct KMaxPooling {
    k: usize,
    selected: Vec<usize>,
}

impl KMaxPooling {
    pub fn new(k: usize) -> Self {
        KMaxPooling {
            k,
            selected: Vec::new(),
        }
    }
}

impl Node for KMaxPooling {
    fn name(&self) -> &'static str {
        "kmax_pooling"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("kmax_pooling", xs, 1)?;
        let x = xs[0];
        if x.ndims() > 2 || self.k == 0 || self.k > x.cols() {
            return Err(shape_mismatch(
                "kmax_pooling",
                format!("a matrix with at least {} columns", self.k),
                x,
            ));
        }
        Ok(Dim::with_batch(&[x.rows(), self.k], x.batch_elems()))
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let (rows, cols) = (xs[0].dim().rows(), xs[0].dim().cols());
        let bd = batches(fx);
        self.selected.clear();
        self.selected.resize(bd * rows * self.k, 0);
        let mut order: Vec<usize> = Vec::with_capacity(cols);
        for b in 0..bd {
            let x = xs[0].batch(b);
            for i in 0..rows {
                order.clear();
                order.extend(0..cols);
                order.sort_by(|&a, &c| {
                    x[c * rows + i]
                        .partial_cmp(&x[a * rows + i])
                        .unwrap_or(Ordering::Equal)
                        .then(a.cmp(&c))
                });
                let kept = &mut order[..self.k];
                kept.sort_unstable();
                for (j, &col) in kept.iter().enumerate() {
                    self.selected[(b * self.k + j) * rows + i] = col;
                }
            }
            let out = fx.batch_mut(b);
            for j in 0..self.k {
                for i in 0..rows {
                    let col = self.selected[(b * self.k + j) * rows + i];
                    out[j * rows + i] = x[col * rows + i];
                }
            }
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let rows = xs[0].dim().rows();
        for b in 0..batches(d_edf) {
            let d = d_edf.batch(b);
            let g = d_edxi.batch_mut(b);
            for j in 0..self.k {
                for i in 0..rows {
                    let col = self.selected[(b * self.k + j) * rows + i];
                    g[col * rows + i] += d[j * rows + i];
                }
            }
        }
        Ok(())
    }
}
