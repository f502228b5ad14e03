use super::{accumulate_scaled, batches, expect_args, same_shape, Node};
use crate::dim::Dim;
use crate::error::{shape_mismatch, NeuroGraphError};
use crate::tensor::Tensor;
use rand::rngs::StdRng;

/// Sum of every element of each batch element, giving one scalar per batch element.
#[derive(Debug, Default)]
pub struct SumElements;

impl Node for SumElements {
    fn name(&self) -> &'static str {
        "sum_elements"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("sum_elements", xs, 1)?;
        Ok(Dim::with_batch(&[1], xs[0].batch_elems()))
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        for b in 0..batches(fx) {
            fx.batch_mut(b)[0] = xs[0].batch(b).iter().sum();
        }
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        for b in 0..batches(d_edf) {
            let d = d_edf.batch(b)[0];
            d_edxi.batch_mut(b).iter_mut().for_each(|g| *g += d);
        }
        Ok(())
    }
}

/// Sums the columns of a matrix into one column.
#[derive(Debug, Default)]
pub struct SumCols;

impl Node for SumCols {
    fn name(&self) -> &'static str {
        "sum_cols"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("sum_cols", xs, 1)?;
        if xs[0].ndims() > 2 {
            return Err(shape_mismatch("sum_cols", "a matrix", xs[0]));
        }
        Ok(Dim::with_batch(&[xs[0].rows()], xs[0].batch_elems()))
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let rows = fx.dim().rows();
        fx.zero();
        for b in 0..batches(fx) {
            let x = xs[0].batch(b);
            let out = fx.batch_mut(b);
            for (k, v) in x.iter().enumerate() {
                out[k % rows] += v;
            }
        }
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let rows = fx.dim().rows();
        for b in 0..batches(d_edf) {
            let d = d_edf.batch(b);
            for (k, g) in d_edxi.batch_mut(b).iter_mut().enumerate() {
                *g += d[k % rows];
            }
        }
        Ok(())
    }
}

/// Sums over the batch dimension, leaving a single batch element.
#[derive(Debug, Default)]
pub struct SumBatches;

impl Node for SumBatches {
    fn name(&self) -> &'static str {
        "sum_batches"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("sum_batches", xs, 1)?;
        Ok(xs[0].single_batch())
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        fx.zero();
        let out = fx.batch_mut(0);
        for b in 0..xs[0].dim().batch_elems() {
            for (o, v) in out.iter_mut().zip(xs[0].batch(b)) {
                *o += v;
            }
        }
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        let d = d_edf.batch(0);
        for b in 0..d_edxi.dim().batch_elems() {
            for (g, v) in d_edxi.batch_mut(b).iter_mut().zip(d) {
                *g += v;
            }
        }
        Ok(())
    }
}

/// Element-wise mean of a list of same-shaped arguments.
#[derive(Debug, Default)]
pub struct Average;

impl Node for Average {
    fn name(&self) -> &'static str {
        "average"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        same_shape("average", xs)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let n = xs.len() as f32;
        fx.zero();
        for b in 0..batches(fx) {
            let out = fx.batch_mut(b);
            for x in xs {
                for (o, v) in out.iter_mut().zip(x.batch(b)) {
                    *o += v / n;
                }
            }
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        accumulate_scaled(d_edf, d_edxi, 1.0 / xs.len() as f32);
        Ok(())
    }
}

/// Element-wise maximum of a list of arguments.
///
/// Sub-gradient: each element's gradient goes to the first argument holding the maximum.
#[derive(Debug, Default)]
pub struct MaxOf;

impl Node for MaxOf {
    fn name(&self) -> &'static str {
        "max_of"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        same_shape("max_of", xs)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        for b in 0..batches(fx) {
            let out = fx.batch_mut(b);
            out.copy_from_slice(xs[0].batch(b));
            for x in &xs[1..] {
                for (o, &v) in out.iter_mut().zip(x.batch(b)) {
                    if v > *o {
                        *o = v;
                    }
                }
            }
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        for b in 0..batches(d_edf) {
            let d = d_edf.batch(b);
            let g = d_edxi.batch_mut(b);
            for k in 0..d.len() {
                let column: Vec<f32> = xs.iter().map(|x| x.batch(b)[k]).collect();
                if crate::numeric::first_argmax(&column) == i {
                    g[k] += d[k];
                }
            }
        }
        Ok(())
    }
}

/// Element-wise `log(sum_i exp(x_i))` over a list of arguments.
#[derive(Debug, Default)]
pub struct LogSumExp;

impl Node for LogSumExp {
    fn name(&self) -> &'static str {
        "logsumexp"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        same_shape("logsumexp", xs)
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let mut column = vec![0.0f32; xs.len()];
        for b in 0..batches(fx) {
            let out = fx.batch_mut(b);
            for (k, o) in out.iter_mut().enumerate() {
                for (c, x) in column.iter_mut().zip(xs) {
                    *c = x.batch(b)[k];
                }
                *o = crate::numeric::logsumexp(&column);
            }
        }
        Ok(())
    }

    fn backward(&self, xs: &[&Tensor], fx: &Tensor, d_edf: &Tensor, i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        for b in 0..batches(d_edf) {
            let (d, f, x) = (d_edf.batch(b), fx.batch(b), xs[i].batch(b));
            let g = d_edxi.batch_mut(b);
            for k in 0..d.len() {
                g[k] += d[k] * (x[k] - f[k]).exp();
            }
        }
        Ok(())
    }
}
