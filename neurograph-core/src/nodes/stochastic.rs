//! Nodes that draw random numbers at forward time.
//!
//! Masks and noise come from the graph's seeded generator and are kept in the
//! node so that backward sees exactly what forward used.

use super::{accumulate_scaled, expect_args, Node};
use crate::dim::Dim;
use crate::error::NeuroGraphError;
use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

fn check_probability(op: &str, p: f32) -> Result<(), NeuroGraphError> {
    if !(0.0..1.0).contains(&p) {
        return Err(NeuroGraphError::ConfigurationError(format!(
            "{}: drop probability must be in [0, 1), got {}",
            op, p
        )));
    }
    Ok(())
}

/// Inverted dropout: each element is kept with probability `1 - p` and scaled by `1 / (1 - p)`.
#[derive(Debug)]
pub struct Dropout {
    p: f32,
    mask: Vec<f32>,
}

impl Dropout {
    pub fn new(p: f32) -> Result<Self, NeuroGraphError> {
        check_probability("dropout", p)?;
        Ok(Dropout { p, mask: Vec::new() })
    }
}

impl Node for Dropout {
    fn name(&self) -> &'static str {
        "dropout"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("dropout", xs, 1)?;
        Ok(xs[0].clone())
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let keep = 1.0 - self.p;
        self.mask.clear();
        self.mask
            .extend((0..fx.len()).map(|_| if rng.gen::<f32>() < keep { 1.0 / keep } else { 0.0 }));
        for ((o, x), m) in fx.values_mut().iter_mut().zip(xs[0].values()).zip(&self.mask) {
            *o = x * m;
        }
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        for ((g, d), m) in d_edxi.values_mut().iter_mut().zip(d_edf.values()).zip(&self.mask) {
            *g += d * m;
        }
        Ok(())
    }
}

/// Drops each batch element as a whole with probability `p`.
#[derive(Debug)]
pub struct BlockDropout {
    p: f32,
    mask: Vec<f32>,
}

impl BlockDropout {
    pub fn new(p: f32) -> Result<Self, NeuroGraphError> {
        check_probability("block_dropout", p)?;
        Ok(BlockDropout { p, mask: Vec::new() })
    }
}

impl Node for BlockDropout {
    fn name(&self) -> &'static str {
        "block_dropout"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("block_dropout", xs, 1)?;
        Ok(xs[0].clone())
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        let keep = 1.0 - self.p;
        let bd = fx.dim().batch_elems();
        self.mask.clear();
        self.mask
            .extend((0..bd).map(|_| if rng.gen::<f32>() < keep { 1.0 / keep } else { 0.0 }));
        for b in 0..bd {
            let m = self.mask[b];
            for (o, x) in fx.batch_mut(b).iter_mut().zip(xs[0].batch(b)) {
                *o = x * m;
            }
        }
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        for (b, &m) in self.mask.iter().enumerate() {
            for (g, d) in d_edxi.batch_mut(b).iter_mut().zip(d_edf.batch(b)) {
                *g += d * m;
            }
        }
        Ok(())
    }
}

/// Adds zero-mean Gaussian noise with the given standard deviation.
#[derive(Debug)]
pub struct GaussianNoise {
    normal: Normal<f32>,
}

impl GaussianNoise {
    pub fn new(stddev: f32) -> Result<Self, NeuroGraphError> {
        let normal = Normal::new(0.0, stddev).map_err(|e| {
            NeuroGraphError::ConfigurationError(format!("noise: invalid stddev {}: {}", stddev, e))
        })?;
        Ok(GaussianNoise { normal })
    }
}

impl Node for GaussianNoise {
    fn name(&self) -> &'static str {
        "noise"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        expect_args("noise", xs, 1)?;
        Ok(xs[0].clone())
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        for (o, x) in fx.values_mut().iter_mut().zip(xs[0].values()) {
            *o = x + self.normal.sample(rng);
        }
        Ok(())
    }

    fn backward(&self, _xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        accumulate_scaled(d_edf, d_edxi, 1.0);
        Ok(())
    }
}
