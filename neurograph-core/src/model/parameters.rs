use crate::dim::Dim;
use crate::error::{shape_mismatch, NeuroGraphError};
use crate::tensor::Tensor;
use rand::Rng;

/// Uniform initialization scale: `scale` itself, or the Glorot scale
/// `sqrt(6 / sum(dims))` when `scale == 0`.
pub(crate) fn init_scale(dim: &Dim, scale: f32) -> f32 {
    if scale == 0.0 {
        (6.0 / dim.sum_dims().max(1) as f32).sqrt()
    } else {
        scale
    }
}

/// A dense trainable tensor together with its accumulated gradient.
#[derive(Debug, Clone)]
pub struct Parameters {
    dim: Dim,
    values: Tensor,
    g: Tensor,
    name: String,
}

impl Parameters {
    /// Creates a parameter with a zero gradient.
    ///
    /// # Arguments
    /// * `dim` - Shape of the values.
    /// * `scale` - Uniform initialization bound; 0 selects the Glorot scale.
    /// * `name` - Label used in logs and errors.
    /// * `rng` - Source of the initial values.
    pub fn new<R: Rng + ?Sized>(dim: &Dim, scale: f32, name: &str, rng: &mut R) -> Self {
        Parameters {
            dim: dim.clone(),
            values: Tensor::uniform(dim, init_scale(dim, scale), rng),
            g: Tensor::zeros(dim),
            name: name.to_string(),
        }
    }

    pub fn dim(&self) -> &Dim {
        &self.dim
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &Tensor {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Tensor {
        &mut self.values
    }

    pub fn grad(&self) -> &Tensor {
        &self.g
    }

    /// Mutable values alongside the read-only gradient, for update rules.
    pub fn values_and_grad_mut(&mut self) -> (&mut Tensor, &Tensor) {
        (&mut self.values, &self.g)
    }

    /// Number of scalar values.
    pub fn size(&self) -> usize {
        self.dim.size()
    }

    /// Adds `d` to the gradient.
    ///
    /// # Errors
    /// `ShapeMismatch` unless `d` has the parameter's shape.
    pub fn accumulate_grad(&mut self, d: &Tensor) -> Result<(), NeuroGraphError> {
        if d.dim() != &self.dim {
            return Err(shape_mismatch(
                &format!("accumulate_grad({})", self.name),
                &self.dim,
                d.dim(),
            ));
        }
        self.g.add_assign(d)
    }

    /// Zeroes the gradient.
    pub fn clear(&mut self) {
        self.g.zero();
    }

    pub fn squared_l2norm(&self) -> f32 {
        self.values.squared_norm()
    }

    pub fn g_squared_l2norm(&self) -> f32 {
        self.g.squared_norm()
    }

    /// Clamps every gradient component to `[-threshold, threshold]`.
    /// Returns `true` if any component was changed.
    pub fn g_simple_clipping(&mut self, threshold: f32) -> bool {
        let mut clipped = false;
        for v in self.g.values_mut() {
            let c = v.clamp(-threshold, threshold);
            if c != *v {
                *v = c;
                clipped = true;
            }
        }
        clipped
    }

    pub fn scale_parameters(&mut self, a: f32) {
        self.values.scale(a);
    }

    pub fn scale_gradient(&mut self, a: f32) {
        self.g.scale(a);
    }

    /// Rescales the values to L2 norm `radius` if they exceed it.
    pub fn project(&mut self, radius: f32) -> bool {
        let norm = self.values.l2_norm();
        if norm > radius {
            self.values.scale(radius / norm);
            true
        } else {
            false
        }
    }

    /// Copies the values of another parameter of the same shape.
    pub fn copy_from(&mut self, other: &Parameters) -> Result<(), NeuroGraphError> {
        if other.dim != self.dim {
            return Err(shape_mismatch("Parameters::copy_from", &self.dim, &other.dim));
        }
        self.values.copy_from(&other.values)
    }

    /// Zeroes both values and gradient.
    pub fn reset_to_zero(&mut self) {
        self.values.zero();
        self.g.zero();
    }

    /// Overwrites the values from a flat buffer of the right length.
    pub(crate) fn set_values(&mut self, values: &[f32]) -> Result<(), NeuroGraphError> {
        if values.len() != self.dim.size() {
            return Err(shape_mismatch("Parameters::set_values", self.dim.size(), values.len()));
        }
        self.values.values_mut().copy_from_slice(values);
        Ok(())
    }
}

#[cfg(test)]
#[path = "parameters_test.rs"]
mod tests;
