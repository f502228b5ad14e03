use crate::device::StorageDevice;
use crate::dim::Dim;
use crate::error::{shape_mismatch, NeuroGraphError};
use crate::numeric;
use log::debug;
use rand::Rng;

/// Dense buffer of `f32` values plus its shape.
///
/// Storage is column-major inside one batch element, and batch elements are laid
/// out one after the other. The buffer length always equals `dim.size()`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tensor {
    dim: Dim,
    values: Vec<f32>,
    device: StorageDevice,
}

impl Tensor {
    /// Allocates a zero-filled tensor on the host.
    pub fn zeros(dim: &Dim) -> Self {
        Tensor {
            values: vec![0.0; dim.size()],
            dim: dim.clone(),
            device: StorageDevice::CPU,
        }
    }

    /// Allocates a tensor filled with `value`.
    pub fn constant(dim: &Dim, value: f32) -> Self {
        Tensor {
            values: vec![value; dim.size()],
            dim: dim.clone(),
            device: StorageDevice::CPU,
        }
    }

    pub fn ones(dim: &Dim) -> Self {
        Tensor::constant(dim, 1.0)
    }

    pub fn scalar(value: f32) -> Self {
        Tensor::constant(&Dim::scalar(), value)
    }

    /// Wraps `values`, checking that their number matches `dim`.
    ///
    /// # Errors
    /// Returns `TensorCreationError` if `values.len() != dim.size()`.
    pub fn from_vec(values: Vec<f32>, dim: &Dim) -> Result<Self, NeuroGraphError> {
        if values.len() != dim.size() {
            return Err(NeuroGraphError::TensorCreationError {
                data_len: values.len(),
                shape: dim.dims().to_vec(),
            });
        }
        Ok(Tensor {
            dim: dim.clone(),
            values,
            device: StorageDevice::CPU,
        })
    }

    /// Allocates a tensor drawn uniformly from `[-|scale|, |scale|]`.
    pub fn uniform<R: Rng + ?Sized>(dim: &Dim, scale: f32, rng: &mut R) -> Self {
        let scale = scale.abs();
        let values = (0..dim.size())
            .map(|_| if scale > 0.0 { rng.gen_range(-scale..=scale) } else { 0.0 })
            .collect();
        Tensor {
            dim: dim.clone(),
            values,
            device: StorageDevice::CPU,
        }
    }

    pub fn dim(&self) -> &Dim {
        &self.dim
    }

    pub fn device(&self) -> StorageDevice {
        self.device
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values of batch element `b`. A tensor with a single batch element
    /// broadcasts: every `b` maps to that element.
    pub fn batch(&self, b: usize) -> &[f32] {
        let n = self.dim.batch_size();
        let b = if self.dim.batch_elems() == 1 { 0 } else { b };
        &self.values[b * n..(b + 1) * n]
    }

    /// Mutable counterpart of [`Tensor::batch`], with the same broadcast rule.
    pub fn batch_mut(&mut self, b: usize) -> &mut [f32] {
        let n = self.dim.batch_size();
        let b = if self.dim.batch_elems() == 1 { 0 } else { b };
        &mut self.values[b * n..(b + 1) * n]
    }

    /// Column-major element access inside one batch element.
    pub fn at(&self, b: usize, row: usize, col: usize) -> f32 {
        self.batch(b)[col * self.dim.rows() + row]
    }

    /// The single value of a one-element tensor.
    pub fn as_scalar(&self) -> Result<f32, NeuroGraphError> {
        if self.values.len() != 1 {
            return Err(shape_mismatch("as_scalar", "{1}", &self.dim));
        }
        Ok(self.values[0])
    }

    /// Reshapes in place; the number of values must not change.
    pub fn reshape(&mut self, dim: &Dim) -> Result<(), NeuroGraphError> {
        if dim.size() != self.values.len() {
            return Err(shape_mismatch("reshape", &self.dim, dim));
        }
        self.dim = dim.clone();
        Ok(())
    }

    /// Resizes the buffer to `dim`, reusing the allocation when the size is unchanged.
    pub(crate) fn ensure_dim(&mut self, dim: &Dim) {
        if &self.dim != dim {
            self.values.resize(dim.size(), 0.0);
            self.dim = dim.clone();
        }
    }

    pub fn fill(&mut self, value: f32) {
        self.values.iter_mut().for_each(|v| *v = value);
    }

    pub fn zero(&mut self) {
        self.fill(0.0);
    }

    pub fn scale(&mut self, a: f32) {
        self.values.iter_mut().for_each(|v| *v *= a);
    }

    /// Element-wise `self += other`. Shapes must be identical.
    pub fn add_assign(&mut self, other: &Tensor) -> Result<(), NeuroGraphError> {
        self.add_scaled(other, 1.0)
    }

    /// Element-wise `self += a * other`. Shapes must be identical.
    pub fn add_scaled(&mut self, other: &Tensor, a: f32) -> Result<(), NeuroGraphError> {
        if self.dim != other.dim {
            return Err(shape_mismatch("add_scaled", &self.dim, &other.dim));
        }
        numeric::axpy(a, &other.values, &mut self.values);
        Ok(())
    }

    /// Overwrites the values with those of `other`. Shapes must be identical.
    pub fn copy_from(&mut self, other: &Tensor) -> Result<(), NeuroGraphError> {
        if self.dim != other.dim {
            return Err(shape_mismatch("copy_from", &self.dim, &other.dim));
        }
        self.values.copy_from_slice(&other.values);
        Ok(())
    }

    pub fn squared_norm(&self) -> f32 {
        numeric::squared_norm(&self.values)
    }

    pub fn l2_norm(&self) -> f32 {
        self.squared_norm().sqrt()
    }

    /// `true` when no element is NaN or infinite.
    pub fn is_valid(&self) -> bool {
        numeric::is_valid(&self.values)
    }

    /// Copies the tensor to `device`. The call blocks until the copy is complete.
    pub fn to_device(&self, device: StorageDevice) -> Tensor {
        if device != self.device {
            debug!(
                "Tensor::to_device: copying {} values {:?} -> {:?}",
                self.values.len(),
                self.device,
                device
            );
        }
        Tensor {
            dim: self.dim.clone(),
            values: self.values.clone(),
            device,
        }
    }
}

#[cfg(test)]
#[path = "tensor_test.rs"]
mod tests;
