use super::parameters::init_scale;
use crate::device::StorageDevice;
use crate::dim::Dim;
use crate::error::{shape_mismatch, NeuroGraphError};
use crate::tensor::Tensor;
use log::debug;
use rand::Rng;
use std::collections::BTreeMap;

/// A table of independently trained rows with sparse gradients.
///
/// Only rows touched since the last [`LookupParameters::clear`] carry a
/// gradient. Each touched row also gets a working copy on the working device;
/// updates are applied to that copy and written back to the bulk table.
/// Writes to the bulk table while gradients are pending refresh the matching
/// working copies.
#[derive(Debug)]
pub struct LookupParameters {
    dim: Dim,
    values: Vec<Tensor>,
    values_for_non_zero_grads: BTreeMap<usize, Tensor>,
    grads: BTreeMap<usize, Tensor>,
    device: StorageDevice,
    working_device: StorageDevice,
    name: String,
}

impl LookupParameters {
    pub fn new<R: Rng + ?Sized>(rows: usize, dim: &Dim, scale: f32, name: &str, rng: &mut R) -> Self {
        let scale = init_scale(dim, scale);
        LookupParameters {
            dim: dim.clone(),
            values: (0..rows).map(|_| Tensor::uniform(dim, scale, rng)).collect(),
            values_for_non_zero_grads: BTreeMap::new(),
            grads: BTreeMap::new(),
            device: StorageDevice::CPU,
            working_device: StorageDevice::CPU,
            name: name.to_string(),
        }
    }

    /// Moves the bulk table and sets where working copies of touched rows live.
    pub fn set_devices(&mut self, device: StorageDevice, working_device: StorageDevice) {
        if device != self.device {
            self.values = self.values.iter().map(|v| v.to_device(device)).collect();
            self.device = device;
        }
        if working_device != self.working_device {
            self.working_device = working_device;
            self.refresh_working_copies();
        }
    }

    /// Shape of one row.
    pub fn dim(&self) -> &Dim {
        &self.dim
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rows(&self) -> usize {
        self.values.len()
    }

    pub fn device(&self) -> StorageDevice {
        self.device
    }

    pub fn working_device(&self) -> StorageDevice {
        self.working_device
    }

    /// Number of scalar values across all rows.
    pub fn size(&self) -> usize {
        self.values.len() * self.dim.size()
    }

    pub fn row(&self, index: usize) -> Result<&Tensor, NeuroGraphError> {
        self.values.get(index).ok_or(NeuroGraphError::IndexOutOfBounds {
            index,
            len: self.values.len(),
        })
    }

    /// Overwrites one row.
    pub fn initialize_row(&mut self, index: usize, values: &[f32]) -> Result<(), NeuroGraphError> {
        let len = self.values.len();
        let size = self.dim.size();
        let row = self
            .values
            .get_mut(index)
            .ok_or(NeuroGraphError::IndexOutOfBounds { index, len })?;
        if values.len() != size {
            return Err(shape_mismatch("initialize_row", size, values.len()));
        }
        row.values_mut().copy_from_slice(values);
        self.refresh_working_copy(index);
        Ok(())
    }

    /// Overwrites the given rows, e.g. with pre-trained embeddings.
    ///
    /// # Arguments
    /// * `rows` - Row index to row values. Every vector must hold `dim().size()` values.
    ///
    /// # Errors
    /// `IndexOutOfBounds` for a row past the table and `ShapeMismatch` for a
    /// vector of the wrong length. Nothing is written unless every entry is valid.
    pub fn copy_rows(&mut self, rows: &BTreeMap<usize, Vec<f32>>) -> Result<(), NeuroGraphError> {
        let len = self.values.len();
        let size = self.dim.size();
        for (&index, values) in rows {
            if index >= len {
                return Err(NeuroGraphError::IndexOutOfBounds { index, len });
            }
            if values.len() != size {
                return Err(shape_mismatch(
                    &format!("copy_rows({}) row {}", self.name, index),
                    size,
                    values.len(),
                ));
            }
        }
        for (&index, values) in rows {
            self.values[index].values_mut().copy_from_slice(values);
            self.refresh_working_copy(index);
        }
        debug!("LookupParameters '{}': copied {} rows", self.name, rows.len());
        Ok(())
    }

    /// Adds `g` to the gradient of row `index`, marking the row as touched.
    pub fn accumulate_grad(&mut self, index: usize, g: &[f32]) -> Result<(), NeuroGraphError> {
        let len = self.values.len();
        if index >= len {
            return Err(NeuroGraphError::IndexOutOfBounds { index, len });
        }
        if g.len() != self.dim.size() {
            return Err(shape_mismatch(
                &format!("accumulate_grad({})", self.name),
                self.dim.size(),
                g.len(),
            ));
        }
        if !self.values_for_non_zero_grads.contains_key(&index) {
            let working = self.values[index].to_device(self.working_device);
            self.values_for_non_zero_grads.insert(index, working);
        }
        let dim = &self.dim;
        let grad = self
            .grads
            .entry(index)
            .or_insert_with(|| Tensor::zeros(dim));
        crate::numeric::axpy(1.0, g, grad.values_mut());
        Ok(())
    }

    /// Indices of rows with a gradient, in ascending order.
    pub fn touched_rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.grads.keys().copied()
    }

    pub fn touched_count(&self) -> usize {
        self.grads.len()
    }

    pub fn grad(&self, index: usize) -> Option<&Tensor> {
        self.grads.get(&index)
    }

    /// Working copy of a touched row, `None` for untouched rows.
    pub fn working_copy(&self, index: usize) -> Option<&Tensor> {
        self.values_for_non_zero_grads.get(&index)
    }

    fn refresh_working_copy(&mut self, index: usize) {
        if let Some(working) = self.values_for_non_zero_grads.get_mut(&index) {
            *working = self.values[index].to_device(self.working_device);
        }
    }

    fn refresh_working_copies(&mut self) {
        let LookupParameters {
            values,
            values_for_non_zero_grads,
            working_device,
            ..
        } = self;
        for (&row, working) in values_for_non_zero_grads.iter_mut() {
            *working = values[row].to_device(*working_device);
        }
    }

    /// Forgets all gradients and working copies.
    pub fn clear(&mut self) {
        self.grads.clear();
        self.values_for_non_zero_grads.clear();
    }

    pub fn squared_l2norm(&self) -> f32 {
        self.values.iter().map(Tensor::squared_norm).sum()
    }

    /// Squared L2 norm of the gradients of touched rows.
    pub fn g_squared_l2norm(&self) -> f32 {
        self.grads.values().map(Tensor::squared_norm).sum()
    }

    /// Squared gradient norm of each touched row, in ascending row order.
    pub fn row_g_squared_l2norms(&self) -> impl Iterator<Item = f32> + '_ {
        self.grads.values().map(Tensor::squared_norm)
    }

    pub fn g_simple_clipping(&mut self, threshold: f32) -> bool {
        let mut clipped = false;
        for g in self.grads.values_mut() {
            for v in g.values_mut() {
                let c = v.clamp(-threshold, threshold);
                if c != *v {
                    *v = c;
                    clipped = true;
                }
            }
        }
        clipped
    }

    pub fn scale_parameters(&mut self, a: f32) {
        self.values.iter_mut().for_each(|v| v.scale(a));
        self.refresh_working_copies();
    }

    pub fn scale_gradient(&mut self, a: f32) {
        self.grads.values_mut().for_each(|g| g.scale(a));
    }

    /// Rescales every row whose L2 norm exceeds `radius`.
    pub fn project(&mut self, radius: f32) -> usize {
        let mut projected = 0;
        for v in &mut self.values {
            let norm = v.l2_norm();
            if norm > radius {
                v.scale(radius / norm);
                projected += 1;
            }
        }
        if projected > 0 {
            self.refresh_working_copies();
        }
        projected
    }

    pub fn copy_from(&mut self, other: &LookupParameters) -> Result<(), NeuroGraphError> {
        if other.dim != self.dim || other.values.len() != self.values.len() {
            return Err(shape_mismatch(
                "LookupParameters::copy_from",
                format!("{} x {}", self.values.len(), self.dim),
                format!("{} x {}", other.values.len(), other.dim),
            ));
        }
        for (dst, src) in self.values.iter_mut().zip(&other.values) {
            dst.values_mut().copy_from_slice(src.values());
        }
        self.refresh_working_copies();
        Ok(())
    }

    pub fn reset_to_zero(&mut self) {
        self.values.iter_mut().for_each(Tensor::zero);
        self.clear();
    }

    /// Runs `f(row, working_values, grad)` on every touched row in ascending
    /// order, then writes each working copy back to the bulk table.
    pub fn update_touched_rows<F>(&mut self, mut f: F) -> Result<(), NeuroGraphError>
    where
        F: FnMut(usize, &mut Tensor, &Tensor) -> Result<(), NeuroGraphError>,
    {
        let LookupParameters {
            values,
            values_for_non_zero_grads,
            grads,
            device,
            working_device,
            ..
        } = self;
        if device != working_device && !grads.is_empty() {
            debug!(
                "LookupParameters: synchronizing {} rows {:?} -> {:?}",
                grads.len(),
                working_device,
                device
            );
        }
        for (&row, g) in grads.iter() {
            let working = values_for_non_zero_grads
                .entry(row)
                .or_insert_with(|| values[row].to_device(*working_device));
            f(row, working, g)?;
            values[row] = working.to_device(*device);
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "lookup_test.rs"]
mod tests;
