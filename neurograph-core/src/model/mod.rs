//! Trainable state: dense [`Parameters`], sparse [`LookupParameters`] and the
//! [`Model`] that owns them.

use crate::dim::Dim;
use crate::error::NeuroGraphError;
use crate::memory::ScratchArena;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod lookup;
pub mod parameters;
pub mod persistence;

pub use lookup::LookupParameters;
pub use parameters::Parameters;
pub use persistence::{load_model, save_model};

pub type ParameterHandle = Arc<RwLock<Parameters>>;
pub type LookupParameterHandle = Arc<RwLock<LookupParameters>>;

/// Acquires a read lock, mapping poisoning to `LockError`.
pub fn read_lock<T>(lock: &Arc<RwLock<T>>) -> Result<RwLockReadGuard<'_, T>, NeuroGraphError> {
    lock.read().map_err(|e| NeuroGraphError::LockError {
        lock_type: "read".to_string(),
        reason: e.to_string(),
    })
}

/// Acquires a write lock, mapping poisoning to `LockError`.
pub fn write_lock<T>(lock: &Arc<RwLock<T>>) -> Result<RwLockWriteGuard<'_, T>, NeuroGraphError> {
    lock.write().map_err(|e| NeuroGraphError::LockError {
        lock_type: "write".to_string(),
        reason: e.to_string(),
    })
}

/// Either kind of parameter, in creation order.
#[derive(Debug, Clone)]
pub enum ParameterRef {
    Dense(ParameterHandle),
    Lookup(LookupParameterHandle),
}

/// Owns every trainable parameter.
///
/// Parameters live as long as the model; handles returned by
/// [`Model::add_parameters`] and [`Model::add_lookup_parameters`] stay valid
/// after the model is dropped but are no longer trained.
#[derive(Debug)]
pub struct Model {
    all_params: Vec<ParameterRef>,
    params: Vec<ParameterHandle>,
    lookup_params: Vec<LookupParameterHandle>,
    rng: StdRng,
}

impl Default for Model {
    fn default() -> Self {
        Model::new()
    }
}

impl Model {
    /// Creates an empty model with an entropy-seeded initializer.
    pub fn new() -> Self {
        Model::from_rng(StdRng::from_entropy())
    }

    /// Creates an empty model whose initialization is reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Model::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Model {
            all_params: Vec::new(),
            params: Vec::new(),
            lookup_params: Vec::new(),
            rng,
        }
    }

    /// Adds a dense parameter and returns a shared handle to it.
    ///
    /// # Arguments
    /// * `dim` - Shape of the parameter.
    /// * `scale` - Values are drawn uniformly from `[-|scale|, |scale|]`. A scale
    ///   of 0 selects the Glorot scale `sqrt(6 / sum(dims))`.
    /// * `name` - Used in logs and error messages.
    pub fn add_parameters(&mut self, dim: &Dim, scale: f32, name: &str) -> ParameterHandle {
        let p = Arc::new(RwLock::new(Parameters::new(dim, scale, name, &mut self.rng)));
        debug!("Model: added parameters '{}' {}", name, dim);
        self.all_params.push(ParameterRef::Dense(Arc::clone(&p)));
        self.params.push(Arc::clone(&p));
        p
    }

    /// Adds a table of `rows` independently initialized rows of shape `dim`.
    ///
    /// Rows are initialized like [`Model::add_parameters`], and only rows
    /// touched by a lookup receive gradients and updates.
    pub fn add_lookup_parameters(
        &mut self,
        rows: usize,
        dim: &Dim,
        scale: f32,
        name: &str,
    ) -> LookupParameterHandle {
        let p = Arc::new(RwLock::new(LookupParameters::new(
            rows,
            dim,
            scale,
            name,
            &mut self.rng,
        )));
        debug!("Model: added lookup parameters '{}' {} x {}", name, rows, dim);
        self.all_params.push(ParameterRef::Lookup(Arc::clone(&p)));
        self.lookup_params.push(Arc::clone(&p));
        p
    }

    /// Every parameter in creation order, the order used by persistence.
    pub fn all_parameters_list(&self) -> &[ParameterRef] {
        &self.all_params
    }

    pub fn parameters_list(&self) -> &[ParameterHandle] {
        &self.params
    }

    pub fn lookup_parameters_list(&self) -> &[LookupParameterHandle] {
        &self.lookup_params
    }

    /// Total number of scalar values across all parameters.
    pub fn parameter_count(&self) -> Result<usize, NeuroGraphError> {
        let mut n = 0;
        for p in &self.params {
            n += read_lock(p)?.size();
        }
        for p in &self.lookup_params {
            n += read_lock(p)?.size();
        }
        Ok(n)
    }

    /// Global L2 norm of all dense gradients and touched lookup rows.
    ///
    /// # Returns
    /// `sqrt(sum of squared gradient components)`, 0 for a model with no
    /// gradients to report.
    ///
    /// # Errors
    /// `ResourceExhausted` when the process-wide scratch arena cannot hold one
    /// value per parameter and touched row; `LockError` on a poisoned lock.
    pub fn gradient_l2_norm(&self) -> Result<f32, NeuroGraphError> {
        self.gradient_l2_norm_with(&ScratchArena::global())
    }

    /// [`Model::gradient_l2_norm`] using the given arena for the per-item norms.
    pub fn gradient_l2_norm_with(&self, arena: &ScratchArena) -> Result<f32, NeuroGraphError> {
        let mut items = self.params.len();
        for p in &self.lookup_params {
            items += read_lock(p)?.touched_count();
        }
        if items == 0 {
            return Ok(0.0);
        }
        let mut buffer = arena.allocate(items)?;
        let filled = self.fill_squared_norms(buffer.as_mut_slice());
        let total: f32 = buffer.as_slice().iter().sum();
        arena.release(buffer)?;
        filled?;
        Ok(total.sqrt())
    }

    fn fill_squared_norms(&self, out: &mut [f32]) -> Result<(), NeuroGraphError> {
        let mut k = 0;
        for p in &self.params {
            out[k] = read_lock(p)?.g_squared_l2norm();
            k += 1;
        }
        for p in &self.lookup_params {
            let lp = read_lock(p)?;
            for n in lp.row_g_squared_l2norms() {
                if k == out.len() {
                    // rows touched since the buffer was sized
                    return Err(NeuroGraphError::ResourceExhausted {
                        requested: k + 1,
                        available: out.len(),
                    });
                }
                out[k] = n;
                k += 1;
            }
        }
        Ok(())
    }

    /// Clamps every gradient component to `[-threshold, threshold]`.
    ///
    /// # Returns
    /// `true` if any component was clipped.
    ///
    /// # Errors
    /// `LockError` on a poisoned lock.
    pub fn simple_gradient_clipping(&self, threshold: f32) -> Result<bool, NeuroGraphError> {
        let mut clipped = false;
        for p in &self.params {
            clipped |= write_lock(p)?.g_simple_clipping(threshold);
        }
        for p in &self.lookup_params {
            clipped |= write_lock(p)?.g_simple_clipping(threshold);
        }
        Ok(clipped)
    }

    /// Multiplies every gradient by `factor`.
    pub fn scale_gradients(&self, factor: f32) -> Result<(), NeuroGraphError> {
        for p in &self.params {
            write_lock(p)?.scale_gradient(factor);
        }
        for p in &self.lookup_params {
            write_lock(p)?.scale_gradient(factor);
        }
        Ok(())
    }

    /// Multiplies every parameter value by `a`.
    pub fn scale_parameters(&self, a: f32) -> Result<(), NeuroGraphError> {
        for p in &self.params {
            write_lock(p)?.scale_parameters(a);
        }
        for p in &self.lookup_params {
            write_lock(p)?.scale_parameters(a);
        }
        Ok(())
    }

    /// Zeroes dense gradients and forgets all touched lookup rows.
    pub fn reset_gradient(&self) -> Result<(), NeuroGraphError> {
        for p in &self.params {
            write_lock(p)?.clear();
        }
        for p in &self.lookup_params {
            write_lock(p)?.clear();
        }
        Ok(())
    }

    /// Rescales every value tensor (each lookup row separately) whose L2 norm
    /// exceeds `radius`. Returns the number of tensors rescaled.
    pub fn project_weights(&self, radius: f32) -> Result<usize, NeuroGraphError> {
        let mut projected = 0;
        for p in &self.params {
            if write_lock(p)?.project(radius) {
                projected += 1;
            }
        }
        for p in &self.lookup_params {
            projected += write_lock(p)?.project(radius);
        }
        if projected > 0 {
            debug!("Model: projected {} tensors onto radius {}", projected, radius);
        }
        Ok(projected)
    }

    /// Copies all values from a model with identical structure.
    ///
    /// # Errors
    /// `StructuralLoadMismatch` when the parameter counts or shapes differ. No
    /// value is copied in that case.
    pub fn copy_from(&self, other: &Model) -> Result<(), NeuroGraphError> {
        persistence::check_same_structure(self, other)?;
        for (dst, src) in self.params.iter().zip(&other.params) {
            if Arc::ptr_eq(dst, src) {
                continue;
            }
            let src = read_lock(src)?;
            write_lock(dst)?.copy_from(&src)?;
        }
        for (dst, src) in self.lookup_params.iter().zip(&other.lookup_params) {
            if Arc::ptr_eq(dst, src) {
                continue;
            }
            let src = read_lock(src)?;
            write_lock(dst)?.copy_from(&src)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "model_test.rs"]
mod tests;
