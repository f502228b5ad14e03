//! Per-parameter optimizer state ("shadow" tensors) such as velocities and
//! squared-gradient averages.
//!
//! Dense parameters get their slots when the store is allocated, on a
//! trainer's first update. Lookup rows get theirs the first time they are
//! touched, so untouched rows of a large table never cost any memory.

use log::{debug, warn};
use neurograph_core::{read_lock, Dim, Model, NeuroGraphError, Tensor};
use std::collections::BTreeMap;

/// Identifies the tensor being updated: a dense parameter by its position in
/// [`Model::parameters_list`], or one row of a lookup table by the table's
/// position in [`Model::lookup_parameters_list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShadowKey {
    Dense(usize),
    Row { table: usize, row: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowState {
    Uninitialized,
    Allocated,
}

/// `buffers` zero-initialized tensors per key.
#[derive(Debug)]
pub struct ShadowStore {
    owner: &'static str,
    buffers: usize,
    state: ShadowState,
    dense: Vec<Vec<Tensor>>,
    rows: Vec<BTreeMap<usize, Vec<Tensor>>>,
    row_dims: Vec<Dim>,
}

impl ShadowStore {
    pub fn new(owner: &'static str, buffers: usize) -> Self {
        ShadowStore {
            owner,
            buffers,
            state: ShadowState::Uninitialized,
            dense: Vec::new(),
            rows: Vec::new(),
            row_dims: Vec::new(),
        }
    }

    pub fn state(&self) -> ShadowState {
        self.state
    }

    /// Allocates dense slots for every parameter of `model` on the first
    /// call. Later calls only extend the store if the model has grown.
    pub fn allocate(&mut self, model: &Model) -> Result<(), NeuroGraphError> {
        let dense_known = self.dense.len();
        let tables_known = self.rows.len();
        let params = model.parameters_list();
        let tables = model.lookup_parameters_list();
        if self.state == ShadowState::Allocated {
            if params.len() == dense_known && tables.len() == tables_known {
                return Ok(());
            }
            warn!(
                "{}: model grew after shadow allocation ({} -> {} parameters, {} -> {} lookup tables)",
                self.owner,
                dense_known,
                params.len(),
                tables_known,
                tables.len()
            );
        }

        for p in params.iter().skip(dense_known) {
            let dim = read_lock(p)?.dim().clone();
            let slot = self.zeros(&dim);
            self.dense.push(slot);
        }
        for lp in tables.iter().skip(tables_known) {
            self.row_dims.push(read_lock(lp)?.dim().clone());
            self.rows.push(BTreeMap::new());
        }
        if self.state == ShadowState::Uninitialized {
            debug!(
                "{}: allocated {} shadow buffers for {} parameters and {} lookup tables",
                self.owner,
                self.buffers,
                self.dense.len(),
                self.rows.len()
            );
            self.state = ShadowState::Allocated;
        }
        Ok(())
    }

    fn zeros(&self, dim: &Dim) -> Vec<Tensor> {
        (0..self.buffers).map(|_| Tensor::zeros(dim)).collect()
    }

    /// Shadow tensors for `key`. A lookup row's slot is created on first use.
    pub fn slot(&mut self, key: ShadowKey) -> Result<&mut [Tensor], NeuroGraphError> {
        if self.state == ShadowState::Uninitialized {
            return Err(NeuroGraphError::NotSupported(format!(
                "{}: shadow state used before allocation",
                self.owner
            )));
        }
        match key {
            ShadowKey::Dense(i) => {
                let len = self.dense.len();
                self.dense
                    .get_mut(i)
                    .map(Vec::as_mut_slice)
                    .ok_or(NeuroGraphError::IndexOutOfBounds { index: i, len })
            }
            ShadowKey::Row { table, row } => {
                let len = self.rows.len();
                let dim = self
                    .row_dims
                    .get(table)
                    .cloned()
                    .ok_or(NeuroGraphError::IndexOutOfBounds { index: table, len })?;
                let buffers = self.buffers;
                let slot = self.rows[table]
                    .entry(row)
                    .or_insert_with(|| (0..buffers).map(|_| Tensor::zeros(&dim)).collect());
                Ok(slot.as_mut_slice())
            }
        }
    }

    /// Number of lookup rows of `table` that own a slot.
    pub fn allocated_rows(&self, table: usize) -> usize {
        self.rows.get(table).map_or(0, BTreeMap::len)
    }

    pub fn dense_len(&self) -> usize {
        self.dense.len()
    }
}

#[cfg(test)]
#[path = "shadow_test.rs"]
mod tests;
