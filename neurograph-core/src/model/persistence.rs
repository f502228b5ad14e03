//! Binary model snapshots.
//!
//! A snapshot stores the shape and values of every parameter in creation
//! order. Loading never creates parameters: it fills the ones a model already
//! has, after checking that counts and shapes agree.

use super::{read_lock, write_lock, Model};
use crate::error::NeuroGraphError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SavedParameters {
    dims: Vec<usize>,
    bd: usize,
    values: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SavedLookupParameters {
    dims: Vec<usize>,
    bd: usize,
    rows: usize,
    values: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SavedModel {
    num_params: usize,
    num_lookup_params: usize,
    params: Vec<SavedParameters>,
    lookup_params: Vec<SavedLookupParameters>,
}

fn mismatch(what: String, expected: impl ToString, actual: impl ToString) -> NeuroGraphError {
    NeuroGraphError::StructuralLoadMismatch {
        what,
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

impl SavedModel {
    fn capture(model: &Model) -> Result<Self, NeuroGraphError> {
        let mut params = Vec::with_capacity(model.params.len());
        for p in &model.params {
            let p = read_lock(p)?;
            params.push(SavedParameters {
                dims: p.dim().dims().to_vec(),
                bd: p.dim().batch_elems(),
                values: p.values().values().to_vec(),
            });
        }
        let mut lookup_params = Vec::with_capacity(model.lookup_params.len());
        for p in &model.lookup_params {
            let p = read_lock(p)?;
            let mut values = Vec::with_capacity(p.rows());
            for i in 0..p.rows() {
                values.push(p.row(i)?.values().to_vec());
            }
            lookup_params.push(SavedLookupParameters {
                dims: p.dim().dims().to_vec(),
                bd: p.dim().batch_elems(),
                rows: p.rows(),
                values,
            });
        }
        Ok(SavedModel {
            num_params: params.len(),
            num_lookup_params: lookup_params.len(),
            params,
            lookup_params,
        })
    }

    /// Checks every count and shape against `model` without modifying it.
    fn validate_against(&self, model: &Model) -> Result<(), NeuroGraphError> {
        if self.num_params != model.params.len() || self.params.len() != self.num_params {
            return Err(mismatch(
                "parameter count".to_string(),
                model.params.len(),
                self.num_params,
            ));
        }
        if self.num_lookup_params != model.lookup_params.len()
            || self.lookup_params.len() != self.num_lookup_params
        {
            return Err(mismatch(
                "lookup parameter count".to_string(),
                model.lookup_params.len(),
                self.num_lookup_params,
            ));
        }
        for (i, (saved, p)) in self.params.iter().zip(&model.params).enumerate() {
            let p = read_lock(p)?;
            let dim = p.dim();
            if saved.dims != dim.dims() || saved.bd != dim.batch_elems() {
                return Err(mismatch(
                    format!("parameters #{} ({})", i, p.name()),
                    dim,
                    format!("{:?}X{}", saved.dims, saved.bd),
                ));
            }
            if saved.values.len() != dim.size() {
                return Err(mismatch(
                    format!("values of parameters #{}", i),
                    dim.size(),
                    saved.values.len(),
                ));
            }
        }
        for (i, (saved, p)) in self.lookup_params.iter().zip(&model.lookup_params).enumerate() {
            let p = read_lock(p)?;
            let dim = p.dim();
            if saved.dims != dim.dims() || saved.bd != dim.batch_elems() {
                return Err(mismatch(
                    format!("lookup parameters #{} ({})", i, p.name()),
                    dim,
                    format!("{:?}X{}", saved.dims, saved.bd),
                ));
            }
            if saved.rows != p.rows() || saved.values.len() != p.rows() {
                return Err(mismatch(
                    format!("rows of lookup parameters #{}", i),
                    p.rows(),
                    saved.rows,
                ));
            }
            if let Some(bad) = saved.values.iter().position(|row| row.len() != dim.size()) {
                return Err(mismatch(
                    format!("row {} of lookup parameters #{}", bad, i),
                    dim.size(),
                    saved.values[bad].len(),
                ));
            }
        }
        Ok(())
    }

    fn restore_into(self, model: &Model) -> Result<(), NeuroGraphError> {
        for (saved, p) in self.params.into_iter().zip(&model.params) {
            write_lock(p)?.set_values(&saved.values)?;
        }
        for (saved, p) in self.lookup_params.into_iter().zip(&model.lookup_params) {
            let mut p = write_lock(p)?;
            for (i, row) in saved.values.iter().enumerate() {
                p.initialize_row(i, row)?;
            }
        }
        Ok(())
    }
}

/// Checks that two models have the same parameter counts and shapes.
pub(crate) fn check_same_structure(model: &Model, other: &Model) -> Result<(), NeuroGraphError> {
    SavedModel::capture(other)?.validate_against(model)
}

impl Model {
    /// Writes a snapshot of every parameter value.
    pub fn save<W: Write>(&self, writer: W) -> Result<(), NeuroGraphError> {
        let snapshot = SavedModel::capture(self)?;
        bincode::serialize_into(writer, &snapshot)?;
        debug!(
            "Model: saved {} parameters and {} lookup parameters",
            snapshot.num_params, snapshot.num_lookup_params
        );
        Ok(())
    }

    /// Reads a snapshot into this model's existing parameters.
    ///
    /// # Errors
    /// `StructuralLoadMismatch` if the snapshot's counts or shapes differ from
    /// the model's; in that case no value has been modified.
    pub fn load<R: Read>(&self, reader: R) -> Result<(), NeuroGraphError> {
        let snapshot: SavedModel = bincode::deserialize_from(reader)?;
        snapshot.validate_against(self)?;
        debug!(
            "Model: loading {} parameters and {} lookup parameters",
            snapshot.num_params, snapshot.num_lookup_params
        );
        snapshot.restore_into(self)
    }
}

/// Saves `model` to the file at `path`.
pub fn save_model<P: AsRef<Path>>(path: P, model: &Model) -> Result<(), NeuroGraphError> {
    let mut writer = BufWriter::new(File::create(path)?);
    model.save(&mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Loads the file at `path` into `model`.
pub fn load_model<P: AsRef<Path>>(path: P, model: &Model) -> Result<(), NeuroGraphError> {
    let reader = BufReader::new(File::open(path)?);
    model.load(reader)
}
