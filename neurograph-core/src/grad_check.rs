//! Finite-difference verification of the gradients a model receives from
//! [`ComputationGraph::backward`].

use crate::error::NeuroGraphError;
use crate::graph::{ComputationGraph, Expression};
use crate::model::{read_lock, write_lock, Model, ParameterRef};
use log::debug;
use thiserror::Error;

/// Error type specifically for gradient checking failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradCheckError {
    #[error("Gradient check failed for parameter {param_index} ({name}), element {element_index}: analytical grad {analytical_grad:?} != numerical grad {numerical_grad:?}. Difference: {difference:?}")]
    GradientMismatch {
        param_index: usize,
        name: String,
        element_index: usize,
        analytical_grad: f64,
        numerical_grad: f64,
        difference: f64,
    },
    #[error("Loss construction or forward pass failed during gradient check: {0}")]
    ForwardPassError(NeuroGraphError),
    #[error("Backward pass failed during gradient check: {0}")]
    BackwardPassError(NeuroGraphError),
    #[error("Numerical gradient is NaN or infinite for parameter {param_index}, element {element_index}. Loss+: {loss_plus:?}, Loss-: {loss_minus:?}")]
    NumericalGradNaNOrInfinite {
        param_index: usize,
        element_index: usize,
        loss_plus: f64,
        loss_minus: f64,
    },
    #[error("Loss must hold a single value, got {0} values")]
    NonScalarLoss(usize),
    #[error("Tensor error during gradient check: {0}")]
    TensorError(NeuroGraphError),
}

impl From<NeuroGraphError> for GradCheckError {
    fn from(err: NeuroGraphError) -> Self {
        GradCheckError::TensorError(err)
    }
}

/// One perturbable scalar: a dense parameter element or an element of a
/// lookup row.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Dense { element: usize },
    Row { row: usize, element: usize },
}

fn evaluate_loss<F>(build_loss: &F) -> Result<f64, GradCheckError>
where
    F: Fn(&ComputationGraph) -> Result<Expression, NeuroGraphError>,
{
    let cg = ComputationGraph::with_seed(0);
    let loss = build_loss(&cg).map_err(GradCheckError::ForwardPassError)?;
    let value = loss.value().map_err(GradCheckError::ForwardPassError)?;
    if value.len() != 1 {
        return Err(GradCheckError::NonScalarLoss(value.len()));
    }
    Ok(value.values()[0] as f64)
}

fn read_slot(param: &ParameterRef, slot: Slot) -> Result<f32, NeuroGraphError> {
    match (param, slot) {
        (ParameterRef::Dense(p), Slot::Dense { element }) => Ok(read_lock(p)?.values().values()[element]),
        (ParameterRef::Lookup(p), Slot::Row { row, element }) => Ok(read_lock(p)?.row(row)?.values()[element]),
        _ => Err(NeuroGraphError::NotSupported("slot does not match parameter kind".to_string())),
    }
}

fn write_slot(param: &ParameterRef, slot: Slot, value: f32) -> Result<(), NeuroGraphError> {
    match (param, slot) {
        (ParameterRef::Dense(p), Slot::Dense { element }) => {
            write_lock(p)?.values_mut().values_mut()[element] = value;
            Ok(())
        }
        (ParameterRef::Lookup(p), Slot::Row { row, element }) => {
            let mut lp = write_lock(p)?;
            let mut values = lp.row(row)?.values().to_vec();
            values[element] = value;
            lp.initialize_row(row, &values)
        }
        _ => Err(NeuroGraphError::NotSupported("slot does not match parameter kind".to_string())),
    }
}

/// Analytical gradient of every slot of `param`. Lookup tables only contribute
/// the rows that received a gradient.
fn analytical_slots(param: &ParameterRef) -> Result<Vec<(Slot, f64)>, NeuroGraphError> {
    let mut slots = Vec::new();
    match param {
        ParameterRef::Dense(p) => {
            let p = read_lock(p)?;
            for (element, &g) in p.grad().values().iter().enumerate() {
                slots.push((Slot::Dense { element }, g as f64));
            }
        }
        ParameterRef::Lookup(p) => {
            let lp = read_lock(p)?;
            for row in lp.touched_rows() {
                if let Some(g) = lp.grad(row) {
                    for (element, &v) in g.values().iter().enumerate() {
                        slots.push((Slot::Row { row, element }, v as f64));
                    }
                }
            }
        }
    }
    Ok(slots)
}

/// Checks analytical parameter gradients against centered finite differences.
///
/// `build_loss` is called on a fresh graph for every evaluation and must
/// return a single-valued expression that depends on `model`'s parameters
/// deterministically. Gradients are reset before and after the check; values
/// are restored after every perturbation.
pub fn check_grad<F>(
    model: &Model,
    build_loss: F,
    epsilon: f64,
    tolerance: f64,
) -> Result<(), GradCheckError>
where
    F: Fn(&ComputationGraph) -> Result<Expression, NeuroGraphError>,
{
    model.reset_gradient()?;
    {
        let cg = ComputationGraph::with_seed(0);
        let loss = build_loss(&cg).map_err(GradCheckError::ForwardPassError)?;
        loss.value().map_err(GradCheckError::ForwardPassError)?;
        loss.backward().map_err(GradCheckError::BackwardPassError)?;
    }

    let mut checked = 0;
    for (param_index, param) in model.all_parameters_list().iter().enumerate() {
        let name = match param {
            ParameterRef::Dense(p) => read_lock(p)?.name().to_string(),
            ParameterRef::Lookup(p) => read_lock(p)?.name().to_string(),
        };
        for (element_index, (slot, analytical_grad)) in analytical_slots(param)?.into_iter().enumerate() {
            let original = read_slot(param, slot)?;

            write_slot(param, slot, (original as f64 + epsilon) as f32)?;
            let loss_plus = evaluate_loss(&build_loss);
            write_slot(param, slot, (original as f64 - epsilon) as f32)?;
            let loss_minus = evaluate_loss(&build_loss);
            write_slot(param, slot, original)?;
            let (loss_plus, loss_minus) = (loss_plus?, loss_minus?);

            let numerical_grad = (loss_plus - loss_minus) / (2.0 * epsilon);
            if !numerical_grad.is_finite() {
                return Err(GradCheckError::NumericalGradNaNOrInfinite {
                    param_index,
                    element_index,
                    loss_plus,
                    loss_minus,
                });
            }
            let difference = (analytical_grad - numerical_grad).abs();
            if difference > tolerance && difference / (analytical_grad.abs() + epsilon) > tolerance {
                return Err(GradCheckError::GradientMismatch {
                    param_index,
                    name,
                    element_index,
                    analytical_grad,
                    numerical_grad,
                    difference,
                });
            }
            checked += 1;
        }
    }
    model.reset_gradient()?;
    debug!("check_grad: {} gradient elements agree", checked);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dim::Dim;
    use crate::expr;

    #[test]
    fn test_check_grad_accepts_correct_gradients() {
        let mut model = Model::with_seed(3);
        let w = model.add_parameters(&Dim::new(&[2, 3]), 0.5, "w");
        let e = model.add_lookup_parameters(5, &Dim::new(&[3]), 0.5, "e");
        let result = check_grad(
            &model,
            |cg| {
                let x = expr::lookup(cg, &e, 2)?;
                let h = expr::tanh(&expr::matmul(&expr::parameter(cg, &w)?, &x)?)?;
                expr::sum_elements(&expr::square(&h)?)
            },
            1e-3,
            1e-2,
        );
        assert_eq!(result, Ok(()));
        assert_eq!(model.gradient_l2_norm().unwrap(), 0.0);
    }

    #[test]
    fn test_check_grad_reports_forward_failures() {
        let mut model = Model::with_seed(3);
        let w = model.add_parameters(&Dim::new(&[2]), 0.5, "w");
        let result = check_grad(
            &model,
            |cg| {
                let p = expr::parameter(cg, &w)?;
                let x = expr::input(cg, &Dim::new(&[3]), vec![1.0, 2.0, 3.0])?;
                expr::dot_product(&p, &x)
            },
            1e-3,
            1e-2,
        );
        assert!(matches!(result, Err(GradCheckError::ForwardPassError(_))));
    }
}
