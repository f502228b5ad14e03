use neurograph_core::{expr, ComputationGraph, Dim, Expression, Model, NeuroGraphError, ParameterHandle};
use neurograph_optim::Trainer;

// Shared by several test crates; not every helper is used by each of them.
#[allow(dead_code)]
pub fn init_logger() {
    // Only the first call has an effect.
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `½‖θ − θ*‖²` on a fresh graph.
#[allow(dead_code)]
pub fn quadratic_loss(
    cg: &ComputationGraph,
    theta: &ParameterHandle,
    target: &[f32],
) -> Result<Expression, NeuroGraphError> {
    let theta = expr::parameter(cg, theta)?;
    let target = expr::input(cg, &Dim::new(&[target.len()]), target.to_vec())?;
    expr::mul_scalar(&expr::squared_distance(&theta, &target)?, 0.5)
}

/// Runs `steps` full-batch updates on the quadratic loss and returns the loss
/// seen before each update, followed by the final loss.
#[allow(dead_code)]
pub fn minimize_quadratic(
    trainer: &mut dyn Trainer,
    model: &Model,
    theta: &ParameterHandle,
    target: &[f32],
    steps: usize,
) -> Result<Vec<f32>, NeuroGraphError> {
    let mut losses = Vec::with_capacity(steps + 1);
    for _ in 0..steps {
        let cg = ComputationGraph::with_seed(0);
        let loss = quadratic_loss(&cg, theta, target)?;
        losses.push(loss.scalar_value()?);
        loss.backward()?;
        trainer.update(model, 1.0, 1.0)?;
    }
    let cg = ComputationGraph::with_seed(0);
    losses.push(quadratic_loss(&cg, theta, target)?.scalar_value()?);
    Ok(losses)
}
