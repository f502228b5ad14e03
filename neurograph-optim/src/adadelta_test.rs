use super::*;
use approx::assert_relative_eq;
use neurograph_core::{read_lock, write_lock, Dim, ParameterHandle};

fn mock_param(model: &mut Model, value: f32) -> ParameterHandle {
    let p = model.add_parameters(&Dim::new(&[1]), 0.1, "mock_param_adadelta");
    write_lock(&p).unwrap().values_mut().fill(value);
    p
}

fn set_grad(p: &ParameterHandle, g: f32) {
    write_lock(p).unwrap().accumulate_grad(&Tensor::scalar(g)).unwrap();
}

fn no_clipping(learning_rate: f32) -> TrainerConfig {
    TrainerConfig {
        learning_rate,
        clipping_enabled: false,
        ..TrainerConfig::default()
    }
}

#[test]
fn test_adadelta_creation() {
    assert!(AdadeltaTrainer::new(TrainerConfig::default(), DEFAULT_EPSILON, DEFAULT_RHO).is_ok());
    assert!(matches!(
        AdadeltaTrainer::new(TrainerConfig::default(), DEFAULT_EPSILON, 1.5),
        Err(NeuroGraphError::ConfigurationError(_))
    ));
    assert!(matches!(
        AdadeltaTrainer::new(TrainerConfig::default(), -1e-6, DEFAULT_RHO),
        Err(NeuroGraphError::ConfigurationError(_))
    ));
}

#[test]
fn test_adadelta_two_steps() -> Result<(), NeuroGraphError> {
    let (eps, rho) = (DEFAULT_EPSILON, DEFAULT_RHO);
    let mut model = Model::with_seed(0);
    let p = mock_param(&mut model, 1.0);
    let mut trainer = AdadeltaTrainer::new(no_clipping(1.0), eps, rho)?;

    let mut expected = 1.0f32;
    let (mut hg, mut hd) = (0.0f32, 0.0f32);
    for _ in 0..2 {
        set_grad(&p, 1.0);
        trainer.update(&model, 1.0, 1.0)?;
        hg = rho * hg + (1.0 - rho);
        let delta = -(hd + eps).sqrt() / (hg + eps).sqrt();
        hd = rho * hd + (1.0 - rho) * delta * delta;
        expected += delta;
        assert_relative_eq!(read_lock(&p)?.values().values()[0], expected, epsilon = 1e-6);
    }
    assert!(expected < 1.0);
    Ok(())
}

#[test]
fn test_adadelta_ignores_learning_rate() -> Result<(), NeuroGraphError> {
    let run = |learning_rate: f32| -> Result<f32, NeuroGraphError> {
        let mut model = Model::with_seed(0);
        let p = mock_param(&mut model, 1.0);
        let mut trainer = AdadeltaTrainer::new(no_clipping(learning_rate), DEFAULT_EPSILON, DEFAULT_RHO)?;
        set_grad(&p, 0.3);
        trainer.update(&model, 1.0, 1.0)?;
        let value = read_lock(&p)?.values().values()[0];
        Ok(value)
    };
    assert_eq!(run(0.1)?, run(10.0)?);
    Ok(())
}

#[test]
fn test_adadelta_allocates_two_buffers_per_row() -> Result<(), NeuroGraphError> {
    let mut model = Model::with_seed(0);
    let table = model.add_lookup_parameters(8, &Dim::new(&[3]), 0.5, "table");
    let mut trainer = AdadeltaTrainer::new(no_clipping(1.0), DEFAULT_EPSILON, DEFAULT_RHO)?;
    write_lock(&table)?.accumulate_grad(5, &[1.0, 2.0, 3.0])?;
    trainer.update(&model, 1.0, 1.0)?;
    assert_eq!(trainer.shadow().allocated_rows(0), 1);
    assert_eq!(read_lock(&table)?.touched_count(), 0);
    Ok(())
}
