mod common;

use approx::assert_relative_eq;
use neurograph_core::{read_lock, write_lock, Dim, Model, NeuroGraphError, Tensor};
use neurograph_optim::{ClippingType, SgdTrainer, Trainer, TrainerBase, TrainerConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A model with two dense parameters and a lookup table, carrying random
/// gradients of roughly unit scale per element.
fn model_with_random_gradients(rng: &mut StdRng) -> Result<Model, NeuroGraphError> {
    let mut model = Model::with_seed(rng.gen());
    let dims = [Dim::new(&[4, 3]), Dim::new(&[4])];
    for (i, dim) in dims.iter().enumerate() {
        let p = model.add_parameters(dim, 0.1, &format!("p{}", i));
        let g: Vec<f32> = (0..dim.size()).map(|_| rng.gen_range(-1.0..1.0)).collect();
        write_lock(&p)?.accumulate_grad(&Tensor::from_vec(g, dim)?)?;
    }
    let table = model.add_lookup_parameters(50, &Dim::new(&[5]), 0.1, "table");
    for row in [1, 17, 33] {
        let g: Vec<f32> = (0..5).map(|_| rng.gen_range(-1.0..1.0)).collect();
        write_lock(&table)?.accumulate_grad(row, &g)?;
    }
    Ok(model)
}

fn global_config(clip_threshold: f32) -> TrainerConfig {
    TrainerConfig {
        learning_rate: 1.0,
        clip_threshold,
        clipping_type: ClippingType::GlobalNorm,
        ..TrainerConfig::default()
    }
}

#[test]
fn test_clipped_norm_equals_bound() -> Result<(), NeuroGraphError> {
    common::init_logger();
    let mut rng = StdRng::seed_from_u64(99);
    for &(threshold, batch_size) in &[(0.1f32, 1.0f32), (0.5, 4.0), (1.0, 2.0)] {
        let model = model_with_random_gradients(&mut rng)?;
        let norm = model.gradient_l2_norm()?;
        assert!(norm > threshold * batch_size);

        let mut base = TrainerBase::new(&global_config(threshold))?;
        let gscale = base.clip_gradients(&model, batch_size)?;
        assert_relative_eq!(gscale * norm, threshold * batch_size, max_relative = 1e-5);
        assert_eq!(base.clips, 1);
    }
    Ok(())
}

#[test]
fn test_clipping_below_bound_is_a_no_op() -> Result<(), NeuroGraphError> {
    let mut rng = StdRng::seed_from_u64(7);
    let model = model_with_random_gradients(&mut rng)?;
    let norm = model.gradient_l2_norm()?;
    let mut base = TrainerBase::new(&global_config(norm))?;
    assert_eq!(base.clip_gradients(&model, 1.0)?, 1.0);
    assert_eq!(base.clips, 0);
    Ok(())
}

#[test]
fn test_clipped_step_has_threshold_length() -> Result<(), NeuroGraphError> {
    common::init_logger();
    let mut rng = StdRng::seed_from_u64(3);
    let model = model_with_random_gradients(&mut rng)?;
    let (threshold, batch_size) = (0.25f32, 2.0f32);

    let snapshot = |model: &Model| -> Result<Vec<f32>, NeuroGraphError> {
        let mut values = Vec::new();
        for p in model.parameters_list() {
            values.extend_from_slice(read_lock(p)?.values().values());
        }
        for lp in model.lookup_parameters_list() {
            let lp = read_lock(lp)?;
            for row in [1, 17, 33] {
                values.extend_from_slice(lp.row(row)?.values());
            }
        }
        Ok(values)
    };

    let before = snapshot(&model)?;
    let mut trainer = SgdTrainer::new(global_config(threshold))?;
    trainer.update(&model, batch_size, 1.0)?;
    let after = snapshot(&model)?;

    // every dense parameter and touched row moved by the same shared scale
    let step: f32 = before
        .iter()
        .zip(&after)
        .map(|(b, a)| (a - b) * (a - b))
        .sum::<f32>()
        .sqrt();
    assert_relative_eq!(step, threshold, max_relative = 1e-4);
    assert_eq!(trainer.status().clips, 1);
    Ok(())
}

#[test]
fn test_simple_clipping_bounds_each_component() -> Result<(), NeuroGraphError> {
    let mut rng = StdRng::seed_from_u64(11);
    let model = model_with_random_gradients(&mut rng)?;
    let mut base = TrainerBase::new(&TrainerConfig {
        clip_threshold: 0.1,
        clipping_type: ClippingType::Simple,
        ..TrainerConfig::default()
    })?;
    assert_eq!(base.clip_gradients(&model, 2.0)?, 1.0);
    for p in model.parameters_list() {
        assert!(read_lock(p)?.grad().values().iter().all(|g| g.abs() <= 0.2));
    }
    let lp = read_lock(&model.lookup_parameters_list()[0])?;
    for row in lp.touched_rows() {
        assert!(lp.grad(row).unwrap().values().iter().all(|g| g.abs() <= 0.2));
    }
    Ok(())
}
