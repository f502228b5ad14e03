use super::*;
use crate::model::{read_lock, Model};
use approx::assert_relative_eq;

fn vector(cg: &ComputationGraph, values: &[f32]) -> Expression {
    input(cg, &Dim::new(&[values.len()]), values.to_vec()).unwrap()
}

#[test]
fn test_scalar_operators() {
    let cg = ComputationGraph::with_seed(0);
    let x = vector(&cg, &[1.0, -2.0]);
    let y = vector(&cg, &[0.5, 4.0]);
    assert_eq!(sub(&x, &y).unwrap().value().unwrap().values(), &[0.5, -6.0]);
    assert_eq!(neg(&x).unwrap().value().unwrap().values(), &[-1.0, 2.0]);
    assert_eq!(add_scalar(&x, 1.0).unwrap().value().unwrap().values(), &[2.0, -1.0]);
    assert_eq!(scalar_minus(1.0, &x).unwrap().value().unwrap().values(), &[0.0, 3.0]);
    assert_eq!(mul_scalar(&x, 3.0).unwrap().value().unwrap().values(), &[3.0, -6.0]);
    assert_eq!(div_scalar(&y, 2.0).unwrap().value().unwrap().values(), &[0.25, 2.0]);
    assert_eq!(cdiv(&x, &y).unwrap().value().unwrap().values(), &[2.0, -0.5]);
    assert_eq!(max(&x, &y).unwrap().value().unwrap().values(), &[1.0, 4.0]);
    assert_eq!(min(&x, &y).unwrap().value().unwrap().values(), &[0.5, -2.0]);
    assert_eq!(sum(&[x.clone(), y.clone(), x]).unwrap().value().unwrap().values(), &[2.5, 0.0]);
}

#[test]
fn test_negative_log_likelihood_of_softmax() {
    let cg = ComputationGraph::with_seed(0);
    let scores = vector(&cg, &[1.0, 2.0, 3.0]);
    let nll = neg(&pick(&log_softmax(&scores).unwrap(), 2).unwrap()).unwrap();
    let z = (1.0f32.exp() + 2.0f32.exp() + 3.0f32.exp()).ln();
    assert_relative_eq!(nll.scalar_value().unwrap(), z - 3.0, epsilon = 1e-5);

    let probs = softmax(&scores).unwrap();
    let p = pick(&probs, 2).unwrap().scalar_value().unwrap();
    assert_relative_eq!(-p.ln(), z - 3.0, epsilon = 1e-5);
}

#[test]
fn test_mlp_trains_toward_target() {
    let mut model = Model::with_seed(9);
    let w = model.add_parameters(&Dim::new(&[3, 2]), 0.0, "w");
    let b = model.add_parameters(&Dim::new(&[3]), 0.0, "b");
    let v = model.add_parameters(&Dim::new(&[1, 3]), 0.0, "v");

    let loss_at = |model: &Model| {
        model.reset_gradient().unwrap();
        let cg = ComputationGraph::with_seed(0);
        let x = input(&cg, &Dim::new(&[2]), vec![1.0, -1.0]).unwrap();
        let h = tanh(
            &affine_transform(&[parameter(&cg, &b).unwrap(), parameter(&cg, &w).unwrap(), x]).unwrap(),
        )
        .unwrap();
        let y = matmul(&parameter(&cg, &v).unwrap(), &h).unwrap();
        let target = input_scalar(&cg, 0.5).unwrap();
        let loss = squared_distance(&y, &target).unwrap();
        let value = loss.scalar_value().unwrap();
        loss.backward().unwrap();
        value
    };

    let first = loss_at(&model);
    for _ in 0..20 {
        loss_at(&model);
        for p in model.parameters_list() {
            let mut p = crate::model::write_lock(p).unwrap();
            let (values, grad) = p.values_and_grad_mut();
            values.add_scaled(grad, -0.1).unwrap();
        }
    }
    assert!(loss_at(&model) < first);
}

#[test]
fn test_batched_pick_and_hinge() {
    let cg = ComputationGraph::with_seed(0);
    let x = input(&cg, &Dim::with_batch(&[3], 2), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    assert_eq!(pick_batch(&x, &[0, 2]).unwrap().value().unwrap().values(), &[1.0, 6.0]);
    assert_eq!(pick_range(&x, 1, 3).unwrap().dim().unwrap(), Dim::with_batch(&[2], 2));
    // batch 0 targets row 2: both margins satisfied; batch 1 targets row 0
    let h = hinge_batch(&x, &[2, 0], 1.0).unwrap().value().unwrap();
    assert_eq!(h.values(), &[0.0, 2.0 + 3.0]);
    assert!(matches!(
        pick_batch(&x, &[0, 1, 2]),
        Err(NeuroGraphError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_shape_builders() {
    let cg = ComputationGraph::with_seed(0);
    let a = vector(&cg, &[1.0, 2.0]);
    let b = vector(&cg, &[3.0, 4.0]);
    let m = concatenate_cols(&[a.clone(), b.clone()]).unwrap();
    assert_eq!(m.dim().unwrap(), Dim::new(&[2, 2]));
    assert_eq!(transpose(&m).unwrap().value().unwrap().values(), &[1.0, 3.0, 2.0, 4.0]);
    assert_eq!(sum_cols(&m).unwrap().value().unwrap().values(), &[4.0, 6.0]);
    assert_eq!(concatenate(&[a.clone(), b.clone()]).unwrap().dim().unwrap(), Dim::new(&[4]));
    assert_eq!(reshape(&m, &Dim::new(&[4])).unwrap().value().unwrap().values(), &[1.0, 2.0, 3.0, 4.0]);
    assert_eq!(column_slices(&m, 1, 2).unwrap().value().unwrap().values(), &[3.0, 4.0]);
    assert_eq!(average(&[a.clone(), b.clone()]).unwrap().value().unwrap().values(), &[2.0, 3.0]);
    assert_eq!(max_of(&[a.clone(), b.clone()]).unwrap().value().unwrap().values(), &[3.0, 4.0]);
    assert_eq!(colwise_add(&m, &a).unwrap().value().unwrap().values(), &[2.0, 4.0, 4.0, 6.0]);
    assert!(matches!(concatenate(&[]), Err(NeuroGraphError::NotSupported(_))));
}

#[test]
fn test_lookup_builders() {
    let mut model = Model::with_seed(4);
    let table = model.add_lookup_parameters(4, &Dim::new(&[2]), 0.5, "table");
    let cg = ComputationGraph::with_seed(0);
    let row = lookup(&cg, &table, 3).unwrap();
    assert_eq!(
        row.value().unwrap().values(),
        read_lock(&table).unwrap().row(3).unwrap().values()
    );
    assert_eq!(
        lookup_batch(&cg, &table, &[0, 1, 1]).unwrap().dim().unwrap(),
        Dim::with_batch(&[2], 3)
    );
    assert!(matches!(
        lookup(&cg, &table, 4),
        Err(NeuroGraphError::IndexOutOfBounds { index: 4, len: 4 })
    ));
    assert!(matches!(
        const_lookup_batch(&cg, &table, &[]),
        Err(NeuroGraphError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_stochastic_builders_validate_parameters() {
    let cg = ComputationGraph::with_seed(0);
    let x = vector(&cg, &[1.0, 2.0]);
    assert!(matches!(dropout(&x, 1.5), Err(NeuroGraphError::ConfigurationError(_))));
    assert!(matches!(block_dropout(&x, -0.5), Err(NeuroGraphError::ConfigurationError(_))));
    assert!(matches!(noise(&x, f32::NAN), Err(NeuroGraphError::ConfigurationError(_))));

    // the graph seed makes stochastic nodes reproducible
    let run = || {
        let cg = ComputationGraph::with_seed(42);
        let x = input(&cg, &Dim::new(&[8]), vec![1.0; 8]).unwrap();
        noise(&dropout(&x, 0.5).unwrap(), 0.1).unwrap().value().unwrap()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_conv_builders() {
    let cg = ComputationGraph::with_seed(0);
    let x = input(&cg, &Dim::new(&[1, 4]), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let f = input(&cg, &Dim::new(&[1, 2]), vec![1.0, -1.0]).unwrap();
    assert_eq!(conv1d_narrow(&x, &f).unwrap().value().unwrap().values(), &[-1.0, -1.0, -1.0]);
    let wide = conv1d_wide(&x, &f).unwrap().value().unwrap();
    assert_eq!(wide.values(), &[-1.0, -1.0, -1.0, -1.0, 4.0]);
    assert_eq!(kmax_pooling(&x, 2).unwrap().value().unwrap().values(), &[3.0, 4.0]);
}
