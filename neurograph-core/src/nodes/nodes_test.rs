use super::*;
use crate::dim::Dim;
use approx::assert_relative_eq;
use rand::SeedableRng;

fn t(dims: &[usize], values: &[f32]) -> Tensor {
    Tensor::from_vec(values.to_vec(), &Dim::new(dims)).unwrap()
}

fn tb(dims: &[usize], bd: usize, values: &[f32]) -> Tensor {
    Tensor::from_vec(values.to_vec(), &Dim::with_batch(dims, bd)).unwrap()
}

/// Runs `node` forward with a freshly seeded generator, so stochastic nodes
/// repeat the same draws on every call.
fn run_forward(node: &mut dyn Node, xs: &[Tensor]) -> Tensor {
    let dims: Vec<&Dim> = xs.iter().map(|x| x.dim()).collect();
    let dim = node.dim_forward(&dims).unwrap();
    let mut fx = Tensor::zeros(&dim);
    let refs: Vec<&Tensor> = xs.iter().collect();
    let mut rng = StdRng::seed_from_u64(11);
    node.forward(&refs, &mut fx, &mut rng).unwrap();
    fx
}

fn weighted_output(node: &mut dyn Node, xs: &[Tensor], w: &Tensor) -> f64 {
    run_forward(node, xs)
        .values()
        .iter()
        .zip(w.values())
        .map(|(&a, &b)| a as f64 * b as f64)
        .sum()
}

/// Compares `backward` with centered differences of `sum(w * f(xs))` for a
/// fixed random `w`, for every argument and element.
fn check_node(node: &mut dyn Node, xs: Vec<Tensor>) {
    let eps = 1e-2f32;
    let fx = run_forward(node, &xs);
    let mut rng = StdRng::seed_from_u64(5);
    let w = Tensor::uniform(fx.dim(), 1.0, &mut rng);

    let analytic: Vec<Tensor> = {
        let refs: Vec<&Tensor> = xs.iter().collect();
        (0..xs.len())
            .map(|i| {
                let mut g = Tensor::zeros(xs[i].dim());
                node.backward(&refs, &fx, &w, i, &mut g).unwrap();
                g
            })
            .collect()
    };

    for i in 0..xs.len() {
        for k in 0..xs[i].len() {
            let mut plus = xs.clone();
            plus[i].values_mut()[k] += eps;
            let mut minus = xs.clone();
            minus[i].values_mut()[k] -= eps;
            let numeric = (weighted_output(node, &plus, &w) - weighted_output(node, &minus, &w))
                / (2.0 * eps as f64);
            let a = analytic[i].values()[k] as f64;
            assert!(
                (a - numeric).abs() <= 1e-2 * (1.0 + numeric.abs()),
                "{}: d/dx{}[{}] analytic {} vs numeric {}",
                node.name(),
                i,
                k,
                a,
                numeric
            );
        }
    }
}

#[test]
fn test_sum_broadcasts_single_batch_argument() {
    let x = tb(&[2], 2, &[1.0, 2.0, 3.0, 4.0]);
    let y = t(&[2], &[10.0, 20.0]);
    let fx = run_forward(&mut Sum, &[x.clone(), y.clone()]);
    assert_eq!(fx.values(), &[11.0, 22.0, 13.0, 24.0]);
    check_node(&mut Sum, vec![x, y]);
}

#[test]
fn test_arithmetic_gradients() {
    let x = t(&[2, 2], &[0.5, -1.0, 2.0, 1.5]);
    let y = t(&[2, 2], &[1.5, 0.7, -0.3, 2.0]);
    check_node(&mut ScalarAffine::new("affine", -2.0, 3.0), vec![x.clone()]);
    check_node(&mut CwiseMultiply, vec![x.clone(), y.clone()]);
    check_node(&mut CwiseQuotient, vec![x.clone(), y.clone()]);
    check_node(&mut BinaryExtremum::max(), vec![x.clone(), y.clone()]);
    check_node(&mut BinaryExtremum::min(), vec![x.clone(), y]);
    check_node(&mut ColwiseAdd, vec![x, t(&[2], &[0.1, -0.2])]);
}

#[test]
fn test_matmul_batched_gradients() {
    let a = tb(&[2, 3], 2, &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, -0.1, -0.2, -0.3, 0.4, 0.5, 0.6]);
    let b = t(&[3, 2], &[1.0, -1.0, 0.5, 0.2, 0.3, -0.7]);
    let fx = run_forward(&mut MatrixMultiply, &[a.clone(), b.clone()]);
    assert_eq!(fx.dim(), &Dim::with_batch(&[2, 2], 2));
    // column 0 of batch 0: [0.1 0.3 0.5; 0.2 0.4 0.6] * [1, -1, 0.5]
    assert_relative_eq!(fx.at(0, 0, 0), 0.1 - 0.3 + 0.25, epsilon = 1e-6);
    check_node(&mut MatrixMultiply, vec![a, b]);
}

#[test]
fn test_affine_transform_broadcasts_bias_columns() {
    let bias = t(&[2], &[1.0, -1.0]);
    let w1 = t(&[2, 2], &[0.5, 0.1, -0.3, 0.2]);
    let x1 = t(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let w2 = t(&[2, 1], &[0.7, -0.4]);
    let x2 = t(&[1, 3], &[0.3, 0.2, 0.1]);
    let xs = vec![bias, w1, x1, w2, x2];
    let fx = run_forward(&mut AffineTransform, &xs);
    assert_eq!(fx.dim(), &Dim::new(&[2, 3]));
    assert_relative_eq!(fx.at(0, 0, 0), 1.0 + 0.5 - 0.6 + 0.21, epsilon = 1e-6);
    check_node(&mut AffineTransform, xs);
}

#[test]
fn test_elementwise_gradients() {
    let x = t(&[4], &[0.3, -0.8, 1.2, -0.1]);
    let positive = t(&[4], &[0.3, 0.8, 1.2, 2.5]);
    for kind in [
        ElementwiseKind::Tanh,
        ElementwiseKind::Logistic,
        ElementwiseKind::Rectify,
        ElementwiseKind::Elu(1.0),
        ElementwiseKind::Exp,
        ElementwiseKind::Square,
        ElementwiseKind::Cube,
        ElementwiseKind::Softsign,
    ] {
        check_node(&mut Elementwise::new(kind), vec![x.clone()]);
    }
    check_node(&mut Elementwise::new(ElementwiseKind::Log), vec![positive.clone()]);
    check_node(&mut Elementwise::new(ElementwiseKind::Sqrt), vec![positive]);
}

#[test]
fn test_rectify_has_zero_derivative_at_zero() {
    let x = t(&[2], &[0.0, 1.0]);
    let mut node = Elementwise::new(ElementwiseKind::Rectify);
    let fx = run_forward(&mut node, &[x.clone()]);
    let mut g = Tensor::zeros(x.dim());
    node.backward(&[&x], &fx, &Tensor::ones(fx.dim()), 0, &mut g).unwrap();
    assert_eq!(g.values(), &[0.0, 1.0]);
}

#[test]
fn test_softmax_columns_sum_to_one() {
    let x = t(&[3, 2], &[1.0, 2.0, 3.0, 1000.0, 1000.0, 1000.0]);
    let fx = run_forward(&mut Softmax, &[x]);
    for col in fx.values().chunks(3) {
        assert_relative_eq!(col.iter().sum::<f32>(), 1.0, epsilon = 1e-5);
    }
    assert_relative_eq!(fx.values()[3], 1.0 / 3.0, epsilon = 1e-5);
    let y = t(&[3, 2], &[0.2, -0.5, 1.0, 0.3, 0.0, -0.4]);
    check_node(&mut Softmax, vec![y.clone()]);
    check_node(&mut LogSoftmax, vec![y]);
}

#[test]
fn test_reduction_gradients() {
    let x = tb(&[2, 2], 2, &[0.5, -1.0, 2.0, 1.5, 0.1, 0.2, 0.3, 0.4]);
    check_node(&mut SumElements, vec![x.clone()]);
    check_node(&mut SumCols, vec![x.clone()]);
    check_node(&mut SumBatches, vec![x]);

    let a = t(&[3], &[0.1, 0.9, -0.4]);
    let b = t(&[3], &[0.5, -0.2, 0.6]);
    let c = t(&[3], &[-0.7, 0.3, 0.2]);
    check_node(&mut Average, vec![a.clone(), b.clone(), c.clone()]);
    check_node(&mut MaxOf, vec![a.clone(), b.clone(), c.clone()]);
    check_node(&mut LogSumExp, vec![a, b, c]);
}

#[test]
fn test_max_of_ties_go_to_first_argument() {
    let a = t(&[1], &[2.0]);
    let b = t(&[1], &[2.0]);
    let fx = run_forward(&mut MaxOf, &[a.clone(), b.clone()]);
    let d = Tensor::ones(fx.dim());
    let (mut ga, mut gb) = (Tensor::zeros(a.dim()), Tensor::zeros(b.dim()));
    MaxOf.backward(&[&a, &b], &fx, &d, 0, &mut ga).unwrap();
    MaxOf.backward(&[&a, &b], &fx, &d, 1, &mut gb).unwrap();
    assert_eq!((ga.values()[0], gb.values()[0]), (1.0, 0.0));
}

#[test]
fn test_shape_gradients() {
    let m = t(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let n = t(&[1, 3], &[7.0, 8.0, 9.0]);
    let fx = run_forward(&mut Concatenate, &[m.clone(), n.clone()]);
    assert_eq!(fx.values(), &[1.0, 2.0, 7.0, 3.0, 4.0, 8.0, 5.0, 6.0, 9.0]);
    check_node(&mut Concatenate, vec![m.clone(), n]);
    check_node(&mut ConcatenateCols, vec![m.clone(), t(&[2], &[0.5, 0.6])]);
    check_node(&mut Reshape::new(Dim::new(&[3, 2])), vec![m.clone()]);

    let tr = run_forward(&mut Transpose, &[m.clone()]);
    assert_eq!(tr.dim(), &Dim::new(&[3, 2]));
    assert_eq!(tr.values(), &[1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    check_node(&mut Transpose, vec![m.clone()]);
    check_node(&mut ColumnSlices::new(1, 3), vec![m]);

    let v = tb(&[4], 2, &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8]);
    check_node(&mut Pick::new(vec![3, 0]), vec![v.clone()]);
    check_node(&mut PickRange::new(1, 3), vec![v.clone()]);
    let folded = run_forward(&mut FoldRows::new(2), &[v.clone()]);
    assert_eq!(folded.dim(), &Dim::with_batch(&[2, 1], 2));
    assert_relative_eq!(folded.values()[0], 0.3, epsilon = 1e-6);
    check_node(&mut FoldRows::new(2), vec![v]);
}

#[test]
fn test_pick_per_batch_index() {
    let v = tb(&[3], 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let fx = run_forward(&mut Pick::new(vec![2, 0]), &[v]);
    assert_eq!(fx.values(), &[3.0, 4.0]);
}

#[test]
fn test_distance_and_loss_values() {
    let x = t(&[3], &[1.0, 2.0, 3.0]);
    let y = t(&[3], &[1.5, 0.0, 3.0]);
    assert_eq!(run_forward(&mut DotProduct, &[x.clone(), y.clone()]).values(), &[10.5]);
    assert_eq!(run_forward(&mut SquaredDistance, &[x.clone(), y.clone()]).values(), &[4.25]);
    assert_eq!(run_forward(&mut L1Distance, &[x.clone(), y.clone()]).values(), &[2.5]);
    // |r| = 0.5 inside the threshold, |r| = 2 beyond it
    assert_relative_eq!(
        run_forward(&mut HuberDistance::new(1.0), &[x, y]).values()[0],
        0.25 + 3.0
    );

    let scores = t(&[3], &[2.0, 1.5, 0.5]);
    // margin 1: (1 - 2 + 1.5) + 0 = 0.5
    assert_relative_eq!(run_forward(&mut Hinge::new(vec![0], 1.0), &[scores]).values()[0], 0.5);

    let rate = t(&[1], &[0.0]);
    // exp(0) - 3 * 0 + ln(3!)
    assert_relative_eq!(
        run_forward(&mut PoissonLoss::new(vec![3]), &[rate]).values()[0],
        1.0 + 6.0f32.ln(),
        epsilon = 1e-5
    );
}

#[test]
fn test_loss_gradients() {
    let x = tb(&[3], 2, &[1.0, 2.0, 3.0, -1.0, 0.5, 0.2]);
    let y = t(&[3], &[1.5, 0.0, 2.5]);
    check_node(&mut DotProduct, vec![x.clone(), y.clone()]);
    check_node(&mut SquaredDistance, vec![x.clone(), y.clone()]);
    check_node(&mut L1Distance, vec![x.clone(), y.clone()]);
    check_node(&mut HuberDistance::new(1.0), vec![x.clone(), y.clone()]);
    check_node(&mut PairwiseRankLoss::new(1.0), vec![x, y]);
    let scores = tb(&[3], 2, &[0.3, 1.1, 0.4, -0.2, 0.5, 0.9]);
    check_node(&mut Hinge::new(vec![1, 0], 1.0), vec![scores]);

    let p = t(&[3], &[0.2, 0.7, 0.9]);
    let target = t(&[3], &[0.0, 1.0, 1.0]);
    check_node(&mut BinaryLogLoss, vec![p, target]);
    check_node(&mut PoissonLoss::new(vec![2, 0]), vec![tb(&[1], 2, &[0.3, -0.4])]);
}

#[test]
fn test_conv_shapes_and_gradients() {
    let x = t(&[2, 4], &[1.0, 0.5, -1.0, 2.0, 0.3, 0.1, 0.7, -0.2]);
    let f = t(&[2, 2], &[0.5, -0.5, 1.0, 0.2]);
    let narrow = run_forward(&mut Conv1dNarrow, &[x.clone(), f.clone()]);
    assert_eq!(narrow.dim(), &Dim::new(&[2, 3]));
    // row 0, column 0: 1.0 * 0.5 + (-1.0) * 1.0
    assert_relative_eq!(narrow.at(0, 0, 0), -0.5);
    let wide = run_forward(&mut Conv1dWide, &[x.clone(), f.clone()]);
    assert_eq!(wide.dim(), &Dim::new(&[2, 5]));
    check_node(&mut Conv1dNarrow, vec![x.clone(), f.clone()]);
    check_node(&mut Conv1dWide, vec![x, f]);
}

#[test]
fn test_conv_rejects_zero_width_filter() {
    let x = Dim::new(&[2, 4]);
    let empty = Dim::new(&[2, 0]);
    for node in [&Conv1dWide as &dyn Node, &Conv1dNarrow] {
        assert!(matches!(
            node.dim_forward(&[&x, &empty]),
            Err(NeuroGraphError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            node.dim_forward(&[&empty, &Dim::new(&[2, 1])]),
            Err(NeuroGraphError::ShapeMismatch { .. })
        ));
    }
}

#[test]
fn test_kmax_pooling_keeps_column_order() {
    let x = t(&[1, 5], &[3.0, 9.0, 1.0, 9.0, 5.0]);
    let fx = run_forward(&mut KMaxPooling::new(3), &[x]);
    assert_eq!(fx.values(), &[9.0, 9.0, 5.0]);
    let ties = t(&[1, 3], &[4.0, 4.0, 4.0]);
    let mut node = KMaxPooling::new(1);
    let fx = run_forward(&mut node, &[ties.clone()]);
    let mut g = Tensor::zeros(ties.dim());
    node.backward(&[&ties], &fx, &Tensor::ones(fx.dim()), 0, &mut g).unwrap();
    assert_eq!(g.values(), &[1.0, 0.0, 0.0]);

    let y = t(&[2, 4], &[0.1, 0.9, 0.5, -0.3, 0.8, 0.2, -0.6, 0.4]);
    check_node(&mut KMaxPooling::new(2), vec![y]);
}

#[test]
fn test_stochastic_nodes() {
    assert!(matches!(Dropout::new(1.0), Err(NeuroGraphError::ConfigurationError(_))));
    assert!(matches!(BlockDropout::new(-0.1), Err(NeuroGraphError::ConfigurationError(_))));
    assert!(GaussianNoise::new(-1.0).is_err());

    let x = tb(&[4], 2, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    let kept = run_forward(&mut Dropout::new(0.0).unwrap(), &[x.clone()]);
    assert_eq!(kept.values(), x.values());

    let dropped = run_forward(&mut Dropout::new(0.5).unwrap(), &[x.clone()]);
    for (o, v) in dropped.values().iter().zip(x.values()) {
        assert!(*o == 0.0 || (*o - 2.0 * v).abs() < 1e-6);
    }
    let blocks = run_forward(&mut BlockDropout::new(0.5).unwrap(), &[x.clone()]);
    for b in 0..2 {
        let out = blocks.batch(b);
        assert!(out.iter().all(|&o| o == 0.0) || out.iter().zip(x.batch(b)).all(|(o, v)| (o - 2.0 * v).abs() < 1e-6));
    }

    check_node(&mut Dropout::new(0.3).unwrap(), vec![x.clone()]);
    check_node(&mut BlockDropout::new(0.3).unwrap(), vec![x.clone()]);
    check_node(&mut GaussianNoise::new(0.1).unwrap(), vec![x]);
}

#[test]
fn test_dim_forward_rejects_bad_shapes() {
    let d23 = Dim::new(&[2, 3]);
    let d22 = Dim::new(&[2, 2]);
    assert!(matches!(
        MatrixMultiply.dim_forward(&[&d23, &d22]),
        Err(NeuroGraphError::ShapeMismatch { .. })
    ));
    assert!(matches!(
        Sum.dim_forward(&[&Dim::with_batch(&[2], 2), &Dim::with_batch(&[2], 3)]),
        Err(NeuroGraphError::ShapeMismatch { .. })
    ));
    assert!(matches!(
        Concatenate.dim_forward(&[&d23, &d22]),
        Err(NeuroGraphError::ShapeMismatch { .. })
    ));
    assert!(matches!(
        Pick::new(vec![5]).dim_forward(&[&Dim::new(&[3])]),
        Err(NeuroGraphError::IndexOutOfBounds { index: 5, len: 3 })
    ));
    assert!(matches!(
        Reshape::new(Dim::new(&[4])).dim_forward(&[&d23]),
        Err(NeuroGraphError::ShapeMismatch { .. })
    ));
    assert!(matches!(
        Conv1dNarrow.dim_forward(&[&d22, &d23]),
        Err(NeuroGraphError::ShapeMismatch { .. })
    ));
    // {3} and {3,1} describe the same column vector
    assert_eq!(
        SquaredDistance.dim_forward(&[&Dim::new(&[3]), &Dim::new(&[3, 1])]).unwrap(),
        Dim::scalar()
    );
}

#[test]
fn test_default_node_capabilities() {
    assert!(!Sum.has_parameters());
    assert!(matches!(
        Sum.accumulate_grad(&Tensor::scalar(1.0)),
        Err(NeuroGraphError::NotSupported(_))
    ));
    assert!(matches!(
        Softmax.set_value(Tensor::scalar(1.0)),
        Err(NeuroGraphError::NotSupported(_))
    ));
    assert_eq!(Transpose.describe(&["v0".to_string()]), "transpose(v0)");
}
