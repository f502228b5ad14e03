use super::*;
use crate::expr;
use crate::model::{read_lock, Model};
use std::cell::Cell;

/// Identity node that counts how often it is evaluated.
#[derive(Debug)]
struct CountingNode {
    calls: Rc<Cell<usize>>,
}

impl Node for CountingNode {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn dim_forward(&self, xs: &[&Dim]) -> Result<Dim, NeuroGraphError> {
        Ok(xs[0].clone())
    }

    fn forward(&mut self, xs: &[&Tensor], fx: &mut Tensor, _rng: &mut StdRng) -> Result<(), NeuroGraphError> {
        self.calls.set(self.calls.get() + 1);
        fx.copy_from(xs[0])
    }

    fn backward(&self, _xs: &[&Tensor], _fx: &Tensor, d_edf: &Tensor, _i: usize, d_edxi: &mut Tensor) -> Result<(), NeuroGraphError> {
        d_edxi.add_assign(d_edf)
    }
}

fn counting(cg: &ComputationGraph, x: &Expression) -> (Expression, Rc<Cell<usize>>) {
    let calls = Rc::new(Cell::new(0));
    let node = CountingNode {
        calls: Rc::clone(&calls),
    };
    let e = cg.add_function(Box::new(node), &[x.index()]).unwrap();
    (e, calls)
}

#[test]
fn test_forward_is_memoized_until_invalidated() {
    let cg = ComputationGraph::with_seed(1);
    let x = expr::input(&cg, &Dim::new(&[2]), vec![1.0, 2.0]).unwrap();
    let (c, calls) = counting(&cg, &x);

    assert_eq!(c.value().unwrap().values(), &[1.0, 2.0]);
    c.value().unwrap();
    assert_eq!(calls.get(), 1);

    // extending the graph only evaluates the new nodes
    let y = expr::sum_elements(&c).unwrap();
    assert_eq!(cg.incremental_forward().unwrap().values(), &[3.0]);
    assert_eq!(calls.get(), 1);
    assert_eq!(y.index(), 2);
    assert_eq!(cg.evaluated_count().unwrap(), 3);

    cg.forward().unwrap();
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_values_are_lazy() {
    let cg = ComputationGraph::with_seed(1);
    let x = expr::input(&cg, &Dim::new(&[2]), vec![1.0, 2.0]).unwrap();
    let (_c, calls) = counting(&cg, &x);
    assert_eq!(cg.node_count().unwrap(), 2);
    assert_eq!(cg.evaluated_count().unwrap(), 0);
    assert_eq!(calls.get(), 0);
    assert_eq!(cg.dim(1).unwrap(), Dim::new(&[2]));
}

#[test]
fn test_set_input_invalidates_dependent_nodes() {
    let cg = ComputationGraph::with_seed(1);
    let x = expr::input(&cg, &Dim::new(&[2]), vec![1.0, 2.0]).unwrap();
    let (c, calls) = counting(&cg, &x);
    let s = expr::sum_elements(&c).unwrap();
    assert_eq!(s.scalar_value().unwrap(), 3.0);

    cg.set_input(x.index(), Tensor::from_vec(vec![5.0, 6.0], &Dim::new(&[2])).unwrap())
        .unwrap();
    assert_eq!(cg.evaluated_count().unwrap(), 0);
    assert_eq!(s.scalar_value().unwrap(), 11.0);
    assert_eq!(calls.get(), 2);

    assert!(matches!(
        cg.set_input(x.index(), Tensor::zeros(&Dim::new(&[3]))),
        Err(NeuroGraphError::ShapeMismatch { .. })
    ));
    assert!(matches!(
        cg.set_input(s.index(), Tensor::scalar(1.0)),
        Err(NeuroGraphError::NotSupported(_))
    ));
}

#[test]
fn test_fan_in_accumulates_gradients() {
    let mut model = Model::with_seed(2);
    let p = model.add_parameters(&Dim::new(&[2]), 0.5, "p");
    let before = read_lock(&p).unwrap().values().clone();

    let cg = ComputationGraph::with_seed(1);
    let e = expr::parameter(&cg, &p).unwrap();
    // the same argument twice in one node, and the same node feeding two consumers
    let doubled = expr::add(&e, &e).unwrap();
    let squared = expr::cwise_multiply(&e, &e).unwrap();
    let loss = expr::sum_elements(&expr::add(&doubled, &squared).unwrap()).unwrap();
    loss.value().unwrap();
    loss.backward().unwrap();

    let grad = read_lock(&p).unwrap().grad().clone();
    for (g, v) in grad.values().iter().zip(before.values()) {
        assert!((g - (2.0 + 2.0 * v)).abs() < 1e-6);
    }
}

#[test]
fn test_backward_requires_scalar_and_forward() {
    let mut model = Model::with_seed(2);
    let p = model.add_parameters(&Dim::new(&[3]), 0.5, "p");
    let cg = ComputationGraph::with_seed(1);
    let e = expr::parameter(&cg, &p).unwrap();
    let t = expr::tanh(&e).unwrap();
    let loss = expr::sum_elements(&t).unwrap();

    assert_eq!(
        loss.backward(),
        Err(NeuroGraphError::BackwardBeforeForward { index: loss.index() })
    );
    cg.incremental_forward().unwrap();
    assert_eq!(t.backward(), Err(NeuroGraphError::BackwardNonScalar));
    assert!(matches!(
        cg.backward_with_seed(t.index(), Tensor::zeros(&Dim::new(&[2]))),
        Err(NeuroGraphError::ShapeMismatch { .. })
    ));
    // an explicit seed makes a non-scalar node a valid root
    cg.backward_with_seed(t.index(), Tensor::ones(&Dim::new(&[3]))).unwrap();
    assert!(read_lock(&p).unwrap().g_squared_l2norm() > 0.0);
}

#[test]
fn test_backward_without_parameters_is_a_no_op() {
    let cg = ComputationGraph::with_seed(1);
    let x = expr::input(&cg, &Dim::new(&[2]), vec![1.0, 2.0]).unwrap();
    let loss = expr::sum_elements(&expr::square(&x).unwrap()).unwrap();
    loss.value().unwrap();
    assert_eq!(cg.backward_last(), Ok(()));
}

#[test]
fn test_batched_loss_gradients_sum_over_batch() {
    let mut model = Model::with_seed(2);
    let w = model.add_parameters(&Dim::new(&[1, 2]), 0.5, "w");
    let cg = ComputationGraph::with_seed(1);
    let x = expr::input(&cg, &Dim::with_batch(&[2], 3), vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap();
    let y = expr::matmul(&expr::parameter(&cg, &w).unwrap(), &x).unwrap();
    assert_eq!(y.dim().unwrap(), Dim::with_batch(&[1, 1], 3));
    let loss = expr::sum_batches(&y).unwrap();
    loss.value().unwrap();
    loss.backward().unwrap();
    assert_eq!(read_lock(&w).unwrap().grad().values(), &[2.0, 2.0]);
}

#[test]
fn test_lookup_gradients_touch_only_used_rows() {
    let mut model = Model::with_seed(2);
    let table = model.add_lookup_parameters(50, &Dim::new(&[3]), 0.5, "table");
    let cg = ComputationGraph::with_seed(1);
    let rows = expr::lookup_batch(&cg, &table, &[7, 7, 30]).unwrap();
    let fixed = expr::const_lookup(&cg, &table, 12).unwrap();
    let loss = expr::sum_batches(&expr::dot_product(&rows, &fixed).unwrap()).unwrap();
    loss.value().unwrap();
    loss.backward().unwrap();

    let lp = read_lock(&table).unwrap();
    assert_eq!(lp.touched_rows().collect::<Vec<_>>(), vec![7, 30]);
    let row12 = lp.row(12).unwrap().values().to_vec();
    let g7 = lp.grad(7).unwrap().values().to_vec();
    for (g, v) in g7.iter().zip(&row12) {
        assert!((g - 2.0 * v).abs() < 1e-6);
    }
}

#[test]
fn test_numeric_instability_reports_node() {
    let cg = ComputationGraph::with_seed(1);
    let x = expr::input(&cg, &Dim::new(&[2]), vec![1.0, -1.0]).unwrap();
    let y = expr::log(&x).unwrap();
    assert_eq!(
        y.value(),
        Err(NeuroGraphError::NumericInstability {
            operation: "log".to_string(),
            index: 1,
            phase: "forward".to_string(),
        })
    );
    assert_eq!(cg.evaluated_count().unwrap(), 1);
}

#[test]
fn test_expression_outliving_graph() {
    let e = {
        let cg = ComputationGraph::with_seed(1);
        expr::input_scalar(&cg, 1.0).unwrap()
    };
    assert_eq!(e.value(), Err(NeuroGraphError::GraphDropped));
    assert!(matches!(expr::tanh(&e), Err(NeuroGraphError::GraphDropped)));
}

#[test]
fn test_mixing_graphs_is_rejected() {
    let a = ComputationGraph::with_seed(1);
    let b = ComputationGraph::with_seed(1);
    let x = expr::input_scalar(&a, 1.0).unwrap();
    let y = expr::input_scalar(&b, 2.0).unwrap();
    assert!(matches!(expr::add(&x, &y), Err(NeuroGraphError::NotSupported(_))));
}

#[test]
fn test_add_function_validates_arguments() {
    let cg = ComputationGraph::with_seed(1);
    let x = expr::input(&cg, &Dim::new(&[2]), vec![1.0, 2.0]).unwrap();
    assert_eq!(
        cg.add_function(Box::new(crate::nodes::Sum), &[x.index(), 4]).unwrap_err(),
        NeuroGraphError::IndexOutOfBounds { index: 4, len: 1 }
    );
    let y = expr::input(&cg, &Dim::new(&[3]), vec![1.0, 2.0, 3.0]).unwrap();
    assert!(expr::add(&x, &y).is_err());
    // rejected nodes leave the graph unchanged
    assert_eq!(cg.node_count().unwrap(), 2);
    assert_eq!(
        cg.get_value(9),
        Err(NeuroGraphError::IndexOutOfBounds { index: 9, len: 2 })
    );
}

#[test]
fn test_print_graphviz_lists_nodes_and_edges() {
    let cg = ComputationGraph::with_seed(1);
    let x = expr::input(&cg, &Dim::new(&[2]), vec![1.0, 2.0]).unwrap();
    let t = expr::tanh(&x).unwrap();
    expr::add(&x, &t).unwrap();
    let dot = cg.print_graphviz().unwrap();
    assert!(dot.starts_with("digraph G {"));
    assert!(dot.contains("N1 [label=\"v1 = tanh(v0) {2}\"];"));
    assert!(dot.contains("v2 = v0 + v1"));
    assert!(dot.contains("N0 -> N2;"));
    assert!(dot.trim_end().ends_with('}'));
}

#[test]
fn test_empty_graph_has_no_last_node() {
    let cg = ComputationGraph::new();
    assert!(matches!(
        cg.incremental_forward(),
        Err(NeuroGraphError::IndexOutOfBounds { .. })
    ));
}
