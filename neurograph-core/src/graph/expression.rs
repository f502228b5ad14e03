use super::{ComputationGraph, GraphInner, VariableIndex};
use crate::dim::Dim;
use crate::error::NeuroGraphError;
use crate::tensor::Tensor;
use std::cell::RefCell;
use std::rc::Weak;

/// Non-owning handle to one node of a [`ComputationGraph`].
///
/// Expressions are cheap to clone. Every operation first checks that the
/// graph is still alive.
#[derive(Debug, Clone)]
pub struct Expression {
    graph: Weak<RefCell<GraphInner>>,
    index: VariableIndex,
}

impl Expression {
    pub(crate) fn new(graph: Weak<RefCell<GraphInner>>, index: VariableIndex) -> Self {
        Expression { graph, index }
    }

    pub fn index(&self) -> VariableIndex {
        self.index
    }

    /// The owning graph, or `GraphDropped`.
    pub fn graph(&self) -> Result<ComputationGraph, NeuroGraphError> {
        self.graph
            .upgrade()
            .map(ComputationGraph::from_inner)
            .ok_or(NeuroGraphError::GraphDropped)
    }

    /// `true` when both expressions belong to the same live graph.
    pub fn same_graph(&self, other: &Expression) -> bool {
        self.graph.ptr_eq(&other.graph) && self.graph.strong_count() > 0
    }

    /// Evaluates the graph up to this node and returns its value.
    pub fn value(&self) -> Result<Tensor, NeuroGraphError> {
        self.graph()?.get_value(self.index)
    }

    pub fn dim(&self) -> Result<Dim, NeuroGraphError> {
        self.graph()?.dim(self.index)
    }

    /// Backpropagates from this node. See [`ComputationGraph::backward`].
    pub fn backward(&self) -> Result<(), NeuroGraphError> {
        self.graph()?.backward(self.index)
    }

    /// Value of a one-element node.
    pub fn scalar_value(&self) -> Result<f32, NeuroGraphError> {
        self.value()?.as_scalar()
    }
}
