//! Dynamic computation graph with memoized forward evaluation and reverse-mode
//! differentiation.
//!
//! Nodes are stored in an arena in creation order, so every argument of a node
//! has a smaller index than the node itself. Forward evaluation keeps a
//! frontier: nodes below it are up to date and are never recomputed until the
//! graph is invalidated.

use crate::dim::Dim;
use crate::error::{shape_mismatch, NeuroGraphError};
use crate::nodes::Node;
use crate::tensor::Tensor;
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

pub mod expression;

pub use expression::Expression;

/// Position of a node in its graph.
pub type VariableIndex = usize;

#[derive(Debug)]
pub(crate) struct NodeEntry {
    pub(crate) op: Box<dyn Node>,
    pub(crate) args: Vec<VariableIndex>,
    pub(crate) dim: Dim,
}

#[derive(Debug)]
pub(crate) struct GraphInner {
    pub(crate) nodes: Vec<NodeEntry>,
    values: Vec<Tensor>,
    /// Number of leading nodes whose value is current.
    evaluated: usize,
    rng: StdRng,
}

/// Owner of a computation graph.
///
/// Cloning the handle shares the same graph. [`Expression`]s refer back to the
/// graph weakly and fail with `GraphDropped` once every handle is gone.
#[derive(Debug, Clone)]
pub struct ComputationGraph {
    inner: Rc<RefCell<GraphInner>>,
}

impl Default for ComputationGraph {
    fn default() -> Self {
        ComputationGraph::new()
    }
}

fn unstable(op: &str, index: VariableIndex, phase: &str) -> NeuroGraphError {
    NeuroGraphError::NumericInstability {
        operation: op.to_string(),
        index,
        phase: phase.to_string(),
    }
}

impl ComputationGraph {
    pub fn new() -> Self {
        ComputationGraph::from_rng(StdRng::from_entropy())
    }

    /// A graph whose stochastic nodes draw from a fixed seed.
    pub fn with_seed(seed: u64) -> Self {
        ComputationGraph::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        ComputationGraph {
            inner: Rc::new(RefCell::new(GraphInner {
                nodes: Vec::new(),
                values: Vec::new(),
                evaluated: 0,
                rng,
            })),
        }
    }

    pub(crate) fn from_inner(inner: Rc<RefCell<GraphInner>>) -> Self {
        ComputationGraph { inner }
    }

    fn borrow(&self) -> Result<std::cell::Ref<'_, GraphInner>, NeuroGraphError> {
        self.inner.try_borrow().map_err(|e| NeuroGraphError::LockError {
            lock_type: "graph borrow".to_string(),
            reason: e.to_string(),
        })
    }

    fn borrow_mut(&self) -> Result<std::cell::RefMut<'_, GraphInner>, NeuroGraphError> {
        self.inner.try_borrow_mut().map_err(|e| NeuroGraphError::LockError {
            lock_type: "graph borrow".to_string(),
            reason: e.to_string(),
        })
    }

    /// Appends a node and returns an expression referring to it.
    ///
    /// The node's output shape is inferred immediately; a rejected shape leaves
    /// the graph unchanged.
    pub fn add_function(
        &self,
        op: Box<dyn Node>,
        args: &[VariableIndex],
    ) -> Result<Expression, NeuroGraphError> {
        let mut g = self.borrow_mut()?;
        let len = g.nodes.len();
        if let Some(&bad) = args.iter().find(|&&a| a >= len) {
            return Err(NeuroGraphError::IndexOutOfBounds { index: bad, len });
        }
        let dim = {
            let dims: Vec<&Dim> = args.iter().map(|&a| &g.nodes[a].dim).collect();
            op.dim_forward(&dims)?
        };
        trace!("ComputationGraph: v{} = {} {}", len, op.name(), dim);
        g.values.push(Tensor::zeros(&dim));
        g.nodes.push(NodeEntry {
            op,
            args: args.to_vec(),
            dim,
        });
        Ok(Expression::new(Rc::downgrade(&self.inner), len))
    }

    pub fn node_count(&self) -> Result<usize, NeuroGraphError> {
        Ok(self.borrow()?.nodes.len())
    }

    /// Number of nodes whose value is current.
    pub fn evaluated_count(&self) -> Result<usize, NeuroGraphError> {
        Ok(self.borrow()?.evaluated)
    }

    /// Shape of node `index`.
    pub fn dim(&self, index: VariableIndex) -> Result<Dim, NeuroGraphError> {
        let g = self.borrow()?;
        g.nodes
            .get(index)
            .map(|n| n.dim.clone())
            .ok_or(NeuroGraphError::IndexOutOfBounds {
                index,
                len: g.nodes.len(),
            })
    }

    /// Value of node `index`, evaluating every pending node up to it first.
    pub fn get_value(&self, index: VariableIndex) -> Result<Tensor, NeuroGraphError> {
        let mut g = self.borrow_mut()?;
        g.evaluate_through(index)?;
        Ok(g.values[index].clone())
    }

    /// Evaluates pending nodes through the last one and returns its value.
    pub fn incremental_forward(&self) -> Result<Tensor, NeuroGraphError> {
        let last = self.last_index()?;
        self.get_value(last)
    }

    /// Re-evaluates every node from scratch and returns the last value.
    pub fn forward(&self) -> Result<Tensor, NeuroGraphError> {
        self.invalidate()?;
        self.incremental_forward()
    }

    /// Marks every value as stale. Buffers are kept and overwritten in place.
    pub fn invalidate(&self) -> Result<(), NeuroGraphError> {
        self.borrow_mut()?.evaluated = 0;
        Ok(())
    }

    /// Replaces the value held by input node `index` and marks it and every
    /// later node as stale.
    pub fn set_input(&self, index: VariableIndex, value: Tensor) -> Result<(), NeuroGraphError> {
        let mut g = self.borrow_mut()?;
        let len = g.nodes.len();
        let entry = g
            .nodes
            .get_mut(index)
            .ok_or(NeuroGraphError::IndexOutOfBounds { index, len })?;
        entry.op.set_value(value)?;
        g.evaluated = g.evaluated.min(index);
        Ok(())
    }

    /// Backpropagates from the last node.
    pub fn backward_last(&self) -> Result<(), NeuroGraphError> {
        let last = self.last_index()?;
        self.backward(last)
    }

    /// Backpropagates from node `index`, seeding its gradient with ones.
    ///
    /// Each batch element of the node must hold a single value.
    pub fn backward(&self, index: VariableIndex) -> Result<(), NeuroGraphError> {
        let dim = self.dim(index)?;
        if !dim.is_scalar() {
            return Err(NeuroGraphError::BackwardNonScalar);
        }
        self.backward_with_seed(index, Tensor::ones(&dim))
    }

    /// Backpropagates from node `index` with an explicit `dE/d(node)`.
    ///
    /// Gradients reaching parameter and lookup nodes are added to the
    /// corresponding model parameters.
    pub fn backward_with_seed(&self, index: VariableIndex, seed: Tensor) -> Result<(), NeuroGraphError> {
        let g = self.borrow()?;
        if index >= g.nodes.len() {
            return Err(NeuroGraphError::IndexOutOfBounds {
                index,
                len: g.nodes.len(),
            });
        }
        if index >= g.evaluated {
            return Err(NeuroGraphError::BackwardBeforeForward { index });
        }
        if seed.dim() != &g.nodes[index].dim {
            return Err(shape_mismatch("backward seed", &g.nodes[index].dim, seed.dim()));
        }
        g.backward_through(index, seed)
    }

    /// Graphviz rendering of the graph, for debugging.
    pub fn print_graphviz(&self) -> Result<String, NeuroGraphError> {
        let g = self.borrow()?;
        let mut out = String::from("digraph G {\n  rankdir=LR;\n  nodesep=.05;\n");
        for (i, node) in g.nodes.iter().enumerate() {
            let args: Vec<String> = node.args.iter().map(|a| format!("v{}", a)).collect();
            let label = node.op.describe(&args).replace('"', "'");
            // writing to a String cannot fail
            let _ = writeln!(
                out,
                "  N{} [label=\"v{} = {} {}\"];",
                i, i, label, node.dim
            );
            for a in &node.args {
                let _ = writeln!(out, "  N{} -> N{};", a, i);
            }
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn last_index(&self) -> Result<VariableIndex, NeuroGraphError> {
        let n = self.node_count()?;
        n.checked_sub(1)
            .ok_or(NeuroGraphError::IndexOutOfBounds { index: 0, len: 0 })
    }
}

impl GraphInner {
    fn evaluate_through(&mut self, index: VariableIndex) -> Result<(), NeuroGraphError> {
        let len = self.nodes.len();
        if index >= len {
            return Err(NeuroGraphError::IndexOutOfBounds { index, len });
        }
        if index < self.evaluated {
            return Ok(());
        }
        let start = self.evaluated;
        let GraphInner {
            nodes,
            values,
            evaluated,
            rng,
        } = self;
        for i in start..=index {
            let node = &mut nodes[i];
            let (done, rest) = values.split_at_mut(i);
            let fx = &mut rest[0];
            fx.ensure_dim(&node.dim);
            let xs: Vec<&Tensor> = node.args.iter().map(|&a| &done[a]).collect();
            node.op.forward(&xs, fx, rng)?;
            if !fx.is_valid() {
                return Err(unstable(node.op.name(), i, "forward"));
            }
            *evaluated = i + 1;
        }
        debug!("ComputationGraph: evaluated nodes {}..={}", start, index);
        Ok(())
    }

    fn backward_through(&self, index: VariableIndex, seed: Tensor) -> Result<(), NeuroGraphError> {
        let n = index + 1;
        let mut needs_derivative = vec![false; n];
        for i in 0..n {
            let node = &self.nodes[i];
            let needs = node.op.has_parameters() || node.args.iter().any(|&a| needs_derivative[a]);
            needs_derivative[i] = needs;
        }
        if !needs_derivative[index] {
            debug!("ComputationGraph: node {} does not depend on any parameter", index);
            return Ok(());
        }

        let mut grads: Vec<Tensor> = (0..n)
            .map(|i| {
                if needs_derivative[i] && i != index {
                    Tensor::zeros(&self.nodes[i].dim)
                } else {
                    Tensor::default()
                }
            })
            .collect();
        grads[index] = seed;

        for i in (0..n).rev() {
            if !needs_derivative[i] {
                continue;
            }
            let node = &self.nodes[i];
            let (lower, upper) = grads.split_at_mut(i);
            let d_edf = &upper[0];
            let xs: Vec<&Tensor> = node.args.iter().map(|&a| &self.values[a]).collect();
            for (ai, &arg) in node.args.iter().enumerate() {
                if !needs_derivative[arg] {
                    continue;
                }
                let d_edxi = &mut lower[arg];
                node.op.backward(&xs, &self.values[i], d_edf, ai, d_edxi)?;
                if !d_edxi.is_valid() {
                    return Err(unstable(node.op.name(), i, "backward"));
                }
            }
        }

        for (i, node) in self.nodes[..n].iter().enumerate() {
            if needs_derivative[i] && node.op.has_parameters() {
                node.op.accumulate_grad(&grads[i])?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "graph_test.rs"]
mod tests;
