//! Graph: the dataflow container consumed by the session executor.
//!
//! [`Graph`] is the single entry point for constructing and querying a
//! computation graph. Variables and ops are nodes of one petgraph
//! `StableGraph`, connected by [`FlowEdge::Input`] and [`FlowEdge::Output`]
//! edges, and indexed by name.
//!
//! # Builder invariants
//!
//! - Variable names and op names are unique (each in its own namespace).
//! - A computed variable has at most one producer (op, slot). Sources
//!   (constants, placeholders, trainables) have none.
//! - Control-flow ops have the fixed arity listed on [`OpKind`].
//! - An op may name inputs that nothing produces yet; a computed variable is
//!   created for them. Loops need this, since `Merge` reads the output of a
//!   `NextIteration` declared later. [`Graph::validate`] rejects computed
//!   variables that never got a producer.
//!
//! The graph is read-only during execution and is shared between sessions
//! through `Arc<Graph>`.

use std::sync::Arc;

use indexmap::IndexMap;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};

use crate::array::Array;
use crate::edge::FlowEdge;
use crate::error::CoreError;
use crate::id::NodeId;
use crate::node::{GraphNode, OpKind, OpNode, Variable, VariableKind};
use crate::op::Operation;
use crate::types::DataType;

/// The dataflow graph container.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: StableGraph<GraphNode, FlowEdge, Directed, u32>,
    /// Variable name to node, in declaration order.
    variables: IndexMap<String, NodeId>,
    /// Op name to node, in declaration order.
    ops: IndexMap<String, NodeId>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    /// Wraps the graph for sharing between sessions.
    pub fn into_shared(self) -> Arc<Graph> {
        Arc::new(self)
    }

    // -----------------------------------------------------------------------
    // Read-only accessors
    // -----------------------------------------------------------------------

    /// Returns a read-only reference to the underlying petgraph graph.
    pub fn nodes(&self) -> &StableGraph<GraphNode, FlowEdge, Directed, u32> {
        &self.nodes
    }

    pub fn variable_count(&self) -> usize {
        self.variables.len()
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.edge_count()
    }

    /// Variable names in declaration order.
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    /// Op names in declaration order.
    pub fn op_names(&self) -> impl Iterator<Item = &str> {
        self.ops.keys().map(String::as_str)
    }

    // -----------------------------------------------------------------------
    // Variable methods
    // -----------------------------------------------------------------------

    /// Adds a constant holding `value`.
    pub fn add_constant(&mut self, name: &str, value: Array) -> Result<NodeId, CoreError> {
        self.insert_variable(Variable::constant(name, value))
    }

    /// Adds a trainable parameter holding `value`.
    pub fn add_trainable(&mut self, name: &str, value: Array) -> Result<NodeId, CoreError> {
        self.insert_variable(Variable::trainable(name, value))
    }

    /// Adds a placeholder. When `dtype` is given, supplied values must match
    /// it exactly.
    pub fn add_placeholder(
        &mut self,
        name: &str,
        dtype: Option<DataType>,
    ) -> Result<NodeId, CoreError> {
        self.insert_variable(Variable::placeholder(name, dtype))
    }

    /// Declares the element type of a variable, creating a computed variable
    /// if the name is new. For a computed variable the declared type
    /// overrides the type inferred by its producer.
    pub fn declare_dtype(&mut self, name: &str, dtype: DataType) -> Result<NodeId, CoreError> {
        let id = match self.variables.get(name) {
            Some(&id) => id,
            None => self.insert_variable(Variable::computed(name))?,
        };
        if let Some(GraphNode::Variable(var)) = self.nodes.node_weight_mut(id.into()) {
            var.dtype = Some(dtype);
        }
        Ok(id)
    }

    fn insert_variable(&mut self, variable: Variable) -> Result<NodeId, CoreError> {
        if self.variables.contains_key(&variable.name) {
            return Err(CoreError::DuplicateVariable {
                name: variable.name,
            });
        }
        let name = variable.name.clone();
        let id = NodeId::from(self.nodes.add_node(GraphNode::Variable(variable)));
        self.variables.insert(name, id);
        Ok(id)
    }

    fn variable_or_computed(&mut self, name: &str) -> Result<NodeId, CoreError> {
        match self.variables.get(name) {
            Some(&id) => Ok(id),
            None => self.insert_variable(Variable::computed(name)),
        }
    }

    // -----------------------------------------------------------------------
    // Op methods
    // -----------------------------------------------------------------------

    /// Adds an op reading `inputs` (in argument order, repeats allowed) and
    /// producing `outputs` (in slot order).
    ///
    /// Missing input variables are created as computed variables. Output
    /// variables are created if missing; an existing output must be a
    /// computed variable without a producer.
    pub fn add_op(
        &mut self,
        name: &str,
        kind: OpKind,
        inputs: &[&str],
        outputs: &[&str],
    ) -> Result<NodeId, CoreError> {
        if self.ops.contains_key(name) {
            return Err(CoreError::DuplicateOp {
                name: name.to_string(),
            });
        }

        let (expected, accepts) = kind.arity();
        if !accepts(inputs.len(), outputs.len()) {
            return Err(CoreError::InvalidArity {
                op: name.to_string(),
                kind: kind.label(),
                expected,
                inputs: inputs.len(),
                outputs: outputs.len(),
            });
        }

        // Validate every output before touching the graph.
        for (slot, output) in outputs.iter().enumerate() {
            if outputs[..slot].contains(output) {
                return Err(CoreError::DuplicateProducer {
                    variable: output.to_string(),
                    existing: name.to_string(),
                });
            }
            if let Some(var) = self.variable(output) {
                if var.is_source() {
                    return Err(CoreError::NotProducible {
                        name: output.to_string(),
                    });
                }
            }
            if let Some((existing, _)) = self.producer_of(output) {
                return Err(CoreError::DuplicateProducer {
                    variable: output.to_string(),
                    existing: existing.to_string(),
                });
            }
        }

        let node = OpNode {
            name: name.to_string(),
            kind,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        };
        let op_idx = self.nodes.add_node(GraphNode::Op(node));
        self.ops.insert(name.to_string(), NodeId::from(op_idx));

        for (port, input) in inputs.iter().enumerate() {
            let var_idx: NodeIndex<u32> = self.variable_or_computed(input)?.into();
            self.nodes
                .add_edge(var_idx, op_idx, FlowEdge::Input { port: port as u16 });
        }
        for (slot, output) in outputs.iter().enumerate() {
            let var_idx: NodeIndex<u32> = self.variable_or_computed(output)?.into();
            self.nodes
                .add_edge(op_idx, var_idx, FlowEdge::Output { slot: slot as u16 });
        }

        Ok(NodeId::from(op_idx))
    }

    /// Convenience: adds an ordinary op backed by `op`.
    pub fn add_ordinary(
        &mut self,
        name: &str,
        op: impl Operation + 'static,
        inputs: &[&str],
        outputs: &[&str],
    ) -> Result<NodeId, CoreError> {
        self.add_op(name, OpKind::Ordinary(Arc::new(op)), inputs, outputs)
    }

    pub fn add_identity(&mut self, name: &str, input: &str, output: &str) -> Result<NodeId, CoreError> {
        self.add_op(name, OpKind::Identity, &[input], &[output])
    }

    /// Adds a `Switch` routing `value` to `if_true` or `if_false` depending on
    /// the scalar boolean `predicate`.
    pub fn add_switch(
        &mut self,
        name: &str,
        value: &str,
        predicate: &str,
        if_false: &str,
        if_true: &str,
    ) -> Result<NodeId, CoreError> {
        self.add_op(name, OpKind::Switch, &[value, predicate], &[if_false, if_true])
    }

    /// Adds an `Enter` into loop frame `frame`. With `is_constant`, `output`
    /// is a loop invariant readable from every iteration.
    pub fn add_enter(
        &mut self,
        name: &str,
        frame: &str,
        is_constant: bool,
        input: &str,
        output: &str,
    ) -> Result<NodeId, CoreError> {
        let kind = OpKind::Enter {
            frame: frame.to_string(),
            is_constant,
        };
        self.add_op(name, kind, &[input], &[output])
    }

    pub fn add_exit(&mut self, name: &str, input: &str, output: &str) -> Result<NodeId, CoreError> {
        self.add_op(name, OpKind::Exit, &[input], &[output])
    }

    pub fn add_next_iteration(
        &mut self,
        name: &str,
        input: &str,
        output: &str,
    ) -> Result<NodeId, CoreError> {
        self.add_op(name, OpKind::NextIteration, &[input], &[output])
    }

    pub fn add_merge(&mut self, name: &str, inputs: &[&str], output: &str) -> Result<NodeId, CoreError> {
        self.add_op(name, OpKind::Merge, inputs, &[output])
    }

    pub fn add_loop_cond(&mut self, name: &str, input: &str, output: &str) -> Result<NodeId, CoreError> {
        self.add_op(name, OpKind::LoopCond, &[input], &[output])
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn variable_id(&self, name: &str) -> Option<NodeId> {
        self.variables.get(name).copied()
    }

    pub fn op_id(&self, name: &str) -> Option<NodeId> {
        self.ops.get(name).copied()
    }

    /// Looks up a variable by name.
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variable_id(name).and_then(|id| self.get_variable(id))
    }

    /// Looks up an op by name.
    pub fn op(&self, name: &str) -> Option<&OpNode> {
        self.op_id(name).and_then(|id| self.get_op(id))
    }

    /// Looks up a variable node by ID. `None` if the node is an op.
    pub fn get_variable(&self, id: NodeId) -> Option<&Variable> {
        self.nodes
            .node_weight(id.into())
            .and_then(GraphNode::as_variable)
    }

    /// Looks up an op node by ID. `None` if the node is a variable.
    pub fn get_op(&self, id: NodeId) -> Option<&OpNode> {
        self.nodes.node_weight(id.into()).and_then(GraphNode::as_op)
    }

    fn require_op(&self, name: &str) -> Result<&OpNode, CoreError> {
        self.op(name).ok_or_else(|| CoreError::UnknownOp {
            name: name.to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Query contract
    // -----------------------------------------------------------------------

    /// Argument variable names of `op`, in argument order.
    pub fn inputs_of(&self, op: &str) -> Result<&[String], CoreError> {
        Ok(&self.require_op(op)?.inputs)
    }

    /// Output variable names of `op`, in slot order.
    pub fn outputs_of(&self, op: &str) -> Result<&[String], CoreError> {
        Ok(&self.require_op(op)?.outputs)
    }

    pub fn kind_of(&self, op: &str) -> Result<&OpKind, CoreError> {
        Ok(&self.require_op(op)?.kind)
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.variable(name)
            .is_some_and(|v| v.kind == VariableKind::Constant)
    }

    pub fn is_placeholder(&self, name: &str) -> bool {
        self.variable(name)
            .is_some_and(|v| v.kind == VariableKind::Placeholder)
    }

    /// Constants, placeholders and trainables.
    pub fn is_source(&self, name: &str) -> bool {
        self.variable(name).is_some_and(Variable::is_source)
    }

    /// The op producing `name` and the output slot, or `None` for sources
    /// and for computed variables nothing produces.
    pub fn producer_of(&self, name: &str) -> Option<(&str, usize)> {
        let idx: NodeIndex<u32> = self.variable_id(name)?.into();
        self.nodes
            .edges_directed(idx, Direction::Incoming)
            .find_map(|edge| match edge.weight() {
                FlowEdge::Output { slot } => self
                    .nodes
                    .node_weight(edge.source())
                    .and_then(GraphNode::as_op)
                    .map(|op| (op.name.as_str(), *slot as usize)),
                FlowEdge::Input { .. } => None,
            })
    }

    /// Distinct ops that read `name`, in declaration order.
    pub fn consumers_of(&self, name: &str) -> Vec<&str> {
        let Some(id) = self.variable_id(name) else {
            return Vec::new();
        };
        let mut consumers: Vec<NodeId> = self
            .nodes
            .edges_directed(id.into(), Direction::Outgoing)
            .filter(|edge| edge.weight().is_input())
            .map(|edge| NodeId::from(edge.target()))
            .collect();
        consumers.sort();
        consumers.dedup();
        consumers
            .into_iter()
            .filter_map(|id| self.get_op(id))
            .map(|op| op.name.as_str())
            .collect()
    }

    /// Checks graph-wide invariants that the builder cannot check
    /// incrementally: every computed variable must have a producer.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (name, &id) in &self.variables {
            let Some(var) = self.get_variable(id) else {
                return Err(CoreError::NodeNotFound { id });
            };
            if !var.is_source() && self.producer_of(name).is_none() {
                return Err(CoreError::DanglingVariable { name: name.clone() });
            }
        }
        Ok(())
    }
}
