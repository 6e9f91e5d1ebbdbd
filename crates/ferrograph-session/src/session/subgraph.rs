//! Subgraph selection: the part of the graph a call actually needs.
//!
//! Starting from the requested variables, the selection walks producer
//! edges backwards until it reaches sources. Loops are walked like any other
//! cycle: every op feeding a requested value, directly or through a
//! `NextIteration`, is included once.
//!
//! Besides membership, the selection precomputes what the driver asks for
//! on every step: the consumers of each variable inside the subgraph, the
//! seed ops (all inputs are sources), and for each loop frame the ops whose
//! only non-source inputs are loop invariants of that frame.

use std::collections::HashMap;

use indexmap::IndexSet;
use petgraph::visit::{Dfs, Reversed};

use ferrograph_core::array::Array;
use ferrograph_core::frame::{FrameIter, VarId};
use ferrograph_core::graph::Graph;
use ferrograph_core::id::NodeId;
use ferrograph_core::node::{OpKind, VariableKind};

use super::error::ExecError;
use super::instance::Dep;

#[derive(Debug, Default)]
pub struct Subgraph {
    /// Sources in declaration order.
    sources: Vec<String>,
    /// Variable name to the distinct subgraph ops reading it.
    consumers: HashMap<String, Vec<NodeId>>,
    /// Loop-invariant variable name to its loop frame name.
    invariants: HashMap<String, String>,
    /// Ops whose inputs are all sources.
    seeds: Vec<NodeId>,
    /// Frame name to the ops that read only sources and that frame's
    /// invariants.
    invariant_only: HashMap<String, Vec<NodeId>>,
}

impl Subgraph {
    /// Selects everything needed to compute `requested`.
    pub fn select<'a>(
        graph: &Graph,
        requested: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, ExecError> {
        let nodes = Reversed(graph.nodes());
        let mut dfs = Dfs::empty(nodes);
        for name in requested {
            let start = graph
                .variable_id(name)
                .ok_or_else(|| ExecError::UnknownVariable {
                    name: name.to_string(),
                })?;
            dfs.move_to(start.into());
            while dfs.next(nodes).is_some() {}
        }
        let reached = |id: NodeId| dfs.discovered.contains(id.0 as usize);

        let mut subgraph = Subgraph::default();
        for name in graph.variable_names() {
            let Some(id) = graph.variable_id(name) else {
                continue;
            };
            if !reached(id) {
                continue;
            }
            if graph.is_source(name) {
                subgraph.sources.push(name.to_string());
            }
            if let Some((producer, _)) = graph.producer_of(name) {
                if let Ok(OpKind::Enter {
                    frame,
                    is_constant: true,
                }) = graph.kind_of(producer)
                {
                    subgraph.invariants.insert(name.to_string(), frame.clone());
                }
            }
        }

        for name in graph.op_names() {
            let Some(id) = graph.op_id(name) else {
                continue;
            };
            if !reached(id) {
                continue;
            }
            let inputs = graph.inputs_of(name)?;
            let distinct: IndexSet<&str> = inputs.iter().map(String::as_str).collect();
            for input in &distinct {
                subgraph
                    .consumers
                    .entry(input.to_string())
                    .or_default()
                    .push(id);
            }

            let computed: Vec<&str> = distinct
                .iter()
                .copied()
                .filter(|input| !graph.is_source(input))
                .collect();
            if computed.is_empty() {
                subgraph.seeds.push(id);
                continue;
            }
            let frames: IndexSet<Option<&String>> = computed
                .iter()
                .map(|input| subgraph.invariants.get(*input))
                .collect();
            if frames.len() != 1 {
                continue;
            }
            if let Some(Some(frame)) = frames.first() {
                let frame = (*frame).clone();
                subgraph.invariant_only.entry(frame).or_default().push(id);
            }
        }

        Ok(subgraph)
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn seeds(&self) -> &[NodeId] {
        &self.seeds
    }

    /// Distinct subgraph ops reading `name`, in declaration order.
    pub fn consumers_of(&self, name: &str) -> &[NodeId] {
        self.consumers.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `name` is the output of a loop-invariant `Enter`.
    pub fn is_invariant(&self, name: &str) -> bool {
        self.invariants.contains_key(name)
    }

    /// Ops to activate when an iteration of loop frame `frame` is first
    /// observed.
    pub fn invariant_only(&self, frame: &str) -> &[NodeId] {
        self.invariant_only
            .get(frame)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The dependency an op instance running in `consumer` has on `name`.
    ///
    /// Sources resolve to themselves. A loop invariant read from inside its
    /// own frame resolves to iteration 0 of the reading context. Anything
    /// else resolves in the reader's own frame and iteration.
    pub fn resolve(&self, graph: &Graph, name: &str, consumer: &FrameIter) -> Dep {
        if graph.is_source(name) {
            return Dep::Source(name.to_string());
        }
        match self.invariants.get(name) {
            Some(frame) if !consumer.is_outer() && *frame == consumer.frame => {
                Dep::Var(VarId::new(name, consumer.first_iteration()))
            }
            _ => Dep::Var(VarId::new(name, consumer.clone())),
        }
    }

    /// Checks that every placeholder in the subgraph has a value of the
    /// declared dtype.
    pub fn check_placeholders(
        &self,
        graph: &Graph,
        placeholders: &HashMap<String, Array>,
    ) -> Result<(), ExecError> {
        for name in &self.sources {
            let Some(var) = graph.variable(name) else {
                continue;
            };
            if var.kind != VariableKind::Placeholder {
                continue;
            }
            let value = placeholders
                .get(name)
                .ok_or_else(|| ExecError::MissingPlaceholder { name: name.clone() })?;
            if let Some(expected) = var.dtype {
                if value.dtype() != expected {
                    return Err(ExecError::PlaceholderTypeMismatch {
                        name: name.clone(),
                        expected,
                        actual: value.dtype(),
                    });
                }
            }
        }
        Ok(())
    }
}
