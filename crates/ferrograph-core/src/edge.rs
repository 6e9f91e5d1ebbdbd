//! Edge types for the dataflow graph.
//!
//! The graph is bipartite: variables feed ops through [`FlowEdge::Input`]
//! edges and ops produce variables through [`FlowEdge::Output`] edges. Loops
//! make the graph cyclic (`NextIteration` feeds a `Merge` upstream of it).

use serde::{Deserialize, Serialize};

/// Edge between a variable node and an op node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEdge {
    /// Variable → op. `port` is the argument position; an op that reads the
    /// same variable twice has two edges from it.
    Input { port: u16 },
    /// Op → variable. `slot` is the output position.
    Output { slot: u16 },
}

impl FlowEdge {
    pub fn is_input(&self) -> bool {
        matches!(self, FlowEdge::Input { .. })
    }

    pub fn is_output(&self) -> bool {
        matches!(self, FlowEdge::Output { .. })
    }
}
