//! Node payloads of the dataflow graph.
//!
//! A [`GraphNode`] is either a [`Variable`] (a named value) or an [`OpNode`]
//! (an operation with ordered input and output variable names). The op's
//! behavior is selected by the closed [`OpKind`] variant: one ordinary kind
//! wrapping an [`Operation`] kernel, and seven control-flow kinds handled by
//! the executor itself.

use std::fmt;
use std::sync::Arc;

use crate::array::Array;
use crate::op::Operation;
use crate::types::DataType;

// ---------------------------------------------------------------------------
// Variables
// ---------------------------------------------------------------------------

/// What kind of value a variable holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    /// Fixed value stored in the graph.
    Constant,
    /// Supplied by the caller on every execution.
    Placeholder,
    /// Graph-owned parameter array.
    Trainable,
    /// Produced by an op output.
    Computed,
}

impl VariableKind {
    /// Sources are available in every frame without being computed.
    pub fn is_source(&self) -> bool {
        !matches!(self, VariableKind::Computed)
    }
}

/// A named graph value.
#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
    /// Declared element type. For computed variables this overrides the
    /// dtype inferred by the producing op.
    pub dtype: Option<DataType>,
    /// Stored value for constants and trainables.
    pub value: Option<Array>,
}

impl Variable {
    pub fn constant(name: impl Into<String>, value: Array) -> Self {
        Variable {
            name: name.into(),
            kind: VariableKind::Constant,
            dtype: Some(value.dtype()),
            value: Some(value),
        }
    }

    pub fn trainable(name: impl Into<String>, value: Array) -> Self {
        Variable {
            name: name.into(),
            kind: VariableKind::Trainable,
            dtype: Some(value.dtype()),
            value: Some(value),
        }
    }

    pub fn placeholder(name: impl Into<String>, dtype: Option<DataType>) -> Self {
        Variable {
            name: name.into(),
            kind: VariableKind::Placeholder,
            dtype,
            value: None,
        }
    }

    pub fn computed(name: impl Into<String>) -> Self {
        Variable {
            name: name.into(),
            kind: VariableKind::Computed,
            dtype: None,
            value: None,
        }
    }

    pub fn is_source(&self) -> bool {
        self.kind.is_source()
    }
}

// ---------------------------------------------------------------------------
// Ops
// ---------------------------------------------------------------------------

/// The closed set of op behaviors the executor dispatches on.
#[derive(Clone)]
pub enum OpKind {
    /// A kernel with shape inference and in-place execution.
    Ordinary(Arc<dyn Operation>),
    /// Forwards its single input unchanged.
    Identity,
    /// Routes `inputs[0]` to output slot 1 when the predicate `inputs[1]` is
    /// true, slot 0 when false.
    Switch,
    /// Forwards its input into iteration 0 of loop frame `frame`. With
    /// `is_constant`, the value is a loop invariant visible to every
    /// iteration of that frame.
    Enter { frame: String, is_constant: bool },
    /// Forwards its input to the enclosing frame.
    Exit,
    /// Forwards its input to the next iteration of the same frame.
    NextIteration,
    /// Forwards whichever of its inputs is available.
    Merge,
    /// Forwards a scalar boolean loop predicate.
    LoopCond,
}

impl OpKind {
    /// Short lowercase label for diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            OpKind::Ordinary(_) => "ordinary",
            OpKind::Identity => "identity",
            OpKind::Switch => "switch",
            OpKind::Enter { .. } => "enter",
            OpKind::Exit => "exit",
            OpKind::NextIteration => "next_iteration",
            OpKind::Merge => "merge",
            OpKind::LoopCond => "loop_cond",
        }
    }

    pub fn is_control_flow(&self) -> bool {
        !matches!(self, OpKind::Ordinary(_))
    }

    /// Returns `true` for an `Enter` that publishes a loop invariant.
    pub fn is_constant_enter(&self) -> bool {
        matches!(
            self,
            OpKind::Enter {
                is_constant: true,
                ..
            }
        )
    }

    /// Accepted (inputs, outputs) arity as a human-readable rule, and a
    /// check against it.
    pub(crate) fn arity(&self) -> (&'static str, fn(usize, usize) -> bool) {
        match self {
            OpKind::Ordinary(_) => ("any number of inputs and outputs", |_, _| true),
            OpKind::Identity
            | OpKind::Enter { .. }
            | OpKind::Exit
            | OpKind::NextIteration
            | OpKind::LoopCond => ("1 input and 1 output", |i, o| i == 1 && o == 1),
            OpKind::Switch => ("2 inputs and 2 outputs", |i, o| i == 2 && o == 2),
            OpKind::Merge => ("at least 1 input and 1 output", |i, o| i >= 1 && o == 1),
        }
    }
}

impl fmt::Debug for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Ordinary(op) => write!(f, "Ordinary({})", op.op_name()),
            OpKind::Enter { frame, is_constant } => f
                .debug_struct("Enter")
                .field("frame", frame)
                .field("is_constant", is_constant)
                .finish(),
            OpKind::Identity => write!(f, "Identity"),
            OpKind::Switch => write!(f, "Switch"),
            OpKind::Exit => write!(f, "Exit"),
            OpKind::NextIteration => write!(f, "NextIteration"),
            OpKind::Merge => write!(f, "Merge"),
            OpKind::LoopCond => write!(f, "LoopCond"),
        }
    }
}

/// An op with its ordered argument and output variable names.
#[derive(Debug, Clone)]
pub struct OpNode {
    pub name: String,
    pub kind: OpKind,
    /// Argument variable names in argument order. May repeat.
    pub inputs: Vec<String>,
    /// Output variable names in slot order.
    pub outputs: Vec<String>,
}

/// A node of the graph: a variable or an op.
#[derive(Debug, Clone)]
pub enum GraphNode {
    Variable(Variable),
    Op(OpNode),
}

impl GraphNode {
    pub fn as_variable(&self) -> Option<&Variable> {
        match self {
            GraphNode::Variable(v) => Some(v),
            GraphNode::Op(_) => None,
        }
    }

    pub fn as_op(&self) -> Option<&OpNode> {
        match self {
            GraphNode::Op(op) => Some(op),
            GraphNode::Variable(_) => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            GraphNode::Variable(v) => &v.name,
            GraphNode::Op(op) => &op.name,
        }
    }
}
