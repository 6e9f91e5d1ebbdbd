//! Core error types for ferrograph-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering graph
//! construction ([`CoreError`]), the op capability contract ([`OpError`]) and
//! array allocation ([`MemoryError`]).

use thiserror::Error;

use crate::id::NodeId;

/// Errors produced while building or querying a [`Graph`](crate::graph::Graph).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A variable with this name already exists.
    #[error("duplicate variable name: '{name}'")]
    DuplicateVariable { name: String },

    /// An op with this name already exists.
    #[error("duplicate op name: '{name}'")]
    DuplicateOp { name: String },

    /// A variable name was not found in the graph.
    #[error("variable not found: '{name}'")]
    UnknownVariable { name: String },

    /// An op name was not found in the graph.
    #[error("op not found: '{name}'")]
    UnknownOp { name: String },

    /// A computed variable already has a producing op.
    #[error("variable '{variable}' is already produced by op '{existing}'")]
    DuplicateProducer { variable: String, existing: String },

    /// An op was declared with the wrong number of inputs or outputs.
    #[error("op '{op}' ({kind}) expects {expected}, got {inputs} input(s) and {outputs} output(s)")]
    InvalidArity {
        op: String,
        kind: &'static str,
        expected: &'static str,
        inputs: usize,
        outputs: usize,
    },

    /// A computed variable is referenced but never produced by any op.
    #[error("variable '{name}' is consumed but never produced")]
    DanglingVariable { name: String },

    /// An op tried to output into a constant, placeholder or trainable variable.
    #[error("variable '{name}' is a source and cannot be an op output")]
    NotProducible { name: String },

    /// Array data length does not match the element count of its shape.
    #[error("array data has {len} element(s), shape {shape:?} needs {expected}")]
    DataLength {
        shape: Vec<usize>,
        expected: usize,
        len: usize,
    },

    /// A node index was not found in the graph.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },
}

/// Errors surfaced by an [`Operation`](crate::op::Operation) implementation.
///
/// The session propagates these verbatim, wrapped with the failing op
/// instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpError {
    /// The op could not compute output descriptors from its inputs.
    #[error("shape inference failed for '{op}': {reason}")]
    ShapeInference { op: String, reason: String },

    /// The op failed while computing its outputs.
    #[error("execution of '{op}' failed: {reason}")]
    Execution { op: String, reason: String },

    /// Scratch memory could not be obtained.
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Errors produced by a [`MemoryManager`](crate::memory::MemoryManager).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// The manager has been closed and no longer hands out arrays.
    #[error("memory manager is closed")]
    Closed,
}
