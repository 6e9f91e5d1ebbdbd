//! Execution errors for the session executor.
//!
//! Every variant aborts the current call. Op instances are identified as
//! `op@frame:iteration` so a failure inside a loop names the iteration that
//! broke.

use ferrograph_core::error::{CoreError, MemoryError, OpError};
use ferrograph_core::types::{ArrayDescriptor, DataType};
use thiserror::Error;

use crate::tracker::TrackerError;

/// Errors produced by [`Session::execute`](super::Session::execute).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("unknown variable: '{name}'")]
    UnknownVariable { name: String },

    #[error("placeholder '{name}' requires a value but none was supplied")]
    MissingPlaceholder { name: String },

    #[error("placeholder '{name}' declares {expected}, supplied value is {actual}")]
    PlaceholderTypeMismatch {
        name: String,
        expected: DataType,
        actual: DataType,
    },

    #[error("invalid predicate at {instance}: expected a bool scalar, got {got}")]
    InvalidPredicate {
        instance: String,
        got: ArrayDescriptor,
    },

    #[error("invariant violation at {instance}: {reason}")]
    InvariantViolation { instance: String, reason: String },

    #[error(
        "graph cannot make progress: missing [{}], waiting [{}]",
        .missing.join(", "),
        .pending.join(", ")
    )]
    UnresolvableGraph {
        /// Requested values that were never produced.
        missing: Vec<String>,
        /// Instances still waiting on dependencies.
        pending: Vec<String>,
    },

    #[error("shape inference failed at {instance}")]
    ShapeInference { instance: String, source: OpError },

    #[error("op execution failed at {instance}")]
    OpExecution { instance: String, source: OpError },

    #[error("illegal state at {instance}: {reason}")]
    IllegalState { instance: String, reason: String },

    #[error("iteration limit ({limit}) exceeded in frame '{frame}'")]
    IterationLimitExceeded { frame: String, limit: u32 },

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Graph(#[from] CoreError),
}
