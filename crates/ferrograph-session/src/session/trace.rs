//! Execution trace recording for the session executor.
//!
//! When tracing is enabled via [`SessionConfig::trace_enabled`], the session
//! records a [`TraceEntry`] for every op instance it executes, in execution
//! order.
//!
//! [`SessionConfig::trace_enabled`]: super::SessionConfig::trace_enabled

use ferrograph_core::frame::{FrameIter, VarId};

use super::instance::{Dep, OpInstanceId};

/// A single entry in the execution trace, recording one op instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// Handle of the executed instance within its call.
    pub instance: OpInstanceId,
    /// Graph name of the op.
    pub op: String,
    /// Op kind label, e.g. `"switch"` or `"ordinary"`.
    pub kind: &'static str,
    /// Frame and iteration the instance ran in.
    pub frame: FrameIter,
    /// Distinct inputs in argument order.
    pub inputs: Vec<Dep>,
    /// Values stored by the instance. Outputs nothing reads are not listed.
    pub outputs: Vec<VarId>,
}

impl TraceEntry {
    /// `op@frame:iteration`.
    pub fn label(&self) -> String {
        format!("{}@{}", self.op, self.frame)
    }
}
