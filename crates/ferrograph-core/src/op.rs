//! The op capability contract.
//!
//! The executor treats every ordinary op as an opaque [`Operation`]: it asks
//! the op for output descriptors given input descriptors, obtains the output
//! arrays itself, and then lets the op fill them in place. Argument names and
//! output names live in the graph, not in the op.
//!
//! Each call receives an [`ExecutionContext`] identifying the op instance
//! being run and lending scratch memory from the current pooled scope. There
//! is no global executioner; everything an op may touch is passed in.

use std::fmt;

use crate::array::Array;
use crate::error::OpError;
use crate::frame::FrameIter;
use crate::memory::PooledScope;
use crate::types::ArrayDescriptor;

/// An executable op kernel.
pub trait Operation: fmt::Debug + Send + Sync {
    /// Kernel name, e.g. `"add"`. Used in diagnostics.
    fn op_name(&self) -> &str;

    /// Computes output descriptors from input descriptors, in output order.
    fn infer_output_shapes(
        &self,
        inputs: &[ArrayDescriptor],
    ) -> Result<Vec<ArrayDescriptor>, OpError>;

    /// Computes outputs into `outputs`, which are already allocated to the
    /// descriptors returned by [`infer_output_shapes`](Self::infer_output_shapes).
    fn execute_in_place(
        &self,
        ctx: &mut ExecutionContext<'_, '_>,
        inputs: &[&Array],
        outputs: &mut [Array],
    ) -> Result<(), OpError>;
}

/// Per-call handle passed to [`Operation::execute_in_place`].
pub struct ExecutionContext<'a, 'm> {
    op_name: &'a str,
    frame: &'a FrameIter,
    scope: &'a mut PooledScope<'m>,
}

impl<'a, 'm> ExecutionContext<'a, 'm> {
    pub fn new(op_name: &'a str, frame: &'a FrameIter, scope: &'a mut PooledScope<'m>) -> Self {
        ExecutionContext {
            op_name,
            frame,
            scope,
        }
    }

    /// Graph name of the op being executed.
    pub fn op_name(&self) -> &str {
        self.op_name
    }

    /// Frame and iteration of the op instance being executed.
    pub fn frame(&self) -> &FrameIter {
        self.frame
    }

    /// Borrows pooled scratch memory, released when the call returns.
    pub fn scratch(&mut self, descriptor: &ArrayDescriptor) -> Result<Array, OpError> {
        Ok(self.scope.allocate(descriptor)?)
    }

    /// Hands scratch back so its buffer returns to the pool. Scratch that is
    /// simply dropped is not recycled.
    pub fn reclaim(&mut self, scratch: Array) {
        self.scope.reclaim(scratch);
    }
}

impl fmt::Debug for ExecutionContext<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("op_name", &self.op_name)
            .field("frame", &self.frame)
            .field("scratch_borrowed", &self.scope.borrowed_count())
            .finish()
    }
}
