pub mod array;
pub mod edge;
pub mod error;
pub mod frame;
pub mod graph;
pub mod id;
pub mod memory;
pub mod node;
pub mod op;
pub mod ops;
pub mod types;

// Re-export commonly used types
pub use array::{Allocation, Array, ArrayData, PoolTicket};
pub use edge::FlowEdge;
pub use error::{CoreError, MemoryError, OpError};
pub use frame::{FrameIter, VarId, OUTER_FRAME};
pub use graph::Graph;
pub use id::NodeId;
pub use memory::{
    with_pooled_scope, AllocationClass, DetachedMemoryManager, MemoryManager, PoolStats,
    PooledScope, WorkspaceMemoryManager,
};
pub use node::{GraphNode, OpKind, OpNode, Variable, VariableKind};
pub use op::{ExecutionContext, Operation};
pub use ops::{ArithOp, BinaryArith, CmpOp, Compare};
pub use types::{ArrayDescriptor, DataType, Shape};
