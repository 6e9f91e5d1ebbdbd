//! Session executor for dataflow graphs with frame-based control flow.
//!
//! Executes the subgraph needed for a set of requested variables, given
//! placeholder values, and returns the requested arrays.
//!
//! # Architecture
//!
//! - [`Session`] holds the shared graph and memory manager plus state kept
//!   across calls (destination cache, last trace, [`SessionConfig`]).
//! - [`Subgraph`] selects the ops a call needs by walking producer edges
//!   back from the requested variables.
//! - [`InstanceTable`] interns op instances, one per (op, frame, iteration),
//!   behind [`OpInstanceId`] handles.
//! - [`DependencyTracker`](crate::tracker::DependencyTracker) decides which
//!   instance runs next. `Merge` waits for any input, everything else for
//!   all inputs.
//! - [`ResultsStore`] holds computed values by [`VarId`] and releases each
//!   one after its last reader.
//! - [`dispatch`] routes control-flow kinds between frames and runs
//!   ordinary ops through shape inference and in-place execution.
//! - [`ExecError`] aborts a call; nothing partial is returned.
//! - [`TraceEntry`] records each executed instance when tracing is enabled.
//!
//! # Usage
//!
//! ```ignore
//! let mut session = Session::with_graph(graph.into_shared());
//! let mut feeds = HashMap::new();
//! feeds.insert("x".to_string(), Array::vector_f32(&[1.0, 2.0]));
//! let outputs = session.execute(&["z"], &feeds)?;
//! ```
//!
//! [`VarId`]: ferrograph_core::frame::VarId

pub mod dispatch;
pub mod error;
pub mod instance;
pub mod results;
pub mod state;
pub mod subgraph;
pub mod trace;

pub use dispatch::DestinationCache;
pub use error::ExecError;
pub use instance::{Dep, InstanceTable, OpInstance, OpInstanceId};
pub use results::ResultsStore;
pub use state::{Session, SessionConfig};
pub use subgraph::Subgraph;
pub use trace::TraceEntry;
