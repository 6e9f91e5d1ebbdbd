pub mod session;
pub mod tracker;

// Re-export commonly used types
pub use session::{ExecError, Session, SessionConfig, TraceEntry};
pub use tracker::{DependencyTracker, SatisfactionMode, TrackerError};
