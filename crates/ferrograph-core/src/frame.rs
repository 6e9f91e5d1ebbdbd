//! Address model: which concrete value of a variable is meant.
//!
//! A graph variable can hold many values during one execution when it lives
//! inside a loop. [`FrameIter`] names the control-flow context (loop frame and
//! iteration, plus the enclosing context) and [`VarId`] pairs a variable name
//! with one such context.
//!
//! Both are plain values with structural equality. The parent context takes
//! part in equality, so iteration 0 of an inner loop entered during outer
//! iteration 1 is a different context from the one entered during outer
//! iteration 2.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the root execution frame.
pub const OUTER_FRAME: &str = "main";

/// A loop frame plus iteration counter, with the context it was entered from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameIter {
    /// Frame name. [`OUTER_FRAME`] for the root context.
    pub frame: String,
    /// Iteration within the frame, starting at 0.
    pub iteration: u32,
    /// The context this frame was entered from. `None` only for the root.
    pub parent: Option<Box<FrameIter>>,
}

impl FrameIter {
    /// The root context: `main`, iteration 0, no parent.
    pub fn outer() -> Self {
        FrameIter {
            frame: OUTER_FRAME.to_string(),
            iteration: 0,
            parent: None,
        }
    }

    /// Creates a context with an explicit parent.
    pub fn new(frame: impl Into<String>, iteration: u32, parent: Option<FrameIter>) -> Self {
        FrameIter {
            frame: frame.into(),
            iteration,
            parent: parent.map(Box::new),
        }
    }

    /// Returns `true` for the root context (no enclosing frame).
    pub fn is_outer(&self) -> bool {
        self.parent.is_none()
    }

    /// The context produced by entering loop frame `frame` from `self`.
    pub fn enter(&self, frame: &str) -> FrameIter {
        FrameIter {
            frame: frame.to_string(),
            iteration: 0,
            parent: Some(Box::new(self.clone())),
        }
    }

    /// Same frame, next iteration.
    pub fn next_iteration(&self) -> FrameIter {
        FrameIter {
            frame: self.frame.clone(),
            iteration: self.iteration + 1,
            parent: self.parent.clone(),
        }
    }

    /// Same frame, iteration 0.
    pub fn first_iteration(&self) -> FrameIter {
        FrameIter {
            frame: self.frame.clone(),
            iteration: 0,
            parent: self.parent.clone(),
        }
    }

    /// The enclosing context, or `None` for the root.
    pub fn parent_frame(&self) -> Option<&FrameIter> {
        self.parent.as_deref()
    }

    /// Returns `true` if both contexts are the same frame instance, ignoring
    /// the iteration counter.
    pub fn same_frame(&self, other: &FrameIter) -> bool {
        self.frame == other.frame && self.parent == other.parent
    }

    /// Loop nesting depth; 0 for the root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent_frame();
        while let Some(frame) = current {
            depth += 1;
            current = frame.parent_frame();
        }
        depth
    }
}

impl Default for FrameIter {
    fn default() -> Self {
        FrameIter::outer()
    }
}

impl fmt::Display for FrameIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.frame, self.iteration)?;
        if let Some(parent) = self.parent_frame() {
            if !parent.is_outer() {
                write!(f, " <- {}", parent)?;
            }
        }
        Ok(())
    }
}

/// One concrete value of a named variable in one control-flow context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarId {
    pub name: String,
    pub frame: FrameIter,
}

impl VarId {
    pub fn new(name: impl Into<String>, frame: FrameIter) -> Self {
        VarId {
            name: name.into(),
            frame,
        }
    }

    /// The value of `name` in the root context.
    pub fn outer(name: impl Into<String>) -> Self {
        VarId::new(name, FrameIter::outer())
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.frame)
    }
}
