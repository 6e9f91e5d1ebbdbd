//! Op instances and the dependency items they wait on.
//!
//! An op instance is one execution of a graph op in one [`FrameIter`]. Loop
//! bodies run the same op once per iteration, so instances are created on
//! demand and interned in an [`InstanceTable`] arena that hands out small
//! copyable [`OpInstanceId`] handles for the tracker to key on.

use std::collections::HashMap;
use std::fmt;

use ferrograph_core::frame::{FrameIter, VarId};
use ferrograph_core::id::NodeId;
use serde::{Deserialize, Serialize};

/// Handle to an interned op instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpInstanceId(pub u32);

impl fmt::Display for OpInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One execution of an op in one frame and iteration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OpInstance {
    pub op: NodeId,
    pub frame: FrameIter,
}

/// Something an op instance can wait on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dep {
    /// A computed value in one frame and iteration.
    Var(VarId),
    /// A constant, placeholder or trainable. Available in every frame.
    Source(String),
}

impl Dep {
    pub fn name(&self) -> &str {
        match self {
            Dep::Var(id) => &id.name,
            Dep::Source(name) => name,
        }
    }
}

impl fmt::Display for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dep::Var(id) => write!(f, "{}", id),
            Dep::Source(name) => write!(f, "{}", name),
        }
    }
}

/// Arena of op instances, interned by (op, frame).
#[derive(Debug, Default)]
pub struct InstanceTable {
    instances: Vec<OpInstance>,
    index: HashMap<OpInstance, OpInstanceId>,
}

impl InstanceTable {
    pub fn new() -> Self {
        InstanceTable::default()
    }

    /// Returns the handle for `op` in `frame`, creating it if needed. The
    /// flag is `true` when the instance was created by this call.
    pub fn intern(&mut self, op: NodeId, frame: FrameIter) -> (OpInstanceId, bool) {
        let key = OpInstance { op, frame };
        if let Some(&id) = self.index.get(&key) {
            return (id, false);
        }
        let id = OpInstanceId(self.instances.len() as u32);
        self.instances.push(key.clone());
        self.index.insert(key, id);
        (id, true)
    }

    pub fn get(&self, id: OpInstanceId) -> Option<&OpInstance> {
        self.instances.get(id.0 as usize)
    }

    #[cfg(test)]
    fn lookup(&self, op: NodeId, frame: &FrameIter) -> Option<OpInstanceId> {
        self.index
            .get(&OpInstance {
                op,
                frame: frame.clone(),
            })
            .copied()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_stable() {
        let mut table = InstanceTable::new();
        let looped = FrameIter::outer().enter("while");

        let (a, created) = table.intern(NodeId(3), FrameIter::outer());
        assert!(created);
        let (b, created) = table.intern(NodeId(3), looped.clone());
        assert!(created);
        let (again, created) = table.intern(NodeId(3), FrameIter::outer());
        assert!(!created);

        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(b).unwrap().frame, looped);
        assert_eq!(table.lookup(NodeId(3), &looped), Some(b));
        assert_eq!(table.lookup(NodeId(4), &looped), None);
    }

    #[test]
    fn iterations_are_distinct_instances() {
        let mut table = InstanceTable::new();
        let first = FrameIter::outer().enter("while");
        let (a, _) = table.intern(NodeId(0), first.clone());
        let (b, _) = table.intern(NodeId(0), first.next_iteration());
        assert_ne!(a, b);
    }

    #[test]
    fn dep_display() {
        assert_eq!(Dep::Source("x".into()).to_string(), "x");
        let var = Dep::Var(VarId::outer("z"));
        assert_eq!(var.to_string(), "z@main:0");
        assert_eq!(var.name(), "z");
        assert_eq!(Dep::Source("x".into()).name(), "x");
    }
}
