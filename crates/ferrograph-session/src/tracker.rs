//! Generic dependency tracker with AND/OR satisfaction rules.
//!
//! A [`DependencyTracker`] answers one question for the executor: which
//! targets have everything they need? Targets declare groups of required
//! items; items are marked satisfied as they become available; targets whose
//! every group holds move to a FIFO ready queue.
//!
//! - [`SatisfactionMode::All`]: every item of the group must be satisfied.
//!   An empty `All` group holds immediately.
//! - [`SatisfactionMode::Any`]: one satisfied item is enough. An empty `Any`
//!   group never holds.
//!
//! Targets made ready by the same [`mark_satisfied`](DependencyTracker::mark_satisfied)
//! call are queued in the order they were first declared, so a fixed
//! sequence of calls always pops targets in the same order.
//!
//! The tracker never detects unsatisfiable declarations. A caller that finds
//! [`pop_ready`](DependencyTracker::pop_ready) returning `Ok(None)` while it
//! still expects work has a graph that cannot make progress.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a group of required items is satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SatisfactionMode {
    /// Every item must be satisfied.
    All,
    /// At least one item must be satisfied.
    Any,
}

/// Misuse of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// `pop_ready` was called with nothing pending and nothing queued.
    #[error("dependency tracker has no pending or ready targets")]
    NotReady,

    /// A target was declared again after it had been popped.
    #[error("target was already popped and cannot receive new dependencies")]
    Retired,
}

#[derive(Debug, Clone)]
struct Requirement<D> {
    mode: SatisfactionMode,
    items: IndexSet<D>,
}

impl<D: Eq + Hash> Requirement<D> {
    fn is_met(&self, satisfied: &HashSet<D>) -> bool {
        match self.mode {
            SatisfactionMode::All => self.items.iter().all(|d| satisfied.contains(d)),
            SatisfactionMode::Any => self.items.iter().any(|d| satisfied.contains(d)),
        }
    }
}

#[derive(Debug, Clone)]
struct TargetState<D> {
    /// Declaration sequence number; orders targets readied together.
    seq: u64,
    requirements: Vec<Requirement<D>>,
    /// Whether the target currently sits in the ready queue.
    queued: bool,
}

impl<D: Eq + Hash> TargetState<D> {
    fn is_met(&self, satisfied: &HashSet<D>) -> bool {
        self.requirements.iter().all(|r| r.is_met(satisfied))
    }
}

/// Tracks which targets `T` have their required items `D` satisfied.
#[derive(Debug, Clone)]
pub struct DependencyTracker<T, D> {
    satisfied: HashSet<D>,
    /// Declared targets that have not been popped yet, queued or not.
    targets: HashMap<T, TargetState<D>>,
    /// Reverse index: unsatisfied item to the targets waiting on it.
    waiting: HashMap<D, Vec<T>>,
    ready: VecDeque<T>,
    retired: HashSet<T>,
    next_seq: u64,
}

impl<T, D> Default for DependencyTracker<T, D> {
    fn default() -> Self {
        DependencyTracker {
            satisfied: HashSet::new(),
            targets: HashMap::new(),
            waiting: HashMap::new(),
            ready: VecDeque::new(),
            retired: HashSet::new(),
            next_seq: 0,
        }
    }
}

impl<T, D> DependencyTracker<T, D>
where
    T: Clone + Eq + Hash,
    D: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        DependencyTracker::default()
    }

    /// Registers that `target` needs `required` under `mode`.
    ///
    /// Several declarations for one target accumulate; the target is ready
    /// once every declared group holds. Items that are already satisfied
    /// count immediately.
    pub fn declare_dependencies<I>(
        &mut self,
        target: T,
        required: I,
        mode: SatisfactionMode,
    ) -> Result<(), TrackerError>
    where
        I: IntoIterator<Item = D>,
    {
        if self.retired.contains(&target) {
            return Err(TrackerError::Retired);
        }

        let requirement = Requirement {
            mode,
            items: required.into_iter().collect(),
        };
        let met = requirement.is_met(&self.satisfied);
        if !met {
            for item in &requirement.items {
                if !self.satisfied.contains(item) {
                    self.waiting
                        .entry(item.clone())
                        .or_default()
                        .push(target.clone());
                }
            }
        }

        let next_seq = &mut self.next_seq;
        let state = self.targets.entry(target.clone()).or_insert_with(|| {
            let seq = *next_seq;
            *next_seq += 1;
            TargetState {
                seq,
                requirements: Vec::new(),
                queued: false,
            }
        });
        state.requirements.push(requirement);

        if !met && state.queued {
            state.queued = false;
            self.ready.retain(|queued| queued != &target);
        } else if met && !state.queued && state.is_met(&self.satisfied) {
            state.queued = true;
            self.ready.push_back(target);
        }
        Ok(())
    }

    /// Records that `item` is available. Returns how many targets became
    /// ready as a result.
    pub fn mark_satisfied(&mut self, item: D) -> usize {
        if !self.satisfied.insert(item.clone()) {
            return 0;
        }
        let Some(waiters) = self.waiting.remove(&item) else {
            return 0;
        };

        let mut newly_ready: Vec<(u64, T)> = Vec::new();
        for target in waiters {
            let Some(state) = self.targets.get_mut(&target) else {
                continue;
            };
            if state.queued || !state.is_met(&self.satisfied) {
                continue;
            }
            state.queued = true;
            newly_ready.push((state.seq, target));
        }
        newly_ready.sort_by_key(|(seq, _)| *seq);

        let count = newly_ready.len();
        self.ready
            .extend(newly_ready.into_iter().map(|(_, target)| target));
        count
    }

    /// Pops the oldest ready target.
    ///
    /// Returns `Ok(None)` when targets are pending but none is ready, and
    /// [`TrackerError::NotReady`] when nothing is pending or queued at all.
    pub fn pop_ready(&mut self) -> Result<Option<T>, TrackerError> {
        match self.ready.pop_front() {
            Some(target) => {
                self.targets.remove(&target);
                self.retired.insert(target.clone());
                Ok(Some(target))
            }
            None if self.targets.is_empty() => Err(TrackerError::NotReady),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn is_satisfied(&self, item: &D) -> bool {
        self.satisfied.contains(item)
    }

    /// Declared, not ready, not popped.
    pub fn is_pending(&self, target: &T) -> bool {
        self.targets.get(target).is_some_and(|s| !s.queued)
    }

    /// Already popped.
    pub fn is_retired(&self, target: &T) -> bool {
        self.retired.contains(target)
    }

    pub fn pending_count(&self) -> usize {
        self.targets.values().filter(|s| !s.queued).count()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Pending targets in declaration order.
    pub fn pending_targets(&self) -> Vec<&T> {
        let mut pending: Vec<(u64, &T)> = self
            .targets
            .iter()
            .filter(|(_, s)| !s.queued)
            .map(|(t, s)| (s.seq, t))
            .collect();
        pending.sort_by_key(|(seq, _)| *seq);
        pending.into_iter().map(|(_, t)| t).collect()
    }

    /// No target is pending or ready.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Forgets every target, item and retirement.
    pub fn clear(&mut self) {
        self.satisfied.clear();
        self.targets.clear();
        self.waiting.clear();
        self.ready.clear();
        self.retired.clear();
        self.next_seq = 0;
    }
}
