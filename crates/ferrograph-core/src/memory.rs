//! Pluggable array allocation policy.
//!
//! A [`MemoryManager`] hands out arrays in one of two [`AllocationClass`]es:
//!
//! - **Pooled** working memory, borrowed inside a [`PooledScope`] around one
//!   op call and handed back when the scope closes. Contents are invalid
//!   after release, so pooled arrays never outlive the scope.
//! - **Detached** arrays with an independent lifetime, safe to store.
//!
//! The caller picks the class per allocation; managers only decide where the
//! memory comes from. Two managers are provided:
//! [`DetachedMemoryManager`] (plain heap allocation, nothing to release) and
//! [`WorkspaceMemoryManager`] (mutex-guarded free lists for pooled memory,
//! shareable between sessions).

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::array::{Allocation, Array, ArrayData, PoolTicket};
use crate::error::MemoryError;
use crate::types::{ArrayDescriptor, DataType};

/// Which kind of memory an allocation should come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationClass {
    /// Scoped working memory, released when the borrowing scope closes.
    Pooled,
    /// Independent lifetime.
    Detached,
}

/// The allocation contract consumed by the session executor.
pub trait MemoryManager: Send + Sync + fmt::Debug {
    /// Allocates an array matching `descriptor`. Contents are unspecified.
    fn allocate(
        &self,
        class: AllocationClass,
        descriptor: &ArrayDescriptor,
    ) -> Result<Array, MemoryError>;

    /// Returns an array to the manager. A no-op for managers whose memory
    /// is reclaimed automatically.
    fn release(&self, array: Array);

    /// Ends a pooled loan whose buffer is not coming back. A no-op for an
    /// already returned loan.
    fn forfeit(&self, ticket: &PoolTicket);

    /// Tears the manager down. Must be called before a manager that pools
    /// memory is discarded.
    fn close(&self);
}

// ---------------------------------------------------------------------------
// Scoped borrowing
// ---------------------------------------------------------------------------

/// An explicit acquire/release bracket for pooled memory.
///
/// The scope records the loan ticket of every array obtained through
/// [`PooledScope::allocate`], never the array itself, so the borrower holds
/// the only handle to the buffer and writes stay in pool memory. Arrays
/// handed back through [`PooledScope::reclaim`] return their buffers to the
/// pool on [`PooledScope::close`]; loans that were never handed back are
/// forfeited. The scope has no `Drop` impl; callers close the scope on
/// every exit path, usually through [`with_pooled_scope`].
pub struct PooledScope<'m> {
    manager: &'m dyn MemoryManager,
    lent: Vec<PoolTicket>,
    reclaimed: Vec<Array>,
}

impl<'m> PooledScope<'m> {
    /// Opens a scope borrowing from `manager`.
    pub fn open(manager: &'m dyn MemoryManager) -> Self {
        PooledScope {
            manager,
            lent: Vec::new(),
            reclaimed: Vec::new(),
        }
    }

    /// Borrows a pooled array for the lifetime of this scope.
    pub fn allocate(&mut self, descriptor: &ArrayDescriptor) -> Result<Array, MemoryError> {
        let array = self.manager.allocate(AllocationClass::Pooled, descriptor)?;
        if let Some(ticket) = array.pool_ticket() {
            self.lent.push(ticket.clone());
        }
        Ok(array)
    }

    /// Hands a borrowed array back so its buffer can be recycled when the
    /// scope closes. Arrays this scope did not lend are dropped.
    pub fn reclaim(&mut self, array: Array) {
        let ours = array
            .pool_ticket()
            .is_some_and(|ticket| self.lent.iter().any(|lent| lent.same_loan(ticket)));
        if ours {
            self.reclaimed.push(array);
        }
    }

    /// Number of arrays borrowed so far.
    pub fn borrowed_count(&self) -> usize {
        self.lent.len()
    }

    /// Returns every loan to the manager. Returns how many arrays were
    /// borrowed.
    pub fn close(mut self) -> usize {
        for array in self.reclaimed.drain(..) {
            self.manager.release(array);
        }
        for ticket in &self.lent {
            self.manager.forfeit(ticket);
        }
        self.lent.len()
    }
}

/// Runs `f` inside a pooled scope and closes the scope whether `f`
/// succeeds or fails.
pub fn with_pooled_scope<R, E>(
    manager: &dyn MemoryManager,
    f: impl FnOnce(&mut PooledScope<'_>) -> Result<R, E>,
) -> Result<R, E> {
    let mut scope = PooledScope::open(manager);
    let result = f(&mut scope);
    scope.close();
    result
}

// ---------------------------------------------------------------------------
// DetachedMemoryManager
// ---------------------------------------------------------------------------

/// Allocates every array as a fresh detached buffer, whatever class is
/// requested. `release` and `close` do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedMemoryManager;

impl MemoryManager for DetachedMemoryManager {
    fn allocate(
        &self,
        _class: AllocationClass,
        descriptor: &ArrayDescriptor,
    ) -> Result<Array, MemoryError> {
        Ok(Array::zeros(descriptor.clone()))
    }

    fn release(&self, _array: Array) {}

    fn forfeit(&self, ticket: &PoolTicket) {
        ticket.invalidate();
    }

    fn close(&self) {}
}

// ---------------------------------------------------------------------------
// WorkspaceMemoryManager
// ---------------------------------------------------------------------------

/// Snapshot of a [`WorkspaceMemoryManager`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently cached for reuse.
    pub cached_buffers: usize,
    /// Pooled allocations served from the cache.
    pub hits: u64,
    /// Pooled allocations that needed a new buffer.
    pub misses: u64,
    /// Detached allocations served so far.
    pub detached_allocations: u64,
    /// Pooled arrays lent out and not yet released.
    pub outstanding: usize,
}

#[derive(Debug, Default)]
struct WorkspacePool {
    /// Free buffers keyed by (dtype, element count).
    free: HashMap<(DataType, usize), Vec<ArrayData>>,
    outstanding: usize,
    closed: bool,
}

/// A pooling memory manager.
///
/// Pooled allocations are served from per-(dtype, length) free lists and
/// recycled on release. Detached allocations always get a new buffer. The
/// pool sits behind a mutex so one manager can serve several sessions.
#[derive(Debug, Default)]
pub struct WorkspaceMemoryManager {
    pool: Mutex<WorkspacePool>,
    hits: AtomicU64,
    misses: AtomicU64,
    detached: AtomicU64,
}

impl WorkspaceMemoryManager {
    pub fn new() -> Self {
        WorkspaceMemoryManager::default()
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        let pool = self.lock();
        PoolStats {
            cached_buffers: pool.free.values().map(Vec::len).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            detached_allocations: self.detached.load(Ordering::Relaxed),
            outstanding: pool.outstanding,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, WorkspacePool> {
        // Free lists are never left half-updated, so poisoning is ignored.
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryManager for WorkspaceMemoryManager {
    fn allocate(
        &self,
        class: AllocationClass,
        descriptor: &ArrayDescriptor,
    ) -> Result<Array, MemoryError> {
        let len = descriptor.element_count();
        let mut pool = self.lock();
        if pool.closed {
            return Err(MemoryError::Closed);
        }

        match class {
            AllocationClass::Detached => {
                self.detached.fetch_add(1, Ordering::Relaxed);
                Ok(Array::zeros(descriptor.clone()))
            }
            AllocationClass::Pooled => {
                let cached = pool
                    .free
                    .get_mut(&(descriptor.dtype, len))
                    .and_then(Vec::pop);
                let data = match cached {
                    Some(data) => {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        data
                    }
                    None => {
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        ArrayData::zeros(descriptor.dtype, len)
                    }
                };
                pool.outstanding += 1;
                Ok(Array::from_parts(
                    descriptor.clone(),
                    data,
                    Allocation::Pooled(PoolTicket::new()),
                ))
            }
        }
    }

    fn release(&self, array: Array) {
        let (allocation, buffer) = array.into_buffer();
        let ticket = match allocation {
            Allocation::Detached => return,
            Allocation::Pooled(ticket) => ticket,
        };
        // Other handles may still alias a buffer that is being returned;
        // only the ticket tells them it is gone.
        if !ticket.is_live() {
            return;
        }
        ticket.invalidate();

        let mut pool = self.lock();
        pool.outstanding = pool.outstanding.saturating_sub(1);
        if pool.closed {
            return;
        }
        if let Some(data) = buffer {
            pool.free
                .entry((data.dtype(), data.len()))
                .or_default()
                .push(data);
        }
    }

    fn forfeit(&self, ticket: &PoolTicket) {
        if !ticket.is_live() {
            return;
        }
        ticket.invalidate();
        let mut pool = self.lock();
        pool.outstanding = pool.outstanding.saturating_sub(1);
    }

    fn close(&self) {
        let mut pool = self.lock();
        pool.closed = true;
        pool.free.clear();
    }
}
