use crate::manager::Inner;
use rangelock_core::{LockError, Result};
use rangelock_locktree::LockMemoryTracker;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Process-wide lock memory counters.
#[derive(Debug)]
pub(crate) struct LockMemory {
    current: AtomicU64,
    limit: AtomicU64,
}

impl LockMemory {
    pub(crate) fn new(limit: u64) -> Self {
        Self {
            current: AtomicU64::new(0),
            limit: AtomicU64::new(limit),
        }
    }

    pub(crate) fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    pub(crate) fn limit(&self) -> u64 {
        self.limit.load(Ordering::SeqCst)
    }

    /// Only called with the manager lock held.
    pub(crate) fn set_limit(&self, limit: u64) {
        self.limit.store(limit, Ordering::SeqCst);
    }

    pub(crate) fn out_of_locks(&self) -> bool {
        self.current() >= self.limit()
    }

    fn add(&self, bytes: u64) {
        let mut current = self.current.load(Ordering::SeqCst);
        loop {
            match self.current.compare_exchange(
                current,
                current.saturating_add(bytes),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Returns `false` when more bytes were released than were charged.
    fn sub(&self, bytes: u64) -> bool {
        let mut current = self.current.load(Ordering::SeqCst);
        loop {
            match self.current.compare_exchange(
                current,
                current.saturating_sub(bytes),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return bytes <= current,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Lock memory accounting shared by every locktree of one manager.
///
/// Running over budget triggers an escalation pass before the caller is told
/// to back off.
pub struct MemoryTracker {
    memory: Arc<LockMemory>,
    manager: Weak<Inner>,
}

impl MemoryTracker {
    pub(crate) fn new(memory: Arc<LockMemory>, manager: Weak<Inner>) -> Self {
        Self { memory, manager }
    }

    pub fn current_lock_memory(&self) -> u64 {
        self.memory.current()
    }

    pub fn max_lock_memory(&self) -> u64 {
        self.memory.limit()
    }

    pub fn out_of_locks(&self) -> bool {
        self.memory.out_of_locks()
    }
}

impl LockMemoryTracker for MemoryTracker {
    fn note_used(&self, bytes: u64) {
        self.memory.add(bytes);
    }

    fn note_released(&self, bytes: u64) {
        if !self.memory.sub(bytes) {
            tracing::error!(
                target: "rangelock.manager",
                bytes,
                "released more lock memory than was charged; clamping to zero"
            );
        }
    }

    fn check_constraints(&self) -> Result<()> {
        if !self.memory.out_of_locks() {
            return Ok(());
        }

        if let Some(manager) = self.manager.upgrade() {
            manager.run_escalation();
        }

        let current = self.memory.current();
        let limit = self.memory.limit();
        if current >= limit {
            tracing::debug!(
                target: "rangelock.manager",
                current,
                limit,
                "lock memory still over budget after escalation"
            );
            return Err(LockError::OutOfLockMemory { current, limit });
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTracker")
            .field("current", &self.memory.current())
            .field("limit", &self.memory.limit())
            .finish()
    }
}
