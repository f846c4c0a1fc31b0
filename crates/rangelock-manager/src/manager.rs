use crate::escalator::{worker_loop, Escalator};
use crate::hooks::{CreateExtra, LocktreeHooks};
use crate::options::{EscalationMode, LockManagerOptions};
use crate::registry::{LocktreeHandle, Registry};
use crate::status::LockManagerStatus;
use crate::tracker::{LockMemory, MemoryTracker};
use parking_lot::Mutex;
use rangelock_core::{
    Descriptor, DictionaryId, KeyComparator, KeyRange, LockError, Result, TxnId,
};
use rangelock_locktree::{LockMemoryTracker, Locktree, LocktreeCounters};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub(crate) struct Inner {
    memory: Arc<LockMemory>,
    tracker: Arc<MemoryTracker>,
    lock_wait_time_ms: AtomicU64,
    registry: Mutex<Registry>,
    hooks: LocktreeHooks,
    pub(crate) escalator: Escalator,
}

impl Inner {
    /// Runs one escalation pass over every open locktree and records it.
    pub(crate) fn escalate_all(&self) {
        let registry = self.registry.lock();
        self.escalate_locked(&registry);
    }

    fn escalate_locked(&self, registry: &Registry) {
        let started = Instant::now();
        let before = self.memory.current();
        let mut freed = 0u64;
        for locktree in registry.iter() {
            let outcome = locktree.escalate(self.hooks.on_escalate.as_ref());
            freed = freed.saturating_add(outcome.freed());
        }
        let elapsed = started.elapsed();
        let after = self.memory.current();
        self.escalator.record_pass(elapsed, after);

        tracing::debug!(
            target: "rangelock.escalator",
            locktrees = registry.len(),
            before,
            after,
            freed,
            elapsed_us = elapsed.as_micros() as u64,
            "escalation pass finished"
        );
    }

    /// Asks for an escalation pass and waits for it (bounded in background
    /// mode), then records how long the caller was held up.
    pub(crate) fn run_escalation(&self) {
        let started = Instant::now();
        match self.escalator.mode() {
            EscalationMode::Background => self.escalator.request_and_wait(started),
            EscalationMode::Inline => self.escalate_all(),
        }
        self.escalator.record_wait(started.elapsed());
    }

    /// Second half of a release that dropped the count to zero.
    pub(crate) fn retire_if_unreferenced(&self, dict_id: DictionaryId) {
        let removed = self.registry.lock().remove_if_unreferenced(dict_id);
        let Some(locktree) = removed else {
            tracing::trace!(
                target: "rangelock.manager",
                dict_id = dict_id.get(),
                "locktree was reopened or already retired"
            );
            return;
        };

        if let Some(on_destroy) = &self.hooks.on_destroy {
            on_destroy(&locktree);
        }
        locktree.destroy();
        tracing::debug!(
            target: "rangelock.manager",
            dict_id = dict_id.get(),
            "destroyed locktree"
        );
    }
}

/// One pending lock request, as seen by [`LockManager::iterate_pending_lock_requests`].
#[derive(Debug, Clone, Copy)]
pub struct PendingLockRequest<'a> {
    pub dict_id: DictionaryId,
    pub txn: TxnId,
    pub range: &'a KeyRange,
    pub conflicting_txn: Option<TxnId>,
    pub start_time: Instant,
}

/// Process-wide owner of every locktree.
///
/// Hands out [`LocktreeHandle`]s, enforces the lock memory ceiling through
/// its [`MemoryTracker`] and runs escalation when the ceiling is hit.
/// Dropping the manager stops the escalator thread.
pub struct LockManager {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new(options: LockManagerOptions) -> Self {
        Self::with_hooks(options, LocktreeHooks::default())
    }

    pub fn with_hooks(options: LockManagerOptions, hooks: LocktreeHooks) -> Self {
        let memory = Arc::new(LockMemory::new(options.max_lock_memory));
        let inner = Arc::new_cyclic(|weak| Inner {
            memory: memory.clone(),
            tracker: Arc::new(MemoryTracker::new(memory.clone(), weak.clone())),
            lock_wait_time_ms: AtomicU64::new(duration_ms(options.lock_wait_time)),
            registry: Mutex::new(Registry::default()),
            hooks,
            escalator: Escalator::new(options.escalation, options.escalation_wait),
        });

        let worker = match options.escalation {
            EscalationMode::Background => spawn_escalator(&inner),
            EscalationMode::Inline => None,
        };

        tracing::debug!(
            target: "rangelock.manager",
            max_lock_memory = options.max_lock_memory,
            escalation = ?inner.escalator.mode(),
            "lock manager created"
        );

        Self {
            inner,
            worker: Mutex::new(worker),
        }
    }

    /// Returns the locktree for `dict_id`, creating it on first use.
    ///
    /// `descriptor` and `comparator` only matter when the locktree is
    /// created; later callers share the existing instance. `extra` is passed
    /// through to the on-create hook.
    pub fn get(
        &self,
        dict_id: DictionaryId,
        descriptor: Option<Descriptor>,
        comparator: KeyComparator,
        extra: CreateExtra<'_>,
    ) -> Result<LocktreeHandle> {
        let mut registry = self.inner.registry.lock();
        if let Some(existing) = registry.find(dict_id) {
            existing.add_reference();
            return Ok(LocktreeHandle::adopt(
                existing.clone(),
                Arc::downgrade(&self.inner),
            ));
        }

        let tracker: Arc<dyn LockMemoryTracker> = self.inner.tracker.clone();
        let locktree = Locktree::create(tracker, dict_id, descriptor, comparator);
        if let Some(on_create) = &self.inner.hooks.on_create {
            if let Err(veto) = on_create(&locktree, extra) {
                drop(registry);
                locktree.remove_reference();
                locktree.destroy();
                tracing::warn!(
                    target: "rangelock.manager",
                    dict_id = dict_id.get(),
                    reason = %veto,
                    "locktree creation vetoed"
                );
                return Err(LockError::CreateVetoed {
                    dict_id,
                    reason: veto.reason,
                });
            }
        }

        let locktree = Arc::new(locktree);
        registry.insert(locktree.clone());
        tracing::debug!(
            target: "rangelock.manager",
            dict_id = dict_id.get(),
            open = registry.len(),
            "created locktree"
        );
        Ok(LocktreeHandle::adopt(locktree, Arc::downgrade(&self.inner)))
    }

    /// Gives up one reference; the last one destroys the locktree.
    ///
    /// Equivalent to dropping the handle.
    pub fn release(&self, handle: LocktreeHandle) {
        drop(handle);
    }

    pub fn max_lock_memory(&self) -> u64 {
        self.inner.memory.limit()
    }

    /// Sets the lock memory ceiling; refuses to go below what is in use.
    pub fn set_max_lock_memory(&self, max_lock_memory: u64) -> Result<()> {
        let _registry = self.inner.registry.lock();
        let current = self.inner.memory.current();
        if max_lock_memory < current {
            return Err(LockError::ConstraintViolation {
                requested: max_lock_memory,
                current,
            });
        }
        self.inner.memory.set_limit(max_lock_memory);
        tracing::info!(
            target: "rangelock.manager",
            max_lock_memory,
            current,
            "lock memory ceiling changed"
        );
        Ok(())
    }

    pub fn current_lock_memory(&self) -> u64 {
        self.inner.memory.current()
    }

    pub fn lock_wait_time(&self) -> Duration {
        Duration::from_millis(self.inner.lock_wait_time_ms.load(Ordering::Relaxed))
    }

    /// Stored for the transaction layer; the manager itself never waits on it.
    pub fn set_lock_wait_time(&self, lock_wait_time: Duration) {
        self.inner
            .lock_wait_time_ms
            .store(duration_ms(lock_wait_time), Ordering::Relaxed);
    }

    /// Mode escalation actually runs in; `Inline` if the escalator thread
    /// could not be started.
    pub fn escalation_mode(&self) -> EscalationMode {
        self.inner.escalator.mode()
    }

    /// Tracker shared by every locktree of this manager.
    pub fn memory_tracker(&self) -> Arc<MemoryTracker> {
        self.inner.tracker.clone()
    }

    /// Escalates every open locktree now.
    ///
    /// In background mode this waits for the escalator at most for the
    /// configured escalation wait and may return before the pass is done.
    pub fn run_escalation(&self) {
        self.inner.run_escalation();
    }

    /// Calls `callback` for every pending lock request of every open
    /// locktree, stopping at the first error.
    ///
    /// Runs with the manager lock and each locktree's request lock held; the
    /// callback must not call back into the manager.
    pub fn iterate_pending_lock_requests<F, E>(&self, mut callback: F) -> std::result::Result<(), E>
    where
        F: FnMut(PendingLockRequest<'_>) -> std::result::Result<(), E>,
    {
        let registry = self.inner.registry.lock();
        for locktree in registry.iter() {
            let info = locktree.request_info().lock();
            for request in info.pending() {
                callback(PendingLockRequest {
                    dict_id: locktree.dict_id(),
                    txn: request.txn(),
                    range: request.range(),
                    conflicting_txn: request.conflicting_txn(),
                    start_time: request.start_time(),
                })?;
            }
        }
        Ok(())
    }

    pub fn open_locktrees(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn status(&self) -> LockManagerStatus {
        let mut status = LockManagerStatus {
            current_lock_memory: self.inner.memory.current(),
            max_lock_memory: self.inner.memory.limit(),
            ..LockManagerStatus::default()
        };
        status.apply_escalator_stats(&self.inner.escalator.stats());

        let registry = self.inner.registry.lock();
        let mut counters = LocktreeCounters::default();
        let mut pending = 0u64;
        for locktree in registry.iter() {
            let info = locktree.request_info().lock();
            pending += info.pending().len() as u64;
            counters.merge(info.counters());
        }
        counters.merge(registry.retired());
        status.num_locktrees = registry.len() as u64;
        drop(registry);

        status.pending_lock_requests = pending;
        status.apply_locktree_counters(&counters);
        status
    }

    /// Stops the escalator thread and waits for it. Later calls do nothing.
    ///
    /// Waiters in `run_escalation` are released immediately.
    pub fn shutdown(&self) {
        let first = self.inner.escalator.kill();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!(
                    target: "rangelock.escalator",
                    "escalator thread panicked"
                );
            }
        }
        if !first {
            return;
        }

        let open = self.open_locktrees();
        let current = self.inner.memory.current();
        if open > 0 || current > 0 {
            tracing::warn!(
                target: "rangelock.manager",
                open,
                current_lock_memory = current,
                "lock manager shut down with locktrees or lock memory outstanding"
            );
        } else {
            tracing::debug!(target: "rangelock.manager", "lock manager shut down");
        }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(LockManagerOptions::default())
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("current_lock_memory", &self.current_lock_memory())
            .field("max_lock_memory", &self.max_lock_memory())
            .field("escalation", &self.escalation_mode())
            .field("escalator", &self.inner.escalator.phase())
            .finish_non_exhaustive()
    }
}

fn spawn_escalator(inner: &Arc<Inner>) -> Option<JoinHandle<()>> {
    let for_thread = inner.clone();
    match std::thread::Builder::new()
        .name("rangelock-escalator".to_string())
        .spawn(move || worker_loop(for_thread))
    {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(
                target: "rangelock.escalator",
                error = %err,
                "failed to spawn escalator thread; escalating inline"
            );
            inner.escalator.fall_back_to_inline();
            None
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalator::EscalatorPhase;
    use rangelock_core::bytewise_comparator;
    use rangelock_locktree::EscalationScope;

    fn inline_manager(max_lock_memory: u64) -> LockManager {
        LockManager::new(
            LockManagerOptions::default()
                .with_max_lock_memory(max_lock_memory)
                .with_escalation(EscalationMode::Inline),
        )
    }

    #[test]
    fn ceiling_cannot_drop_below_usage() {
        let manager = inline_manager(1_000);
        manager.memory_tracker().note_used(600);

        assert_eq!(
            manager.set_max_lock_memory(500),
            Err(LockError::ConstraintViolation {
                requested: 500,
                current: 600
            })
        );
        assert_eq!(manager.max_lock_memory(), 1_000);

        assert_eq!(manager.set_max_lock_memory(600), Ok(()));
        assert_eq!(manager.max_lock_memory(), 600);
    }

    #[test]
    fn lock_wait_time_round_trips() {
        let manager = inline_manager(1_000);
        assert_eq!(manager.lock_wait_time(), Duration::from_millis(4_000));
        manager.set_lock_wait_time(Duration::from_millis(250));
        assert_eq!(manager.lock_wait_time(), Duration::from_millis(250));
    }

    #[test]
    fn handles_share_one_locktree_per_dictionary() {
        let manager = inline_manager(1_000);
        let a = manager
            .get(DictionaryId::new(7), None, bytewise_comparator(), None)
            .unwrap();
        let b = manager
            .get(DictionaryId::new(7), None, bytewise_comparator(), None)
            .unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(a.reference_count(), 2);

        manager.release(a);
        assert_eq!(b.reference_count(), 1);
        assert_eq!(manager.open_locktrees(), 1);

        manager.release(b);
        assert_eq!(manager.open_locktrees(), 0);
    }

    #[test]
    fn panicking_escalation_hook_releases_waiters_and_goes_inline() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

        let panicked = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let (first, seen) = (panicked.clone(), calls.clone());
        let hooks = LocktreeHooks::new().on_escalate(
            move |_: &EscalationScope<'_>, ranges: &[KeyRange]| {
                seen.fetch_add(1, Ordering::SeqCst);
                if !first.swap(true, Ordering::SeqCst) {
                    panic!("escalation hook failed");
                }
                ranges.to_vec()
            },
        );
        let manager = LockManager::with_hooks(
            LockManagerOptions::default().with_escalation_wait(Duration::from_secs(10)),
            hooks,
        );
        let handle = manager
            .get(DictionaryId::new(1), None, bytewise_comparator(), None)
            .unwrap();
        handle
            .try_acquire(TxnId::new(1), KeyRange::point(b"a".to_vec()))
            .unwrap();

        let started = Instant::now();
        manager.run_escalation();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(panicked.load(Ordering::SeqCst));
        assert_eq!(manager.inner.escalator.phase(), EscalatorPhase::Idle);
        assert_eq!(manager.escalation_mode(), EscalationMode::Inline);

        manager.run_escalation();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(manager.status().escalation_count, 1);

        drop(handle);
        manager.shutdown();
        assert_eq!(manager.inner.escalator.phase(), EscalatorPhase::Killed);
    }

    #[test]
    fn shutdown_is_idempotent() {
        let manager = LockManager::default();
        assert_eq!(manager.escalation_mode(), EscalationMode::Background);
        manager.shutdown();
        manager.shutdown();
        assert_eq!(manager.inner.escalator.phase(), EscalatorPhase::Killed);
    }
}
