use parking_lot::{Mutex, MutexGuard};
use rangelock_core::{KeyRange, TxnId};
use std::time::{Duration, Instant};

/// Waits at least this long are also counted as "long waits".
pub const LONG_WAIT_THRESHOLD: Duration = Duration::from_secs(1);

/// A lock request that conflicts with an existing grant and is queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    txn: TxnId,
    range: KeyRange,
    conflicting_txn: Option<TxnId>,
    start_time: Instant,
}

impl LockRequest {
    pub fn new(txn: TxnId, range: KeyRange, conflicting_txn: Option<TxnId>) -> Self {
        Self::with_start_time(txn, range, conflicting_txn, Instant::now())
    }

    pub fn with_start_time(
        txn: TxnId,
        range: KeyRange,
        conflicting_txn: Option<TxnId>,
        start_time: Instant,
    ) -> Self {
        Self {
            txn,
            range,
            conflicting_txn,
            start_time,
        }
    }

    pub fn txn(&self) -> TxnId {
        self.txn
    }

    pub fn range(&self) -> &KeyRange {
        &self.range
    }

    pub fn left_key(&self) -> &[u8] {
        self.range.left()
    }

    pub fn right_key(&self) -> &[u8] {
        self.range.right()
    }

    pub fn conflicting_txn(&self) -> Option<TxnId> {
        self.conflicting_txn
    }

    pub fn set_conflicting_txn(&mut self, txn: Option<TxnId>) {
        self.conflicting_txn = txn;
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }
}

/// Wait statistics kept per locktree and folded into the manager's totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocktreeCounters {
    pub wait_count: u64,
    pub wait_time: Duration,
    pub long_wait_count: u64,
    pub long_wait_time: Duration,
    pub timeout_count: u64,
}

impl LocktreeCounters {
    pub fn merge(&mut self, other: &LocktreeCounters) {
        self.wait_count = self.wait_count.saturating_add(other.wait_count);
        self.wait_time = self.wait_time.saturating_add(other.wait_time);
        self.long_wait_count = self.long_wait_count.saturating_add(other.long_wait_count);
        self.long_wait_time = self.long_wait_time.saturating_add(other.long_wait_time);
        self.timeout_count = self.timeout_count.saturating_add(other.timeout_count);
    }

    pub fn record_wait(&mut self, waited: Duration) {
        self.wait_count = self.wait_count.saturating_add(1);
        self.wait_time = self.wait_time.saturating_add(waited);
        if waited >= LONG_WAIT_THRESHOLD {
            self.long_wait_count = self.long_wait_count.saturating_add(1);
            self.long_wait_time = self.long_wait_time.saturating_add(waited);
        }
    }
}

/// State guarded by [`LockRequestInfo`]'s mutex.
#[derive(Debug, Default)]
pub struct RequestInfoState {
    // Sorted by requesting txn.
    pending: Vec<LockRequest>,
    counters: LocktreeCounters,
}

impl RequestInfoState {
    pub fn pending(&self) -> &[LockRequest] {
        &self.pending
    }

    pub fn counters(&self) -> &LocktreeCounters {
        &self.counters
    }
}

/// Pending lock requests and wait counters of one locktree.
#[derive(Debug, Default)]
pub struct LockRequestInfo {
    state: Mutex<RequestInfoState>,
}

impl LockRequestInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the request info for a consistent walk over pending requests.
    pub fn lock(&self) -> MutexGuard<'_, RequestInfoState> {
        self.state.lock()
    }

    pub fn add_pending(&self, request: LockRequest) {
        let mut state = self.state.lock();
        let idx = state
            .pending
            .partition_point(|existing| existing.txn <= request.txn);
        state.pending.insert(idx, request);
    }

    /// Removes the oldest pending request of `txn`, if any.
    pub fn remove_pending(&self, txn: TxnId) -> Option<LockRequest> {
        let mut state = self.state.lock();
        let idx = state.pending.iter().position(|request| request.txn == txn)?;
        Some(state.pending.remove(idx))
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn record_wait(&self, waited: Duration) {
        self.state.lock().counters.record_wait(waited);
    }

    pub fn record_timeout(&self) {
        let mut state = self.state.lock();
        state.counters.timeout_count = state.counters.timeout_count.saturating_add(1);
    }

    pub fn counters(&self) -> LocktreeCounters {
        self.state.lock().counters
    }
}
