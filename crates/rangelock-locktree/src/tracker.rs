use rangelock_core::Result;

/// Accounting sink shared by every locktree of one lock manager.
///
/// Implementations must be callable concurrently from any thread without
/// external coordination.
pub trait LockMemoryTracker: Send + Sync {
    /// Record `bytes` of newly held lock metadata.
    fn note_used(&self, bytes: u64);

    /// Record `bytes` of lock metadata that is no longer held.
    fn note_released(&self, bytes: u64);

    /// Called right before a locktree grows its footprint.
    ///
    /// Returns `LockError::OutOfLockMemory` when the budget is exhausted even
    /// after trying to reclaim memory. Callers must not hold any locktree lock
    /// while calling this, since reclaiming may escalate every locktree.
    fn check_constraints(&self) -> Result<()>;
}
