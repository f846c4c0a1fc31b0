use crate::escalation::{
    covers, overlaps_any, ranges_bytes, EscalateCallback, EscalationOutcome, EscalationScope,
};
use crate::request::LockRequestInfo;
use crate::tracker::LockMemoryTracker;
use parking_lot::Mutex;
use rangelock_core::{DictionaryId, Descriptor, KeyComparator, KeyRange, Result, TxnId};
use std::cmp::Ordering as KeyOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Result of [`Locktree::try_acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Granted,
    /// Another transaction holds an overlapping range; nothing was recorded.
    Conflict { with: TxnId },
}

#[derive(Debug, Default)]
struct RangeBuffer {
    by_txn: BTreeMap<TxnId, Vec<KeyRange>>,
    bytes: u64,
}

impl RangeBuffer {
    fn conflicting_txn(
        &self,
        txn: TxnId,
        range: &KeyRange,
        cmp: &KeyComparator,
    ) -> Option<TxnId> {
        self.by_txn
            .iter()
            .filter(|(owner, _)| **owner != txn)
            .find(|(_, ranges)| ranges.iter().any(|held| held.overlaps(range, cmp)))
            .map(|(owner, _)| *owner)
    }
}

/// Granted and pending row-range locks of one dictionary.
pub struct Locktree {
    dict_id: DictionaryId,
    descriptor: Option<Descriptor>,
    comparator: KeyComparator,
    reference_count: AtomicU32,
    tracker: Arc<dyn LockMemoryTracker>,
    ranges: Mutex<RangeBuffer>,
    request_info: LockRequestInfo,
    destroyed: AtomicBool,
}

impl Locktree {
    /// Builds a locktree holding one reference.
    pub fn create(
        tracker: Arc<dyn LockMemoryTracker>,
        dict_id: DictionaryId,
        descriptor: Option<Descriptor>,
        comparator: KeyComparator,
    ) -> Self {
        Self {
            dict_id,
            descriptor,
            comparator,
            reference_count: AtomicU32::new(1),
            tracker,
            ranges: Mutex::new(RangeBuffer::default()),
            request_info: LockRequestInfo::new(),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn dict_id(&self) -> DictionaryId {
        self.dict_id
    }

    pub fn descriptor(&self) -> Option<&Descriptor> {
        self.descriptor.as_ref()
    }

    pub fn comparator(&self) -> &KeyComparator {
        &self.comparator
    }

    pub fn request_info(&self) -> &LockRequestInfo {
        &self.request_info
    }

    pub fn reference_count(&self) -> u32 {
        self.reference_count.load(Ordering::SeqCst)
    }

    /// Adds a reference and returns the new count.
    ///
    /// The caller must already hold a reference, or hold the lock that
    /// serializes lookups of this locktree.
    pub fn add_reference(&self) -> u32 {
        self.reference_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Drops a reference and returns the new count.
    pub fn remove_reference(&self) -> u32 {
        let previous = self.reference_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "locktree reference count underflow");
        previous.wrapping_sub(1)
    }

    /// Bytes currently charged for this locktree's granted ranges.
    pub fn memory_used(&self) -> u64 {
        self.ranges.lock().bytes
    }

    pub fn granted_ranges(&self, txn: TxnId) -> Vec<KeyRange> {
        self.ranges
            .lock()
            .by_txn
            .get(&txn)
            .cloned()
            .unwrap_or_default()
    }

    /// Tries to grant `range` to `txn`.
    ///
    /// Checks the memory budget first, which may run escalation; this is why
    /// no locktree lock is held across the check.
    pub fn try_acquire(&self, txn: TxnId, range: KeyRange) -> Result<Acquired> {
        debug_assert!(
            !range.is_inverted(&self.comparator),
            "lock range must not be inverted"
        );
        self.tracker.check_constraints()?;

        let bytes = range.memory_size();
        {
            let mut ranges = self.ranges.lock();
            if let Some(with) = ranges.conflicting_txn(txn, &range, &self.comparator) {
                return Ok(Acquired::Conflict { with });
            }
            let held = ranges.by_txn.entry(txn).or_default();
            if held.contains(&range) {
                return Ok(Acquired::Granted);
            }
            held.push(range);
            ranges.bytes = ranges.bytes.saturating_add(bytes);
        }
        self.tracker.note_used(bytes);
        Ok(Acquired::Granted)
    }

    /// Releases every range held by `txn`; returns the bytes given back.
    pub fn release_txn(&self, txn: TxnId) -> u64 {
        let released = {
            let mut ranges = self.ranges.lock();
            let Some(held) = ranges.by_txn.remove(&txn) else {
                return 0;
            };
            let bytes = ranges_bytes(&held);
            ranges.bytes = ranges.bytes.saturating_sub(bytes);
            bytes
        };
        if released > 0 {
            self.tracker.note_released(released);
        }
        released
    }

    /// Runs `callback` over each transaction's ranges and keeps the result
    /// when it shrinks the footprint without losing coverage or overlapping
    /// another transaction's ranges.
    ///
    /// Without a callback this is a no-op.
    pub fn escalate(&self, callback: Option<&EscalateCallback>) -> EscalationOutcome {
        let mut ranges = self.ranges.lock();
        let bytes_before = ranges.bytes;
        let Some(callback) = callback else {
            return EscalationOutcome {
                bytes_before,
                bytes_after: bytes_before,
            };
        };

        let cmp = &self.comparator;
        let txns: Vec<TxnId> = ranges.by_txn.keys().copied().collect();
        let mut freed = 0u64;
        for txn in txns {
            // Earlier replacements in this pass are visible here.
            let others: Vec<KeyRange> = ranges
                .by_txn
                .iter()
                .filter(|(owner, _)| **owner != txn)
                .flat_map(|(_, held)| held.iter().cloned())
                .collect();
            let Some(held) = ranges.by_txn.get_mut(&txn) else {
                continue;
            };
            held.sort_by(|a, b| match cmp(a.left(), b.left()) {
                KeyOrdering::Equal => cmp(a.right(), b.right()),
                other => other,
            });

            let scope = EscalationScope {
                dict_id: self.dict_id,
                txn,
                comparator: cmp,
                others: &others,
            };
            let replacement = callback(&scope, held);

            let old_bytes = ranges_bytes(held);
            let new_bytes = ranges_bytes(&replacement);
            if new_bytes > old_bytes || !covers(&replacement, held, cmp) {
                tracing::warn!(
                    target: "rangelock.locktree",
                    dict_id = self.dict_id.get(),
                    txn = txn.get(),
                    old_bytes,
                    new_bytes,
                    "escalation policy returned a replacement that grows memory or drops coverage; keeping original ranges"
                );
                continue;
            }
            if replacement
                .iter()
                .any(|range| overlaps_any(range, &others, cmp))
            {
                tracing::warn!(
                    target: "rangelock.locktree",
                    dict_id = self.dict_id.get(),
                    txn = txn.get(),
                    "escalation policy returned a replacement that overlaps another transaction's locks; keeping original ranges"
                );
                continue;
            }

            *held = replacement;
            freed = freed.saturating_add(old_bytes - new_bytes);
        }
        ranges.bytes = ranges.bytes.saturating_sub(freed);
        let bytes_after = ranges.bytes;
        drop(ranges);

        if freed > 0 {
            self.tracker.note_released(freed);
        }
        EscalationOutcome {
            bytes_before,
            bytes_after,
        }
    }

    /// Gives back every byte still charged for granted ranges.
    ///
    /// Calling it twice is harmless; the second call does nothing.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            tracing::debug!(
                target: "rangelock.locktree",
                dict_id = self.dict_id.get(),
                "locktree already destroyed"
            );
            return;
        }

        let released = {
            let mut ranges = self.ranges.lock();
            let bytes = ranges.bytes;
            ranges.by_txn.clear();
            ranges.bytes = 0;
            bytes
        };
        if released > 0 {
            self.tracker.note_released(released);
        }

        let pending = self.request_info.pending_len();
        if pending > 0 {
            tracing::warn!(
                target: "rangelock.locktree",
                dict_id = self.dict_id.get(),
                pending,
                "destroying locktree with pending lock requests"
            );
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Locktree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Locktree")
            .field("dict_id", &self.dict_id)
            .field("reference_count", &self.reference_count())
            .field("memory_used", &self.memory_used())
            .field("pending", &self.request_info.pending_len())
            .finish()
    }
}
