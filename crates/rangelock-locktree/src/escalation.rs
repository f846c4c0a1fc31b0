use rangelock_core::{DictionaryId, KeyComparator, KeyRange, TxnId};
use std::cmp::Ordering;
use std::sync::Arc;

/// What an escalation policy gets to see about the ranges it coarsens.
pub struct EscalationScope<'a> {
    pub dict_id: DictionaryId,
    pub txn: TxnId,
    pub comparator: &'a KeyComparator,
    /// Ranges granted to other transactions in the same locktree.
    pub others: &'a [KeyRange],
}

/// Merging policy invoked once per transaction holding ranges in a locktree.
///
/// Receives the transaction's ranges sorted by left key and returns the
/// replacement set. The replacement must cover every input range, must not
/// cost more memory than the input and must not overlap any range in
/// [`EscalationScope::others`]; otherwise it is discarded.
///
/// Called with the lock manager's registry lock held: it must not call back
/// into the manager.
pub type EscalateCallback =
    Arc<dyn Fn(&EscalationScope<'_>, &[KeyRange]) -> Vec<KeyRange> + Send + Sync>;

/// Footprint of a locktree before and after an escalation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscalationOutcome {
    pub bytes_before: u64,
    pub bytes_after: u64,
}

impl EscalationOutcome {
    pub fn freed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Policy that merges each run of a transaction's ranges into one range,
/// spanning from the run's smallest left key to its largest right key.
///
/// A run ends where extending it would overlap a range granted to another
/// transaction.
pub fn coalesce_ranges(scope: &EscalationScope<'_>, ranges: &[KeyRange]) -> Vec<KeyRange> {
    let cmp = scope.comparator;
    let mut merged = Vec::new();
    let Some(first) = ranges.first() else {
        return merged;
    };

    let mut run = first.clone();
    for range in &ranges[1..] {
        let left = if cmp(range.left(), run.left()) == Ordering::Less {
            range.left()
        } else {
            run.left()
        };
        let right = if cmp(range.right(), run.right()) == Ordering::Greater {
            range.right()
        } else {
            run.right()
        };
        let candidate = KeyRange::new(left.to_vec(), right.to_vec());
        if overlaps_any(&candidate, scope.others, cmp) {
            merged.push(std::mem::replace(&mut run, range.clone()));
        } else {
            run = candidate;
        }
    }
    merged.push(run);
    merged
}

pub(crate) fn overlaps_any(range: &KeyRange, others: &[KeyRange], cmp: &KeyComparator) -> bool {
    others.iter().any(|other| other.overlaps(range, cmp))
}

pub(crate) fn ranges_bytes(ranges: &[KeyRange]) -> u64 {
    ranges
        .iter()
        .fold(0u64, |acc, range| acc.saturating_add(range.memory_size()))
}

/// Whether every range in `original` is contained in some range of `replacement`.
pub(crate) fn covers(replacement: &[KeyRange], original: &[KeyRange], cmp: &KeyComparator) -> bool {
    original.iter().all(|range| {
        replacement.iter().any(|candidate| {
            cmp(candidate.left(), range.left()) != Ordering::Greater
                && cmp(range.right(), candidate.right()) != Ordering::Greater
        })
    })
}
