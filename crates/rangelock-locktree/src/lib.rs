//! Per-dictionary locktrees.
//!
//! A [`Locktree`] holds the granted row-range locks and the pending lock
//! requests for one dictionary.
//! - Memory is charged to an injected [`LockMemoryTracker`], which decides
//!   whether the locktree may grow.
//! - Escalation is driven from outside; the merging policy is a callback
//!   ([`EscalateCallback`]) and the locktree only guarantees that escalation
//!   never grows its footprint or drops coverage.
//! - The reference count is owned by whoever hands out shared access (the
//!   lock manager); the locktree only stores it.

mod escalation;
mod locktree;
mod request;
mod tracker;

pub use escalation::{coalesce_ranges, EscalateCallback, EscalationOutcome, EscalationScope};
pub use locktree::{Acquired, Locktree};
pub use request::{
    LockRequest, LockRequestInfo, LocktreeCounters, RequestInfoState, LONG_WAIT_THRESHOLD,
};
pub use tracker::LockMemoryTracker;
