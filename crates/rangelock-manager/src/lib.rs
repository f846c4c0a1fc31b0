//! Process-wide lock manager for per-dictionary locktrees.
//!
//! The [`LockManager`] owns every open [`Locktree`](rangelock_locktree::Locktree):
//! - Locktrees are reference counted; [`LocktreeHandle`]s hand out shared
//!   access and the last one to go destroys the locktree.
//! - All locktrees charge one [`MemoryTracker`]. Running over the ceiling
//!   triggers escalation, either on a dedicated thread or inline.
//! - [`LockManagerStatus`] rolls up memory, escalation and wait counters,
//!   including those of locktrees that no longer exist.

mod escalator;
mod hooks;
mod manager;
mod options;
mod registry;
mod status;
mod tracker;

pub use hooks::{CreateCallback, CreateExtra, DestroyCallback, LocktreeHooks};
pub use manager::{LockManager, PendingLockRequest};
pub use options::{
    parse_byte_size, EscalationMode, LockManagerOptions, DEFAULT_ESCALATION_WAIT,
    DEFAULT_LOCK_WAIT_TIME, DEFAULT_MAX_LOCK_MEMORY, GB, KB, LONG_ESCALATION_WAIT, MB,
};
pub use registry::LocktreeHandle;
pub use status::LockManagerStatus;
pub use tracker::MemoryTracker;

pub use rangelock_core::{CreateVeto, LockError, Result};
pub use rangelock_locktree::{EscalateCallback, EscalationScope, Locktree};
