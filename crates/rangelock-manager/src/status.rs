use crate::escalator::EscalatorStats;
use rangelock_locktree::LocktreeCounters;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Point-in-time lock manager statistics. Times are in microseconds.
///
/// Wait and timeout counters cover every locktree the manager has ever
/// opened: live locktrees are summed on the spot, destroyed ones contribute
/// the totals they had when they were removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockManagerStatus {
    pub current_lock_memory: u64,
    pub max_lock_memory: u64,
    pub escalation_count: u64,
    pub escalation_time_us: u64,
    pub escalation_latest_result: u64,
    pub num_locktrees: u64,
    pub pending_lock_requests: u64,
    pub wait_count: u64,
    pub wait_time_us: u64,
    pub long_wait_count: u64,
    pub long_wait_time_us: u64,
    pub timeout_count: u64,
    pub wait_escalation_count: u64,
    pub wait_escalation_time_us: u64,
    pub long_wait_escalation_count: u64,
    pub long_wait_escalation_time_us: u64,
}

impl LockManagerStatus {
    pub fn lock_memory_in_use_ratio(&self) -> f64 {
        if self.max_lock_memory == 0 {
            return 0.0;
        }
        self.current_lock_memory as f64 / self.max_lock_memory as f64
    }

    pub(crate) fn apply_locktree_counters(&mut self, counters: &LocktreeCounters) {
        self.wait_count = counters.wait_count;
        self.wait_time_us = micros(counters.wait_time);
        self.long_wait_count = counters.long_wait_count;
        self.long_wait_time_us = micros(counters.long_wait_time);
        self.timeout_count = counters.timeout_count;
    }

    pub(crate) fn apply_escalator_stats(&mut self, stats: &EscalatorStats) {
        self.escalation_count = stats.escalation_count;
        self.escalation_time_us = micros(stats.escalation_time);
        self.escalation_latest_result = stats.latest_result;
        self.wait_escalation_count = stats.wait_count;
        self.wait_escalation_time_us = micros(stats.wait_time);
        self.long_wait_escalation_count = stats.long_wait_count;
        self.long_wait_escalation_time_us = micros(stats.long_wait_time);
    }
}

fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}
