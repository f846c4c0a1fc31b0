use crate::manager::Inner;
use crate::options::{EscalationMode, LONG_ESCALATION_WAIT};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Escalation and escalation-wait counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EscalatorStats {
    pub(crate) escalation_count: u64,
    pub(crate) escalation_time: Duration,
    pub(crate) latest_result: u64,
    pub(crate) wait_count: u64,
    pub(crate) wait_time: Duration,
    pub(crate) long_wait_count: u64,
    pub(crate) long_wait_time: Duration,
}

/// Lifecycle of the escalator thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EscalatorPhase {
    Idle,
    Running,
    Killed,
}

#[derive(Debug, Default)]
struct State {
    /// Generation of the newest escalation request.
    requested: u64,
    /// Generation covered by the newest finished pass.
    completed: u64,
    running: bool,
    killed: bool,
    stats: EscalatorStats,
}

/// Coordinates escalation passes between requesters and the escalator thread.
///
/// Requests are numbered so a pass that starts after a request was made is
/// guaranteed to cover it, and a wakeup is never lost between the request and
/// the wait.
pub(crate) struct Escalator {
    background: AtomicBool,
    wait: Duration,
    state: Mutex<State>,
    work: Condvar,
    done: Condvar,
}

impl Escalator {
    pub(crate) fn new(mode: EscalationMode, wait: Duration) -> Self {
        Self {
            background: AtomicBool::new(mode == EscalationMode::Background),
            wait,
            state: Mutex::new(State::default()),
            work: Condvar::new(),
            done: Condvar::new(),
        }
    }

    pub(crate) fn mode(&self) -> EscalationMode {
        if self.background.load(Ordering::SeqCst) {
            EscalationMode::Background
        } else {
            EscalationMode::Inline
        }
    }

    /// Switches to inline passes, used when no escalator thread could be spawned.
    pub(crate) fn fall_back_to_inline(&self) {
        self.background.store(false, Ordering::SeqCst);
    }

    pub(crate) fn stats(&self) -> EscalatorStats {
        self.state.lock().stats
    }

    /// Asks the escalator thread for a pass and waits for it, at most until
    /// `started + wait`.
    pub(crate) fn request_and_wait(&self, started: Instant) {
        let mut state = self.state.lock();
        if state.killed {
            return;
        }
        state.requested += 1;
        let ticket = state.requested;
        self.work.notify_all();

        let deadline = started + self.wait;
        while state.completed < ticket && !state.killed {
            if self.done.wait_until(&mut state, deadline).timed_out() {
                tracing::debug!(
                    target: "rangelock.escalator",
                    ticket,
                    completed = state.completed,
                    wait_ms = self.wait.as_millis() as u64,
                    "escalation still running after the wait deadline"
                );
                break;
            }
        }
    }

    /// Records one finished pass. Called with the manager lock held.
    pub(crate) fn record_pass(&self, elapsed: Duration, latest_result: u64) {
        let mut state = self.state.lock();
        let stats = &mut state.stats;
        stats.escalation_count += 1;
        stats.escalation_time = stats.escalation_time.saturating_add(elapsed);
        stats.latest_result = latest_result;
    }

    /// Every wait counts; waits of a second or more also count as long.
    pub(crate) fn record_wait(&self, waited: Duration) {
        let mut state = self.state.lock();
        let stats = &mut state.stats;
        stats.wait_count += 1;
        stats.wait_time = stats.wait_time.saturating_add(waited);
        if waited >= LONG_ESCALATION_WAIT {
            stats.long_wait_count += 1;
            stats.long_wait_time = stats.long_wait_time.saturating_add(waited);
        }
    }

    /// Stops the escalator thread and releases every waiting requester.
    ///
    /// Returns `false` if it was already stopped.
    pub(crate) fn kill(&self) -> bool {
        let mut state = self.state.lock();
        let first = !state.killed;
        state.killed = true;
        self.work.notify_all();
        self.done.notify_all();
        first
    }

    pub(crate) fn phase(&self) -> EscalatorPhase {
        let state = self.state.lock();
        if state.killed {
            EscalatorPhase::Killed
        } else if state.running {
            EscalatorPhase::Running
        } else {
            EscalatorPhase::Idle
        }
    }
}

/// Settles the in-flight pass if the escalation hook unwinds the worker, so
/// requesters are released and later passes run inline.
struct PassGuard<'a> {
    escalator: &'a Escalator,
    target: u64,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let mut state = self.escalator.state.lock();
        state.running = false;
        state.completed = self.target;
        self.escalator.fall_back_to_inline();
        self.escalator.done.notify_all();
        drop(state);
        tracing::error!(
            target: "rangelock.escalator",
            ticket = self.target,
            "escalation pass panicked; escalating inline from now on"
        );
    }
}

/// Body of the escalator thread.
pub(crate) fn worker_loop(inner: Arc<Inner>) {
    tracing::debug!(target: "rangelock.escalator", "escalator started");
    loop {
        let target = {
            let escalator = &inner.escalator;
            let mut state = escalator.state.lock();
            while !state.killed && state.completed >= state.requested {
                escalator.work.wait(&mut state);
            }
            if state.killed {
                break;
            }
            state.running = true;
            state.requested
        };

        let guard = PassGuard {
            escalator: &inner.escalator,
            target,
        };
        inner.escalate_all();
        drop(guard);

        let mut state = inner.escalator.state.lock();
        state.running = false;
        state.completed = target;
        inner.escalator.done.notify_all();
    }
    tracing::debug!(target: "rangelock.escalator", "escalator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_waits_are_counted_in_both_buckets() {
        let escalator = Escalator::new(EscalationMode::Inline, Duration::from_millis(100));
        escalator.record_wait(Duration::from_millis(5));
        escalator.record_wait(Duration::from_millis(7));
        escalator.record_wait(Duration::from_secs(2));

        let stats = escalator.stats();
        assert_eq!(stats.wait_count, 3);
        assert_eq!(stats.wait_time, Duration::from_millis(2_012));
        assert_eq!(stats.long_wait_count, 1);
        assert_eq!(stats.long_wait_time, Duration::from_secs(2));
    }

    #[test]
    fn exactly_one_second_is_a_long_wait() {
        let escalator = Escalator::new(EscalationMode::Inline, Duration::from_millis(100));
        escalator.record_wait(LONG_ESCALATION_WAIT - Duration::from_micros(1));
        escalator.record_wait(LONG_ESCALATION_WAIT);
        let stats = escalator.stats();
        assert_eq!(stats.wait_count, 2);
        assert_eq!(stats.long_wait_count, 1);
        assert_eq!(stats.long_wait_time, LONG_ESCALATION_WAIT);
    }

    #[test]
    fn passes_accumulate_and_keep_latest_result() {
        let escalator = Escalator::new(EscalationMode::Background, Duration::from_millis(100));
        escalator.record_pass(Duration::from_micros(30), 900);
        escalator.record_pass(Duration::from_micros(20), 750);

        let stats = escalator.stats();
        assert_eq!(stats.escalation_count, 2);
        assert_eq!(stats.escalation_time, Duration::from_micros(50));
        assert_eq!(stats.latest_result, 750);
    }

    #[test]
    fn killed_escalator_does_not_block_requesters() {
        let escalator = Escalator::new(EscalationMode::Background, Duration::from_secs(30));
        assert_eq!(escalator.phase(), EscalatorPhase::Idle);
        assert!(escalator.kill());
        assert!(!escalator.kill());
        let started = Instant::now();
        escalator.request_and_wait(started);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(escalator.phase(), EscalatorPhase::Killed);
    }

    #[test]
    fn request_without_worker_gives_up_at_deadline() {
        let escalator = Escalator::new(EscalationMode::Background, Duration::from_millis(20));
        let started = Instant::now();
        escalator.request_and_wait(started);
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn fallback_switches_to_inline() {
        let escalator = Escalator::new(EscalationMode::Background, Duration::from_millis(100));
        assert_eq!(escalator.mode(), EscalationMode::Background);
        escalator.fall_back_to_inline();
        assert_eq!(escalator.mode(), EscalationMode::Inline);
    }
}
