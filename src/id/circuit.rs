//! ID-service circuit breaker (component D's FSM).
//!
//! Grounded on `scheduling::scheduler`'s explicit state-enum idiom
//! (`JobStatus`, `JobSchedule`) rather than ad-hoc timers scattered across
//! call sites: one struct owns the state and every transition is a named
//! method.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Which backend `IdService::mint_code` should currently route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Route to the counter allocator (component B).
    Counter,
    /// Counter is unhealthy; route to the hash fallback (component C).
    Hash,
    /// Both backends failed their probes; minting fails outright.
    Unavailable,
}

/// Tracks consecutive counter failures and the half-open probe schedule.
pub struct CircuitBreaker {
    state: Mutex<CircuitState>,
    consecutive_failures: AtomicU32,
    last_probe: Mutex<Option<Instant>>,
    failure_threshold: u32,
    probe_interval: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, probe_interval: Duration) -> Self {
        Self {
            state: Mutex::new(CircuitState::Counter),
            consecutive_failures: AtomicU32::new(0),
            last_probe: Mutex::new(None),
            failure_threshold,
            probe_interval,
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.lock()
    }

    /// A counter allocation succeeded; reset the failure count. No-op if
    /// the breaker was already in `Counter` state, otherwise this is the
    /// half-open probe succeeding and closes the breaker.
    pub fn record_counter_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let mut state = self.state.lock();
        if *state != CircuitState::Counter {
            info!("circuit breaker closing: counter probe succeeded");
            *state = CircuitState::Counter;
        }
    }

    /// A counter allocation failed. Opens the breaker (routes to hash
    /// fallback) once `failure_threshold` consecutive failures accrue.
    pub fn record_counter_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold {
            let mut state = self.state.lock();
            if *state == CircuitState::Counter {
                warn!(
                    "circuit breaker opening after {} consecutive counter failures",
                    failures
                );
                *state = CircuitState::Hash;
            }
        }
    }

    /// Both the counter and the hash fallback failed their probes; no
    /// minting path remains.
    pub fn record_total_failure(&self) {
        let mut state = self.state.lock();
        warn!("circuit breaker marking id service unavailable");
        *state = CircuitState::Unavailable;
    }

    /// Whether a half-open probe is due: only meaningful while the breaker
    /// is in `Hash` state, gated to at most once per `probe_interval`.
    pub fn probe_due(&self) -> bool {
        if self.state() != CircuitState::Hash {
            return false;
        }
        let mut last = self.last_probe.lock();
        let due = last.map(|t| t.elapsed() >= self.probe_interval).unwrap_or(true);
        if due {
            *last = Some(Instant::now());
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_counter_failure();
        breaker.record_counter_failure();
        assert_eq!(breaker.state(), CircuitState::Counter);
        breaker.record_counter_failure();
        assert_eq!(breaker.state(), CircuitState::Hash);
    }

    #[test]
    fn success_in_counter_state_resets_failure_count_without_transition() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_counter_failure();
        breaker.record_counter_failure();
        breaker.record_counter_success();
        breaker.record_counter_failure();
        breaker.record_counter_failure();
        assert_eq!(breaker.state(), CircuitState::Counter);
    }

    #[test]
    fn probe_success_closes_an_open_breaker() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record_counter_failure();
        assert_eq!(breaker.state(), CircuitState::Hash);
        breaker.record_counter_success();
        assert_eq!(breaker.state(), CircuitState::Counter);
    }

    #[test]
    fn total_failure_marks_unavailable_from_any_state() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        breaker.record_total_failure();
        assert_eq!(breaker.state(), CircuitState::Unavailable);
    }

    #[test]
    fn probe_is_only_due_once_per_interval() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(50));
        breaker.record_counter_failure();
        assert!(breaker.probe_due());
        assert!(!breaker.probe_due());
    }
}
