//! Per-platform circuit breaker, process-local, mutex-guarded.

use crate::reconciliation::config::CircuitBreakerSettings;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct BreakerState {
    failures: u32,
    phase: BreakerPhase,
    opened_at: Option<DateTime<Utc>>,
    half_open_probes: u32,
}

impl Default for BreakerState {
    fn default() -> Self {
        Self {
            failures: 0,
            phase: BreakerPhase::Closed,
            opened_at: None,
            half_open_probes: 0,
        }
    }
}

/// Deny reason returned by [`CircuitBreaker::allow_call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    CircuitOpen,
    HalfOpenProbeExhausted,
}

impl DenyReason {
    pub fn as_error_code(&self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::HalfOpenProbeExhausted => "half_open_probe_exhausted",
        }
    }
}

/// CLOSED / OPEN / HALF_OPEN state machine, one instance per process, keyed
/// by platform name. A single mutex guards the whole map rather than one
/// lock per platform: platform counts are small and transitions must be
/// serialized anyway.
pub struct CircuitBreaker {
    settings: CircuitBreakerSettings,
    states: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(settings: CircuitBreakerSettings) -> Self {
        Self {
            settings,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `(allowed, deny_reason)`. `deny_reason` is `None` iff `allowed`.
    pub fn allow_call(&self, platform: &str) -> (bool, Option<DenyReason>) {
        let mut states = self.states.lock();
        let st = states.entry(platform.to_string()).or_default();

        if st.phase == BreakerPhase::Open {
            let cooldown_elapsed = st
                .opened_at
                .map(|opened| Utc::now() - opened >= chrono::Duration::seconds(self.settings.open_cooldown_seconds))
                .unwrap_or(false);
            if cooldown_elapsed {
                st.phase = BreakerPhase::HalfOpen;
                st.half_open_probes = 0;
            } else {
                return (false, Some(DenyReason::CircuitOpen));
            }
        }

        if st.phase == BreakerPhase::HalfOpen {
            if st.half_open_probes >= self.settings.half_open_probe_count {
                return (false, Some(DenyReason::HalfOpenProbeExhausted));
            }
            st.half_open_probes += 1;
            return (true, None);
        }

        (true, None)
    }

    pub fn record_success(&self, platform: &str) {
        let mut states = self.states.lock();
        let st = states.entry(platform.to_string()).or_default();
        st.failures = 0;
        if st.phase == BreakerPhase::Open || st.phase == BreakerPhase::HalfOpen {
            st.phase = BreakerPhase::Closed;
            st.opened_at = None;
            st.half_open_probes = 0;
        }
    }

    pub fn record_failure(&self, platform: &str) {
        let mut states = self.states.lock();
        let st = states.entry(platform.to_string()).or_default();
        st.failures += 1;
        match st.phase {
            BreakerPhase::Closed if st.failures >= self.settings.failure_threshold => {
                st.phase = BreakerPhase::Open;
                st.opened_at = Some(Utc::now());
                warn!(platform, failures = st.failures, "circuit breaker opened");
            }
            BreakerPhase::HalfOpen => {
                // A single half-open probe failure reopens immediately; it
                // does not re-count against failure_threshold.
                st.phase = BreakerPhase::Open;
                st.opened_at = Some(Utc::now());
                warn!(platform, "circuit breaker reopened from half-open probe failure");
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerSettings {
            failure_threshold: 3,
            open_cooldown_seconds: 0,
            half_open_probe_count: 2,
        })
    }

    #[test]
    fn closed_allows_calls() {
        let b = breaker();
        assert_eq!(b.allow_call("instagram"), (true, None));
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let b = breaker();
        b.record_failure("x");
        b.record_failure("x");
        assert_eq!(b.allow_call("x"), (true, None));
        b.record_failure("x");
        let (allowed, reason) = b.allow_call("x");
        assert!(!allowed);
        assert_eq!(reason, Some(DenyReason::CircuitOpen));
    }

    #[test]
    fn half_open_failure_reopens_without_threshold() {
        let b = CircuitBreaker::new(CircuitBreakerSettings {
            failure_threshold: 3,
            open_cooldown_seconds: -1, // already elapsed
            half_open_probe_count: 5,
        });
        b.record_failure("x");
        b.record_failure("x");
        b.record_failure("x");
        // cooldown already elapsed -> next allow_call transitions to half-open
        let (allowed, _) = b.allow_call("x");
        assert!(allowed);
        b.record_failure("x");
        let (allowed, reason) = b.allow_call("x");
        assert!(!allowed);
        assert_eq!(reason, Some(DenyReason::CircuitOpen));
    }

    #[test]
    fn half_open_success_closes() {
        let b = CircuitBreaker::new(CircuitBreakerSettings {
            failure_threshold: 1,
            open_cooldown_seconds: -1,
            half_open_probe_count: 5,
        });
        b.record_failure("x");
        let (allowed, _) = b.allow_call("x"); // half-open probe
        assert!(allowed);
        b.record_success("x");
        assert_eq!(b.allow_call("x"), (true, None));
    }

    #[test]
    fn half_open_probe_exhaustion_denies() {
        let b = CircuitBreaker::new(CircuitBreakerSettings {
            failure_threshold: 1,
            open_cooldown_seconds: -1,
            half_open_probe_count: 1,
        });
        b.record_failure("x");
        assert_eq!(b.allow_call("x"), (true, None));
        let (allowed, reason) = b.allow_call("x");
        assert!(!allowed);
        assert_eq!(reason, Some(DenyReason::HalfOpenProbeExhausted));
    }
}
