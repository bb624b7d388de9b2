//! Per-target circuit breaker.
//!
//! One state machine per key (`"{server}:{tool}"`, or a model name for the
//! classifier). Opens after a run of consecutive failures; while open, calls
//! fail fast for a cool-down period; then a single half-open probe is
//! allowed. Success closes the circuit, failure reopens it with an extended
//! cool-down.
//!
//! State is guarded by a short mutex; updates are fast and non-blocking.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Cool-down growth factor after a failed half-open probe, capped at 10x the
/// base cool-down.
const REOPEN_FACTOR: u32 = 2;
const MAX_COOLDOWN_FACTOR: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Entry {
    state: BreakerState,
    consecutive_failures: u32,
    open_until: Option<Instant>,
    last_failure: Option<Instant>,
    /// Current cool-down; grows while probes keep failing.
    cooldown: Duration,
}

impl Entry {
    fn new(cooldown: Duration) -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            open_until: None,
            last_failure: None,
            cooldown,
        }
    }
}

/// Snapshot of one breaker entry for the stats endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct BreakerSnapshot {
    pub key: String,
    pub state: BreakerState,
    pub consecutive_failures: u32,
}

/// Keyed circuit breakers with shared thresholds.
pub struct CircuitBreaker {
    entries: Mutex<HashMap<String, Entry>>,
    threshold: u32,
    base_cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            threshold: threshold.max(1),
            base_cooldown: cooldown,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a call to this target may proceed. An open circuit past its
    /// cool-down transitions to half-open and admits exactly one probe.
    pub fn is_allowed(&self, key: &str) -> bool {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            return true;
        };
        match entry.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let expired = entry
                    .open_until
                    .map(|until| Instant::now() >= until)
                    .unwrap_or(true);
                if expired {
                    entry.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records a success: closes the circuit and resets the cool-down.
    pub fn record_success(&self, key: &str) {
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.state = BreakerState::Closed;
            entry.consecutive_failures = 0;
            entry.open_until = None;
            entry.cooldown = self.base_cooldown;
        }
    }

    /// Records a failure. A failed half-open probe reopens with an extended
    /// cool-down; a run of `threshold` failures opens the circuit.
    pub fn record_failure(&self, key: &str) {
        let mut entries = self.lock();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(self.base_cooldown));
        entry.consecutive_failures += 1;
        entry.last_failure = Some(Instant::now());
        match entry.state {
            BreakerState::HalfOpen => {
                entry.cooldown = (entry.cooldown * REOPEN_FACTOR)
                    .min(self.base_cooldown * MAX_COOLDOWN_FACTOR);
                entry.state = BreakerState::Open;
                entry.open_until = Some(Instant::now() + entry.cooldown);
            }
            BreakerState::Closed if entry.consecutive_failures >= self.threshold => {
                entry.state = BreakerState::Open;
                entry.open_until = Some(Instant::now() + entry.cooldown);
            }
            _ => {}
        }
    }

    pub fn state(&self, key: &str) -> BreakerState {
        self.lock()
            .get(key)
            .map(|e| e.state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Snapshot of all non-closed or recently failing entries.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        self.lock()
            .iter()
            .map(|(key, e)| BreakerSnapshot {
                key: key.clone(),
                state: e.state,
                consecutive_failures: e.consecutive_failures,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: After N consecutive failures the next call is rejected
    /// without reaching the transport.
    #[test]
    fn opens_after_threshold() {
        let cb = CircuitBreaker::new(5, Duration::from_secs(60));
        for _ in 0..4 {
            cb.record_failure("web:search");
            assert!(cb.is_allowed("web:search"));
        }
        cb.record_failure("web:search");
        assert_eq!(cb.state("web:search"), BreakerState::Open);
        assert!(!cb.is_allowed("web:search"));
    }

    /// **Scenario**: A success resets the consecutive failure count.
    #[test]
    fn success_resets_failures() {
        let cb = CircuitBreaker::new(3, Duration::from_secs(60));
        cb.record_failure("k");
        cb.record_failure("k");
        cb.record_success("k");
        cb.record_failure("k");
        cb.record_failure("k");
        assert!(cb.is_allowed("k"));
    }

    /// **Scenario**: After the cool-down, exactly one probe is admitted.
    #[test]
    fn half_open_single_probe() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(0));
        cb.record_failure("k");
        // Cool-down of zero: first check transitions to half-open.
        assert!(cb.is_allowed("k"));
        assert_eq!(cb.state("k"), BreakerState::HalfOpen);
        // Second caller during the probe is rejected.
        assert!(!cb.is_allowed("k"));
    }

    /// **Scenario**: A successful probe closes the circuit.
    #[test]
    fn probe_success_closes() {
        let cb = CircuitBreaker::new(1, Duration::from_millis(0));
        cb.record_failure("k");
        assert!(cb.is_allowed("k"));
        cb.record_success("k");
        assert_eq!(cb.state("k"), BreakerState::Closed);
        assert!(cb.is_allowed("k"));
    }

    /// **Scenario**: A failed probe reopens with an extended cool-down.
    #[test]
    fn probe_failure_reopens_longer() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(60));
        cb.record_failure("k");
        // Force half-open by treating the missing deadline as expired.
        {
            let mut entries = cb.lock();
            entries.get_mut("k").unwrap().open_until = None;
        }
        assert!(cb.is_allowed("k"));
        cb.record_failure("k");
        let entries = cb.lock();
        let entry = entries.get("k").unwrap();
        assert_eq!(entry.state, BreakerState::Open);
        assert_eq!(entry.cooldown, Duration::from_secs(120));
    }

    /// **Scenario**: Keys are independent.
    #[test]
    fn keys_are_independent() {
        let cb = CircuitBreaker::new(1, Duration::from_secs(60));
        cb.record_failure("a");
        assert!(!cb.is_allowed("a"));
        assert!(cb.is_allowed("b"));
    }
}
