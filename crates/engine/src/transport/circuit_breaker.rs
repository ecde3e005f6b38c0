// ── Circuit Breaker ──────────────────────────────────────────────────────
// Per-endpoint failure accumulator with three logical states, gating both
// direct calls (via `Transport::request`) and fallback spawns (via
// `spawn_gate`). State is derived from two atomics so `record_success` and
// `record_failure` never need a lock on the hot path.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// `opened_at` of zero means "not open". This makes the struct safe to
/// construct with `Default` / `new` without an `Option` behind an atomic.
pub struct CircuitBreaker {
    name: String,
    failures: AtomicU32,
    opened_at_epoch_ms: AtomicU64,
    threshold: u32,
    reset_after_secs: u64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, threshold: u32, reset_after_secs: u64) -> Self {
        CircuitBreaker {
            name: name.into(),
            failures: AtomicU32::new(0),
            opened_at_epoch_ms: AtomicU64::new(0),
            threshold,
            reset_after_secs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    fn now_ms() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
    }

    /// Current tri-state. `HalfOpen` means the open window elapsed and the
    /// next attempt should probe the endpoint — it does not clear any
    /// counters by itself; only `record_success`/`record_failure` do.
    pub fn state(&self) -> CircuitState {
        let opened_at = self.opened_at_epoch_ms.load(Ordering::SeqCst);
        if opened_at == 0 {
            return CircuitState::Closed;
        }
        let elapsed_ms = Self::now_ms().saturating_sub(opened_at);
        if elapsed_ms < self.reset_after_secs.saturating_mul(1000) {
            CircuitState::Open
        } else {
            CircuitState::HalfOpen
        }
    }

    /// Fails fast with `CbOpen` when the circuit is open; `Ok` when closed
    /// or half-open (callers in half-open state are expected to be the
    /// probe attempt).
    pub fn check(&self) -> EngineResult<()> {
        match self.state() {
            CircuitState::Open => Err(EngineError::cb_open(
                self.name.clone(),
                format!("{} failures recorded, threshold {}", self.failures(), self.threshold),
            )),
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        }
    }

    /// The pre-spawn check callers must invoke before spawning a sub-agent
    /// as a fallback to a failed call through this breaker's endpoint.
    pub fn spawn_gate(&self) -> EngineResult<()> {
        self.check()
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
        self.opened_at_epoch_ms.store(0, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.threshold {
            // Only stamp opened_at once per trip; a half-open probe that
            // fails again re-stamps it, restarting the cooldown.
            self.opened_at_epoch_ms.store(Self::now_ms(), Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn closed_until_threshold_reached() {
        let cb = CircuitBreaker::new("test", 3, 60);
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.check().is_err());
    }

    #[test]
    fn record_success_clears_failures_and_trip() {
        let cb = CircuitBreaker::new("test", 2, 60);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failures(), 0);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn half_open_after_reset_window_elapses() {
        let cb = CircuitBreaker::new("test", 1, 0);
        cb.record_failure();
        sleep(Duration::from_millis(5));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn spawn_gate_mirrors_check() {
        let cb = CircuitBreaker::new("test", 1, 60);
        assert!(cb.spawn_gate().is_ok());
        cb.record_failure();
        assert!(cb.spawn_gate().is_err());
    }
}
