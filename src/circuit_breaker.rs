//! Per-dependency circuit breaker (§4.3, §9): closed/open/half-open, N
//! consecutive failures open the breaker for T seconds, then a single
//! half-open probe decides whether to close again or re-open.
//!
//! Grounded on `aka-1976-Axiom-Protocol`'s `EmergencyCircuitBreaker`
//! (hold-the-lock-through-the-decision shape, auto-recovery after a fixed
//! window) generalized from one global breaker to a registry keyed by
//! dependency name, using `dashmap` for the registry and `parking_lot::Mutex`
//! for each breaker's state, matching the concurrency primitives already
//! used across `analyzers/network.rs`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    opened_at: Option<Instant>,
    /// Set when the single half-open probe slot has been handed to a caller;
    /// cleared whenever the breaker leaves `HalfOpen` (§4.3 "after T, the
    /// next call attempts half-open" — singular, so concurrent callers during
    /// the probe window must not all be let through).
    half_open_probe_claimed: bool,
}

/// One breaker per external dependency. `consecutive_failures` is a separate
/// atomic so the hot-path success case (`record_success`) never needs the
/// mutex once the breaker is closed and healthy.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    open_duration: Duration,
    consecutive_failures: AtomicU32,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            open_duration,
            consecutive_failures: AtomicU32::new(0),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                opened_at: None,
                half_open_probe_claimed: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call before attempting the guarded operation. Returns `true` if the
    /// call should proceed (closed, or this caller claimed the single
    /// half-open probe slot), `false` if the breaker is open — or half-open
    /// with its one probe already claimed by another caller — and the
    /// caller should fall back immediately.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => {
                if inner.half_open_probe_claimed {
                    false
                } else {
                    inner.half_open_probe_claimed = true;
                    true
                }
            }
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.open_duration {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_probe_claimed = true;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            inner.half_open_probe_claimed = false;
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.half_open_probe_claimed = false;
            self.consecutive_failures.store(self.failure_threshold, Ordering::SeqCst);
            warn!(dependency = %self.name, "half-open probe failed, re-opening circuit");
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.failure_threshold && inner.state == CircuitState::Closed {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                dependency = %self.name,
                failures,
                "circuit opened after consecutive failures"
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}

/// One registry per process (§5), shared across pipeline instances. Breakers
/// are created lazily on first use per dependency name.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, std::sync::Arc<CircuitBreaker>>,
    failure_threshold: u32,
    open_duration: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold,
            open_duration,
        }
    }

    pub fn get(&self, dependency: &str) -> std::sync::Arc<CircuitBreaker> {
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                std::sync::Arc::new(CircuitBreaker::new(
                    dependency,
                    self.failure_threshold,
                    self.open_duration,
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new("spam_db", 3, Duration::from_secs(30));
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let breaker = CircuitBreaker::new("llm", 3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("spam_db", 1, Duration::from_millis(1));
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_probe_success_closes() {
        let breaker = CircuitBreaker::new("spam_db", 1, Duration::from_millis(1));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_only_lets_one_probe_through() {
        let breaker = CircuitBreaker::new("spam_db", 1, Duration::from_millis(1));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(5));

        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.allow_request());
        assert!(!breaker.allow_request());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn registry_reuses_breaker_per_dependency() {
        let registry = CircuitBreakerRegistry::new(5, Duration::from_secs(30));
        let a = registry.get("spam_db");
        a.record_failure();
        let b = registry.get("spam_db");
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }
}
