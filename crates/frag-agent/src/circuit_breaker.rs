//! Circuit breaker guarding the model provider
//!
//! After `threshold` consecutive non-retryable failures the breaker opens and
//! model calls fail fast until `cooldown` has elapsed. The first call after
//! that is let through as a probe; success closes the breaker again.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls allowed
    Closed,
    /// Failing fast
    Open,
    /// Cooldown elapsed, next call is a probe
    HalfOpen,
}

#[derive(Debug, Default)]
struct Failures {
    count: u32,
    last: Option<Instant>,
}

/// Consecutive-failure circuit breaker
///
/// ```
/// use frag_agent::CircuitBreaker;
///
/// let breaker = CircuitBreaker::default();
/// breaker.record_failure();
/// breaker.record_failure();
/// breaker.record_failure();
/// assert!(!breaker.can_execute());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    failures: Mutex<Failures>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            failures: Mutex::new(Failures::default()),
            threshold,
            cooldown,
        }
    }

    fn with_failures<R>(&self, f: impl FnOnce(&mut Failures) -> R) -> R {
        let mut guard = self
            .failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub fn state(&self) -> CircuitState {
        self.with_failures(|failures| {
            if failures.count < self.threshold {
                return CircuitState::Closed;
            }
            match failures.last {
                Some(last) if last.elapsed() < self.cooldown => CircuitState::Open,
                _ => CircuitState::HalfOpen,
            }
        })
    }

    pub fn record_success(&self) {
        self.with_failures(|failures| *failures = Failures::default());
    }

    pub fn record_failure(&self) {
        self.with_failures(|failures| {
            failures.count = failures.count.saturating_add(1);
            failures.last = Some(Instant::now());
        });
    }

    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn failure_count(&self) -> u32 {
        self.with_failures(|failures| failures.count)
    }

    /// Time left before a probe is allowed. Zero unless open.
    pub fn time_until_retry(&self) -> Duration {
        if self.state() != CircuitState::Open {
            return Duration::ZERO;
        }
        self.with_failures(|failures| {
            failures
                .last
                .map(|last| self.cooldown.saturating_sub(last.elapsed()))
                .unwrap_or(Duration::ZERO)
        })
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_initial_state_closed() {
        let breaker = CircuitBreaker::default();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
        assert_eq!(breaker.time_until_retry(), Duration::ZERO);
    }

    #[test]
    fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
        assert!(breaker.time_until_retry() > Duration::ZERO);
    }

    #[test]
    fn test_probe_after_cooldown_then_close() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(50));

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        sleep(Duration::from_millis(80));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.can_execute());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }
}
