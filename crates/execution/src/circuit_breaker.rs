//! Coordinator-wide circuit breaker for broker submissions.
//!
//! Opens after `failure_threshold` failures inside the rolling window with
//! no success in between. While open, submissions short-circuit without
//! contacting the broker. After the cool-down one probe is let through
//! (half-open): success closes the breaker, failure re-opens it.

use std::collections::VecDeque;
use std::time::Duration;

use oi_strangle_core::CircuitBreakerConfig;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Returned when a submission may not contact the broker.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BreakerRejection {
    #[error("circuit breaker open, {remaining_ms}ms of cool-down left")]
    Open { remaining_ms: u64 },

    #[error("circuit breaker half-open, probe already in flight")]
    ProbeInFlight,
}

#[derive(Debug)]
enum Phase {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    phase: Phase,
    failures: VecDeque<Instant>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: usize,
    window: Duration,
    cool_down: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            threshold: config.failure_threshold as usize,
            window: config.window(),
            cool_down: config.cool_down(),
            inner: Mutex::new(BreakerInner {
                phase: Phase::Closed,
                failures: VecDeque::new(),
            }),
        }
    }

    /// Asks to contact the broker.
    ///
    /// An open breaker whose cool-down has elapsed moves to half-open and
    /// grants this caller the single probe.
    ///
    /// # Errors
    ///
    /// Returns the reason the attempt must short-circuit.
    pub fn try_acquire(&self) -> Result<(), BreakerRejection> {
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::Closed => Ok(()),
            Phase::HalfOpen => Err(BreakerRejection::ProbeInFlight),
            Phase::Open { since } => {
                let elapsed = since.elapsed();
                if elapsed >= self.cool_down {
                    inner.phase = Phase::HalfOpen;
                    info!("Circuit breaker half-open, allowing probe");
                    Ok(())
                } else {
                    let remaining = self.cool_down - elapsed;
                    Err(BreakerRejection::Open {
                        remaining_ms: u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX),
                    })
                }
            }
        }
    }

    /// Records a broker call that succeeded. Closes the breaker.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if !matches!(inner.phase, Phase::Closed) {
            info!("Circuit breaker closed");
        }
        inner.phase = Phase::Closed;
        inner.failures.clear();
    }

    /// Records a broker call that failed, transient or permanent.
    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.phase {
            Phase::HalfOpen => {
                inner.phase = Phase::Open { since: now };
                warn!("Circuit breaker probe failed, re-opening");
            }
            Phase::Open { .. } => {}
            Phase::Closed => {
                inner.failures.push_back(now);
                Self::prune(&mut inner.failures, now, self.window);
                if inner.failures.len() >= self.threshold {
                    inner.phase = Phase::Open { since: now };
                    warn!(
                        failures = inner.failures.len(),
                        window_secs = self.window.as_secs(),
                        "Circuit breaker opened"
                    );
                }
            }
        }
    }

    /// Failures counted towards opening, within the window.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        let mut inner = self.inner.lock();
        Self::prune(&mut inner.failures, Instant::now(), self.window);
        inner.failures.len()
    }

    #[must_use]
    pub fn state(&self) -> BreakerState {
        match self.inner.lock().phase {
            Phase::Closed => BreakerState::Closed,
            Phase::Open { .. } => BreakerState::Open,
            Phase::HalfOpen => BreakerState::HalfOpen,
        }
    }

    fn prune(failures: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = failures.front() {
            if now.duration_since(oldest) > window {
                failures.pop_front();
            } else {
                break;
            }
        }
    }
}
