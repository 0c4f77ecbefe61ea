use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::core::config::BreakerConfig;
use crate::core::errors::{ProviderError, ProviderResult};
use crate::utils::Metrics;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Provider calls pass through
    Closed,
    /// Provider is considered down; calls fail fast until the cooldown elapses
    Open,
    /// Cooldown elapsed; calls are let through to probe the provider
    HalfOpen,
}

/// Guards provider calls so a dead endpoint does not cost one full retry
/// cycle per image.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<BreakerInner>>,
    failure_threshold: usize,
    success_threshold: usize,
    cooldown: Duration,
    metrics: Option<Metrics>,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: usize,
    probe_successes: usize,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig, metrics: Option<Metrics>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                probe_successes: 0,
                opened_at: None,
            })),
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            cooldown: Duration::from_secs(config.cooldown_secs),
            metrics,
        }
    }

    /// Fails with [`ProviderError::CircuitOpen`] while the circuit is open
    pub fn check(&self) -> ProviderResult<()> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let cooled_down = inner
                .opened_at
                .map(|t| t.elapsed() >= self.cooldown)
                .unwrap_or(true);
            if !cooled_down {
                return Err(ProviderError::CircuitOpen);
            }
            info!("Provider circuit half-open, probing");
            inner.state = CircuitState::HalfOpen;
            inner.probe_successes = 0;
        }

        Ok(())
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.probe_successes += 1;
            if inner.probe_successes >= self.success_threshold {
                info!("Provider recovered, circuit closed");
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;

        let trip = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            // A failed probe reopens immediately
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if trip {
            warn!(
                consecutive_failures = inner.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Provider circuit opened"
            );
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.probe_successes = 0;
            if let Some(ref m) = self.metrics {
                m.record_circuit_breaker_trip();
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}
