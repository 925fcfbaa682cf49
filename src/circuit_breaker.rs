use std::time::Duration;
use tokio::time::Instant;

/// Health state of one network egress.
#[derive(Debug, Clone, PartialEq)]
pub enum CircuitState {
    /// Egress is healthy
    Closed {
        /// Number of consecutive failures
        failure_count: u32,
    },
    /// Egress is degraded and skipped by rotation
    Open {
        /// When the egress was degraded
        opened_at: Instant,
    },
    /// Recovery period elapsed; the next request is a trial
    HalfOpen,
}

/// Configuration for egress degradation.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before the egress is degraded
    pub failure_threshold: u32,
    /// How long a degraded egress is skipped before it is tried again
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(120),
        }
    }
}

/// Failure tracker for a single egress.
///
/// Not synchronised on its own: the proxy rotator owns one per egress and
/// updates them under its own lock, together with the rotation cursor.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    config: CircuitBreakerConfig,
    name: String,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed { failure_count: 0 },
            config,
            name: name.into(),
        }
    }

    /// Checks whether the egress may be used at `now`, moving an expired
    /// `Open` state to `HalfOpen`.
    pub fn call_allowed(&mut self, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed { .. } | CircuitState::HalfOpen => true,
            CircuitState::Open { opened_at } => {
                if now.saturating_duration_since(opened_at) >= self.config.recovery_timeout {
                    tracing::info!(egress = %self.name, "Retrying degraded egress");
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            tracing::info!(egress = %self.name, "Egress recovered");
        }
        self.state = CircuitState::Closed { failure_count: 0 };
    }

    pub fn record_failure(&mut self, now: Instant) {
        match self.state {
            CircuitState::Closed { failure_count } => {
                let failure_count = failure_count + 1;
                if failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        egress = %self.name,
                        failure_count,
                        "Egress degraded after consecutive failures"
                    );
                    self.state = CircuitState::Open { opened_at: now };
                } else {
                    self.state = CircuitState::Closed { failure_count };
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(egress = %self.name, "Egress still failing, degrading again");
                self.state = CircuitState::Open { opened_at: now };
            }
            CircuitState::Open { .. } => {}
        }
    }
}
