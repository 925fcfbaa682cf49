//! Request pacing shared by every worker.
//!
//! Each call to [`RateLimiter::wait`] reserves the next outbound slot under a
//! short lock and then sleeps outside of it, so waiting workers never hold the
//! lock.

use rand::Rng;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

/// Pacing window configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterConfig {
    /// Lower bound of the uniform inter-request delay
    pub min_delay: Duration,
    /// Upper bound of the uniform inter-request delay
    pub max_delay: Duration,
    /// Extra random delay added on top of the window
    pub jitter: Duration,
    /// Factor applied to the window on every throttling signal
    pub widen_multiplier: f64,
    /// Ceiling of the accumulated widening factor
    pub max_widen_factor: f64,
    /// Consecutive successes before the window shrinks one step
    pub decay_after: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(2500),
            jitter: Duration::from_millis(500),
            widen_multiplier: 2.0,
            max_widen_factor: 8.0,
            decay_after: 5,
        }
    }
}

#[derive(Debug)]
struct PacingState {
    next_allowed: Instant,
    widen_factor: f64,
    success_streak: u32,
}

/// Spaces outbound requests with a jittered, adaptively widened window.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<PacingState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let config = RateLimiterConfig {
            max_delay: config.max_delay.max(config.min_delay),
            widen_multiplier: config.widen_multiplier.max(1.0),
            max_widen_factor: config.max_widen_factor.max(1.0),
            ..config
        };
        Self {
            config,
            state: Mutex::new(PacingState {
                next_allowed: Instant::now(),
                widen_factor: 1.0,
                success_streak: 0,
            }),
        }
    }

    /// Waits for the next request slot.
    pub async fn wait(&self) {
        let slot = self.reserve();
        sleep_until(slot).await;
    }

    /// Picks the slot for the caller and pushes `next_allowed` past it.
    fn reserve(&self) -> Instant {
        let mut state = self.lock();
        let now = Instant::now();
        let slot = state.next_allowed.max(now);
        let delay = self.draw_delay(state.widen_factor);
        state.next_allowed = slot + delay;
        slot
    }

    fn draw_delay(&self, widen_factor: f64) -> Duration {
        let mut rng = rand::thread_rng();
        let min = self.config.min_delay.as_millis() as u64;
        let max = self.config.max_delay.as_millis() as u64;
        let base = if max > 0 { rng.gen_range(min..=max) } else { 0 };
        let jitter = self.config.jitter.as_millis() as u64;
        let jitter = if jitter > 0 { rng.gen_range(0..=jitter) } else { 0 };
        Duration::from_millis((base as f64 * widen_factor) as u64 + jitter)
    }

    /// Widens the window after an explicit throttling signal.
    pub fn throttled(&self) {
        let mut state = self.lock();
        let widened = state.widen_factor * self.config.widen_multiplier;
        state.widen_factor = widened.min(self.config.max_widen_factor);
        state.success_streak = 0;
        tracing::warn!(
            widen_factor = state.widen_factor,
            "Upstream throttled, widening request window"
        );
    }

    /// Counts a success; after enough in a row the window shrinks one step.
    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.widen_factor <= 1.0 {
            state.success_streak = 0;
            return;
        }
        state.success_streak += 1;
        if state.success_streak >= self.config.decay_after {
            state.widen_factor = (state.widen_factor / self.config.widen_multiplier).max(1.0);
            state.success_streak = 0;
            tracing::debug!(
                widen_factor = state.widen_factor,
                "Request window decaying toward baseline"
            );
        }
    }

    pub fn widen_factor(&self) -> f64 {
        self.lock().widen_factor
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PacingState> {
        // State stays consistent even if a holder panicked: every field is
        // written in a single assignment.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
