//! Retrying fetch orchestration.
//!
//! One logical request is a loop of attempts. Every attempt waits for the
//! shared [`RateLimiter`], picks an egress from the [`ProxyRotator`] and goes
//! through the [`Transport`]. Retryable failures back off exponentially;
//! terminal ones end the loop immediately. Nothing escapes as a panic: every
//! outcome is a `Result`.

use crate::error::FetchError;
use crate::fetch::proxy::{Egress, ProxyRotator};
use crate::fetch::rate_limiter::RateLimiter;
use crate::fetch::transport::{RawResponse, Transport};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per logical request
    pub attempt_budget: u32,
    /// Delay after the first failed attempt
    pub base: Duration,
    /// Ceiling of the exponential delay (jitter excluded)
    pub cap: Duration,
    /// Upper bound of the random jitter added to every delay
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_budget: 5,
            base: Duration::from_millis(3000),
            cap: Duration::from_millis(60_000),
            jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^(attempt-1), cap)`, without jitter. `attempt` is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap)
    }

    fn jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=max))
        }
    }
}

/// A fetched page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub status: u16,
    pub body: String,
    pub final_url: String,
}

/// Ephemeral record of one HTTP call.
#[derive(Debug, Clone)]
pub struct FetchAttempt {
    pub target: String,
    pub number: u32,
    pub egress: Egress,
    pub outcome: Result<u16, FetchError>,
    pub latency: Duration,
    /// Delay slept before the next attempt, if one followed
    pub backoff: Option<Duration>,
}

/// Issues logical requests with pacing, egress rotation and bounded retries.
pub struct ResilientFetcher {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    rotator: Arc<ProxyRotator>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl ResilientFetcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        rotator: Arc<ProxyRotator>,
        policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            limiter,
            rotator,
            policy,
            cancel,
        }
    }

    /// Fetches `target` with the configured attempt budget.
    pub async fn fetch(&self, target: &str) -> Result<Page, FetchError> {
        self.fetch_with_budget(target, self.policy.attempt_budget)
            .await
    }

    pub async fn fetch_with_budget(&self, target: &str, budget: u32) -> Result<Page, FetchError> {
        self.fetch_traced(target, budget).await.0
    }

    /// Like [`fetch_with_budget`](Self::fetch_with_budget), also returning every attempt made.
    pub async fn fetch_traced(
        &self,
        target: &str,
        budget: u32,
    ) -> (Result<Page, FetchError>, Vec<FetchAttempt>) {
        let budget = budget.max(1);
        let mut attempts: Vec<FetchAttempt> = Vec::with_capacity(budget as usize);

        for number in 1..=budget {
            if self.cancel.is_cancelled() {
                return (Err(FetchError::Cancelled), attempts);
            }
            self.limiter.wait().await;
            let egress = self.rotator.next();

            let started = Instant::now();
            let outcome = self.attempt(target, &egress).await;
            let latency = started.elapsed();

            let error = match outcome {
                Ok(page) => {
                    self.rotator.record(&egress, true);
                    self.limiter.record_success();
                    tracing::debug!(
                        url = target,
                        attempt = number,
                        egress = %egress,
                        latency_ms = latency.as_millis() as u64,
                        "Fetch succeeded"
                    );
                    attempts.push(FetchAttempt {
                        target: target.to_string(),
                        number,
                        egress,
                        outcome: Ok(page.status),
                        latency,
                        backoff: None,
                    });
                    return (Ok(page), attempts);
                }
                Err(error) => error,
            };

            self.rotator.record(&egress, !error.is_egress_fault());
            if error.is_rate_limited() {
                self.limiter.throttled();
            }
            tracing::debug!(
                url = target,
                attempt = number,
                egress = %egress,
                latency_ms = latency.as_millis() as u64,
                error = %error,
                "Fetch attempt failed"
            );

            if !error.is_retryable() {
                attempts.push(FetchAttempt {
                    target: target.to_string(),
                    number,
                    egress,
                    outcome: Err(error.clone()),
                    latency,
                    backoff: None,
                });
                return (Err(error), attempts);
            }

            let backoff = if number < budget {
                Some(self.delay_for(number, &error))
            } else {
                None
            };
            attempts.push(FetchAttempt {
                target: target.to_string(),
                number,
                egress,
                outcome: Err(error.clone()),
                latency,
                backoff,
            });

            if let Some(delay) = backoff {
                tracing::debug!(
                    url = target,
                    attempt = number,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before retry"
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => return (Err(FetchError::Cancelled), attempts),
                    _ = sleep(delay) => {}
                }
            }
        }

        let last = attempts
            .last()
            .and_then(|a| a.outcome.clone().err())
            .unwrap_or(FetchError::Cancelled);
        tracing::warn!(url = target, attempts = budget, error = %last, "Retries exhausted");
        (
            Err(FetchError::RetriesExhausted {
                target: target.to_string(),
                attempts: budget,
                last: Box::new(last),
            }),
            attempts,
        )
    }

    /// Backoff after a failed attempt. `Retry-After` is honoured up to the cap.
    fn delay_for(&self, attempt: u32, error: &FetchError) -> Duration {
        let mut delay = self.policy.backoff(attempt);
        if let FetchError::RateLimited {
            retry_after: Some(retry_after),
            ..
        } = error
        {
            delay = delay.max((*retry_after).min(self.policy.cap));
        }
        delay + self.policy.jitter()
    }

    async fn attempt(&self, target: &str, egress: &Egress) -> Result<Page, FetchError> {
        let response: RawResponse = self.transport.get(target, egress).await?;
        if !response.is_success() {
            return Err(FetchError::from_status(
                response.status,
                target,
                response.retry_after,
            ));
        }
        if response.body.trim().is_empty() {
            return Err(FetchError::Malformed {
                target: target.to_string(),
                message: "empty body".to_string(),
            });
        }
        Ok(Page {
            status: response.status,
            body: response.body,
            final_url: response.final_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::rate_limiter::RateLimiterConfig;
    use crate::test_utils::mocks::{FakeTransport, Scripted};

    fn no_pacing() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateLimiterConfig {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            ..Default::default()
        }))
    }

    fn policy(budget: u32) -> RetryPolicy {
        RetryPolicy {
            attempt_budget: budget,
            base: Duration::from_millis(100),
            cap: Duration::from_secs(10),
            jitter: Duration::ZERO,
        }
    }

    fn fetcher(transport: FakeTransport, budget: u32) -> ResilientFetcher {
        ResilientFetcher::new(
            Arc::new(transport),
            no_pacing(),
            Arc::new(ProxyRotator::direct()),
            policy(budget),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RetryPolicy {
            attempt_budget: 10,
            base: Duration::from_secs(3),
            cap: Duration::from_secs(60),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(3));
        assert_eq!(policy.backoff(2), Duration::from_secs(6));
        assert_eq!(policy.backoff(3), Duration::from_secs(12));
        assert_eq!(policy.backoff(6), Duration::from_secs(60));
        assert_eq!(policy.backoff(40), Duration::from_secs(60));
    }

    mod succeeds {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn retries_transient_failures_then_returns_content() {
            let transport = FakeTransport::new(vec![
                Scripted::Status(503),
                Scripted::Timeout,
                Scripted::Ok("<html>page</html>"),
            ]);
            let fetcher = fetcher(transport.clone(), 3);

            let (result, attempts) = fetcher.fetch_traced("http://upstream/company/X/", 3).await;

            assert_eq!(result.unwrap().body, "<html>page</html>");
            assert_eq!(attempts.len(), 3);
            assert_eq!(transport.calls(), 3);
            let first = attempts[0].backoff.unwrap();
            let second = attempts[1].backoff.unwrap();
            assert_eq!(first, Duration::from_millis(100));
            assert_eq!(second, first * 2);
            assert!(attempts[2].backoff.is_none());
        }

        #[tokio::test(start_paused = true)]
        async fn second_delay_roughly_doubles_with_jitter() {
            let transport = FakeTransport::new(vec![
                Scripted::Status(500),
                Scripted::Status(502),
                Scripted::Ok("ok"),
            ]);
            let fetcher = ResilientFetcher::new(
                Arc::new(transport),
                no_pacing(),
                Arc::new(ProxyRotator::direct()),
                RetryPolicy {
                    attempt_budget: 3,
                    base: Duration::from_millis(1000),
                    cap: Duration::from_secs(60),
                    jitter: Duration::from_millis(100),
                },
                CancellationToken::new(),
            );

            let (result, attempts) = fetcher.fetch_traced("http://upstream/x", 3).await;

            assert!(result.is_ok());
            let first = attempts[0].backoff.unwrap();
            let second = attempts[1].backoff.unwrap();
            assert!(first >= Duration::from_millis(1000) && first <= Duration::from_millis(1100));
            assert!(second >= Duration::from_millis(2000) && second <= Duration::from_millis(2100));
        }

        #[tokio::test(start_paused = true)]
        async fn rate_limit_widens_window_and_honours_retry_after() {
            let transport = FakeTransport::new(vec![
                Scripted::RateLimited(Some(Duration::from_secs(5))),
                Scripted::Ok("ok"),
            ]);
            let limiter = no_pacing();
            let fetcher = ResilientFetcher::new(
                Arc::new(transport),
                Arc::clone(&limiter),
                Arc::new(ProxyRotator::direct()),
                policy(3),
                CancellationToken::new(),
            );

            let (result, attempts) = fetcher.fetch_traced("http://upstream/x", 3).await;

            assert!(result.is_ok());
            assert_eq!(attempts[0].backoff, Some(Duration::from_secs(5)));
            assert_eq!(limiter.widen_factor(), 2.0);
        }
    }

    mod fails {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn not_found_is_terminal() {
            let transport = FakeTransport::new(vec![Scripted::Status(404), Scripted::Ok("never")]);
            let fetcher = fetcher(transport.clone(), 5);

            let result = fetcher.fetch("http://upstream/company/missing/").await;

            assert!(matches!(result, Err(FetchError::NotFound { .. })));
            assert_eq!(transport.calls(), 1);
        }

        #[tokio::test(start_paused = true)]
        async fn exhausts_budget_with_last_cause() {
            let transport = FakeTransport::new(vec![
                Scripted::Status(500),
                Scripted::Status(500),
                Scripted::Timeout,
            ]);
            let fetcher = fetcher(transport.clone(), 3);

            let result = fetcher.fetch("http://upstream/x").await;

            match result {
                Err(FetchError::RetriesExhausted { attempts, last, .. }) => {
                    assert_eq!(attempts, 3);
                    assert!(matches!(*last, FetchError::Timeout { .. }));
                }
                other => panic!("unexpected result: {:?}", other),
            }
            assert_eq!(transport.calls(), 3);
        }

        #[tokio::test(start_paused = true)]
        async fn empty_body_is_retried_as_malformed() {
            let transport = FakeTransport::new(vec![Scripted::Ok("  "), Scripted::Ok("  ")]);
            let fetcher = fetcher(transport, 2);

            let result = fetcher.fetch("http://upstream/x").await;

            match result {
                Err(FetchError::RetriesExhausted { last, .. }) => {
                    assert!(matches!(*last, FetchError::Malformed { .. }))
                }
                other => panic!("unexpected result: {:?}", other),
            }
        }

        #[tokio::test(start_paused = true)]
        async fn cancellation_stops_before_next_attempt() {
            let transport = FakeTransport::new(vec![Scripted::Status(500), Scripted::Ok("ok")]);
            let cancel = CancellationToken::new();
            let fetcher = ResilientFetcher::new(
                Arc::new(transport.clone()),
                no_pacing(),
                Arc::new(ProxyRotator::direct()),
                policy(3),
                cancel.clone(),
            );
            cancel.cancel();

            let result = fetcher.fetch("http://upstream/x").await;

            assert!(matches!(result, Err(FetchError::Cancelled)));
            assert_eq!(transport.calls(), 0);
        }
    }
}
