//! Mock implementations and server helpers for testing.
//!
//! [`FakeTransport`] replays a script of outcomes without touching the
//! network; [`MockScreenerServerBuilder`] stands up a wiremock server shaped
//! like the upstream site for end-to-end pipeline tests.

use crate::error::FetchError;
use crate::fetch::{
    Egress, HttpTransport, ProxyRotator, RateLimiter, RateLimiterConfig, RawResponse,
    ResilientFetcher, RetryPolicy, Transport,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// One scripted transport outcome.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Response with the given status and an empty body
    Status(u16),
    /// Transport-level timeout
    Timeout,
    /// 200 with the given body
    Ok(&'static str),
    /// 429 with an optional `Retry-After`
    RateLimited(Option<Duration>),
}

/// Transport replaying [`Scripted`] outcomes in order.
///
/// Clones share the script and the call counter. Once the script runs out
/// every call fails as a network error.
#[derive(Debug, Clone)]
pub struct FakeTransport {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    calls: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of requests issued so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(&self, url: &str, _egress: &Egress) -> Result<RawResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let response = |status: u16, body: &str, retry_after: Option<Duration>| RawResponse {
            status,
            body: body.to_string(),
            final_url: url.to_string(),
            retry_after,
        };
        match next {
            Some(Scripted::Status(status)) => Ok(response(status, "", None)),
            Some(Scripted::Ok(body)) => Ok(response(200, body, None)),
            Some(Scripted::RateLimited(retry_after)) => Ok(response(429, "", retry_after)),
            Some(Scripted::Timeout) => Err(FetchError::Timeout {
                target: url.to_string(),
            }),
            None => Err(FetchError::Network {
                target: url.to_string(),
                message: "script exhausted".to_string(),
            }),
        }
    }
}

/// Fetcher over real HTTP with no pacing and near-instant retries.
pub fn fast_fetcher(cancel: CancellationToken) -> ResilientFetcher {
    let limiter = RateLimiter::new(RateLimiterConfig {
        min_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        jitter: Duration::ZERO,
        ..Default::default()
    });
    ResilientFetcher::new(
        Arc::new(HttpTransport::new(Duration::from_secs(5))),
        Arc::new(limiter),
        Arc::new(ProxyRotator::direct()),
        RetryPolicy {
            attempt_budget: 2,
            base: Duration::from_millis(5),
            cap: Duration::from_millis(10),
            jitter: Duration::ZERO,
        },
        cancel,
    )
}

/// Builder for a wiremock server serving company pages and schedules.
///
/// Unmocked paths answer 404, which the pipeline reads as "no such slug".
pub struct MockScreenerServerBuilder {
    server: MockServer,
}

impl MockScreenerServerBuilder {
    pub async fn new() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Serves `html` as the consolidated company page of `slug`.
    pub async fn mock_company_page(self, slug: &str, html: String) -> Self {
        Mock::given(method("GET"))
            .and(path(format!("/company/{}/consolidated/", slug)))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&self.server)
            .await;
        self
    }

    /// Serves a schedules API body for one parent row of a company.
    pub async fn mock_schedule(self, company_id: &str, parent: &str, body: String) -> Self {
        Mock::given(method("GET"))
            .and(path(format!("/api/company/{}/schedules/", company_id)))
            .and(query_param("parent", parent))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string(body),
            )
            .mount(&self.server)
            .await;
        self
    }

    /// Answers every request to `route` with `status`.
    pub async fn mock_status(self, route: &str, status: u16) -> Self {
        Mock::given(method("GET"))
            .and(path(route.to_string()))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
        self
    }

    pub fn build(self) -> MockServer {
        self.server
    }
}
