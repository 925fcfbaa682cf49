use crate::error::FetchError;
use crate::fetch::proxy::Egress;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client as HttpClient, Proxy};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0";

/// Response of a single HTTP exchange, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    /// URL after redirects
    pub final_url: String,
    pub retry_after: Option<Duration>,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// One HTTP GET over a chosen egress.
///
/// Errors are limited to transport-level failures (timeouts, resets, client
/// construction); any HTTP status is returned as a [`RawResponse`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, egress: &Egress) -> Result<RawResponse, FetchError>;
}

/// reqwest-backed transport keeping one client per egress.
pub struct HttpTransport {
    timeout: Duration,
    clients: Mutex<HashMap<Egress, HttpClient>>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, egress: &Egress) -> Result<HttpClient, FetchError> {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = clients.get(egress) {
            return Ok(client.clone());
        }

        let builder = HttpClient::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT);
        let builder = match egress {
            Egress::Direct => builder.no_proxy(),
            Egress::Proxy(url) => {
                let proxy = Proxy::all(url)
                    .map_err(|e| FetchError::ClientBuild(format!("invalid proxy {}: {}", url, e)))?;
                builder.proxy(proxy)
            }
        };
        let client = builder
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;
        clients.insert(egress.clone(), client.clone());
        Ok(client)
    }
}

fn classify_reqwest_error(target: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            target: target.to_string(),
        }
    } else {
        FetchError::Network {
            target: target.to_string(),
            message: err.to_string(),
        }
    }
}

/// `Retry-After` in its delay-seconds form; HTTP dates are ignored.
fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, egress: &Egress) -> Result<RawResponse, FetchError> {
        let client = self.client_for(egress)?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(url, e))?;

        Ok(RawResponse {
            status,
            body,
            final_url,
            retry_after,
        })
    }
}
