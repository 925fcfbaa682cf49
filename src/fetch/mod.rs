//! Resilient access to the upstream site.

pub mod fetcher;
pub mod proxy;
pub mod rate_limiter;
pub mod transport;
pub mod urls;

pub use fetcher::{FetchAttempt, Page, ResilientFetcher, RetryPolicy};
pub use proxy::{Egress, ProxyPool, ProxyRotator, RotatorConfig};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use transport::{HttpTransport, RawResponse, Transport};
pub use urls::Upstream;
