//! Round-robin egress selection with per-proxy degradation.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;
use tokio::time::Instant;

const DEFAULT_POOL: &str = include_str!("default_proxies.txt");

/// Network path a request goes out on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Egress {
    Direct,
    Proxy(String),
}

impl fmt::Display for Egress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Egress::Direct => write!(f, "direct"),
            Egress::Proxy(url) => write!(f, "{}", url),
        }
    }
}

/// Where the proxy pool comes from.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ProxyPool {
    /// Only the direct connection is used
    Disabled,
    /// The pool bundled with the binary
    #[default]
    Bundled,
    /// A user supplied list
    Custom(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RotatorConfig {
    pub pool: ProxyPool,
    /// Randomise the starting order so parallel runs spread their load
    pub shuffle: bool,
    pub breaker: CircuitBreakerConfig,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            pool: ProxyPool::Bundled,
            shuffle: true,
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Parses a proxy list: one entry per line, `#` comments and blanks ignored.
/// Entries without a scheme are treated as plain HTTP proxies.
pub fn parse_proxy_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            if line.contains("://") {
                line.to_string()
            } else {
                format!("http://{}", line)
            }
        })
        .collect()
}

#[derive(Debug)]
struct Rotation {
    slots: Vec<(Egress, CircuitBreaker)>,
    cursor: usize,
}

/// Hands out egresses in round-robin order, skipping degraded proxies.
///
/// Falls back to the direct connection when the pool is empty or every proxy
/// is currently degraded. Degraded proxies come back after the recovery
/// timeout.
#[derive(Debug)]
pub struct ProxyRotator {
    rotation: Mutex<Rotation>,
}

impl ProxyRotator {
    pub fn new(config: RotatorConfig) -> Self {
        let mut proxies = match config.pool {
            ProxyPool::Disabled => Vec::new(),
            ProxyPool::Bundled => parse_proxy_list(DEFAULT_POOL),
            ProxyPool::Custom(list) => list
                .iter()
                .flat_map(|entry| parse_proxy_list(entry))
                .collect(),
        };
        let mut seen = HashSet::new();
        proxies.retain(|url| seen.insert(url.clone()));
        if config.shuffle && proxies.len() > 1 {
            proxies.shuffle(&mut rand::thread_rng());
        }
        tracing::info!(proxies = proxies.len(), "Egress pool ready");

        let slots = proxies
            .into_iter()
            .map(|url| {
                let breaker = CircuitBreaker::new(url.clone(), config.breaker.clone());
                (Egress::Proxy(url), breaker)
            })
            .collect();
        Self {
            rotation: Mutex::new(Rotation { slots, cursor: 0 }),
        }
    }

    /// Direct connection only.
    pub fn direct() -> Self {
        Self::new(RotatorConfig {
            pool: ProxyPool::Disabled,
            ..Default::default()
        })
    }

    /// Next egress to use.
    pub fn next(&self) -> Egress {
        let mut rotation = self.lock();
        let now = Instant::now();
        let len = rotation.slots.len();
        for offset in 0..len {
            let index = (rotation.cursor + offset) % len;
            if rotation.slots[index].1.call_allowed(now) {
                rotation.cursor = (index + 1) % len;
                return rotation.slots[index].0.clone();
            }
        }
        if len > 0 {
            tracing::debug!("Every proxy is degraded, using direct connection");
        }
        Egress::Direct
    }

    /// Feeds the outcome of a request back into the egress health.
    pub fn record(&self, egress: &Egress, ok: bool) {
        if *egress == Egress::Direct {
            return;
        }
        let mut rotation = self.lock();
        let now = Instant::now();
        if let Some((_, breaker)) = rotation.slots.iter_mut().find(|(e, _)| e == egress) {
            if ok {
                breaker.record_success();
            } else {
                breaker.record_failure(now);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Rotation> {
        self.rotation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
