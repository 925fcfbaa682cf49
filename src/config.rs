use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::ConfigError;
use crate::fetch::proxy::parse_proxy_list;
use crate::fetch::{ProxyPool, RateLimiterConfig, RetryPolicy, RotatorConfig};
use crate::merge::PeriodRetention;
use crate::model::View;
use serde_derive::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl AppConfig {
    pub fn log_level(&self) -> tracing::Level {
        tracing::Level::from_str(self.log_level.as_str()).unwrap_or(tracing::Level::INFO)
    }
}

pub(crate) fn load_app_config() -> Result<AppConfig, ConfigError> {
    envy::from_env::<AppConfig>().map_err(ConfigError::env_parse)
}

fn default_base_url() -> String {
    "https://www.screener.in".to_string()
}

fn default_index() -> String {
    crate::roster::ALL_INDEX.to_string()
}

fn default_directory_file() -> PathBuf {
    PathBuf::from("corporate_actions.json")
}

fn default_concurrency() -> usize {
    2
}

#[derive(Deserialize, Debug)]
pub struct ScraperConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Roster name; `all` scrapes the whole directory
    #[serde(default = "default_index")]
    pub index: String,
    pub roster_file: Option<PathBuf>,
    #[serde(default = "default_directory_file")]
    pub directory_file: PathBuf,
    #[serde(default)]
    pub standalone: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    pub limit: Option<usize>,
}

impl ScraperConfig {
    pub fn view(&self) -> View {
        if self.standalone {
            View::Standalone
        } else {
            View::Consolidated
        }
    }

    /// Entity cap for the run. Zero means no cap.
    pub fn limit(&self) -> Option<usize> {
        match self.limit {
            Some(0) => {
                tracing::warn!("SCRAPER_LIMIT=0 means no limit");
                None
            }
            other => other,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("SCRAPER_CONCURRENCY", "must be at least 1"));
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::missing("SCRAPER_BASE_URL"));
        }
        if !self.index.eq_ignore_ascii_case(crate::roster::ALL_INDEX) && self.roster_file.is_none() {
            return Err(ConfigError::missing("SCRAPER_ROSTER_FILE"));
        }
        Ok(())
    }
}

pub fn load_scraper_config() -> Result<ScraperConfig, ConfigError> {
    let config = envy::prefixed("SCRAPER_")
        .from_env::<ScraperConfig>()
        .map_err(ConfigError::env_parse)?;
    config.validate()?;
    Ok(config)
}

fn default_min_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    2500
}

fn default_pacing_jitter_ms() -> u64 {
    500
}

fn default_widen_multiplier() -> f64 {
    2.0
}

fn default_max_widen_factor() -> f64 {
    8.0
}

fn default_decay_after() -> u32 {
    5
}

#[derive(Deserialize, Debug)]
pub struct RateLimitConfig {
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_pacing_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_widen_multiplier")]
    pub widen_multiplier: f64,
    #[serde(default = "default_max_widen_factor")]
    pub max_widen_factor: f64,
    // successes in a row before the window shrinks one step
    #[serde(default = "default_decay_after")]
    pub decay_after: u32,
}

impl RateLimitConfig {
    pub fn limiter_config(&self) -> Result<RateLimiterConfig, ConfigError> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(ConfigError::invalid(
                "RATE_LIMIT_MIN_DELAY_MS",
                format!(
                    "{} is above RATE_LIMIT_MAX_DELAY_MS ({})",
                    self.min_delay_ms, self.max_delay_ms
                ),
            ));
        }
        if self.widen_multiplier < 1.0 || self.max_widen_factor < 1.0 {
            return Err(ConfigError::invalid(
                "RATE_LIMIT_WIDEN_MULTIPLIER",
                "widening factors must be at least 1.0",
            ));
        }
        Ok(RateLimiterConfig {
            min_delay: Duration::from_millis(self.min_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            widen_multiplier: self.widen_multiplier,
            max_widen_factor: self.max_widen_factor,
            decay_after: self.decay_after.max(1),
        })
    }
}

pub fn load_rate_limit_config() -> Result<RateLimitConfig, ConfigError> {
    envy::prefixed("RATE_LIMIT_")
        .from_env::<RateLimitConfig>()
        .map_err(ConfigError::env_parse)
}

fn default_attempt_budget() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    3000
}

fn default_backoff_cap_ms() -> u64 {
    60_000
}

fn default_retry_jitter_ms() -> u64 {
    1000
}

fn default_request_timeout_sec() -> u64 {
    30
}

#[derive(Deserialize, Debug)]
pub struct RetryConfig {
    #[serde(default = "default_attempt_budget")]
    pub attempt_budget: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_retry_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_request_timeout_sec")]
    pub request_timeout_sec: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> Result<RetryPolicy, ConfigError> {
        if self.attempt_budget == 0 {
            return Err(ConfigError::invalid("RETRY_ATTEMPT_BUDGET", "must be at least 1"));
        }
        Ok(RetryPolicy {
            attempt_budget: self.attempt_budget,
            base: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_millis(self.backoff_cap_ms.max(self.backoff_base_ms)),
            jitter: Duration::from_millis(self.jitter_ms),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec.max(1))
    }
}

pub fn load_retry_config() -> Result<RetryConfig, ConfigError> {
    envy::prefixed("RETRY_")
        .from_env::<RetryConfig>()
        .map_err(ConfigError::env_parse)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_sec() -> u64 {
    120
}

#[derive(Deserialize, Debug)]
pub struct ProxyConfig {
    pub file: Option<PathBuf>,
    /// Comma separated proxy URLs
    pub list: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_sec")]
    pub recovery_sec: u64,
}

impl ProxyConfig {
    /// Resolves the pool: disabled, then an explicit list or file, then the bundled pool.
    pub async fn rotator_config(&self) -> Result<RotatorConfig, ConfigError> {
        let pool = if self.disabled {
            ProxyPool::Disabled
        } else if let Some(list) = &self.list {
            ProxyPool::Custom(parse_proxy_list(&list.replace(',', "\n")))
        } else if let Some(file) = &self.file {
            let content = tokio::fs::read_to_string(file).await.map_err(|e| {
                ConfigError::invalid("PROXY_FILE", format!("{}: {}", file.display(), e))
            })?;
            ProxyPool::Custom(parse_proxy_list(&content))
        } else {
            ProxyPool::Bundled
        };
        Ok(RotatorConfig {
            pool,
            breaker: CircuitBreakerConfig {
                failure_threshold: self.failure_threshold.max(1),
                recovery_timeout: Duration::from_secs(self.recovery_sec),
            },
            ..Default::default()
        })
    }
}

pub fn load_proxy_config() -> Result<ProxyConfig, ConfigError> {
    envy::prefixed("PROXY_")
        .from_env::<ProxyConfig>()
        .map_err(ConfigError::env_parse)
}

/// Which [`Repository`](crate::model::Repository) backend to write to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Json,
    Memory,
}

fn default_backend() -> String {
    "json".to_string()
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_write_retries() -> u32 {
    3
}

fn default_write_retry_delay_ms() -> u64 {
    2000
}

#[derive(Deserialize, Debug)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
    #[serde(default = "default_write_retry_delay_ms")]
    pub write_retry_delay_ms: u64,
}

impl StoreConfig {
    pub fn backend(&self) -> Result<StoreBackend, ConfigError> {
        match self.backend.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(StoreBackend::Json),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::invalid(
                "STORE_BACKEND",
                format!("unknown backend '{}'", other),
            )),
        }
    }

    pub fn write_retry_delay(&self) -> Duration {
        Duration::from_millis(self.write_retry_delay_ms)
    }
}

pub fn load_store_config() -> Result<StoreConfig, ConfigError> {
    let config = envy::prefixed("STORE_")
        .from_env::<StoreConfig>()
        .map_err(ConfigError::env_parse)?;
    config.backend()?;
    Ok(config)
}

fn default_period_retention() -> String {
    PeriodRetention::default().to_string()
}

#[derive(Deserialize, Debug)]
pub struct MergeConfig {
    #[serde(default = "default_period_retention")]
    pub period_retention: String,
}

impl MergeConfig {
    pub fn retention(&self) -> Result<PeriodRetention, ConfigError> {
        self.period_retention
            .parse()
            .map_err(|message: String| ConfigError::invalid("MERGE_PERIOD_RETENTION", message))
    }
}

pub fn load_merge_config() -> Result<MergeConfig, ConfigError> {
    let config = envy::prefixed("MERGE_")
        .from_env::<MergeConfig>()
        .map_err(ConfigError::env_parse)?;
    config.retention()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::config::{with_env_vars, without_env_vars};
    use serial_test::serial;

    const SCRAPER_VARS: [&str; 7] = [
        "SCRAPER_BASE_URL",
        "SCRAPER_INDEX",
        "SCRAPER_ROSTER_FILE",
        "SCRAPER_DIRECTORY_FILE",
        "SCRAPER_STANDALONE",
        "SCRAPER_CONCURRENCY",
        "SCRAPER_LIMIT",
    ];

    mod succeeds {
        use super::*;

        #[test]
        #[serial]
        fn test_load_app_config() {
            with_env_vars(&[("LOG_LEVEL", "debug")], || {
                let config = load_app_config().unwrap();
                assert_eq!(config.log_level, "debug");
                assert_eq!(config.log_level(), tracing::Level::DEBUG);
            });
        }

        #[test]
        #[serial]
        fn test_load_app_config_missing() {
            without_env_vars(&["LOG_LEVEL"], || {
                let config = load_app_config().unwrap();
                assert_eq!(config.log_level, "info");
            });
        }

        #[test]
        #[serial]
        fn test_scraper_defaults() {
            without_env_vars(&SCRAPER_VARS, || {
                let config = load_scraper_config().unwrap();
                assert_eq!(config.base_url, "https://www.screener.in");
                assert_eq!(config.index, "all");
                assert_eq!(config.directory_file, PathBuf::from("corporate_actions.json"));
                assert_eq!(config.view(), View::Consolidated);
                assert_eq!(config.concurrency, 2);
                assert_eq!(config.limit(), None);
            });
        }

        #[test]
        #[serial]
        fn test_scraper_overrides() {
            without_env_vars(&SCRAPER_VARS, || {
                with_env_vars(
                    &[
                        ("SCRAPER_INDEX", "NIFTY 50"),
                        ("SCRAPER_ROSTER_FILE", "nifty50.json"),
                        ("SCRAPER_STANDALONE", "true"),
                        ("SCRAPER_CONCURRENCY", "4"),
                        ("SCRAPER_LIMIT", "0"),
                    ],
                    || {
                        let config = load_scraper_config().unwrap();
                        assert_eq!(config.roster_file, Some(PathBuf::from("nifty50.json")));
                        assert_eq!(config.view(), View::Standalone);
                        assert_eq!(config.concurrency, 4);
                        assert_eq!(config.limit(), None);
                    },
                );
            });
        }

        #[test]
        #[serial]
        fn test_pacing_and_retry_defaults() {
            let vars = [
                "RATE_LIMIT_MIN_DELAY_MS",
                "RATE_LIMIT_MAX_DELAY_MS",
                "RATE_LIMIT_JITTER_MS",
                "RETRY_ATTEMPT_BUDGET",
                "RETRY_BACKOFF_BASE_MS",
                "RETRY_BACKOFF_CAP_MS",
                "RETRY_JITTER_MS",
            ];
            without_env_vars(&vars, || {
                let limiter = load_rate_limit_config().unwrap().limiter_config().unwrap();
                assert_eq!(limiter, RateLimiterConfig::default());
                let retry = load_retry_config().unwrap();
                assert_eq!(retry.policy().unwrap(), RetryPolicy::default());
                assert_eq!(retry.request_timeout(), Duration::from_secs(30));
            });
        }

        #[tokio::test]
        async fn test_proxy_pool_selection() {
            let disabled = ProxyConfig {
                file: None,
                list: Some("10.0.0.1:8080".to_string()),
                disabled: true,
                failure_threshold: 3,
                recovery_sec: 120,
            };
            assert_eq!(disabled.rotator_config().await.unwrap().pool, ProxyPool::Disabled);

            let listed = ProxyConfig {
                disabled: false,
                ..disabled
            };
            assert_eq!(
                listed.rotator_config().await.unwrap().pool,
                ProxyPool::Custom(vec!["http://10.0.0.1:8080".to_string()])
            );

            let bundled = ProxyConfig {
                list: None,
                ..listed
            };
            let config = bundled.rotator_config().await.unwrap();
            assert_eq!(config.pool, ProxyPool::Bundled);
            assert_eq!(config.breaker.recovery_timeout, Duration::from_secs(120));
        }

        #[tokio::test]
        async fn test_proxy_file() {
            let dir = tempfile::tempdir().unwrap();
            let file = dir.path().join("proxies.txt");
            std::fs::write(&file, "# pool\nsocks5://10.0.0.2:1080\n10.0.0.3:3128\n").unwrap();
            let config = ProxyConfig {
                file: Some(file),
                list: None,
                disabled: false,
                failure_threshold: 3,
                recovery_sec: 120,
            };
            assert_eq!(
                config.rotator_config().await.unwrap().pool,
                ProxyPool::Custom(vec![
                    "socks5://10.0.0.2:1080".to_string(),
                    "http://10.0.0.3:3128".to_string(),
                ])
            );
        }

        #[test]
        #[serial]
        fn test_store_and_merge_config() {
            with_env_vars(
                &[("STORE_BACKEND", "Memory"), ("MERGE_PERIOD_RETENTION", "mirror")],
                || {
                    let store = load_store_config().unwrap();
                    assert_eq!(store.backend().unwrap(), StoreBackend::Memory);
                    assert_eq!(store.results_dir, PathBuf::from("results"));
                    assert_eq!(store.write_retries, 3);
                    let merge = load_merge_config().unwrap();
                    assert_eq!(merge.retention().unwrap(), PeriodRetention::Mirror);
                },
            );
        }
    }

    mod fails {
        use super::*;

        #[test]
        #[serial]
        fn test_zero_concurrency() {
            without_env_vars(&SCRAPER_VARS, || {
                with_env_vars(&[("SCRAPER_CONCURRENCY", "0")], || {
                    let err = load_scraper_config().unwrap_err();
                    assert!(err.to_string().contains("SCRAPER_CONCURRENCY"));
                });
            });
        }

        #[test]
        #[serial]
        fn test_named_index_requires_roster_file() {
            without_env_vars(&SCRAPER_VARS, || {
                with_env_vars(&[("SCRAPER_INDEX", "NIFTY 50")], || {
                    assert!(matches!(
                        load_scraper_config(),
                        Err(ConfigError::Missing(_))
                    ));
                });
            });
        }

        #[test]
        #[serial]
        fn test_unparseable_number() {
            with_env_vars(&[("RETRY_ATTEMPT_BUDGET", "many")], || {
                assert!(matches!(load_retry_config(), Err(ConfigError::EnvParse(_))));
            });
        }

        #[test]
        #[serial]
        fn test_min_delay_above_max() {
            with_env_vars(
                &[("RATE_LIMIT_MIN_DELAY_MS", "5000"), ("RATE_LIMIT_MAX_DELAY_MS", "100")],
                || {
                    let config = load_rate_limit_config().unwrap();
                    assert!(matches!(
                        config.limiter_config(),
                        Err(ConfigError::Invalid { .. })
                    ));
                },
            );
        }

        #[test]
        #[serial]
        fn test_unknown_backend_and_retention() {
            with_env_vars(
                &[("STORE_BACKEND", "mongodb"), ("MERGE_PERIOD_RETENTION", "drop")],
                || {
                    assert!(load_store_config().is_err());
                    assert!(load_merge_config().is_err());
                },
            );
        }

        #[tokio::test]
        async fn test_missing_proxy_file() {
            let config = ProxyConfig {
                file: Some(PathBuf::from("/nonexistent/proxies.txt")),
                list: None,
                disabled: false,
                failure_threshold: 3,
                recovery_sec: 120,
            };
            assert!(config.rotator_config().await.is_err());
        }
    }
}
