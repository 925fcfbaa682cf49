//! Screener Fundamentals Forwarder
//!
//! Scrapes the financial statements of listed companies from a screener-style
//! site and keeps a per-section snapshot of every KPI row up to date.
//!
//! # Architecture
//!
//! One run walks the resolved roster, stalest entities first:
//! - **Fetch**: paced, proxy-rotated requests with bounded exponential retries
//! - **Parse**: section tables into KPI records, plus child breakdowns
//! - **Merge**: idempotent reconciliation that never drops stored periods
//! - **Persist**: per-section writes and a freshness marker per entity
//!
//! # Features
//!
//! - Bounded worker pool sharing one rate limiter and proxy rotator
//! - Graceful shutdown on SIGTERM/SIGINT (in-flight work drains)
//! - Per-entity and per-section failures recorded as exceptions, never fatal

mod circuit_breaker;
mod config;
mod error;
mod fetch;
mod merge;
mod model;
mod parse;
mod pipeline;
mod roster;
mod scheduler;
mod store;

#[cfg(test)]
mod test_utils;

use crate::config::{ScraperConfig, StoreBackend, StoreConfig};
use crate::error::{ConfigError, RosterError};
use crate::fetch::{HttpTransport, ProxyRotator, RateLimiter, ResilientFetcher, Upstream};
use crate::merge::MergeEngine;
use crate::model::Repository;
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::roster::{read_roster, resolve_roster, JsonDirectory, RosterResolution};
use crate::store::{InMemoryRepository, JsonFileRepository, RetryingRepository};
use anyhow::Context;
use std::sync::Arc;
use tokio::signal::ctrl_c;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Application entry point.
///
/// Loads configuration, wires the components together, runs one pass over
/// the roster and logs the summary.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_config = config::load_app_config().context("Failed to load AppConfig")?;
    tracing_subscriber::fmt()
        .with_max_level(app_config.log_level())
        .init();

    let scraper_config = config::load_scraper_config().context("Failed to load ScraperConfig")?;
    let rate_limit_config =
        config::load_rate_limit_config().context("Failed to load RateLimitConfig")?;
    let retry_config = config::load_retry_config().context("Failed to load RetryConfig")?;
    let proxy_config = config::load_proxy_config().context("Failed to load ProxyConfig")?;
    let store_config = config::load_store_config().context("Failed to load StoreConfig")?;
    let merge_config = config::load_merge_config().context("Failed to load MergeConfig")?;

    let cancel = CancellationToken::new();
    let rotator = ProxyRotator::new(proxy_config.rotator_config().await?);
    let fetcher = Arc::new(ResilientFetcher::new(
        Arc::new(HttpTransport::new(retry_config.request_timeout())),
        Arc::new(RateLimiter::new(rate_limit_config.limiter_config()?)),
        Arc::new(rotator),
        retry_config.policy()?,
        cancel.clone(),
    ));
    let repo = build_repository(&store_config)?;

    // Roster input loss is fatal before any request goes out.
    let roster = load_roster(&scraper_config)
        .await
        .context("Failed to load roster")?;

    let sig_term = signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    tokio::spawn(cancel_on_shutdown(sig_term, cancel.clone()));

    let pipeline = Pipeline::new(
        fetcher,
        repo,
        Upstream::new(&scraper_config.base_url),
        MergeEngine::new(merge_config.retention()?),
        PipelineOptions {
            view: scraper_config.view(),
            concurrency: scraper_config.concurrency,
            limit: scraper_config.limit(),
        },
        cancel.clone(),
    );
    tracing::info!("Running... Press Ctrl-C or send SIGTERM to stop after in-flight work.");

    let summary = pipeline.run(roster).await.context("Run aborted")?;
    tracing::info!(
        processed = summary.processed,
        succeeded = summary.succeeded,
        failed = summary.failed,
        inserted = summary.records_inserted,
        updated = summary.records_updated,
        exceptions = summary.exceptions.len(),
        cancelled = summary.cancelled,
        "Run finished"
    );
    cancel.cancel();
    Ok(())
}

/// Cancels the run on SIGTERM or Ctrl-C. Returns early once the run is over.
async fn cancel_on_shutdown(mut sig_term: Signal, cancel: CancellationToken) {
    tokio::select! {
        _ = sig_term.recv() => {
            tracing::info!("Received SIGTERM. Finishing in-flight work...");
        }
        _ = ctrl_c() => {
            tracing::info!("Received SIGINT. Finishing in-flight work...");
        }
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}

/// Builds the configured sink, wrapped so brief outages are retried.
fn build_repository(config: &StoreConfig) -> Result<Arc<dyn Repository>, ConfigError> {
    let inner: Arc<dyn Repository> = match config.backend()? {
        StoreBackend::Json => Arc::new(JsonFileRepository::new(config.results_dir.clone())),
        StoreBackend::Memory => {
            tracing::warn!("Memory backend selected, results will not be persisted");
            Arc::new(InMemoryRepository::new())
        }
    };
    Ok(Arc::new(RetryingRepository::new(
        inner,
        config.write_retries,
        config.write_retry_delay(),
    )))
}

/// Reads the corporate directory and roster and resolves one against the other.
async fn load_roster(config: &ScraperConfig) -> Result<RosterResolution, RosterError> {
    let directory = JsonDirectory::load(&config.directory_file).await?;
    tracing::info!(companies = directory.len(), "Loaded corporate directory");

    let descriptors = match &config.roster_file {
        Some(path) => read_roster(path).await?,
        None => Vec::new(),
    };
    let resolution = resolve_roster(&config.index, &descriptors, &directory);
    tracing::info!(
        index = %config.index,
        entities = resolution.entities.len(),
        unresolved = resolution.exceptions.len(),
        "Roster resolved"
    );
    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn scraper_config(directory_file: PathBuf, roster_file: Option<PathBuf>) -> ScraperConfig {
        ScraperConfig {
            base_url: "http://localhost".to_string(),
            index: "NIFTY 50".to_string(),
            roster_file,
            directory_file,
            standalone: false,
            concurrency: 1,
            limit: None,
        }
    }

    mod succeeds {
        use super::*;

        #[tokio::test]
        async fn test_load_roster_resolves_against_directory() {
            let dir = tempdir().unwrap();
            let directory = dir.path().join("corporate_actions.json");
            std::fs::write(
                &directory,
                r#"[{"SC_BSEID": "500325", "SC_NSEID": "RELIANCE", "name": "Reliance"}]"#,
            )
            .unwrap();
            let roster = dir.path().join("nifty.txt");
            std::fs::write(&roster, "500325,RELIANCE\n999999,GHOST\n").unwrap();

            let resolution = load_roster(&scraper_config(directory, Some(roster)))
                .await
                .unwrap();

            assert_eq!(resolution.entities.len(), 1);
            assert_eq!(resolution.entities[0].name, "Reliance");
            assert_eq!(resolution.exceptions.len(), 1);
        }

        #[tokio::test]
        async fn test_build_memory_repository() {
            let config = StoreConfig {
                backend: "memory".to_string(),
                results_dir: PathBuf::from("unused"),
                write_retries: 1,
                write_retry_delay_ms: 0,
            };
            let repo = build_repository(&config).unwrap();
            assert_eq!(repo.name(), "memory");
            assert!(repo.read_schedule().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn test_shutdown_listener_exits_when_run_is_over() {
            let cancel = CancellationToken::new();
            let sig_term = signal(SignalKind::terminate()).unwrap();
            let listener = tokio::spawn(cancel_on_shutdown(sig_term, cancel.clone()));
            cancel.cancel();
            listener.await.unwrap();
        }
    }

    mod fails {
        use super::*;

        #[tokio::test]
        async fn test_missing_directory_is_fatal() {
            let config = scraper_config(PathBuf::from("/nonexistent/directory.json"), None);
            assert!(matches!(
                load_roster(&config).await,
                Err(RosterError::Unreadable { .. })
            ));
        }

        #[test]
        fn test_unknown_backend() {
            let config = StoreConfig {
                backend: "mongodb".to_string(),
                results_dir: PathBuf::from("results"),
                write_retries: 1,
                write_retry_delay_ms: 0,
            };
            assert!(build_repository(&config).is_err());
        }
    }
}
