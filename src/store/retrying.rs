use crate::error::StoreError;
use crate::merge::WriteSet;
use crate::model::{Entity, EntityKey, ExceptionNote, KpiRecord, Repository, ScheduleIndex, Section};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A wrapper that retries writes against a briefly unavailable sink.
///
/// Results computed for the current entity are not thrown away on the first
/// connection hiccup; only after `attempts` consecutive failures is the
/// sink reported as unavailable. Payload errors are never retried.
pub struct RetryingRepository {
    inner: Arc<dyn Repository>,
    attempts: u32,
    delay: Duration,
}

impl RetryingRepository {
    pub fn new(inner: Arc<dyn Repository>, attempts: u32, delay: Duration) -> Self {
        Self {
            inner,
            attempts: attempts.max(1),
            delay,
        }
    }

    async fn with_retries<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_unavailable() && attempt < self.attempts => {
                    tracing::warn!(
                        sink = %self.inner.name(),
                        operation,
                        attempt,
                        error = %err,
                        "Sink write failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(err) if err.is_unavailable() => {
                    tracing::error!(
                        sink = %self.inner.name(),
                        operation,
                        attempts = self.attempts,
                        error = %err,
                        "Sink unavailable"
                    );
                    return Err(StoreError::unavailable(self.inner.name(), err));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl Repository for RetryingRepository {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch_existing(
        &self,
        entity: &EntityKey,
        section: Section,
    ) -> Result<Vec<KpiRecord>, StoreError> {
        self.inner.fetch_existing(entity, section).await
    }

    async fn write_batch(&self, section: Section, batch: &WriteSet) -> Result<(), StoreError> {
        self.with_retries("write_batch", || self.inner.write_batch(section, batch))
            .await
    }

    async fn read_schedule(&self) -> Result<ScheduleIndex, StoreError> {
        self.inner.read_schedule().await
    }

    async fn write_schedule(&self, entity: &Entity, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.with_retries("write_schedule", || self.inner.write_schedule(entity, at))
            .await
    }

    async fn record_exceptions(&self, notes: &[ExceptionNote]) -> Result<(), StoreError> {
        self.with_retries("record_exceptions", || self.inner.record_exceptions(notes))
            .await
    }
}
