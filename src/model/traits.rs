use crate::error::StoreError;
use crate::merge::WriteSet;
use crate::model::entity::{Entity, EntityKey};
use crate::model::record::KpiRecord;
use crate::model::schedule::{ExceptionNote, ScheduleIndex};
use crate::model::types::Section;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable store for KPI records, freshness markers and exception notes.
///
/// The merge engine and scheduler only talk to this trait, so every backend
/// (JSON files, in-memory dry run, test fakes) is interchangeable.
/// Implementors must be thread-safe to be shared across workers.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &str;

    /// All persisted records of one entity in one section.
    async fn fetch_existing(
        &self,
        entity: &EntityKey,
        section: Section,
    ) -> Result<Vec<KpiRecord>, StoreError>;

    /// Applies the inserts and updates of a write set. The only rows removed
    /// are the legacy keys the write set retires.
    async fn write_batch(&self, section: Section, batch: &WriteSet) -> Result<(), StoreError>;

    /// Last successful update of every entity seen so far.
    async fn read_schedule(&self) -> Result<ScheduleIndex, StoreError>;

    /// Marks an entity as refreshed at `at`.
    async fn write_schedule(&self, entity: &Entity, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Appends notes to the exceptions channel.
    async fn record_exceptions(&self, notes: &[ExceptionNote]) -> Result<(), StoreError>;
}
