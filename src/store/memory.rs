use crate::error::StoreError;
use crate::merge::WriteSet;
use crate::model::{
    Entity, EntityKey, ExceptionNote, KpiRecord, Repository, ScheduleEntry, ScheduleIndex, Section,
};
use crate::store::{upsert, upsert_schedule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    records: HashMap<Section, Vec<KpiRecord>>,
    schedule: Vec<ScheduleEntry>,
    exceptions: Vec<ExceptionNote>,
}

/// Repository that lives for one process. Used for dry runs and as a test fake.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
    /// Number of upcoming write calls that fail as if the sink were down
    failing_writes: AtomicU32,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` write calls fail with [`StoreError::Unavailable`].
    pub fn fail_next_writes(&self, count: u32) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        let remaining = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match remaining {
            Ok(_) => Err(StoreError::unavailable("memory", "injected write failure")),
            Err(_) => Ok(()),
        }
    }

    pub async fn records(&self, section: Section) -> Vec<KpiRecord> {
        let state = self.state.lock().await;
        state.records.get(&section).cloned().unwrap_or_default()
    }

    pub async fn exceptions(&self) -> Vec<ExceptionNote> {
        self.state.lock().await.exceptions.clone()
    }

    /// Seeds stored records, bypassing the merge engine.
    pub async fn seed(&self, section: Section, records: Vec<KpiRecord>) {
        let mut state = self.state.lock().await;
        state.records.entry(section).or_default().extend(records);
    }

    pub async fn seed_schedule(&self, entity: &Entity, at: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        upsert_schedule(&mut state.schedule, schedule_entry(entity, at));
    }
}

pub(crate) fn schedule_entry(entity: &Entity, at: DateTime<Utc>) -> ScheduleEntry {
    ScheduleEntry {
        bse: entity.key.bse.clone(),
        nse: entity.key.nse.clone(),
        isin: entity.key.isin.clone(),
        company_name: entity.name.clone(),
        slug: entity.slug.clone().unwrap_or_default(),
        updated_at: at,
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_existing(
        &self,
        entity: &EntityKey,
        section: Section,
    ) -> Result<Vec<KpiRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(&section)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.entity == *entity)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn write_batch(&self, section: Section, batch: &WriteSet) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        upsert(state.records.entry(section).or_default(), batch);
        Ok(())
    }

    async fn read_schedule(&self) -> Result<ScheduleIndex, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .schedule
            .iter()
            .map(|entry| (entry.key(), entry.updated_at))
            .collect())
    }

    async fn write_schedule(&self, entity: &Entity, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        upsert_schedule(&mut state.schedule, schedule_entry(entity, at));
        Ok(())
    }

    async fn record_exceptions(&self, notes: &[ExceptionNote]) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state.exceptions.extend_from_slice(notes);
        Ok(())
    }
}
