//! Durable and in-memory [`Repository`](crate::model::Repository) backends.

pub mod json;
pub mod memory;
pub mod retrying;

pub use json::JsonFileRepository;
pub use memory::InMemoryRepository;
pub use retrying::RetryingRepository;

use crate::merge::WriteSet;
use crate::model::{KpiRecord, ScheduleEntry};

/// Upserts the writes of `batch` into `stored` by merge key.
///
/// Only the keys the batch retires are removed, before the writes land.
pub(crate) fn upsert(stored: &mut Vec<KpiRecord>, batch: &WriteSet) {
    if !batch.retired.is_empty() {
        stored.retain(|r| !batch.retired.contains(&r.merge_key()));
    }
    for record in batch.records() {
        let key = record.merge_key();
        match stored.iter_mut().find(|r| r.merge_key() == key) {
            Some(slot) => *slot = record.clone(),
            None => stored.push(record.clone()),
        }
    }
}

/// Replaces the freshness marker of the same entity, or appends a new one.
pub(crate) fn upsert_schedule(entries: &mut Vec<ScheduleEntry>, entry: ScheduleEntry) {
    let key = entry.key();
    match entries.iter_mut().find(|e| e.key() == key) {
        Some(slot) => *slot = entry,
        None => entries.push(entry),
    }
}
