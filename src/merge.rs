//! Idempotent reconciliation of freshly parsed records against stored ones.

use crate::model::{ExceptionNote, KpiRecord, MergeKey, RowKind};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// What happens to a stored period the upstream no longer reports.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum PeriodRetention {
    /// Keep the stored value
    #[default]
    Retain,
    /// Keep the period but overwrite its value to absent
    Mirror,
}

impl FromStr for PeriodRetention {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" => Ok(PeriodRetention::Retain),
            "mirror" => Ok(PeriodRetention::Mirror),
            other => Err(format!("unknown period retention '{}'", other)),
        }
    }
}

impl fmt::Display for PeriodRetention {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PeriodRetention::Retain => write!(f, "retain"),
            PeriodRetention::Mirror => write!(f, "mirror"),
        }
    }
}

/// Writes produced by one reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSet {
    /// Records with no stored counterpart
    pub inserts: Vec<KpiRecord>,
    /// Stored records whose merged form differs from what is stored
    pub updates: Vec<KpiRecord>,
    /// Stored keys to remove: legacy rows rewritten into the current layout
    /// (their new form is in `updates`) and malformed legacy rows
    pub retired: Vec<MergeKey>,
    /// Records whose merged form equals what is stored
    pub unchanged: usize,
    pub exceptions: Vec<ExceptionNote>,
}

impl WriteSet {
    /// A write set that only reports a failure.
    pub fn failed(note: ExceptionNote) -> Self {
        Self {
            exceptions: vec![note],
            ..Default::default()
        }
    }

    /// Whether there is anything to persist.
    pub fn has_writes(&self) -> bool {
        !self.inserts.is_empty() || !self.updates.is_empty() || !self.retired.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &KpiRecord> {
        self.inserts.iter().chain(self.updates.iter())
    }
}

/// Stored rows in the current layout, and what that took.
#[derive(Debug, Default, PartialEq)]
pub struct Normalized {
    pub records: Vec<KpiRecord>,
    /// Stored keys of rows that were rewritten or dropped
    pub retired: Vec<MergeKey>,
    /// Current keys of rewritten rows
    pub rewritten: BTreeSet<MergeKey>,
}

/// Rewrites stored rows from older layouts into the current one.
///
/// Standalone rows used to keep their label in the child column; parent rows
/// with a blank parent label, or with the label duplicated into the child
/// column, are malformed leftovers and are dropped.
pub fn normalize_legacy(records: Vec<KpiRecord>) -> Normalized {
    let mut normalized = Normalized::default();
    for mut record in records {
        let stored_key = record.merge_key();
        match record.kind {
            RowKind::Standalone if record.parent.trim().is_empty() => {
                record.parent = std::mem::take(&mut record.child);
            }
            RowKind::Parent
                if record.parent.trim().is_empty() || record.parent == record.child =>
            {
                tracing::debug!(parent = %record.parent, "Dropping malformed legacy parent row");
                normalized.retired.push(stored_key);
                continue;
            }
            _ => {}
        }
        let key = record.merge_key();
        if key != stored_key {
            normalized.retired.push(stored_key);
            normalized.rewritten.insert(key);
        }
        normalized.records.push(record);
    }
    normalized
}

/// Folds records sharing a merge key into one, later periods winning.
fn coalesce(records: impl IntoIterator<Item = KpiRecord>) -> Vec<KpiRecord> {
    let mut order: Vec<MergeKey> = Vec::new();
    let mut by_key: BTreeMap<MergeKey, KpiRecord> = BTreeMap::new();
    for record in records {
        let key = record.merge_key();
        match by_key.get_mut(&key) {
            Some(existing) => {
                existing.periods.overlay(&record.periods);
                existing.provenance = record.provenance;
            }
            None => {
                order.push(key.clone());
                by_key.insert(key, record);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect()
}

/// Merge authority for KPI records.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine {
    retention: PeriodRetention,
}

impl MergeEngine {
    pub fn new(retention: PeriodRetention) -> Self {
        Self { retention }
    }

    /// Reconciles `new` against `existing` (one entity and section).
    ///
    /// New keys become inserts. Matching keys get the stored periods overlaid
    /// with the new ones; stored periods missing from the new record are kept
    /// (or blanked under [`PeriodRetention::Mirror`]) and never removed.
    /// Legacy rows are moved to the current layout: their stored keys are
    /// retired and their rewritten form is written as an update.
    pub fn reconcile(
        &self,
        existing: Vec<KpiRecord>,
        new: impl IntoIterator<Item = KpiRecord>,
    ) -> WriteSet {
        let Normalized {
            records,
            retired,
            rewritten,
        } = normalize_legacy(existing);
        let stored: BTreeMap<MergeKey, KpiRecord> = coalesce(records)
            .into_iter()
            .map(|record| (record.merge_key(), record))
            .collect();

        let mut batch = WriteSet {
            retired,
            ..Default::default()
        };
        let mut seen = BTreeSet::new();
        for record in coalesce(new) {
            let key = record.merge_key();
            seen.insert(key.clone());
            let Some(current) = stored.get(&key) else {
                batch.inserts.push(record);
                continue;
            };

            let mut merged = current.clone();
            if self.retention == PeriodRetention::Mirror {
                merged.periods.blank_missing_from(&record.periods);
            }
            merged.periods.overlay(&record.periods);
            merged.provenance = record.provenance;

            if merged == *current && !rewritten.contains(&key) {
                batch.unchanged += 1;
            } else {
                batch.updates.push(merged);
            }
        }

        // Rewritten rows the new set does not mention still move to the new layout.
        for key in rewritten.difference(&seen) {
            if let Some(record) = stored.get(key) {
                batch.updates.push(record.clone());
            }
        }
        batch
    }
}
