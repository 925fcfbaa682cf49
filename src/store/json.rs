//! JSON snapshot files, one per section.
//!
//! Layout of the results directory:
//! - `<collection>.json`: records of one section, sorted by merge key, then
//!   any rows that do not map to a record, kept as they were read
//! - `scrape metadata.json`: last successful update per entity
//! - `exceptions.txt`: sorted, de-duplicated `bse,nse` pairs

use crate::error::StoreError;
use crate::merge::WriteSet;
use crate::model::{
    Entity, EntityKey, ExceptionNote, KpiRecord, Periods, Provenance, Repository, RowKind,
    ScheduleEntry, ScheduleIndex, Section, SlugSource,
};
use crate::store::memory::schedule_entry;
use crate::store::{upsert, upsert_schedule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_derive::{Deserialize as DeriveDeserialize, Serialize as DeriveSerialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const SCHEDULE_FILE: &str = "scrape metadata.json";
const EXCEPTIONS_FILE: &str = "exceptions.txt";

/// Older snapshots sometimes stored identifiers as numbers.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

/// One record as it appears in a section snapshot.
#[derive(Debug, Clone, PartialEq, DeriveSerialize, DeriveDeserialize)]
pub struct SnapshotRow {
    #[serde(rename = "Index", default, deserialize_with = "lenient_string")]
    pub index: String,
    #[serde(rename = "Company Name", default, deserialize_with = "lenient_string")]
    pub company_name: String,
    #[serde(rename = "Company ID", default, deserialize_with = "lenient_string")]
    pub company_id: String,
    #[serde(
        rename = "Resolved Slug",
        alias = "Screener Slug",
        default,
        deserialize_with = "lenient_string"
    )]
    pub slug: String,
    #[serde(rename = "Slug Source", default, deserialize_with = "lenient_string")]
    pub slug_source: String,
    #[serde(rename = "BSEID", alias = "SC_BSEID", default, deserialize_with = "lenient_string")]
    pub bse: String,
    #[serde(rename = "NSEID", alias = "SC_NSEID", default, deserialize_with = "lenient_string")]
    pub nse: String,
    #[serde(rename = "ISINID", alias = "SC_ISINID", default, deserialize_with = "lenient_string")]
    pub isin: String,
    #[serde(rename = "Row Type", default, deserialize_with = "lenient_string")]
    pub row_type: String,
    #[serde(rename = "Parent KPI", default, deserialize_with = "lenient_string")]
    pub parent: String,
    #[serde(rename = "Child KPI", default, deserialize_with = "lenient_string")]
    pub child: String,
    #[serde(flatten)]
    pub periods: Periods,
}

impl From<&KpiRecord> for SnapshotRow {
    fn from(record: &KpiRecord) -> Self {
        Self {
            index: record.provenance.index.clone(),
            company_name: record.provenance.company_name.clone(),
            company_id: record.provenance.company_id.clone(),
            slug: record.provenance.slug.clone(),
            slug_source: record
                .provenance
                .slug_source
                .map(|s| s.to_string())
                .unwrap_or_default(),
            bse: record.entity.bse.clone(),
            nse: record.entity.nse.clone(),
            isin: record.entity.isin.clone(),
            row_type: record.kind.to_string(),
            parent: record.parent.clone(),
            child: record.child.clone(),
            periods: record.periods.clone(),
        }
    }
}

fn parse_row_kind(value: &str) -> Option<RowKind> {
    match value.trim() {
        "Parent" => Some(RowKind::Parent),
        "Child" => Some(RowKind::Child),
        "Standalone" => Some(RowKind::Standalone),
        _ => None,
    }
}

fn parse_slug_source(value: &str) -> Option<SlugSource> {
    match value.trim() {
        "BSE" => Some(SlugSource::Direct),
        "NSE" => Some(SlugSource::Fallback),
        "Override" => Some(SlugSource::Override),
        _ => None,
    }
}

impl SnapshotRow {
    /// Rows without a company id or with an unknown row type are not records.
    pub fn into_record(self, section: Section) -> Option<KpiRecord> {
        if self.company_id.trim().is_empty() {
            return None;
        }
        let kind = parse_row_kind(&self.row_type)?;
        Some(KpiRecord {
            entity: EntityKey::new(Some(&self.bse), Some(&self.nse), Some(&self.isin)),
            section,
            kind,
            parent: self.parent,
            child: self.child,
            periods: self.periods,
            provenance: Provenance {
                index: self.index,
                company_name: self.company_name,
                company_id: self.company_id,
                slug: self.slug,
                slug_source: parse_slug_source(&self.slug_source),
            },
        })
    }
}

/// Contents of one section file.
#[derive(Debug, Clone, Default)]
struct SectionSnapshot {
    records: Vec<KpiRecord>,
    /// Rows that do not map to a record; written back untouched
    passthrough: Vec<Value>,
}

impl SectionSnapshot {
    fn from_rows(rows: Vec<Value>, section: Section) -> Self {
        let mut snapshot = Self::default();
        for value in rows {
            let record = serde_json::from_value::<SnapshotRow>(value.clone())
                .ok()
                .and_then(|row| row.into_record(section));
            match record {
                Some(record) => snapshot.records.push(record),
                None => snapshot.passthrough.push(value),
            }
        }
        snapshot
    }

    fn to_rows(&self) -> Result<Vec<Value>, serde_json::Error> {
        let mut rows = self
            .records
            .iter()
            .map(|record| serde_json::to_value(SnapshotRow::from(record)))
            .collect::<Result<Vec<_>, _>>()?;
        rows.extend(self.passthrough.iter().cloned());
        Ok(rows)
    }
}

/// Repository writing one JSON snapshot per section.
///
/// Each file is loaded once and cached; every write rewrites the whole file
/// through a temp file and a rename, so a crash never leaves a torn snapshot.
pub struct JsonFileRepository {
    dir: PathBuf,
    sections: Mutex<HashMap<Section, SectionSnapshot>>,
    schedule: Mutex<Option<Vec<ScheduleEntry>>>,
    exceptions: Mutex<()>,
}

impl JsonFileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sections: Mutex::new(HashMap::new()),
            schedule: Mutex::new(None),
            exceptions: Mutex::new(()),
        }
    }

    pub fn section_path(&self, section: Section) -> PathBuf {
        self.dir.join(format!("{}.json", section.collection()))
    }

    pub fn schedule_path(&self) -> PathBuf {
        self.dir.join(SCHEDULE_FILE)
    }

    pub fn exceptions_path(&self) -> PathBuf {
        self.dir.join(EXCEPTIONS_FILE)
    }

    async fn load_section(&self, section: Section) -> Result<SectionSnapshot, StoreError> {
        let path = self.section_path(section);
        let rows: Vec<Value> = read_json(&path).await?.unwrap_or_default();
        let snapshot = SectionSnapshot::from_rows(rows, section);
        if !snapshot.passthrough.is_empty() {
            tracing::warn!(
                path = %path.display(),
                rows = snapshot.passthrough.len(),
                "Keeping snapshot rows that are not records as they are"
            );
        }
        Ok(snapshot)
    }

    async fn ensure_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::io(self.dir.display().to_string(), e))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) if content.trim().is_empty() => Ok(None),
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::serialization(path.display().to_string(), e)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path.display().to_string(), e)),
    }
}

async fn write_atomic(path: &Path, content: &str) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, content)
        .await
        .map_err(|e| StoreError::io(tmp.display().to_string(), e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path.display().to_string(), e))
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| StoreError::serialization(path.display().to_string(), e))?;
    write_atomic(path, &content).await
}

/// Parses `exceptions.txt` into identifier pairs.
pub fn parse_exception_pairs(content: &str) -> BTreeSet<(String, String)> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| match line.split_once(',') {
            Some((bse, nse)) => (bse.trim().to_string(), nse.trim().to_string()),
            None => (line.trim().to_string(), String::new()),
        })
        .collect()
}

#[async_trait]
impl Repository for JsonFileRepository {
    fn name(&self) -> &str {
        "json"
    }

    async fn fetch_existing(
        &self,
        entity: &EntityKey,
        section: Section,
    ) -> Result<Vec<KpiRecord>, StoreError> {
        let mut sections = self.sections.lock().await;
        if !sections.contains_key(&section) {
            let loaded = self.load_section(section).await?;
            sections.insert(section, loaded);
        }
        Ok(sections
            .get(&section)
            .map(|snapshot| {
                snapshot
                    .records
                    .iter()
                    .filter(|r| r.entity == *entity)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn write_batch(&self, section: Section, batch: &WriteSet) -> Result<(), StoreError> {
        if !batch.has_writes() {
            return Ok(());
        }
        self.ensure_dir().await?;
        let mut sections = self.sections.lock().await;
        if !sections.contains_key(&section) {
            let loaded = self.load_section(section).await?;
            sections.insert(section, loaded);
        }

        let path = self.section_path(section);
        let mut snapshot = sections.get(&section).cloned().unwrap_or_default();
        upsert(&mut snapshot.records, batch);
        snapshot.records.sort_by_key(|r| r.merge_key());

        let rows = snapshot
            .to_rows()
            .map_err(|e| StoreError::serialization(path.display().to_string(), e))?;
        write_json(&path, &rows).await?;
        // Cache only what reached disk.
        sections.insert(section, snapshot);
        tracing::debug!(
            section = %section,
            inserted = batch.inserts.len(),
            updated = batch.updates.len(),
            retired = batch.retired.len(),
            "Snapshot written"
        );
        Ok(())
    }

    async fn read_schedule(&self) -> Result<ScheduleIndex, StoreError> {
        let mut schedule = self.schedule.lock().await;
        if schedule.is_none() {
            *schedule = Some(read_json(&self.schedule_path()).await?.unwrap_or_default());
        }
        Ok(schedule
            .iter()
            .flatten()
            .map(|entry| (entry.key(), entry.updated_at))
            .collect())
    }

    async fn write_schedule(&self, entity: &Entity, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.ensure_dir().await?;
        let mut schedule = self.schedule.lock().await;
        let mut entries = match schedule.take() {
            Some(entries) => entries,
            None => read_json(&self.schedule_path()).await?.unwrap_or_default(),
        };
        upsert_schedule(&mut entries, schedule_entry(entity, at));
        let result = write_json(&self.schedule_path(), &entries).await;
        *schedule = Some(entries);
        result
    }

    async fn record_exceptions(&self, notes: &[ExceptionNote]) -> Result<(), StoreError> {
        let pairs: Vec<(String, String)> = notes
            .iter()
            .map(ExceptionNote::pair)
            .filter(|(bse, nse)| !bse.is_empty() || !nse.is_empty())
            .collect();
        if pairs.is_empty() {
            return Ok(());
        }
        self.ensure_dir().await?;
        let _guard = self.exceptions.lock().await;
        let path = self.exceptions_path();
        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(StoreError::io(path.display().to_string(), e)),
        };
        let mut all = parse_exception_pairs(&existing);
        all.extend(pairs);
        let content: String = all
            .iter()
            .map(|(bse, nse)| format!("{},{}\n", bse, nse))
            .collect();
        write_atomic(&path, &content).await
    }
}
