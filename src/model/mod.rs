//! Domain model for scraped fundamentals.
//!
//! Entities and sections are reference data; KPI records are produced by the
//! table parser and reconciled by the merge engine before reaching a
//! [`Repository`].

pub mod entity;
pub mod periods;
pub mod record;
pub mod schedule;
pub mod traits;
pub mod types;

pub use entity::{normalize_code, Entity, EntityKey};
pub use periods::Periods;
pub use record::{KpiRecord, MergeKey, Provenance};
pub use schedule::{ExceptionNote, ScheduleEntry, ScheduleIndex};
pub use traits::Repository;
pub use types::{RowKind, Section, SlugSource, View};
