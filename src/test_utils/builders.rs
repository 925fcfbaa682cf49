//! Test data builders for records and entities.

use crate::model::{Entity, EntityKey, KpiRecord, Periods, Provenance, RowKind, Section, SlugSource};
use crate::parse::{clean_value, EntityContext};

/// Builder for [`KpiRecord`] with the fields of a typical scraped row.
///
/// Defaults to a standalone quarterly row of `500325`/`RELIANCE`.
#[derive(Debug)]
pub struct KpiRecordBuilder {
    entity: EntityKey,
    section: Section,
    kind: RowKind,
    parent: String,
    child: String,
    periods: Periods,
    provenance: Provenance,
}

impl KpiRecordBuilder {
    /// Creates a standalone row labelled `label`.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            entity: EntityKey::new(Some("500325"), Some("RELIANCE"), Some("INE002A01018")),
            section: Section::Quarters,
            kind: RowKind::Standalone,
            parent: label.into(),
            child: String::new(),
            periods: Periods::new(),
            provenance: Provenance {
                index: "NIFTY 50".to_string(),
                company_name: "Reliance Industries".to_string(),
                company_id: "6598".to_string(),
                slug: "RELIANCE".to_string(),
                slug_source: Some(SlugSource::Direct),
            },
        }
    }

    /// Turns the row into an expandable parent.
    pub fn parent(mut self) -> Self {
        self.kind = RowKind::Parent;
        self
    }

    /// Turns the row into a child of the label passed to [`new`](Self::new).
    pub fn child(mut self, label: impl Into<String>) -> Self {
        self.kind = RowKind::Child;
        self.child = label.into();
        self
    }

    /// Adds a period; the value goes through the same cleaning as table cells.
    pub fn period(mut self, label: &str, raw: Option<&str>) -> Self {
        self.periods.insert(label, raw.and_then(clean_value));
        self
    }

    pub fn section(mut self, section: Section) -> Self {
        self.section = section;
        self
    }

    pub fn bse(mut self, code: &str) -> Self {
        self.entity.bse = code.to_string();
        self
    }

    pub fn company_name(mut self, name: impl Into<String>) -> Self {
        self.provenance.company_name = name.into();
        self
    }

    pub fn build(self) -> KpiRecord {
        KpiRecord {
            entity: self.entity,
            section: self.section,
            kind: self.kind,
            parent: self.parent,
            child: self.child,
            periods: self.periods,
            provenance: self.provenance,
        }
    }
}

/// Entity with the given exchange codes, as the roster would produce it.
pub fn test_entity(bse: &str, nse: &str) -> Entity {
    Entity::new(
        EntityKey::new(Some(bse), Some(nse), None),
        format!("Company {}", bse),
        "NIFTY 50",
    )
}

/// Parsing context matching the [`KpiRecordBuilder`] defaults.
pub fn entity_context() -> EntityContext {
    let record = KpiRecordBuilder::new("").build();
    EntityContext {
        entity: record.entity,
        provenance: record.provenance,
    }
}
