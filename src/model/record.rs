use crate::model::entity::{Entity, EntityKey};
use crate::model::periods::Periods;
use crate::model::types::{RowKind, Section, SlugSource};
use std::fmt;

/// Identity of one logical KPI row across reruns.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct MergeKey {
    pub entity: EntityKey,
    pub section: Section,
    pub kind: RowKind,
    pub parent: String,
    pub child: String,
}

impl fmt::Display for MergeKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} '{}' / '{}'",
            self.entity, self.section, self.kind, self.parent, self.child
        )
    }
}

/// Where a record came from. Refreshed on every merge, never part of the key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Provenance {
    pub index: String,
    pub company_name: String,
    pub company_id: String,
    pub slug: String,
    pub slug_source: Option<SlugSource>,
}

impl From<&Entity> for Provenance {
    fn from(entity: &Entity) -> Self {
        Self {
            index: entity.index.clone(),
            company_name: entity.name.clone(),
            company_id: entity.company_id.clone().unwrap_or_default(),
            slug: entity.slug.clone().unwrap_or_default(),
            slug_source: entity.slug_source,
        }
    }
}

/// One row of a financial statement for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiRecord {
    pub entity: EntityKey,
    pub section: Section,
    pub kind: RowKind,
    /// Label of the parent row; for parent and standalone rows, the row's own label
    pub parent: String,
    /// Label of the child row, empty unless `kind` is `Child`
    pub child: String,
    pub periods: Periods,
    pub provenance: Provenance,
}

impl KpiRecord {
    pub fn merge_key(&self) -> MergeKey {
        MergeKey {
            entity: self.entity.clone(),
            section: self.section,
            kind: self.kind,
            parent: self.parent.clone(),
            child: self.child.clone(),
        }
    }
}
