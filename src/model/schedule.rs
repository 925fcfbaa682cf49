use crate::model::entity::EntityKey;
use crate::model::types::Section;
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Last successful update per entity. Entities never scraped are absent.
pub type ScheduleIndex = HashMap<EntityKey, DateTime<Utc>>;

/// Persisted freshness marker for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    #[serde(rename = "BSEID", default)]
    pub bse: String,
    #[serde(rename = "NSEID", default)]
    pub nse: String,
    #[serde(rename = "ISINID", default)]
    pub isin: String,
    #[serde(rename = "Company Name", default)]
    pub company_name: String,
    #[serde(rename = "Resolved Slug", default)]
    pub slug: String,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleEntry {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(Some(&self.bse), Some(&self.nse), Some(&self.isin))
    }
}

/// An entity (optionally one section of it) that needs operator follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExceptionNote {
    pub bse: String,
    pub nse: String,
    pub section: Option<Section>,
    pub reason: String,
}

impl ExceptionNote {
    pub fn entity(key: &EntityKey, reason: impl Into<String>) -> Self {
        Self {
            bse: key.bse.clone(),
            nse: key.nse.clone(),
            section: None,
            reason: reason.into(),
        }
    }

    pub fn section(key: &EntityKey, section: Section, reason: impl Into<String>) -> Self {
        Self {
            section: Some(section),
            ..Self::entity(key, reason)
        }
    }

    pub fn pair(&self) -> (String, String) {
        (self.bse.clone(), self.nse.clone())
    }
}

impl fmt::Display for ExceptionNote {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.section {
            Some(section) => write!(
                f,
                "BSE:{} NSE:{} [{}]: {}",
                self.bse, self.nse, section, self.reason
            ),
            None => write!(f, "BSE:{} NSE:{}: {}", self.bse, self.nse, self.reason),
        }
    }
}
