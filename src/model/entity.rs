use crate::model::types::SlugSource;
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// Exchange identifiers of one listed company.
///
/// Absent codes are stored as empty strings so the key orders and hashes the
/// same way it is persisted.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct EntityKey {
    pub bse: String,
    pub nse: String,
    pub isin: String,
}

impl EntityKey {
    pub fn new(bse: Option<&str>, nse: Option<&str>, isin: Option<&str>) -> Self {
        Self {
            bse: normalize_code(bse).unwrap_or_default(),
            nse: normalize_code(nse).unwrap_or_default(),
            isin: normalize_code(isin).unwrap_or_default(),
        }
    }

    /// The (primary, secondary) pair reported on the exceptions channel.
    pub fn pair(&self) -> (String, String) {
        (self.bse.clone(), self.nse.clone())
    }

    pub fn bse(&self) -> Option<&str> {
        (!self.bse.is_empty()).then_some(self.bse.as_str())
    }

    pub fn nse(&self) -> Option<&str> {
        (!self.nse.is_empty()).then_some(self.nse.as_str())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "BSE:{} NSE:{}", self.bse, self.nse)
    }
}

/// Trims an exchange code; blanks and the `"0"` placeholder mean "no code".
pub fn normalize_code(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() || value == "0" {
        None
    } else {
        Some(value.to_string())
    }
}

/// One company on the roster.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub key: EntityKey,
    pub name: String,
    /// Roster or index the entity was resolved from
    pub index: String,
    /// Upstream slug, once resolved
    pub slug: Option<String>,
    pub slug_source: Option<SlugSource>,
    /// Internal id published on the company page
    pub company_id: Option<String>,
}

impl Entity {
    pub fn new(key: EntityKey, name: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            index: index.into(),
            slug: None,
            slug_source: None,
            company_id: None,
        }
    }

    /// Slugs to try, in order, with the method each one represents.
    ///
    /// A previously resolved slug is tried first, then the primary code and
    /// finally the secondary code (skipping the `NA` placeholder).
    pub fn slug_candidates(&self) -> Vec<(SlugSource, String)> {
        let mut candidates: Vec<(SlugSource, String)> = Vec::new();
        let mut push = |source: SlugSource, slug: &str| {
            if !slug.is_empty() && !candidates.iter().any(|(_, s)| s == slug) {
                candidates.push((source, slug.to_string()));
            }
        };
        if let Some(slug) = &self.slug {
            push(SlugSource::Override, slug);
        }
        if let Some(bse) = self.key.bse() {
            push(SlugSource::Direct, bse);
        }
        if let Some(nse) = self.key.nse() {
            if !nse.eq_ignore_ascii_case("NA") {
                push(SlugSource::Fallback, nse);
            }
        }
        candidates
    }

    /// Records the outcome of slug resolution.
    pub fn resolve(&mut self, slug: impl Into<String>, source: SlugSource, company_id: impl Into<String>) {
        self.slug = Some(slug.into());
        self.slug_source = Some(source);
        self.company_id = Some(company_id.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_code() {
        assert_eq!(normalize_code(Some(" 500325 ")), Some("500325".to_string()));
        assert_eq!(normalize_code(Some("0")), None);
        assert_eq!(normalize_code(Some("   ")), None);
        assert_eq!(normalize_code(None), None);
    }

    #[test]
    fn test_key_display_and_pair() {
        let key = EntityKey::new(Some("500325"), Some("RELIANCE"), None);
        assert_eq!(key.to_string(), "BSE:500325 NSE:RELIANCE");
        assert_eq!(key.pair(), ("500325".to_string(), "RELIANCE".to_string()));
        assert_eq!(key.isin, "");
    }

    #[test]
    fn test_slug_candidates_order() {
        let mut entity = Entity::new(
            EntityKey::new(Some("500325"), Some("RELIANCE"), None),
            "Reliance Industries",
            "NIFTY 50",
        );
        entity.slug = Some("RELIANCE".to_string());
        let candidates = entity.slug_candidates();
        assert_eq!(
            candidates,
            vec![
                (SlugSource::Override, "RELIANCE".to_string()),
                (SlugSource::Direct, "500325".to_string()),
            ]
        );
    }

    #[test]
    fn test_slug_candidates_skip_na() {
        let entity = Entity::new(EntityKey::new(Some("532540"), Some("NA"), None), "TCS", "all");
        assert_eq!(
            entity.slug_candidates(),
            vec![(SlugSource::Direct, "532540".to_string())]
        );
    }
}
