//! Roster input and the corporate directory it is resolved against.

use crate::error::RosterError;
use crate::model::{normalize_code, Entity, EntityKey, ExceptionNote, SlugSource};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Index name meaning "every directory entry".
pub const ALL_INDEX: &str = "all";

const BSE_KEYS: [&str; 9] = [
    "SC_BSEID", "SC_BSE", "BSEID", "BSE", "bseId", "bse", "bseid", "BSE Code", "scripBSE",
];
const NSE_KEYS: [&str; 9] = [
    "SC_NSEID", "SC_NSE", "NSEID", "NSE", "nseId", "nse", "nseid", "NSE Code", "scripNSE",
];
const ISIN_KEYS: [&str; 5] = ["SC_ISINID", "ISINID", "ISIN", "isin", "isinId"];
const NAME_KEYS: [&str; 4] = ["name", "shortName", "Name", "companyName"];
const SLUG_KEYS: [&str; 2] = ["Resolved Slug", "Screener Slug"];

/// One roster entry as written by the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub raw: String,
    pub bse: Option<String>,
    pub nse: Option<String>,
    pub isin: Option<String>,
}

impl Descriptor {
    fn key(&self) -> EntityKey {
        EntityKey::new(self.bse.as_deref(), self.nse.as_deref(), self.isin.as_deref())
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First non-empty normalized value among `keys`.
fn first_code(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key).and_then(value_to_string))
        .find_map(|value| normalize_code(Some(&value)))
}

/// Parses a `"bse,nse"` pair, a single code or an identifier object.
///
/// A single all-digit code is a primary (BSE) code, anything else a secondary one.
pub fn parse_descriptor(value: &Value) -> Option<Descriptor> {
    match value {
        Value::Object(object) => {
            let descriptor = Descriptor {
                raw: value.to_string(),
                bse: first_code(object, &BSE_KEYS),
                nse: first_code(object, &NSE_KEYS),
                isin: first_code(object, &ISIN_KEYS),
            };
            (descriptor.bse.is_some() || descriptor.nse.is_some()).then_some(descriptor)
        }
        Value::String(_) | Value::Number(_) => {
            let text = value_to_string(value)?;
            let text = text.trim();
            let (bse, nse) = match text.split_once(',') {
                Some((left, right)) => (normalize_code(Some(left)), normalize_code(Some(right))),
                None if text.chars().all(|c| c.is_ascii_digit()) => {
                    (normalize_code(Some(text)), None)
                }
                None => (None, normalize_code(Some(text))),
            };
            if bse.is_none() && nse.is_none() {
                return None;
            }
            Some(Descriptor {
                raw: text.to_string(),
                bse,
                nse,
                isin: None,
            })
        }
        _ => None,
    }
}

/// Parses roster content. JSON content is a list of descriptors (or an object
/// whose first value is that list); anything else is one descriptor per line
/// with `#` comments.
pub fn parse_roster(content: &str, json: bool) -> Result<Vec<Descriptor>, RosterError> {
    if !json {
        return Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| parse_descriptor(&Value::String(line.to_string())))
            .collect());
    }

    let data: Value = serde_json::from_str(content)
        .map_err(|e| RosterError::InvalidFormat(format!("roster is not valid JSON: {}", e)))?;
    let items = match data {
        Value::Array(items) => items,
        Value::Object(object) => match object.into_iter().next() {
            Some((_, Value::Array(items))) => items,
            Some(_) => {
                return Err(RosterError::InvalidFormat(
                    "roster object must map to a list".to_string(),
                ))
            }
            None => Vec::new(),
        },
        _ => {
            return Err(RosterError::InvalidFormat(
                "roster must be a list or an object of lists".to_string(),
            ))
        }
    };
    Ok(items.iter().filter_map(parse_descriptor).collect())
}

/// Reads a roster file; `.json` files are parsed as JSON.
pub async fn read_roster(path: &Path) -> Result<Vec<Descriptor>, RosterError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RosterError::unreadable(path.display().to_string(), e))?;
    let json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    parse_roster(&content, json)
}

/// Company known to the corporate directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub key: EntityKey,
    pub name: String,
    /// Slug recorded by an earlier run
    pub slug: Option<String>,
}

/// Source of display names, identifiers and known slugs.
pub trait CompanyDirectory: Send + Sync {
    fn lookup(&self, bse: Option<&str>, nse: Option<&str>) -> Option<DirectoryEntry>;

    /// Every entry with at least one exchange code.
    fn entries(&self) -> Vec<DirectoryEntry>;
}

/// Directory backed by a JSON list of company objects.
#[derive(Debug, Default)]
pub struct JsonDirectory {
    entries: Vec<DirectoryEntry>,
    by_bse: HashMap<String, usize>,
    by_nse: HashMap<String, usize>,
}

impl JsonDirectory {
    pub fn from_json(content: &str) -> Result<Self, RosterError> {
        let data: Value = serde_json::from_str(content).map_err(|e| {
            RosterError::InvalidFormat(format!("directory is not valid JSON: {}", e))
        })?;
        let Value::Array(items) = data else {
            return Err(RosterError::InvalidFormat(
                "directory must be a list of company objects".to_string(),
            ));
        };

        let mut directory = Self::default();
        for item in items {
            let Value::Object(object) = item else {
                continue;
            };
            let key = EntityKey::new(
                first_code(&object, &BSE_KEYS).as_deref(),
                first_code(&object, &NSE_KEYS).as_deref(),
                first_code(&object, &ISIN_KEYS).as_deref(),
            );
            if key.bse().is_none() && key.nse().is_none() {
                continue;
            }
            let name = NAME_KEYS
                .iter()
                .find_map(|k| object.get(*k).and_then(value_to_string))
                .unwrap_or_default();
            let slug = SLUG_KEYS
                .iter()
                .find_map(|k| object.get(*k).and_then(value_to_string))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());

            let index = directory.entries.len();
            if let Some(bse) = key.bse() {
                directory.by_bse.insert(bse.to_string(), index);
            }
            if let Some(nse) = key.nse() {
                directory.by_nse.insert(nse.to_string(), index);
            }
            directory.entries.push(DirectoryEntry { key, name, slug });
        }
        Ok(directory)
    }

    pub async fn load(path: &Path) -> Result<Self, RosterError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RosterError::unreadable(path.display().to_string(), e))?;
        Self::from_json(&content)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl CompanyDirectory for JsonDirectory {
    fn lookup(&self, bse: Option<&str>, nse: Option<&str>) -> Option<DirectoryEntry> {
        bse.and_then(|code| self.by_bse.get(code))
            .or_else(|| nse.and_then(|code| self.by_nse.get(code)))
            .and_then(|index| self.entries.get(*index))
            .cloned()
    }

    fn entries(&self) -> Vec<DirectoryEntry> {
        self.entries.clone()
    }
}

/// Entities to scrape plus descriptors that could not be resolved.
#[derive(Debug, Default)]
pub struct RosterResolution {
    pub entities: Vec<Entity>,
    pub exceptions: Vec<ExceptionNote>,
}

fn entity_from(entry: DirectoryEntry, descriptor: Option<&Descriptor>, index: &str) -> Entity {
    let key = match descriptor {
        Some(d) => EntityKey::new(
            d.bse.as_deref().or(entry.key.bse()),
            d.nse.as_deref().or(entry.key.nse()),
            d.isin.as_deref().or(Some(entry.key.isin.as_str())),
        ),
        None => entry.key,
    };
    let mut entity = Entity::new(key, entry.name, index);
    if let Some(slug) = entry.slug {
        entity.slug = Some(slug);
        entity.slug_source = Some(SlugSource::Override);
    }
    entity
}

/// Resolves the roster against the directory.
///
/// With the `all` index the whole directory is the roster. Descriptors the
/// directory does not know become exception notes. Duplicate identifier pairs
/// are dropped and entities are sorted by (name, BSE, NSE).
pub fn resolve_roster(
    index: &str,
    descriptors: &[Descriptor],
    directory: &dyn CompanyDirectory,
) -> RosterResolution {
    let mut resolution = RosterResolution::default();
    let mut candidates = Vec::new();

    if index.eq_ignore_ascii_case(ALL_INDEX) {
        candidates.extend(
            directory
                .entries()
                .into_iter()
                .map(|entry| entity_from(entry, None, index)),
        );
    } else {
        for descriptor in descriptors {
            match directory.lookup(descriptor.bse.as_deref(), descriptor.nse.as_deref()) {
                Some(entry) => candidates.push(entity_from(entry, Some(descriptor), index)),
                None => {
                    let err = RosterError::EntityUnresolved {
                        descriptor: descriptor.raw.clone(),
                    };
                    tracing::warn!(error = %err, "Skipping roster entry");
                    resolution
                        .exceptions
                        .push(ExceptionNote::entity(&descriptor.key(), err.to_string()));
                }
            }
        }
    }

    let mut seen = HashSet::new();
    candidates.retain(|entity| seen.insert(entity.key.pair()));
    candidates.sort_by(|a, b| {
        (&a.name, &a.key.bse, &a.key.nse).cmp(&(&b.name, &b.key.bse, &b.key.nse))
    });
    resolution.entities = candidates;
    resolution
}
