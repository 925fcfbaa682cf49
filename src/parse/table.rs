//! Section tables of a company page.
//!
//! The DOM is walked once into owned [`SectionTable`]s; `scraper::Html` is not
//! `Send`, so nothing borrowed from it outlives [`CompanyPage::parse`]. Turning
//! a table into [`KpiRecord`]s is a lazy fold over its rows.

use crate::error::ParseError;
use crate::model::{EntityKey, KpiRecord, Periods, Provenance, RowKind, Section};
use crate::parse::numeric::{clean_value, normalize_label};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;

const CHILD_ROW_CLASSES: [&str; 3] = ["sub", "indent", "child"];

/// Creates a CSS selector, mapping syntax errors into [`ParseError`].
pub fn html_selector(selector: &str) -> Result<Selector, ParseError> {
    Selector::parse(selector).map_err(|e| ParseError::invalid_selector(selector, e))
}

/// One row of a section table, detached from the DOM.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub label: String,
    pub cells: Vec<String>,
    /// Structural cue that the row is nested under the previous top-level row
    pub nested: bool,
}

/// Header and rows of one section, detached from the DOM.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionTable {
    pub section: Section,
    pub periods: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Identity and provenance stamped on every parsed record.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityContext {
    pub entity: EntityKey,
    pub provenance: Provenance,
}

/// Everything the pipeline needs from a company page.
#[derive(Debug, Clone)]
pub struct CompanyPage {
    pub company_id: Option<String>,
    /// Sections present on the page; absent sections have no entry
    pub tables: BTreeMap<Section, Result<SectionTable, ParseError>>,
}

impl CompanyPage {
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let document = Html::parse_document(raw);
        let company_id = extract_company_id(&document)?;
        let mut tables = BTreeMap::new();
        for section in Section::ALL {
            if let Some(table) = extract_table(&document, section).transpose() {
                tables.insert(section, table);
            }
        }
        Ok(Self { company_id, tables })
    }

    /// Sections the page publishes, in canonical order.
    pub fn sections(&self) -> Vec<Section> {
        self.tables.keys().copied().collect()
    }
}

/// Value of `#company-info[data-company-id]`, if present.
pub fn extract_company_id(document: &Html) -> Result<Option<String>, ParseError> {
    let selector = html_selector("#company-info")?;
    Ok(document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("data-company-id"))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty()))
}

/// Extracts one section's table. `Ok(None)` when the page does not publish it.
pub fn extract_table(document: &Html, section: Section) -> Result<Option<SectionTable>, ParseError> {
    let section_selector = html_selector(&format!("section#{} table", section.slug()))?;
    let Some(table) = document.select(&section_selector).next() else {
        return Ok(None);
    };

    let row_selector = html_selector("tr")?;
    let cell_selector = html_selector("th, td")?;
    let mut rows = table.select(&row_selector);

    let Some(header) = rows.next() else {
        return Ok(None);
    };
    let periods: Vec<String> = header
        .select(&cell_selector)
        .skip(1)
        .map(|cell| normalize_label(&cell.text().collect::<String>()))
        .collect();

    let mut parsed = Vec::new();
    for row in rows {
        let cells: Vec<ElementRef> = row.select(&cell_selector).collect();
        let Some((first, values)) = cells.split_first() else {
            continue;
        };
        let raw_label = first.text().collect::<String>();
        let label = normalize_label(&raw_label);
        let values: Vec<String> = values
            .iter()
            .map(|cell| cell.text().collect::<String>())
            .collect();
        if label.is_empty() {
            if values.iter().any(|v| !v.trim().is_empty()) {
                tracing::debug!(section = %section, cells = ?values, "Skipping unlabelled row with values");
            }
            continue;
        }
        if values.len() != periods.len() {
            return Err(ParseError::ShapeMismatch {
                section: section.to_string(),
                label,
                cells: values.len(),
                columns: periods.len(),
            });
        }
        parsed.push(RawRow {
            label,
            cells: values,
            nested: is_nested(&row, first, &raw_label),
        });
    }

    Ok(Some(SectionTable {
        section,
        periods,
        rows: parsed,
    }))
}

fn has_child_class(element: &ElementRef) -> bool {
    element
        .value()
        .classes()
        .any(|class| CHILD_ROW_CLASSES.contains(&class))
}

fn is_nested(row: &ElementRef, first_cell: &ElementRef, raw_label: &str) -> bool {
    has_child_class(row)
        || has_child_class(first_cell)
        || raw_label.trim_start_matches(&['\n', '\r', '\t', ' '][..]).starts_with('\u{a0}')
}

/// Parent label of a row marked expandable with a trailing `+`.
fn expandable_label(label: &str) -> Option<String> {
    label
        .strip_suffix('+')
        .map(normalize_label)
        .filter(|parent| !parent.is_empty())
}

/// Converts section tables into KPI records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TableParser;

impl TableParser {
    /// Records of one section of a parsed page.
    ///
    /// A section missing from the page yields an empty sequence; a table whose
    /// rows do not match its header is a [`ParseError::ShapeMismatch`].
    pub fn parse(
        &self,
        page: &CompanyPage,
        section: Section,
        ctx: &EntityContext,
    ) -> Result<impl Iterator<Item = KpiRecord>, ParseError> {
        let table = page.tables.get(&section).cloned().transpose()?;
        Ok(self.records(section, table, ctx.clone()))
    }

    /// Lazily turns a detached table into records, folding the last top-level
    /// label through the rows so nested rows inherit it.
    fn records(
        &self,
        section: Section,
        table: Option<SectionTable>,
        ctx: EntityContext,
    ) -> impl Iterator<Item = KpiRecord> {
        let (periods, rows) = match table {
            Some(t) => (t.periods, t.rows),
            None => (Vec::new(), Vec::new()),
        };

        rows.into_iter()
            .scan(None::<String>, move |current_parent, row| {
                let inherited = if row.nested {
                    current_parent.clone()
                } else {
                    None
                };
                let (kind, parent, child) = match inherited {
                    Some(parent) => (RowKind::Child, parent, row.label.clone()),
                    None => match expandable_label(&row.label) {
                        Some(parent) => {
                            *current_parent = Some(parent.clone());
                            (RowKind::Parent, parent, String::new())
                        }
                        None => {
                            *current_parent = Some(row.label.clone());
                            (RowKind::Standalone, row.label.clone(), String::new())
                        }
                    },
                };
                let values = periods
                    .iter()
                    .zip(row.cells.iter())
                    .map(|(period, cell)| (period.clone(), clean_value(cell)))
                    .collect::<Periods>();
                Some(KpiRecord {
                    entity: ctx.entity.clone(),
                    section,
                    kind,
                    parent,
                    child,
                    periods: values,
                    provenance: ctx.provenance.clone(),
                })
            })
    }
}
