//! Child breakdowns served by the schedules API.

use crate::error::ParseError;
use crate::model::{KpiRecord, Periods, RowKind};
use crate::parse::numeric::{clean_value, normalize_label};
use serde_json::Value;

fn cell_value(value: Option<&Value>) -> Option<rust_decimal::Decimal> {
    match value? {
        Value::String(text) => clean_value(text),
        Value::Number(number) => clean_value(&number.to_string()),
        _ => None,
    }
}

/// Expands a parent record with the breakdown returned for it.
///
/// The payload maps child label to `{period: value}`. Children take the
/// parent's period columns; a period the payload omits is recorded as absent.
/// A payload that is not an object carries no children.
pub fn parse_schedule(body: &str, parent: &KpiRecord) -> Result<Vec<KpiRecord>, ParseError> {
    let payload: Value =
        serde_json::from_str(body).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    let Value::Object(children) = payload else {
        return Ok(Vec::new());
    };

    let records = children
        .iter()
        .filter_map(|(label, values)| {
            let child = normalize_label(label);
            if child.is_empty() {
                return None;
            }
            let values = values.as_object();
            let periods = parent
                .periods
                .labels()
                .map(|period| {
                    let value = values.and_then(|map| cell_value(map.get(period)));
                    (period.to_string(), value)
                })
                .collect::<Periods>();
            Some(KpiRecord {
                entity: parent.entity.clone(),
                section: parent.section,
                kind: RowKind::Child,
                parent: parent.parent.clone(),
                child,
                periods,
                provenance: parent.provenance.clone(),
            })
        })
        .collect();
    Ok(records)
}
