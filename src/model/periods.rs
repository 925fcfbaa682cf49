//! Ordered period → value mapping carried by every KPI record.

use crate::parse::numeric::clean_value;
use rust_decimal::Decimal;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Period label → cleaned value, in column order.
///
/// Insertion order is the upstream column order, so lookups are linear; a
/// section rarely carries more than a dozen periods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Periods(Vec<(String, Option<Decimal>)>);

impl Periods {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value of a period; `None` both when unknown and when known-absent.
    pub fn get(&self, period: &str) -> Option<Decimal> {
        self.0
            .iter()
            .find(|(label, _)| label == period)
            .and_then(|(_, value)| *value)
    }

    pub fn contains(&self, period: &str) -> bool {
        self.0.iter().any(|(label, _)| label == period)
    }

    /// Sets a period, replacing the value in place or appending a new column.
    pub fn insert(&mut self, period: impl Into<String>, value: Option<Decimal>) {
        let period = period.into();
        match self.0.iter_mut().find(|(label, _)| *label == period) {
            Some(slot) => slot.1 = value,
            None => self.0.push((period, value)),
        }
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(label, _)| label.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<Decimal>)> {
        self.0.iter().map(|(label, value)| (label.as_str(), *value))
    }

    /// Overlays `newer` on top of `self`: new periods are appended and
    /// overlapping periods take the newer value. Nothing is removed.
    pub fn overlay(&mut self, newer: &Periods) {
        for (period, value) in newer.iter() {
            self.insert(period, value);
        }
    }

    /// Blanks every period of `self` that `newer` no longer reports.
    pub fn blank_missing_from(&mut self, newer: &Periods) {
        for (label, value) in self.0.iter_mut() {
            if !newer.contains(label) {
                *value = None;
            }
        }
    }
}

impl<S: Into<String>> FromIterator<(S, Option<Decimal>)> for Periods {
    fn from_iter<I: IntoIterator<Item = (S, Option<Decimal>)>>(iter: I) -> Self {
        let mut periods = Periods::new();
        for (label, value) in iter {
            let label: String = label.into();
            if periods.contains(&label) {
                tracing::warn!(period = %label, "Duplicate period column, later value wins");
            }
            periods.insert(label, value);
        }
        periods
    }
}

impl Serialize for Periods {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, value) in &self.0 {
            map.serialize_entry(label, &value.map(|v| v.to_string()))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Periods {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(PeriodsVisitor)
    }
}

struct PeriodsVisitor;

impl<'de> Visitor<'de> for PeriodsVisitor {
    type Value = Periods;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of period labels to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut periods = Periods::new();
        while let Some((label, value)) = access.next_entry::<String, LenientValue>()? {
            periods.insert(label, value.0);
        }
        Ok(periods)
    }
}

/// Accepts the encodings older snapshots used: strings with separators,
/// empty strings, bare numbers and null.
struct LenientValue(Option<Decimal>);

impl<'de> Deserialize<'de> for LenientValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(LenientValueVisitor)
    }
}

struct LenientValueVisitor;

impl<'de> Visitor<'de> for LenientValueVisitor {
    type Value = LenientValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a number, numeric string or null")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(LenientValue(clean_value(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(LenientValue(Some(Decimal::from(v))))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(LenientValue(Some(Decimal::from(v))))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(LenientValue(Decimal::from_str(&v.to_string()).ok()))
    }

    fn visit_bool<E: de::Error>(self, _v: bool) -> Result<Self::Value, E> {
        Ok(LenientValue(None))
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(LenientValue(None))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(LenientValue(None))
    }
}
