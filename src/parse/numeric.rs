//! Text cleaning for KPI labels and table values.

use rust_decimal::Decimal;
use std::str::FromStr;

const CURRENCY_MARKERS: [&str; 6] = ["Rs.", "Rs", "\u{20b9}", "$", "\u{20ac}", "\u{a3}"];

/// Collapses the whitespace variants the source uses and trims the label.
pub fn normalize_label(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '\u{feff}' | '\u{fffd}' | '\u{200b}'))
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect::<String>()
        .split(' ')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Converts a table cell into a signed decimal.
///
/// Thousands separators, percent signs, currency symbols and whitespace are
/// stripped; `(12)` and the unicode minus both mean negative. Blank cells,
/// dash placeholders and anything that is not a number come back as `None`,
/// never as zero.
pub fn clean_value(raw: &str) -> Option<Decimal> {
    let mut text = normalize_label(raw);
    if text.is_empty() || text.chars().all(|c| matches!(c, '-' | '\u{2013}' | '\u{2014}')) {
        return None;
    }

    for marker in CURRENCY_MARKERS {
        text = text.replace(marker, "");
    }
    text = text
        .replace(&[',', '%', ' '][..], "")
        .replace('\u{2212}', "-");

    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        text = format!("-{}", inner);
    }
    let digits = text.strip_prefix('+').unwrap_or(&text);

    if digits.is_empty() || !digits.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if !digits
        .chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == '-')
    {
        return None;
    }

    Decimal::from_str(digits).ok()
}
