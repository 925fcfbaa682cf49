//! HTML generation utilities for testing.
//!
//! Produces company pages shaped like the upstream site: a
//! `#company-info` element carrying the internal id and one `<section>` per
//! published statement.

/// Wraps the given sections in a company page.
///
/// An empty `company_id` leaves the `data-company-id` attribute out.
pub fn company_page(company_id: &str, sections: &[String]) -> String {
    let info = if company_id.is_empty() {
        r#"<div id="company-info"></div>"#.to_string()
    } else {
        format!(r#"<div id="company-info" data-company-id="{}"></div>"#, company_id)
    };
    format!(
        "<!DOCTYPE html><html><head><title>Company</title></head><body>{}<main>{}</main></body></html>",
        info,
        sections.concat()
    )
}

/// One statement table. The header row starts with the blank label column.
pub fn section_table(slug: &str, periods: &[&str], rows: &[(&str, &[&str])]) -> String {
    let header: String = periods
        .iter()
        .map(|period| format!("<th>{}</th>", period))
        .collect();
    let body: String = rows
        .iter()
        .map(|(label, cells)| {
            let cells: String = cells
                .iter()
                .map(|cell| format!("<td>{}</td>", cell))
                .collect();
            format!("<tr><td class=\"text\">{}</td>{}</tr>", label, cells)
        })
        .collect();
    format!(
        r#"<section id="{}"><table class="data-table"><thead><tr><th></th>{}</tr></thead><tbody>{}</tbody></table></section>"#,
        slug, header, body
    )
}

/// Schedules API body for one parent: child label to `{period: value}`.
pub fn schedule_json(children: &[(&str, &[(&str, &str)])]) -> String {
    let map: serde_json::Map<String, serde_json::Value> = children
        .iter()
        .map(|(child, values)| {
            let periods: serde_json::Map<String, serde_json::Value> = values
                .iter()
                .map(|(period, value)| (period.to_string(), serde_json::Value::from(*value)))
                .collect();
            (child.to_string(), serde_json::Value::Object(periods))
        })
        .collect();
    serde_json::Value::Object(map).to_string()
}
