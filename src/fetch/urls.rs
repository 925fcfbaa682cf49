use crate::error::FetchError;
use crate::model::{Section, View};
use reqwest::Url;

/// URL layout of the upstream site.
#[derive(Debug, Clone, PartialEq)]
pub struct Upstream {
    base: String,
}

impl Upstream {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    /// `{base}/company/{slug}/`, plus `consolidated/` for the consolidated view.
    pub fn company_page(&self, slug: &str, view: View) -> String {
        let mut url = format!("{}/company/{}/", self.base, slug);
        if view.is_consolidated() {
            url.push_str("consolidated/");
        }
        url
    }

    /// Child breakdown of one parent row.
    pub fn schedules(
        &self,
        company_id: &str,
        parent: &str,
        section: Section,
        view: View,
    ) -> Result<String, FetchError> {
        let endpoint = format!("{}/api/company/{}/schedules/", self.base, company_id);
        let consolidated = if view.is_consolidated() { "" } else { "0" };
        let url = Url::parse_with_params(
            &endpoint,
            &[
                ("parent", parent),
                ("section", section.slug()),
                ("consolidated", consolidated),
            ],
        )
        .map_err(|e| FetchError::Malformed {
            target: endpoint.clone(),
            message: e.to_string(),
        })?;
        Ok(url.to_string())
    }
}

/// Slug segment of a company page URL, e.g. `RELIANCE` for
/// `https://host/company/RELIANCE/consolidated/`.
pub fn slug_from_url(url: &str) -> String {
    let cleaned = url.split(&['?', '#'][..]).next().unwrap_or(url).trim_end_matches('/');
    match cleaned.split_once("/company/") {
        Some((_, tail)) => tail.split('/').next().unwrap_or(tail).to_string(),
        None => cleaned.rsplit('/').next().unwrap_or(cleaned).to_string(),
    }
}
