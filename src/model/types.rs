use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// A financial statement published on the company page.
///
/// The set is fixed: every company page is scanned for exactly these tables,
/// in this order.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Section {
    Quarters,
    ProfitLoss,
    BalanceSheet,
    CashFlow,
    Ratios,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::Quarters,
        Section::ProfitLoss,
        Section::BalanceSheet,
        Section::CashFlow,
        Section::Ratios,
    ];

    /// The `id` of the `<section>` element, also used as the schedules API parameter.
    pub fn slug(&self) -> &'static str {
        match self {
            Section::Quarters => "quarters",
            Section::ProfitLoss => "profit-loss",
            Section::BalanceSheet => "balance-sheet",
            Section::CashFlow => "cash-flow",
            Section::Ratios => "ratios",
        }
    }

    /// Name of the collection (file) the section is persisted to.
    pub fn collection(&self) -> &'static str {
        match self {
            Section::Quarters => "quarters",
            Section::ProfitLoss => "profit loss",
            Section::BalanceSheet => "balance sheet",
            Section::CashFlow => "cash flow",
            Section::Ratios => "ratios",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

/// Position of a row in the KPI hierarchy.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum RowKind {
    /// Expandable row whose breakdown is published as child rows
    Parent,
    /// Breakdown row nested under the preceding parent
    Child,
    /// Row with no hierarchy
    Standalone,
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RowKind::Parent => write!(f, "Parent"),
            RowKind::Child => write!(f, "Child"),
            RowKind::Standalone => write!(f, "Standalone"),
        }
    }
}

/// How the upstream slug of an entity was found.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
pub enum SlugSource {
    /// Primary exchange code matched a company page directly
    #[default]
    #[serde(rename = "BSE")]
    Direct,
    /// Secondary exchange code was used after the primary missed
    #[serde(rename = "NSE")]
    Fallback,
    /// Slug recorded in the corporate directory
    #[serde(rename = "Override")]
    Override,
}

impl fmt::Display for SlugSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SlugSource::Direct => write!(f, "BSE"),
            SlugSource::Fallback => write!(f, "NSE"),
            SlugSource::Override => write!(f, "Override"),
        }
    }
}

/// Which set of financials to request from the company page.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum View {
    Consolidated,
    Standalone,
}

impl View {
    pub fn is_consolidated(&self) -> bool {
        matches!(self, View::Consolidated)
    }
}
