//! Turning upstream content into KPI records.

pub mod numeric;
pub mod schedule;
pub mod table;

pub use numeric::{clean_value, normalize_label};
pub use schedule::parse_schedule;
pub use table::{CompanyPage, EntityContext, TableParser};
