//! Error types for the fundamentals forwarder.
//!
//! Each stage of the pipeline has its own typed error so that failures can be
//! classified (retry, record as exception, or stop the run) without string
//! matching.

use std::time::Duration;
use thiserror::Error;

/// Failure of one unit of pipeline work, tagged with the stage that raised it.
#[derive(Error, Debug)]
pub enum Error {
    /// Upstream fetch errors
    #[error("fetch error")]
    Fetch(#[from] FetchError),

    /// HTML / JSON extraction errors
    #[error("parse error")]
    Parse(#[from] ParseError),

    /// Persistence errors
    #[error("storage error")]
    Store(#[from] StoreError),

    /// Roster and directory input errors
    #[error("roster error")]
    Roster(#[from] RosterError),
}

/// Configuration-related errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable parsing failed
    #[error("failed to parse environment variables: {0}")]
    EnvParse(String),

    /// Required configuration value is missing
    #[error("missing required configuration: {0}")]
    Missing(String),

    /// Configuration value is invalid
    #[error("invalid configuration value for {field}: {message}")]
    Invalid { field: String, message: String },
}

/// Classified outcome of a failed upstream request.
///
/// `Timeout`, `Network` and `ServerError` are the transient network family,
/// `RateLimited` is an explicit throttle. Both are retried by the fetcher and
/// only surface wrapped in `RetriesExhausted`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("request to {target} timed out")]
    Timeout { target: String },

    #[error("network failure for {target}: {message}")]
    Network { target: String, message: String },

    #[error("server error (status {status}) from {target}")]
    ServerError { status: u16, target: String },

    #[error("rate limited by upstream on {target}")]
    RateLimited {
        target: String,
        retry_after: Option<Duration>,
    },

    #[error("{target} not found")]
    NotFound { target: String },

    #[error("request to {target} rejected with status {status}")]
    Rejected { status: u16, target: String },

    #[error("unusable response body from {target}: {message}")]
    Malformed { target: String, message: String },

    #[error("gave up on {target} after {attempts} attempts: {last}")]
    RetriesExhausted {
        target: String,
        attempts: u32,
        last: Box<FetchError>,
    },

    #[error("fetch cancelled before completion")]
    Cancelled,

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// HTML and JSON extraction errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Invalid CSS selector
    #[error("invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    /// A body row does not have one cell per header column
    #[error("table '{section}' row '{label}' has {cells} cells, header has {columns}")]
    ShapeMismatch {
        section: String,
        label: String,
        cells: usize,
        columns: usize,
    },

    /// The company page carries no internal company id
    #[error("company id not present on page")]
    MissingCompanyId,

    /// A JSON payload could not be decoded
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),
}

/// Persistence errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend cannot be reached
    #[error("{backend} sink unavailable: {message}")]
    Unavailable { backend: String, message: String },

    /// Filesystem failure
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Record (de)serialization failure
    #[error("failed to (de)serialize {path}: {message}")]
    Serialization { path: String, message: String },
}

/// Roster input and entity resolution errors.
#[derive(Error, Debug)]
pub enum RosterError {
    /// Roster or directory source could not be read
    #[error("cannot read {path}: {message}")]
    Unreadable { path: String, message: String },

    /// Source was read but has the wrong shape
    #[error("invalid roster format: {0}")]
    InvalidFormat(String),

    /// A descriptor does not match any directory entry
    #[error("no directory entry for descriptor '{descriptor}'")]
    EntityUnresolved { descriptor: String },
}

impl ConfigError {
    /// Creates a new environment parse error.
    pub fn env_parse(err: impl std::fmt::Display) -> Self {
        Self::EnvParse(err.to_string())
    }

    /// Creates a new missing configuration error.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing(field.into())
    }

    /// Creates a new invalid configuration error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl FetchError {
    /// Classifies a non-success HTTP status.
    pub fn from_status(status: u16, target: &str, retry_after: Option<Duration>) -> Self {
        let target = target.to_string();
        match status {
            404 | 410 => Self::NotFound { target },
            429 => Self::RateLimited {
                target,
                retry_after,
            },
            408 | 500..=599 => Self::ServerError { status, target },
            _ => Self::Rejected { status, target },
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Network { .. }
                | Self::ServerError { .. }
                | Self::RateLimited { .. }
                | Self::Malformed { .. }
        )
    }

    /// Whether the upstream explicitly asked us to slow down.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether the failure is attributable to the egress rather than the target.
    pub fn is_egress_fault(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Network { .. } | Self::RateLimited { .. }
        )
    }

    /// Whether the target definitively does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl ParseError {
    /// Creates an invalid selector error.
    pub fn invalid_selector(selector: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::InvalidSelector {
            selector: selector.into(),
            message: err.to_string(),
        }
    }
}

impl StoreError {
    /// Creates an unavailable-backend error.
    pub fn unavailable(backend: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            backend: backend.into(),
            message: err.to_string(),
        }
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn serialization(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Serialization {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Whether the sink itself is unreachable, as opposed to a bad payload.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Io { .. })
    }
}

impl RosterError {
    pub fn unreadable(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Unreadable {
            path: path.into(),
            message: err.to_string(),
        }
    }
}
