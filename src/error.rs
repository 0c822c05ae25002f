//! Custom error types for bibaffils.
//!
//! Per-record failures (`Lookup`, `Fetch`, transport errors) are recovered by the
//! pipeline; only errors reported by [`AffilError::is_fatal`] abort a run.

use thiserror::Error;

/// Main error type for bibaffils operations.
#[derive(Debug, Error)]
pub enum AffilError {
    /// Bibliography file missing or malformed
    #[error("Parse error: {0}")]
    Parse(String),

    /// DOI lookup failed or found no confident match
    #[error("Lookup failure: {0}")]
    Lookup(String),

    /// Metadata service request failed after retries
    #[error("Fetch failure ({service}): {message}")]
    Fetch {
        /// Service that failed ("crossref", "openalex")
        service: &'static str,
        /// What went wrong
        message: String,
    },

    /// Report file could not be created or written
    #[error("Write error: {0}")]
    Write(String),

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Rate limited by external API
    #[error("Rate limited, retry after {0}s")]
    RateLimited(u64),

    /// External API returned an error status
    #[error("API error: {code} - {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Error message
        message: String,
    },

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV serialization error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

impl AffilError {
    /// Whether this error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AffilError::Parse(_) | AffilError::Write(_) | AffilError::Config(_) | AffilError::Io(_)
        )
    }
}

/// Result type alias using `AffilError`
pub type Result<T> = std::result::Result<T, AffilError>;
