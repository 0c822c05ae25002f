//! Run configuration.
//!
//! A [`Config`] is built once before any request is issued and then shared
//! read-only by the resolver and both metadata clients.

use crate::error::{AffilError, Result};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Crossref API base URL
pub const CROSSREF_API_BASE: &str = "https://api.crossref.org";

/// OpenAlex API base URL
pub const OPENALEX_API_BASE: &str = "https://api.openalex.org";

/// Default bibliography file, looked up in the working directory
pub const DEFAULT_INPUT: &str = "works.bib";

/// Default report file
pub const DEFAULT_OUTPUT: &str = "bib_authors_with_affils.csv";

/// Placeholder contact used when the operator supplies none
pub const DEFAULT_MAILTO: &str = "bibaffils@example.org";

/// Bounded exponential backoff settings
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first one
    pub max_attempts: u32,
    /// Wait before the second attempt; doubled after every retry
    pub base_delay: Duration,
    /// Upper bound for a single wait
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (0-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Process-wide settings for one run
#[derive(Debug, Clone)]
pub struct Config {
    /// Contact email sent with every request (User-Agent and `mailto`)
    pub mailto: String,
    /// Bibliography file
    pub input: PathBuf,
    /// CSV report destination
    pub output: PathBuf,
    pub crossref_base: String,
    pub openalex_base: String,
    /// Per-request deadline
    pub timeout: Duration,
    /// Pause between consecutive HTTP calls
    pub pause: Duration,
    pub retry: RetryPolicy,
    /// Minimum title similarity (0.0..=1.0) to accept a looked-up DOI
    pub match_threshold: f64,
    /// Fill still-empty affiliations from OpenAlex author search
    pub author_search: bool,
}

impl Config {
    /// Configuration with the public API endpoints and default tuning.
    pub fn new(mailto: impl Into<String>) -> Self {
        Self {
            mailto: mailto.into(),
            input: PathBuf::from(DEFAULT_INPUT),
            output: PathBuf::from(DEFAULT_OUTPUT),
            crossref_base: CROSSREF_API_BASE.to_string(),
            openalex_base: OPENALEX_API_BASE.to_string(),
            timeout: Duration::from_secs(10),
            pause: Duration::from_millis(150),
            retry: RetryPolicy::default(),
            match_threshold: 0.9,
            author_search: false,
        }
    }

    /// Check settings before the first request goes out.
    pub fn validate(&self) -> Result<()> {
        let mailto = self.mailto.trim();
        if mailto.is_empty() || !mailto.contains('@') || mailto.contains(char::is_whitespace) {
            return Err(AffilError::Config(format!(
                "contact email must look like an address, got {:?}",
                self.mailto
            )));
        }

        if !(0.0..=1.0).contains(&self.match_threshold) {
            return Err(AffilError::Config(format!(
                "match threshold must be within 0..=1, got {}",
                self.match_threshold
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(AffilError::Config("max attempts must be at least 1".to_string()));
        }

        for base in [&self.crossref_base, &self.openalex_base] {
            Url::parse(base)
                .map_err(|e| AffilError::Config(format!("invalid base URL {}: {}", base, e)))?;
        }

        Ok(())
    }

    /// Whether requests would go out under the placeholder contact.
    pub fn uses_placeholder_contact(&self) -> bool {
        self.mailto.trim().eq_ignore_ascii_case(DEFAULT_MAILTO)
    }

    /// User-Agent carrying the contact value (Crossref polite-pool convention)
    pub fn user_agent(&self) -> String {
        format!(
            "bibaffils/{} (mailto:{})",
            env!("CARGO_PKG_VERSION"),
            self.mailto.trim()
        )
    }

    /// Build the shared HTTP client.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(self.user_agent())
            .timeout(self.timeout)
            .build()
            .map_err(|e| AffilError::Config(format!("Failed to build HTTP client: {}", e)))
    }
}
