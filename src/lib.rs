//! # bibaffils
//!
//! Co-author affiliation extraction for grant disclosures: reads a BibTeX file,
//! finds missing DOIs through Crossref, asks Crossref and OpenAlex for every
//! publication's authors and affiliations, merges the two and writes a CSV with
//! one row per (author, affiliation, DOI, title).
//!
//! ## Modules
//!
//! - [`bibtex`] - Citation loader
//! - [`resolver`] - DOI lookup for entries without one
//! - [`crossref`] - Crossref API client
//! - [`openalex`] - OpenAlex API client
//! - [`merge`] - Affiliation merging
//! - [`report`] - CSV output
//! - [`pipeline`] - The whole run
//! - [`retry`] - Backoff and request pacing
//! - [`config`] - Run configuration
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bibaffils::{pipeline, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let summary = pipeline::run(Config::new("you@example.org")).await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod bibtex;
pub mod config;
pub mod crossref;
pub mod error;
pub mod merge;
pub mod openalex;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod retry;

pub use config::Config;
pub use error::{AffilError, Result};
