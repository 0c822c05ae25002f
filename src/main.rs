//! bibaffils - co-author affiliations from a BibTeX file
//!
//! ## Usage
//!
//! ```bash
//! BIBAFFILS_MAILTO=you@example.org bibaffils
//! bibaffils --input works.bib --output affils.csv --mailto you@example.org
//! ```

use anyhow::{Context, Result};
use bibaffils::config::{RetryPolicy, DEFAULT_INPUT, DEFAULT_MAILTO, DEFAULT_OUTPUT};
use bibaffils::{pipeline, Config};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Extract co-author affiliations from a BibTeX bibliography
#[derive(Parser)]
#[command(name = "bibaffils")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Contact email sent with every request (Crossref/OpenAlex polite pool)
    #[arg(long, env = "BIBAFFILS_MAILTO", default_value = DEFAULT_MAILTO)]
    mailto: String,

    /// BibTeX input file
    #[arg(short, long, default_value = DEFAULT_INPUT)]
    input: PathBuf,

    /// CSV output file
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Minimum title similarity (0-1) to accept a looked-up DOI
    #[arg(long, default_value_t = 0.9)]
    threshold: f64,

    /// Attempts per request, including the first
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Pause between HTTP calls, in milliseconds
    #[arg(long, default_value_t = 150)]
    pause_ms: u64,

    /// Per-request timeout, in seconds
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Fill missing affiliations from OpenAlex author search
    #[arg(long)]
    author_search: bool,

    /// Crossref API base URL
    #[arg(long, default_value = bibaffils::config::CROSSREF_API_BASE, hide = true)]
    crossref_url: String,

    /// OpenAlex API base URL
    #[arg(long, default_value = bibaffils::config::OPENALEX_API_BASE, hide = true)]
    openalex_url: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn into_config(self) -> Config {
        let mut config = Config::new(self.mailto);
        config.input = self.input;
        config.output = self.output;
        config.match_threshold = self.threshold;
        config.pause = Duration::from_millis(self.pause_ms);
        config.timeout = Duration::from_secs(self.timeout_secs);
        config.author_search = self.author_search;
        config.crossref_base = self.crossref_url;
        config.openalex_base = self.openalex_url;
        config.retry = RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        };
        config
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.log_json {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    let config = cli.into_config();
    let output = config.output.clone();
    info!(input = %config.input.display(), output = %output.display(), "Starting");

    let summary = pipeline::run(config)
        .await
        .inspect_err(|e| error!(error = %e, fatal = e.is_fatal(), "Run aborted"))
        .context("Affiliation extraction failed")?;

    println!("{}", summary);
    println!("\n✓ Finished – results in {}", output.display());
    Ok(())
}
