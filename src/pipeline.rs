//! End-to-end run: load → resolve → fetch → merge → write.
//!
//! Publications are processed one at a time in bibliography order. Only a bad
//! input file, a bad configuration or an unwritable report abort the run.

use crate::bibtex::{self, Publication};
use crate::config::Config;
use crate::crossref::CrossrefClient;
use crate::error::{AffilError, Result};
use crate::merge::{self, AuthorAffiliation, MergedAuthor, MergedRow};
use crate::openalex::OpenAlexClient;
use crate::report;
use crate::resolver::{Resolution, Resolver};
use crate::retry::Pacer;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counters reported to the operator at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub records: usize,
    /// DOI already present in the bibliography
    pub doi_known: usize,
    pub doi_resolved: usize,
    pub doi_unresolved: usize,
    pub crossref_failures: usize,
    pub openalex_failures: usize,
    /// Affiliations filled by the author-search fallback
    pub fallback_filled: usize,
    pub rows: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records ({} with DOI, {} resolved, {} unresolved); fetch failures: crossref {}, openalex {}; {} rows",
            self.records,
            self.doi_known,
            self.doi_resolved,
            self.doi_unresolved,
            self.crossref_failures,
            self.openalex_failures,
            self.rows
        )?;
        if self.fallback_filled > 0 {
            write!(f, "; {} affiliations from author search", self.fallback_filled)?;
        }
        Ok(())
    }
}

/// Clients and settings for one run
pub struct Pipeline {
    config: Config,
    crossref: CrossrefClient,
    openalex: OpenAlexClient,
}

impl Pipeline {
    /// Validate the configuration and build the shared HTTP client.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        if config.uses_placeholder_contact() {
            warn!(
                mailto = %config.mailto,
                "No contact email configured; set --mailto or BIBAFFILS_MAILTO so the APIs can reach you"
            );
        }

        let client = config.http_client()?;
        let pacer = Arc::new(Pacer::new(config.pause));

        Ok(Self {
            crossref: CrossrefClient::new(&config, client.clone(), Arc::clone(&pacer)),
            openalex: OpenAlexClient::new(&config, client, pacer),
            config,
        })
    }

    /// Load the bibliography, process it and write the report.
    pub async fn run(&self) -> Result<RunSummary> {
        let publications = bibtex::load(&self.config.input)?;
        let (rows, summary) = self.process_publications(publications).await;
        report::write_report(&self.config.output, &rows)?;

        info!(
            records = summary.records,
            unresolved = summary.doi_unresolved,
            crossref_failures = summary.crossref_failures,
            openalex_failures = summary.openalex_failures,
            rows = summary.rows,
            "Run complete"
        );
        Ok(summary)
    }

    /// Turn publications into report rows, in input order. Never fails: per-record
    /// problems are logged and counted.
    pub async fn process_publications(
        &self,
        publications: Vec<Publication>,
    ) -> (Vec<MergedRow>, RunSummary) {
        let resolver = Resolver::new(&self.crossref, &self.openalex, self.config.match_threshold);
        let mut summary = RunSummary {
            records: publications.len(),
            ..Default::default()
        };
        let mut rows = Vec::new();

        for (idx, mut publication) in publications.into_iter().enumerate() {
            info!(
                record = idx + 1,
                key = %publication.key,
                authors = publication.authors.len(),
                "Processing"
            );

            match resolver.resolve(&mut publication).await {
                Resolution::Known => summary.doi_known += 1,
                Resolution::Resolved(_) => summary.doi_resolved += 1,
                Resolution::Unresolved(_) => summary.doi_unresolved += 1,
            }

            let (crossref, openalex) = match publication.doi.as_deref() {
                Some(doi) => self.fetch_authors(doi, &mut summary).await,
                None => (Vec::new(), Vec::new()),
            };

            let merged = merge::merge_services(&crossref, &openalex);
            let mut authors = merge::assign_to_raw_authors(&publication.authors, merged);

            if self.config.author_search {
                summary.fallback_filled += self.fill_from_author_search(&mut authors).await;
            }

            let publication_rows = merge::to_rows(
                &authors,
                publication.doi.as_deref().unwrap_or_default(),
                &publication.title,
            );
            debug!(key = %publication.key, rows = publication_rows.len(), "Merged");
            rows.extend(publication_rows);
        }

        summary.rows = rows.len();
        (rows, summary)
    }

    /// Query both services; a failed service contributes nothing.
    async fn fetch_authors(
        &self,
        doi: &str,
        summary: &mut RunSummary,
    ) -> (Vec<AuthorAffiliation>, Vec<AuthorAffiliation>) {
        let crossref = self
            .crossref
            .work_authors(doi)
            .await
            .map_err(|e| fetch_failure("crossref", e))
            .unwrap_or_else(|e| {
                warn!(doi, error = %e, "Continuing without Crossref data");
                summary.crossref_failures += 1;
                Vec::new()
            });

        let openalex = self
            .openalex
            .work_authors(doi)
            .await
            .map_err(|e| fetch_failure("openalex", e))
            .unwrap_or_else(|e| {
                warn!(doi, error = %e, "Continuing without OpenAlex data");
                summary.openalex_failures += 1;
                Vec::new()
            });

        (crossref, openalex)
    }

    /// Look up authors that still have no affiliation; returns how many were filled.
    async fn fill_from_author_search(&self, authors: &mut [MergedAuthor]) -> usize {
        let mut filled = 0;

        for author in authors.iter_mut().filter(|a| a.affiliations.is_empty()) {
            let query = search_name(&author.name);
            match self.openalex.search_author_institution(&query).await {
                Ok(Some(institution)) => {
                    debug!(author = %author.name, institution = %institution, "Author search hit");
                    author.affiliations.push(institution);
                    filled += 1;
                }
                Ok(None) => debug!(author = %author.name, "Author search found nothing"),
                Err(e) => warn!(author = %author.name, error = %e, "Author search failed"),
            }
        }

        filled
    }
}

fn fetch_failure(service: &'static str, e: AffilError) -> AffilError {
    AffilError::Fetch {
        service,
        message: e.to_string(),
    }
}

/// `Last, First` labels read better to a search engine as `First Last`.
fn search_name(name: &str) -> String {
    match name.split_once(',') {
        Some((last, first)) => format!("{} {}", first.trim(), last.trim()),
        None => name.trim().to_string(),
    }
}

/// Build a [`Pipeline`] from `config` and run it.
pub async fn run(config: Config) -> Result<RunSummary> {
    Pipeline::new(config)?.run().await
}
