//! Identifier resolution for entries without a DOI.
//!
//! Searches Crossref by title and first author, then OpenAlex by title if
//! Crossref gives nothing usable. A hit is accepted only if its title is close
//! enough to ours. Entries that already carry a DOI are never touched.

use crate::bibtex::{clean_latex, Publication};
use crate::crossref::{Candidate, CrossrefClient};
use crate::error::AffilError;
use crate::openalex::OpenAlexClient;
use regex::Regex;
use std::sync::LazyLock;
use strsim::jaro_winkler;
use tracing::{debug, info, warn};

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

/// What happened to a publication's DOI
#[derive(Debug)]
pub enum Resolution {
    /// DOI was present in the bibliography
    Known,
    /// DOI found by lookup and stored on the publication
    Resolved(String),
    /// No DOI; the publication is reported without metadata
    Unresolved(AffilError),
}

/// DOI lookup with a minimum title similarity
pub struct Resolver<'a> {
    crossref: &'a CrossrefClient,
    openalex: &'a OpenAlexClient,
    threshold: f64,
}

impl<'a> Resolver<'a> {
    /// Create a resolver over both clients
    ///
    /// # Arguments
    ///
    /// * `crossref` - Asked first, by title and first author
    /// * `openalex` - Title search used when Crossref has no acceptable hit
    /// * `threshold` - Minimum title similarity (0-1) to accept a hit
    pub fn new(crossref: &'a CrossrefClient, openalex: &'a OpenAlexClient, threshold: f64) -> Self {
        Self {
            crossref,
            openalex,
            threshold,
        }
    }

    /// Fill in `publication.doi` if it is missing and a confident match exists.
    ///
    /// Lookup failures are logged and returned as [`Resolution::Unresolved`];
    /// they never abort the run.
    pub async fn resolve(&self, publication: &mut Publication) -> Resolution {
        if publication.doi.is_some() {
            return Resolution::Known;
        }

        let outcome = match self.lookup_crossref(publication).await {
            Ok(doi) => Ok(doi),
            Err(crossref) => {
                debug!(key = %publication.key, error = %crossref, "Trying OpenAlex title search");
                self.lookup_openalex(&publication.title)
                    .await
                    .map_err(|openalex| {
                        AffilError::Lookup(format!(
                            "crossref: {}; openalex: {}",
                            reason(crossref),
                            reason(openalex)
                        ))
                    })
            }
        };

        match outcome {
            Ok(doi) => {
                info!(key = %publication.key, doi = %doi, "Resolved DOI");
                publication.doi = Some(doi.clone());
                Resolution::Resolved(doi)
            }
            Err(e) => {
                warn!(key = %publication.key, error = %e, "DOI unresolved");
                Resolution::Unresolved(e)
            }
        }
    }

    async fn lookup_crossref(&self, publication: &Publication) -> Result<String, AffilError> {
        let first_author = publication.authors.first().map(|a| a.last.as_str());
        match self
            .crossref
            .search_bibliographic(&publication.title, first_author)
            .await?
        {
            Some(candidate) => accept_candidate(&publication.title, &candidate, self.threshold),
            None => Err(AffilError::Lookup("no candidate returned".to_string())),
        }
    }

    async fn lookup_openalex(&self, title: &str) -> Result<String, AffilError> {
        match self.openalex.search_title(title).await? {
            Some(candidate) => accept_candidate(title, &candidate, self.threshold),
            None => Err(AffilError::Lookup("no candidate returned".to_string())),
        }
    }
}

/// Message of a lookup error without the variant prefix.
fn reason(e: AffilError) -> String {
    match e {
        AffilError::Lookup(message) => message,
        other => other.to_string(),
    }
}

/// Accept the candidate DOI if its title is similar enough to `title`.
pub fn accept_candidate(
    title: &str,
    candidate: &Candidate,
    threshold: f64,
) -> Result<String, AffilError> {
    let similarity = title_similarity(title, &candidate.title);
    if similarity >= threshold {
        Ok(candidate.doi.clone())
    } else {
        Err(AffilError::Lookup(format!(
            "best candidate {} too dissimilar ({:.2} < {:.2})",
            candidate.doi, similarity, threshold
        )))
    }
}

/// Jaro-Winkler similarity of two titles after normalisation; 0 if either is empty.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize_title(a), normalize_title(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    jaro_winkler(&a, &b)
}

/// Strip markup, lowercase, keep only alphanumerics separated by single spaces.
fn normalize_title(title: &str) -> String {
    let text = clean_latex(&TAG_RE.replace_all(title, " "));
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
