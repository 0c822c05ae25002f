//! OpenAlex API Client
//!
//! Second metadata source: `/works/doi:{doi}` authorships with their
//! institutions, a `/works?filter=title.search:` lookup for entries without a
//! DOI, `/authors/{id}` for authorships that carry no affiliation, and an
//! optional `/authors?search=` fallback for authors that end up with none.
//!
//! API Best Practices (per OpenAlex docs):
//! - Use `mailto:email` parameter for polite pool (10 req/s vs 1 req/s)
//! - Implement exponential backoff for retries

use crate::config::{Config, RetryPolicy};
use crate::bibtex::normalize_doi;
use crate::crossref::{encode_doi_path, Candidate};
use crate::error::Result;
use crate::merge::AuthorAffiliation;
use crate::retry::{get_json, with_backoff, Pacer};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fields requested for a work
const WORK_SELECT: &str = "id,doi,authorships";

/// Fields requested from the title search
const SEARCH_SELECT: &str = "id,doi,title";

/// OpenAlex API client sharing the run's HTTP client and pacing
pub struct OpenAlexClient {
    client: reqwest::Client,
    base_url: String,
    mailto: String,
    retry: RetryPolicy,
    pacer: Arc<Pacer>,
}

/// OpenAlex API response structures
#[derive(Debug, Deserialize)]
struct OpenAlexWork {
    #[serde(default)]
    authorships: Vec<OpenAlexAuthorship>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexAuthorship {
    author: Option<OpenAlexAuthor>,
    #[serde(default)]
    institutions: Vec<OpenAlexInstitution>,
    #[serde(default)]
    raw_affiliation_strings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexAuthor {
    /// `https://openalex.org/A...`
    id: Option<String>,
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkSearchResponse {
    #[serde(default)]
    results: Vec<WorkHit>,
}

#[derive(Debug, Deserialize)]
struct WorkHit {
    doi: Option<String>,
    title: Option<String>,
    relevance_score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OpenAlexInstitution {
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorSearchResponse {
    #[serde(default)]
    results: Vec<AuthorHit>,
}

#[derive(Debug, Deserialize)]
struct AuthorHit {
    #[serde(default)]
    last_known_institutions: Vec<OpenAlexInstitution>,
    /// Older single-valued form of the field above
    last_known_institution: Option<OpenAlexInstitution>,
}

impl AuthorHit {
    fn institution(self) -> Option<String> {
        self.last_known_institutions
            .into_iter()
            .chain(self.last_known_institution)
            .filter_map(|i| i.display_name)
            .map(|n| n.trim().to_string())
            .find(|n| !n.is_empty())
    }
}

/// One authorship before any per-author lookup
#[derive(Debug, PartialEq)]
struct ParsedAuthorship {
    name: String,
    author_id: Option<String>,
    affiliations: Vec<String>,
}

impl OpenAlexClient {
    /// Create a new OpenAlexClient
    ///
    /// # Arguments
    ///
    /// * `config` - Base URL, contact email and retry policy
    /// * `client` - HTTP client shared with the Crossref client
    /// * `pacer` - Request spacing shared with the Crossref client
    pub fn new(config: &Config, client: reqwest::Client, pacer: Arc<Pacer>) -> Self {
        Self {
            client,
            base_url: config.openalex_base.trim_end_matches('/').to_string(),
            mailto: config.mailto.trim().to_string(),
            retry: config.retry.clone(),
            pacer,
        }
    }

    /// Author/affiliation pairs from the work's authorships, in authorship order.
    pub async fn work_authors(&self, doi: &str) -> Result<Vec<AuthorAffiliation>> {
        let url = format!("{}/works/doi:{}", self.base_url, encode_doi_path(doi));
        let query = [("select", WORK_SELECT), ("mailto", self.mailto.as_str())];

        let pacer = &self.pacer;
        let work: OpenAlexWork = with_backoff(&self.retry, "openalex work", || {
            let request = self.client.get(&url).query(&query);
            async move {
                pacer.wait().await;
                get_json(request).await
            }
        })
        .await?;

        let mut authorships = parse_authorships(work.authorships);
        for authorship in authorships.iter_mut() {
            if !authorship.affiliations.is_empty() {
                continue;
            }
            let Some(id) = authorship.author_id.as_deref() else {
                continue;
            };
            match self.author_institution(id).await {
                Ok(Some(institution)) => authorship.affiliations.push(institution),
                Ok(None) => {}
                Err(e) => warn!(author = %authorship.name, error = %e, "Author lookup failed"),
            }
        }

        let authors = into_rows(authorships);
        info!(doi, rows = authors.len(), "OpenAlex authors fetched");
        Ok(authors)
    }

    /// Best title-search hit that carries a DOI.
    ///
    /// Returns `Ok(None)` when OpenAlex has no hit or the hit has no DOI.
    pub async fn search_title(&self, title: &str) -> Result<Option<Candidate>> {
        // Commas separate filters in OpenAlex syntax
        let title = title.replace(',', " ");
        let title = title.trim();
        if title.is_empty() {
            return Ok(None);
        }

        let url = format!("{}/works", self.base_url);
        let filter = format!("title.search:{}", title);
        let query = [
            ("filter", filter.as_str()),
            ("per_page", "1"),
            ("select", SEARCH_SELECT),
            ("mailto", self.mailto.as_str()),
        ];

        let pacer = &self.pacer;
        let response: WorkSearchResponse =
            with_backoff(&self.retry, "openalex title search", || {
                let request = self.client.get(&url).query(&query);
                async move {
                    pacer.wait().await;
                    get_json(request).await
                }
            })
            .await?;

        let candidate = response.results.into_iter().next().and_then(|hit| {
            let doi = hit.doi.as_deref().and_then(normalize_doi)?;
            Some(Candidate {
                doi,
                title: hit.title.unwrap_or_default(),
                score: hit.relevance_score.unwrap_or_default(),
            })
        });

        debug!(
            title = %title.chars().take(40).collect::<String>(),
            found = candidate.is_some(),
            "OpenAlex title search"
        );
        Ok(candidate)
    }

    /// Last known institution of an author, by OpenAlex id or full id URL.
    pub async fn author_institution(&self, author_id: &str) -> Result<Option<String>> {
        let short_id = author_id.rsplit('/').next().unwrap_or(author_id);
        let url = format!("{}/authors/{}", self.base_url, urlencoding::encode(short_id));
        let query = [("mailto", self.mailto.as_str())];

        let pacer = &self.pacer;
        let author: AuthorHit = with_backoff(&self.retry, "openalex author", || {
            let request = self.client.get(&url).query(&query);
            async move {
                pacer.wait().await;
                get_json(request).await
            }
        })
        .await?;

        let institution = author.institution();
        debug!(author_id = short_id, found = institution.is_some(), "OpenAlex author lookup");
        Ok(institution)
    }

    /// Last known institution of the best author-search hit for `name`.
    pub async fn search_author_institution(&self, name: &str) -> Result<Option<String>> {
        let url = format!("{}/authors", self.base_url);
        let query = [
            ("search", name.trim()),
            ("per_page", "1"),
            ("mailto", self.mailto.as_str()),
        ];

        let pacer = &self.pacer;
        let response: AuthorSearchResponse =
            with_backoff(&self.retry, "openalex author search", || {
                let request = self.client.get(&url).query(&query);
                async move {
                    pacer.wait().await;
                    get_json(request).await
                }
            })
            .await?;

        let institution = response
            .results
            .into_iter()
            .next()
            .and_then(AuthorHit::institution);

        debug!(author = name, found = institution.is_some(), "OpenAlex author search");
        Ok(institution)
    }
}

/// Institutions win over raw affiliation strings; authors with neither are
/// kept with no affiliation.
fn parse_authorships(authorships: Vec<OpenAlexAuthorship>) -> Vec<ParsedAuthorship> {
    let mut parsed = Vec::new();

    for authorship in authorships {
        let Some(author) = authorship.author else {
            continue;
        };
        let name = author
            .display_name
            .map(|n| n.trim().to_string())
            .unwrap_or_default();
        if name.is_empty() {
            continue;
        }

        let mut affiliations: Vec<String> = authorship
            .institutions
            .into_iter()
            .filter_map(|i| i.display_name)
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();

        if affiliations.is_empty() {
            affiliations = authorship
                .raw_affiliation_strings
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        affiliations.dedup();

        parsed.push(ParsedAuthorship {
            name,
            author_id: author.id.filter(|id| !id.trim().is_empty()),
            affiliations,
        });
    }

    parsed
}

/// One pair per affiliation, or a single empty pair.
fn into_rows(authorships: Vec<ParsedAuthorship>) -> Vec<AuthorAffiliation> {
    let mut rows = Vec::new();

    for authorship in authorships {
        if authorship.affiliations.is_empty() {
            rows.push(AuthorAffiliation::new(&authorship.name, ""));
        } else {
            rows.extend(
                authorship
                    .affiliations
                    .iter()
                    .map(|a| AuthorAffiliation::new(&authorship.name, a)),
            );
        }
    }

    rows
}
