//! Crossref API client.
//!
//! Used twice in a run: bibliographic search to find a DOI for entries that lack
//! one, and `/works/{doi}` to read the publisher-deposited author list with
//! affiliations.

use crate::config::{Config, RetryPolicy};
use crate::error::{AffilError, Result};
use crate::merge::AuthorAffiliation;
use crate::retry::{get_json, with_backoff, Pacer};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Fields requested from the search endpoint
const SEARCH_SELECT: &str = "DOI,title,score";

/// Top hit of a bibliographic search
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub doi: String,
    pub title: String,
    /// Crossref relevance score (unbounded, informational)
    pub score: f64,
}

/// Crossref API client sharing the run's HTTP client and pacing
pub struct CrossrefClient {
    client: reqwest::Client,
    base_url: String,
    mailto: String,
    retry: RetryPolicy,
    pacer: Arc<Pacer>,
}

impl CrossrefClient {
    /// Create a new CrossrefClient
    ///
    /// # Arguments
    ///
    /// * `config` - Base URL, contact email and retry policy
    /// * `client` - HTTP client shared with the OpenAlex client
    /// * `pacer` - Request spacing shared with the OpenAlex client
    pub fn new(config: &Config, client: reqwest::Client, pacer: Arc<Pacer>) -> Self {
        Self {
            client,
            base_url: config.crossref_base.trim_end_matches('/').to_string(),
            mailto: config.mailto.trim().to_string(),
            retry: config.retry.clone(),
            pacer,
        }
    }

    /// Search works by title (and optionally the first author's last name).
    ///
    /// Returns `Ok(None)` when Crossref has no hit at all.
    pub async fn search_bibliographic(
        &self,
        title: &str,
        author: Option<&str>,
    ) -> Result<Option<Candidate>> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AffilError::Lookup("no title to search for".to_string()));
        }

        let url = format!("{}/works", self.base_url);
        let mut query: Vec<(&str, &str)> = vec![
            ("query.bibliographic", title),
            ("rows", "1"),
            ("select", SEARCH_SELECT),
            ("mailto", self.mailto.as_str()),
        ];
        if let Some(author) = author.filter(|a| !a.trim().is_empty()) {
            query.push(("query.author", author));
        }

        let pacer = &self.pacer;
        let response: SearchResponse = with_backoff(&self.retry, "crossref search", || {
            let request = self.client.get(&url).query(&query);
            async move {
                pacer.wait().await;
                get_json(request).await
            }
        })
        .await?;

        let candidate = response
            .message
            .items
            .into_iter()
            .next()
            .filter(|item| !item.doi.trim().is_empty())
            .map(|item| Candidate {
                doi: item.doi.trim().to_lowercase(),
                title: item.title.into_iter().next().unwrap_or_default(),
                score: item.score.unwrap_or_default(),
            });

        debug!(
            title = %title.chars().take(40).collect::<String>(),
            found = candidate.is_some(),
            "Crossref search"
        );
        Ok(candidate)
    }

    /// Author/affiliation pairs Crossref holds for a DOI, in author-list order.
    pub async fn work_authors(&self, doi: &str) -> Result<Vec<AuthorAffiliation>> {
        let url = format!("{}/works/{}", self.base_url, encode_doi_path(doi));
        let query = [("mailto", self.mailto.as_str())];

        let pacer = &self.pacer;
        let response: WorkResponse = with_backoff(&self.retry, "crossref work", || {
            let request = self.client.get(&url).query(&query);
            async move {
                pacer.wait().await;
                get_json(request).await
            }
        })
        .await?;

        let authors = parse_work_authors(response.message.author);
        info!(doi, rows = authors.len(), "Crossref authors fetched");
        Ok(authors)
    }
}

/// Percent-encode each DOI path segment, keeping the `/` separators.
pub(crate) fn encode_doi_path(doi: &str) -> String {
    doi.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

// === Crossref API Response Types ===

#[derive(Debug, Deserialize)]
struct SearchResponse {
    message: SearchMessage,
}

#[derive(Debug, Deserialize)]
struct SearchMessage {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(rename = "DOI", default)]
    doi: String,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WorkResponse {
    message: WorkMessage,
}

#[derive(Debug, Deserialize)]
struct WorkMessage {
    #[serde(default)]
    author: Vec<CrossrefAuthor>,
}

#[derive(Debug, Deserialize)]
struct CrossrefAuthor {
    #[serde(default)]
    given: String,
    #[serde(default)]
    family: String,
    /// Set instead of given/family for organisational authors
    #[serde(default)]
    name: String,
    #[serde(default)]
    affiliation: Vec<CrossrefAffiliation>,
}

#[derive(Debug, Deserialize)]
struct CrossrefAffiliation {
    #[serde(default)]
    name: String,
}

/// One entry per (author, affiliation); authors without any get an empty one.
fn parse_work_authors(authors: Vec<CrossrefAuthor>) -> Vec<AuthorAffiliation> {
    let mut rows = Vec::new();

    for author in authors {
        let full = format!("{} {}", author.given.trim(), author.family.trim());
        let name = match full.trim() {
            "" => author.name.trim().to_string(),
            full => full.to_string(),
        };
        if name.is_empty() {
            continue;
        }

        let affiliations: Vec<String> = author
            .affiliation
            .into_iter()
            .map(|a| a.name.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();

        if affiliations.is_empty() {
            rows.push(AuthorAffiliation::new(&name, ""));
        } else {
            rows.extend(
                affiliations
                    .iter()
                    .map(|affiliation| AuthorAffiliation::new(&name, affiliation)),
            );
        }
    }

    rows
}
