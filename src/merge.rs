//! Affiliation merging.
//!
//! Combines the Crossref and OpenAlex author lists of one publication into
//! report rows. Authors from the two services are matched by normalised name
//! (case and whitespace insensitive). Empty affiliations lose to non-empty ones,
//! and differing non-empty affiliations are all kept. The result is then lined up
//! with the bibliography's own author list so that every raw author appears.

use crate::bibtex::{Publication, RawAuthor};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// One (author, affiliation) pair as reported by a metadata service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorAffiliation {
    pub author: String,
    /// Empty when the service knows the author but not the affiliation
    pub affiliation: String,
}

impl AuthorAffiliation {
    /// Pair an author name with an affiliation (empty if unknown)
    pub fn new(author: &str, affiliation: &str) -> Self {
        Self {
            author: author.to_string(),
            affiliation: affiliation.to_string(),
        }
    }
}

/// An author with every distinct affiliation reported by either service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedAuthor {
    /// Name as first reported (Crossref spelling wins over OpenAlex)
    pub name: String,
    pub affiliations: Vec<String>,
}

/// Final report row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedRow {
    pub author: String,
    pub affiliation: String,
    pub doi: String,
    pub title: String,
}

/// Lowercase and collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Group both services' entries per author, in first-appearance order.
pub fn merge_services(
    primary: &[AuthorAffiliation],
    secondary: &[AuthorAffiliation],
) -> Vec<MergedAuthor> {
    let mut merged: Vec<MergedAuthor> = Vec::new();
    let mut by_name: HashMap<String, usize> = HashMap::new();

    for entry in primary.iter().chain(secondary) {
        let key = normalize_name(&entry.author);
        if key.is_empty() {
            continue;
        }

        let idx = *by_name.entry(key).or_insert_with(|| {
            merged.push(MergedAuthor {
                name: entry.author.trim().to_string(),
                affiliations: Vec::new(),
            });
            merged.len() - 1
        });

        let affiliation = entry.affiliation.trim();
        if affiliation.is_empty() {
            continue;
        }

        let author = &mut merged[idx];
        let seen = author
            .affiliations
            .iter()
            .any(|a| normalize_name(a) == normalize_name(affiliation));
        if !seen {
            author.affiliations.push(affiliation.to_string());
        }
    }

    merged
}

/// Order merged authors by the bibliography's author list.
///
/// Service authors are claimed in two passes: first by raw authors whose full
/// given name matches, then by raw authors still without a claim using the
/// loose last-name-plus-initial match. A raw author that claims nothing is
/// added under its bibliography label with no affiliation. Service authors
/// nobody claimed follow at the end.
pub fn assign_to_raw_authors(raw: &[RawAuthor], merged: Vec<MergedAuthor>) -> Vec<MergedAuthor> {
    let mut owner: Vec<Option<usize>> = vec![None; merged.len()];

    for (idx, author) in raw.iter().enumerate() {
        claim(&merged, &mut owner, idx, |name| author.matches_fully(name));
    }
    for (idx, author) in raw.iter().enumerate() {
        if !owner.contains(&Some(idx)) {
            claim(&merged, &mut owner, idx, |name| author.matches(name));
        }
    }

    let mut slots: Vec<Option<MergedAuthor>> = merged.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(slots.len().max(raw.len()));

    for (idx, author) in raw.iter().enumerate() {
        let before = ordered.len();
        for (slot, claimed_by) in slots.iter_mut().zip(&owner) {
            if *claimed_by == Some(idx) {
                ordered.extend(slot.take());
            }
        }

        if ordered.len() == before {
            ordered.push(MergedAuthor {
                name: author.label.clone(),
                affiliations: Vec::new(),
            });
        }
    }

    ordered.extend(slots.into_iter().flatten());
    ordered
}

/// Give every unclaimed service author accepted by `matches` to raw author `idx`.
fn claim(
    merged: &[MergedAuthor],
    owner: &mut [Option<usize>],
    idx: usize,
    matches: impl Fn(&str) -> bool,
) {
    for (candidate, claimed_by) in merged.iter().zip(owner.iter_mut()) {
        if claimed_by.is_none() && matches(&candidate.name) {
            *claimed_by = Some(idx);
        }
    }
}

/// Flatten authors into rows, one per affiliation (or one empty row), without
/// repeating an (author, affiliation, doi) triple.
pub fn to_rows(authors: &[MergedAuthor], doi: &str, title: &str) -> Vec<MergedRow> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut rows = Vec::new();

    for author in authors {
        let affiliations: Vec<&str> = if author.affiliations.is_empty() {
            vec![""]
        } else {
            author.affiliations.iter().map(String::as_str).collect()
        };

        for affiliation in affiliations {
            if seen.insert((author.name.clone(), affiliation.to_string())) {
                rows.push(MergedRow {
                    author: author.name.clone(),
                    affiliation: affiliation.to_string(),
                    doi: doi.to_string(),
                    title: title.to_string(),
                });
            }
        }
    }

    rows
}

/// Merge both services' results for one publication into ordered rows.
pub fn merge_publication(
    publication: &Publication,
    crossref: &[AuthorAffiliation],
    openalex: &[AuthorAffiliation],
) -> Vec<MergedRow> {
    let merged = merge_services(crossref, openalex);
    let ordered = assign_to_raw_authors(&publication.authors, merged);
    to_rows(
        &ordered,
        publication.doi.as_deref().unwrap_or_default(),
        &publication.title,
    )
}
