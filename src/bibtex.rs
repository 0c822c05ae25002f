//! Citation loader.
//!
//! Reads a BibTeX file into [`Publication`] records: cleaned title, optional DOI
//! and the ordered raw author list. Entries without an author field are skipped.

use crate::error::{AffilError, Result};
use biblatex::{Bibliography, Chunk, Pair, RawBibliography, RawChunk, RawEntry, Spanned};
use deunicode::deunicode;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// DOI-shaped substring anywhere in a field value
static DOI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)10\.\d{4,9}/[^\s}),;]+").expect("valid DOI regex")
});

/// Separator between names in a BibTeX author field
static AND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+and\s+").expect("valid separator regex"));

/// LaTeX accent commands such as `\"u` or `\'{e}`; the letter is kept
static ACCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\\['"`^~=.]"#).expect("valid accent regex"));

/// Formatting commands such as `\emph` or `\textit`
static COMMAND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[A-Za-z]+\s*").expect("valid command regex"));

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

/// One author as written in the bibliography
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAuthor {
    /// Display label, `Last, First`
    pub label: String,
    pub last: String,
    pub first: String,
}

impl RawAuthor {
    /// Build from a single cleaned name in either `Last, First` or `First Last` form.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let (last, first) = match name.split_once(',') {
            Some((last, first)) => (last.trim().to_string(), first.trim().to_string()),
            None => {
                let mut parts: Vec<&str> = name.split_whitespace().collect();
                let last = parts.pop().unwrap_or_default().to_string();
                (last, parts.join(" "))
            }
        };

        if last.is_empty() {
            return None;
        }

        let label = if first.is_empty() {
            last.clone()
        } else {
            format!("{}, {}", last, first)
        };

        Some(Self {
            label: label.trim_end_matches('.').to_string(),
            last,
            first,
        })
    }

    /// ASCII-folded lowercase first initial, if a given name is known
    pub fn key_initial(&self) -> Option<char> {
        deunicode(&self.first)
            .chars()
            .find(|c| c.is_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
    }

    /// Loose match against a name reported by a metadata service: the remote name
    /// must contain the last name as whole words and some other word starting
    /// with the first initial.
    pub fn matches(&self, remote: &str) -> bool {
        let Some(given) = self.remote_given_words(remote) else {
            return false;
        };

        match self.key_initial() {
            None => true,
            Some(initial) => given.iter().any(|word| word.starts_with(initial)),
        }
    }

    /// Strict match: last name plus every word of the given name.
    pub fn matches_fully(&self, remote: &str) -> bool {
        let Some(given) = self.remote_given_words(remote) else {
            return false;
        };

        let first = name_words(&self.first);
        first.iter().all(|word| given.contains(word))
    }

    /// Remote name words outside the last name, or `None` if the last name is absent.
    fn remote_given_words(&self, remote: &str) -> Option<Vec<String>> {
        let last = name_words(&self.last);
        if last.is_empty() {
            return None;
        }

        let mut words = name_words(remote);
        let pos = words
            .windows(last.len())
            .position(|window| window == last.as_slice())?;
        words.drain(pos..pos + last.len());
        Some(words)
    }
}

/// ASCII-folded lowercase words of a name
fn name_words(name: &str) -> Vec<String> {
    deunicode(name)
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

/// A bibliography entry reduced to what the pipeline needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publication {
    /// Citation key
    pub key: String,
    pub title: String,
    /// Lowercased DOI; `None` until resolved
    pub doi: Option<String>,
    pub authors: Vec<RawAuthor>,
}

/// Load publications from a BibTeX file.
///
/// # Errors
///
/// [`AffilError::Parse`] if the file is missing, unreadable or not valid BibTeX.
pub fn load(path: &Path) -> Result<Vec<Publication>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AffilError::Parse(format!("cannot read {}: {}", path.display(), e)))?;

    let publications = parse_str(&content)?;
    info!(
        path = %path.display(),
        count = publications.len(),
        "Loaded bibliography"
    );
    Ok(publications)
}

/// Parse BibTeX text into publications, preserving file order.
///
/// Only text the BibTeX grammar cannot read is an error. Entries that use an
/// undefined `@string` abbreviation are kept, with the abbreviation name
/// standing in for its value.
pub fn parse_str(content: &str) -> Result<Vec<Publication>> {
    let raw = RawBibliography::parse(content)
        .map_err(|e| AffilError::Parse(format!("malformed bibliography: {}", e)))?;

    let mut publications = Vec::new();

    for entry in &raw.entries {
        let key = entry.v.key.v;
        let fields = entry_fields(entry, &raw.abbreviations);
        let field = |name: &str| {
            fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value.as_str())
        };

        let authors = parse_authors(field("author").unwrap_or_default());
        if authors.is_empty() {
            debug!(key, "Skipping entry without authors");
            continue;
        }

        let title = field("title").map(clean_latex).unwrap_or_default();
        let doi = extract_doi(
            fields
                .iter()
                .map(|(name, value)| (name.as_str(), value.clone())),
        );

        debug!(
            key,
            authors = authors.len(),
            doi = doi.as_deref().unwrap_or(""),
            "Parsed entry"
        );

        publications.push(Publication {
            key: key.to_string(),
            title,
            doi,
            authors,
        });
    }

    Ok(publications)
}

/// Field names (lowercased) and values of one entry, in source order.
///
/// Values go through biblatex's resolution (abbreviations, months, TeX
/// commands). If that rejects the entry, the raw values are used instead.
fn entry_fields(entry: &Spanned<RawEntry<'_>>, abbreviations: &[Pair<'_>]) -> Vec<(String, String)> {
    let key = entry.v.key.v;
    let single = RawBibliography {
        preamble: String::new(),
        entries: vec![entry.clone()],
        abbreviations: abbreviations.to_vec(),
    };

    match Bibliography::from_raw(single) {
        Ok(bibliography) => {
            if let Some(resolved) = bibliography.get(key) {
                return entry
                    .v
                    .fields
                    .iter()
                    .filter_map(|pair| {
                        let name = pair.key.v.to_ascii_lowercase();
                        let value = resolved.get(&name).map(chunks_to_string)?;
                        Some((name, value))
                    })
                    .collect();
            }
        }
        Err(e) => warn!(key, error = %e, "Keeping entry with unresolved values"),
    }

    entry
        .v
        .fields
        .iter()
        .map(|pair| {
            (
                pair.key.v.to_ascii_lowercase(),
                raw_field_to_string(&pair.value.v, abbreviations),
            )
        })
        .collect()
}

/// Concatenate raw chunks, expanding known abbreviations one level deep.
fn raw_field_to_string(field: &[Spanned<RawChunk<'_>>], abbreviations: &[Pair<'_>]) -> String {
    field
        .iter()
        .map(|chunk| match chunk.v {
            RawChunk::Normal(text) => text.to_string(),
            RawChunk::Abbreviation(name) => abbreviations
                .iter()
                .find(|abbr| abbr.key.v.eq_ignore_ascii_case(name))
                .map(|abbr| raw_field_to_string(&abbr.value.v, &[]))
                .unwrap_or_else(|| name.to_string()),
        })
        .collect()
}

/// Flatten biblatex chunks to plain text.
fn chunks_to_string(val: &[Spanned<Chunk>]) -> String {
    val.iter()
        .map(|c| match &c.v {
            Chunk::Normal(s) => s.as_str(),
            Chunk::Verbatim(s) => s.as_str(),
            Chunk::Math(s) => s.as_str(),
        })
        .collect()
}

/// Find the DOI of an entry: the `doi` field wins, otherwise the first DOI-shaped
/// substring of any other field.
pub fn extract_doi<'a, I>(fields: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    let mut found = None;

    for (name, value) in fields {
        if name.eq_ignore_ascii_case("doi") {
            if let Some(doi) = normalize_doi(&value) {
                return Some(doi);
            }
        } else if found.is_none() {
            found = DOI_RE.find(&value).map(|m| {
                m.as_str()
                    .trim_end_matches(|c| matches!(c, ')' | '.' | ',' | ';'))
                    .to_lowercase()
            });
        }
    }

    found
}

/// Trim, strip resolver prefixes and lowercase an explicit DOI value.
pub fn normalize_doi(value: &str) -> Option<String> {
    let mut doi = value.trim();
    for prefix in DOI_PREFIXES {
        if let Some(head) = doi.get(..prefix.len()) {
            if head.eq_ignore_ascii_case(prefix) {
                doi = doi[prefix.len()..].trim();
                break;
            }
        }
    }

    if doi.is_empty() {
        None
    } else {
        Some(doi.to_lowercase())
    }
}

/// Split a BibTeX author field into cleaned names. `and others` is dropped.
pub fn parse_authors(raw: &str) -> Vec<RawAuthor> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    AND_RE
        .split(raw.trim())
        .map(clean_latex)
        .filter(|name| !name.eq_ignore_ascii_case("others"))
        .filter_map(|name| RawAuthor::from_name(&name))
        .collect()
}

/// Strip LaTeX markup and HTML entities, collapse whitespace.
pub fn clean_latex(text: &str) -> String {
    let text = ACCENT_RE.replace_all(text, "");
    let text = COMMAND_RE.replace_all(&text, "");
    let text: String = text
        .chars()
        .filter(|c| !matches!(c, '{' | '}' | '\\'))
        .collect();

    let decoded = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");

    decoded.split_whitespace().collect::<Vec<&str>>().join(" ")
}
