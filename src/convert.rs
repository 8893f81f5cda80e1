//! Pure mapping from raw backend records to result entities.
//!
//! The backend serializes loosely-typed records; author, journal, and year
//! are not first-class fields and have to be coerced out of keywords, the
//! source string, and the title. Everything here is synchronous and free of
//! I/O so the rules stay independently testable.

use crate::backend::RawRecord;
use crate::model::ResultEntry;
use regex::Regex;
use std::sync::LazyLock;

/// Publication names matched case-insensitively against the record source.
const KNOWN_JOURNALS: &[&str] = &[
    "Nature",
    "Science",
    "Cell",
    "The Lancet",
    "New England Journal of Medicine",
    "JAMA",
    "BMJ",
    "PLOS ONE",
    "IEEE",
    "ACM",
    "arXiv",
    "Springer",
    "Elsevier",
];

const UNKNOWN_AUTHOR: &str = "Unknown";
const UNKNOWN_JOURNAL: &str = "Unknown journal";
const FALLBACK_YEAR: u16 = 2023;

/// Two or more capitalized words, allowing initials ("Maria J. Silva").
static AUTHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z][A-Za-z'-]+(?: (?:[A-Z]\.|[A-Z][A-Za-z'-]+))+$").expect("author pattern")
});

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:19|20)\d{2}\b").expect("year pattern"));

/// Convert one raw record into a result entity. `position` is 1-based.
pub fn record_to_entry(position: usize, record: &RawRecord) -> ResultEntry {
    ResultEntry {
        id: position,
        title: record.title.clone(),
        authors: derive_authors(&record.keywords),
        journal: derive_journal(record.source.as_deref()),
        year: derive_year(&record.title),
        relevance_score: record.score,
        abstract_text: record.abstract_text.clone(),
        ai_reasoning: derive_reasoning(record.score, record.relevance_reason.as_deref()),
    }
}

/// Keywords that look like person names become the author list.
fn derive_authors(keywords: &[String]) -> Vec<String> {
    let authors: Vec<String> = keywords
        .iter()
        .filter(|k| AUTHOR_RE.is_match(k.trim()))
        .map(|k| k.trim().to_string())
        .collect();
    if authors.is_empty() {
        vec![UNKNOWN_AUTHOR.to_string()]
    } else {
        authors
    }
}

fn derive_journal(source: Option<&str>) -> String {
    let Some(source) = source.map(str::trim).filter(|s| !s.is_empty()) else {
        return UNKNOWN_JOURNAL.to_string();
    };
    let lowered = source.to_lowercase();
    for journal in KNOWN_JOURNALS {
        if lowered.contains(&journal.to_lowercase()) {
            return (*journal).to_string();
        }
    }
    source.to_string()
}

/// First 19xx/20xx group in the title, else the fallback year.
fn derive_year(title: &str) -> u16 {
    YEAR_RE
        .find(title)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(FALLBACK_YEAR)
}

fn derive_reasoning(score: f64, backend_reason: Option<&str>) -> String {
    if let Some(reason) = backend_reason.map(str::trim).filter(|r| !r.is_empty()) {
        return reason.to_string();
    }
    if score >= 0.8 {
        format!("Highly relevant to the query (score {score:.2})")
    } else if score >= 0.6 {
        format!("Moderately relevant to the query (score {score:.2})")
    } else {
        format!("Low relevance to the query (score {score:.2})")
    }
}
