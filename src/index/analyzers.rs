//! Legal-domain text analyzers.
//!
//! Three analysis chains mirror what the lexical backend is provisioned
//! with, so the reference store can apply them symmetrically at index
//! and query time:
//!
//! - `legal`: standard tokenize → lowercase → legal stopwords →
//!   snowball-style stemming → legal synonym expansion
//! - `shingle`: standard tokenize → lowercase → shingles of size 2-3,
//!   unigrams preserved
//! - `citation`: split on `[\s,;]+` only, case preserved, protecting
//!   forms like `18 U.S.C. § 1001` and `123 F.3d 456`

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Legal boilerplate filtered in addition to English stopwords.
pub const LEGAL_STOPWORDS: [&str; 22] = [
    "plaintiff",
    "defendant",
    "court",
    "case",
    "appeal",
    "petition",
    "motion",
    "order",
    "judgment",
    "decree",
    "complaint",
    "answer",
    "whereas",
    "hereby",
    "thereof",
    "therein",
    "thereto",
    "aforesaid",
    "hereafter",
    "hereinafter",
    "pursuant",
    "notwithstanding",
];

/// A conservative English stopword list (the lexical backend's
/// `_english_` set).
const ENGLISH_STOPWORDS: [&str; 33] = [
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

/// Synonym groups expanded at analysis time. Each group expands every
/// member to the whole group.
pub const LEGAL_SYNONYM_GROUPS: [&[&str]; 15] = [
    &["contract", "agreement", "covenant"],
    &["terminate", "cancel", "rescind"],
    &["plaintiff", "claimant", "petitioner"],
    &["defendant", "respondent"],
    &["attorney", "lawyer", "counsel", "advocate"],
    &["damages", "compensation", "restitution"],
    &["guilty", "liable", "culpable"],
    &["evidence", "proof", "testimony"],
    &["witness", "testify", "depose"],
    &["fraud", "misrepresentation", "deceit"],
    &["negligence", "malpractice"],
    &["injunction", "restraining"],
    &["verdict", "judgment", "ruling", "decision"],
    &["statute", "law", "regulation", "code"],
    &["precedent", "jurisprudence"],
];

static SYNONYM_MAP: LazyLock<HashMap<&'static str, &'static [&'static str]>> =
    LazyLock::new(|| {
        let mut map = HashMap::new();
        for group in LEGAL_SYNONYM_GROUPS {
            for term in group {
                map.insert(*term, group);
            }
        }
        map
    });

static CITATION_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s,;]+").unwrap_or_else(|_| unreachable!()));

/// Citation forms that query preprocessing must keep intact.
pub static CITATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // Statute sections, U.S.C. references, and reporter citations.
    Regex::new(
        r"(?x)
        (?:Section\s+\d+[A-Za-z0-9.\-]*)
        | (?:\d+\s+U\.S\.C\.\s+§+\s*\d+[A-Za-z0-9.\-]*)
        | (?:\d+\s+[A-Z][A-Za-z.]*\s*\d*[a-z]*\s+\d+)
        | (?:§+\s*\d+[A-Za-z0-9.\-]*)
    ",
    )
    .unwrap_or_else(|_| unreachable!())
});

fn is_stopword(token: &str) -> bool {
    ENGLISH_STOPWORDS.contains(&token) || LEGAL_STOPWORDS.contains(&token)
}

/// Lightweight snowball-style stemmer.
///
/// Strips the inflectional suffixes that matter for legal prose. A full
/// snowball implementation is deliberately out of scope; the analyzer
/// only has to be identical on both the index and query sides.
#[must_use]
pub fn stem(token: &str) -> String {
    let t = token;
    for (suffix, min_stem) in [
        ("ations", 4),
        ("ation", 4),
        ("ments", 4),
        ("ment", 4),
        ("ings", 3),
        ("ing", 3),
        ("edly", 3),
        ("ies", 3),
        ("ied", 3),
        ("ed", 3),
        ("es", 3),
        ("s", 3),
    ] {
        if let Some(stemmed) = t.strip_suffix(suffix) {
            if stemmed.len() >= min_stem {
                return stemmed.to_string();
            }
        }
    }
    t.to_string()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_matches('\'').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Applies the `legal` analysis chain.
///
/// Synonym expansion happens before stemming so each group member stems
/// independently; duplicates are kept, matching how the backend's
/// synonym filter emits tokens at the same position.
#[must_use]
pub fn analyze_legal(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for token in tokenize(text) {
        if is_stopword(&token) {
            continue;
        }
        match SYNONYM_MAP.get(token.as_str()) {
            Some(group) => {
                for member in *group {
                    out.push(stem(member));
                }
            }
            None => out.push(stem(&token)),
        }
    }
    out
}

/// Applies the `shingle` analysis chain: unigrams plus 2- and 3-gram
/// shingles joined with `_`.
#[must_use]
pub fn analyze_shingles(text: &str) -> Vec<String> {
    let tokens = tokenize(text);
    let mut out = tokens.clone();
    for size in [2usize, 3] {
        if tokens.len() >= size {
            for window in tokens.windows(size) {
                out.push(window.join("_"));
            }
        }
    }
    out
}

/// Applies the `citation` analysis chain: split on `[\s,;]+`, case and
/// punctuation preserved.
#[must_use]
pub fn analyze_citation(text: &str) -> Vec<String> {
    CITATION_SPLIT
        .split(text)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Extracts the citation spans found in a text.
#[must_use]
pub fn extract_citations(text: &str) -> Vec<String> {
    CITATION_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}
