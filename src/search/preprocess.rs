//! Legal-aware query preprocessing.
//!
//! Normalizes the query for the rankers while protecting citation
//! forms: abbreviations expand to their canonical terms, whitespace
//! collapses, and citation spans (`Section 365`, `18 U.S.C. § 1001`,
//! `123 F.3d 456`) are carried through verbatim so downstream matching
//! can treat them as units.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::index::analyzers::extract_citations;

/// Abbreviation expansions applied outside citation spans.
static ABBREVIATIONS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("sec.", "section"),
        ("corp.", "corporation"),
        ("co.", "company"),
        ("inc.", "incorporated"),
        ("dept.", "department"),
        ("atty.", "attorney"),
        ("agmt.", "agreement"),
        ("k.", "contract"),
        ("def.", "defendant"),
        ("pl.", "plaintiff"),
    ])
});

/// A query after legal-aware normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessedQuery {
    /// Canonical query string fed to both rankers.
    pub canonical: String,
    /// Citation spans found in the original query, verbatim.
    pub citations: Vec<String>,
}

/// Preprocesses a raw query.
#[must_use]
pub fn preprocess_query(raw: &str) -> PreprocessedQuery {
    let citations = extract_citations(raw);

    // Mask citation spans so abbreviation expansion cannot touch them.
    let mut masked = raw.to_string();
    for (i, citation) in citations.iter().enumerate() {
        masked = masked.replace(citation, &placeholder(i));
    }

    let expanded: String = masked
        .split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            ABBREVIATIONS
                .get(lower.as_str())
                .map_or_else(|| word.to_string(), |exp| (*exp).to_string())
        })
        .collect::<Vec<_>>()
        .join(" ");

    // Restore citation spans verbatim.
    let mut canonical = expanded;
    for (i, citation) in citations.iter().enumerate() {
        canonical = canonical.replace(&placeholder(i), citation);
    }

    PreprocessedQuery {
        canonical,
        citations,
    }
}

fn placeholder(i: usize) -> String {
    format!("\u{1}CIT{i}\u{1}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviation_expansion() {
        let q = preprocess_query("the agmt. with Acme Corp.");
        assert_eq!(q.canonical, "the agreement with Acme corporation");
        assert!(q.citations.is_empty());
    }

    #[test]
    fn test_citation_preserved_verbatim() {
        let q = preprocess_query("liability under 18 U.S.C. § 1001 for fraud");
        assert_eq!(q.citations, vec!["18 U.S.C. § 1001".to_string()]);
        assert!(q.canonical.contains("18 U.S.C. § 1001"));
    }

    #[test]
    fn test_section_citation_not_expanded() {
        // "Section 365" is a citation span; the "sec." expansion must
        // not rewrite any part of it.
        let q = preprocess_query("assumption under Section 365");
        assert_eq!(q.citations, vec!["Section 365".to_string()]);
        assert!(q.canonical.contains("Section 365"));
    }

    #[test]
    fn test_whitespace_collapsed() {
        let q = preprocess_query("  contract   damages  ");
        assert_eq!(q.canonical, "contract damages");
    }

    #[test]
    fn test_reporter_citation_detected() {
        let q = preprocess_query("compare 123 F.3d 456 on damages");
        assert_eq!(q.citations.len(), 1);
        assert!(q.citations[0].contains("F.3d"));
    }

    #[test]
    fn test_plain_query_untouched() {
        let q = preprocess_query("employment discrimination age");
        assert_eq!(q.canonical, "employment discrimination age");
    }
}
