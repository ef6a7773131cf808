//! Dossier: the final synthesized report of a research run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One ordered section of a dossier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DossierSection {
    /// Section title.
    pub title: String,
    /// Section body (markdown).
    pub content: String,
    /// Position within the dossier (0-based).
    pub order: usize,
    /// Extensible metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// The synthesized report of a research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dossier {
    /// Dossier identifier.
    pub id: Uuid,
    /// Producing research run.
    pub research_run_id: Uuid,
    /// Executive summary.
    pub executive_summary: String,
    /// Ordered sections.
    pub sections: Vec<DossierSection>,
    /// Citations appendix (rendered).
    pub citations_appendix: String,
    /// Rendered artifact paths.
    #[serde(default)]
    pub file_paths: Vec<String>,
    /// Generation timestamp.
    pub generated_at: DateTime<Utc>,
    /// Word count across summary and sections.
    pub word_count: usize,
}

impl Dossier {
    /// Assembles a dossier, sorting sections by `order` and computing
    /// the word count.
    #[must_use]
    pub fn assemble(
        research_run_id: Uuid,
        executive_summary: String,
        mut sections: Vec<DossierSection>,
        citations_appendix: String,
    ) -> Self {
        sections.sort_by_key(|s| s.order);
        let word_count = executive_summary.split_whitespace().count()
            + sections
                .iter()
                .map(|s| s.content.split_whitespace().count())
                .sum::<usize>();
        Self {
            id: Uuid::new_v4(),
            research_run_id,
            executive_summary,
            sections,
            citations_appendix,
            file_paths: Vec::new(),
            generated_at: Utc::now(),
            word_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_sorts_and_counts() {
        let sections = vec![
            DossierSection {
                title: "Timeline".to_string(),
                content: "three words here".to_string(),
                order: 1,
                metadata: BTreeMap::new(),
            },
            DossierSection {
                title: "Key Findings".to_string(),
                content: "two words".to_string(),
                order: 0,
                metadata: BTreeMap::new(),
            },
        ];
        let d = Dossier::assemble(
            Uuid::new_v4(),
            "summary of one sentence".to_string(),
            sections,
            String::new(),
        );
        assert_eq!(d.sections[0].title, "Key Findings");
        assert_eq!(d.sections[1].title, "Timeline");
        // 4 (summary) + 3 + 2
        assert_eq!(d.word_count, 9);
    }
}
