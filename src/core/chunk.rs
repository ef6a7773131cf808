//! Chunk representation for indexed evidence.
//!
//! Chunks are the indexed subunits of evidence (sections, paragraphs,
//! microblocks, plus one synthesized summary per evidence). Each chunk is
//! immutable once written and carries its position within the parent
//! evidence. A chunk lives in *both* the vector store and the lexical
//! store, or in neither; partial indexing is a consistency bug repaired
//! by the orphan reaper.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Granularity of an indexed chunk.
///
/// Each granularity maps to a named vector space in the dense store, so
/// a `chunk_types` search filter also selects the embedding space to
/// query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    /// One synthesized summary per evidence.
    Summary,
    /// Section-level split (headings, logical divisions).
    Section,
    /// Small fixed-size block for precise citation.
    Microblock,
    /// Natural paragraph.
    Paragraph,
}

impl ChunkType {
    /// Stable string form used in store fields and filters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Section => "section",
            Self::Microblock => "microblock",
            Self::Paragraph => "paragraph",
        }
    }

    /// The dense vector space queried for this chunk granularity.
    ///
    /// Paragraphs have no dedicated space and share the section space.
    #[must_use]
    pub const fn vector_space(self) -> VectorSpace {
        match self {
            Self::Summary => VectorSpace::Summary,
            Self::Section | Self::Paragraph => VectorSpace::Section,
            Self::Microblock => VectorSpace::Microblock,
        }
    }
}

impl std::str::FromStr for ChunkType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(Self::Summary),
            "section" => Ok(Self::Section),
            "microblock" => Ok(Self::Microblock),
            "paragraph" => Ok(Self::Paragraph),
            other => Err(crate::Error::validation(format!(
                "unknown chunk type: {other}"
            ))),
        }
    }
}

/// Named dense vector spaces kept per collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorSpace {
    /// Evidence-level summary vectors.
    Summary,
    /// Section-level vectors (default search space).
    Section,
    /// Microblock vectors for precise matching.
    Microblock,
}

impl VectorSpace {
    /// Stable string form used as the named-vector key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Summary => "summary",
            Self::Section => "section",
            Self::Microblock => "microblock",
        }
    }

    /// All spaces, in definition order.
    pub const ALL: [Self; 3] = [Self::Summary, Self::Section, Self::Microblock];
}

/// Builds the deterministic chunk identifier.
///
/// Chunk IDs are `"{evidence_id}/{position:05}"` so re-indexing the same
/// evidence overwrites existing entries instead of accumulating, and a
/// compensating delete can match on the evidence prefix.
#[must_use]
pub fn chunk_id(evidence_id: Uuid, position: usize) -> String {
    format!("{evidence_id}/{position:05}")
}

/// An indexed subunit of evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic identifier, see [`chunk_id`].
    pub id: String,
    /// Parent evidence.
    pub evidence_id: Uuid,
    /// Case the parent evidence belongs to.
    pub case_id: Uuid,
    /// Chunk text.
    pub text: String,
    /// Granularity of this chunk.
    pub chunk_type: ChunkType,
    /// Sequential position within the evidence (0-based).
    pub position: usize,
    /// Page number in the source document, when known.
    pub page: Option<u32>,
    /// Extensible metadata (speaker, timestamps, headings).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    /// Creates a new chunk with its deterministic identifier.
    #[must_use]
    pub fn new(
        evidence_id: Uuid,
        case_id: Uuid,
        text: String,
        chunk_type: ChunkType,
        position: usize,
    ) -> Self {
        Self {
            id: chunk_id(evidence_id, position),
            evidence_id,
            case_id,
            text,
            chunk_type,
            position,
            page: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the source page.
    #[must_use]
    pub const fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Returns the chunk size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.text.len()
    }

    /// Checks if the chunk carries no text.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Per-evidence embedding batch: one vector per chunk in each space.
///
/// The dual-store writer rejects batches where any space's length
/// differs from the chunk count.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingBatch {
    /// Summary-space vectors, one per chunk.
    pub summary: Vec<Vec<f32>>,
    /// Section-space vectors, one per chunk.
    pub section: Vec<Vec<f32>>,
    /// Microblock-space vectors, one per chunk.
    pub microblock: Vec<Vec<f32>>,
}

impl EmbeddingBatch {
    /// Returns the vectors for the given space.
    #[must_use]
    pub fn space(&self, space: VectorSpace) -> &[Vec<f32>] {
        match space {
            VectorSpace::Summary => &self.summary,
            VectorSpace::Section => &self.section,
            VectorSpace::Microblock => &self.microblock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evid() -> Uuid {
        Uuid::from_u128(0x1234)
    }

    #[test]
    fn test_chunk_id_deterministic() {
        let a = chunk_id(evid(), 3);
        let b = chunk_id(evid(), 3);
        assert_eq!(a, b);
        assert!(a.ends_with("/00003"));
    }

    #[test]
    fn test_chunk_id_orders_lexically() {
        // Zero-padding keeps lexical order aligned with positional order.
        let ids: Vec<String> = (0..12).map(|p| chunk_id(evid(), p)).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_chunk_new() {
        let chunk = Chunk::new(
            evid(),
            Uuid::from_u128(1),
            "A contract dated Jan 15".to_string(),
            ChunkType::Paragraph,
            0,
        );
        assert_eq!(chunk.id, chunk_id(evid(), 0));
        assert_eq!(chunk.position, 0);
        assert!(chunk.page.is_none());
        assert_eq!(chunk.size(), 23);
    }

    #[test]
    fn test_chunk_builder_helpers() {
        let chunk = Chunk::new(
            evid(),
            Uuid::from_u128(1),
            "text".to_string(),
            ChunkType::Section,
            1,
        )
        .with_page(4)
        .with_metadata("heading", "Article IV");

        assert_eq!(chunk.page, Some(4));
        assert_eq!(chunk.metadata.get("heading").map(String::as_str), Some("Article IV"));
    }

    #[test]
    fn test_chunk_type_roundtrip() {
        for ct in [
            ChunkType::Summary,
            ChunkType::Section,
            ChunkType::Microblock,
            ChunkType::Paragraph,
        ] {
            let parsed: ChunkType = ct.as_str().parse().unwrap();
            assert_eq!(parsed, ct);
        }
        assert!("clause".parse::<ChunkType>().is_err());
    }

    #[test]
    fn test_paragraph_shares_section_space() {
        assert_eq!(ChunkType::Paragraph.vector_space(), VectorSpace::Section);
        assert_eq!(ChunkType::Microblock.vector_space(), VectorSpace::Microblock);
    }

    #[test]
    fn test_embedding_batch_space_lookup() {
        let batch = EmbeddingBatch {
            summary: vec![vec![0.1]],
            section: vec![vec![0.2]],
            microblock: vec![vec![0.3]],
        };
        assert!((batch.space(VectorSpace::Section)[0][0] - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_chunk_serialization() {
        let chunk = Chunk::new(
            evid(),
            Uuid::from_u128(1),
            "text".to_string(),
            ChunkType::Microblock,
            7,
        );
        let json = serde_json::to_string(&chunk).unwrap();
        let back: Chunk = serde_json::from_str(&json).unwrap();
        assert_eq!(back, chunk);
    }
}
