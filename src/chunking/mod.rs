//! Evidence chunking.
//!
//! Splits evidence text into the granularities the indexes expect: one
//! synthesized summary chunk, section chunks on paragraph-group
//! boundaries, and fixed-size microblocks for precise citation.
//! Transcript segments and communication lines map to paragraph chunks
//! one-to-one. All splitting is grapheme-safe; positions are assigned
//! sequentially so chunk ids stay deterministic.

use rayon::prelude::*;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::Result;
use crate::core::{Chunk, ChunkType, EmbeddingBatch, TranscriptSegment};
use crate::embedding::Embedder;

/// Default maximum bytes per section chunk.
pub const DEFAULT_SECTION_SIZE: usize = 2000;

/// Default maximum bytes per microblock chunk.
pub const DEFAULT_MICROBLOCK_SIZE: usize = 300;

/// Maximum bytes taken for the synthesized summary chunk.
const SUMMARY_SIZE: usize = 1200;

/// Evidence chunker with configurable granularity sizes.
#[derive(Debug, Clone)]
pub struct EvidenceChunker {
    section_size: usize,
    microblock_size: usize,
}

impl Default for EvidenceChunker {
    fn default() -> Self {
        Self {
            section_size: DEFAULT_SECTION_SIZE,
            microblock_size: DEFAULT_MICROBLOCK_SIZE,
        }
    }
}

impl EvidenceChunker {
    /// Creates a chunker with explicit sizes.
    ///
    /// # Errors
    ///
    /// Returns a validation error when either size is zero.
    pub fn new(section_size: usize, microblock_size: usize) -> Result<Self> {
        if section_size == 0 || microblock_size == 0 {
            return Err(crate::Error::validation("chunk sizes must be non-zero"));
        }
        Ok(Self {
            section_size,
            microblock_size,
        })
    }

    /// Chunks document-style evidence into summary + sections +
    /// microblocks.
    #[must_use]
    pub fn chunk_document(&self, evidence_id: Uuid, case_id: Uuid, text: &str) -> Vec<Chunk> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut position = 0usize;

        // Summary chunk: the document lead, cut at a grapheme boundary.
        chunks.push(Chunk::new(
            evidence_id,
            case_id,
            truncate_graphemes(text, SUMMARY_SIZE),
            ChunkType::Summary,
            position,
        ));
        position += 1;

        // Section chunks: greedy paragraph grouping up to section_size.
        let sections = group_paragraphs(text, self.section_size);
        for section in &sections {
            chunks.push(Chunk::new(
                evidence_id,
                case_id,
                section.clone(),
                ChunkType::Section,
                position,
            ));
            position += 1;
        }

        // Microblocks: fixed-size splits of each section, computed in
        // parallel for large documents.
        let micro_texts: Vec<Vec<String>> = sections
            .par_iter()
            .map(|section| split_fixed(section, self.microblock_size))
            .collect();
        for texts in micro_texts {
            for text in texts {
                chunks.push(Chunk::new(
                    evidence_id,
                    case_id,
                    text,
                    ChunkType::Microblock,
                    position,
                ));
                position += 1;
            }
        }

        chunks
    }

    /// Chunks transcript segments: one paragraph chunk per segment,
    /// stamped with speaker and timing metadata.
    #[must_use]
    pub fn chunk_transcript(
        &self,
        evidence_id: Uuid,
        case_id: Uuid,
        segments: &[TranscriptSegment],
    ) -> Vec<Chunk> {
        segments
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.text.trim().is_empty())
            .map(|(position, segment)| {
                let mut chunk = Chunk::new(
                    evidence_id,
                    case_id,
                    segment.text.clone(),
                    ChunkType::Paragraph,
                    position,
                )
                .with_metadata("start_s", format!("{:.3}", segment.start_s))
                .with_metadata("end_s", format!("{:.3}", segment.end_s))
                .with_metadata("segment_id", segment.id.to_string());
                if let Some(speaker) = &segment.speaker_id {
                    chunk = chunk.with_metadata("speaker", speaker.clone());
                }
                chunk
            })
            .collect()
    }

    /// Chunks communication extracts: one paragraph chunk per line.
    #[must_use]
    pub fn chunk_communication(&self, evidence_id: Uuid, case_id: Uuid, text: &str) -> Vec<Chunk> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(position, line)| {
                Chunk::new(
                    evidence_id,
                    case_id,
                    line.to_string(),
                    ChunkType::Paragraph,
                    position,
                )
            })
            .collect()
    }
}

/// Embeds chunks into the three vector spaces.
///
/// The summary space carries the evidence-level summary embedding
/// (shared by every chunk of the evidence); section and microblock
/// spaces embed the chunk text itself.
///
/// # Errors
///
/// Returns an error if embedding generation fails.
pub fn embed_chunks(
    embedder: &dyn Embedder,
    evidence_summary: &str,
    chunks: &[Chunk],
) -> Result<EmbeddingBatch> {
    if chunks.is_empty() {
        return Ok(EmbeddingBatch::default());
    }

    let summary_source = if evidence_summary.trim().is_empty() {
        &chunks[0].text
    } else {
        evidence_summary
    };
    let summary_vec = embedder.embed(summary_source)?;

    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    let text_vecs = embedder.embed_batch(&texts)?;

    Ok(EmbeddingBatch {
        summary: vec![summary_vec; chunks.len()],
        section: text_vecs.clone(),
        microblock: text_vecs,
    })
}

/// Groups paragraphs greedily into sections of at most `max_size`
/// bytes; single oversized paragraphs are hard-split.
fn group_paragraphs(text: &str, max_size: usize) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if paragraph.len() > max_size {
            if !current.is_empty() {
                sections.push(std::mem::take(&mut current));
            }
            sections.extend(split_fixed(paragraph, max_size));
            continue;
        }
        if !current.is_empty() && current.len() + paragraph.len() + 2 > max_size {
            sections.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        sections.push(current);
    }
    sections
}

/// Splits text into pieces of at most `max_size` bytes on grapheme
/// boundaries.
fn split_fixed(text: &str, max_size: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for grapheme in text.graphemes(true) {
        if current.len() + grapheme.len() > max_size && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        current.push_str(grapheme);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Truncates text to at most `max_size` bytes on a grapheme boundary.
fn truncate_graphemes(text: &str, max_size: usize) -> String {
    if text.len() <= max_size {
        return text.to_string();
    }
    let mut out = String::new();
    for grapheme in text.graphemes(true) {
        if out.len() + grapheme.len() > max_size {
            break;
        }
        out.push_str(grapheme);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::FallbackEmbedder;

    fn ids() -> (Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn test_document_chunking_granularities() {
        let (ev, case) = ids();
        let text = "First paragraph about the contract.\n\nSecond paragraph about damages.\n\nThird paragraph about the timeline of events.";
        let chunker = EvidenceChunker::default();
        let chunks = chunker.chunk_document(ev, case, text);

        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Summary));
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Section));
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Microblock));

        // Positions are unique and sequential from zero.
        let mut positions: Vec<usize> = chunks.iter().map(|c| c.position).collect();
        positions.sort_unstable();
        assert_eq!(positions, (0..chunks.len()).collect::<Vec<_>>());
    }

    #[test]
    fn test_chunking_is_deterministic() {
        let (ev, case) = ids();
        let text = "Alpha.\n\nBeta.\n\nGamma.";
        let chunker = EvidenceChunker::default();
        let a = chunker.chunk_document(ev, case, text);
        let b = chunker.chunk_document(ev, case, text);
        let ids_a: Vec<&String> = a.iter().map(|c| &c.id).collect();
        let ids_b: Vec<&String> = b.iter().map(|c| &c.id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_empty_document() {
        let (ev, case) = ids();
        let chunker = EvidenceChunker::default();
        assert!(chunker.chunk_document(ev, case, "   ").is_empty());
    }

    #[test]
    fn test_oversized_paragraph_is_split() {
        let (ev, case) = ids();
        let chunker = EvidenceChunker::new(100, 40).unwrap();
        let text = "x".repeat(350);
        let chunks = chunker.chunk_document(ev, case, &text);
        let sections: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.chunk_type == ChunkType::Section)
            .collect();
        assert!(sections.len() >= 4);
        assert!(sections.iter().all(|c| c.text.len() <= 100));
    }

    #[test]
    fn test_transcript_chunking_carries_metadata() {
        let (ev, case) = ids();
        let segments = vec![
            TranscriptSegment {
                id: Uuid::new_v4(),
                start_s: 0.0,
                end_s: 2.5,
                text: "We never signed it.".to_string(),
                speaker_id: Some("SPEAKER_01".to_string()),
                confidence: Some(0.9),
                highlights: vec![],
            },
            TranscriptSegment {
                id: Uuid::new_v4(),
                start_s: 2.5,
                end_s: 4.0,
                text: "   ".to_string(),
                speaker_id: None,
                confidence: None,
                highlights: vec![],
            },
        ];
        let chunker = EvidenceChunker::default();
        let chunks = chunker.chunk_transcript(ev, case, &segments);
        // Blank segment filtered out.
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, ChunkType::Paragraph);
        assert_eq!(chunks[0].metadata.get("speaker").map(String::as_str), Some("SPEAKER_01"));
        assert!(chunks[0].metadata.contains_key("start_s"));
    }

    #[test]
    fn test_communication_chunking_per_line() {
        let (ev, case) = ids();
        let chunker = EvidenceChunker::default();
        let chunks = chunker.chunk_communication(ev, case, "msg one\n\nmsg two\nmsg three\n");
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chunk_type == ChunkType::Paragraph));
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(EvidenceChunker::new(0, 10).is_err());
        assert!(EvidenceChunker::new(10, 0).is_err());
    }

    #[test]
    fn test_split_fixed_grapheme_safe() {
        // Multi-byte graphemes must never be split mid-sequence.
        let text = "é".repeat(10);
        let pieces = split_fixed(&text, 3);
        for piece in &pieces {
            assert!(piece.chars().all(|c| c == 'é'));
        }
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn test_embed_chunks_shape() {
        let (ev, case) = ids();
        let chunker = EvidenceChunker::default();
        let chunks = chunker.chunk_document(ev, case, "Alpha.\n\nBeta.");
        let embedder = FallbackEmbedder::new(32);
        let batch = embed_chunks(&embedder, "summary text", &chunks).unwrap();
        assert_eq!(batch.summary.len(), chunks.len());
        assert_eq!(batch.section.len(), chunks.len());
        assert_eq!(batch.microblock.len(), chunks.len());
        // Summary space is shared across the evidence.
        assert_eq!(batch.summary[0], batch.summary[chunks.len() - 1]);
    }

    #[test]
    fn test_embed_chunks_empty() {
        let embedder = FallbackEmbedder::new(32);
        let batch = embed_chunks(&embedder, "", &[]).unwrap();
        assert!(batch.summary.is_empty());
    }
}
