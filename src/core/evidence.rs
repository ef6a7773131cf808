//! Evidence records: documents, transcripts, and forensic communications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three evidence modalities.
///
/// Each modality has its own index collection and its own analysis
/// activity in the research workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    /// Filed or discovered documents (PDFs, contracts, letters).
    Document,
    /// Audio/video transcripts with timed segments.
    Transcript,
    /// Forensic communication extracts (messages, call logs).
    Communication,
}

impl EvidenceKind {
    /// Stable string form, also the index collection suffix.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Transcript => "transcript",
            Self::Communication => "communication",
        }
    }

    /// All kinds, in definition order.
    pub const ALL: [Self; 3] = [Self::Document, Self::Transcript, Self::Communication];
}

impl std::str::FromStr for EvidenceKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(Self::Document),
            "transcript" => Ok(Self::Transcript),
            "communication" => Ok(Self::Communication),
            other => Err(crate::Error::validation(format!(
                "unknown evidence kind: {other}"
            ))),
        }
    }
}

/// Processing status of an evidence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvidenceStatus {
    /// Uploaded, not yet processed.
    Pending,
    /// Chunking/indexing in flight.
    Processing,
    /// Indexed in both stores.
    Completed,
    /// Processing failed; see the evidence error message.
    Failed,
}

impl EvidenceStatus {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for EvidenceStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(crate::Error::validation(format!(
                "unknown evidence status: {other}"
            ))),
        }
    }
}

/// A timed segment of a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Segment identifier.
    pub id: Uuid,
    /// Start offset in seconds.
    pub start_s: f64,
    /// End offset in seconds.
    pub end_s: f64,
    /// Transcribed text.
    pub text: String,
    /// Diarized speaker label, when diarization ran.
    pub speaker_id: Option<String>,
    /// ASR confidence for this segment.
    pub confidence: Option<f64>,
    /// Reviewer-added highlights.
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// A single piece of evidence in a case.
///
/// Transcript-only fields (`segments`, `summary`) stay empty for other
/// kinds; the kind discriminant keeps storage flat without an in-memory
/// class hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Evidence identifier.
    pub id: Uuid,
    /// Owning case.
    pub case_id: Uuid,
    /// Evidence modality.
    pub kind: EvidenceKind,
    /// Original filename.
    pub filename: String,
    /// Size in bytes of the source artifact.
    pub size_bytes: u64,
    /// Processing status.
    pub status: EvidenceStatus,
    /// Ordered transcript segments (transcripts only).
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
    /// Generated summary artifact (transcripts only).
    pub summary: Option<String>,
    /// Upload timestamp.
    pub created_at: DateTime<Utc>,
}

impl Evidence {
    /// Creates a new pending evidence record.
    #[must_use]
    pub fn new(case_id: Uuid, kind: EvidenceKind, filename: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            case_id,
            kind,
            filename: filename.into(),
            size_bytes,
            status: EvidenceStatus::Pending,
            segments: Vec::new(),
            summary: None,
            created_at: Utc::now(),
        }
    }

    /// Attaches ordered transcript segments.
    #[must_use]
    pub fn with_segments(mut self, segments: Vec<TranscriptSegment>) -> Self {
        self.segments = segments;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evidence_new_is_pending() {
        let ev = Evidence::new(Uuid::new_v4(), EvidenceKind::Document, "motion.pdf", 1024);
        assert_eq!(ev.status, EvidenceStatus::Pending);
        assert!(ev.segments.is_empty());
        assert!(ev.summary.is_none());
    }

    #[test]
    fn test_evidence_kind_roundtrip() {
        for kind in EvidenceKind::ALL {
            let parsed: EvidenceKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
        assert!("video".parse::<EvidenceKind>().is_err());
    }

    #[test]
    fn test_transcript_segments_attach() {
        let seg = TranscriptSegment {
            id: Uuid::new_v4(),
            start_s: 0.0,
            end_s: 4.2,
            text: "We never signed that agreement.".to_string(),
            speaker_id: Some("SPEAKER_01".to_string()),
            confidence: Some(0.93),
            highlights: vec![],
        };
        let ev = Evidence::new(Uuid::new_v4(), EvidenceKind::Transcript, "depo.wav", 0)
            .with_segments(vec![seg]);
        assert_eq!(ev.segments.len(), 1);
        assert_eq!(ev.segments[0].speaker_id.as_deref(), Some("SPEAKER_01"));
    }

    #[test]
    fn test_evidence_status_roundtrip() {
        for s in [
            EvidenceStatus::Pending,
            EvidenceStatus::Processing,
            EvidenceStatus::Completed,
            EvidenceStatus::Failed,
        ] {
            let parsed: EvidenceStatus = s.as_str().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }
}
