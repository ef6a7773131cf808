//! Findings, citations, and their bounded score value objects.
//!
//! A finding is a typed, citation-backed atomic claim produced during
//! research. Confidence and relevance are validating newtypes: values
//! outside `[0, 1]` (or non-finite values) are rejected at construction,
//! so a stored finding can never violate the invariant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of claim a finding asserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingType {
    /// A factual assertion extracted from evidence.
    Fact,
    /// A verbatim quote worth citing.
    Quote,
    /// A dated event for the timeline.
    TimelineEvent,
    /// A detected conflict between claims.
    Contradiction,
    /// A recurring pattern across evidence.
    Pattern,
    /// A relationship between entities.
    Relationship,
}

impl FindingType {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Quote => "quote",
            Self::TimelineEvent => "timeline_event",
            Self::Contradiction => "contradiction",
            Self::Pattern => "pattern",
            Self::Relationship => "relationship",
        }
    }
}

impl std::str::FromStr for FindingType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fact" => Ok(Self::Fact),
            "quote" => Ok(Self::Quote),
            "timeline_event" => Ok(Self::TimelineEvent),
            "contradiction" => Ok(Self::Contradiction),
            "pattern" => Ok(Self::Pattern),
            "relationship" => Ok(Self::Relationship),
            other => Err(crate::Error::validation(format!(
                "unknown finding type: {other}"
            ))),
        }
    }
}

/// Confidence score in `[0, 1]`, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Confidence(f64);

/// Relevance score in `[0, 1]`, validated at construction.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Relevance(f64);

macro_rules! bounded_score {
    ($name:ident, $label:literal) => {
        impl $name {
            /// Creates a new score, rejecting values outside `[0, 1]`.
            ///
            /// # Errors
            ///
            /// Returns a validation error for out-of-range or non-finite
            /// values.
            pub fn new(value: f64) -> crate::Result<Self> {
                if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                    return Err(crate::Error::validation(format!(
                        concat!($label, " must be in [0, 1], got {}"),
                        value
                    )));
                }
                Ok(Self(value))
            }

            /// Returns the inner value.
            #[must_use]
            pub const fn value(self) -> f64 {
                self.0
            }
        }

        impl TryFrom<f64> for $name {
            type Error = crate::Error;

            fn try_from(value: f64) -> crate::Result<Self> {
                Self::new(value)
            }
        }

        impl From<$name> for f64 {
            fn from(score: $name) -> Self {
                score.0
            }
        }
    };
}

bounded_score!(Confidence, "confidence");
bounded_score!(Relevance, "relevance");

/// Immutable reference from a finding back to a specific chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Citation identifier.
    pub id: Uuid,
    /// Cited chunk (deterministic chunk id).
    pub chunk_id: String,
    /// Evidence owning the cited chunk.
    pub evidence_id: Uuid,
    /// Cited transcript segment, when applicable.
    pub segment_id: Option<Uuid>,
    /// Character offset of the cited span start within the chunk.
    pub start_offset: usize,
    /// Character offset of the cited span end within the chunk.
    pub end_offset: usize,
    /// The cited text itself.
    pub snippet: String,
}

impl Citation {
    /// Creates a citation for a span of a chunk.
    #[must_use]
    pub fn new(
        chunk_id: impl Into<String>,
        evidence_id: Uuid,
        start_offset: usize,
        end_offset: usize,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            chunk_id: chunk_id.into(),
            evidence_id,
            segment_id: None,
            start_offset,
            end_offset,
            snippet: snippet.into(),
        }
    }
}

/// A typed, citation-backed claim produced by a research run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Finding identifier.
    pub id: Uuid,
    /// Producing research run.
    pub research_run_id: Uuid,
    /// Kind of claim.
    pub finding_type: FindingType,
    /// The claim text.
    pub text: String,
    /// Entities referenced by the claim (people, orgs, places, ...).
    #[serde(default)]
    pub entities: Vec<String>,
    /// Citations backing the claim.
    #[serde(default)]
    pub citations: Vec<Citation>,
    /// Confidence in `[0, 1]`.
    pub confidence: Confidence,
    /// Relevance in `[0, 1]`.
    pub relevance: Relevance,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Event timestamp for `TimelineEvent` findings.
    pub event_time: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Finding {
    /// Creates a new finding.
    ///
    /// # Errors
    ///
    /// Returns a validation error when scores are out of range or the
    /// claim text is empty.
    pub fn new(
        research_run_id: Uuid,
        finding_type: FindingType,
        text: impl Into<String>,
        confidence: f64,
        relevance: f64,
    ) -> crate::Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(crate::Error::validation("finding text must not be empty"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            research_run_id,
            finding_type,
            text,
            entities: Vec::new(),
            citations: Vec::new(),
            confidence: Confidence::new(confidence)?,
            relevance: Relevance::new(relevance)?,
            tags: Vec::new(),
            event_time: None,
            created_at: Utc::now(),
        })
    }

    /// Attaches entities.
    #[must_use]
    pub fn with_entities(mut self, entities: Vec<String>) -> Self {
        self.entities = entities;
        self
    }

    /// Attaches citations.
    #[must_use]
    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }

    /// Sets the event timestamp (timeline events).
    #[must_use]
    pub const fn with_event_time(mut self, at: DateTime<Utc>) -> Self {
        self.event_time = Some(at);
        self
    }
}
