//! Data transfer objects for the read side.
//!
//! Handlers return these instead of domain entities so transport
//! adapters serialize a stable shape.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::core::{
    Citation, Dossier, DossierSection, Finding, GraphNode, GraphRelationship, ResearchRun,
    TimelineEvent,
};

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResultDto {
    /// Deterministic chunk id.
    pub chunk_id: String,
    /// Owning evidence.
    pub evidence_id: Uuid,
    /// Chunk text.
    pub text: String,
    /// Fused (pre-rerank) score.
    pub score: f64,
    /// Cross-encoder score, when reranking ran.
    pub rerank_score: Option<f64>,
    /// Character-offset match spans.
    pub highlights: Vec<(usize, usize)>,
    /// Source filename.
    pub filename: Option<String>,
    /// Source page.
    pub page: Option<u32>,
    /// Chunk granularity.
    pub chunk_type: String,
}

/// Search response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchEvidenceResult {
    /// Hits, best first.
    pub results: Vec<SearchResultDto>,
    /// Wall-clock search time.
    pub took_ms: u64,
    /// Number of hits returned.
    pub total: usize,
    /// Degradation warnings.
    pub warnings: Vec<String>,
}

/// A citation projected for transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CitationDto {
    /// Cited chunk.
    pub chunk_id: String,
    /// Evidence owning the chunk.
    pub evidence_id: Uuid,
    /// Span start (characters).
    pub start_offset: usize,
    /// Span end (characters).
    pub end_offset: usize,
    /// Cited text.
    pub snippet: String,
}

impl From<&Citation> for CitationDto {
    fn from(c: &Citation) -> Self {
        Self {
            chunk_id: c.chunk_id.clone(),
            evidence_id: c.evidence_id,
            start_offset: c.start_offset,
            end_offset: c.end_offset,
            snippet: c.snippet.clone(),
        }
    }
}

/// A finding projected for transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FindingDto {
    /// Finding id.
    pub id: Uuid,
    /// Claim kind.
    pub finding_type: String,
    /// Claim text.
    pub text: String,
    /// Referenced entities.
    pub entities: Vec<String>,
    /// Backing citations.
    pub citations: Vec<CitationDto>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Relevance in `[0, 1]`.
    pub relevance: f64,
    /// Tags.
    pub tags: Vec<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<&Finding> for FindingDto {
    fn from(f: &Finding) -> Self {
        Self {
            id: f.id,
            finding_type: f.finding_type.as_str().to_string(),
            text: f.text.clone(),
            entities: f.entities.clone(),
            citations: f.citations.iter().map(CitationDto::from).collect(),
            confidence: f.confidence.value(),
            relevance: f.relevance.value(),
            tags: f.tags.clone(),
            created_at: f.created_at,
        }
    }
}

/// Findings response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GetFindingsResult {
    /// Page of findings.
    pub findings: Vec<FindingDto>,
    /// Total findings matching the filters (pre-pagination).
    pub total: usize,
}

/// Research run status projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResearchStatusDto {
    /// Run id.
    pub research_run_id: Uuid,
    /// Case id.
    pub case_id: Uuid,
    /// Execution status.
    pub status: String,
    /// Current phase.
    pub phase: String,
    /// Progress percentage (0..=100).
    pub progress_pct: f64,
    /// Research question.
    pub query: Option<String>,
    /// Findings produced so far.
    pub findings_count: usize,
    /// Citations collected so far.
    pub citations_count: usize,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Completion time for terminal runs.
    pub completed_at: Option<DateTime<Utc>>,
    /// Durable workflow id.
    pub workflow_id: Option<String>,
    /// Errors accumulated by the run.
    pub errors: Vec<String>,
    /// Heartbeat metadata.
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ResearchStatusDto {
    /// Projects a run with computed progress and findings counts.
    #[must_use]
    pub fn project(run: &ResearchRun, progress_pct: f64, findings_count: usize) -> Self {
        let citations_count = run
            .metadata
            .get("citations_count")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as usize;
        Self {
            research_run_id: run.id,
            case_id: run.case_id,
            status: run.status.as_str().to_string(),
            phase: run.phase.as_str().to_string(),
            progress_pct,
            query: run.query.clone(),
            findings_count,
            citations_count,
            started_at: run.started_at,
            completed_at: run.completed_at,
            workflow_id: run.workflow_id.clone(),
            errors: run.errors.clone(),
            metadata: run.metadata.clone(),
        }
    }
}

/// A graph node projected for transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityDto {
    /// Node id.
    pub id: Uuid,
    /// Entity kind.
    pub node_type: String,
    /// Display label.
    pub label: String,
    /// Properties.
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl From<&GraphNode> for EntityDto {
    fn from(n: &GraphNode) -> Self {
        Self {
            id: n.id,
            node_type: n.node_type.as_str().to_string(),
            label: n.label.clone(),
            properties: n.properties.clone(),
        }
    }
}

/// A graph relationship projected for transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipDto {
    /// Relationship id.
    pub id: Uuid,
    /// Source node.
    pub source_id: Uuid,
    /// Target node.
    pub target_id: Uuid,
    /// Relationship kind.
    pub rel_type: String,
    /// Properties.
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl From<&GraphRelationship> for RelationshipDto {
    fn from(r: &GraphRelationship) -> Self {
        Self {
            id: r.id,
            source_id: r.source_id,
            target_id: r.target_id,
            rel_type: r.rel_type.as_str().to_string(),
            properties: r.properties.clone(),
        }
    }
}

/// A timeline event projected into graph query results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventDto {
    /// Event id.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub description: String,
    /// Participants.
    pub participants: Vec<String>,
}

impl From<&TimelineEvent> for EventDto {
    fn from(e: &TimelineEvent) -> Self {
        Self {
            id: e.id,
            timestamp: e.timestamp,
            description: e.description.clone(),
            participants: e.participants.clone(),
        }
    }
}

/// Graph query response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryGraphResult {
    /// Matched nodes.
    pub entities: Vec<EntityDto>,
    /// Relationships among the matched nodes.
    pub relationships: Vec<RelationshipDto>,
    /// Events involving the matched entities.
    pub events: Vec<EventDto>,
}

/// A timeline event projected for transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEventDto {
    /// Event id.
    pub id: Uuid,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Event category.
    pub event_type: String,
    /// What happened.
    pub description: String,
    /// Participants.
    pub participants: Vec<String>,
    /// Backing citations.
    pub source_citations: Vec<CitationDto>,
}

impl From<&TimelineEvent> for TimelineEventDto {
    fn from(e: &TimelineEvent) -> Self {
        Self {
            id: e.id,
            timestamp: e.timestamp,
            event_type: e.event_type.clone(),
            description: e.description.clone(),
            participants: e.participants.clone(),
            source_citations: e.source_citations.iter().map(CitationDto::from).collect(),
        }
    }
}

/// Timeline response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GetTimelineResult {
    /// Events, chronological.
    pub events: Vec<TimelineEventDto>,
    /// Earliest returned event time.
    pub start_date: Option<DateTime<Utc>>,
    /// Latest returned event time.
    pub end_date: Option<DateTime<Utc>>,
    /// Events matching the filters (pre-limit).
    pub total_events: usize,
}

/// A dossier section projected for transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DossierSectionDto {
    /// Section title.
    pub title: String,
    /// Section body.
    pub content: String,
    /// Position within the dossier.
    pub order: usize,
    /// Metadata.
    pub metadata: BTreeMap<String, String>,
}

impl From<&DossierSection> for DossierSectionDto {
    fn from(s: &DossierSection) -> Self {
        Self {
            title: s.title.clone(),
            content: s.content.clone(),
            order: s.order,
            metadata: s.metadata.clone(),
        }
    }
}

/// Dossier response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DossierDto {
    /// Dossier id.
    pub id: Uuid,
    /// Producing run.
    pub research_run_id: Uuid,
    /// Executive summary.
    pub executive_summary: String,
    /// Ordered sections.
    pub sections: Vec<DossierSectionDto>,
    /// Citations appendix.
    pub citations_appendix: String,
    /// Rendered artifact paths.
    pub file_paths: Vec<String>,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
    /// Word count.
    pub word_count: usize,
}

impl From<&Dossier> for DossierDto {
    fn from(d: &Dossier) -> Self {
        Self {
            id: d.id,
            research_run_id: d.research_run_id,
            executive_summary: d.executive_summary.clone(),
            sections: d.sections.iter().map(DossierSectionDto::from).collect(),
            citations_appendix: d.citations_appendix.clone(),
            file_paths: d.file_paths.clone(),
            generated_at: d.generated_at,
            word_count: d.word_count,
        }
    }
}

/// Run listing response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListResearchRunsResult {
    /// Page of runs, newest first.
    pub runs: Vec<ResearchStatusDto>,
    /// Runs matching the filter (pre-pagination).
    pub total: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FindingType;

    #[test]
    fn test_finding_dto_projection() {
        let run = Uuid::new_v4();
        let ev = Uuid::new_v4();
        let finding = Finding::new(run, FindingType::Quote, "quoted text", 0.9, 0.7)
            .unwrap()
            .with_citations(vec![Citation::new("c/00000", ev, 0, 11, "quoted text")]);
        let dto = FindingDto::from(&finding);
        assert_eq!(dto.finding_type, "quote");
        assert!((dto.confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(dto.citations.len(), 1);
        assert_eq!(dto.citations[0].chunk_id, "c/00000");
    }

    #[test]
    fn test_status_dto_reads_citations_from_metadata() {
        let mut run = ResearchRun::new(Uuid::new_v4(), None, None);
        run.metadata.insert(
            "citations_count".to_string(),
            serde_json::Value::from(7u64),
        );
        let dto = ResearchStatusDto::project(&run, 35.0, 4);
        assert_eq!(dto.citations_count, 7);
        assert_eq!(dto.findings_count, 4);
        assert!((dto.progress_pct - 35.0).abs() < f64::EPSILON);
    }
}
