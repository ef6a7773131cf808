//! Query objects for the read side.
//!
//! Each query carries already-parsed primitives (transport adapters own
//! string/ISO-date parsing) and validates its bounds both at
//! construction and again through the bus's validation middleware.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::core::{ChunkType, EvidenceKind, FindingType, NodeType, RelationshipType, ResearchStatus};
use crate::query::dto::{
    DossierDto, GetFindingsResult, GetTimelineResult, ListResearchRunsResult, QueryGraphResult,
    ResearchStatusDto, SearchEvidenceResult,
};
use crate::query::{Query, QueryKind};
use crate::search::{FusionMethod, MAX_TOP_K, SearchMode};
use crate::{Error, Result};

/// Maximum knowledge-graph traversal depth.
pub const MAX_DEPTH: usize = 5;

/// Maximum page size for list queries.
const MAX_LIMIT: usize = 1000;

/// Maximum page size for run listings.
const MAX_RUNS_LIMIT: usize = 100;

fn check_limit(limit: usize, max: usize) -> Result<()> {
    if limit == 0 || limit > max {
        return Err(Error::validation(format!(
            "limit must be in 1..={max}, got {limit}"
        )));
    }
    Ok(())
}

fn check_score(name: &str, value: Option<f64>) -> Result<()> {
    if let Some(v) = value {
        if !v.is_finite() || !(0.0..=1.0).contains(&v) {
            return Err(Error::validation(format!("{name} must be in [0, 1], got {v}")));
        }
    }
    Ok(())
}

fn check_range(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<()> {
    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(Error::validation("start_date must not exceed end_date"));
        }
    }
    Ok(())
}

/// Hybrid search across case evidence.
#[derive(Debug, Clone)]
pub struct SearchEvidenceQuery {
    /// Query text.
    pub query: String,
    /// Case scoping; empty means unscoped.
    pub case_ids: Vec<Uuid>,
    /// Chunk granularity filter.
    pub chunk_types: Vec<ChunkType>,
    /// Restrict to one evidence modality.
    pub evidence_kind: Option<EvidenceKind>,
    /// Restrict to chunks written in this range.
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Maximum results (1..=1000).
    pub top_k: usize,
    /// Ranker participation.
    pub mode: SearchMode,
    /// Apply the cross-encoder second stage.
    pub rerank: bool,
    /// Fusion method.
    pub fusion: FusionMethod,
    /// Drop fused results below this score.
    pub score_threshold: Option<f64>,
}

impl SearchEvidenceQuery {
    /// Creates a search query with defaults.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            case_ids: Vec::new(),
            chunk_types: Vec::new(),
            evidence_kind: None,
            date_range: None,
            top_k: 10,
            mode: SearchMode::Hybrid,
            rerank: false,
            fusion: FusionMethod::Rrf,
            score_threshold: None,
        }
    }
}

impl Query for SearchEvidenceQuery {
    type Output = SearchEvidenceResult;
    const KIND: QueryKind = QueryKind::SearchEvidence;

    fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::validation("query must not be empty"));
        }
        check_limit(self.top_k, MAX_TOP_K)?;
        check_range(
            self.date_range.map(|(s, _)| s),
            self.date_range.map(|(_, e)| e),
        )
    }
}

/// Findings of a research run, filtered and paginated.
#[derive(Debug, Clone)]
pub struct GetFindingsQuery {
    /// Producing research run.
    pub research_run_id: Uuid,
    /// Keep only these finding types; empty keeps all.
    pub finding_types: Vec<FindingType>,
    /// Minimum confidence.
    pub min_confidence: Option<f64>,
    /// Minimum relevance.
    pub min_relevance: Option<f64>,
    /// Keep findings carrying any of these tags.
    pub tags: Vec<String>,
    /// Page size (1..=1000).
    pub limit: usize,
    /// Page offset.
    pub offset: usize,
}

impl GetFindingsQuery {
    /// Creates a findings query with defaults.
    #[must_use]
    pub fn new(research_run_id: Uuid) -> Self {
        Self {
            research_run_id,
            finding_types: Vec::new(),
            min_confidence: None,
            min_relevance: None,
            tags: Vec::new(),
            limit: 100,
            offset: 0,
        }
    }
}

impl Query for GetFindingsQuery {
    type Output = GetFindingsResult;
    const KIND: QueryKind = QueryKind::GetFindings;

    fn validate(&self) -> Result<()> {
        check_limit(self.limit, MAX_LIMIT)?;
        check_score("min_confidence", self.min_confidence)?;
        check_score("min_relevance", self.min_relevance)
    }
}

/// Current status of a research run.
#[derive(Debug, Clone, Copy)]
pub struct GetResearchStatusQuery {
    /// The research run.
    pub research_run_id: Uuid,
}

impl Query for GetResearchStatusQuery {
    type Output = ResearchStatusDto;
    const KIND: QueryKind = QueryKind::GetResearchStatus;
}

/// Knowledge-graph traversal.
#[derive(Debug, Clone)]
pub struct QueryGraphQuery {
    /// Case scope.
    pub case_id: Uuid,
    /// Seed entity label (matched case-insensitively).
    pub entity: Option<String>,
    /// Keep only nodes of this type.
    pub node_type: Option<NodeType>,
    /// Keep only relationships of this type.
    pub relationship: Option<RelationshipType>,
    /// Traversal depth from the seed entity (0..=5).
    pub depth: usize,
}

impl QueryGraphQuery {
    /// Creates a graph query for a case.
    #[must_use]
    pub fn new(case_id: Uuid) -> Self {
        Self {
            case_id,
            entity: None,
            node_type: None,
            relationship: None,
            depth: 2,
        }
    }
}

impl Query for QueryGraphQuery {
    type Output = QueryGraphResult;
    const KIND: QueryKind = QueryKind::QueryGraph;

    fn validate(&self) -> Result<()> {
        if self.depth > MAX_DEPTH {
            return Err(Error::validation(format!(
                "depth must be at most {MAX_DEPTH}, got {}",
                self.depth
            )));
        }
        Ok(())
    }
}

/// Case timeline, filtered and limited.
#[derive(Debug, Clone)]
pub struct GetTimelineQuery {
    /// Case scope.
    pub case_id: Uuid,
    /// Keep events at or after this instant.
    pub start_date: Option<DateTime<Utc>>,
    /// Keep events at or before this instant.
    pub end_date: Option<DateTime<Utc>>,
    /// Keep events involving this participant.
    pub entity: Option<String>,
    /// Keep only these event types; empty keeps all.
    pub event_types: Vec<String>,
    /// Maximum events (1..=1000).
    pub limit: usize,
}

impl GetTimelineQuery {
    /// Creates a timeline query for a case.
    #[must_use]
    pub fn new(case_id: Uuid) -> Self {
        Self {
            case_id,
            start_date: None,
            end_date: None,
            entity: None,
            event_types: Vec::new(),
            limit: 100,
        }
    }
}

impl Query for GetTimelineQuery {
    type Output = GetTimelineResult;
    const KIND: QueryKind = QueryKind::GetTimeline;

    fn validate(&self) -> Result<()> {
        check_limit(self.limit, MAX_LIMIT)?;
        check_range(self.start_date, self.end_date)
    }
}

/// Dossier of a research run.
#[derive(Debug, Clone, Copy)]
pub struct GetDossierQuery {
    /// The research run.
    pub research_run_id: Uuid,
}

impl Query for GetDossierQuery {
    type Output = DossierDto;
    const KIND: QueryKind = QueryKind::GetDossier;
}

/// Research runs of a case, newest first.
#[derive(Debug, Clone)]
pub struct ListResearchRunsQuery {
    /// Case scope.
    pub case_id: Uuid,
    /// Keep only runs in this status.
    pub status: Option<ResearchStatus>,
    /// Page size (1..=100).
    pub limit: usize,
    /// Page offset.
    pub offset: usize,
}

impl ListResearchRunsQuery {
    /// Creates a listing query for a case.
    #[must_use]
    pub fn new(case_id: Uuid) -> Self {
        Self {
            case_id,
            status: None,
            limit: 20,
            offset: 0,
        }
    }
}

impl Query for ListResearchRunsQuery {
    type Output = ListResearchRunsResult;
    const KIND: QueryKind = QueryKind::ListResearchRuns;

    fn validate(&self) -> Result<()> {
        check_limit(self.limit, MAX_RUNS_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_search_query_validation() {
        assert!(SearchEvidenceQuery::new("contract").validate().is_ok());
        assert!(SearchEvidenceQuery::new("  ").validate().is_err());

        let mut q = SearchEvidenceQuery::new("contract");
        q.top_k = 0;
        assert!(q.validate().is_err());
        q.top_k = 1000;
        assert!(q.validate().is_ok());
        q.top_k = 1001;
        assert!(q.validate().is_err());
    }

    #[test]
    fn test_findings_query_validation() {
        let run = Uuid::new_v4();
        let mut q = GetFindingsQuery::new(run);
        assert!(q.validate().is_ok());

        q.min_confidence = Some(1.2);
        assert!(q.validate().is_err());
        q.min_confidence = Some(0.7);
        q.min_relevance = Some(-0.1);
        assert!(q.validate().is_err());
        q.min_relevance = Some(0.0);
        assert!(q.validate().is_ok());

        q.limit = 0;
        assert!(q.validate().is_err());
    }

    #[test]
    fn test_graph_query_depth_bound() {
        let mut q = QueryGraphQuery::new(Uuid::new_v4());
        q.depth = MAX_DEPTH;
        assert!(q.validate().is_ok());
        q.depth = MAX_DEPTH + 1;
        assert!(q.validate().is_err());
    }

    #[test]
    fn test_timeline_query_date_range() {
        let mut q = GetTimelineQuery::new(Uuid::new_v4());
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).single().unwrap();
        q.start_date = Some(t2);
        q.end_date = Some(t1);
        assert!(q.validate().is_err());
        q.start_date = Some(t1);
        q.end_date = Some(t2);
        assert!(q.validate().is_ok());
    }

    #[test]
    fn test_runs_query_limit_bound() {
        let mut q = ListResearchRunsQuery::new(Uuid::new_v4());
        q.limit = 100;
        assert!(q.validate().is_ok());
        q.limit = 101;
        assert!(q.validate().is_err());
    }
}
