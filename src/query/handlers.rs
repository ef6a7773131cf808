//! Query handlers for the read side.
//!
//! Each handler reads through the store traits and projects into DTOs.
//! Handlers never mutate state and never expose domain entities.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::{Finding, ResearchPhase, ResearchRun, ResearchStatus};
use crate::query::dto::{
    DossierDto, EntityDto, EventDto, FindingDto, GetFindingsResult, GetTimelineResult,
    ListResearchRunsResult, QueryGraphResult, RelationshipDto, ResearchStatusDto,
    SearchEvidenceResult, SearchResultDto,
};
use crate::query::queries::{
    GetDossierQuery, GetFindingsQuery, GetResearchStatusQuery, GetTimelineQuery,
    ListResearchRunsQuery, QueryGraphQuery, SearchEvidenceQuery,
};
use crate::query::{Query, QueryBus, QueryHandler};
use crate::search::{HybridRetriever, SearchOptions, SearchRequest};
use crate::store::{RecordStore, SearchFilter};
use crate::{Error, Result};

/// Registers the seven standard handlers on a bus.
///
/// # Errors
///
/// Returns an error if any kind is already registered.
pub fn register_default_handlers(
    bus: &mut QueryBus,
    retriever: Arc<HybridRetriever>,
    records: Arc<dyn RecordStore>,
) -> Result<()> {
    bus.register::<SearchEvidenceQuery, _>(SearchEvidenceHandler::new(retriever))?;
    bus.register::<GetFindingsQuery, _>(GetFindingsHandler::new(Arc::clone(&records)))?;
    bus.register::<GetResearchStatusQuery, _>(GetResearchStatusHandler::new(Arc::clone(&records)))?;
    bus.register::<QueryGraphQuery, _>(QueryGraphHandler::new(Arc::clone(&records)))?;
    bus.register::<GetTimelineQuery, _>(GetTimelineHandler::new(Arc::clone(&records)))?;
    bus.register::<GetDossierQuery, _>(GetDossierHandler::new(Arc::clone(&records)))?;
    bus.register::<ListResearchRunsQuery, _>(ListResearchRunsHandler::new(records))?;
    Ok(())
}

/// Delegates to the hybrid retriever.
pub struct SearchEvidenceHandler {
    retriever: Arc<HybridRetriever>,
}

impl SearchEvidenceHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(retriever: Arc<HybridRetriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl QueryHandler<SearchEvidenceQuery> for SearchEvidenceHandler {
    async fn handle(&self, query: &SearchEvidenceQuery) -> Result<SearchEvidenceResult> {
        query.validate()?;
        let request = SearchRequest {
            query: query.query.clone(),
            filter: SearchFilter {
                case_ids: query.case_ids.clone(),
                chunk_types: query.chunk_types.clone(),
                date_range: query.date_range,
            },
            evidence_kind: query.evidence_kind,
            top_k: query.top_k,
            mode: query.mode,
            options: SearchOptions {
                use_rerank: query.rerank,
                fusion: query.fusion,
                score_threshold: query.score_threshold,
                ..SearchOptions::default()
            },
        };
        let ranked = self.retriever.search(&request).await?;
        Ok(SearchEvidenceResult {
            total: ranked.total,
            took_ms: ranked.took_ms,
            warnings: ranked.warnings,
            results: ranked
                .results
                .into_iter()
                .map(|r| SearchResultDto {
                    chunk_id: r.chunk_id,
                    evidence_id: r.evidence_id,
                    text: r.text,
                    score: r.score,
                    rerank_score: r.rerank_score,
                    highlights: r.highlights,
                    filename: r.filename,
                    page: r.page,
                    chunk_type: r.chunk_type.as_str().to_string(),
                })
                .collect(),
        })
    }
}

/// Filters, sorts, and paginates a run's findings.
pub struct GetFindingsHandler {
    records: Arc<dyn RecordStore>,
}

impl GetFindingsHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl QueryHandler<GetFindingsQuery> for GetFindingsHandler {
    async fn handle(&self, query: &GetFindingsQuery) -> Result<GetFindingsResult> {
        query.validate()?;
        if self.records.get_run(query.research_run_id)?.is_none() {
            return Err(Error::not_found("research run", query.research_run_id));
        }

        let mut findings: Vec<Finding> = self
            .records
            .findings_for_run(query.research_run_id)?
            .into_iter()
            .filter(|f| {
                query.finding_types.is_empty() || query.finding_types.contains(&f.finding_type)
            })
            .filter(|f| {
                query
                    .min_confidence
                    .is_none_or(|min| f.confidence.value() >= min)
            })
            .filter(|f| {
                query
                    .min_relevance
                    .is_none_or(|min| f.relevance.value() >= min)
            })
            .filter(|f| {
                query.tags.is_empty() || f.tags.iter().any(|t| query.tags.contains(t))
            })
            .collect();

        // Relevance first, confidence second, stable id tie-break.
        findings.sort_by(|a, b| {
            b.relevance
                .value()
                .partial_cmp(&a.relevance.value())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.confidence
                        .value()
                        .partial_cmp(&a.confidence.value())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        });

        let total = findings.len();
        let page: Vec<FindingDto> = findings
            .iter()
            .skip(query.offset)
            .take(query.limit)
            .map(FindingDto::from)
            .collect();

        Ok(GetFindingsResult {
            findings: page,
            total,
        })
    }
}

/// Merges the persisted run with live heartbeat progress.
pub struct GetResearchStatusHandler {
    records: Arc<dyn RecordStore>,
}

impl GetResearchStatusHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Progress: terminal runs pin to 100 (cancelled keeps its phase
    /// value); running ones prefer the live heartbeat over the phase
    /// map; pending is 0.
    fn progress(run: &ResearchRun) -> f64 {
        match run.status {
            ResearchStatus::Completed | ResearchStatus::Failed => {
                ResearchPhase::Completed.progress_pct()
            }
            ResearchStatus::Cancelled => run.phase.progress_pct(),
            ResearchStatus::Running | ResearchStatus::Paused => run
                .metadata
                .get("progress_pct")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or_else(|| run.phase.progress_pct()),
            ResearchStatus::Pending => 0.0,
        }
    }
}

#[async_trait]
impl QueryHandler<GetResearchStatusQuery> for GetResearchStatusHandler {
    async fn handle(&self, query: &GetResearchStatusQuery) -> Result<ResearchStatusDto> {
        let run = self
            .records
            .get_run(query.research_run_id)?
            .ok_or_else(|| Error::not_found("research run", query.research_run_id))?;
        let findings_count = self.records.findings_for_run(run.id)?.len();
        Ok(ResearchStatusDto::project(
            &run,
            Self::progress(&run),
            findings_count,
        ))
    }
}

/// Depth-limited knowledge graph traversal.
pub struct QueryGraphHandler {
    records: Arc<dyn RecordStore>,
}

impl QueryGraphHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl QueryHandler<QueryGraphQuery> for QueryGraphHandler {
    async fn handle(&self, query: &QueryGraphQuery) -> Result<QueryGraphResult> {
        query.validate()?;
        let (nodes, relationships) = self.records.graph_for_case(query.case_id)?;

        // Seed selection: entity label match, else everything.
        let seed: HashSet<Uuid> = match &query.entity {
            Some(label) => {
                let needle = label.to_lowercase();
                nodes
                    .iter()
                    .filter(|n| n.label.to_lowercase().contains(&needle))
                    .map(|n| n.id)
                    .collect()
            }
            None => nodes.iter().map(|n| n.id).collect(),
        };

        // BFS over relationships up to the depth limit.
        let mut included = seed.clone();
        if query.entity.is_some() {
            let mut frontier: VecDeque<(Uuid, usize)> =
                seed.iter().map(|id| (*id, 0)).collect();
            while let Some((node, depth)) = frontier.pop_front() {
                if depth >= query.depth {
                    continue;
                }
                for rel in &relationships {
                    for neighbor in [rel.source_id, rel.target_id] {
                        if (rel.source_id == node || rel.target_id == node)
                            && included.insert(neighbor)
                        {
                            frontier.push_back((neighbor, depth + 1));
                        }
                    }
                }
            }
        }

        let entities: Vec<EntityDto> = nodes
            .iter()
            .filter(|n| included.contains(&n.id))
            .filter(|n| query.node_type.is_none_or(|t| n.node_type == t))
            .map(EntityDto::from)
            .collect();
        let entity_ids: HashSet<Uuid> = entities.iter().map(|e| e.id).collect();

        let relationships: Vec<RelationshipDto> = relationships
            .iter()
            .filter(|r| entity_ids.contains(&r.source_id) && entity_ids.contains(&r.target_id))
            .filter(|r| query.relationship.is_none_or(|t| r.rel_type == t))
            .map(RelationshipDto::from)
            .collect();

        // Events involving the matched entities.
        let labels: HashSet<String> = entities.iter().map(|e| e.label.to_lowercase()).collect();
        let events: Vec<EventDto> = self
            .records
            .timeline_for_case(query.case_id)?
            .iter()
            .filter(|e| {
                query.entity.is_none()
                    || e.participants
                        .iter()
                        .any(|p| labels.contains(&p.to_lowercase()))
            })
            .map(EventDto::from)
            .collect();

        Ok(QueryGraphResult {
            entities,
            relationships,
            events,
        })
    }
}

/// Filters and limits the case timeline.
pub struct GetTimelineHandler {
    records: Arc<dyn RecordStore>,
}

impl GetTimelineHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl QueryHandler<GetTimelineQuery> for GetTimelineHandler {
    async fn handle(&self, query: &GetTimelineQuery) -> Result<GetTimelineResult> {
        query.validate()?;
        let events: Vec<_> = self
            .records
            .timeline_for_case(query.case_id)?
            .into_iter()
            .filter(|e| query.start_date.is_none_or(|start| e.timestamp >= start))
            .filter(|e| query.end_date.is_none_or(|end| e.timestamp <= end))
            .filter(|e| {
                query.entity.as_ref().is_none_or(|entity| {
                    let needle = entity.to_lowercase();
                    e.participants.iter().any(|p| p.to_lowercase().contains(&needle))
                })
            })
            .filter(|e| query.event_types.is_empty() || query.event_types.contains(&e.event_type))
            .collect();

        let total_events = events.len();
        let page: Vec<_> = events.iter().take(query.limit).collect();
        Ok(GetTimelineResult {
            start_date: page.first().map(|e| e.timestamp),
            end_date: page.last().map(|e| e.timestamp),
            events: page.into_iter().map(Into::into).collect(),
            total_events,
        })
    }
}

/// Fetches a run's dossier.
pub struct GetDossierHandler {
    records: Arc<dyn RecordStore>,
}

impl GetDossierHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl QueryHandler<GetDossierQuery> for GetDossierHandler {
    async fn handle(&self, query: &GetDossierQuery) -> Result<DossierDto> {
        let dossier = self
            .records
            .dossier_for_run(query.research_run_id)?
            .ok_or_else(|| Error::not_found("dossier", query.research_run_id))?;
        Ok(DossierDto::from(&dossier))
    }
}

/// Case-scoped run listing, newest first.
pub struct ListResearchRunsHandler {
    records: Arc<dyn RecordStore>,
}

impl ListResearchRunsHandler {
    /// Creates the handler.
    #[must_use]
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl QueryHandler<ListResearchRunsQuery> for ListResearchRunsHandler {
    async fn handle(&self, query: &ListResearchRunsQuery) -> Result<ListResearchRunsResult> {
        query.validate()?;
        let (runs, total) =
            self.records
                .list_runs(query.case_id, query.status, query.limit, query.offset)?;
        let runs = runs
            .iter()
            .map(|run| {
                let findings_count = self.records.findings_for_run(run.id)?.len();
                Ok(ResearchStatusDto::project(
                    run,
                    GetResearchStatusHandler::progress(run),
                    findings_count,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ListResearchRunsResult { runs, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Case, Citation, FindingType, TimelineEvent};
    use crate::store::SqliteRecords;
    use chrono::{TimeZone, Utc};

    fn records() -> Arc<SqliteRecords> {
        let r = SqliteRecords::in_memory().unwrap();
        r.init().unwrap();
        Arc::new(r)
    }

    fn seeded_run(records: &Arc<SqliteRecords>) -> ResearchRun {
        let case = Case::new(format!("C-{}", Uuid::new_v4()), "Acme", "contract").unwrap();
        records.create_case(&case).unwrap();
        let run = ResearchRun::new(case.id, Some("q".to_string()), None);
        records.save_run(&run).unwrap();
        run
    }

    fn finding(run: Uuid, relevance: f64, confidence: f64, tag: &str) -> Finding {
        let mut f = Finding::new(run, FindingType::Fact, format!("claim {relevance}/{confidence}"), confidence, relevance)
            .unwrap();
        f.tags = vec![tag.to_string()];
        f.citations = vec![Citation::new("c/00000", Uuid::new_v4(), 0, 4, "snip")];
        f
    }

    #[tokio::test]
    async fn test_get_findings_sorts_and_paginates() {
        let records = records();
        let run = seeded_run(&records);
        records
            .add_findings(&[
                finding(run.id, 0.5, 0.9, "a"),
                finding(run.id, 0.9, 0.2, "b"),
                finding(run.id, 0.9, 0.8, "a"),
            ])
            .unwrap();

        let handler = GetFindingsHandler::new(records.clone());
        let mut query = GetFindingsQuery::new(run.id);
        query.limit = 2;
        let result = handler.handle(&query).await.unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.findings.len(), 2);
        // Highest relevance first; within ties, higher confidence.
        assert!((result.findings[0].relevance - 0.9).abs() < f64::EPSILON);
        assert!((result.findings[0].confidence - 0.8).abs() < f64::EPSILON);

        // offset = total yields an empty page but the true total.
        query.offset = 3;
        let empty = handler.handle(&query).await.unwrap();
        assert!(empty.findings.is_empty());
        assert_eq!(empty.total, 3);
    }

    #[tokio::test]
    async fn test_get_findings_filters() {
        let records = records();
        let run = seeded_run(&records);
        records
            .add_findings(&[
                finding(run.id, 0.9, 0.9, "key"),
                finding(run.id, 0.2, 0.2, "minor"),
            ])
            .unwrap();

        let handler = GetFindingsHandler::new(records.clone());
        let mut query = GetFindingsQuery::new(run.id);
        query.min_confidence = Some(0.5);
        let result = handler.handle(&query).await.unwrap();
        assert_eq!(result.total, 1);

        let mut query = GetFindingsQuery::new(run.id);
        query.tags = vec!["minor".to_string()];
        let result = handler.handle(&query).await.unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.findings[0].tags, vec!["minor".to_string()]);
    }

    #[tokio::test]
    async fn test_get_findings_missing_run() {
        let handler = GetFindingsHandler::new(records());
        let err = handler
            .handle(&GetFindingsQuery::new(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_status_progress_map() {
        let records = records();
        let mut run = seeded_run(&records);

        // SEARCHING with no live heartbeat → 35.
        run.advance_phase(ResearchPhase::Searching).unwrap();
        records.save_run(&run).unwrap();
        let handler = GetResearchStatusHandler::new(records.clone());
        let dto = handler
            .handle(&GetResearchStatusQuery { research_run_id: run.id })
            .await
            .unwrap();
        assert!((dto.progress_pct - 35.0).abs() < f64::EPSILON);

        // DOSSIER_GENERATION → 95.
        run.advance_phase(ResearchPhase::DossierGeneration).unwrap();
        records.save_run(&run).unwrap();
        let dto = handler
            .handle(&GetResearchStatusQuery { research_run_id: run.id })
            .await
            .unwrap();
        assert!((dto.progress_pct - 95.0).abs() < f64::EPSILON);

        // COMPLETED pins to 100.
        run.complete().unwrap();
        records.save_run(&run).unwrap();
        let dto = handler
            .handle(&GetResearchStatusQuery { research_run_id: run.id })
            .await
            .unwrap();
        assert!((dto.progress_pct - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_status_live_heartbeat_overrides_phase() {
        let records = records();
        let mut run = seeded_run(&records);
        run.advance_phase(ResearchPhase::Searching).unwrap();
        run.metadata.insert(
            "progress_pct".to_string(),
            serde_json::Value::from(41.5),
        );
        records.save_run(&run).unwrap();

        let handler = GetResearchStatusHandler::new(records.clone());
        let dto = handler
            .handle(&GetResearchStatusQuery { research_run_id: run.id })
            .await
            .unwrap();
        assert!((dto.progress_pct - 41.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_status_cancelled_keeps_phase_progress() {
        let records = records();
        let mut run = seeded_run(&records);
        run.advance_phase(ResearchPhase::Analyzing).unwrap();
        run.cancel().unwrap();
        records.save_run(&run).unwrap();

        let handler = GetResearchStatusHandler::new(records.clone());
        let dto = handler
            .handle(&GetResearchStatusQuery { research_run_id: run.id })
            .await
            .unwrap();
        assert_eq!(dto.status, "CANCELLED");
        assert!((dto.progress_pct - 60.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_status_is_pure() {
        let records = records();
        let run = seeded_run(&records);
        let handler = GetResearchStatusHandler::new(records.clone());
        let a = handler
            .handle(&GetResearchStatusQuery { research_run_id: run.id })
            .await
            .unwrap();
        let b = handler
            .handle(&GetResearchStatusQuery { research_run_id: run.id })
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_timeline_filters_and_limits() {
        let records = records();
        let run = seeded_run(&records);
        let case_id = run.case_id;
        let t = |d: u32| Utc.with_ymd_and_hms(2024, 2, d, 8, 0, 0).single().unwrap();
        let mut e1 = TimelineEvent::new(case_id, t(1), "meeting", "kickoff");
        e1.participants = vec!["John Doe".to_string()];
        let e2 = TimelineEvent::new(case_id, t(10), "payment", "wire sent");
        let e3 = TimelineEvent::new(case_id, t(20), "meeting", "review");
        records.save_timeline(case_id, &[e1, e2, e3]).unwrap();

        let handler = GetTimelineHandler::new(records.clone());

        let mut query = GetTimelineQuery::new(case_id);
        query.event_types = vec!["meeting".to_string()];
        let result = handler.handle(&query).await.unwrap();
        assert_eq!(result.total_events, 2);
        // Chronological order.
        assert!(result.events[0].timestamp <= result.events[1].timestamp);

        let mut query = GetTimelineQuery::new(case_id);
        query.start_date = Some(t(5));
        query.end_date = Some(t(15));
        let result = handler.handle(&query).await.unwrap();
        assert_eq!(result.total_events, 1);
        assert_eq!(result.events[0].event_type, "payment");

        let mut query = GetTimelineQuery::new(case_id);
        query.entity = Some("john doe".to_string());
        let result = handler.handle(&query).await.unwrap();
        assert_eq!(result.total_events, 1);

        let mut query = GetTimelineQuery::new(case_id);
        query.limit = 1;
        let result = handler.handle(&query).await.unwrap();
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.total_events, 3);
    }

    #[tokio::test]
    async fn test_graph_traversal_depth_limited() {
        use crate::core::{GraphNode, GraphRelationship, NodeType, RelationshipType};
        let records = records();
        let run = seeded_run(&records);
        let case_id = run.case_id;

        // Chain: alice -> bob -> carol
        let alice = GraphNode::new(case_id, NodeType::Person, "Alice");
        let bob = GraphNode::new(case_id, NodeType::Person, "Bob");
        let carol = GraphNode::new(case_id, NodeType::Person, "Carol");
        let r1 = GraphRelationship::new(alice.id, bob.id, RelationshipType::RelatedTo);
        let r2 = GraphRelationship::new(bob.id, carol.id, RelationshipType::RelatedTo);
        records
            .save_graph(case_id, &[alice, bob, carol], &[r1, r2])
            .unwrap();

        let handler = QueryGraphHandler::new(records.clone());

        let mut query = QueryGraphQuery::new(case_id);
        query.entity = Some("alice".to_string());
        query.depth = 1;
        let result = handler.handle(&query).await.unwrap();
        let labels: Vec<&str> = result.entities.iter().map(|e| e.label.as_str()).collect();
        assert!(labels.contains(&"Alice"));
        assert!(labels.contains(&"Bob"));
        assert!(!labels.contains(&"Carol"));

        query.depth = 2;
        let result = handler.handle(&query).await.unwrap();
        assert_eq!(result.entities.len(), 3);
        assert_eq!(result.relationships.len(), 2);
    }

    #[tokio::test]
    async fn test_dossier_not_found() {
        let handler = GetDossierHandler::new(records());
        let err = handler
            .handle(&GetDossierQuery {
                research_run_id: Uuid::new_v4(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_runs_newest_first() {
        let records = records();
        let case = Case::new("C-RUNS", "Acme", "contract").unwrap();
        records.create_case(&case).unwrap();
        for _ in 0..3 {
            let run = ResearchRun::new(case.id, None, None);
            records.save_run(&run).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        let handler = ListResearchRunsHandler::new(records.clone());
        let mut query = ListResearchRunsQuery::new(case.id);
        query.limit = 2;
        let result = handler.handle(&query).await.unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.runs.len(), 2);
        assert!(result.runs[0].started_at >= result.runs[1].started_at);
    }
}
