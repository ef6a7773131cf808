//! Research workflow activities.
//!
//! Each activity is an idempotent unit of work: given the same inputs
//! it produces an equivalent result, and all persistence keyed by the
//! ids inside the activity payload overwrites rather than accumulates.
//! The workflow driver journals every successful payload, so an
//! activity only re-executes when its result was never recorded.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PlatformConfig;
use crate::core::{
    Citation, DossierSection, Evidence, EvidenceKind, Finding, FindingType, ResearchRun,
};
use crate::embedding::Embedder;
use crate::governor::ResourceGovernor;
use crate::index::IndexLifecycleManager;
use crate::llm::{ChatRequest, LlmProvider, system_message, user_message};
use crate::research::correlate::{CorrelationResult, correlate};
use crate::search::{HybridRetriever, SearchRequest};
use crate::store::{RecordStore, SearchFilter};
use crate::Result;

/// Maximum sub-queries taken from a plan.
const MAX_SUB_QUERIES: usize = 4;
/// Chunks retrieved per sub-query.
const CHUNKS_PER_QUERY: usize = 8;
/// Chunk budget per analysis activity.
const MAX_CHUNKS_PER_KIND: usize = 12;

/// Reference to discovered evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// Evidence id.
    pub id: Uuid,
    /// Evidence modality.
    pub kind: EvidenceKind,
    /// Source filename.
    pub filename: String,
}

/// Output of the discovery phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    /// Evidence available in the case.
    pub evidence: Vec<EvidenceRef>,
}

/// Output of the planning phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisPlan {
    /// Sub-queries driving the analysis fan-out.
    pub sub_queries: Vec<String>,
}

/// Output of one analysis activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    /// Findings extracted for this evidence modality.
    pub findings: Vec<Finding>,
    /// LLM responses that failed to parse (skipped, not fatal).
    pub parse_failures: usize,
}

/// Output of the synthesis phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisOutput {
    /// Executive summary.
    pub executive_summary: String,
    /// Ordered dossier sections.
    pub sections: Vec<DossierSection>,
}

/// Output of report generation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportOutput {
    /// Rendered artifact paths.
    pub file_paths: Vec<String>,
    /// Dossier word count.
    pub word_count: usize,
}

/// Shape the analysis prompt asks the model to emit.
#[derive(Debug, Deserialize)]
struct RawFindingList {
    #[serde(default)]
    findings: Vec<RawFinding>,
}

#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default)]
    finding_type: String,
    text: String,
    #[serde(default)]
    entities: Vec<String>,
    #[serde(default = "default_score")]
    confidence: f64,
    #[serde(default = "default_score")]
    relevance: f64,
    #[serde(default)]
    event_time: Option<String>,
}

const fn default_score() -> f64 {
    0.5
}

#[derive(Debug, Deserialize)]
struct RawPlan {
    #[serde(default)]
    sub_queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawSynthesis {
    executive_summary: String,
    #[serde(default)]
    sections: Vec<RawSection>,
}

#[derive(Debug, Deserialize)]
struct RawSection {
    title: String,
    content: String,
}

/// The workflow's activity implementations, bundled with their
/// dependencies.
pub struct Activities {
    records: Arc<dyn RecordStore>,
    retriever: Arc<HybridRetriever>,
    governor: Arc<ResourceGovernor>,
    provider: Arc<dyn LlmProvider>,
    embedder: Arc<dyn Embedder>,
    lifecycle: Arc<IndexLifecycleManager>,
    config: PlatformConfig,
}

impl Activities {
    /// Bundles activity dependencies.
    #[must_use]
    pub fn new(
        records: Arc<dyn RecordStore>,
        retriever: Arc<HybridRetriever>,
        governor: Arc<ResourceGovernor>,
        provider: Arc<dyn LlmProvider>,
        embedder: Arc<dyn Embedder>,
        lifecycle: Arc<IndexLifecycleManager>,
        config: PlatformConfig,
    ) -> Self {
        Self {
            records,
            retriever,
            governor,
            provider,
            embedder,
            lifecycle,
            config,
        }
    }

    pub(crate) fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    /// `initialize_research_run`: persists the run record.
    ///
    /// # Errors
    ///
    /// Returns an error if the run cannot be persisted.
    pub fn initialize_research_run(&self, run: &ResearchRun) -> Result<Uuid> {
        self.records.save_run(run)?;
        info!(run_id = %run.id, case_id = %run.case_id, "research run initialized");
        Ok(run.id)
    }

    /// `run_discovery_phase`: ensures the indexes exist and enumerates
    /// the case's evidence.
    ///
    /// # Errors
    ///
    /// Returns an error if index creation or evidence listing fails.
    pub async fn run_discovery_phase(&self, run: &ResearchRun) -> Result<DiscoveryResult> {
        self.lifecycle.create_all_indexes(false).await?;
        let evidence = self.records.list_evidence(run.case_id, None)?;
        info!(run_id = %run.id, evidence = evidence.len(), "discovery complete");
        Ok(DiscoveryResult {
            evidence: evidence.iter().map(evidence_ref).collect(),
        })
    }

    /// `run_planning_phase`: converts the research question and the
    /// discovered evidence into analysis sub-queries.
    ///
    /// Asks the model for a plan; falls back to a heuristic plan when
    /// the response does not parse.
    ///
    /// # Errors
    ///
    /// Returns an error if the LLM call itself fails.
    pub async fn run_planning_phase(
        &self,
        run: &ResearchRun,
        discovery: &DiscoveryResult,
    ) -> Result<AnalysisPlan> {
        let base_query = run.query.clone().unwrap_or_else(|| "key facts and events".to_string());

        let inventory: Vec<String> = discovery
            .evidence
            .iter()
            .map(|e| format!("- {} ({})", e.filename, e.kind.as_str()))
            .collect();
        let prompt = format!(
            "Research question: {base_query}\n{}Evidence inventory:\n{}\n\n\
             Respond with JSON: {{\"sub_queries\": [\"...\"]}} listing at most \
             {MAX_SUB_QUERIES} focused search queries.",
            run.defense_theory
                .as_ref()
                .map(|t| format!("Defense theory: {t}\n"))
                .unwrap_or_default(),
            inventory.join("\n"),
        );

        let request = ChatRequest::new(
            self.config.model.clone(),
            vec![
                system_message("You are a legal research planner. Respond only with JSON."),
                user_message(&prompt),
            ],
        )
        .with_json_mode();

        let lease = self.governor.acquire(true, None).await?;
        let response = self.provider.chat(&request).await;
        drop(lease);

        let mut sub_queries = match response {
            Ok(r) => serde_json::from_str::<RawPlan>(&r.content)
                .map(|p| p.sub_queries)
                .unwrap_or_default(),
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "planning model unavailable, using heuristic plan");
                Vec::new()
            }
        };

        sub_queries.retain(|q| !q.trim().is_empty());
        if sub_queries.is_empty() {
            sub_queries = vec![
                base_query.clone(),
                format!("timeline of events related to {base_query}"),
                format!("contradictions and inconsistencies about {base_query}"),
            ];
        }
        sub_queries.truncate(MAX_SUB_QUERIES);

        debug!(run_id = %run.id, queries = sub_queries.len(), "analysis plan ready");
        Ok(AnalysisPlan { sub_queries })
    }

    /// One typed analysis activity of the fan-out
    /// (`run_document_analysis`, `run_transcript_analysis`, or
    /// `run_communication_analysis` depending on `kind`).
    ///
    /// Retrieves the most relevant chunks for each sub-query and asks
    /// the model to extract typed, scored findings from them. LLM calls
    /// run under a governor permit.
    ///
    /// # Errors
    ///
    /// Returns an error when retrieval or the LLM call fails;
    /// unparseable model output is counted, not fatal.
    pub async fn run_analysis(
        &self,
        run: &ResearchRun,
        kind: EvidenceKind,
        plan: &AnalysisPlan,
    ) -> Result<AnalysisOutput> {
        let mut chunks: Vec<(String, Uuid, String)> = Vec::new();
        for sub_query in &plan.sub_queries {
            let mut request = SearchRequest::new(sub_query.clone());
            request.filter = SearchFilter::for_case(run.case_id);
            request.evidence_kind = Some(kind);
            request.top_k = CHUNKS_PER_QUERY;
            let results = self.retriever.search(&request).await?;
            for hit in results.results {
                if chunks.iter().all(|(id, _, _)| *id != hit.chunk_id) {
                    chunks.push((hit.chunk_id, hit.evidence_id, hit.text));
                }
            }
            if chunks.len() >= MAX_CHUNKS_PER_KIND {
                chunks.truncate(MAX_CHUNKS_PER_KIND);
                break;
            }
        }

        if chunks.is_empty() {
            debug!(run_id = %run.id, kind = kind.as_str(), "no chunks to analyze");
            return Ok(AnalysisOutput::default());
        }

        let excerpt_list: Vec<String> = chunks
            .iter()
            .enumerate()
            .map(|(i, (id, _, text))| format!("[{i}] ({id}) {text}"))
            .collect();
        let prompt = format!(
            "Analyze these {} excerpts for the question: {}\n\n{}\n\n\
             Respond with JSON: {{\"findings\": [{{\"finding_type\": \
             \"fact|quote|timeline_event|contradiction|pattern|relationship\", \
             \"text\": \"...\", \"entities\": [\"...\"], \"confidence\": 0.0, \
             \"relevance\": 0.0, \"event_time\": \"RFC3339 or null\"}}]}}",
            kind.as_str(),
            run.query.as_deref().unwrap_or("key facts and events"),
            excerpt_list.join("\n"),
        );

        let request = ChatRequest::new(
            self.config.model.clone(),
            vec![
                system_message(
                    "You are a legal evidence analyst. Extract only claims supported by the \
                     excerpts. Respond only with JSON.",
                ),
                user_message(&prompt),
            ],
        )
        .with_json_mode();

        let lease = self.governor.acquire(true, None).await?;
        let response = self.provider.chat(&request).await?;
        drop(lease);

        let (findings, parse_failures) = parse_findings(run.id, &response.content, &chunks);
        info!(
            run_id = %run.id,
            kind = kind.as_str(),
            findings = findings.len(),
            parse_failures,
            "analysis activity complete"
        );
        Ok(AnalysisOutput {
            findings,
            parse_failures,
        })
    }

    /// `run_correlation_phase`: cross-evidence synthesis over all
    /// findings collected so far.
    ///
    /// # Errors
    ///
    /// Returns an error if findings cannot be loaded or embedding
    /// fails.
    pub fn run_correlation_phase(&self, run: &ResearchRun) -> Result<CorrelationResult> {
        let findings = self.records.findings_for_run(run.id)?;
        correlate(run.case_id, &findings, self.embedder.as_ref())
    }

    /// `run_synthesis_phase`: produces the executive summary and
    /// structured sections.
    ///
    /// # Errors
    ///
    /// Returns an error if findings cannot be loaded; model failures
    /// fall back to a deterministic synthesis.
    pub async fn run_synthesis_phase(
        &self,
        run: &ResearchRun,
        correlation: &CorrelationResult,
    ) -> Result<SynthesisOutput> {
        let findings = self.records.findings_for_run(run.id)?;

        let findings_digest: Vec<String> = findings
            .iter()
            .take(40)
            .map(|f| format!("- [{}] {}", f.finding_type.as_str(), f.text))
            .collect();
        let prompt = format!(
            "Synthesize a research dossier for the question: {}\n\nFindings:\n{}\n\n\
             Contradictions: {}\nPatterns: {}\n\n\
             Respond with JSON: {{\"executive_summary\": \"...\", \
             \"sections\": [{{\"title\": \"...\", \"content\": \"...\"}}]}}",
            run.query.as_deref().unwrap_or("key facts and events"),
            findings_digest.join("\n"),
            correlation.contradictions.len(),
            correlation.key_patterns.join("; "),
        );

        let request = ChatRequest::new(
            self.config.model.clone(),
            vec![
                system_message("You are a legal writer. Respond only with JSON."),
                user_message(&prompt),
            ],
        )
        .with_json_mode();

        let lease = self.governor.acquire(true, None).await?;
        let response = self.provider.chat(&request).await;
        drop(lease);

        let parsed = response
            .ok()
            .and_then(|r| serde_json::from_str::<RawSynthesis>(&r.content).ok());

        let output = parsed.map_or_else(
            || fallback_synthesis(&findings, correlation),
            |raw| SynthesisOutput {
                executive_summary: raw.executive_summary,
                sections: raw
                    .sections
                    .into_iter()
                    .enumerate()
                    .map(|(order, s)| DossierSection {
                        title: s.title,
                        content: s.content,
                        order,
                        metadata: Default::default(),
                    })
                    .collect(),
            },
        );
        Ok(output)
    }

    /// `generate_report_files`: assembles and persists the dossier and
    /// renders the markdown artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the dossier cannot be persisted or written.
    pub fn generate_report_files(
        &self,
        run: &ResearchRun,
        synthesis: &SynthesisOutput,
    ) -> Result<ReportOutput> {
        let findings = self.records.findings_for_run(run.id)?;
        let appendix = citations_appendix(&findings);

        let mut dossier = crate::core::Dossier::assemble(
            run.id,
            synthesis.executive_summary.clone(),
            synthesis.sections.clone(),
            appendix,
        );

        let dossier_dir = self.config.dossier_dir();
        std::fs::create_dir_all(&dossier_dir)?;
        let path = dossier_dir.join(format!("{}.md", run.id));
        std::fs::write(&path, render_markdown(&dossier))?;
        dossier.file_paths = vec![path.to_string_lossy().into_owned()];

        self.records.save_dossier(&dossier)?;
        info!(run_id = %run.id, words = dossier.word_count, "dossier generated");
        Ok(ReportOutput {
            file_paths: dossier.file_paths,
            word_count: dossier.word_count,
        })
    }
}

fn evidence_ref(evidence: &Evidence) -> EvidenceRef {
    EvidenceRef {
        id: evidence.id,
        kind: evidence.kind,
        filename: evidence.filename.clone(),
    }
}

/// Parses the model's finding list, clamping scores and attaching
/// citations to the analyzed chunks. Unparseable entries are counted.
fn parse_findings(
    run_id: Uuid,
    content: &str,
    chunks: &[(String, Uuid, String)],
) -> (Vec<Finding>, usize) {
    let Ok(raw) = serde_json::from_str::<RawFindingList>(content) else {
        return (Vec::new(), 1);
    };

    let mut findings = Vec::new();
    let mut failures = 0;
    for item in raw.findings {
        let finding_type = item
            .finding_type
            .parse::<FindingType>()
            .unwrap_or(FindingType::Fact);
        let confidence = item.confidence.clamp(0.0, 1.0);
        let relevance = item.relevance.clamp(0.0, 1.0);

        let Ok(mut finding) = Finding::new(run_id, finding_type, &item.text, confidence, relevance)
        else {
            failures += 1;
            continue;
        };
        finding = finding.with_entities(item.entities);
        if let Some(at) = item
            .event_time
            .as_deref()
            .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
        {
            finding = finding.with_event_time(at.with_timezone(&chrono::Utc));
        }

        // Cite the chunks whose text supports the claim; fall back to
        // the whole analyzed batch when no overlap is found.
        let mut citations: Vec<Citation> = chunks
            .iter()
            .filter(|(_, _, text)| supports(text, &item.text))
            .map(|(chunk_id, evidence_id, text)| {
                Citation::new(chunk_id.clone(), *evidence_id, 0, text.chars().count(), text.as_str())
            })
            .collect();
        if citations.is_empty() {
            citations = chunks
                .iter()
                .map(|(chunk_id, evidence_id, text)| {
                    Citation::new(chunk_id.clone(), *evidence_id, 0, text.chars().count(), text.as_str())
                })
                .collect();
        }
        finding = finding.with_citations(citations);
        findings.push(finding);
    }
    (findings, failures)
}

/// Cheap support check: the chunk and the claim share a content word.
fn supports(chunk_text: &str, claim: &str) -> bool {
    let chunk_lower = chunk_text.to_lowercase();
    claim
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 5)
        .any(|w| chunk_lower.contains(w))
}

/// Deterministic synthesis used when the model is unavailable or
/// unparseable.
fn fallback_synthesis(findings: &[Finding], correlation: &CorrelationResult) -> SynthesisOutput {
    let summary = format!(
        "Research produced {} findings, {} timeline events, {} contradictions, and {} patterns.",
        findings.len(),
        correlation.timeline.len(),
        correlation.contradictions.len(),
        correlation.key_patterns.len(),
    );

    let mut sections = Vec::new();
    let key_findings: Vec<String> = findings
        .iter()
        .take(20)
        .map(|f| format!("- {}", f.text))
        .collect();
    sections.push(DossierSection {
        title: "Key Findings".to_string(),
        content: key_findings.join("\n"),
        order: 0,
        metadata: Default::default(),
    });
    if !correlation.timeline.is_empty() {
        let events: Vec<String> = correlation
            .timeline
            .iter()
            .map(|e| format!("- {}: {}", e.timestamp.format("%Y-%m-%d"), e.description))
            .collect();
        sections.push(DossierSection {
            title: "Timeline".to_string(),
            content: events.join("\n"),
            order: 1,
            metadata: Default::default(),
        });
    }
    if !correlation.contradictions.is_empty() {
        let items: Vec<String> = correlation
            .contradictions
            .iter()
            .map(|c| format!("- {}", c.description))
            .collect();
        sections.push(DossierSection {
            title: "Contradictions".to_string(),
            content: items.join("\n"),
            order: 2,
            metadata: Default::default(),
        });
    }

    SynthesisOutput {
        executive_summary: summary,
        sections,
    }
}

/// Renders the citations appendix from finding citations.
fn citations_appendix(findings: &[Finding]) -> String {
    let mut lines = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for finding in findings {
        for citation in &finding.citations {
            if seen.insert(citation.chunk_id.clone()) {
                let snippet: String = citation.snippet.chars().take(120).collect();
                lines.push(format!("[{}] {snippet}", citation.chunk_id));
            }
        }
    }
    lines.join("\n")
}

/// Renders the dossier as markdown.
fn render_markdown(dossier: &crate::core::Dossier) -> String {
    let mut out = String::new();
    out.push_str("# Research Dossier\n\n## Executive Summary\n\n");
    out.push_str(&dossier.executive_summary);
    out.push('\n');
    for section in &dossier.sections {
        out.push_str(&format!("\n## {}\n\n{}\n", section.title, section.content));
    }
    if !dossier.citations_appendix.is_empty() {
        out.push_str("\n## Citations\n\n");
        out.push_str(&dossier.citations_appendix);
        out.push('\n');
    }
    out
}
