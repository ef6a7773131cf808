//! Command execution: wires CLI arguments to platform services.

use std::str::FromStr;

use serde_json::json;
use uuid::Uuid;

use crate::chunking::{EvidenceChunker, embed_chunks};
use crate::cli::{Cli, Commands, OutputFormat, ResearchCommands};
use crate::config::PlatformConfig;
use crate::core::{Case, Evidence, EvidenceKind, EvidenceStatus};
use crate::index::IndexPayload;
use crate::platform::Platform;
use crate::query::{
    GetDossierQuery, GetFindingsQuery, GetResearchStatusQuery, GetTimelineQuery,
    ListResearchRunsQuery, SearchEvidenceQuery,
};
use crate::research::Signal;
use crate::search::SearchMode;
use crate::{Error, Result};

/// Executes a parsed command against a freshly initialized platform.
///
/// # Errors
///
/// Returns an error for invalid arguments or failing backends.
pub async fn execute(cli: &Cli) -> Result<String> {
    let mut builder = PlatformConfig::builder().from_env()?;
    if let Some(dir) = &cli.data_dir {
        builder = builder.data_dir(dir.clone());
    }
    let config = builder.build()?;
    let platform = Platform::init(config)?;

    dispatch(&platform, cli).await
}

async fn dispatch(platform: &Platform, cli: &Cli) -> Result<String> {
    let format = cli.format;
    match &cli.command {
        Commands::Init => ensure_indexes(platform, format, false).await,

        Commands::Index { recreate } => ensure_indexes(platform, format, *recreate).await,

        Commands::CaseNew { number, client, matter } => {
            let case = Case::new(number.clone(), client.clone(), matter.clone())?;
            platform.records().create_case(&case)?;
            Ok(render(
                format,
                &json!({"id": case.id, "case_number": &case.case_number}),
                || format!("created case {} ({})", case.case_number, case.id),
            ))
        }

        Commands::Ingest { case_number, kind, file } => {
            let kind = EvidenceKind::from_str(kind)?;
            let case = find_case(platform, case_number)?;
            let report = ingest(platform, &case, kind, file).await?;
            Ok(render(format, &json!(&report), || {
                format!(
                    "ingested {} chunks from {} (success={})",
                    report.1, report.0, report.2
                )
            }))
        }

        Commands::Search { query, case_number, top_k, mode, rerank } => {
            let mut q = SearchEvidenceQuery::new(query.clone());
            if let Some(number) = case_number {
                q.case_ids = vec![find_case(platform, number)?.id];
            }
            q.top_k = *top_k;
            q.mode = parse_mode(mode)?;
            q.rerank = *rerank;
            let result = platform.bus().execute(q).await?;
            Ok(render(format, &json!(&result), || {
                let mut lines = vec![format!("{} results in {}ms", result.total, result.took_ms)];
                for w in &result.warnings {
                    lines.push(format!("warning: {w}"));
                }
                for r in &result.results {
                    lines.push(format!(
                        "{:.4}  [{}] {}",
                        r.score,
                        r.chunk_id,
                        first_line(&r.text, 100)
                    ));
                }
                lines.join("\n")
            }))
        }

        Commands::Research(cmd) => research(platform, format, cmd).await,

        Commands::Runs { case_number } => {
            let case = find_case(platform, case_number)?;
            let result = platform
                .bus()
                .execute(ListResearchRunsQuery::new(case.id))
                .await?;
            Ok(render(format, &json!(&result), || {
                result
                    .runs
                    .iter()
                    .map(|r| {
                        format!(
                            "{}  {}  {}  {:.0}%",
                            r.research_run_id, r.status, r.phase, r.progress_pct
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }))
        }

        Commands::Findings { run_id, min_confidence } => {
            let mut q = GetFindingsQuery::new(*run_id);
            q.min_confidence = *min_confidence;
            let result = platform.bus().execute(q).await?;
            Ok(render(format, &json!(&result), || {
                result
                    .findings
                    .iter()
                    .map(|f| {
                        format!(
                            "[{}] c={:.2} r={:.2}  {}",
                            f.finding_type, f.confidence, f.relevance, f.text
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }))
        }

        Commands::Timeline { case_number } => {
            let case = find_case(platform, case_number)?;
            let result = platform
                .bus()
                .execute(GetTimelineQuery::new(case.id))
                .await?;
            Ok(render(format, &json!(&result), || {
                result
                    .events
                    .iter()
                    .map(|e| {
                        format!(
                            "{}  [{}] {}",
                            e.timestamp.format("%Y-%m-%d %H:%M"),
                            e.event_type,
                            e.description
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }))
        }

        Commands::Dossier { run_id } => {
            let result = platform
                .bus()
                .execute(GetDossierQuery {
                    research_run_id: *run_id,
                })
                .await?;
            Ok(render(format, &json!(&result), || {
                let mut lines = vec![
                    format!("dossier {} ({} words)", result.id, result.word_count),
                    String::new(),
                    result.executive_summary.clone(),
                ];
                for section in &result.sections {
                    lines.push(format!("\n# {}\n{}", section.title, section.content));
                }
                lines.join("\n")
            }))
        }

        Commands::Reap => {
            let report = platform.reaper().sweep().await?;
            Ok(render(
                format,
                &json!({
                    "scanned": report.scanned,
                    "orphaned_evidence": report.orphaned_evidence,
                    "vector_points_removed": report.vector_points_removed,
                    "lexical_docs_removed": report.lexical_docs_removed,
                }),
                || {
                    format!(
                        "scanned {} points, reaped {} orphaned evidence ({} vectors, {} docs)",
                        report.scanned,
                        report.orphaned_evidence,
                        report.vector_points_removed,
                        report.lexical_docs_removed
                    )
                },
            ))
        }

        Commands::Health => {
            let health = platform.lifecycle().health().await?;
            let workflow_ok = platform.workflow().health_check();
            Ok(render(
                format,
                &json!({"workflow": workflow_ok, "indexes": &health}),
                || {
                    let mut lines = vec![format!("workflow: {}", if workflow_ok { "ok" } else { "down" })];
                    for (index, backend) in &health {
                        lines.push(format!(
                            "{index}: vector[exists={} docs={}] lexical[exists={} docs={}]",
                            backend.vector.exists,
                            backend.vector.doc_count,
                            backend.lexical.exists,
                            backend.lexical.doc_count
                        ));
                    }
                    lines.join("\n")
                },
            ))
        }
    }
}

async fn research(
    platform: &Platform,
    format: OutputFormat,
    cmd: &ResearchCommands,
) -> Result<String> {
    match cmd {
        ResearchCommands::Start { case_number, query, theory } => {
            let case = find_case(platform, case_number)?;
            let run = platform
                .workflow()
                .start(case.id, query.clone(), theory.clone())?;
            let outcome = platform.workflow().drive(run.id).await?;
            Ok(render(
                format,
                &json!({
                    "research_run_id": run.id,
                    "workflow_id": run.workflow_id,
                    "outcome": format!("{outcome:?}"),
                }),
                || format!("run {} finished: {outcome:?}", run.id),
            ))
        }
        ResearchCommands::Drive { run_id } => {
            let outcome = platform.workflow().drive(*run_id).await?;
            Ok(render(
                format,
                &json!({"research_run_id": run_id, "outcome": format!("{outcome:?}")}),
                || format!("run {run_id} finished: {outcome:?}"),
            ))
        }
        ResearchCommands::Status { run_id } => {
            let status = platform
                .bus()
                .execute(GetResearchStatusQuery {
                    research_run_id: *run_id,
                })
                .await?;
            Ok(render(format, &json!(&status), || {
                format!(
                    "{}  {}  {}  {:.0}%  findings={} citations={}",
                    status.research_run_id,
                    status.status,
                    status.phase,
                    status.progress_pct,
                    status.findings_count,
                    status.citations_count
                )
            }))
        }
        ResearchCommands::Cancel { run_id } => signal(platform, format, *run_id, Signal::Cancel),
        ResearchCommands::Pause { run_id } => signal(platform, format, *run_id, Signal::Pause),
        ResearchCommands::Resume { run_id } => signal(platform, format, *run_id, Signal::Resume),
    }
}

fn signal(platform: &Platform, format: OutputFormat, run_id: Uuid, signal: Signal) -> Result<String> {
    platform.workflow().signal(run_id, signal)?;
    Ok(render(
        format,
        &json!({"research_run_id": run_id, "signal": signal.as_str()}),
        || format!("{} signal enqueued for {run_id}", signal.as_str()),
    ))
}

/// Ingests one evidence file: chunk, embed, dual-store write.
///
/// Returns `(filename, chunks_written, success)`.
async fn ingest(
    platform: &Platform,
    case: &Case,
    kind: EvidenceKind,
    file: &std::path::Path,
) -> Result<(String, usize, bool)> {
    let text = crate::io::read_evidence_file(file)?;
    let filename = file
        .file_name()
        .map_or_else(|| file.to_string_lossy().into_owned(), |f| f.to_string_lossy().into_owned());

    let mut evidence = Evidence::new(case.id, kind, filename.clone(), text.len() as u64);
    evidence.status = EvidenceStatus::Processing;
    if kind == EvidenceKind::Transcript {
        evidence.segments = segments_from_lines(&text);
    }
    platform.records().add_evidence(&evidence)?;

    let chunker = EvidenceChunker::default();
    let chunks = match kind {
        EvidenceKind::Document => chunker.chunk_document(evidence.id, case.id, &text),
        EvidenceKind::Transcript => {
            chunker.chunk_transcript(evidence.id, case.id, &evidence.segments)
        }
        EvidenceKind::Communication => chunker.chunk_communication(evidence.id, case.id, &text),
    };

    let embedder = platform.embedder();
    let embeddings = embed_chunks(embedder.as_ref(), evidence.summary.as_deref().unwrap_or(""), &chunks)?;
    let payload = IndexPayload {
        evidence_kind: kind,
        case_id: case.id,
        evidence_id: evidence.id,
        chunks,
        embeddings,
    };
    let report = platform.writer().write(&payload).await?;

    let status = if report.success {
        EvidenceStatus::Completed
    } else {
        EvidenceStatus::Failed
    };
    platform.records().set_evidence_status(evidence.id, status)?;

    Ok((filename, report.documents_written, report.success))
}

/// Idempotently creates the domain indexes in both stores; with
/// `recreate`, drops and rebuilds them.
async fn ensure_indexes(
    platform: &Platform,
    format: OutputFormat,
    recreate: bool,
) -> Result<String> {
    let outcomes = platform.lifecycle().create_all_indexes(recreate).await?;
    let lines: Vec<String> = outcomes
        .iter()
        .map(|(index, outcome)| format!("{index}: {outcome:?}"))
        .collect();
    Ok(render(format, &json!({"indexes": &lines}), || lines.join("\n")))
}

/// Transcript files without timing metadata arrive one utterance per
/// line; synthesize whole-second segments so downstream citation by
/// segment keeps working.
fn segments_from_lines(text: &str) -> Vec<crate::core::TranscriptSegment> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(i, line)| crate::core::TranscriptSegment {
            id: Uuid::new_v4(),
            start_s: i as f64,
            end_s: (i + 1) as f64,
            text: line.to_string(),
            speaker_id: None,
            confidence: None,
            highlights: Vec::new(),
        })
        .collect()
}

fn find_case(platform: &Platform, case_number: &str) -> Result<Case> {
    platform
        .records()
        .get_case_by_number(case_number)?
        .ok_or_else(|| Error::not_found("case", case_number))
}

fn parse_mode(mode: &str) -> Result<SearchMode> {
    match mode {
        "hybrid" => Ok(SearchMode::Hybrid),
        "dense" => Ok(SearchMode::DenseOnly),
        "lexical" | "bm25" => Ok(SearchMode::LexicalOnly),
        other => Err(Error::validation(format!("unknown search mode: {other}"))),
    }
}

fn render<F: FnOnce() -> String>(
    format: OutputFormat,
    json_value: &serde_json::Value,
    text: F,
) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(json_value).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Text => text(),
    }
}

fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    line.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("hybrid").unwrap(), SearchMode::Hybrid);
        assert_eq!(parse_mode("dense").unwrap(), SearchMode::DenseOnly);
        assert_eq!(parse_mode("bm25").unwrap(), SearchMode::LexicalOnly);
        assert!(parse_mode("quantum").is_err());
    }

    #[test]
    fn test_first_line_truncates() {
        assert_eq!(first_line("alpha beta\ngamma", 5), "alpha");
        assert_eq!(first_line("", 5), "");
    }

    #[test]
    fn test_render_json() {
        let out = render(OutputFormat::Json, &json!({"a": 1}), || "text".to_string());
        assert!(out.contains("\"a\": 1"));
        let out = render(OutputFormat::Text, &json!({"a": 1}), || "text".to_string());
        assert_eq!(out, "text");
    }
}
