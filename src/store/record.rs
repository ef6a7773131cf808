//! SQLite system of record.
//!
//! Authoritative storage for cases, evidence, research runs, findings,
//! the knowledge graph, the timeline, dossiers, and the durable
//! workflow journal. Each operation is its own unit of work; there are
//! no cross-request sessions.

// SQLite stores all integers as i64. These casts are intentional and
// safe because we only store non-negative values that fit in usize.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::core::{
    Case, CaseStatus, Dossier, DossierSection, Evidence, EvidenceKind, EvidenceStatus, Finding,
    GraphNode, GraphRelationship, ResearchPhase, ResearchRun, ResearchStatus, TimelineEvent,
    TranscriptSegment,
};
use crate::error::StoreError;
use crate::store::schema::{
    CURRENT_SCHEMA_VERSION, READ_VERSION_SQL, RECORD_SCHEMA_SQL, SCHEMA_PROBE_SQL,
    STAMP_VERSION_SQL,
};
use crate::{Error, Result};

/// Trait for the authoritative record backend.
///
/// Methods take `&self`; implementations are internally synchronized so
/// async handlers can share one instance behind an `Arc`.
pub trait RecordStore: Send + Sync {
    /// Initializes the schema. Idempotent.
    fn init(&self) -> Result<()>;

    /// Checks whether the schema has been initialized.
    fn is_initialized(&self) -> Result<bool>;

    // ==================== Cases ====================

    /// Inserts a case. Case numbers are globally unique.
    fn create_case(&self, case: &Case) -> Result<()>;

    /// Fetches a case by id.
    fn get_case(&self, id: Uuid) -> Result<Option<Case>>;

    /// Fetches a case by its unique case number.
    fn get_case_by_number(&self, case_number: &str) -> Result<Option<Case>>;

    // ==================== Evidence ====================

    /// Inserts an evidence record (with transcript segments, if any).
    fn add_evidence(&self, evidence: &Evidence) -> Result<()>;

    /// Fetches evidence by id.
    fn get_evidence(&self, id: Uuid) -> Result<Option<Evidence>>;

    /// Lists evidence in a case, optionally by kind.
    fn list_evidence(&self, case_id: Uuid, kind: Option<EvidenceKind>) -> Result<Vec<Evidence>>;

    /// Updates the processing status of an evidence record.
    fn set_evidence_status(&self, id: Uuid, status: EvidenceStatus) -> Result<()>;

    /// Whether the evidence exists (used by the orphan reaper).
    fn evidence_exists(&self, id: Uuid) -> Result<bool>;

    // ==================== Research runs ====================

    /// Inserts or replaces a research run.
    fn save_run(&self, run: &ResearchRun) -> Result<()>;

    /// Fetches a research run by id.
    fn get_run(&self, id: Uuid) -> Result<Option<ResearchRun>>;

    /// Lists runs for a case, newest first, with total count.
    fn list_runs(
        &self,
        case_id: Uuid,
        status: Option<ResearchStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ResearchRun>, usize)>;

    // ==================== Findings ====================

    /// Inserts findings produced by a run.
    fn add_findings(&self, findings: &[Finding]) -> Result<()>;

    /// All findings for a run (filtering/sorting happens in handlers).
    fn findings_for_run(&self, run_id: Uuid) -> Result<Vec<Finding>>;

    // ==================== Graph ====================

    /// Replaces the case's knowledge graph.
    fn save_graph(
        &self,
        case_id: Uuid,
        nodes: &[GraphNode],
        relationships: &[GraphRelationship],
    ) -> Result<()>;

    /// Loads the case's knowledge graph.
    fn graph_for_case(&self, case_id: Uuid) -> Result<(Vec<GraphNode>, Vec<GraphRelationship>)>;

    // ==================== Timeline ====================

    /// Replaces the case timeline.
    fn save_timeline(&self, case_id: Uuid, events: &[TimelineEvent]) -> Result<()>;

    /// Loads the case timeline, sorted ascending by timestamp.
    fn timeline_for_case(&self, case_id: Uuid) -> Result<Vec<TimelineEvent>>;

    // ==================== Dossiers ====================

    /// Inserts or replaces the dossier for a run.
    fn save_dossier(&self, dossier: &Dossier) -> Result<()>;

    /// Fetches the dossier for a run.
    fn dossier_for_run(&self, run_id: Uuid) -> Result<Option<Dossier>>;

    // ==================== Workflow journal ====================

    /// Returns the recorded payload of a completed activity, if any.
    fn journal_get(&self, run_id: Uuid, activity: &str) -> Result<Option<String>>;

    /// Records an activity result. Idempotent per `(run_id, activity)`.
    fn journal_put(&self, run_id: Uuid, activity: &str, payload: &str) -> Result<()>;

    // ==================== Workflow signals ====================

    /// Enqueues a signal for a run.
    fn signal_push(&self, run_id: Uuid, signal: &str) -> Result<()>;

    /// Drains pending signals for a run, in arrival order.
    fn signals_take(&self, run_id: Uuid) -> Result<Vec<String>>;
}

/// SQLite-backed [`RecordStore`].
pub struct SqliteRecords {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteRecords {
    /// Opens or creates the record database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Database(e.to_string()))?;
            }
        }
        let conn = Connection::open(&path).map_err(StoreError::from)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StoreError::from)?;
        let _: String = conn
            .query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))
            .map_err(StoreError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Creates an in-memory record database. Useful for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StoreError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store(StoreError::Database("connection mutex poisoned".into())))
    }

    fn parse_time(s: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::Store(StoreError::Serialization(format!("bad timestamp: {e}"))))
    }

    fn parse_uuid(s: &str) -> Result<Uuid> {
        Uuid::parse_str(s)
            .map_err(|e| Error::Store(StoreError::Serialization(format!("bad uuid: {e}"))))
    }

    fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRun> {
        Ok(RawRun {
            id: row.get(0)?,
            case_id: row.get(1)?,
            query: row.get(2)?,
            defense_theory: row.get(3)?,
            status: row.get(4)?,
            phase: row.get(5)?,
            started_at: row.get(6)?,
            completed_at: row.get(7)?,
            workflow_id: row.get(8)?,
            errors: row.get(9)?,
            metadata: row.get(10)?,
        })
    }
}

/// Row image of a research run before JSON/enum decoding.
struct RawRun {
    id: String,
    case_id: String,
    query: Option<String>,
    defense_theory: Option<String>,
    status: String,
    phase: String,
    started_at: String,
    completed_at: Option<String>,
    workflow_id: Option<String>,
    errors: String,
    metadata: String,
}

impl RawRun {
    fn decode(self) -> Result<ResearchRun> {
        Ok(ResearchRun {
            id: SqliteRecords::parse_uuid(&self.id)?,
            case_id: SqliteRecords::parse_uuid(&self.case_id)?,
            query: self.query,
            defense_theory: self.defense_theory,
            status: ResearchStatus::from_str(&self.status)?,
            phase: ResearchPhase::from_str(&self.phase)?,
            started_at: SqliteRecords::parse_time(&self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(SqliteRecords::parse_time)
                .transpose()?,
            workflow_id: self.workflow_id,
            errors: serde_json::from_str(&self.errors).map_err(StoreError::from)?,
            metadata: serde_json::from_str(&self.metadata).map_err(StoreError::from)?,
        })
    }
}

const RUN_COLUMNS: &str = "id, case_id, query, defense_theory, status, phase, started_at, \
                           completed_at, workflow_id, errors, metadata";

impl RecordStore for SqliteRecords {
    fn init(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(RECORD_SCHEMA_SQL)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        conn.execute(STAMP_VERSION_SQL, params![i64::from(CURRENT_SCHEMA_VERSION)])
            .map_err(StoreError::from)?;
        Ok(())
    }

    fn is_initialized(&self) -> Result<bool> {
        let conn = self.lock()?;
        let marker_present: i64 = conn
            .query_row(SCHEMA_PROBE_SQL, [], |row| row.get(0))
            .map_err(StoreError::from)?;
        if marker_present == 0 {
            return Ok(false);
        }
        // The marker table alone is not enough: an interrupted
        // bootstrap leaves it unstamped.
        let version: Option<i64> = conn
            .query_row(READ_VERSION_SQL, [], |row| row.get(0))
            .map_err(StoreError::from)?;
        Ok(version.is_some())
    }

    fn create_case(&self, case: &Case) -> Result<()> {
        let conn = self.lock()?;
        let result = conn.execute(
            "INSERT INTO cases (id, case_number, client, matter_type, status, team_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                case.id.to_string(),
                case.case_number,
                case.client,
                case.matter_type,
                case.status.as_str(),
                case.team_id.map(|t| t.to_string()),
                case.created_at.to_rfc3339(),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(Error::Store(StoreError::DuplicateCaseNumber {
                    case_number: case.case_number.clone(),
                }))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_case(&self, id: Uuid) -> Result<Option<Case>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, case_number, client, matter_type, status, team_id, created_at
                 FROM cases WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(StoreError::from)?;

        row.map(|(id, case_number, client, matter_type, status, team_id, created_at)| {
            Ok(Case {
                id: Self::parse_uuid(&id)?,
                case_number,
                client,
                matter_type,
                status: CaseStatus::from_str(&status)?,
                team_id: team_id.as_deref().map(Self::parse_uuid).transpose()?,
                created_at: Self::parse_time(&created_at)?,
            })
        })
        .transpose()
    }

    fn get_case_by_number(&self, case_number: &str) -> Result<Option<Case>> {
        let id: Option<String> = {
            let conn = self.lock()?;
            conn.query_row(
                "SELECT id FROM cases WHERE case_number = ?1",
                params![case_number],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)?
        };
        match id {
            Some(id) => self.get_case(Self::parse_uuid(&id)?),
            None => Ok(None),
        }
    }

    fn add_evidence(&self, evidence: &Evidence) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        tx.execute(
            "INSERT INTO evidence (id, case_id, kind, filename, size_bytes, status, summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                evidence.id.to_string(),
                evidence.case_id.to_string(),
                evidence.kind.as_str(),
                evidence.filename,
                evidence.size_bytes as i64,
                evidence.status.as_str(),
                evidence.summary,
                evidence.created_at.to_rfc3339(),
            ],
        )
        .map_err(StoreError::from)?;
        for segment in &evidence.segments {
            tx.execute(
                "INSERT INTO transcript_segments
                 (id, evidence_id, start_s, end_s, text, speaker_id, confidence, highlights)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    segment.id.to_string(),
                    evidence.id.to_string(),
                    segment.start_s,
                    segment.end_s,
                    segment.text,
                    segment.speaker_id,
                    segment.confidence,
                    serde_json::to_string(&segment.highlights).map_err(StoreError::from)?,
                ],
            )
            .map_err(StoreError::from)?;
        }
        tx.commit()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok(())
    }

    fn get_evidence(&self, id: Uuid) -> Result<Option<Evidence>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, case_id, kind, filename, size_bytes, status, summary, created_at
                 FROM evidence WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()
            .map_err(StoreError::from)?;

        let Some((id_s, case_id, kind, filename, size, status, summary, created_at)) = row else {
            return Ok(None);
        };

        let mut segments = Vec::new();
        {
            let mut stmt = conn
                .prepare(
                    "SELECT id, start_s, end_s, text, speaker_id, confidence, highlights
                     FROM transcript_segments WHERE evidence_id = ?1 ORDER BY start_s",
                )
                .map_err(StoreError::from)?;
            let rows = stmt
                .query_map(params![id_s], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<f64>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                })
                .map_err(StoreError::from)?;
            for row in rows {
                let (sid, start_s, end_s, text, speaker_id, confidence, highlights) =
                    row.map_err(StoreError::from)?;
                segments.push(TranscriptSegment {
                    id: Self::parse_uuid(&sid)?,
                    start_s,
                    end_s,
                    text,
                    speaker_id,
                    confidence,
                    highlights: highlights
                        .as_deref()
                        .map(serde_json::from_str)
                        .transpose()
                        .map_err(StoreError::from)?
                        .unwrap_or_default(),
                });
            }
        }

        Ok(Some(Evidence {
            id: Self::parse_uuid(&id_s)?,
            case_id: Self::parse_uuid(&case_id)?,
            kind: EvidenceKind::from_str(&kind)?,
            filename,
            size_bytes: size as u64,
            status: EvidenceStatus::from_str(&status)?,
            segments,
            summary,
            created_at: Self::parse_time(&created_at)?,
        }))
    }

    fn list_evidence(&self, case_id: Uuid, kind: Option<EvidenceKind>) -> Result<Vec<Evidence>> {
        let ids: Vec<String> = {
            let conn = self.lock()?;
            let mut out = Vec::new();
            match kind {
                Some(kind) => {
                    let mut stmt = conn
                        .prepare(
                            "SELECT id FROM evidence WHERE case_id = ?1 AND kind = ?2
                             ORDER BY created_at",
                        )
                        .map_err(StoreError::from)?;
                    let rows = stmt
                        .query_map(params![case_id.to_string(), kind.as_str()], |row| {
                            row.get::<_, String>(0)
                        })
                        .map_err(StoreError::from)?;
                    for row in rows {
                        out.push(row.map_err(StoreError::from)?);
                    }
                }
                None => {
                    let mut stmt = conn
                        .prepare("SELECT id FROM evidence WHERE case_id = ?1 ORDER BY created_at")
                        .map_err(StoreError::from)?;
                    let rows = stmt
                        .query_map(params![case_id.to_string()], |row| row.get::<_, String>(0))
                        .map_err(StoreError::from)?;
                    for row in rows {
                        out.push(row.map_err(StoreError::from)?);
                    }
                }
            }
            out
        };

        let mut evidence = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(ev) = self.get_evidence(Self::parse_uuid(&id)?)? {
                evidence.push(ev);
            }
        }
        Ok(evidence)
    }

    fn set_evidence_status(&self, id: Uuid, status: EvidenceStatus) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE evidence SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id.to_string()],
            )
            .map_err(StoreError::from)?;
        if changed == 0 {
            return Err(Error::not_found("evidence", id));
        }
        Ok(())
    }

    fn evidence_exists(&self, id: Uuid) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM evidence WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .map_err(StoreError::from)?;
        Ok(count > 0)
    }

    fn save_run(&self, run: &ResearchRun) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO research_runs
             (id, case_id, query, defense_theory, status, phase, started_at, completed_at,
              workflow_id, errors, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                run.id.to_string(),
                run.case_id.to_string(),
                run.query,
                run.defense_theory,
                run.status.as_str(),
                run.phase.as_str(),
                run.started_at.to_rfc3339(),
                run.completed_at.map(|t| t.to_rfc3339()),
                run.workflow_id,
                serde_json::to_string(&run.errors).map_err(StoreError::from)?,
                serde_json::to_string(&run.metadata).map_err(StoreError::from)?,
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    fn get_run(&self, id: Uuid) -> Result<Option<ResearchRun>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM research_runs WHERE id = ?1"),
                params![id.to_string()],
                Self::row_to_run,
            )
            .optional()
            .map_err(StoreError::from)?;
        raw.map(RawRun::decode).transpose()
    }

    fn list_runs(
        &self,
        case_id: Uuid,
        status: Option<ResearchStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ResearchRun>, usize)> {
        let conn = self.lock()?;
        let (filter_sql, status_param) = status.map_or(("", None), |s| {
            ("AND status = ?2", Some(s.as_str().to_string()))
        });

        let total: i64 = match &status_param {
            Some(s) => conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM research_runs WHERE case_id = ?1 {filter_sql}"),
                    params![case_id.to_string(), s],
                    |row| row.get(0),
                )
                .map_err(StoreError::from)?,
            None => conn
                .query_row(
                    "SELECT COUNT(*) FROM research_runs WHERE case_id = ?1",
                    params![case_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(StoreError::from)?,
        };

        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM research_runs WHERE case_id = ?1 {filter_sql}
             ORDER BY started_at DESC LIMIT {limit} OFFSET {offset}"
        );
        let mut raws = Vec::new();
        match &status_param {
            Some(s) => {
                let mut stmt = conn.prepare(&sql).map_err(StoreError::from)?;
                let rows = stmt
                    .query_map(params![case_id.to_string(), s], Self::row_to_run)
                    .map_err(StoreError::from)?;
                for row in rows {
                    raws.push(row.map_err(StoreError::from)?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&sql).map_err(StoreError::from)?;
                let rows = stmt
                    .query_map(params![case_id.to_string()], Self::row_to_run)
                    .map_err(StoreError::from)?;
                for row in rows {
                    raws.push(row.map_err(StoreError::from)?);
                }
            }
        }

        let runs = raws
            .into_iter()
            .map(RawRun::decode)
            .collect::<Result<Vec<_>>>()?;
        Ok((runs, total as usize))
    }

    fn add_findings(&self, findings: &[Finding]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        for f in findings {
            tx.execute(
                "INSERT OR REPLACE INTO findings
                 (id, research_run_id, finding_type, text, entities, citations, confidence,
                  relevance, tags, event_time, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    f.id.to_string(),
                    f.research_run_id.to_string(),
                    f.finding_type.as_str(),
                    f.text,
                    serde_json::to_string(&f.entities).map_err(StoreError::from)?,
                    serde_json::to_string(&f.citations).map_err(StoreError::from)?,
                    f.confidence.value(),
                    f.relevance.value(),
                    serde_json::to_string(&f.tags).map_err(StoreError::from)?,
                    f.event_time.map(|t| t.to_rfc3339()),
                    f.created_at.to_rfc3339(),
                ],
            )
            .map_err(StoreError::from)?;
        }
        tx.commit()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok(())
    }

    fn findings_for_run(&self, run_id: Uuid) -> Result<Vec<Finding>> {
        use crate::core::{Confidence, FindingType, Relevance};
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, research_run_id, finding_type, text, entities, citations, confidence,
                        relevance, tags, event_time, created_at
                 FROM findings WHERE research_run_id = ?1 ORDER BY created_at",
            )
            .map_err(StoreError::from)?;
        let rows = stmt
            .query_map(params![run_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, f64>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, String>(10)?,
                ))
            })
            .map_err(StoreError::from)?;

        let mut findings = Vec::new();
        for row in rows {
            let (id, rid, ftype, text, entities, citations, confidence, relevance, tags, event_time, created_at) =
                row.map_err(StoreError::from)?;
            findings.push(Finding {
                id: Self::parse_uuid(&id)?,
                research_run_id: Self::parse_uuid(&rid)?,
                finding_type: FindingType::from_str(&ftype)?,
                text,
                entities: serde_json::from_str(&entities).map_err(StoreError::from)?,
                citations: serde_json::from_str(&citations).map_err(StoreError::from)?,
                confidence: Confidence::new(confidence)?,
                relevance: Relevance::new(relevance)?,
                tags: serde_json::from_str(&tags).map_err(StoreError::from)?,
                event_time: event_time.as_deref().map(Self::parse_time).transpose()?,
                created_at: Self::parse_time(&created_at)?,
            });
        }
        Ok(findings)
    }

    fn save_graph(
        &self,
        case_id: Uuid,
        nodes: &[GraphNode],
        relationships: &[GraphRelationship],
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        tx.execute(
            "DELETE FROM graph_nodes WHERE case_id = ?1",
            params![case_id.to_string()],
        )
        .map_err(StoreError::from)?;
        tx.execute(
            "DELETE FROM graph_relationships WHERE case_id = ?1",
            params![case_id.to_string()],
        )
        .map_err(StoreError::from)?;
        for node in nodes {
            tx.execute(
                "INSERT INTO graph_nodes (id, case_id, node_type, label, properties)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    node.id.to_string(),
                    case_id.to_string(),
                    node.node_type.as_str(),
                    node.label,
                    serde_json::to_string(&node.properties).map_err(StoreError::from)?,
                ],
            )
            .map_err(StoreError::from)?;
        }
        for rel in relationships {
            tx.execute(
                "INSERT INTO graph_relationships (id, case_id, source_id, target_id, rel_type, properties)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    rel.id.to_string(),
                    case_id.to_string(),
                    rel.source_id.to_string(),
                    rel.target_id.to_string(),
                    rel.rel_type.as_str(),
                    serde_json::to_string(&rel.properties).map_err(StoreError::from)?,
                ],
            )
            .map_err(StoreError::from)?;
        }
        tx.commit()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok(())
    }

    fn graph_for_case(&self, case_id: Uuid) -> Result<(Vec<GraphNode>, Vec<GraphRelationship>)> {
        use crate::core::{NodeType, RelationshipType};
        let conn = self.lock()?;

        let mut nodes = Vec::new();
        {
            let mut stmt = conn
                .prepare(
                    "SELECT id, node_type, label, properties FROM graph_nodes
                     WHERE case_id = ?1 ORDER BY label",
                )
                .map_err(StoreError::from)?;
            let rows = stmt
                .query_map(params![case_id.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })
                .map_err(StoreError::from)?;
            for row in rows {
                let (id, node_type, label, properties) = row.map_err(StoreError::from)?;
                nodes.push(GraphNode {
                    id: Self::parse_uuid(&id)?,
                    case_id,
                    node_type: NodeType::from_str(&node_type)?,
                    label,
                    properties: serde_json::from_str(&properties).map_err(StoreError::from)?,
                });
            }
        }

        let mut relationships = Vec::new();
        {
            let mut stmt = conn
                .prepare(
                    "SELECT id, source_id, target_id, rel_type, properties
                     FROM graph_relationships WHERE case_id = ?1",
                )
                .map_err(StoreError::from)?;
            let rows = stmt
                .query_map(params![case_id.to_string()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(StoreError::from)?;
            for row in rows {
                let (id, source_id, target_id, rel_type, properties) =
                    row.map_err(StoreError::from)?;
                relationships.push(GraphRelationship {
                    id: Self::parse_uuid(&id)?,
                    source_id: Self::parse_uuid(&source_id)?,
                    target_id: Self::parse_uuid(&target_id)?,
                    rel_type: RelationshipType::from_str(&rel_type)?,
                    properties: serde_json::from_str(&properties).map_err(StoreError::from)?,
                });
            }
        }

        Ok((nodes, relationships))
    }

    fn save_timeline(&self, case_id: Uuid, events: &[TimelineEvent]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        tx.execute(
            "DELETE FROM timeline_events WHERE case_id = ?1",
            params![case_id.to_string()],
        )
        .map_err(StoreError::from)?;
        for event in events {
            tx.execute(
                "INSERT INTO timeline_events
                 (id, case_id, timestamp, event_type, description, participants, source_citations)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    event.id.to_string(),
                    case_id.to_string(),
                    event.timestamp.to_rfc3339(),
                    event.event_type,
                    event.description,
                    serde_json::to_string(&event.participants).map_err(StoreError::from)?,
                    serde_json::to_string(&event.source_citations).map_err(StoreError::from)?,
                ],
            )
            .map_err(StoreError::from)?;
        }
        tx.commit()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok(())
    }

    fn timeline_for_case(&self, case_id: Uuid) -> Result<Vec<TimelineEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, event_type, description, participants, source_citations
                 FROM timeline_events WHERE case_id = ?1 ORDER BY timestamp",
            )
            .map_err(StoreError::from)?;
        let rows = stmt
            .query_map(params![case_id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .map_err(StoreError::from)?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp, event_type, description, participants, citations) =
                row.map_err(StoreError::from)?;
            events.push(TimelineEvent {
                id: Self::parse_uuid(&id)?,
                case_id,
                timestamp: Self::parse_time(&timestamp)?,
                event_type,
                description,
                participants: serde_json::from_str(&participants).map_err(StoreError::from)?,
                source_citations: serde_json::from_str(&citations).map_err(StoreError::from)?,
            });
        }
        Ok(events)
    }

    fn save_dossier(&self, dossier: &Dossier) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO dossiers
             (id, research_run_id, executive_summary, sections, citations_appendix, file_paths,
              generated_at, word_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                dossier.id.to_string(),
                dossier.research_run_id.to_string(),
                dossier.executive_summary,
                serde_json::to_string(&dossier.sections).map_err(StoreError::from)?,
                dossier.citations_appendix,
                serde_json::to_string(&dossier.file_paths).map_err(StoreError::from)?,
                dossier.generated_at.to_rfc3339(),
                dossier.word_count as i64,
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    fn dossier_for_run(&self, run_id: Uuid) -> Result<Option<Dossier>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, executive_summary, sections, citations_appendix, file_paths,
                        generated_at, word_count
                 FROM dossiers WHERE research_run_id = ?1",
                params![run_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()
            .map_err(StoreError::from)?;

        row.map(|(id, summary, sections, appendix, file_paths, generated_at, word_count)| {
            let sections: Vec<DossierSection> =
                serde_json::from_str(&sections).map_err(StoreError::from)?;
            Ok(Dossier {
                id: Self::parse_uuid(&id)?,
                research_run_id: run_id,
                executive_summary: summary,
                sections,
                citations_appendix: appendix,
                file_paths: serde_json::from_str(&file_paths).map_err(StoreError::from)?,
                generated_at: Self::parse_time(&generated_at)?,
                word_count: word_count as usize,
            })
        })
        .transpose()
    }

    fn journal_get(&self, run_id: Uuid, activity: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT payload FROM workflow_journal WHERE run_id = ?1 AND activity = ?2",
            params![run_id.to_string(), activity],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Store(StoreError::from(e)))
    }

    fn journal_put(&self, run_id: Uuid, activity: &str, payload: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO workflow_journal (run_id, activity, payload, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![run_id.to_string(), activity, payload, Utc::now().to_rfc3339()],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    fn signal_push(&self, run_id: Uuid, signal: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workflow_signals (run_id, signal, requested_at) VALUES (?1, ?2, ?3)",
            params![run_id.to_string(), signal, Utc::now().to_rfc3339()],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    fn signals_take(&self, run_id: Uuid) -> Result<Vec<String>> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        let mut signals = Vec::new();
        {
            let mut stmt = tx
                .prepare("SELECT signal FROM workflow_signals WHERE run_id = ?1 ORDER BY id")
                .map_err(StoreError::from)?;
            let rows = stmt
                .query_map(params![run_id.to_string()], |row| row.get::<_, String>(0))
                .map_err(StoreError::from)?;
            for row in rows {
                signals.push(row.map_err(StoreError::from)?);
            }
        }
        tx.execute(
            "DELETE FROM workflow_signals WHERE run_id = ?1",
            params![run_id.to_string()],
        )
        .map_err(StoreError::from)?;
        tx.commit()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteRecords {
        let s = SqliteRecords::in_memory().unwrap();
        s.init().unwrap();
        s
    }

    fn case(store: &SqliteRecords, number: &str) -> Case {
        let c = Case::new(number, "Acme Corp", "contract-dispute").unwrap();
        store.create_case(&c).unwrap();
        c
    }

    #[test]
    fn test_init_idempotent() {
        let s = store();
        s.init().unwrap();
        assert!(s.is_initialized().unwrap());
    }

    #[test]
    fn test_case_roundtrip() {
        let s = store();
        let c = case(&s, "2024-CV-0042");
        let back = s.get_case(c.id).unwrap().unwrap();
        assert_eq!(back, c);
        let by_number = s.get_case_by_number("2024-CV-0042").unwrap().unwrap();
        assert_eq!(by_number.id, c.id);
    }

    #[test]
    fn test_duplicate_case_number_rejected() {
        let s = store();
        case(&s, "2024-CV-0042");
        let dup = Case::new("2024-CV-0042", "Other", "tort").unwrap();
        let err = s.create_case(&dup).unwrap_err();
        assert!(matches!(
            err,
            Error::Store(StoreError::DuplicateCaseNumber { .. })
        ));
    }

    #[test]
    fn test_evidence_roundtrip_with_segments() {
        let s = store();
        let c = case(&s, "C-1");
        let seg = TranscriptSegment {
            id: Uuid::new_v4(),
            start_s: 1.5,
            end_s: 9.0,
            text: "We never signed it.".to_string(),
            speaker_id: Some("SPEAKER_00".to_string()),
            confidence: Some(0.9),
            highlights: vec!["key admission".to_string()],
        };
        let ev = Evidence::new(c.id, EvidenceKind::Transcript, "depo.wav", 42)
            .with_segments(vec![seg.clone()]);
        s.add_evidence(&ev).unwrap();

        let back = s.get_evidence(ev.id).unwrap().unwrap();
        assert_eq!(back.segments.len(), 1);
        assert_eq!(back.segments[0], seg);
        assert!(s.evidence_exists(ev.id).unwrap());
        assert!(!s.evidence_exists(Uuid::new_v4()).unwrap());
    }

    #[test]
    fn test_list_evidence_by_kind() {
        let s = store();
        let c = case(&s, "C-2");
        s.add_evidence(&Evidence::new(c.id, EvidenceKind::Document, "a.pdf", 1))
            .unwrap();
        s.add_evidence(&Evidence::new(c.id, EvidenceKind::Transcript, "b.wav", 2))
            .unwrap();
        assert_eq!(s.list_evidence(c.id, None).unwrap().len(), 2);
        assert_eq!(
            s.list_evidence(c.id, Some(EvidenceKind::Document)).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_evidence_status_update() {
        let s = store();
        let c = case(&s, "C-3");
        let ev = Evidence::new(c.id, EvidenceKind::Document, "a.pdf", 1);
        s.add_evidence(&ev).unwrap();
        s.set_evidence_status(ev.id, EvidenceStatus::Completed).unwrap();
        let back = s.get_evidence(ev.id).unwrap().unwrap();
        assert_eq!(back.status, EvidenceStatus::Completed);

        assert!(s.set_evidence_status(Uuid::new_v4(), EvidenceStatus::Failed).is_err());
    }

    #[test]
    fn test_run_roundtrip() {
        let s = store();
        let c = case(&s, "C-4");
        let mut run = ResearchRun::new(c.id, Some("payments timeline".to_string()), None);
        s.save_run(&run).unwrap();

        run.advance_phase(ResearchPhase::Searching).unwrap();
        s.save_run(&run).unwrap();

        let back = s.get_run(run.id).unwrap().unwrap();
        assert_eq!(back.status, ResearchStatus::Running);
        assert_eq!(back.phase, ResearchPhase::Searching);
    }

    #[test]
    fn test_list_runs_sorted_and_paginated() {
        let s = store();
        let c = case(&s, "C-5");
        for _ in 0..3 {
            let run = ResearchRun::new(c.id, None, None);
            s.save_run(&run).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let (runs, total) = s.list_runs(c.id, None, 2, 0).unwrap();
        assert_eq!(total, 3);
        assert_eq!(runs.len(), 2);
        assert!(runs[0].started_at >= runs[1].started_at);

        let (page2, _) = s.list_runs(c.id, None, 2, 2).unwrap();
        assert_eq!(page2.len(), 1);

        let (none, total) = s
            .list_runs(c.id, Some(ResearchStatus::Completed), 10, 0)
            .unwrap();
        assert!(none.is_empty());
        assert_eq!(total, 0);
    }

    #[test]
    fn test_findings_roundtrip() {
        let s = store();
        let c = case(&s, "C-6");
        let run = ResearchRun::new(c.id, None, None);
        s.save_run(&run).unwrap();

        let finding = Finding::new(
            run.id,
            crate::core::FindingType::Fact,
            "Wire of $50,000 sent Jan 20",
            0.9,
            0.8,
        )
        .unwrap()
        .with_entities(vec!["John Doe".to_string()]);
        s.add_findings(std::slice::from_ref(&finding)).unwrap();

        let back = s.findings_for_run(run.id).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].text, finding.text);
        assert_eq!(back[0].entities, finding.entities);
    }

    #[test]
    fn test_graph_and_timeline_roundtrip() {
        use crate::core::{NodeType, RelationshipType};
        let s = store();
        let c = case(&s, "C-7");

        let n1 = GraphNode::new(c.id, NodeType::Person, "John Doe");
        let n2 = GraphNode::new(c.id, NodeType::Event, "Contract Signing");
        let rel = GraphRelationship::new(n1.id, n2.id, RelationshipType::ParticipatedIn);
        s.save_graph(c.id, &[n1.clone(), n2.clone()], std::slice::from_ref(&rel))
            .unwrap();

        let (nodes, rels) = s.graph_for_case(c.id).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].rel_type, RelationshipType::ParticipatedIn);

        // Saving again replaces, not accumulates.
        s.save_graph(c.id, &[n1], &[]).unwrap();
        let (nodes, rels) = s.graph_for_case(c.id).unwrap();
        assert_eq!(nodes.len(), 1);
        assert!(rels.is_empty());

        let event = TimelineEvent::new(c.id, Utc::now(), "meeting", "negotiation");
        s.save_timeline(c.id, std::slice::from_ref(&event)).unwrap();
        let events = s.timeline_for_case(c.id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].description, "negotiation");
    }

    #[test]
    fn test_dossier_roundtrip() {
        let s = store();
        let c = case(&s, "C-8");
        let run = ResearchRun::new(c.id, None, None);
        s.save_run(&run).unwrap();

        let dossier = Dossier::assemble(
            run.id,
            "summary".to_string(),
            vec![DossierSection {
                title: "Findings".to_string(),
                content: "body".to_string(),
                order: 0,
                metadata: Default::default(),
            }],
            "appendix".to_string(),
        );
        s.save_dossier(&dossier).unwrap();

        let back = s.dossier_for_run(run.id).unwrap().unwrap();
        assert_eq!(back.sections.len(), 1);
        assert_eq!(back.word_count, dossier.word_count);
        assert!(s.dossier_for_run(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_journal_put_get() {
        let s = store();
        let c = case(&s, "C-9");
        let run = ResearchRun::new(c.id, None, None);
        s.save_run(&run).unwrap();

        assert!(s.journal_get(run.id, "run_discovery_phase").unwrap().is_none());
        s.journal_put(run.id, "run_discovery_phase", r#"{"evidence":3}"#)
            .unwrap();
        let payload = s.journal_get(run.id, "run_discovery_phase").unwrap().unwrap();
        assert!(payload.contains("evidence"));

        // Re-recording the same activity overwrites.
        s.journal_put(run.id, "run_discovery_phase", r#"{"evidence":4}"#)
            .unwrap();
        let payload = s.journal_get(run.id, "run_discovery_phase").unwrap().unwrap();
        assert!(payload.contains('4'));
    }

    #[test]
    fn test_signals_fifo_and_drained() {
        let s = store();
        let c = case(&s, "C-10");
        let run = ResearchRun::new(c.id, None, None);
        s.save_run(&run).unwrap();

        s.signal_push(run.id, "pause").unwrap();
        s.signal_push(run.id, "cancel").unwrap();
        let signals = s.signals_take(run.id).unwrap();
        assert_eq!(signals, vec!["pause".to_string(), "cancel".to_string()]);
        assert!(s.signals_take(run.id).unwrap().is_empty());
    }

    #[test]
    fn test_case_cascade_deletes_evidence() {
        let s = store();
        let c = case(&s, "C-11");
        let ev = Evidence::new(c.id, EvidenceKind::Document, "a.pdf", 1);
        s.add_evidence(&ev).unwrap();
        {
            let conn = s.lock().unwrap();
            conn.execute("DELETE FROM cases WHERE id = ?1", params![c.id.to_string()])
                .unwrap();
        }
        assert!(!s.evidence_exists(ev.id).unwrap());
    }
}
