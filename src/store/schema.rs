//! Schema definitions for the system of record.
//!
//! The record database is authoritative: evidence cascade-deletes with
//! its case, and findings/dossiers cascade with their research run.
//! Index-backend tables (vector points, lexical docs) live in their own
//! databases and are defined by the respective store modules.

/// Current schema version.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// SQL schema for the system of record.
pub const RECORD_SCHEMA_SQL: &str = r"
-- Bootstrap marker; rows are the schema revisions this database has
-- been created or migrated at.
CREATE TABLE IF NOT EXISTS schema_meta (
    version INTEGER PRIMARY KEY
);

-- Cases (root aggregate)
CREATE TABLE IF NOT EXISTS cases (
    id TEXT PRIMARY KEY,
    case_number TEXT NOT NULL UNIQUE,
    client TEXT NOT NULL,
    matter_type TEXT NOT NULL,
    status TEXT NOT NULL,
    team_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cases_number ON cases(case_number);

-- Evidence (documents, transcripts, communications)
CREATE TABLE IF NOT EXISTS evidence (
    id TEXT PRIMARY KEY,
    case_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    filename TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    status TEXT NOT NULL,
    summary TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (case_id) REFERENCES cases(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_evidence_case ON evidence(case_id);
CREATE INDEX IF NOT EXISTS idx_evidence_kind ON evidence(case_id, kind);

-- Transcript segments (ordered by start time)
CREATE TABLE IF NOT EXISTS transcript_segments (
    id TEXT PRIMARY KEY,
    evidence_id TEXT NOT NULL,
    start_s REAL NOT NULL,
    end_s REAL NOT NULL,
    text TEXT NOT NULL,
    speaker_id TEXT,
    confidence REAL,
    highlights TEXT,  -- JSON array
    FOREIGN KEY (evidence_id) REFERENCES evidence(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_segments_evidence ON transcript_segments(evidence_id, start_s);

-- Research runs
CREATE TABLE IF NOT EXISTS research_runs (
    id TEXT PRIMARY KEY,
    case_id TEXT NOT NULL,
    query TEXT,
    defense_theory TEXT,
    status TEXT NOT NULL,
    phase TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    workflow_id TEXT,
    errors TEXT NOT NULL DEFAULT '[]',    -- JSON array
    metadata TEXT NOT NULL DEFAULT '{}',  -- JSON object
    FOREIGN KEY (case_id) REFERENCES cases(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_runs_case ON research_runs(case_id, started_at);

-- Findings (citations embedded as JSON; immutable once written)
CREATE TABLE IF NOT EXISTS findings (
    id TEXT PRIMARY KEY,
    research_run_id TEXT NOT NULL,
    finding_type TEXT NOT NULL,
    text TEXT NOT NULL,
    entities TEXT NOT NULL DEFAULT '[]',   -- JSON array
    citations TEXT NOT NULL DEFAULT '[]',  -- JSON array
    confidence REAL NOT NULL,
    relevance REAL NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',       -- JSON array
    event_time TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (research_run_id) REFERENCES research_runs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_findings_run ON findings(research_run_id);

-- Knowledge graph, case-scoped
CREATE TABLE IF NOT EXISTS graph_nodes (
    id TEXT PRIMARY KEY,
    case_id TEXT NOT NULL,
    node_type TEXT NOT NULL,
    label TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    FOREIGN KEY (case_id) REFERENCES cases(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_nodes_case ON graph_nodes(case_id);

CREATE TABLE IF NOT EXISTS graph_relationships (
    id TEXT PRIMARY KEY,
    case_id TEXT NOT NULL,
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    rel_type TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    FOREIGN KEY (case_id) REFERENCES cases(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_rels_case ON graph_relationships(case_id);

-- Timeline events, case-scoped
CREATE TABLE IF NOT EXISTS timeline_events (
    id TEXT PRIMARY KEY,
    case_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    description TEXT NOT NULL,
    participants TEXT NOT NULL DEFAULT '[]',      -- JSON array
    source_citations TEXT NOT NULL DEFAULT '[]',  -- JSON array
    FOREIGN KEY (case_id) REFERENCES cases(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_timeline_case ON timeline_events(case_id, timestamp);

-- Dossiers
CREATE TABLE IF NOT EXISTS dossiers (
    id TEXT PRIMARY KEY,
    research_run_id TEXT NOT NULL UNIQUE,
    executive_summary TEXT NOT NULL,
    sections TEXT NOT NULL DEFAULT '[]',  -- JSON array
    citations_appendix TEXT NOT NULL,
    file_paths TEXT NOT NULL DEFAULT '[]',
    generated_at TEXT NOT NULL,
    word_count INTEGER NOT NULL,
    FOREIGN KEY (research_run_id) REFERENCES research_runs(id) ON DELETE CASCADE
);

-- Durable workflow journal: one row per completed activity per run.
-- Replay consults this table before executing an activity.
CREATE TABLE IF NOT EXISTS workflow_journal (
    run_id TEXT NOT NULL,
    activity TEXT NOT NULL,
    payload TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (run_id, activity),
    FOREIGN KEY (run_id) REFERENCES research_runs(id) ON DELETE CASCADE
);

-- Pending workflow signals, consumed at inter-activity checkpoints.
CREATE TABLE IF NOT EXISTS workflow_signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    signal TEXT NOT NULL,
    requested_at TEXT NOT NULL,
    FOREIGN KEY (run_id) REFERENCES research_runs(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_signals_run ON workflow_signals(run_id, id);
";

/// Probes for the bootstrap marker table. Returns 1 when this database
/// has been initialized as a record store, 0 otherwise.
pub const SCHEMA_PROBE_SQL: &str =
    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_meta')";

/// Reads the highest schema revision stamped into the database.
/// Yields NULL when the marker table is empty.
pub const READ_VERSION_SQL: &str = "SELECT MAX(version) FROM schema_meta";

/// Stamps a schema revision after a successful bootstrap or migration.
/// Re-stamping the same revision is a no-op.
pub const STAMP_VERSION_SQL: &str = "INSERT OR IGNORE INTO schema_meta (version) VALUES (?1)";
