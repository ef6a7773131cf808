//! Error types for the evidence research core.
//!
//! This module provides the error hierarchy using `thiserror` for all
//! subsystems: stores, search, indexing, the resource governor, the query
//! bus, the research workflow, and LLM access.

use thiserror::Error;

/// Result type alias for platform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error for platform operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Store-related errors (system of record, vector, lexical).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Search-related errors (retrieval, fusion, rerank).
    #[error("search error: {0}")]
    Search(#[from] SearchError),

    /// Index lifecycle and dual-store write errors.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Resource governor errors.
    #[error("governor error: {0}")]
    Governor(#[from] GovernorError),

    /// Query bus and handler errors.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Research workflow errors.
    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    /// LLM provider errors.
    #[error("llm error: {0}")]
    Llm(#[from] LlmError),

    /// Malformed caller input. Never retried.
    #[error("validation error: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// A referenced entity does not exist. Terminal for the current call.
    #[error("not found: {entity} {id}")]
    NotFound {
        /// Entity kind (case, evidence, research run, ...).
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Evidence file ingestion errors.
    #[error("ingest error: {path}: {reason}")]
    Ingest {
        /// Path being ingested.
        path: String,
        /// Reason for failure.
        reason: String,
    },

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

impl Error {
    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stable machine-readable kind for user-visible failures.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Governor(GovernorError::AcquireTimeout { .. })
            | Self::Workflow(WorkflowError::ActivityTimeout { .. })
            | Self::Llm(LlmError::Timeout(_)) => ErrorKind::Timeout,
            Self::Governor(GovernorError::WouldBlock) => ErrorKind::ResourceExhausted,
            Self::Index(IndexError::CompensationFailed { .. }) => ErrorKind::Consistency,
            Self::Search(SearchError::BackendUnavailable { .. })
            | Self::Store(StoreError::Unavailable { .. }) => ErrorKind::TransientBackend,
            Self::Search(SearchError::AllBackendsUnavailable) => ErrorKind::FatalBackend,
            Self::Config { .. } => ErrorKind::Config,
            _ => ErrorKind::Internal,
        }
    }
}

/// Stable error taxonomy surfaced alongside human-readable messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input; 4xx-equivalent, never retried.
    Validation,
    /// Referenced entity missing.
    NotFound,
    /// Deadline exceeded.
    Timeout,
    /// Permits or store capacity exhausted.
    ResourceExhausted,
    /// Dual-store partial write that compensation could not repair.
    Consistency,
    /// A single backend unavailable; retryable/degradable.
    TransientBackend,
    /// All required backends unavailable; not retryable.
    FatalBackend,
    /// Configuration problem.
    Config,
    /// Anything else.
    Internal,
}

/// Store-specific errors for the system of record and index backends.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database connection or query error.
    #[error("database error: {0}")]
    Database(String),

    /// Storage not initialized (init command not run).
    #[error("store not initialized. Run: evident init")]
    NotInitialized,

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Case number already exists (case numbers are globally unique).
    #[error("duplicate case number: {case_number}")]
    DuplicateCaseNumber {
        /// The colliding case number.
        case_number: String,
    },

    /// Backend rejected or dropped the operation.
    #[error("store backend unavailable: {backend}: {reason}")]
    Unavailable {
        /// Backend name (`vector`, `lexical`, `record`).
        backend: &'static str,
        /// Reason for failure.
        reason: String,
    },
}

/// Search-specific errors.
#[derive(Error, Debug)]
pub enum SearchError {
    /// One ranker's backend is down; hybrid mode degrades instead.
    #[error("search backend unavailable: {backend}: {reason}")]
    BackendUnavailable {
        /// Which ranker failed (`dense` or `lexical`).
        backend: &'static str,
        /// Reason for failure.
        reason: String,
    },

    /// Both rankers unavailable; nothing to degrade to.
    #[error("all search backends unavailable")]
    AllBackendsUnavailable,

    /// Query embedding failed.
    #[error("query embedding failed: {0}")]
    Embedding(String),

    /// Cross-encoder rerank failed.
    #[error("rerank failed: {0}")]
    Rerank(String),
}

/// Index lifecycle and dual-store write errors.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Chunk/embedding length mismatch in the write payload.
    #[error("payload mismatch: {chunks} chunks but {embeddings} {space} embeddings")]
    PayloadMismatch {
        /// Number of chunks.
        chunks: usize,
        /// Number of embeddings in the offending space.
        embeddings: usize,
        /// The vector space with the mismatch.
        space: &'static str,
    },

    /// Primary (vector) write failed; nothing to compensate.
    #[error("vector write failed for evidence {evidence_id}: {reason}")]
    VectorWriteFailed {
        /// Evidence being indexed.
        evidence_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Secondary (lexical) write failed; vector side was rolled back.
    #[error("lexical write failed for evidence {evidence_id}: {reason}")]
    LexicalWriteFailed {
        /// Evidence being indexed.
        evidence_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Compensating delete failed; the orphan reaper must repair this.
    #[error("compensation failed for evidence {evidence_id}: {reason}")]
    CompensationFailed {
        /// Evidence left partially indexed.
        evidence_id: String,
        /// Reason the compensating delete failed.
        reason: String,
    },

    /// Index creation failed.
    #[error("index creation failed: {index}: {reason}")]
    CreateFailed {
        /// Index name.
        index: String,
        /// Reason for failure.
        reason: String,
    },
}

/// Resource governor errors.
#[derive(Error, Debug)]
pub enum GovernorError {
    /// Could not obtain a permit within the deadline.
    #[error("timeout acquiring permit after {elapsed_ms}ms ({in_use}/{capacity} permits in use)")]
    AcquireTimeout {
        /// Milliseconds spent waiting.
        elapsed_ms: u64,
        /// Permits in use at the time of the failure.
        in_use: i64,
        /// Configured capacity.
        capacity: u32,
    },

    /// Non-blocking acquisition found no free permit.
    #[error("no permit available (non-blocking mode)")]
    WouldBlock,
}

/// Query bus errors.
#[derive(Error, Debug)]
pub enum QueryError {
    /// A handler is already registered for the query kind.
    #[error("handler already registered for {kind}")]
    AlreadyRegistered {
        /// The query kind.
        kind: &'static str,
    },

    /// No handler registered for the query kind.
    #[error("no handler registered for {kind}")]
    NoHandler {
        /// The query kind.
        kind: &'static str,
    },

    /// Handler execution failed; wraps the cause.
    #[error("query {kind} failed: {source}")]
    ExecutionFailed {
        /// The query kind.
        kind: &'static str,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },

    /// Handler returned an unexpected result type.
    #[error("handler for {kind} returned an unexpected result type")]
    ResultType {
        /// The query kind.
        kind: &'static str,
    },
}

/// Research workflow errors.
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Activity exceeded its deadline.
    #[error("activity {activity} timed out in run {run_id}")]
    ActivityTimeout {
        /// Activity name.
        activity: &'static str,
        /// Research run (correlation id).
        run_id: String,
    },

    /// Activity exhausted its retry budget.
    #[error("activity {activity} failed after {attempts} attempts in run {run_id}: {reason}")]
    RetriesExhausted {
        /// Activity name.
        activity: &'static str,
        /// Attempts made.
        attempts: u32,
        /// Research run (correlation id).
        run_id: String,
        /// Last error seen.
        reason: String,
    },

    /// A signal arrived for a run in a state that cannot accept it.
    #[error("signal {signal} rejected: run {run_id} is {status}")]
    SignalRejected {
        /// Signal name.
        signal: &'static str,
        /// Research run id.
        run_id: String,
        /// Current run status.
        status: String,
    },

    /// Journal entry could not be recorded or replayed.
    #[error("journal error in run {run_id}: {reason}")]
    Journal {
        /// Research run id.
        run_id: String,
        /// Reason for failure.
        reason: String,
    },

    /// The run is in a state that cannot transition as requested.
    #[error("invalid transition for run {run_id}: {reason}")]
    InvalidTransition {
        /// Research run id.
        run_id: String,
        /// Reason the transition is invalid.
        reason: String,
    },
}

/// LLM provider errors.
#[derive(Error, Debug)]
pub enum LlmError {
    /// API key missing from config and environment.
    #[error("API key missing (set EVIDENT_API_KEY)")]
    ApiKeyMissing,

    /// Provider API call failed.
    #[error("provider error: {0}")]
    Api(String),

    /// Provider response could not be parsed.
    #[error("response parse error: {0}")]
    Parse(String),

    /// Request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),
}

// Implement From traits for standard library and dependency errors

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Store(StoreError::Database(err.to_string()))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(err))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(StoreError::Serialization(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::validation("top_k must be between 1 and 1000");
        assert_eq!(
            err.to_string(),
            "validation error: top_k must be between 1 and 1000"
        );
    }

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("research run", "abc-123");
        assert_eq!(err.to_string(), "not found: research run abc-123");
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::NotInitialized;
        assert_eq!(err.to_string(), "store not initialized. Run: evident init");

        let err = StoreError::DuplicateCaseNumber {
            case_number: "2024-CV-0042".to_string(),
        };
        assert_eq!(err.to_string(), "duplicate case number: 2024-CV-0042");
    }

    #[test]
    fn test_governor_error_display() {
        let err = GovernorError::AcquireTimeout {
            elapsed_ms: 1000,
            in_use: 2,
            capacity: 2,
        };
        assert!(err.to_string().contains("2/2"));
    }

    #[test]
    fn test_index_error_display() {
        let err = IndexError::PayloadMismatch {
            chunks: 3,
            embeddings: 2,
            space: "summary",
        };
        assert!(err.to_string().contains("3 chunks"));
        assert!(err.to_string().contains("summary"));
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(Error::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(Error::not_found("case", "1").kind(), ErrorKind::NotFound);

        let timeout = Error::Governor(GovernorError::AcquireTimeout {
            elapsed_ms: 10,
            in_use: 1,
            capacity: 1,
        });
        assert_eq!(timeout.kind(), ErrorKind::Timeout);

        let degraded = Error::Search(SearchError::BackendUnavailable {
            backend: "dense",
            reason: "connection refused".to_string(),
        });
        assert_eq!(degraded.kind(), ErrorKind::TransientBackend);

        let fatal = Error::Search(SearchError::AllBackendsUnavailable);
        assert_eq!(fatal.kind(), ErrorKind::FatalBackend);

        let consistency = Error::Index(IndexError::CompensationFailed {
            evidence_id: "e1".to_string(),
            reason: "vector store down".to_string(),
        });
        assert_eq!(consistency.kind(), ErrorKind::Consistency);
    }

    #[test]
    fn test_error_from_store() {
        let store_err = StoreError::NotInitialized;
        let err: Error = store_err.into();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn test_error_from_rusqlite() {
        let rusqlite_err = rusqlite::Error::InvalidQuery;
        let err: Error = rusqlite_err.into();
        assert!(matches!(err, Error::Store(StoreError::Database(_))));
    }

    #[test]
    fn test_query_error_wraps_cause() {
        let cause = Error::validation("bad limit");
        let err = Error::Query(QueryError::ExecutionFailed {
            kind: "GetFindings",
            source: Box::new(cause),
        });
        assert!(err.to_string().contains("GetFindings"));
        assert!(err.to_string().contains("bad limit"));
    }

    #[test]
    fn test_workflow_error_carries_run_id() {
        let err = WorkflowError::RetriesExhausted {
            activity: "run_document_analysis",
            attempts: 3,
            run_id: "run-9".to_string(),
            reason: "backend flapping".to_string(),
        };
        assert!(err.to_string().contains("run-9"));
        assert!(err.to_string().contains("3 attempts"));
    }
}
