//! CQRS query bus.
//!
//! Read operations are modeled as query objects dispatched to
//! registered handlers through a stable [`QueryKind`] key, with a
//! middleware chain running `before_query` in registration order and
//! `after_query`/`on_error` in reverse. Handler failures are wrapped in
//! [`QueryError::ExecutionFailed`]; middleware never converts an error
//! into success.

mod dto;
mod handlers;
mod queries;

pub use dto::{
    CitationDto, DossierDto, DossierSectionDto, EntityDto, EventDto, FindingDto,
    GetFindingsResult, GetTimelineResult, ListResearchRunsResult, QueryGraphResult,
    RelationshipDto, ResearchStatusDto, SearchEvidenceResult, SearchResultDto,
};
pub use handlers::{
    GetDossierHandler, GetFindingsHandler, GetResearchStatusHandler, GetTimelineHandler,
    ListResearchRunsHandler, QueryGraphHandler, SearchEvidenceHandler, register_default_handlers,
};
pub use queries::{
    GetDossierQuery, GetFindingsQuery, GetResearchStatusQuery, GetTimelineQuery,
    ListResearchRunsQuery, MAX_DEPTH, QueryGraphQuery, SearchEvidenceQuery,
};

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::QueryError;
use crate::{Error, Result};

/// Stable dispatch key, one per read operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Hybrid evidence search.
    SearchEvidence,
    /// Findings of a research run.
    GetFindings,
    /// Live status of a research run.
    GetResearchStatus,
    /// Knowledge graph traversal.
    QueryGraph,
    /// Case timeline.
    GetTimeline,
    /// Dossier of a research run.
    GetDossier,
    /// Research runs of a case.
    ListResearchRuns,
}

impl QueryKind {
    /// Stable string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SearchEvidence => "SearchEvidence",
            Self::GetFindings => "GetFindings",
            Self::GetResearchStatus => "GetResearchStatus",
            Self::QueryGraph => "QueryGraph",
            Self::GetTimeline => "GetTimeline",
            Self::GetDossier => "GetDossier",
            Self::ListResearchRuns => "ListResearchRuns",
        }
    }
}

/// A dispatchable query object.
///
/// Queries self-validate; the bus's validation middleware re-invokes
/// [`Query::validate`] before the handler runs.
pub trait Query: Send + Sync + std::fmt::Debug + 'static {
    /// Result type produced by the handler.
    type Output: Send + 'static;

    /// Dispatch key for this query type.
    const KIND: QueryKind;

    /// Validates the query's own fields.
    ///
    /// # Errors
    ///
    /// Returns a validation error for out-of-range or malformed
    /// fields.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Object-safe view of a query for middleware.
pub trait QueryObject: Send + Sync + std::fmt::Debug {
    /// Re-runs the query's validation.
    ///
    /// # Errors
    ///
    /// Returns a validation error for out-of-range or malformed
    /// fields.
    fn validate_object(&self) -> Result<()>;
}

impl<Q: Query> QueryObject for Q {
    fn validate_object(&self) -> Result<()> {
        self.validate()
    }
}

/// Typed handler for one query type.
#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    /// Handles the query, returning DTOs only.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    async fn handle(&self, query: &Q) -> Result<Q::Output>;
}

/// Cross-cutting middleware hooks.
#[async_trait]
pub trait QueryMiddleware: Send + Sync {
    /// Runs before the handler, in registration order. An error here
    /// aborts dispatch.
    ///
    /// # Errors
    ///
    /// Returns an error to abort the dispatch.
    async fn before_query(&self, kind: QueryKind, query: &dyn QueryObject) -> Result<()> {
        let _ = (kind, query);
        Ok(())
    }

    /// Runs after a successful handler, in reverse order.
    async fn after_query(&self, kind: QueryKind, duration: Duration) {
        let _ = (kind, duration);
    }

    /// Runs after a failed handler, in reverse order.
    async fn on_error(&self, kind: QueryKind, error: &Error) {
        let _ = (kind, error);
    }
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn handle_erased(&self, query: &(dyn Any + Send + Sync)) -> Result<Box<dyn Any + Send>>;
}

struct Erased<Q, H> {
    handler: H,
    _marker: std::marker::PhantomData<fn(Q)>,
}

#[async_trait]
impl<Q, H> ErasedHandler for Erased<Q, H>
where
    Q: Query,
    H: QueryHandler<Q>,
{
    async fn handle_erased(&self, query: &(dyn Any + Send + Sync)) -> Result<Box<dyn Any + Send>> {
        let query = query
            .downcast_ref::<Q>()
            .ok_or(Error::Query(QueryError::ResultType {
                kind: Q::KIND.as_str(),
            }))?;
        let output = self.handler.handle(query).await?;
        Ok(Box::new(output))
    }
}

/// Central dispatcher for all read operations.
#[derive(Default)]
pub struct QueryBus {
    handlers: HashMap<QueryKind, Box<dyn ErasedHandler>>,
    middleware: Vec<Arc<dyn QueryMiddleware>>,
}

impl QueryBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for a query type.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::AlreadyRegistered`] when the kind already
    /// has a handler.
    pub fn register<Q, H>(&mut self, handler: H) -> Result<()>
    where
        Q: Query,
        H: QueryHandler<Q> + 'static,
    {
        if self.handlers.contains_key(&Q::KIND) {
            return Err(Error::Query(QueryError::AlreadyRegistered {
                kind: Q::KIND.as_str(),
            }));
        }
        self.handlers.insert(
            Q::KIND,
            Box::new(Erased::<Q, H> {
                handler,
                _marker: std::marker::PhantomData,
            }),
        );
        info!(kind = Q::KIND.as_str(), "query handler registered");
        Ok(())
    }

    /// Appends middleware; order is preserved.
    pub fn add_middleware(&mut self, middleware: Arc<dyn QueryMiddleware>) {
        self.middleware.push(middleware);
    }

    /// Whether a handler is registered for the kind.
    #[must_use]
    pub fn is_registered(&self, kind: QueryKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Dispatches a query to its handler through the middleware chain.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::NoHandler`] for unregistered kinds and
    /// [`QueryError::ExecutionFailed`] wrapping any middleware or
    /// handler failure.
    pub async fn execute<Q: Query>(&self, query: Q) -> Result<Q::Output> {
        let kind = Q::KIND;
        let handler = self
            .handlers
            .get(&kind)
            .ok_or(Error::Query(QueryError::NoHandler {
                kind: kind.as_str(),
            }))?;

        for middleware in &self.middleware {
            if let Err(e) = middleware.before_query(kind, &query).await {
                for mw in self.middleware.iter().rev() {
                    mw.on_error(kind, &e).await;
                }
                return Err(Error::Query(QueryError::ExecutionFailed {
                    kind: kind.as_str(),
                    source: Box::new(e),
                }));
            }
        }

        let start = Instant::now();
        match handler.handle_erased(&query).await {
            Ok(output) => {
                for middleware in self.middleware.iter().rev() {
                    middleware.after_query(kind, start.elapsed()).await;
                }
                output
                    .downcast::<Q::Output>()
                    .map(|boxed| *boxed)
                    .map_err(|_| Error::Query(QueryError::ResultType { kind: kind.as_str() }))
            }
            Err(e) => {
                for middleware in self.middleware.iter().rev() {
                    middleware.on_error(kind, &e).await;
                }
                Err(Error::Query(QueryError::ExecutionFailed {
                    kind: kind.as_str(),
                    source: Box::new(e),
                }))
            }
        }
    }
}

impl std::fmt::Debug for QueryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBus")
            .field("handlers", &self.handlers.len())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Logs query lifecycle with timing.
#[derive(Debug, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl QueryMiddleware for LoggingMiddleware {
    async fn before_query(&self, kind: QueryKind, _query: &dyn QueryObject) -> Result<()> {
        info!(kind = kind.as_str(), "query started");
        Ok(())
    }

    async fn after_query(&self, kind: QueryKind, duration: Duration) {
        info!(
            kind = kind.as_str(),
            duration_ms = duration.as_millis() as u64,
            "query completed"
        );
    }

    async fn on_error(&self, kind: QueryKind, error: &Error) {
        error!(kind = kind.as_str(), error = %error, "query failed");
    }
}

/// Re-invokes the query's own validation before dispatch.
#[derive(Debug, Default)]
pub struct ValidationMiddleware;

#[async_trait]
impl QueryMiddleware for ValidationMiddleware {
    async fn before_query(&self, _kind: QueryKind, query: &dyn QueryObject) -> Result<()> {
        query.validate_object()
    }
}
