//! Index lifecycle: analyzers, collection management, dual-store
//! writes, and orphan reaping.

pub mod analyzers;
mod reaper;
mod writer;

pub use reaper::{OrphanReaper, ReapReport};
pub use writer::{DualStoreWriter, IndexPayload, IndexReport};

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::Result;
use crate::store::{DOMAIN_INDEXES, IndexHealth, LexicalStore, VectorStore};

/// Creates and verifies the four domain indexes across both backends.
pub struct IndexLifecycleManager {
    vector: Arc<dyn VectorStore>,
    lexical: Arc<dyn LexicalStore>,
    dimensions: usize,
}

/// Outcome of ensuring one index: created now or already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The index was created by this call.
    Created,
    /// The index already existed.
    Existed,
}

impl IndexLifecycleManager {
    /// Creates a lifecycle manager for the given backends.
    #[must_use]
    pub fn new(vector: Arc<dyn VectorStore>, lexical: Arc<dyn LexicalStore>, dimensions: usize) -> Self {
        Self {
            vector,
            lexical,
            dimensions,
        }
    }

    /// Idempotently creates all domain indexes in both stores.
    ///
    /// Returns a per-index outcome map. An index counts as `Created`
    /// when either backend had to create it.
    ///
    /// # Errors
    ///
    /// Returns an error if any backend rejects index creation.
    pub async fn create_all_indexes(
        &self,
        recreate: bool,
    ) -> Result<BTreeMap<&'static str, EnsureOutcome>> {
        let mut outcomes = BTreeMap::new();
        for index in DOMAIN_INDEXES {
            let vector_created = self
                .vector
                .ensure_collection(index, self.dimensions, recreate)
                .await?;
            let lexical_created = self.lexical.ensure_index(index, recreate).await?;
            let outcome = if vector_created || lexical_created {
                EnsureOutcome::Created
            } else {
                EnsureOutcome::Existed
            };
            info!(index, ?outcome, "index ensured");
            outcomes.insert(index, outcome);
        }
        Ok(outcomes)
    }

    /// Reports health for every domain index in both backends.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend cannot report health.
    pub async fn health(&self) -> Result<BTreeMap<&'static str, BackendHealth>> {
        let mut out = BTreeMap::new();
        for index in DOMAIN_INDEXES {
            out.insert(
                index,
                BackendHealth {
                    vector: self.vector.health(index).await?,
                    lexical: self.lexical.health(index).await?,
                },
            );
        }
        Ok(out)
    }
}

/// Health of one index across the two backends.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct BackendHealth {
    /// Vector collection health.
    pub vector: IndexHealth,
    /// Lexical index health.
    pub lexical: IndexHealth,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteLexicalStore, SqliteVectorStore};

    async fn manager() -> IndexLifecycleManager {
        IndexLifecycleManager::new(
            Arc::new(SqliteVectorStore::in_memory().unwrap()),
            Arc::new(SqliteLexicalStore::in_memory().unwrap()),
            4,
        )
    }

    #[tokio::test]
    async fn test_create_all_then_existed() {
        let mgr = manager().await;
        let first = mgr.create_all_indexes(false).await.unwrap();
        assert_eq!(first.len(), 4);
        assert!(first.values().all(|o| *o == EnsureOutcome::Created));

        let second = mgr.create_all_indexes(false).await.unwrap();
        assert!(second.values().all(|o| *o == EnsureOutcome::Existed));
    }

    #[tokio::test]
    async fn test_recreate_reports_created() {
        let mgr = manager().await;
        mgr.create_all_indexes(false).await.unwrap();
        let again = mgr.create_all_indexes(true).await.unwrap();
        assert!(again.values().all(|o| *o == EnsureOutcome::Created));
    }

    #[tokio::test]
    async fn test_health_covers_all_indexes() {
        let mgr = manager().await;
        mgr.create_all_indexes(false).await.unwrap();
        let health = mgr.health().await.unwrap();
        assert_eq!(health.len(), 4);
        for backend in health.values() {
            assert!(backend.vector.exists);
            assert!(backend.lexical.exists);
            assert_eq!(backend.vector.doc_count, 0);
        }
    }
}
