//! Process-wide service container.
//!
//! The platform is the composition root: it eagerly constructs every
//! service at startup with explicit configuration, wires the query bus
//! from a declared handler list, and hands out shared references.
//! Missing backends fail construction, not first use.

use std::sync::Arc;

use tracing::info;

use crate::config::PlatformConfig;
use crate::embedding::{Embedder, create_embedder};
use crate::governor::{AtomicCounter, MemoryCounter, ResourceGovernor};
use crate::index::{DualStoreWriter, IndexLifecycleManager, OrphanReaper};
use crate::llm::{LlmProvider, ScriptedProvider};
use crate::query::{LoggingMiddleware, QueryBus, ValidationMiddleware, register_default_handlers};
use crate::research::{Activities, ResearchWorkflow};
use crate::search::{CrossEncoderPool, HybridRetriever, OverlapCrossEncoder};
use crate::store::{
    LexicalStore, RecordStore, SqliteLexicalStore, SqliteRecords, SqliteVectorStore, VectorStore,
};
use crate::Result;

/// Fully wired platform services.
pub struct Platform {
    config: PlatformConfig,
    records: Arc<dyn RecordStore>,
    vector: Arc<dyn VectorStore>,
    lexical: Arc<dyn LexicalStore>,
    embedder: Arc<dyn Embedder>,
    governor: Arc<ResourceGovernor>,
    retriever: Arc<HybridRetriever>,
    lifecycle: Arc<IndexLifecycleManager>,
    writer: Arc<DualStoreWriter>,
    workflow: Arc<ResearchWorkflow>,
    bus: QueryBus,
}

impl Platform {
    /// Initializes every service against the configured data
    /// directory. Fails fast when a backend cannot be opened.
    ///
    /// # Errors
    ///
    /// Returns an error if a store cannot be opened or initialized.
    pub fn init(config: PlatformConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let records: Arc<dyn RecordStore> =
            Arc::new(SqliteRecords::open(config.record_db_path())?);
        records.init()?;
        let vector: Arc<dyn VectorStore> =
            Arc::new(SqliteVectorStore::open(config.vector_db_path())?);
        let lexical: Arc<dyn LexicalStore> =
            Arc::new(SqliteLexicalStore::open(config.lexical_db_path())?);

        Self::wire(config, records, vector, lexical)
    }

    /// Initializes the platform on in-memory stores. Useful for tests
    /// and demos.
    ///
    /// # Errors
    ///
    /// Returns an error if a store cannot be created.
    pub fn init_in_memory(config: PlatformConfig) -> Result<Self> {
        let records: Arc<dyn RecordStore> = Arc::new(SqliteRecords::in_memory()?);
        records.init()?;
        let vector: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::in_memory()?);
        let lexical: Arc<dyn LexicalStore> = Arc::new(SqliteLexicalStore::in_memory()?);
        Self::wire(config, records, vector, lexical)
    }

    fn wire(
        config: PlatformConfig,
        records: Arc<dyn RecordStore>,
        vector: Arc<dyn VectorStore>,
        lexical: Arc<dyn LexicalStore>,
    ) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder()?);
        let counter: Arc<dyn AtomicCounter> = Arc::new(MemoryCounter::new());
        let governor = Arc::new(ResourceGovernor::new(
            counter,
            config.governor_capacity,
            config.governor_timeout,
        ));
        let reranker = Arc::new(CrossEncoderPool::new(vec![Arc::new(OverlapCrossEncoder)]));
        let retriever = Arc::new(HybridRetriever::new(
            Arc::clone(&vector),
            Arc::clone(&lexical),
            Arc::clone(&records),
            Arc::clone(&embedder),
            reranker,
        ));
        let lifecycle = Arc::new(IndexLifecycleManager::new(
            Arc::clone(&vector),
            Arc::clone(&lexical),
            config.dimensions,
        ));
        let writer = Arc::new(DualStoreWriter::new(
            Arc::clone(&vector),
            Arc::clone(&lexical),
        ));

        let provider = Self::build_provider(&config);
        let activities = Activities::new(
            Arc::clone(&records),
            Arc::clone(&retriever),
            Arc::clone(&governor),
            provider,
            Arc::clone(&embedder),
            Arc::clone(&lifecycle),
            config.clone(),
        );
        let workflow = Arc::new(ResearchWorkflow::new(activities, config.clone()));

        let mut bus = QueryBus::new();
        bus.add_middleware(Arc::new(LoggingMiddleware));
        bus.add_middleware(Arc::new(ValidationMiddleware));
        register_default_handlers(&mut bus, Arc::clone(&retriever), Arc::clone(&records))?;

        info!(data_dir = %config.data_dir.display(), "platform initialized");
        Ok(Self {
            config,
            records,
            vector,
            lexical,
            embedder,
            governor,
            retriever,
            lifecycle,
            writer,
            workflow,
            bus,
        })
    }

    #[cfg(feature = "openai")]
    fn build_provider(config: &PlatformConfig) -> Arc<dyn LlmProvider> {
        config.api_key.as_ref().map_or_else(
            || no_key_provider(),
            |key| {
                Arc::new(crate::llm::OpenAiProvider::new(key, config.base_url.as_deref()))
                    as Arc<dyn LlmProvider>
            },
        )
    }

    #[cfg(not(feature = "openai"))]
    fn build_provider(_config: &PlatformConfig) -> Arc<dyn LlmProvider> {
        no_key_provider()
    }

    /// Platform configuration.
    #[must_use]
    pub const fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// System of record.
    #[must_use]
    pub fn records(&self) -> Arc<dyn RecordStore> {
        Arc::clone(&self.records)
    }

    /// Vector store backend.
    #[must_use]
    pub fn vector(&self) -> Arc<dyn VectorStore> {
        Arc::clone(&self.vector)
    }

    /// Lexical store backend.
    #[must_use]
    pub fn lexical(&self) -> Arc<dyn LexicalStore> {
        Arc::clone(&self.lexical)
    }

    /// Embedding generator.
    #[must_use]
    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    /// Resource governor.
    #[must_use]
    pub fn governor(&self) -> Arc<ResourceGovernor> {
        Arc::clone(&self.governor)
    }

    /// Hybrid retriever.
    #[must_use]
    pub fn retriever(&self) -> Arc<HybridRetriever> {
        Arc::clone(&self.retriever)
    }

    /// Index lifecycle manager.
    #[must_use]
    pub fn lifecycle(&self) -> Arc<IndexLifecycleManager> {
        Arc::clone(&self.lifecycle)
    }

    /// Dual-store writer.
    #[must_use]
    pub fn writer(&self) -> Arc<DualStoreWriter> {
        Arc::clone(&self.writer)
    }

    /// Research workflow driver.
    #[must_use]
    pub fn workflow(&self) -> Arc<ResearchWorkflow> {
        Arc::clone(&self.workflow)
    }

    /// Query bus with the standard handlers and middleware.
    #[must_use]
    pub const fn bus(&self) -> &QueryBus {
        &self.bus
    }

    /// Orphan reaper over the wired stores.
    #[must_use]
    pub fn reaper(&self) -> OrphanReaper {
        OrphanReaper::new(
            Arc::clone(&self.records),
            Arc::clone(&self.vector),
            Arc::clone(&self.lexical),
        )
        .with_batch(self.config.reaper_batch)
    }
}

/// Provider used when no API key is configured: analyses return no
/// findings, and planning/synthesis fall back to their deterministic
/// paths.
fn no_key_provider() -> Arc<dyn LlmProvider> {
    Arc::new(ScriptedProvider::constant(r#"{"findings": []}"#))
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("data_dir", &self.config.data_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_in_memory_wires_everything() {
        let platform = Platform::init_in_memory(PlatformConfig::default()).unwrap();
        assert!(platform.workflow().health_check());
        assert!(platform.bus().is_registered(crate::query::QueryKind::SearchEvidence));
        assert!(platform.bus().is_registered(crate::query::QueryKind::ListResearchRuns));
        assert_eq!(platform.governor().capacity(), platform.config().governor_capacity);
    }

    #[tokio::test]
    async fn test_lifecycle_available_after_init() {
        let platform = Platform::init_in_memory(PlatformConfig::default()).unwrap();
        let outcomes = platform.lifecycle().create_all_indexes(false).await.unwrap();
        assert_eq!(outcomes.len(), 4);
    }
}
