//! # Evident
//!
//! Case-centric legal evidence research core.
//!
//! Evident indexes heterogeneous legal evidence (documents, transcripts,
//! forensic communications) into a dual dense+lexical store, answers
//! search queries with reciprocal-rank-fused hybrid retrieval, and runs
//! a durably checkpointed deep-research workflow that correlates
//! findings into a knowledge graph, a timeline, and a dossier.
//!
//! ## Subsystems
//!
//! - **Hybrid retrieval** ([`search`]): parallel dense + BM25 retrieval,
//!   RRF/linear fusion, optional cross-encoder rerank
//! - **Deep research** ([`research`]): journal-backed workflow with
//!   pause/resume/cancel signals and idempotent activities
//! - **Query bus** ([`query`]): CQRS dispatch with logging and
//!   validation middleware
//! - **Indexing** ([`index`]): legal analyzers, dual-store writes with
//!   compensation, orphan reaping
//! - **Resource governor** ([`governor`]): distributed counting
//!   semaphore throttling GPU/LLM concurrency

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
// Note: unsafe is needed for memory-mapped evidence ingestion (memmap2)
#![warn(unsafe_code)]

pub mod chunking;
pub mod cli;
pub mod config;
pub mod core;
pub mod embedding;
pub mod error;
pub mod governor;
pub mod index;
pub mod io;
pub mod llm;
pub mod platform;
pub mod query;
pub mod research;
pub mod search;
pub mod store;

// Re-export commonly used types at crate root
pub use error::{Error, ErrorKind, Result};

// Re-export core domain types
pub use self::core::{
    Case, Chunk, ChunkType, Citation, Confidence, Dossier, Evidence, EvidenceKind, Finding,
    FindingType, Relevance, ResearchPhase, ResearchRun, ResearchStatus, TimelineEvent,
};

// Re-export the composition root and configuration
pub use config::PlatformConfig;
pub use platform::Platform;

// Re-export search types
pub use search::{
    FusionMethod, HybridRetriever, RankedResults, SearchMode, SearchRequest, reciprocal_rank_fusion,
};

// Re-export workflow types
pub use research::{DriveOutcome, ResearchWorkflow, Signal};

// Re-export the query bus
pub use query::{QueryBus, QueryKind};

// Re-export embedding types
#[cfg(feature = "fastembed-embeddings")]
pub use embedding::FastEmbedEmbedder;
pub use embedding::{DEFAULT_DIMENSIONS, Embedder, FallbackEmbedder, cosine_similarity};
