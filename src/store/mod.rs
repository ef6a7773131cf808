//! Storage seams: system of record, vector store, lexical store.
//!
//! The relational system of record is authoritative for cases, evidence,
//! research runs, findings, graph, timeline, dossiers, and the workflow
//! journal. The vector and lexical stores are index backends consumed
//! through async traits; this crate ships SQLite-backed reference
//! implementations so the full pipeline runs hermetically, and
//! production engines plug in behind the same traits.

mod lexical;
mod record;
mod schema;
mod vector;

pub use lexical::SqliteLexicalStore;
pub use record::{RecordStore, SqliteRecords};
pub use schema::{CURRENT_SCHEMA_VERSION, RECORD_SCHEMA_SQL};
pub use vector::SqliteVectorStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Result;
use crate::core::{ChunkType, EvidenceKind, VectorSpace};

/// The four domain indexes kept in both backends.
pub const DOMAIN_INDEXES: [&str; 4] = ["documents", "transcripts", "communications", "findings"];

/// Maps an evidence kind to its index/collection name.
#[must_use]
pub const fn collection_for(kind: EvidenceKind) -> &'static str {
    match kind {
        EvidenceKind::Document => "documents",
        EvidenceKind::Transcript => "transcripts",
        EvidenceKind::Communication => "communications",
    }
}

/// Keyword filters pushed down to both index backends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    /// Restrict to these cases. Empty means unscoped.
    pub case_ids: Vec<Uuid>,
    /// Restrict to these chunk granularities.
    pub chunk_types: Vec<ChunkType>,
    /// Restrict to chunks created in this range.
    pub date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl SearchFilter {
    /// Filter scoped to a single case.
    #[must_use]
    pub fn for_case(case_id: Uuid) -> Self {
        Self {
            case_ids: vec![case_id],
            ..Self::default()
        }
    }

    /// Whether a record with these attributes passes the filter.
    #[must_use]
    pub fn matches(&self, case_id: Uuid, chunk_type: ChunkType, created_at: DateTime<Utc>) -> bool {
        if !self.case_ids.is_empty() && !self.case_ids.contains(&case_id) {
            return false;
        }
        if !self.chunk_types.is_empty() && !self.chunk_types.contains(&chunk_type) {
            return false;
        }
        if let Some((start, end)) = self.date_range {
            if created_at < start || created_at > end {
                return false;
            }
        }
        true
    }
}

/// A chunk as written to the vector store: one point, three named
/// vectors.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    /// Deterministic chunk id.
    pub chunk_id: String,
    /// Owning evidence.
    pub evidence_id: Uuid,
    /// Owning case.
    pub case_id: Uuid,
    /// Chunk granularity.
    pub chunk_type: ChunkType,
    /// Position within the evidence.
    pub position: usize,
    /// Chunk text (payload for enrichment).
    pub text: String,
    /// Page number, when known.
    pub page: Option<u32>,
    /// Named vectors, one per space.
    pub vectors: [(VectorSpace, Vec<f32>); 3],
    /// Write timestamp.
    pub created_at: DateTime<Utc>,
}

/// A chunk as written to the lexical store.
#[derive(Debug, Clone)]
pub struct LexicalDoc {
    /// Deterministic chunk id.
    pub chunk_id: String,
    /// Owning evidence.
    pub evidence_id: Uuid,
    /// Owning case.
    pub case_id: Uuid,
    /// Chunk granularity.
    pub chunk_type: ChunkType,
    /// Position within the evidence.
    pub position: usize,
    /// Raw chunk text.
    pub text: String,
    /// Page number, when known.
    pub page: Option<u32>,
    /// Write timestamp.
    pub created_at: DateTime<Utc>,
}

/// A scored hit from either backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredHit {
    /// Deterministic chunk id.
    pub chunk_id: String,
    /// Owning evidence.
    pub evidence_id: Uuid,
    /// Owning case.
    pub case_id: Uuid,
    /// Chunk granularity.
    pub chunk_type: ChunkType,
    /// Position within the evidence.
    pub position: usize,
    /// Backend-native score (cosine similarity or BM25).
    pub score: f64,
    /// Chunk text for enrichment.
    pub text: String,
    /// Page number, when known.
    pub page: Option<u32>,
}

/// Lightweight reference to a stored point, used by the orphan reaper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointRef {
    /// Chunk id of the point.
    pub chunk_id: String,
    /// Evidence the point claims to belong to.
    pub evidence_id: Uuid,
}

/// Health snapshot of one index/collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexHealth {
    /// Whether the index exists.
    pub exists: bool,
    /// Number of documents/points.
    pub doc_count: usize,
    /// Approximate on-disk size in MB.
    pub size_mb: f64,
}

/// Dense vector index backend.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Ensures the collection exists with the named vector spaces.
    ///
    /// Returns `true` when the collection was created, `false` when it
    /// already existed. With `recreate`, drops and recreates.
    async fn ensure_collection(
        &self,
        collection: &str,
        dimensions: usize,
        recreate: bool,
    ) -> Result<bool>;

    /// Upserts points, keyed by chunk id. Returns the number written.
    async fn upsert(&self, collection: &str, points: &[VectorPoint]) -> Result<usize>;

    /// Deletes every point belonging to the evidence. Returns the
    /// number removed.
    async fn delete_by_evidence(&self, collection: &str, evidence_id: Uuid) -> Result<usize>;

    /// Searches one named vector space.
    async fn search(
        &self,
        collection: &str,
        space: VectorSpace,
        query: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredHit>>;

    /// Pages through stored points for maintenance scans.
    async fn scroll(&self, collection: &str, offset: usize, batch: usize)
    -> Result<Vec<PointRef>>;

    /// Reports collection health.
    async fn health(&self, collection: &str) -> Result<IndexHealth>;
}

/// BM25 lexical index backend.
#[async_trait]
pub trait LexicalStore: Send + Sync {
    /// Ensures the index exists with the legal analyzers provisioned.
    ///
    /// Returns `true` when created, `false` when it already existed.
    async fn ensure_index(&self, index: &str, recreate: bool) -> Result<bool>;

    /// Indexes documents, keyed by chunk id. Returns the number written.
    async fn index_chunks(&self, index: &str, docs: &[LexicalDoc]) -> Result<usize>;

    /// Deletes every document belonging to the evidence. Returns the
    /// number removed.
    async fn delete_by_evidence(&self, index: &str, evidence_id: Uuid) -> Result<usize>;

    /// BM25 search with the legal analysis chain applied to the query.
    async fn search(
        &self,
        index: &str,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredHit>>;

    /// Reports index health.
    async fn health(&self, index: &str) -> Result<IndexHealth>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_for_kind() {
        assert_eq!(collection_for(EvidenceKind::Document), "documents");
        assert_eq!(collection_for(EvidenceKind::Transcript), "transcripts");
        assert_eq!(collection_for(EvidenceKind::Communication), "communications");
    }

    #[test]
    fn test_filter_case_scoping() {
        let case = Uuid::new_v4();
        let other = Uuid::new_v4();
        let filter = SearchFilter::for_case(case);
        assert!(filter.matches(case, ChunkType::Section, Utc::now()));
        assert!(!filter.matches(other, ChunkType::Section, Utc::now()));
    }

    #[test]
    fn test_filter_chunk_types() {
        let case = Uuid::new_v4();
        let filter = SearchFilter {
            chunk_types: vec![ChunkType::Microblock],
            ..SearchFilter::default()
        };
        assert!(filter.matches(case, ChunkType::Microblock, Utc::now()));
        assert!(!filter.matches(case, ChunkType::Section, Utc::now()));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = SearchFilter::default();
        assert!(filter.matches(Uuid::new_v4(), ChunkType::Summary, Utc::now()));
    }
}
