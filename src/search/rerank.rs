//! Cross-encoder reranking.
//!
//! Cross-encoders score `(query, document)` pairs jointly, trading
//! throughput for precision at the top of the ranking. The retriever
//! applies them as a second stage: fuse, take the top `rerank_top_n`,
//! re-sort by cross-encoder score, keep `top_k`.
//!
//! A pool size of zero bypasses reranking silently; results then keep
//! their fusion ordering.

use std::sync::Arc;

use crate::Result;
use crate::index::analyzers::analyze_legal;

/// Default number of fused candidates handed to the cross-encoder.
pub const DEFAULT_RERANK_TOP_N: usize = 100;

/// Joint scorer for `(query, document)` pairs.
pub trait CrossEncoder: Send + Sync {
    /// Scores each document against the query. Higher is more
    /// relevant. Returns one score per document.
    ///
    /// # Errors
    ///
    /// Returns an error if scoring fails.
    fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>>;
}

/// A pool of cross-encoder workers.
///
/// Scoring batches round-robin across workers. An empty pool is valid
/// and signals the retriever to bypass reranking.
pub struct CrossEncoderPool {
    encoders: Vec<Arc<dyn CrossEncoder>>,
    next: std::sync::atomic::AtomicUsize,
}

impl CrossEncoderPool {
    /// Creates a pool from worker instances.
    #[must_use]
    pub fn new(encoders: Vec<Arc<dyn CrossEncoder>>) -> Self {
        Self {
            encoders,
            next: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Creates an empty pool (reranking disabled).
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    /// Number of workers in the pool.
    #[must_use]
    pub fn size(&self) -> usize {
        self.encoders.len()
    }

    /// Whether reranking should be bypassed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }

    /// Scores documents with the next worker in round-robin order.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is empty or scoring fails.
    pub fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        let n = self.encoders.len();
        if n == 0 {
            return Err(crate::error::SearchError::Rerank(
                "cross-encoder pool is empty".to_string(),
            )
            .into());
        }
        let idx = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % n;
        self.encoders[idx].score(query, documents)
    }
}

impl std::fmt::Debug for CrossEncoderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossEncoderPool")
            .field("size", &self.encoders.len())
            .finish_non_exhaustive()
    }
}

/// Reference cross-encoder scoring by analyzed-token overlap.
///
/// Deterministic and dependency-free; production deployments swap in an
/// ONNX cross-encoder behind the same trait. Scores are the Jaccard
/// overlap of the legal-analyzed token sets, so a document restating
/// the query's terms (or their legal synonyms) scores near 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct OverlapCrossEncoder;

impl CrossEncoder for OverlapCrossEncoder {
    fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        let query_tokens: std::collections::HashSet<String> =
            analyze_legal(query).into_iter().collect();
        Ok(documents
            .iter()
            .map(|doc| {
                if query_tokens.is_empty() {
                    return 0.0;
                }
                let doc_tokens: std::collections::HashSet<String> =
                    analyze_legal(doc).into_iter().collect();
                let intersection = query_tokens.intersection(&doc_tokens).count();
                let union = query_tokens.union(&doc_tokens).count();
                #[allow(clippy::cast_precision_loss)]
                let score = if union == 0 {
                    0.0
                } else {
                    intersection as f32 / union as f32
                };
                score
            })
            .collect())
    }
}
