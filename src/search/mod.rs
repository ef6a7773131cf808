//! Hybrid retrieval over the case corpus.
//!
//! The pipeline: legal-aware preprocessing → parallel dense + lexical
//! retrieval → rank fusion (RRF or linear) → score threshold → optional
//! cross-encoder rerank → enrichment. Under `HYBRID` mode a single
//! failing backend degrades the search to the surviving ranker with a
//! warning; only both backends failing is a hard error.

mod fusion;
mod preprocess;
mod rerank;

pub use fusion::{RrfConfig, linear_fusion, reciprocal_rank_fusion};
pub use preprocess::{PreprocessedQuery, preprocess_query};
pub use rerank::{CrossEncoder, CrossEncoderPool, DEFAULT_RERANK_TOP_N, OverlapCrossEncoder};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::{ChunkType, EvidenceKind, VectorSpace};
use crate::embedding::Embedder;
use crate::error::SearchError;
use crate::store::{
    LexicalStore, RecordStore, ScoredHit, SearchFilter, VectorStore, collection_for,
};
use crate::{Error, Result};

/// Maximum allowed `top_k`.
pub const MAX_TOP_K: usize = 1000;

/// Which rankers participate in a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Dense + lexical, fused.
    Hybrid,
    /// Dense retrieval only.
    DenseOnly,
    /// BM25 retrieval only.
    LexicalOnly,
}

/// How the two rankings are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionMethod {
    /// Reciprocal rank fusion (rank-based, score-agnostic).
    Rrf,
    /// Weighted z-score combination.
    Linear,
}

/// Tunables for one search call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Apply the cross-encoder second stage.
    pub use_rerank: bool,
    /// Fused candidates handed to the cross-encoder.
    pub rerank_top_n: usize,
    /// Fusion method for hybrid mode.
    pub fusion: FusionMethod,
    /// RRF k parameter.
    pub rrf_k: u32,
    /// Dense weight for linear fusion.
    pub linear_alpha: f64,
    /// Drop fused results below this score.
    pub score_threshold: Option<f64>,
    /// Compute match highlight offsets.
    pub highlight: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            use_rerank: false,
            rerank_top_n: DEFAULT_RERANK_TOP_N,
            fusion: FusionMethod::Rrf,
            rrf_k: 60,
            linear_alpha: 0.5,
            score_threshold: None,
            highlight: true,
        }
    }
}

/// A search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Query text (must be non-empty).
    pub query: String,
    /// Keyword filters (case scoping, chunk types, dates).
    pub filter: SearchFilter,
    /// Restrict to one evidence modality; `None` searches all three.
    pub evidence_kind: Option<EvidenceKind>,
    /// Maximum results (1..=1000).
    pub top_k: usize,
    /// Ranker participation.
    pub mode: SearchMode,
    /// Tunables.
    pub options: SearchOptions,
}

impl SearchRequest {
    /// Creates a request with defaults.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filter: SearchFilter::default(),
            evidence_kind: None,
            top_k: 10,
            mode: SearchMode::Hybrid,
            options: SearchOptions::default(),
        }
    }

    /// Validates the request.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty query or out-of-range
    /// `top_k`.
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::validation("query must not be empty"));
        }
        if self.top_k == 0 || self.top_k > MAX_TOP_K {
            return Err(Error::validation(format!(
                "top_k must be in 1..={MAX_TOP_K}, got {}",
                self.top_k
            )));
        }
        Ok(())
    }
}

/// One enriched search result.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
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
    /// Chunk text.
    pub text: String,
    /// Fused (pre-rerank) score.
    pub score: f64,
    /// Cross-encoder score, when reranking ran.
    pub rerank_score: Option<f64>,
    /// Character-offset spans of query matches in `text`.
    pub highlights: Vec<(usize, usize)>,
    /// Source filename from the system of record.
    pub filename: Option<String>,
    /// Source page, when known.
    pub page: Option<u32>,
}

/// A ranked, enriched result set.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResults {
    /// Results, best first; at most `top_k`.
    pub results: Vec<RankedResult>,
    /// Number of results returned.
    pub total: usize,
    /// Wall-clock time of the search.
    pub took_ms: u64,
    /// Degradation warnings (a ranker was skipped).
    pub warnings: Vec<String>,
}

/// The hybrid retriever over both index backends.
pub struct HybridRetriever {
    vector: Arc<dyn VectorStore>,
    lexical: Arc<dyn LexicalStore>,
    records: Arc<dyn RecordStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<CrossEncoderPool>,
}

impl HybridRetriever {
    /// Creates a retriever over the given backends.
    #[must_use]
    pub fn new(
        vector: Arc<dyn VectorStore>,
        lexical: Arc<dyn LexicalStore>,
        records: Arc<dyn RecordStore>,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<CrossEncoderPool>,
    ) -> Self {
        Self {
            vector,
            lexical,
            records,
            embedder,
            reranker,
        }
    }

    /// Executes a search request through the full pipeline.
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed requests, a
    /// [`SearchError::BackendUnavailable`] when a single-ranker mode's
    /// backend is down, and [`SearchError::AllBackendsUnavailable`]
    /// when hybrid mode has nothing left to degrade to.
    pub async fn search(&self, request: &SearchRequest) -> Result<RankedResults> {
        request.validate()?;
        let start = Instant::now();
        let mut warnings = Vec::new();

        let pre = preprocess_query(&request.query);
        let collections = request.evidence_kind.map_or_else(
            || EvidenceKind::ALL.iter().map(|k| collection_for(*k)).collect(),
            |k| vec![collection_for(k)],
        );

        // The vector space follows the chunk-type filter; default is
        // the section space.
        let space = request
            .filter
            .chunk_types
            .first()
            .map_or(VectorSpace::Section, |ct| ct.vector_space());

        let fetch_limit = if request.options.use_rerank {
            request.options.rerank_top_n.max(request.top_k * 2)
        } else {
            request.top_k * 2
        };

        let run_dense = request.mode != SearchMode::LexicalOnly;
        let run_sparse = request.mode != SearchMode::DenseOnly;

        let dense_fut = self.dense_search(&pre, &collections, space, &request.filter, fetch_limit, run_dense);
        let sparse_fut =
            self.sparse_search(&pre, &collections, &request.filter, fetch_limit, run_sparse);
        let (dense, sparse) = tokio::join!(dense_fut, sparse_fut);

        let fused = self.fuse(request, dense, sparse, &mut warnings)?;

        // Threshold filter.
        let mut fused: Vec<(ScoredHit, f64)> = match request.options.score_threshold {
            Some(threshold) => fused.into_iter().filter(|(_, s)| *s >= threshold).collect(),
            None => fused,
        };

        // Optional cross-encoder rerank; an empty pool bypasses
        // silently.
        let reranked = if request.options.use_rerank && !self.reranker.is_empty() {
            fused.truncate(request.options.rerank_top_n);
            let texts: Vec<&str> = fused.iter().map(|(h, _)| h.text.as_str()).collect();
            match self.reranker.score(&pre.canonical, &texts) {
                Ok(scores) => {
                    let mut paired: Vec<((ScoredHit, f64), f64)> = fused
                        .into_iter()
                        .zip(scores.into_iter().map(f64::from))
                        .collect();
                    paired.sort_by(|a, b| {
                        b.1.partial_cmp(&a.1)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then_with(|| a.0.0.chunk_id.cmp(&b.0.0.chunk_id))
                    });
                    paired
                        .into_iter()
                        .map(|((hit, fused_score), rerank)| (hit, fused_score, Some(rerank)))
                        .collect()
                }
                Err(e) => {
                    warn!(error = %e, "rerank failed, keeping fusion order");
                    warnings.push(format!("rerank skipped: {e}"));
                    fused
                        .into_iter()
                        .map(|(hit, score)| (hit, score, None))
                        .collect()
                }
            }
        } else {
            fused
                .into_iter()
                .map(|(hit, score)| (hit, score, None))
                .collect::<Vec<_>>()
        };

        // Enrichment: filenames from the system of record, highlight
        // spans from the query terms.
        let mut filenames: HashMap<Uuid, Option<String>> = HashMap::new();
        let mut results = Vec::with_capacity(request.top_k);
        for (hit, score, rerank_score) in reranked.into_iter().take(request.top_k) {
            let filename = filenames
                .entry(hit.evidence_id)
                .or_insert_with(|| {
                    self.records
                        .get_evidence(hit.evidence_id)
                        .ok()
                        .flatten()
                        .map(|e| e.filename)
                })
                .clone();
            let highlights = if request.options.highlight {
                highlight_spans(&hit.text, &pre)
            } else {
                Vec::new()
            };
            results.push(RankedResult {
                chunk_id: hit.chunk_id,
                evidence_id: hit.evidence_id,
                case_id: hit.case_id,
                chunk_type: hit.chunk_type,
                position: hit.position,
                text: hit.text,
                score,
                rerank_score,
                highlights,
                filename,
                page: hit.page,
            });
        }

        debug!(
            query = %request.query,
            results = results.len(),
            warnings = warnings.len(),
            "search complete"
        );

        Ok(RankedResults {
            total: results.len(),
            results,
            took_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            warnings,
        })
    }

    async fn dense_search(
        &self,
        pre: &PreprocessedQuery,
        collections: &[&'static str],
        space: VectorSpace,
        filter: &SearchFilter,
        limit: usize,
        enabled: bool,
    ) -> Option<Result<Vec<ScoredHit>>> {
        if !enabled {
            return None;
        }
        let query_vec = match self.embedder.embed(&pre.canonical) {
            Ok(v) => v,
            Err(e) => {
                return Some(Err(Error::Search(SearchError::Embedding(e.to_string()))));
            }
        };
        let mut hits = Vec::new();
        for collection in collections {
            match self
                .vector
                .search(collection, space, &query_vec, filter, limit)
                .await
            {
                Ok(mut batch) => hits.append(&mut batch),
                Err(e) => {
                    return Some(Err(Error::Search(SearchError::BackendUnavailable {
                        backend: "dense",
                        reason: e.to_string(),
                    })));
                }
            }
        }
        sort_hits(&mut hits);
        hits.truncate(limit);
        Some(Ok(hits))
    }

    async fn sparse_search(
        &self,
        pre: &PreprocessedQuery,
        collections: &[&'static str],
        filter: &SearchFilter,
        limit: usize,
        enabled: bool,
    ) -> Option<Result<Vec<ScoredHit>>> {
        if !enabled {
            return None;
        }
        let mut hits = Vec::new();
        for collection in collections {
            match self
                .lexical
                .search(collection, &pre.canonical, filter, limit)
                .await
            {
                Ok(mut batch) => hits.append(&mut batch),
                Err(e) => {
                    return Some(Err(Error::Search(SearchError::BackendUnavailable {
                        backend: "lexical",
                        reason: e.to_string(),
                    })));
                }
            }
        }
        sort_hits(&mut hits);
        hits.truncate(limit);
        Some(Ok(hits))
    }

    /// Combines ranker outputs according to the mode, degrading hybrid
    /// searches when one backend is down.
    #[allow(clippy::type_complexity)]
    fn fuse(
        &self,
        request: &SearchRequest,
        dense: Option<Result<Vec<ScoredHit>>>,
        sparse: Option<Result<Vec<ScoredHit>>>,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<(ScoredHit, f64)>> {
        let single = |hits: Vec<ScoredHit>| {
            hits.into_iter().map(|h| {
                let score = h.score;
                (h, score)
            }).collect::<Vec<_>>()
        };

        match request.mode {
            SearchMode::DenseOnly => {
                let hits = dense.unwrap_or(Ok(Vec::new()))?;
                Ok(single(hits))
            }
            SearchMode::LexicalOnly => {
                let hits = sparse.unwrap_or(Ok(Vec::new()))?;
                Ok(single(hits))
            }
            SearchMode::Hybrid => {
                let dense = dense.unwrap_or(Ok(Vec::new()));
                let sparse = sparse.unwrap_or(Ok(Vec::new()));
                match (dense, sparse) {
                    (Ok(dense), Ok(sparse)) => {
                        Ok(fuse_hits(&dense, &sparse, &request.options))
                    }
                    (Ok(dense), Err(e)) => {
                        warn!(error = %e, "lexical ranker down, degrading to dense only");
                        warnings.push(format!("lexical ranker unavailable: {e}"));
                        Ok(single(dense))
                    }
                    (Err(e), Ok(sparse)) => {
                        warn!(error = %e, "dense ranker down, degrading to lexical only");
                        warnings.push(format!("dense ranker unavailable: {e}"));
                        Ok(single(sparse))
                    }
                    (Err(de), Err(se)) => {
                        warn!(dense = %de, sparse = %se, "both rankers unavailable");
                        Err(Error::Search(SearchError::AllBackendsUnavailable))
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for HybridRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRetriever")
            .field("reranker", &self.reranker)
            .finish_non_exhaustive()
    }
}

/// Deterministic hit ordering: score desc, then evidence, then
/// position.
fn sort_hits(hits: &mut [ScoredHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.evidence_id.cmp(&b.evidence_id))
            .then_with(|| a.position.cmp(&b.position))
    });
}

/// Fuses two hit lists into `(hit, fused_score)` pairs.
///
/// Chunk ids embed `(evidence_id, position)` with zero-padded
/// positions, so the fusion tie-break on chunk id is exactly the
/// deterministic `(evidence_id, position)` ordering.
fn fuse_hits(
    dense: &[ScoredHit],
    sparse: &[ScoredHit],
    options: &SearchOptions,
) -> Vec<(ScoredHit, f64)> {
    let mut by_id: HashMap<&str, &ScoredHit> = HashMap::new();
    for hit in sparse.iter().chain(dense.iter()) {
        by_id.insert(hit.chunk_id.as_str(), hit);
    }

    let fused: Vec<(String, f64)> = match options.fusion {
        FusionMethod::Rrf => {
            let dense_ids: Vec<String> = dense.iter().map(|h| h.chunk_id.clone()).collect();
            let sparse_ids: Vec<String> = sparse.iter().map(|h| h.chunk_id.clone()).collect();
            reciprocal_rank_fusion(&[&dense_ids, &sparse_ids], &RrfConfig::new(options.rrf_k))
        }
        FusionMethod::Linear => {
            let dense_scored: Vec<(String, f64)> = dense
                .iter()
                .map(|h| (h.chunk_id.clone(), h.score))
                .collect();
            let sparse_scored: Vec<(String, f64)> = sparse
                .iter()
                .map(|h| (h.chunk_id.clone(), h.score))
                .collect();
            linear_fusion(&dense_scored, &sparse_scored, options.linear_alpha)
        }
    };

    fused
        .into_iter()
        .filter_map(|(chunk_id, score)| {
            by_id
                .get(chunk_id.as_str())
                .map(|hit| ((*hit).clone(), score))
        })
        .collect()
}

/// Computes character-offset highlight spans for query terms and
/// citations in a chunk text.
fn highlight_spans(text: &str, pre: &PreprocessedQuery) -> Vec<(usize, usize)> {
    let mut spans: Vec<(usize, usize)> = Vec::new();

    let mut push_matches = |pattern: &str, case_insensitive: bool| {
        let escaped = regex::escape(pattern);
        let source = if case_insensitive {
            format!("(?i){escaped}")
        } else {
            escaped
        };
        if let Ok(re) = Regex::new(&source) {
            for m in re.find_iter(text) {
                let start = text[..m.start()].chars().count();
                let len = text[m.start()..m.end()].chars().count();
                spans.push((start, start + len));
            }
        }
    };

    for citation in &pre.citations {
        push_matches(citation, false);
    }
    for term in pre.canonical.split_whitespace() {
        if term.len() >= 3 && !pre.citations.iter().any(|c| c.contains(term)) {
            push_matches(term, true);
        }
    }

    spans.sort_unstable();
    spans.dedup();
    merge_overlaps(spans)
}

fn merge_overlaps(spans: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => *last_end = (*last_end).max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Case, Chunk, Evidence};
    use crate::embedding::FallbackEmbedder;
    use crate::index::{DualStoreWriter, IndexPayload};
    use crate::store::{SqliteLexicalStore, SqliteRecords, SqliteVectorStore};
    use crate::core::EmbeddingBatch;

    struct Fixture {
        retriever: HybridRetriever,
        case_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let records = Arc::new(SqliteRecords::in_memory().unwrap());
        records.init().unwrap();
        let vector = Arc::new(SqliteVectorStore::in_memory().unwrap());
        let lexical = Arc::new(SqliteLexicalStore::in_memory().unwrap());
        let embedder = Arc::new(FallbackEmbedder::new(64));

        vector.ensure_collection("documents", 64, false).await.unwrap();
        lexical.ensure_index("documents", false).await.unwrap();

        let case = Case::new("2024-CV-1", "Acme", "contract").unwrap();
        records.create_case(&case).unwrap();
        let evidence = Evidence::new(case.id, EvidenceKind::Document, "exhibit-a.pdf", 100);
        records.add_evidence(&evidence).unwrap();

        let texts = [
            "A contract dated Jan 15",
            "Plaintiff seeks damages of $50,000",
            "Employment discrimination on age",
        ];
        let chunks: Vec<Chunk> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                Chunk::new(evidence.id, case.id, (*t).to_string(), ChunkType::Paragraph, i)
            })
            .collect();
        let vecs: Vec<Vec<f32>> = texts
            .iter()
            .map(|t| embedder.embed(t).unwrap())
            .collect();
        let payload = IndexPayload {
            evidence_kind: EvidenceKind::Document,
            case_id: case.id,
            evidence_id: evidence.id,
            chunks,
            embeddings: EmbeddingBatch {
                summary: vecs.clone(),
                section: vecs.clone(),
                microblock: vecs,
            },
        };
        let writer = DualStoreWriter::new(vector.clone(), lexical.clone());
        let report = writer.write(&payload).await.unwrap();
        assert!(report.success);

        Fixture {
            retriever: HybridRetriever::new(
                vector,
                lexical,
                records,
                embedder,
                Arc::new(CrossEncoderPool::disabled()),
            ),
            case_id: case.id,
        }
    }

    fn request(fix: &Fixture, query: &str) -> SearchRequest {
        let mut req = SearchRequest::new(query);
        req.filter = SearchFilter::for_case(fix.case_id);
        req.evidence_kind = Some(EvidenceKind::Document);
        req
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let fix = fixture().await;
        let mut req = request(&fix, "   ");
        req.top_k = 5;
        let err = fix.retriever.search(&req).await.unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[tokio::test]
    async fn test_top_k_bounds() {
        let fix = fixture().await;
        let mut req = request(&fix, "contract");
        req.top_k = 0;
        assert!(fix.retriever.search(&req).await.is_err());
        req.top_k = MAX_TOP_K + 1;
        assert!(fix.retriever.search(&req).await.is_err());
    }

    #[tokio::test]
    async fn test_hybrid_returns_relevant_chunks() {
        let fix = fixture().await;
        let mut req = request(&fix, "contract damages");
        req.top_k = 2;
        let results = fix.retriever.search(&req).await.unwrap();
        assert!(results.total <= 2);
        assert!(!results.results.is_empty());
        assert!(results.warnings.is_empty());
        // Scores are finite and non-increasing.
        for pair in results.results.windows(2) {
            assert!(pair[0].score.is_finite());
            assert!(pair[0].score >= pair[1].score);
        }
        // Enrichment attached the filename.
        assert_eq!(
            results.results[0].filename.as_deref(),
            Some("exhibit-a.pdf")
        );
    }

    #[tokio::test]
    async fn test_results_case_scoped() {
        let fix = fixture().await;
        let mut req = request(&fix, "contract");
        req.filter = SearchFilter::for_case(Uuid::new_v4());
        let results = fix.retriever.search(&req).await.unwrap();
        assert!(results.results.is_empty());
    }

    #[tokio::test]
    async fn test_stopword_only_query_is_empty_not_error() {
        let fix = fixture().await;
        let req = request(&fix, "the whereas");
        let results = fix.retriever.search(&req).await.unwrap();
        assert!(results.results.is_empty());
    }

    #[tokio::test]
    async fn test_lexical_only_mode() {
        let fix = fixture().await;
        let mut req = request(&fix, "damages");
        req.mode = SearchMode::LexicalOnly;
        let results = fix.retriever.search(&req).await.unwrap();
        assert_eq!(results.results.len(), 1);
        assert_eq!(results.results[0].position, 1);
    }

    #[tokio::test]
    async fn test_rerank_with_empty_pool_bypasses() {
        let fix = fixture().await;
        let mut req = request(&fix, "contract damages");
        req.options.use_rerank = true;
        let results = fix.retriever.search(&req).await.unwrap();
        assert!(results.results.iter().all(|r| r.rerank_score.is_none()));
        assert!(results.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_rerank_attaches_scores_and_keeps_original() {
        let fix = fixture().await;
        let mut req = request(&fix, "contract damages");
        req.options.use_rerank = true;

        let retriever = HybridRetriever {
            reranker: Arc::new(CrossEncoderPool::new(vec![Arc::new(OverlapCrossEncoder)])),
            ..fix.retriever
        };
        let results = retriever.search(&req).await.unwrap();
        assert!(!results.results.is_empty());
        for r in &results.results {
            assert!(r.rerank_score.is_some());
            assert!(r.score.is_finite());
        }
        // Rerank ordering is by cross-encoder score.
        for pair in results.results.windows(2) {
            assert!(pair[0].rerank_score >= pair[1].rerank_score);
        }
    }

    #[tokio::test]
    async fn test_score_threshold_filters() {
        let fix = fixture().await;
        let mut req = request(&fix, "contract");
        req.options.score_threshold = Some(f64::MAX);
        let results = fix.retriever.search(&req).await.unwrap();
        assert!(results.results.is_empty());
    }

    #[tokio::test]
    async fn test_highlights_cover_query_terms() {
        let fix = fixture().await;
        let mut req = request(&fix, "contract");
        req.mode = SearchMode::LexicalOnly;
        let results = fix.retriever.search(&req).await.unwrap();
        let hit = &results.results[0];
        assert!(!hit.highlights.is_empty());
        let (start, end) = hit.highlights[0];
        let span: String = hit.text.chars().skip(start).take(end - start).collect();
        assert_eq!(span.to_lowercase(), "contract");
    }

    #[test]
    fn test_merge_overlaps() {
        let merged = merge_overlaps(vec![(0, 4), (2, 6), (8, 10)]);
        assert_eq!(merged, vec![(0, 6), (8, 10)]);
    }

    #[test]
    fn test_fuse_hits_rrf_prefers_dual_ranker_item() {
        let case = Uuid::new_v4();
        let ev = Uuid::new_v4();
        let hit = |pos: usize, score: f64| ScoredHit {
            chunk_id: crate::core::chunk_id(ev, pos),
            evidence_id: ev,
            case_id: case,
            chunk_type: ChunkType::Paragraph,
            position: pos,
            score,
            text: String::new(),
            page: None,
        };
        // Chunk 1 appears in both rankers; chunks 0 and 2 top one each.
        let dense = vec![hit(0, 0.9), hit(1, 0.8)];
        let sparse = vec![hit(2, 5.0), hit(1, 4.0)];
        let fused = fuse_hits(&dense, &sparse, &SearchOptions::default());
        assert_eq!(fused[0].0.position, 1);
    }
}
