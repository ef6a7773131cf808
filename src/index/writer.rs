//! Dual-store writer: atomic-by-compensation indexing.
//!
//! A chunk must land in both the vector store and the lexical store, or
//! in neither. The protocol is vector-first:
//!
//! 1. Write all points to the vector store. A failure here fails fast,
//!    nothing to undo.
//! 2. Write all documents to the lexical store. A failure here triggers
//!    a compensating delete of the vector writes, keyed by evidence id.
//!
//! If the compensating delete itself fails, the partial state is
//! reported as a consistency error and the orphan reaper repairs it on
//! its next sweep. Writes are idempotent: chunk ids are deterministic
//! and both stores overwrite on conflict, and the writer clears prior
//! entries for the evidence before writing.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::core::{Chunk, EmbeddingBatch, EvidenceKind, VectorSpace};
use crate::error::IndexError;
use crate::store::{LexicalDoc, LexicalStore, VectorPoint, VectorStore, collection_for};
use crate::{Error, Result};
use chrono::Utc;
use uuid::Uuid;

/// Input to a dual-store write: the chunks of one evidence plus their
/// embeddings in all three spaces.
#[derive(Debug)]
pub struct IndexPayload {
    /// Evidence modality (selects the target collection/index).
    pub evidence_kind: EvidenceKind,
    /// Owning case.
    pub case_id: Uuid,
    /// Evidence being indexed.
    pub evidence_id: Uuid,
    /// Chunks to index.
    pub chunks: Vec<Chunk>,
    /// One embedding per chunk per space.
    pub embeddings: EmbeddingBatch,
}

impl IndexPayload {
    /// Validates the chunk/embedding shape.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::PayloadMismatch`] when any space's length
    /// differs from the chunk count.
    pub fn validate(&self) -> Result<()> {
        for space in VectorSpace::ALL {
            let len = self.embeddings.space(space).len();
            if len != self.chunks.len() {
                return Err(Error::Index(IndexError::PayloadMismatch {
                    chunks: self.chunks.len(),
                    embeddings: len,
                    space: space.as_str(),
                }));
            }
        }
        Ok(())
    }
}

/// Outcome of a dual-store write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    /// Whether both stores committed.
    pub success: bool,
    /// Documents written (0 on failure).
    pub documents_written: usize,
    /// Errors encountered, in occurrence order.
    pub errors: Vec<String>,
}

/// Writes chunks to both index backends with compensation on partial
/// failure.
pub struct DualStoreWriter {
    vector: Arc<dyn VectorStore>,
    lexical: Arc<dyn LexicalStore>,
}

impl DualStoreWriter {
    /// Creates a writer over the two backends.
    #[must_use]
    pub fn new(vector: Arc<dyn VectorStore>, lexical: Arc<dyn LexicalStore>) -> Self {
        Self { vector, lexical }
    }

    /// Indexes one evidence's chunks into both stores.
    ///
    /// Returns an [`IndexReport`]; infrastructure failures that leave a
    /// consistent state are reported in the `errors` field rather than
    /// as an `Err`. Only an unrepairable partial state surfaces as
    /// [`IndexError::CompensationFailed`].
    ///
    /// # Errors
    ///
    /// Returns a validation error for malformed payloads and a
    /// consistency error when compensation fails.
    pub async fn write(&self, payload: &IndexPayload) -> Result<IndexReport> {
        payload.validate()?;
        let collection = collection_for(payload.evidence_kind);
        let evidence_id = payload.evidence_id;

        if payload.chunks.is_empty() {
            return Ok(IndexReport {
                success: true,
                documents_written: 0,
                errors: Vec::new(),
            });
        }

        let now = Utc::now();
        let points: Vec<VectorPoint> = payload
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| VectorPoint {
                chunk_id: chunk.id.clone(),
                evidence_id,
                case_id: payload.case_id,
                chunk_type: chunk.chunk_type,
                position: chunk.position,
                text: chunk.text.clone(),
                page: chunk.page,
                vectors: [
                    (VectorSpace::Summary, payload.embeddings.summary[i].clone()),
                    (VectorSpace::Section, payload.embeddings.section[i].clone()),
                    (
                        VectorSpace::Microblock,
                        payload.embeddings.microblock[i].clone(),
                    ),
                ],
                created_at: now,
            })
            .collect();

        // Overwrite semantics: clear anything previously indexed for
        // this evidence so re-indexing never accumulates.
        let _ = self.vector.delete_by_evidence(collection, evidence_id).await;
        let _ = self.lexical.delete_by_evidence(collection, evidence_id).await;

        // Step 1: vector store (primary). Fail fast on error.
        if let Err(e) = self.vector.upsert(collection, &points).await {
            warn!(evidence_id = %evidence_id, error = %e, "vector write failed");
            return Ok(IndexReport {
                success: false,
                documents_written: 0,
                errors: vec![
                    IndexError::VectorWriteFailed {
                        evidence_id: evidence_id.to_string(),
                        reason: e.to_string(),
                    }
                    .to_string(),
                ],
            });
        }

        // Step 2: lexical store (secondary). Compensate on error.
        let docs: Vec<LexicalDoc> = payload
            .chunks
            .iter()
            .map(|chunk| LexicalDoc {
                chunk_id: chunk.id.clone(),
                evidence_id,
                case_id: payload.case_id,
                chunk_type: chunk.chunk_type,
                position: chunk.position,
                text: chunk.text.clone(),
                page: chunk.page,
                created_at: now,
            })
            .collect();

        if let Err(lexical_err) = self.lexical.index_chunks(collection, &docs).await {
            warn!(
                evidence_id = %evidence_id,
                error = %lexical_err,
                "lexical write failed, compensating vector store"
            );
            let mut errors = vec![
                IndexError::LexicalWriteFailed {
                    evidence_id: evidence_id.to_string(),
                    reason: lexical_err.to_string(),
                }
                .to_string(),
            ];

            match self.vector.delete_by_evidence(collection, evidence_id).await {
                Ok(removed) => {
                    info!(evidence_id = %evidence_id, removed, "vector writes rolled back");
                }
                Err(comp_err) => {
                    error!(
                        evidence_id = %evidence_id,
                        error = %comp_err,
                        "compensating delete failed, orphans remain until reaped"
                    );
                    errors.push(comp_err.to_string());
                    return Err(Error::Index(IndexError::CompensationFailed {
                        evidence_id: evidence_id.to_string(),
                        reason: comp_err.to_string(),
                    }));
                }
            }

            return Ok(IndexReport {
                success: false,
                documents_written: 0,
                errors,
            });
        }

        info!(
            evidence_id = %evidence_id,
            collection,
            chunks = payload.chunks.len(),
            "evidence indexed in both stores"
        );
        Ok(IndexReport {
            success: true,
            documents_written: payload.chunks.len(),
            errors: Vec::new(),
        })
    }
}
