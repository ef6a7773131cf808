//! Orphan reaper: repairs dual-store inconsistencies.
//!
//! Compensation is best-effort; when it fails, or when evidence rows
//! are deleted out from under the indexes, vector points can outlive
//! their evidence. The reaper scans the vector store in batches, checks
//! each point's evidence against the system of record, and deletes
//! orphans. It is invoked on a schedule by the operator (default
//! cadence 1 hour) rather than owning its own timer.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::Result;
use crate::store::{DOMAIN_INDEXES, LexicalStore, RecordStore, VectorStore};

/// Default number of points examined per scroll page.
pub const DEFAULT_REAP_BATCH: usize = 128;

/// Outcome of one reaper sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Points examined across all collections.
    pub scanned: usize,
    /// Orphaned evidence groups deleted.
    pub orphaned_evidence: usize,
    /// Points removed from the vector store.
    pub vector_points_removed: usize,
    /// Documents removed from the lexical store.
    pub lexical_docs_removed: usize,
}

/// Scheduled repair job for the dual-store invariant.
pub struct OrphanReaper {
    records: Arc<dyn RecordStore>,
    vector: Arc<dyn VectorStore>,
    lexical: Arc<dyn LexicalStore>,
    batch: usize,
}

impl OrphanReaper {
    /// Creates a reaper over the record store and both index backends.
    #[must_use]
    pub fn new(
        records: Arc<dyn RecordStore>,
        vector: Arc<dyn VectorStore>,
        lexical: Arc<dyn LexicalStore>,
    ) -> Self {
        Self {
            records,
            vector,
            lexical,
            batch: DEFAULT_REAP_BATCH,
        }
    }

    /// Overrides the scroll batch size.
    #[must_use]
    pub fn with_batch(mut self, batch: usize) -> Self {
        self.batch = batch.max(1);
        self
    }

    /// Sweeps every domain collection once, deleting points whose
    /// evidence no longer exists in the system of record.
    ///
    /// # Errors
    ///
    /// Returns an error if a backend scan fails; deletions already
    /// performed are kept (the sweep is idempotent and can re-run).
    pub async fn sweep(&self) -> Result<ReapReport> {
        let mut report = ReapReport::default();

        for collection in DOMAIN_INDEXES {
            let mut offset = 0;
            let mut orphans: HashSet<Uuid> = HashSet::new();
            let mut checked: HashSet<Uuid> = HashSet::new();

            loop {
                let page = self.vector.scroll(collection, offset, self.batch).await?;
                if page.is_empty() {
                    break;
                }
                report.scanned += page.len();
                offset += page.len();

                for point in &page {
                    if !checked.insert(point.evidence_id) {
                        continue;
                    }
                    if !self.records.evidence_exists(point.evidence_id)? {
                        orphans.insert(point.evidence_id);
                    }
                }
            }

            for evidence_id in orphans {
                let vectors = self.vector.delete_by_evidence(collection, evidence_id).await?;
                let docs = match self.lexical.delete_by_evidence(collection, evidence_id).await {
                    Ok(n) => n,
                    Err(e) => {
                        warn!(collection, %evidence_id, error = %e, "lexical cleanup failed");
                        0
                    }
                };
                report.orphaned_evidence += 1;
                report.vector_points_removed += vectors;
                report.lexical_docs_removed += docs;
                info!(collection, %evidence_id, vectors, docs, "reaped orphaned evidence");
            }
        }

        Ok(report)
    }
}
