//! SQLite-backed reference vector store.
//!
//! Stores one point per chunk with three named dense vectors and scores
//! searches by cosine similarity. Production deployments swap in a
//! remote engine behind the same [`VectorStore`] trait; the scan-based
//! scoring here is the reference behavior the engine must match.

#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_precision_loss)]

use std::str::FromStr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::core::{ChunkType, VectorSpace};
use crate::embedding::cosine_similarity;
use crate::error::StoreError;
use crate::store::{IndexHealth, PointRef, ScoredHit, SearchFilter, VectorPoint, VectorStore};
use crate::{Error, Result};

const VECTOR_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS collections (
    name TEXT PRIMARY KEY,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS points (
    collection TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    evidence_id TEXT NOT NULL,
    case_id TEXT NOT NULL,
    chunk_type TEXT NOT NULL,
    position INTEGER NOT NULL,
    text TEXT NOT NULL,
    page INTEGER,
    vec_summary BLOB NOT NULL,
    vec_section BLOB NOT NULL,
    vec_microblock BLOB NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (collection, chunk_id),
    FOREIGN KEY (collection) REFERENCES collections(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_points_evidence ON points(collection, evidence_id);
CREATE INDEX IF NOT EXISTS idx_points_case ON points(collection, case_id);
";

/// Serializes an f32 vector to little-endian bytes.
fn encode_vec(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Deserializes little-endian bytes back to an f32 vector.
fn decode_vec(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// SQLite-backed [`VectorStore`].
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

impl SqliteVectorStore {
    /// Opens or creates the vector database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::from)?;
        Self::setup(conn)
    }

    /// Creates an in-memory vector database. Useful for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        Self::setup(conn)
    }

    fn setup(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON;", [])
            .map_err(StoreError::from)?;
        conn.execute_batch(VECTOR_SCHEMA_SQL)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Store(StoreError::Database("connection mutex poisoned".into())))
    }

    const fn space_column(space: VectorSpace) -> &'static str {
        match space {
            VectorSpace::Summary => "vec_summary",
            VectorSpace::Section => "vec_section",
            VectorSpace::Microblock => "vec_microblock",
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn ensure_collection(
        &self,
        collection: &str,
        dimensions: usize,
        recreate: bool,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM collections WHERE name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)?;

        if exists.is_some() {
            if !recreate {
                return Ok(false);
            }
            conn.execute(
                "DELETE FROM points WHERE collection = ?1",
                params![collection],
            )
            .map_err(StoreError::from)?;
            conn.execute(
                "DELETE FROM collections WHERE name = ?1",
                params![collection],
            )
            .map_err(StoreError::from)?;
        }

        conn.execute(
            "INSERT INTO collections (name, dimensions, created_at) VALUES (?1, ?2, ?3)",
            params![collection, dimensions as i64, Utc::now().to_rfc3339()],
        )
        .map_err(StoreError::from)?;
        Ok(true)
    }

    async fn upsert(&self, collection: &str, points: &[VectorPoint]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        for point in points {
            let find = |space: VectorSpace| {
                point
                    .vectors
                    .iter()
                    .find(|(s, _)| *s == space)
                    .map(|(_, v)| encode_vec(v))
                    .unwrap_or_default()
            };
            tx.execute(
                "INSERT OR REPLACE INTO points
                 (collection, chunk_id, evidence_id, case_id, chunk_type, position, text, page,
                  vec_summary, vec_section, vec_microblock, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    collection,
                    point.chunk_id,
                    point.evidence_id.to_string(),
                    point.case_id.to_string(),
                    point.chunk_type.as_str(),
                    point.position as i64,
                    point.text,
                    point.page.map(i64::from),
                    find(VectorSpace::Summary),
                    find(VectorSpace::Section),
                    find(VectorSpace::Microblock),
                    point.created_at.to_rfc3339(),
                ],
            )
            .map_err(StoreError::from)?;
        }
        tx.commit()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok(points.len())
    }

    async fn delete_by_evidence(&self, collection: &str, evidence_id: Uuid) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM points WHERE collection = ?1 AND evidence_id = ?2",
                params![collection, evidence_id.to_string()],
            )
            .map_err(StoreError::from)?;
        Ok(removed)
    }

    async fn search(
        &self,
        collection: &str,
        space: VectorSpace,
        query: &[f32],
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredHit>> {
        let conn = self.lock()?;
        let column = Self::space_column(space);
        let sql = format!(
            "SELECT chunk_id, evidence_id, case_id, chunk_type, position, text, page, {column}, created_at
             FROM points WHERE collection = ?1"
        );
        let mut stmt = conn.prepare(&sql).map_err(StoreError::from)?;
        let rows = stmt
            .query_map(params![collection], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<i64>>(6)?,
                    row.get::<_, Vec<u8>>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })
            .map_err(StoreError::from)?;

        let mut hits = Vec::new();
        for row in rows {
            let (chunk_id, evidence_id, case_id, chunk_type, position, text, page, blob, created_at) =
                row.map_err(StoreError::from)?;
            let case_id = Uuid::parse_str(&case_id)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let chunk_type = ChunkType::from_str(&chunk_type)?;
            let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| StoreError::Serialization(e.to_string()))?
                .with_timezone(&Utc);
            if !filter.matches(case_id, chunk_type, created_at) {
                continue;
            }
            let vector = decode_vec(&blob);
            if vector.is_empty() {
                continue;
            }
            let score = f64::from(cosine_similarity(query, &vector));
            hits.push(ScoredHit {
                chunk_id,
                evidence_id: Uuid::parse_str(&evidence_id)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?,
                case_id,
                chunk_type,
                position: position as usize,
                score,
                text,
                page: page.map(|p| p as u32),
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.evidence_id.cmp(&b.evidence_id))
                .then_with(|| a.position.cmp(&b.position))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scroll(
        &self,
        collection: &str,
        offset: usize,
        batch: usize,
    ) -> Result<Vec<PointRef>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT chunk_id, evidence_id FROM points WHERE collection = ?1
                 ORDER BY chunk_id LIMIT ?2 OFFSET ?3",
            )
            .map_err(StoreError::from)?;
        let rows = stmt
            .query_map(
                params![collection, batch as i64, offset as i64],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .map_err(StoreError::from)?;

        let mut refs = Vec::new();
        for row in rows {
            let (chunk_id, evidence_id) = row.map_err(StoreError::from)?;
            refs.push(PointRef {
                chunk_id,
                evidence_id: Uuid::parse_str(&evidence_id)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?,
            });
        }
        Ok(refs)
    }

    async fn health(&self, collection: &str) -> Result<IndexHealth> {
        let conn = self.lock()?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM collections WHERE name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)?;
        if exists.is_none() {
            return Ok(IndexHealth {
                exists: false,
                doc_count: 0,
                size_mb: 0.0,
            });
        }
        let (count, bytes): (i64, i64) = conn
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(LENGTH(text) + LENGTH(vec_summary) + LENGTH(vec_section)
                                     + LENGTH(vec_microblock)), 0)
                 FROM points WHERE collection = ?1",
                params![collection],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(StoreError::from)?;
        Ok(IndexHealth {
            exists: true,
            doc_count: count as usize,
            size_mb: bytes as f64 / 1_000_000.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::chunk_id;

    fn point(evidence_id: Uuid, case_id: Uuid, position: usize, text: &str, vec: Vec<f32>) -> VectorPoint {
        VectorPoint {
            chunk_id: chunk_id(evidence_id, position),
            evidence_id,
            case_id,
            chunk_type: ChunkType::Section,
            position,
            text: text.to_string(),
            page: None,
            vectors: [
                (VectorSpace::Summary, vec.clone()),
                (VectorSpace::Section, vec.clone()),
                (VectorSpace::Microblock, vec),
            ],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_ensure_collection_idempotent() {
        let store = SqliteVectorStore::in_memory().unwrap();
        assert!(store.ensure_collection("documents", 4, false).await.unwrap());
        assert!(!store.ensure_collection("documents", 4, false).await.unwrap());
        // Recreate drops and recreates.
        assert!(store.ensure_collection("documents", 4, true).await.unwrap());
    }

    #[tokio::test]
    async fn test_upsert_and_search() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store.ensure_collection("documents", 4, false).await.unwrap();
        let case = Uuid::new_v4();
        let ev = Uuid::new_v4();

        store
            .upsert(
                "documents",
                &[
                    point(ev, case, 0, "contract text", vec![1.0, 0.0, 0.0, 0.0]),
                    point(ev, case, 1, "damages text", vec![0.0, 1.0, 0.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search(
                "documents",
                VectorSpace::Section,
                &[1.0, 0.1, 0.0, 0.0],
                &SearchFilter::for_case(case),
                10,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].position, 0);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_chunk_id() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store.ensure_collection("documents", 4, false).await.unwrap();
        let case = Uuid::new_v4();
        let ev = Uuid::new_v4();

        let p = point(ev, case, 0, "first", vec![1.0, 0.0, 0.0, 0.0]);
        store.upsert("documents", std::slice::from_ref(&p)).await.unwrap();
        store.upsert("documents", &[p]).await.unwrap();

        let health = store.health("documents").await.unwrap();
        assert_eq!(health.doc_count, 1);
    }

    #[tokio::test]
    async fn test_case_scoping() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store.ensure_collection("documents", 4, false).await.unwrap();
        let case_a = Uuid::new_v4();
        let case_b = Uuid::new_v4();

        store
            .upsert(
                "documents",
                &[
                    point(Uuid::new_v4(), case_a, 0, "a", vec![1.0, 0.0, 0.0, 0.0]),
                    point(Uuid::new_v4(), case_b, 0, "b", vec![1.0, 0.0, 0.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search(
                "documents",
                VectorSpace::Section,
                &[1.0, 0.0, 0.0, 0.0],
                &SearchFilter::for_case(case_a),
                10,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].case_id, case_a);
    }

    #[tokio::test]
    async fn test_delete_by_evidence() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store.ensure_collection("documents", 4, false).await.unwrap();
        let case = Uuid::new_v4();
        let ev = Uuid::new_v4();
        let other = Uuid::new_v4();

        store
            .upsert(
                "documents",
                &[
                    point(ev, case, 0, "x", vec![1.0, 0.0, 0.0, 0.0]),
                    point(ev, case, 1, "y", vec![1.0, 0.0, 0.0, 0.0]),
                    point(other, case, 0, "z", vec![1.0, 0.0, 0.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let removed = store.delete_by_evidence("documents", ev).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.health("documents").await.unwrap().doc_count, 1);
    }

    #[tokio::test]
    async fn test_scroll_pages() {
        let store = SqliteVectorStore::in_memory().unwrap();
        store.ensure_collection("documents", 4, false).await.unwrap();
        let case = Uuid::new_v4();
        let ev = Uuid::new_v4();
        let points: Vec<VectorPoint> = (0..5)
            .map(|i| point(ev, case, i, "t", vec![0.5, 0.5, 0.0, 0.0]))
            .collect();
        store.upsert("documents", &points).await.unwrap();

        let page1 = store.scroll("documents", 0, 3).await.unwrap();
        let page2 = store.scroll("documents", 3, 3).await.unwrap();
        assert_eq!(page1.len(), 3);
        assert_eq!(page2.len(), 2);
    }

    #[tokio::test]
    async fn test_health_missing_collection() {
        let store = SqliteVectorStore::in_memory().unwrap();
        let health = store.health("nope").await.unwrap();
        assert!(!health.exists);
        assert_eq!(health.doc_count, 0);
    }

    #[test]
    fn test_vec_encoding_roundtrip() {
        let v = vec![0.25f32, -1.5, 3.75];
        assert_eq!(decode_vec(&encode_vec(&v)), v);
    }
}
