//! SQLite FTS5-backed reference lexical store.
//!
//! Documents are analyzed at index time with the legal chain (stopwords,
//! stemming, synonym expansion) and the shingle chain; queries run
//! through the same chains, so synonym and phrase matching behave like a
//! lexical engine provisioned with the analyzers in
//! [`crate::index::analyzers`]. BM25 ranking comes from FTS5.
//!
//! Citation terms (`Section 365`, `18 U.S.C. § 1001`) are matched
//! against the *raw* text, case preserved, because the analyzed index
//! folds case and splits punctuation. A citation hit ranks above plain
//! term hits.

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

use crate::core::ChunkType;
use crate::error::StoreError;
use crate::index::analyzers::{analyze_legal, analyze_shingles, extract_citations};
use crate::store::{IndexHealth, LexicalDoc, LexicalStore, ScoredHit, SearchFilter};
use crate::{Error, Result};

const LEXICAL_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS indexes (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS docs (
    idx_name TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    evidence_id TEXT NOT NULL,
    case_id TEXT NOT NULL,
    chunk_type TEXT NOT NULL,
    position INTEGER NOT NULL,
    text TEXT NOT NULL,
    legal_text TEXT NOT NULL,
    shingle_text TEXT NOT NULL,
    page INTEGER,
    created_at TEXT NOT NULL,
    PRIMARY KEY (idx_name, chunk_id)
);

CREATE INDEX IF NOT EXISTS idx_docs_evidence ON docs(idx_name, evidence_id);
CREATE INDEX IF NOT EXISTS idx_docs_case ON docs(idx_name, case_id);

-- FTS5 over the pre-analyzed columns. Shingle tokens join words with
-- '_', which tokenchars keeps as a single token.
CREATE VIRTUAL TABLE IF NOT EXISTS docs_fts USING fts5(
    legal_text,
    shingle_text,
    content='docs',
    content_rowid='rowid',
    tokenize="unicode61 tokenchars '_'"
);

CREATE TRIGGER IF NOT EXISTS docs_ai AFTER INSERT ON docs BEGIN
    INSERT INTO docs_fts(rowid, legal_text, shingle_text)
    VALUES (new.rowid, new.legal_text, new.shingle_text);
END;

CREATE TRIGGER IF NOT EXISTS docs_ad AFTER DELETE ON docs BEGIN
    INSERT INTO docs_fts(docs_fts, rowid, legal_text, shingle_text)
    VALUES('delete', old.rowid, old.legal_text, old.shingle_text);
END;

CREATE TRIGGER IF NOT EXISTS docs_au AFTER UPDATE ON docs BEGIN
    INSERT INTO docs_fts(docs_fts, rowid, legal_text, shingle_text)
    VALUES('delete', old.rowid, old.legal_text, old.shingle_text);
    INSERT INTO docs_fts(rowid, legal_text, shingle_text)
    VALUES (new.rowid, new.legal_text, new.shingle_text);
END;
"#;

/// SQLite-backed [`LexicalStore`].
pub struct SqliteLexicalStore {
    conn: Mutex<Connection>,
}

impl SqliteLexicalStore {
    /// Opens or creates the lexical database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::from)?;
        Self::setup(conn)
    }

    /// Creates an in-memory lexical database. Useful for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        Self::setup(conn)
    }

    fn setup(conn: Connection) -> Result<Self> {
        conn.execute_batch(LEXICAL_SCHEMA_SQL)
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

    /// Builds the FTS5 match expression for an analyzed query.
    ///
    /// Tokens are OR-ed so any matching term contributes BM25 weight;
    /// query shingles are matched against the shingle column for phrase
    /// affinity.
    fn build_match(query: &str) -> Option<String> {
        let sanitize = |t: &str| {
            t.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        };

        let mut legal: Vec<String> = analyze_legal(query)
            .into_iter()
            .map(|t| sanitize(&t))
            .filter(|t| !t.is_empty())
            .collect();
        legal.sort();
        legal.dedup();

        let mut shingles: Vec<String> = analyze_shingles(query)
            .into_iter()
            .filter(|t| t.contains('_'))
            .map(|t| sanitize(&t))
            .filter(|t| !t.is_empty())
            .collect();
        shingles.sort();
        shingles.dedup();

        let mut parts = Vec::new();
        if !legal.is_empty() {
            let terms: Vec<String> = legal.iter().map(|t| format!("\"{t}\"")).collect();
            parts.push(format!("legal_text:({})", terms.join(" OR ")));
        }
        if !shingles.is_empty() {
            let terms: Vec<String> = shingles.iter().map(|t| format!("\"{t}\"")).collect();
            parts.push(format!("shingle_text:({})", terms.join(" OR ")));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" OR "))
        }
    }

    #[allow(clippy::type_complexity)]
    fn decode_hit(
        row: (String, String, String, String, i64, String, Option<i64>, String),
        score: f64,
        filter: &SearchFilter,
    ) -> Result<Option<ScoredHit>> {
        let (chunk_id, evidence_id, case_id, chunk_type, position, text, page, created_at) = row;
        let case_id =
            Uuid::parse_str(&case_id).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let chunk_type = ChunkType::from_str(&chunk_type)?;
        let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StoreError::Serialization(e.to_string()))?
            .with_timezone(&Utc);
        if !filter.matches(case_id, chunk_type, created_at) {
            return Ok(None);
        }
        Ok(Some(ScoredHit {
            chunk_id,
            evidence_id: Uuid::parse_str(&evidence_id)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
            case_id,
            chunk_type,
            position: position as usize,
            score,
            text,
            page: page.map(|p| p as u32),
        }))
    }
}

const DOC_COLUMNS: &str = "chunk_id, evidence_id, case_id, chunk_type, position, text, page, created_at";

#[async_trait]
impl LexicalStore for SqliteLexicalStore {
    async fn ensure_index(&self, index: &str, recreate: bool) -> Result<bool> {
        let conn = self.lock()?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM indexes WHERE name = ?1",
                params![index],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)?;

        if exists.is_some() {
            if !recreate {
                return Ok(false);
            }
            conn.execute("DELETE FROM docs WHERE idx_name = ?1", params![index])
                .map_err(StoreError::from)?;
            conn.execute("DELETE FROM indexes WHERE name = ?1", params![index])
                .map_err(StoreError::from)?;
        }

        conn.execute(
            "INSERT INTO indexes (name, created_at) VALUES (?1, ?2)",
            params![index, Utc::now().to_rfc3339()],
        )
        .map_err(StoreError::from)?;
        Ok(true)
    }

    async fn index_chunks(&self, index: &str, docs: &[LexicalDoc]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        for doc in docs {
            let legal_text = analyze_legal(&doc.text).join(" ");
            let shingle_text = analyze_shingles(&doc.text).join(" ");
            // Delete-then-insert keeps the FTS triggers symmetrical for
            // overwrites of an existing chunk id.
            tx.execute(
                "DELETE FROM docs WHERE idx_name = ?1 AND chunk_id = ?2",
                params![index, doc.chunk_id],
            )
            .map_err(StoreError::from)?;
            tx.execute(
                "INSERT INTO docs
                 (idx_name, chunk_id, evidence_id, case_id, chunk_type, position, text,
                  legal_text, shingle_text, page, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    index,
                    doc.chunk_id,
                    doc.evidence_id.to_string(),
                    doc.case_id.to_string(),
                    doc.chunk_type.as_str(),
                    doc.position as i64,
                    doc.text,
                    legal_text,
                    shingle_text,
                    doc.page.map(i64::from),
                    doc.created_at.to_rfc3339(),
                ],
            )
            .map_err(StoreError::from)?;
        }
        tx.commit()
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok(docs.len())
    }

    async fn delete_by_evidence(&self, index: &str, evidence_id: Uuid) -> Result<usize> {
        let conn = self.lock()?;
        let removed = conn
            .execute(
                "DELETE FROM docs WHERE idx_name = ?1 AND evidence_id = ?2",
                params![index, evidence_id.to_string()],
            )
            .map_err(StoreError::from)?;
        Ok(removed)
    }

    async fn search(
        &self,
        index: &str,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<ScoredHit>> {
        let conn = self.lock()?;
        let mut hits: Vec<ScoredHit> = Vec::new();

        // BM25 over the analyzed columns.
        if let Some(match_expr) = Self::build_match(query) {
            let sql = format!(
                "SELECT d.{}, -bm25(docs_fts) AS score
                 FROM docs_fts
                 JOIN docs d ON d.rowid = docs_fts.rowid
                 WHERE docs_fts MATCH ?1 AND d.idx_name = ?2
                 ORDER BY bm25(docs_fts)",
                DOC_COLUMNS.replace(", ", ", d.")
            );
            let mut stmt = conn.prepare(&sql).map_err(StoreError::from)?;
            let rows = stmt
                .query_map(params![match_expr, index], |row| {
                    Ok((
                        (
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, Option<i64>>(6)?,
                            row.get::<_, String>(7)?,
                        ),
                        row.get::<_, f64>(8)?,
                    ))
                })
                .map_err(StoreError::from)?;
            for row in rows {
                let (raw, score) = row.map_err(StoreError::from)?;
                if let Some(hit) = Self::decode_hit(raw, score, filter)? {
                    hits.push(hit);
                }
            }
        }

        // Citation terms match the raw text, case preserved.
        let citations = extract_citations(query);
        if !citations.is_empty() {
            let top_score = hits.first().map_or(1.0, |h| h.score.abs());
            for citation in &citations {
                let sql = format!(
                    "SELECT {DOC_COLUMNS} FROM docs
                     WHERE idx_name = ?1 AND instr(text, ?2) > 0"
                );
                let mut stmt = conn.prepare(&sql).map_err(StoreError::from)?;
                let rows = stmt
                    .query_map(params![index, citation], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, i64>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, Option<i64>>(6)?,
                            row.get::<_, String>(7)?,
                        ))
                    })
                    .map_err(StoreError::from)?;
                for row in rows {
                    let raw = row.map_err(StoreError::from)?;
                    // An intact citation outranks any analyzed-term hit.
                    if let Some(hit) = Self::decode_hit(raw, top_score + 1.0, filter)? {
                        match hits.iter_mut().find(|h| h.chunk_id == hit.chunk_id) {
                            Some(existing) => existing.score = existing.score.max(hit.score),
                            None => hits.push(hit),
                        }
                    }
                }
            }
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

    async fn health(&self, index: &str) -> Result<IndexHealth> {
        let conn = self.lock()?;
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM indexes WHERE name = ?1",
                params![index],
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
                        COALESCE(SUM(LENGTH(text) + LENGTH(legal_text) + LENGTH(shingle_text)), 0)
                 FROM docs WHERE idx_name = ?1",
                params![index],
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

    fn doc(evidence_id: Uuid, case_id: Uuid, position: usize, text: &str) -> LexicalDoc {
        LexicalDoc {
            chunk_id: chunk_id(evidence_id, position),
            evidence_id,
            case_id,
            chunk_type: ChunkType::Paragraph,
            position,
            text: text.to_string(),
            page: None,
            created_at: Utc::now(),
        }
    }

    async fn seeded() -> (SqliteLexicalStore, Uuid, Uuid) {
        let store = SqliteLexicalStore::in_memory().unwrap();
        store.ensure_index("documents", false).await.unwrap();
        let case = Uuid::new_v4();
        let ev = Uuid::new_v4();
        store
            .index_chunks(
                "documents",
                &[
                    doc(ev, case, 0, "A contract dated Jan 15"),
                    doc(ev, case, 1, "Plaintiff seeks damages of $50,000"),
                    doc(ev, case, 2, "Employment discrimination on age"),
                ],
            )
            .await
            .unwrap();
        (store, case, ev)
    }

    #[tokio::test]
    async fn test_term_search() {
        let (store, case, _) = seeded().await;
        let hits = store
            .search("documents", "contract", &SearchFilter::for_case(case), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].position, 0);
        assert!(hits[0].score.is_finite());
    }

    #[tokio::test]
    async fn test_synonym_search() {
        let (store, case, _) = seeded().await;
        // "agreement" must find the contract chunk through the synonym
        // group.
        let hits = store
            .search("documents", "agreement", &SearchFilter::for_case(case), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].position, 0);
    }

    #[tokio::test]
    async fn test_stopword_only_query_is_empty_not_error() {
        let (store, case, _) = seeded().await;
        let hits = store
            .search("documents", "the whereas hereby", &SearchFilter::for_case(case), 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_citation_preserved() {
        let store = SqliteLexicalStore::in_memory().unwrap();
        store.ensure_index("documents", false).await.unwrap();
        let case = Uuid::new_v4();
        let ev = Uuid::new_v4();
        store
            .index_chunks(
                "documents",
                &[
                    doc(ev, case, 0, "Debtor may assume under Section 365 of the Code"),
                    doc(ev, case, 1, "section headings; see page 365 for the appendix"),
                ],
            )
            .await
            .unwrap();

        let hits = store
            .search("documents", "Section 365", &SearchFilter::for_case(case), 10)
            .await
            .unwrap();
        assert!(!hits.is_empty());
        // The chunk with the intact citation ranks first; the chunk with
        // the words split apart does not outrank it.
        assert_eq!(hits[0].position, 0);
    }

    #[tokio::test]
    async fn test_reindex_overwrites() {
        let (store, case, ev) = seeded().await;
        store
            .index_chunks("documents", &[doc(ev, case, 0, "A contract dated Jan 15")])
            .await
            .unwrap();
        assert_eq!(store.health("documents").await.unwrap().doc_count, 3);
    }

    #[tokio::test]
    async fn test_delete_by_evidence() {
        let (store, _case, ev) = seeded().await;
        let removed = store.delete_by_evidence("documents", ev).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.health("documents").await.unwrap().doc_count, 0);
    }

    #[tokio::test]
    async fn test_case_scoping() {
        let (store, _case, _) = seeded().await;
        let other_case = Uuid::new_v4();
        let hits = store
            .search("documents", "contract", &SearchFilter::for_case(other_case), 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_ensure_index_idempotent() {
        let store = SqliteLexicalStore::in_memory().unwrap();
        assert!(store.ensure_index("findings", false).await.unwrap());
        assert!(!store.ensure_index("findings", false).await.unwrap());
        assert!(store.ensure_index("findings", true).await.unwrap());
    }

    #[test]
    fn test_build_match_expression() {
        let expr = SqliteLexicalStore::build_match("contract damages").unwrap();
        assert!(expr.contains("legal_text:("));
        assert!(expr.contains("shingle_text:("));
        // Synonyms of contract are included.
        assert!(expr.contains("covenant"));

        assert!(SqliteLexicalStore::build_match("the of and").is_none());
    }
}
