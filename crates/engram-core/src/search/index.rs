//! Unified search index
//!
//! Owns the document table (full JSON per doc, including its embedding),
//! the FTS5 lexical table, and the HNSW vector index. Upserts are
//! idempotent by document id; the indexer is the only writer. The vector
//! index is rebuilt from the document table on open.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};

use super::keyword::sanitize_fts5_query;
use super::{DocType, Result, SearchDoc, SearchError};

#[cfg(feature = "vector-search")]
use super::vector::VectorIndex;
#[cfg(not(feature = "vector-search"))]
use super::fusion::cosine_similarity;

/// Hits requested from the hybrid query so reranking has headroom.
pub const MAX_HITS: usize = 100;

/// BM25 column weights: (id unweighted), text, summary, tags.
const BM25_WEIGHTS: &str = "0.0, 2.0, 1.5, 1.0";

// ============================================================================
// FILTER
// ============================================================================

/// Mandatory user scope plus optional narrowing filters.
#[derive(Debug, Clone)]
pub struct SearchFilter {
    pub user: String,
    /// AND across the document's tag set
    pub tags: Vec<String>,
    /// Inclusive lower bound on creation epoch-ms
    pub from_epoch: Option<i64>,
    /// When set, only these document types are returned
    pub doc_types: Option<Vec<DocType>>,
}

impl SearchFilter {
    pub fn for_user(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            tags: vec![],
            from_epoch: None,
            doc_types: None,
        }
    }

    fn accepts(&self, doc: &SearchDoc) -> bool {
        if doc.user != self.user {
            return false;
        }
        if let Some(from) = self.from_epoch {
            if doc.created_at_epoch < from {
                return false;
            }
        }
        if let Some(ref types) = self.doc_types {
            if !types.contains(&doc.doc_type) {
                return false;
            }
        }
        self.tags.iter().all(|t| doc.tags.iter().any(|dt| dt == t))
    }
}

// ============================================================================
// SEARCH INDEX
// ============================================================================

/// The unified lexical + vector index.
pub struct SearchIndex {
    conn: Mutex<Connection>,
    #[cfg(feature = "vector-search")]
    vectors: Mutex<VectorIndex>,
}

impl SearchIndex {
    /// Open (or create) the index at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SearchError::Init(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// In-memory index for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;
             CREATE TABLE IF NOT EXISTS documents (
                 id               TEXT PRIMARY KEY,
                 user             TEXT NOT NULL,
                 doc_type         TEXT NOT NULL,
                 created_at_epoch INTEGER NOT NULL,
                 body             TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_documents_user ON documents (user, created_at_epoch);
             CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
                 id UNINDEXED, text, summary, tags
             );",
        )?;

        let index = Self {
            conn: Mutex::new(conn),
            #[cfg(feature = "vector-search")]
            vectors: Mutex::new(VectorIndex::new()?),
        };

        #[cfg(feature = "vector-search")]
        index.load_vectors()?;

        Ok(index)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| SearchError::Init("connection lock poisoned".into()))
    }

    /// Rebuild the HNSW index from stored documents.
    #[cfg(feature = "vector-search")]
    fn load_vectors(&self) -> Result<()> {
        let docs: Vec<(String, Vec<f32>)> = {
            let conn = self.lock_conn()?;
            let mut stmt = conn.prepare("SELECT id, body FROM documents")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .filter_map(|r| r.ok())
                .filter_map(|(id, body)| {
                    serde_json::from_str::<SearchDoc>(&body)
                        .ok()
                        .map(|d| (id, d.embedding))
                })
                .collect();
            rows
        };

        let mut vectors = self
            .vectors
            .lock()
            .map_err(|_| SearchError::Init("vector lock poisoned".into()))?;
        for (id, embedding) in docs {
            if let Err(e) = vectors.upsert(&id, &embedding) {
                tracing::warn!(id, error = %e, "failed to load embedding into index");
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert or replace a document. Last writer wins by id.
    pub fn upsert(&self, doc: &SearchDoc) -> Result<()> {
        let body = serde_json::to_string(doc)
            .map_err(|e| SearchError::Corrupt(e.to_string()))?;
        {
            let conn = self.lock_conn()?;
            conn.execute(
                "INSERT INTO documents (id, user, doc_type, created_at_epoch, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (id) DO UPDATE SET
                     user = excluded.user,
                     doc_type = excluded.doc_type,
                     created_at_epoch = excluded.created_at_epoch,
                     body = excluded.body",
                params![
                    doc.id,
                    doc.user,
                    doc.doc_type.as_str(),
                    doc.created_at_epoch,
                    body
                ],
            )?;
            conn.execute("DELETE FROM documents_fts WHERE id = ?1", params![doc.id])?;
            conn.execute(
                "INSERT INTO documents_fts (id, text, summary, tags) VALUES (?1, ?2, ?3, ?4)",
                params![doc.id, doc.text, doc.summary, doc.tags_text()],
            )?;
        }

        #[cfg(feature = "vector-search")]
        {
            let mut vectors = self
                .vectors
                .lock()
                .map_err(|_| SearchError::Init("vector lock poisoned".into()))?;
            vectors.upsert(&doc.id, &doc.embedding)?;
        }

        Ok(())
    }

    /// Remove a document. Missing ids are fine.
    pub fn remove(&self, id: &str) -> Result<()> {
        {
            let conn = self.lock_conn()?;
            conn.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
            conn.execute("DELETE FROM documents_fts WHERE id = ?1", params![id])?;
        }
        #[cfg(feature = "vector-search")]
        {
            let mut vectors = self
                .vectors
                .lock()
                .map_err(|_| SearchError::Init("vector lock poisoned".into()))?;
            vectors.remove(id)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Point read of a document.
    pub fn get(&self, id: &str) -> Result<Option<SearchDoc>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT body FROM documents WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => {
                let body: String = row.get(0)?;
                let doc = serde_json::from_str(&body)
                    .map_err(|e| SearchError::Corrupt(format!("{id}: {e}")))?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    /// Total documents (health endpoint).
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    /// Lexical BM25 over (text×2, summary×1.5, tags×1). Returns
    /// `(id, score)` best-first; scores are positive.
    pub fn lexical(&self, query: &str, filter: &SearchFilter, limit: usize) -> Result<Vec<(String, f32)>> {
        let Some(match_expr) = sanitize_fts5_query(query) else {
            return Ok(vec![]);
        };
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT documents_fts.id, -bm25(documents_fts, {BM25_WEIGHTS}) AS score
             FROM documents_fts
             JOIN documents d ON d.id = documents_fts.id
             WHERE documents_fts MATCH ?1
               AND d.user = ?2
               AND d.created_at_epoch >= ?3
             ORDER BY score DESC
             LIMIT ?4"
        );
        let from = filter.from_epoch.unwrap_or(i64::MIN);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![match_expr, filter.user, from, limit as i64],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)? as f32)),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// k-NN over embeddings, post-filtered to the caller's scope. Returns
    /// `(id, cosine_similarity)` best-first.
    pub fn knn(&self, embedding: &[f32], k: usize, filter: &SearchFilter) -> Result<Vec<(String, f32)>> {
        #[cfg(feature = "vector-search")]
        let raw: Vec<(String, f32)> = {
            let vectors = self
                .vectors
                .lock()
                .map_err(|_| SearchError::Init("vector lock poisoned".into()))?;
            // Over-fetch: the HNSW index is not user-partitioned
            vectors.search(embedding, (k * 4).max(32))?
        };

        #[cfg(not(feature = "vector-search"))]
        let raw: Vec<(String, f32)> = {
            // Brute-force cosine scan over the user's documents
            let conn = self.lock_conn()?;
            let mut stmt =
                conn.prepare("SELECT body FROM documents WHERE user = ?1")?;
            let mut scored: Vec<(String, f32)> = stmt
                .query_map(params![filter.user], |row| row.get::<_, String>(0))?
                .filter_map(|r| r.ok())
                .filter_map(|body| serde_json::from_str::<SearchDoc>(&body).ok())
                .map(|d| {
                    let sim = cosine_similarity(embedding, &d.embedding);
                    (d.id, sim)
                })
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored
        };

        let mut out = Vec::with_capacity(k);
        for (id, sim) in raw {
            if out.len() >= k {
                break;
            }
            if let Some(doc) = self.get(&id)? {
                if filter.accepts(&doc) {
                    out.push((id, sim));
                }
            }
        }
        Ok(out)
    }

    /// Hybrid query: BM25 and k-NN unioned with a normalized weighted sum
    /// (keyword 0.3 / semantic 0.7), then resolved to documents and
    /// post-filtered. Returns `(doc, fused_score)` best-first, at most
    /// [`MAX_HITS`].
    pub fn hybrid(
        &self,
        query: &str,
        embedding: Option<&[f32]>,
        filter: &SearchFilter,
    ) -> Result<Vec<(SearchDoc, f64)>> {
        let lexical = self.lexical(query, filter, MAX_HITS)?;
        let semantic = match embedding {
            Some(vector) => self.knn(vector, 50, filter)?,
            None => vec![],
        };

        let fused = super::fusion::linear_combination(&lexical, &semantic, 0.3, 0.7);

        let mut out = Vec::new();
        for (id, score) in fused {
            if out.len() >= MAX_HITS {
                break;
            }
            if let Some(doc) = self.get(&id)? {
                if filter.accepts(&doc) {
                    out.push((doc, score as f64));
                }
            }
        }
        Ok(out)
    }

    /// All of a user's thought documents in a time window, newest first,
    /// capped at `limit` (graph builder fetch path).
    pub fn thoughts_with_embeddings(
        &self,
        user: &str,
        from_epoch: Option<i64>,
        to_epoch: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SearchDoc>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT body FROM documents
             WHERE user = ?1 AND doc_type = 'thought'
               AND created_at_epoch >= ?2 AND created_at_epoch <= ?3
             ORDER BY created_at_epoch DESC
             LIMIT ?4",
        )?;
        let rows = stmt
            .query_map(
                params![
                    user,
                    from_epoch.unwrap_or(i64::MIN),
                    to_epoch.unwrap_or(i64::MAX),
                    limit as i64
                ],
                |row| row.get::<_, String>(0),
            )?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        let mut docs = Vec::with_capacity(rows.len());
        for body in rows {
            let doc: SearchDoc = serde_json::from_str(&body)
                .map_err(|e| SearchError::Corrupt(e.to_string()))?;
            docs.push(doc);
        }
        Ok(docs)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, user: &str, text: &str, hot: usize) -> SearchDoc {
        let mut embedding = vec![0.0_f32; crate::llm::EMBEDDING_DIMENSIONS];
        embedding[hot % crate::llm::EMBEDDING_DIMENSIONS] = 1.0;
        SearchDoc {
            id: id.into(),
            user: user.into(),
            doc_type: DocType::Thought,
            text: text.into(),
            summary: String::new(),
            tags: vec!["noted".into()],
            kind: Some("note".into()),
            category: None,
            intent: None,
            entities: vec![],
            created_at_epoch: 1_000,
            decision_score: 0.0,
            embedding,
            context: None,
            title: None,
            message_count: None,
            cited_thought_ids: vec![],
            updated_at_epoch: None,
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let idx = SearchIndex::open_in_memory().unwrap();
        let d = doc("t_1", "u1", "postgres tuning notes", 0);
        idx.upsert(&d).unwrap();
        idx.upsert(&d).unwrap();
        assert_eq!(idx.count().unwrap(), 1);

        let filter = SearchFilter::for_user("u1");
        let hits = idx.lexical("postgres", &filter, 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_lexical_respects_user_scope() {
        let idx = SearchIndex::open_in_memory().unwrap();
        idx.upsert(&doc("t_1", "u1", "shared secret topic", 0)).unwrap();
        idx.upsert(&doc("t_2", "u2", "shared secret topic", 1)).unwrap();

        let hits = idx.lexical("secret", &SearchFilter::for_user("u1"), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "t_1");
    }

    #[test]
    fn test_knn_filters_user_and_type() {
        let idx = SearchIndex::open_in_memory().unwrap();
        idx.upsert(&doc("t_1", "u1", "alpha", 0)).unwrap();
        idx.upsert(&doc("t_2", "u2", "beta", 0)).unwrap();

        let mut query = vec![0.0_f32; crate::llm::EMBEDDING_DIMENSIONS];
        query[0] = 1.0;
        let hits = idx.knn(&query, 5, &SearchFilter::for_user("u1")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "t_1");
        assert!(hits[0].1 > 0.99);
    }

    #[test]
    fn test_hybrid_unions_both_paths() {
        let idx = SearchIndex::open_in_memory().unwrap();
        idx.upsert(&doc("t_lex", "u1", "kubernetes deployment", 3)).unwrap();
        idx.upsert(&doc("t_sem", "u1", "unrelated words", 0)).unwrap();

        let mut query = vec![0.0_f32; crate::llm::EMBEDDING_DIMENSIONS];
        query[0] = 1.0;
        let hits = idx
            .hybrid("kubernetes", Some(&query), &SearchFilter::for_user("u1"))
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|(d, _)| d.id.as_str()).collect();
        assert!(ids.contains(&"t_lex"));
        assert!(ids.contains(&"t_sem"));
    }

    #[test]
    fn test_tag_filter_is_conjunctive() {
        let idx = SearchIndex::open_in_memory().unwrap();
        let mut d = doc("t_1", "u1", "tagged doc", 0);
        d.tags = vec!["rust".into(), "db".into()];
        idx.upsert(&d).unwrap();

        let mut filter = SearchFilter::for_user("u1");
        filter.tags = vec!["rust".into(), "db".into()];
        assert_eq!(idx.lexical("tagged", &filter, 10).unwrap().len(), 1);

        filter.tags = vec!["rust".into(), "missing".into()];
        let hits = idx.hybrid("tagged", None, &filter).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_remove_clears_all_paths() {
        let idx = SearchIndex::open_in_memory().unwrap();
        idx.upsert(&doc("t_1", "u1", "ephemeral", 0)).unwrap();
        idx.remove("t_1").unwrap();
        idx.remove("t_1").unwrap();

        assert_eq!(idx.count().unwrap(), 0);
        let filter = SearchFilter::for_user("u1");
        assert!(idx.lexical("ephemeral", &filter, 10).unwrap().is_empty());
        let mut query = vec![0.0_f32; crate::llm::EMBEDDING_DIMENSIONS];
        query[0] = 1.0;
        assert!(idx.knn(&query, 5, &filter).unwrap().is_empty());
    }

    #[test]
    fn test_thoughts_with_embeddings_window() {
        let idx = SearchIndex::open_in_memory().unwrap();
        let mut early = doc("t_early", "u1", "early", 0);
        early.created_at_epoch = 100;
        let mut late = doc("t_late", "u1", "late", 1);
        late.created_at_epoch = 200;
        idx.upsert(&early).unwrap();
        idx.upsert(&late).unwrap();

        let docs = idx
            .thoughts_with_embeddings("u1", Some(150), None, 100)
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "t_late");
    }
}
