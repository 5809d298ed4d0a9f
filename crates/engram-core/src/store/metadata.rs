//! Metadata store
//!
//! A key-sorted record store over SQLite: rows are addressed `(pk, sk)`,
//! range scans over `sk` are index walks, and two sparse secondary key
//! pairs support kind+time and user+updated queries. Writes go through a
//! writer connection, reads through a reader connection, both behind
//! `Mutex` so the store is `Send + Sync` and shared as `Arc<MetadataStore>`.
//!
//! Conditional semantics are explicit outcomes, not exceptions: a
//! conditional insert that loses reports [`PutOutcome::AlreadyExists`], and
//! conditional updates of missing rows surface [`StoreError::NotFound`].

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::Result;

/// Max rows per batch-delete chunk.
pub const BATCH_DELETE_CHUNK: usize = 25;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Row not found for a conditional update/delete
    #[error("record not found: {0}")]
    NotFound(String),
    /// Conditional write lost
    #[error("conditional write failed: {0}")]
    Conflict(String),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed stored body
    #[error("corrupt record body: {0}")]
    Corrupt(String),
    /// Initialization error
    #[error("initialization error: {0}")]
    Init(String),
}

// ============================================================================
// KEY LAYOUT
// ============================================================================

/// Key construction helpers. The formats are part of the external contract
/// (clients and the export path depend on them) - change nothing here.
pub mod keys {
    /// `user#{user}`
    pub fn user_pk(user: &str) -> String {
        format!("user#{user}")
    }

    /// `ts#{epochMs}#{id}` - thought sort key, time-ordered
    pub fn thought_sk(epoch_ms: i64, id: &str) -> String {
        format!("ts#{epoch_ms:013}#{id}")
    }

    /// Prefix selecting all thought rows under a user pk
    pub const THOUGHT_SK_PREFIX: &str = "ts#";

    /// `conv#{id}` - conversation sort key
    pub fn conversation_sk(id: &str) -> String {
        format!("conv#{id}")
    }

    /// Prefix selecting all conversation rows under a user pk
    pub const CONVERSATION_SK_PREFIX: &str = "conv#";

    /// `conv#{id}` - also the pk that owns a conversation's messages
    pub fn conversation_pk(id: &str) -> String {
        format!("conv#{id}")
    }

    /// `msg#{epochMs}#{id}` - message sort key, time-ordered, id tiebreak
    pub fn message_sk(epoch_ms: i64, id: &str) -> String {
        format!("msg#{epoch_ms:013}#{id}")
    }

    /// Prefix selecting all message rows under a conversation pk
    pub const MESSAGE_SK_PREFIX: &str = "msg#";

    /// `meta` - the user metadata row (lastDataChange)
    pub const META_SK: &str = "meta";

    /// `type#{kind}` - gsi1 partition for kind+time queries
    pub fn kind_gsi1pk(kind: &str) -> String {
        format!("type#{kind}")
    }

    /// `ts#{epochMs}` - gsi1 sort key
    pub fn kind_gsi1sk(epoch_ms: i64) -> String {
        format!("ts#{epoch_ms:013}")
    }

    /// `updated#{epochMs}` - gsi3 sort key for most-recent-first listing
    pub fn updated_gsi3sk(epoch_ms: i64) -> String {
        format!("updated#{epoch_ms:013}")
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// A stored row: primary key pair, sparse secondary keys, JSON body.
#[derive(Debug, Clone)]
pub struct Record {
    pub pk: String,
    pub sk: String,
    pub gsi1pk: Option<String>,
    pub gsi1sk: Option<String>,
    pub gsi3pk: Option<String>,
    pub gsi3sk: Option<String>,
    pub body: serde_json::Value,
    /// Advisory expiry, epoch seconds
    pub ttl: Option<i64>,
}

impl Record {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
            gsi1pk: None,
            gsi1sk: None,
            gsi3pk: None,
            gsi3sk: None,
            body,
            ttl: None,
        }
    }

    pub fn with_gsi1(mut self, pk: String, sk: String) -> Self {
        self.gsi1pk = Some(pk);
        self.gsi1sk = Some(sk);
        self
    }

    pub fn with_gsi3(mut self, pk: String, sk: String) -> Self {
        self.gsi3pk = Some(pk);
        self.gsi3sk = Some(sk);
        self
    }

    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Deserialize the body into a typed value.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| StoreError::Corrupt(format!("{}/{}: {e}", self.pk, self.sk)))
    }
}

/// Outcome of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    /// The row already existed; treat as idempotent success where the
    /// operation allows it.
    AlreadyExists,
}

/// One page of a key-ordered query.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub records: Vec<Record>,
    /// Opaque cursor (the last sort key of this page) when more rows exist.
    pub next_cursor: Option<String>,
}

// ============================================================================
// STORE
// ============================================================================

/// SQLite-backed metadata store.
pub struct MetadataStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl MetadataStore {
    /// Apply PRAGMAs shared by both connections.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(path)?;
        Self::configure_connection(&writer)?;
        super::migrations::apply_migrations(&writer)?;

        let reader = Connection::open(path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    /// In-memory store for tests. A shared-cache URI keeps the writer and
    /// reader connections on the same database.
    pub fn open_in_memory() -> Result<Self> {
        let uri = format!(
            "file:metastore_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4()
        );
        let writer = Connection::open(&uri)?;
        super::migrations::apply_migrations(&writer)?;
        let reader = Connection::open(&uri)?;
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Init("writer lock poisoned".into()))
    }

    fn lock_reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".into()))
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Conditional insert: succeeds only if `(pk, sk)` does not exist.
    pub fn put_if_absent(&self, record: &Record) -> Result<PutOutcome> {
        let conn = self.lock_writer()?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO records (pk, sk, gsi1pk, gsi1sk, gsi3pk, gsi3sk, body, ttl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.pk,
                record.sk,
                record.gsi1pk,
                record.gsi1sk,
                record.gsi3pk,
                record.gsi3sk,
                record.body.to_string(),
                record.ttl,
            ],
        )?;
        Ok(if changed == 0 {
            PutOutcome::AlreadyExists
        } else {
            PutOutcome::Created
        })
    }

    /// Unconditional upsert.
    pub fn put(&self, record: &Record) -> Result<()> {
        let conn = self.lock_writer()?;
        conn.execute(
            "INSERT INTO records (pk, sk, gsi1pk, gsi1sk, gsi3pk, gsi3sk, body, ttl)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (pk, sk) DO UPDATE SET
                 gsi1pk = excluded.gsi1pk,
                 gsi1sk = excluded.gsi1sk,
                 gsi3pk = excluded.gsi3pk,
                 gsi3sk = excluded.gsi3sk,
                 body   = excluded.body,
                 ttl    = excluded.ttl",
            params![
                record.pk,
                record.sk,
                record.gsi1pk,
                record.gsi1sk,
                record.gsi3pk,
                record.gsi3sk,
                record.body.to_string(),
                record.ttl,
            ],
        )?;
        Ok(())
    }

    /// Merge top-level JSON fields into an existing row's body. Conditional
    /// on existence: a missing row surfaces [`StoreError::NotFound`].
    pub fn merge_body(
        &self,
        pk: &str,
        sk: &str,
        fields: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let patch = serde_json::Value::Object(fields.clone());
        let conn = self.lock_writer()?;
        let changed = conn.execute(
            "UPDATE records SET body = json_patch(body, ?3) WHERE pk = ?1 AND sk = ?2",
            params![pk, sk, patch.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("{pk}/{sk}")));
        }
        Ok(())
    }

    /// Atomically add deltas to numeric body fields and set others, in one
    /// statement. Optionally rewrites `gsi3sk` (the updated-at secondary
    /// key). Conditional on row existence.
    pub fn atomic_update(
        &self,
        pk: &str,
        sk: &str,
        increments: &[(&str, i64)],
        sets: &serde_json::Map<String, serde_json::Value>,
        gsi3sk: Option<&str>,
    ) -> Result<()> {
        // Build json_set(json_patch(body, $sets), '$.field', json_extract(...) + delta, ...)
        let mut expr = String::from("json_patch(body, ?3)");
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
            Box::new(pk.to_string()),
            Box::new(sk.to_string()),
            Box::new(serde_json::Value::Object(sets.clone()).to_string()),
        ];
        for (field, delta) in increments {
            expr = format!(
                "json_set({expr}, '$.{field}', coalesce(json_extract(body, '$.{field}'), 0) + {delta})"
            );
        }

        let sql = match gsi3sk {
            Some(g) => {
                params_vec.push(Box::new(g.to_string()));
                format!("UPDATE records SET body = {expr}, gsi3sk = ?4 WHERE pk = ?1 AND sk = ?2")
            }
            None => format!("UPDATE records SET body = {expr} WHERE pk = ?1 AND sk = ?2"),
        };

        let conn = self.lock_writer()?;
        let refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let changed = conn.execute(&sql, refs.as_slice())?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("{pk}/{sk}")));
        }
        Ok(())
    }

    /// Conditional delete. Returns NotFound if the row did not exist.
    pub fn delete(&self, pk: &str, sk: &str) -> Result<()> {
        let conn = self.lock_writer()?;
        let changed = conn.execute(
            "DELETE FROM records WHERE pk = ?1 AND sk = ?2",
            params![pk, sk],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("{pk}/{sk}")));
        }
        Ok(())
    }

    /// Delete many rows in chunks of [`BATCH_DELETE_CHUNK`], each chunk in
    /// one transaction. Missing rows are skipped (idempotent).
    pub fn batch_delete(&self, keys: &[(String, String)]) -> Result<usize> {
        let mut conn = self.lock_writer()?;
        let mut deleted = 0usize;
        for chunk in keys.chunks(BATCH_DELETE_CHUNK) {
            let tx = conn.transaction()?;
            for (pk, sk) in chunk {
                deleted += tx.execute(
                    "DELETE FROM records WHERE pk = ?1 AND sk = ?2",
                    params![pk, sk],
                )?;
            }
            tx.commit()?;
        }
        Ok(deleted)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<Record> {
        let body_text: String = row.get(6)?;
        let body = serde_json::from_str(&body_text).unwrap_or(serde_json::Value::Null);
        Ok(Record {
            pk: row.get(0)?,
            sk: row.get(1)?,
            gsi1pk: row.get(2)?,
            gsi1sk: row.get(3)?,
            gsi3pk: row.get(4)?,
            gsi3sk: row.get(5)?,
            body,
            ttl: row.get(7)?,
        })
    }

    const RECORD_COLUMNS: &'static str = "pk, sk, gsi1pk, gsi1sk, gsi3pk, gsi3sk, body, ttl";

    /// Point read.
    pub fn get(&self, pk: &str, sk: &str) -> Result<Option<Record>> {
        let conn = self.lock_reader()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT {} FROM records WHERE pk = ?1 AND sk = ?2",
                    Self::RECORD_COLUMNS
                ),
                params![pk, sk],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Range scan over `sk` within one partition. `after` is an exclusive
    /// cursor from a previous page.
    pub fn query_range(
        &self,
        pk: &str,
        sk_from: &str,
        sk_to: &str,
        descending: bool,
        limit: usize,
        after: Option<&str>,
    ) -> Result<QueryPage> {
        let conn = self.lock_reader()?;
        let (order, cursor_cmp) = if descending { ("DESC", "<") } else { ("ASC", ">") };
        let sql = match after {
            Some(_) => format!(
                "SELECT {} FROM records
                 WHERE pk = ?1 AND sk >= ?2 AND sk <= ?3 AND sk {cursor_cmp} ?4
                 ORDER BY sk {order} LIMIT ?5",
                Self::RECORD_COLUMNS
            ),
            None => format!(
                "SELECT {} FROM records
                 WHERE pk = ?1 AND sk >= ?2 AND sk <= ?3
                 ORDER BY sk {order} LIMIT ?4",
                Self::RECORD_COLUMNS
            ),
        };

        let fetch = (limit + 1) as i64;
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<Record> = match after {
            Some(cursor) => stmt
                .query_map(params![pk, sk_from, sk_to, cursor, fetch], Self::row_to_record)?
                .collect::<rusqlite::Result<_>>()?,
            None => stmt
                .query_map(params![pk, sk_from, sk_to, fetch], Self::row_to_record)?
                .collect::<rusqlite::Result<_>>()?,
        };

        Ok(Self::paginate(rows, limit))
    }

    /// Prefix scan over `sk` within one partition.
    pub fn query_prefix(
        &self,
        pk: &str,
        sk_prefix: &str,
        descending: bool,
        limit: usize,
        after: Option<&str>,
    ) -> Result<QueryPage> {
        // '\u{10FFFF}' sorts after every printable continuation of the prefix
        let upper = format!("{sk_prefix}\u{10FFFF}");
        self.query_range(pk, sk_prefix, &upper, descending, limit, after)
    }

    /// Count rows under a prefix (for `includeCount`).
    pub fn count_prefix(&self, pk: &str, sk_prefix: &str) -> Result<usize> {
        let upper = format!("{sk_prefix}\u{10FFFF}");
        let conn = self.lock_reader()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE pk = ?1 AND sk >= ?2 AND sk <= ?3",
            params![pk, sk_prefix, upper],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Secondary-index scan: all rows with the given `gsi3pk`, ordered by
    /// `gsi3sk` (most-recent-first when descending).
    pub fn query_gsi3(
        &self,
        gsi3pk: &str,
        descending: bool,
        limit: usize,
        after: Option<&str>,
    ) -> Result<QueryPage> {
        let conn = self.lock_reader()?;
        let (order, cursor_cmp) = if descending { ("DESC", "<") } else { ("ASC", ">") };
        let sql = match after {
            Some(_) => format!(
                "SELECT {} FROM records
                 WHERE gsi3pk = ?1 AND gsi3sk {cursor_cmp} ?2
                 ORDER BY gsi3sk {order} LIMIT ?3",
                Self::RECORD_COLUMNS
            ),
            None => format!(
                "SELECT {} FROM records WHERE gsi3pk = ?1 ORDER BY gsi3sk {order} LIMIT ?2",
                Self::RECORD_COLUMNS
            ),
        };

        let fetch = (limit + 1) as i64;
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<Record> = match after {
            Some(cursor) => stmt
                .query_map(params![gsi3pk, cursor, fetch], Self::row_to_record)?
                .collect::<rusqlite::Result<_>>()?,
            None => stmt
                .query_map(params![gsi3pk, fetch], Self::row_to_record)?
                .collect::<rusqlite::Result<_>>()?,
        };

        // gsi3 pages cursor on the secondary sort key
        let mut page = Self::paginate(rows, limit);
        if page.next_cursor.is_some() {
            page.next_cursor = page.records.last().and_then(|r| r.gsi3sk.clone());
        }
        Ok(page)
    }

    fn paginate(mut rows: Vec<Record>, limit: usize) -> QueryPage {
        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let next_cursor = if has_more {
            rows.last().map(|r| r.sk.clone())
        } else {
            None
        };
        QueryPage {
            records: rows,
            next_cursor,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> MetadataStore {
        MetadataStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_put_if_absent_is_conditional() {
        let s = store();
        let rec = Record::new("user#u1", "ts#0000000000001#t_a", json!({"v": 1}));
        assert_eq!(s.put_if_absent(&rec).unwrap(), PutOutcome::Created);

        let rec2 = Record::new("user#u1", "ts#0000000000001#t_a", json!({"v": 2}));
        assert_eq!(s.put_if_absent(&rec2).unwrap(), PutOutcome::AlreadyExists);

        // Losing write leaves the original body intact
        let got = s.get("user#u1", "ts#0000000000001#t_a").unwrap().unwrap();
        assert_eq!(got.body["v"], 1);
    }

    #[test]
    fn test_range_scan_ordering_and_cursor() {
        let s = store();
        for (ts, id) in [(3i64, "t_c"), (1, "t_a"), (2, "t_b")] {
            s.put(&Record::new(
                "user#u1",
                keys::thought_sk(ts, id),
                json!({"id": id}),
            ))
            .unwrap();
        }

        let page = s
            .query_prefix("user#u1", keys::THOUGHT_SK_PREFIX, true, 2, None)
            .unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].body["id"], "t_c");
        assert_eq!(page.records[1].body["id"], "t_b");
        let cursor = page.next_cursor.expect("more rows");

        let page2 = s
            .query_prefix("user#u1", keys::THOUGHT_SK_PREFIX, true, 2, Some(&cursor))
            .unwrap();
        assert_eq!(page2.records.len(), 1);
        assert_eq!(page2.records[0].body["id"], "t_a");
        assert!(page2.next_cursor.is_none());
    }

    #[test]
    fn test_atomic_update_increments() {
        let s = store();
        s.put(&Record::new(
            "user#u1",
            "conv#c1",
            json!({"messageCount": 1, "updatedAt": 10}),
        ))
        .unwrap();

        let mut sets = serde_json::Map::new();
        sets.insert("updatedAt".into(), json!(99));
        s.atomic_update(
            "user#u1",
            "conv#c1",
            &[("messageCount", 2)],
            &sets,
            Some("updated#0000000000099"),
        )
        .unwrap();

        let rec = s.get("user#u1", "conv#c1").unwrap().unwrap();
        assert_eq!(rec.body["messageCount"], 3);
        assert_eq!(rec.body["updatedAt"], 99);
        assert_eq!(rec.gsi3sk.as_deref(), Some("updated#0000000000099"));
    }

    #[test]
    fn test_atomic_update_missing_row_is_not_found() {
        let s = store();
        let sets = serde_json::Map::new();
        let err = s
            .atomic_update("user#u1", "conv#missing", &[("n", 1)], &sets, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_gsi3_most_recent_first() {
        let s = store();
        for (id, updated) in [("c1", 5i64), ("c2", 9), ("c3", 7)] {
            s.put(
                &Record::new("user#u1", keys::conversation_sk(id), json!({"id": id}))
                    .with_gsi3(keys::user_pk("u1"), keys::updated_gsi3sk(updated)),
            )
            .unwrap();
        }
        let page = s.query_gsi3("user#u1", true, 10, None).unwrap();
        let ids: Vec<_> = page.records.iter().map(|r| r.body["id"].as_str().unwrap().to_string()).collect();
        assert_eq!(ids, vec!["c2", "c3", "c1"]);
    }

    #[test]
    fn test_batch_delete_idempotent() {
        let s = store();
        for i in 0..30 {
            s.put(&Record::new("conv#c1", keys::message_sk(i, &format!("m{i}")), json!({})))
                .unwrap();
        }
        let keys_vec: Vec<(String, String)> = (0..30)
            .map(|i| ("conv#c1".to_string(), keys::message_sk(i, &format!("m{i}"))))
            .collect();
        assert_eq!(s.batch_delete(&keys_vec).unwrap(), 30);
        // Second pass deletes nothing but does not fail
        assert_eq!(s.batch_delete(&keys_vec).unwrap(), 0);
    }

    #[test]
    fn test_message_sk_orders_by_time() {
        let early = keys::message_sk(999, "msg_z");
        let late = keys::message_sk(1_700_000_000_000, "msg_a");
        assert!(early < late);
    }
}
