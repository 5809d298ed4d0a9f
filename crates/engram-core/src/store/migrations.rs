//! Metadata store schema migrations
//!
//! Applied in order, tracked via `PRAGMA user_version`. Each entry is one
//! transactionless batch; never rewrite an existing entry, append instead.

use rusqlite::Connection;

/// Ordered migration batches.
pub const MIGRATIONS: &[&str] = &[
    // v1: the record table. pk/sk is the primary key; the gsi columns are
    // sparse secondary keys (kind+time for thoughts, user+updated for
    // conversations). body is a JSON document.
    "CREATE TABLE IF NOT EXISTS records (
        pk     TEXT NOT NULL,
        sk     TEXT NOT NULL,
        gsi1pk TEXT,
        gsi1sk TEXT,
        gsi3pk TEXT,
        gsi3sk TEXT,
        body   TEXT NOT NULL,
        ttl    INTEGER,
        PRIMARY KEY (pk, sk)
    );
    CREATE INDEX IF NOT EXISTS idx_records_gsi1 ON records (gsi1pk, gsi1sk);
    CREATE INDEX IF NOT EXISTS idx_records_gsi3 ON records (gsi3pk, gsi3sk);",
];

/// Apply pending migrations to `conn`.
pub fn apply_migrations(conn: &Connection) -> rusqlite::Result<()> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let target = (i + 1) as i64;
        if version < target {
            conn.execute_batch(migration)?;
            conn.pragma_update(None, "user_version", target)?;
            tracing::debug!(version = target, "applied metadata migration");
        }
    }

    Ok(())
}
