//! Document repository: every method takes a `&Connection` and a table.
//!
//! Batches are split into chunks that stay under `SQLite`'s bound-parameter
//! limit, and each multi-statement operation runs in one transaction so a
//! failed attempt leaves nothing behind for the retry to trip over.

use std::collections::HashSet;

use rusqlite::types::ToSql;
use rusqlite::{Connection, params, params_from_iter};

use crate::document::EncodedDocument;
use crate::errors::Result;
use crate::sqlite::schema::TableName;

/// Keys bound per `IN (...)` list.
pub const KEYS_PER_STATEMENT: usize = 500;

/// Rows per multi-row `INSERT` on the bulk-load path (two parameters each).
pub const ROWS_PER_STATEMENT: usize = 400;

/// Keys of a per-row insert pass, split by outcome.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InsertSplit {
    /// Keys whose rows were written.
    pub inserted: Vec<String>,
    /// Keys that already existed and were left untouched.
    pub conflicted: Vec<String>,
}

/// Document repository (stateless).
pub struct DocumentRepo;

impl DocumentRepo {
    /// Rows for whichever of `keys` exist, one per distinct key. Empty input
    /// issues no query.
    pub fn fetch(
        conn: &Connection,
        table: &TableName,
        keys: &[&str],
    ) -> Result<Vec<(String, Vec<u8>)>> {
        // a key repeated in two chunks would otherwise come back twice
        let mut seen = HashSet::with_capacity(keys.len());
        let distinct: Vec<&str> = keys.iter().copied().filter(|key| seen.insert(*key)).collect();

        let mut rows = Vec::new();
        for chunk in distinct.chunks(KEYS_PER_STATEMENT) {
            let sql = format!(
                "SELECT key, payload FROM {} WHERE key IN ({})",
                table.quoted(),
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let found = stmt
                .query_map(params_from_iter(chunk.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.extend(found);
        }
        Ok(rows)
    }

    /// Delete every row whose key is in `keys`. Returns rows deleted.
    pub fn delete(conn: &Connection, table: &TableName, keys: &[&str]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let tx = conn.unchecked_transaction()?;
        let mut deleted = 0;
        for chunk in keys.chunks(KEYS_PER_STATEMENT) {
            let sql = format!(
                "DELETE FROM {} WHERE key IN ({})",
                table.quoted(),
                placeholders(chunk.len())
            );
            deleted += tx.prepare_cached(&sql)?.execute(params_from_iter(chunk.iter()))?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Total rows in the table.
    pub fn count(conn: &Connection, table: &TableName) -> Result<u64> {
        let n: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table.quoted()),
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    /// Bulk-load `docs` with plain multi-row inserts in one transaction.
    ///
    /// No conflict clause: a single existing (or repeated) key fails the
    /// whole batch and the transaction rolls back.
    pub fn bulk_insert(
        conn: &Connection,
        table: &TableName,
        docs: &[EncodedDocument<'_>],
    ) -> Result<usize> {
        let tx = conn.unchecked_transaction()?;
        let mut written = 0;
        for chunk in docs.chunks(ROWS_PER_STATEMENT) {
            let sql = format!(
                "INSERT INTO {} (key, payload) VALUES {}",
                table.quoted(),
                row_placeholders(chunk.len())
            );
            let mut values: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * 2);
            for doc in chunk {
                values.push(&doc.key);
                values.push(&doc.payload);
            }
            written += tx.prepare_cached(&sql)?.execute(values.as_slice())?;
        }
        tx.commit()?;
        Ok(written)
    }

    /// Insert `docs` one row at a time, skipping keys that already exist.
    ///
    /// Runs in one transaction; the first occurrence of a key repeated within
    /// `docs` wins.
    pub fn insert_ignoring_conflicts(
        conn: &Connection,
        table: &TableName,
        docs: &[EncodedDocument<'_>],
    ) -> Result<InsertSplit> {
        let tx = conn.unchecked_transaction()?;
        let mut split = InsertSplit::default();
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO {} (key, payload) VALUES (?1, ?2) ON CONFLICT (key) DO NOTHING",
                table.quoted()
            ))?;
            for doc in docs {
                if stmt.execute(params![doc.key, doc.payload])? == 0 {
                    split.conflicted.push(doc.key.to_string());
                } else {
                    split.inserted.push(doc.key.to_string());
                }
            }
        }
        tx.commit()?;
        Ok(split)
    }
}

/// `?1, ?2, ..., ?n`
fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}

/// `(?1, ?2), (?3, ?4), ...` for `rows` two-column rows.
fn row_placeholders(rows: usize) -> String {
    (0..rows)
        .map(|i| format!("(?{}, ?{})", 2 * i + 1, 2 * i + 2))
        .collect::<Vec<_>>()
        .join(", ")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
