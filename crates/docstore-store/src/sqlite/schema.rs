//! Table bootstrap and teardown.
//!
//! The store owns exactly one table of `(key, payload)` rows plus a unique
//! index on `key`. Both statements use `IF [NOT] EXISTS`, so bootstrapping is
//! safe to repeat across restarts and concurrent store instances.

use std::fmt;

use rusqlite::Connection;
use tracing::info;

use docstore_settings::is_valid_table_name;

use crate::errors::{Result, StoreError};

/// A validated table name, safe to splice into SQL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableName(String);

impl TableName {
    /// Validate `name` as a plain identifier.
    pub fn new(name: &str) -> Result<Self> {
        if is_valid_table_name(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(StoreError::InvalidConfig(format!(
                "table name {name:?} is not a plain identifier"
            )))
        }
    }

    /// Bare table name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for SQL text.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Name of the unique key index (`<table>_key_idx`).
    pub fn index_name(&self) -> String {
        format!("{}_key_idx", self.0)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Create the table and its unique key index if missing.
///
/// `COLLATE BINARY` is `SQLite`'s memcmp ordering: byte-exact, the same
/// comparison callers apply to their binary keys.
pub fn ensure_schema(conn: &Connection, table: &TableName) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
             key     TEXT COLLATE BINARY NOT NULL,
             payload BLOB NOT NULL
         );
         CREATE UNIQUE INDEX IF NOT EXISTS \"{index}\" ON {table} (key);",
        table = table.quoted(),
        index = table.index_name(),
    ))?;
    tx.commit()?;
    info!(table = %table, "schema ensured");
    Ok(())
}

/// Drop the table (and with it the index). Missing tables are ignored.
pub fn drop_schema(conn: &Connection, table: &TableName) -> Result<()> {
    let _ = conn.execute(&format!("DROP TABLE IF EXISTS {}", table.quoted()), [])?;
    info!(table = %table, "table dropped");
    Ok(())
}

/// Whether the table currently exists.
#[cfg(test)]
pub(crate) fn table_exists(conn: &Connection, table: &TableName) -> Result<bool> {
    use rusqlite::OptionalExtension;

    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn table() -> TableName {
        TableName::new("documents").unwrap()
    }

    #[test]
    fn table_name_rejects_injection() {
        assert!(matches!(
            TableName::new("docs; DROP TABLE x"),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn table_name_forms() {
        let t = table();
        assert_eq!(t.as_str(), "documents");
        assert_eq!(t.quoted(), "\"documents\"");
        assert_eq!(t.index_name(), "documents_key_idx");
        assert_eq!(t.to_string(), "documents");
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn, &table()).unwrap();
        ensure_schema(&conn, &table()).unwrap();
        assert!(table_exists(&conn, &table()).unwrap());
    }

    #[test]
    fn ensure_schema_creates_unique_index() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn, &table()).unwrap();
        let unique: i64 = conn
            .query_row(
                "SELECT \"unique\" FROM pragma_index_list('documents') WHERE name = 'documents_key_idx'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(unique, 1);

        conn.execute("INSERT INTO documents (key, payload) VALUES ('k', x'00')", [])
            .unwrap();
        let dup = conn.execute("INSERT INTO documents (key, payload) VALUES ('k', x'01')", []);
        assert!(dup.is_err());
    }

    #[test]
    fn key_ordering_is_bytewise() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn, &table()).unwrap();
        for key in ["b", "B", "a", "é"] {
            conn.execute(
                "INSERT INTO documents (key, payload) VALUES (?1, x'')",
                params![key],
            )
            .unwrap();
        }
        let mut stmt = conn.prepare("SELECT key FROM documents ORDER BY key").unwrap();
        let keys: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(keys, vec!["B", "a", "b", "é"]);
    }

    #[test]
    fn drop_schema_removes_table() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn, &table()).unwrap();
        drop_schema(&conn, &table()).unwrap();
        assert!(!table_exists(&conn, &table()).unwrap());
        drop_schema(&conn, &table()).unwrap();
    }
}
