//! Error types for the document store.
//!
//! [`StoreError`] is returned by every store operation. Connection-level
//! failures are retried once by the health guard before they reach a caller;
//! uniqueness violations never leave the bulk writer.

use rusqlite::ErrorCode;
use thiserror::Error;

use docstore_core::WorkerId;
use docstore_settings::SettingsError;

/// Errors that can occur during document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No connection became available within the configured wait.
    #[error("connection pool exhausted: worker {worker} waited {waited_ms}ms")]
    PoolExhausted {
        /// Worker that was refused.
        worker: WorkerId,
        /// How long the worker waited before giving up.
        waited_ms: u64,
    },

    /// A pooled session died (or a new one could not be opened).
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A data operation ran while the table does not exist.
    #[error("schema missing: table {table} does not exist (call ensure_schema)")]
    SchemaMissing {
        /// Table the operation targeted.
        table: String,
    },

    /// Caller input was inconsistent; rejected before any I/O.
    #[error("malformed batch: {0}")]
    MalformedBatch(String),

    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool construction error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Store configuration rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Settings failed to load or validate.
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl StoreError {
    /// Whether the failure means the session itself is unusable.
    ///
    /// These are the errors the health guard answers with discard-and-retry.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            Self::ConnectionLost(_) => true,
            Self::Sqlite(err) => matches!(
                err.sqlite_error_code(),
                Some(
                    ErrorCode::SystemIoFailure
                        | ErrorCode::CannotOpen
                        | ErrorCode::NotADatabase
                )
            ),
            _ => false,
        }
    }

    /// Whether the failure is a uniqueness (or other constraint) violation.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(err) if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
        )
    }

    /// Rewrite "no such table" failures as [`StoreError::SchemaMissing`].
    ///
    /// Another store instance sharing the database may have dropped the
    /// table behind this one's back.
    pub(crate) fn or_schema_missing(self, table: &str) -> Self {
        let missing = matches!(
            &self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(_, Some(msg)))
                if msg.starts_with("no such table")
        );
        if missing {
            Self::SchemaMissing {
                table: table.to_string(),
            }
        } else {
            self
        }
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: ErrorCode, msg: &str) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code,
                extended_code: 0,
            },
            Some(msg.to_string()),
        )
    }

    #[test]
    fn pool_exhausted_display() {
        let err = StoreError::PoolExhausted {
            worker: WorkerId::from("w1"),
            waited_ms: 250,
        };
        assert_eq!(
            err.to_string(),
            "connection pool exhausted: worker w1 waited 250ms"
        );
    }

    #[test]
    fn schema_missing_display() {
        let err = StoreError::SchemaMissing {
            table: "documents".into(),
        };
        assert!(err.to_string().contains("table documents does not exist"));
    }

    #[test]
    fn malformed_batch_display() {
        let err = StoreError::MalformedBatch("2 keys but 3 payloads".into());
        assert_eq!(err.to_string(), "malformed batch: 2 keys but 3 payloads");
    }

    #[test]
    fn connection_lost_is_connection_failure() {
        assert!(StoreError::ConnectionLost("peer closed".into()).is_connection_failure());
    }

    #[test]
    fn io_failure_is_connection_failure() {
        let err = StoreError::from(sqlite_failure(ErrorCode::SystemIoFailure, "disk I/O error"));
        assert!(err.is_connection_failure());
        assert!(!err.is_unique_violation());
    }

    #[test]
    fn constraint_is_unique_violation() {
        let err = StoreError::from(sqlite_failure(
            ErrorCode::ConstraintViolation,
            "UNIQUE constraint failed: documents.key",
        ));
        assert!(err.is_unique_violation());
        assert!(!err.is_connection_failure());
    }

    #[test]
    fn data_errors_are_not_connection_failures() {
        assert!(!StoreError::MalformedBatch("x".into()).is_connection_failure());
        assert!(
            !StoreError::SchemaMissing {
                table: "t".into()
            }
            .is_connection_failure()
        );
        assert!(!StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows).is_connection_failure());
    }

    #[test]
    fn no_such_table_maps_to_schema_missing() {
        let err = StoreError::from(sqlite_failure(ErrorCode::Unknown, "no such table: documents"))
            .or_schema_missing("documents");
        assert!(matches!(err, StoreError::SchemaMissing { ref table } if table == "documents"));
    }

    #[test]
    fn other_errors_pass_through_schema_mapping() {
        let err = StoreError::ConnectionLost("gone".into()).or_schema_missing("documents");
        assert!(matches!(err, StoreError::ConnectionLost(_)));
    }

    #[test]
    fn from_settings_error() {
        let err: StoreError = SettingsError::InvalidValue {
            field: "table",
            reason: "\"no-dashes\" is not a plain identifier".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "invalid docstore setting `table`: \"no-dashes\" is not a plain identifier"
        );
    }
}
