//! Conflict-tolerant bulk writes.
//!
//! [`BulkWriter::write`] first tries the bulk-load path: one transaction of
//! multi-row inserts with no conflict handling. If any key already exists the
//! whole transaction rolls back and the batch is replayed row by row with
//! `ON CONFLICT DO NOTHING`, so new keys are stored and existing keys keep
//! their original payload.

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::document::EncodedDocument;
use crate::errors::StoreError;
use crate::metrics::{UPSERT_CONFLICTS_TOTAL, UPSERT_FALLBACK_TOTAL, UPSERT_FAST_PATH_TOTAL};
use crate::sqlite::repository::DocumentRepo;
use crate::sqlite::schema::TableName;

/// How a bulk write ended.
#[derive(Debug)]
pub enum BulkOutcome {
    /// Every document in the batch was stored.
    AllInserted {
        /// Rows written.
        inserted: usize,
    },
    /// Some keys already existed and were left untouched.
    PartialConflict {
        /// Keys written.
        inserted: Vec<String>,
        /// Keys skipped.
        conflicted: Vec<String>,
    },
    /// Neither path could write the batch.
    Failed(StoreError),
}

impl BulkOutcome {
    /// Rows written.
    pub fn inserted_count(&self) -> usize {
        match self {
            Self::AllInserted { inserted } => *inserted,
            Self::PartialConflict { inserted, .. } => inserted.len(),
            Self::Failed(_) => 0,
        }
    }

    /// Keys skipped because they already existed.
    pub fn conflicted_count(&self) -> usize {
        match self {
            Self::PartialConflict { conflicted, .. } => conflicted.len(),
            Self::AllInserted { .. } | Self::Failed(_) => 0,
        }
    }

    /// `Ok(self)` unless the write failed.
    pub fn into_result(self) -> crate::errors::Result<Self> {
        match self {
            Self::Failed(err) => Err(err),
            outcome => Ok(outcome),
        }
    }
}

/// Writes document batches into one table.
#[derive(Clone, Copy, Debug)]
pub struct BulkWriter<'a> {
    table: &'a TableName,
}

impl<'a> BulkWriter<'a> {
    /// Writer targeting `table`.
    pub fn new(table: &'a TableName) -> Self {
        Self { table }
    }

    /// Insert `docs`, leaving existing keys untouched.
    ///
    /// Connection failures on the bulk-load path are returned as
    /// [`BulkOutcome::Failed`] straight away so the caller can reconnect;
    /// any other failure there moves on to the per-row path.
    pub fn write(&self, conn: &Connection, docs: &[EncodedDocument<'_>]) -> BulkOutcome {
        if docs.is_empty() {
            return BulkOutcome::AllInserted { inserted: 0 };
        }

        match DocumentRepo::bulk_insert(conn, self.table, docs) {
            Ok(inserted) => {
                metrics::counter!(UPSERT_FAST_PATH_TOTAL).increment(1);
                debug!(table = %self.table, inserted, "bulk insert committed");
                return BulkOutcome::AllInserted { inserted };
            }
            Err(err) if err.is_connection_failure() => return BulkOutcome::Failed(err),
            Err(err) if err.is_unique_violation() => {
                debug!(table = %self.table, batch = docs.len(), "key conflict, inserting row by row");
            }
            Err(err) => {
                warn!(table = %self.table, error = %err, "bulk insert failed, inserting row by row");
            }
        }
        metrics::counter!(UPSERT_FALLBACK_TOTAL).increment(1);

        match DocumentRepo::insert_ignoring_conflicts(conn, self.table, docs) {
            Ok(split) if split.conflicted.is_empty() => BulkOutcome::AllInserted {
                inserted: split.inserted.len(),
            },
            Ok(split) => {
                metrics::counter!(UPSERT_CONFLICTS_TOTAL)
                    .increment(u64::try_from(split.conflicted.len()).unwrap_or(u64::MAX));
                debug!(
                    table = %self.table,
                    inserted = split.inserted.len(),
                    conflicted = split.conflicted.len(),
                    "row-by-row insert committed"
                );
                BulkOutcome::PartialConflict {
                    inserted: split.inserted,
                    conflicted: split.conflicted,
                }
            }
            Err(err) => BulkOutcome::Failed(err.or_schema_missing(self.table.as_str())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
