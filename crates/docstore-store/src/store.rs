//! `DocumentStore`, the public facade.
//!
//! Every operation takes the caller's [`WorkerId`], validates its input
//! before touching the database, and runs through the [`HealthGuard`] so a
//! dead pooled session is replaced transparently.
//!
//! ```text
//!   Uninitialized ──ensure_schema──► Ready ──flush──► Flushed
//!                                     ▲                  │
//!                                     └──ensure_schema───┘
//! ```
//!
//! Data operations (`fetch`, `upsert`, `remove`, `report_metrics`) need
//! `Ready` and fail with [`StoreError::SchemaMissing`] otherwise.

use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use docstore_core::WorkerId;
use docstore_settings::StoreSettings;

use crate::bulk::{BulkOutcome, BulkWriter};
use crate::document::{Document, Documents, encode_documents, encode_keys};
use crate::errors::{Result, StoreError};
use crate::guard::HealthGuard;
use crate::metrics::{DOCUMENTS, VERSION};
use crate::pool::{ConnectionPool, PoolStatus};
use crate::sqlite::repository::DocumentRepo;
use crate::sqlite::schema::{self, TableName};

/// Where the store's table is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchemaState {
    /// Connected; `ensure_schema` has not run yet.
    Uninitialized,
    /// Table and index exist.
    Ready,
    /// Table dropped by `flush`.
    Flushed,
}

/// Counts from one upsert.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Documents written.
    pub inserted: usize,
    /// Documents skipped because their key already existed.
    pub conflicted: usize,
}

impl From<&BulkOutcome> for UpsertSummary {
    fn from(outcome: &BulkOutcome) -> Self {
        Self {
            inserted: outcome.inserted_count(),
            conflicted: outcome.conflicted_count(),
        }
    }
}

/// Snapshot returned by [`DocumentStore::report_metrics`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreMetrics {
    /// Crate version.
    pub version: &'static str,
    /// Rows in the table.
    pub row_count: u64,
}

/// Key/value document store over a pooled `SQLite` database.
#[derive(Debug)]
pub struct DocumentStore {
    pool: ConnectionPool,
    table: TableName,
    state: RwLock<SchemaState>,
}

impl DocumentStore {
    /// Build the pool. The table is not touched; call
    /// [`ensure_schema`](Self::ensure_schema) before any data operation.
    pub fn connect(settings: &StoreSettings) -> Result<Self> {
        settings.validate()?;
        let table = TableName::new(&settings.table)?;
        let pool = ConnectionPool::new(settings)?;
        info!(
            path = %settings.database_path,
            table = %table,
            max_connections = settings.pool.max_connections,
            "document store connected"
        );
        Ok(Self {
            pool,
            table,
            state: RwLock::new(SchemaState::Uninitialized),
        })
    }

    /// Connect and bootstrap the schema on behalf of this process.
    pub fn open(settings: &StoreSettings) -> Result<Self> {
        let store = Self::connect(settings)?;
        store.ensure_schema(&WorkerId::for_process())?;
        Ok(store)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchemaState {
        *self.state.read()
    }

    /// Backing table.
    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Pool occupancy.
    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Create the table and unique key index if missing. Idempotent.
    #[instrument(skip(self), fields(table = %self.table))]
    pub fn ensure_schema(&self, worker: &WorkerId) -> Result<()> {
        // held across the DDL so the state always matches the last one to commit
        let mut state = self.state.write();
        self.guard()
            .run(worker, |conn| schema::ensure_schema(conn, &self.table))?;
        *state = SchemaState::Ready;
        Ok(())
    }

    /// Drop the table. Data operations fail until the next `ensure_schema`.
    #[instrument(skip(self), fields(table = %self.table))]
    pub fn flush(&self, worker: &WorkerId) -> Result<()> {
        let mut state = self.state.write();
        self.guard()
            .run(worker, |conn| schema::drop_schema(conn, &self.table))?;
        *state = SchemaState::Flushed;
        Ok(())
    }

    /// Documents for whichever of `keys` exist.
    ///
    /// Missing keys are omitted; an empty key list returns nothing without
    /// a query.
    pub fn fetch<K: AsRef<[u8]>>(&self, worker: &WorkerId, keys: &[K]) -> Result<Documents> {
        self.require_ready()?;
        let keys = encode_keys(keys)?;
        if keys.is_empty() {
            return Ok(Documents::empty());
        }
        let rows = self.run_data(worker, |conn| DocumentRepo::fetch(conn, &self.table, &keys))?;
        debug!(worker = %worker, requested = keys.len(), found = rows.len(), "fetch");
        Ok(Documents::from_rows(rows))
    }

    /// Store `docs`. Keys that already exist keep their current payload.
    pub fn upsert(&self, worker: &WorkerId, docs: &[Document]) -> Result<UpsertSummary> {
        self.require_ready()?;
        let encoded = encode_documents(docs)?;
        if encoded.is_empty() {
            return Ok(UpsertSummary::default());
        }
        let writer = BulkWriter::new(&self.table);
        let outcome = self.run_data(worker, |conn| writer.write(conn, &encoded).into_result())?;
        let summary = UpsertSummary::from(&outcome);
        debug!(
            worker = %worker,
            inserted = summary.inserted,
            conflicted = summary.conflicted,
            "upsert"
        );
        Ok(summary)
    }

    /// Delete the rows for `keys`. Returns how many existed.
    pub fn remove<K: AsRef<[u8]>>(&self, worker: &WorkerId, keys: &[K]) -> Result<usize> {
        self.require_ready()?;
        let keys = encode_keys(keys)?;
        if keys.is_empty() {
            return Ok(0);
        }
        let removed = self.run_data(worker, |conn| DocumentRepo::delete(conn, &self.table, &keys))?;
        debug!(worker = %worker, requested = keys.len(), removed, "remove");
        Ok(removed)
    }

    /// Row count and version, also published as the documents gauge.
    pub fn report_metrics(&self, worker: &WorkerId) -> Result<StoreMetrics> {
        self.require_ready()?;
        let row_count = self.run_data(worker, |conn| DocumentRepo::count(conn, &self.table))?;
        #[allow(clippy::cast_precision_loss)]
        let rows = row_count as f64;
        metrics::gauge!(DOCUMENTS, "version" => VERSION).set(rows);
        Ok(StoreMetrics {
            version: VERSION,
            row_count,
        })
    }

    fn guard(&self) -> HealthGuard<'_> {
        HealthGuard::new(&self.pool)
    }

    fn require_ready(&self) -> Result<()> {
        if self.state() == SchemaState::Ready {
            Ok(())
        } else {
            Err(self.schema_missing())
        }
    }

    fn schema_missing(&self) -> StoreError {
        StoreError::SchemaMissing {
            table: self.table.as_str().to_string(),
        }
    }

    /// Run a data operation, noticing if the table vanished underneath us.
    fn run_data<T, F>(&self, worker: &WorkerId, op: F) -> Result<T>
    where
        F: FnMut(&rusqlite::Connection) -> Result<T>,
    {
        match self.guard().run(worker, op) {
            Err(err) => {
                let err = err.or_schema_missing(self.table.as_str());
                if matches!(err, StoreError::SchemaMissing { .. }) {
                    let mut state = self.state.write();
                    if *state == SchemaState::Ready {
                        info!(table = %self.table, "table dropped externally");
                        *state = SchemaState::Flushed;
                    }
                }
                Err(err)
            }
            ok => ok,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
