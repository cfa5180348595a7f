//! # docstore-store
//!
//! Key/value document store over a pooled `SQLite` database.
//!
//! - **Facade**: [`DocumentStore`] with fetch, upsert, remove, flush and
//!   schema bootstrap, each taking the caller's [`WorkerId`]
//! - **Connection pool**: [`ConnectionPool`] keeps one parked session per
//!   worker and bounds every wait
//! - **Health guard**: [`HealthGuard`] probes a session before use and
//!   replaces a dead one exactly once
//! - **Bulk writer**: [`BulkWriter`] loads batches in bulk and falls back to
//!   per-row conflict-ignoring inserts when keys already exist
//! - **`SQLite` backend**: `r2d2` session manager, DDL and repository
//!
//! ```no_run
//! use docstore_store::{Document, DocumentStore, WorkerId};
//! use docstore_settings::StoreSettings;
//!
//! let store = DocumentStore::open(&StoreSettings::for_path("docs.db"))?;
//! let worker = WorkerId::for_current_thread();
//! store.upsert(&worker, &[Document::new("key1", vec![0u8, 1])])?;
//! let found: Vec<Document> = store.fetch(&worker, &["key1", "key3"])?.collect();
//! # Ok::<(), docstore_store::StoreError>(())
//! ```

#![deny(unsafe_code)]

pub mod bulk;
pub mod document;
pub mod errors;
pub mod guard;
pub mod metrics;
pub mod pool;
pub mod sqlite;
pub mod store;

pub use bulk::{BulkOutcome, BulkWriter};
pub use docstore_core::WorkerId;
pub use document::{Document, Documents, EncodedDocument};
pub use errors::{Result, StoreError};
pub use guard::HealthGuard;
pub use pool::{ConnectionHandle, ConnectionPool, PoolStatus};
pub use store::{DocumentStore, SchemaState, StoreMetrics, UpsertSummary};
