//! Metric names published through the `metrics` facade.
//!
//! No recorder is installed here; whichever exporter the host process
//! installs picks these up.

/// Rows in the store (gauge, labels: version).
pub const DOCUMENTS: &str = "docstore_documents";
/// Upserts committed by the bulk-load path (counter).
pub const UPSERT_FAST_PATH_TOTAL: &str = "docstore_upsert_fast_path_total";
/// Upserts that fell back to per-row conflict-ignoring inserts (counter).
pub const UPSERT_FALLBACK_TOTAL: &str = "docstore_upsert_fallback_total";
/// Keys skipped because they already existed (counter).
pub const UPSERT_CONFLICTS_TOTAL: &str = "docstore_upsert_conflicts_total";
/// Sessions discarded and replaced by the health guard (counter).
pub const RECONNECTS_TOTAL: &str = "docstore_reconnects_total";
/// Acquisitions refused because the pool stayed full (counter).
pub const POOL_EXHAUSTED_TOTAL: &str = "docstore_pool_exhausted_total";

/// Crate version, used as the `version` label.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
