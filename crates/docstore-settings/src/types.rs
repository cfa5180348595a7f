//! Settings types.
//!
//! Field names serialize as camelCase so the settings file reads the same as
//! the host engine's other JSON configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Longest table name accepted (the derived index name must stay a valid
/// identifier too).
const MAX_TABLE_NAME_LEN: usize = 63;

/// Top-level store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Path of the database file shared by every pooled session.
    pub database_path: String,
    /// Name of the single (key, payload) table.
    pub table: String,
    /// Connection pool sizing and timeouts.
    pub pool: PoolSettings,
    /// `tracing` filter used by [`init_logging`](Self::init_logging).
    /// `RUST_LOG` overrides it.
    pub log_level: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            database_path: "docstore.db".to_string(),
            table: "documents".to_string(),
            pool: PoolSettings::default(),
            log_level: "warn".to_string(),
        }
    }
}

impl StoreSettings {
    /// Settings pointing at `database_path` with every other value defaulted.
    #[must_use]
    pub fn for_path(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            ..Self::default()
        }
    }

    /// Install the process-wide compact stderr subscriber at `log_level`.
    ///
    /// Meant for the host's startup path, after settings are loaded; the
    /// store itself never installs a subscriber. A no-op when one is
    /// already installed.
    pub fn init_logging(&self) {
        docstore_core::init_subscriber(&self.log_level);
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_table_name(&self.table) {
            return Err(SettingsError::invalid(
                "table",
                format!("{:?} is not a plain identifier", self.table),
            ));
        }
        if self.database_path.is_empty() {
            return Err(SettingsError::invalid("databasePath", "must not be empty"));
        }
        self.pool.validate()
    }
}

/// Connection pool settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolSettings {
    /// Sessions kept open even when idle.
    pub min_connections: u32,
    /// Hard upper bound on open sessions.
    pub max_connections: u32,
    /// Longest a caller waits for a session before `PoolExhausted`.
    pub acquire_timeout_ms: u64,
    /// `SQLite` busy timeout applied to every session.
    pub busy_timeout_ms: u32,
    /// Idle sessions in the shared pool are closed after this long.
    pub idle_timeout_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 8,
            acquire_timeout_ms: 5_000,
            busy_timeout_ms: 30_000,
            idle_timeout_ms: 600_000,
        }
    }
}

impl PoolSettings {
    /// Acquire timeout as a [`Duration`].
    #[must_use]
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Idle timeout as a [`Duration`]; `None` when disabled (`0`).
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(SettingsError::invalid(
                "pool.maxConnections",
                "must be at least 1",
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(SettingsError::invalid(
                "pool.minConnections",
                format!(
                    "{} exceeds maxConnections ({})",
                    self.min_connections, self.max_connections
                ),
            ));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(SettingsError::invalid(
                "pool.acquireTimeoutMs",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Whether `name` is safe to splice into DDL as a table name.
///
/// Accepts `[A-Za-z_][A-Za-z0-9_]*` up to 63 characters.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_TABLE_NAME_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
