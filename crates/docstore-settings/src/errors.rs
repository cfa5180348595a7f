//! Errors raised while loading or checking [`StoreSettings`](crate::StoreSettings).

use thiserror::Error;

/// Why a docstore configuration could not be used.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// `~/.docstore/settings.json` (or the given path) exists but could not
    /// be read. A missing file is not an error; defaults apply.
    #[error("cannot read docstore settings: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not JSON, or a field has the wrong shape, such as a
    /// string where `pool.maxConnections` expects a number.
    #[error("malformed docstore settings: {0}")]
    Json(#[from] serde_json::Error),
    /// A value parsed but cannot drive the store: a table name that is not a
    /// plain identifier, an empty `databasePath`, or pool bounds like
    /// `minConnections > maxConnections`.
    #[error("invalid docstore setting `{field}`: {reason}")]
    InvalidValue {
        /// camelCase path of the offending field, e.g. `pool.maxConnections`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    /// Field that failed validation, if this is a validation error.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::InvalidValue { field, .. } => Some(field),
            Self::Io(_) | Self::Json(_) => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
