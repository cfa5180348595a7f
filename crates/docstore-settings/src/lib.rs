//! # docstore-settings
//!
//! Configuration for the docstore backend, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`StoreSettings::default()`]
//! 2. **Settings file**: `~/.docstore/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `DOCSTORE_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use docstore_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("table: {}", settings.table);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{PoolSettings, StoreSettings, is_valid_table_name};
