//! # docstore-core
//!
//! Foundation types shared by the docstore crates:
//!
//! - **Worker identity**: [`WorkerId`], the token the connection pool keys
//!   its per-worker slots on
//! - **Logging**: `tracing` subscriber bootstrap for host processes

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;

pub use ids::WorkerId;
pub use logging::{init_json_subscriber, init_subscriber};
