//! `SQLite` backend for the document store.
//!
//! - **[`connection`]**: `r2d2` session manager and pool construction, with
//!   pragmas applied to every new session.
//! - **[`schema`]**: validated table names and idempotent DDL.
//! - **[`repository`]**: stateless statements over one `&Connection`.

pub mod connection;
pub mod repository;
pub mod schema;

pub use connection::{
    PooledSession, SessionManager, SessionPool, StoreConnection, new_session_pool,
};
pub use repository::{DocumentRepo, InsertSplit};
pub use schema::TableName;
