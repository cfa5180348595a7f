//! `SQLite` sessions managed by `r2d2`.
//!
//! [`SessionManager`] wraps the `r2d2_sqlite` manager so that every pooled
//! value is a [`StoreConnection`]: a session that can be marked broken.
//! `r2d2` asks the manager whether a returning connection has broken, and
//! closes it instead of recycling it when it has. The [`PragmaCustomizer`]
//! runs on each new session to set WAL mode and the busy timeout.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use r2d2::ManageConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::debug;

use docstore_settings::StoreSettings;

use crate::errors::{Result, StoreError};

/// Shared `r2d2` pool of store sessions.
pub type SessionPool = r2d2::Pool<SessionManager>;

/// A session checked out of the shared pool.
pub type PooledSession = r2d2::PooledConnection<SessionManager>;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// One live database session.
///
/// `conn` is `None` once the session has been severed; a severed or
/// broken session is never handed to callers again. The broken flag is
/// atomic so any holder of a shared session can raise it.
#[derive(Debug)]
pub struct StoreConnection {
    id: u64,
    conn: Option<Connection>,
    broken: AtomicBool,
}

impl StoreConnection {
    fn new(conn: Connection) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            conn: Some(conn),
            broken: AtomicBool::new(false),
        }
    }

    /// Process-unique session number, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Borrow the underlying `SQLite` connection.
    ///
    /// Fails with [`StoreError::ConnectionLost`] once the session is gone.
    pub fn session(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or_else(|| {
            StoreError::ConnectionLost(format!("session {} is closed", self.id))
        })
    }

    /// Trivial round trip proving the session still answers.
    pub fn probe(&self) -> Result<()> {
        let one: i64 = self.session()?.query_row("SELECT 1", [], |row| row.get(0))?;
        debug_assert_eq!(one, 1);
        Ok(())
    }

    /// Flag the session so the pool closes it instead of recycling it.
    pub fn mark_broken(&self) {
        self.broken.store(true, Ordering::Release);
    }

    /// Whether the session must not be reused.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire) || self.conn.is_none()
    }

    /// Close the underlying session out from under the pool, the way a
    /// server restart or TCP reset would.
    pub fn sever(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err((_, err)) = conn.close() {
                debug!(session = self.id, error = %err, "close during sever failed");
            }
        }
    }
}

/// `r2d2` manager producing [`StoreConnection`]s for one database file.
pub struct SessionManager {
    inner: SqliteConnectionManager,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Manager for the database file at `path`.
    pub fn file(path: &str) -> Self {
        Self {
            inner: SqliteConnectionManager::file(path),
        }
    }
}

impl ManageConnection for SessionManager {
    type Connection = StoreConnection;
    type Error = rusqlite::Error;

    fn connect(&self) -> std::result::Result<StoreConnection, rusqlite::Error> {
        let conn = self.inner.connect()?;
        Ok(StoreConnection::new(conn))
    }

    fn is_valid(&self, conn: &mut StoreConnection) -> std::result::Result<(), rusqlite::Error> {
        match conn.conn.as_ref() {
            Some(c) => c.query_row("SELECT 1", [], |_| Ok(())),
            None => Err(rusqlite::Error::InvalidQuery),
        }
    }

    fn has_broken(&self, conn: &mut StoreConnection) -> bool {
        conn.is_broken()
    }
}

/// `SQLite` pragma customizer that runs on each new session.
#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<StoreConnection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut StoreConnection) -> std::result::Result<(), rusqlite::Error> {
        let Some(c) = conn.conn.as_ref() else {
            return Err(rusqlite::Error::InvalidQuery);
        };
        c.execute_batch(&format!(
            "PRAGMA busy_timeout = {};\
             PRAGMA journal_mode = WAL;\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        ))?;
        debug!(session = conn.id, "session opened");
        Ok(())
    }
}

/// Build the shared session pool described by `settings`.
///
/// Blocks until `minConnections` sessions are open (bounded by the acquire
/// timeout).
pub fn new_session_pool(settings: &StoreSettings) -> Result<SessionPool> {
    let pool_settings = &settings.pool;
    let pool = r2d2::Pool::builder()
        .max_size(pool_settings.max_connections)
        .min_idle(Some(pool_settings.min_connections))
        .connection_timeout(pool_settings.acquire_timeout())
        .idle_timeout(pool_settings.idle_timeout())
        .test_on_check_out(true)
        .connection_customizer(Box::new(PragmaCustomizer {
            busy_timeout_ms: pool_settings.busy_timeout_ms,
        }))
        .build(SessionManager::file(&settings.database_path))?;
    Ok(pool)
}

/// Pragma state for verification.
#[cfg(test)]
#[derive(Debug)]
pub(crate) struct PragmaState {
    /// Journal mode (should be "wal").
    pub journal_mode: String,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: i64,
}

/// Read back the pragmas the customizer sets.
#[cfg(test)]
pub(crate) fn verify_pragmas(conn: &Connection) -> Result<PragmaState> {
    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    let busy_timeout_ms: i64 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0))?;
    Ok(PragmaState {
        journal_mode,
        busy_timeout_ms,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
