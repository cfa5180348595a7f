//! Health-checked execution against a pooled session.
//!
//! A parked session can die while nobody is looking (server restart, file
//! replaced, I/O error). [`HealthGuard::run`] probes the session before use
//! and, on any connection-level failure, discards it and replays the whole
//! operation exactly once on a fresh session.

use rusqlite::Connection;
use tracing::warn;

use docstore_core::WorkerId;

use crate::errors::Result;
use crate::metrics::RECONNECTS_TOTAL;
use crate::pool::ConnectionPool;

/// Discard-and-retry attempts after the first failure.
pub const MAX_RECONNECTS: u32 = 1;

/// Runs operations on a worker's session, replacing it once if it is dead.
#[derive(Clone, Copy, Debug)]
pub struct HealthGuard<'a> {
    pool: &'a ConnectionPool,
}

impl<'a> HealthGuard<'a> {
    /// Guard acquisitions from `pool`.
    pub fn new(pool: &'a ConnectionPool) -> Self {
        Self { pool }
    }

    /// Probe `worker`'s session, then run `op` on it.
    ///
    /// `op` may run twice, so it must leave nothing behind when it fails
    /// (run its statements in a transaction). Errors that are not
    /// connection failures release the session and propagate unchanged.
    pub fn run<T, F>(&self, worker: &WorkerId, mut op: F) -> Result<T>
    where
        F: FnMut(&Connection) -> Result<T>,
    {
        let mut reconnects = 0;
        loop {
            let handle = self.pool.acquire(worker)?;
            let outcome = {
                let session = handle.lock();
                session.probe().and_then(|()| op(session.session()?))
            };
            match outcome {
                Ok(value) => {
                    self.pool.release(handle);
                    return Ok(value);
                }
                Err(err) if err.is_connection_failure() => {
                    warn!(
                        worker = %worker,
                        session = handle.id(),
                        reconnects,
                        error = %err,
                        "pooled session failed"
                    );
                    self.pool.discard(handle);
                    if reconnects >= MAX_RECONNECTS {
                        return Err(err);
                    }
                    reconnects += 1;
                    metrics::counter!(RECONNECTS_TOTAL).increment(1);
                }
                Err(err) => {
                    self.pool.release(handle);
                    return Err(err);
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
