//! Worker-keyed connection pool.
//!
//! [`ConnectionPool`] sits on top of the shared `r2d2` session pool and adds
//! one thing: affinity. Each worker is bound to at most one session at a
//! time. Releasing the last handle parks the session in the worker's slot
//! without closing it, and the worker's next `acquire` picks the same session
//! back up.
//!
//! ```text
//!   acquire(w) ──► slot[w] bound?   ── yes ─► share the bound session
//!                  slot[w] parked?  ── yes ─► rebind the parked session
//!                  slot[w] opening? ── yes ─► wait for the opener (bounded)
//!                  otherwise        ──────► open from r2d2, evicting the
//!                                           oldest parked slot if at max
//! ```
//!
//! Reentrant acquires from the same worker (a guarded operation calling
//! back into the store, or two threads sharing a worker identity) get a
//! second handle onto the bound session. Statements on it are serialized by
//! a reentrant lock, and the session is parked once every handle is gone.
//!
//! All waits are bounded by the configured acquire timeout. Running out of
//! time at capacity is [`StoreError::PoolExhausted`]; running out of time
//! while below capacity means no session could be opened at all, which is
//! reported as [`StoreError::ConnectionLost`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, warn};

use docstore_core::WorkerId;
use docstore_settings::StoreSettings;

use crate::errors::{Result, StoreError};
use crate::metrics::POOL_EXHAUSTED_TOTAL;
use crate::sqlite::connection::{PooledSession, SessionPool, new_session_pool};

/// Longest single sleep inside `acquire`; the loop re-checks capacity after
/// each one.
const WAIT_SLICE: Duration = Duration::from_millis(50);

/// A session shared by every live handle of one worker.
type BoundSession = Arc<ReentrantMutex<PooledSession>>;

enum Slot {
    /// Released by its worker and kept open for reuse.
    Parked {
        session: PooledSession,
        since: Instant,
    },
    /// A session is being opened for this worker.
    Opening,
    /// Held by `holders` live [`ConnectionHandle`]s.
    Bound {
        session: BoundSession,
        session_id: u64,
        holders: usize,
    },
}

struct Shared {
    sessions: SessionPool,
    slots: Mutex<HashMap<WorkerId, Slot>>,
    returned: Condvar,
    acquire_timeout: Duration,
}

impl Shared {
    /// Drop one holder of `session`; the last one parks it (or closes it if
    /// it broke).
    fn release(&self, worker: &WorkerId, session: BoundSession) {
        let mut retired = None;
        let mut leftover = None;
        {
            let mut slots = self.slots.lock();
            let last_holder = match slots.get_mut(worker) {
                Some(Slot::Bound {
                    session: bound,
                    holders,
                    ..
                }) if Arc::ptr_eq(bound, &session) => {
                    *holders -= 1;
                    *holders == 0
                }
                // detached by `discard`; the final clone closes it on drop
                _ => false,
            };

            if last_holder {
                let _ = slots.remove(worker);
                match Arc::try_unwrap(session) {
                    Ok(lock) => {
                        let session = lock.into_inner();
                        if session.is_broken() {
                            retired = Some(session);
                        } else {
                            debug!(worker = %worker, session = session.id(), "session parked");
                            let _ = slots.insert(
                                worker.clone(),
                                Slot::Parked {
                                    session,
                                    since: Instant::now(),
                                },
                            );
                        }
                    }
                    Err(still_shared) => leftover = Some(still_shared),
                }
            } else {
                leftover = Some(session);
            }
        }
        self.returned.notify_all();

        if let Some(session) = retired {
            debug!(worker = %worker, session = session.id(), "closing broken session");
            // r2d2 sees the broken flag on return and closes instead of recycling
            drop(session);
        }
        drop(leftover);
    }

    /// Unbind `session` from `worker` so the next `acquire` opens a new one.
    fn detach(&self, worker: &WorkerId, session: &BoundSession) {
        let mut slots = self.slots.lock();
        let bound_here = matches!(
            slots.get(worker),
            Some(Slot::Bound { session: bound, .. }) if Arc::ptr_eq(bound, session)
        );
        if bound_here {
            let _ = slots.remove(worker);
        }
        drop(slots);
        self.returned.notify_all();
    }
}

/// Point-in-time pool occupancy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    /// Sessions currently open (parked, in flight, or idle in `r2d2`).
    pub connections: u32,
    /// Sessions idle in `r2d2`, not bound to any worker.
    pub idle_connections: u32,
    /// Workers with a parked session.
    pub parked_workers: usize,
    /// Workers currently holding (or opening) their session.
    pub active_workers: usize,
    /// Configured upper bound.
    pub max_size: u32,
}

/// Bounded pool of sessions with per-worker affinity.
///
/// Cheap to clone; clones share the same sessions and slots.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Build a pool for the database described by `settings`.
    pub fn new(settings: &StoreSettings) -> Result<Self> {
        let sessions = new_session_pool(settings)?;
        Ok(Self::from_sessions(sessions, settings.pool.acquire_timeout()))
    }

    /// Wrap an existing `r2d2` session pool.
    pub fn from_sessions(sessions: SessionPool, acquire_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                sessions,
                slots: Mutex::new(HashMap::new()),
                returned: Condvar::new(),
                acquire_timeout,
            }),
        }
    }

    /// Hand `worker` its session, opening one if it has none.
    ///
    /// While the worker already holds a handle, this returns another handle
    /// onto the same session instead of opening a second one.
    pub fn acquire(&self, worker: &WorkerId) -> Result<ConnectionHandle> {
        let started = Instant::now();
        let deadline = started + self.shared.acquire_timeout;

        {
            let mut slots = self.shared.slots.lock();
            loop {
                match slots.get_mut(worker) {
                    Some(Slot::Bound {
                        session,
                        session_id,
                        holders,
                    }) => {
                        *holders += 1;
                        debug!(
                            worker = %worker,
                            session = *session_id,
                            holders = *holders,
                            "sharing bound session"
                        );
                        let (session, session_id) = (Arc::clone(session), *session_id);
                        return Ok(self.handle(worker, session, session_id));
                    }
                    Some(Slot::Parked { .. }) => {
                        if let Some(Slot::Parked { session, .. }) = slots.remove(worker) {
                            debug!(worker = %worker, session = session.id(), "reusing parked session");
                            return Ok(self.bind(&mut slots, worker, session));
                        }
                    }
                    Some(Slot::Opening) => {
                        if self
                            .shared
                            .returned
                            .wait_until(&mut slots, deadline)
                            .timed_out()
                        {
                            return Err(self.timed_out(worker, started));
                        }
                    }
                    None => {
                        let _ = slots.insert(worker.clone(), Slot::Opening);
                        break;
                    }
                }
            }
        }

        let opened = self.open_session(worker, started, deadline);
        let mut slots = self.shared.slots.lock();
        let outcome = match opened {
            Ok(session) => {
                debug!(worker = %worker, session = session.id(), "session bound to worker");
                Ok(self.bind(&mut slots, worker, session))
            }
            Err(err) => {
                let _ = slots.remove(worker);
                Err(err)
            }
        };
        drop(slots);
        self.shared.returned.notify_all();
        outcome
    }

    /// Give up the handle.
    ///
    /// When it is the worker's last handle the session is parked for the
    /// worker's next `acquire` and stays open. A broken session is closed
    /// instead.
    pub fn release(&self, handle: ConnectionHandle) {
        drop(handle);
    }

    /// Mark the handle's session broken and unbind it from its worker.
    ///
    /// Other handles still sharing the session see it as broken; it is
    /// closed once the last of them is dropped.
    pub fn discard(&self, handle: ConnectionHandle) {
        warn!(worker = %handle.worker, session = handle.session_id, "discarding pooled session");
        handle.mark_broken();
        if let Some(session) = handle.session.as_ref() {
            self.shared.detach(&handle.worker, session);
        }
        drop(handle);
    }

    /// Current occupancy.
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.sessions.state();
        let slots = self.shared.slots.lock();
        let parked_workers = slots
            .values()
            .filter(|slot| matches!(slot, Slot::Parked { .. }))
            .count();
        PoolStatus {
            connections: state.connections,
            idle_connections: state.idle_connections,
            parked_workers,
            active_workers: slots.len() - parked_workers,
            max_size: self.shared.sessions.max_size(),
        }
    }

    fn bind(
        &self,
        slots: &mut HashMap<WorkerId, Slot>,
        worker: &WorkerId,
        session: PooledSession,
    ) -> ConnectionHandle {
        let session_id = session.id();
        let session = Arc::new(ReentrantMutex::new(session));
        let _ = slots.insert(
            worker.clone(),
            Slot::Bound {
                session: Arc::clone(&session),
                session_id,
                holders: 1,
            },
        );
        self.handle(worker, session, session_id)
    }

    fn handle(
        &self,
        worker: &WorkerId,
        session: BoundSession,
        session_id: u64,
    ) -> ConnectionHandle {
        ConnectionHandle {
            worker: worker.clone(),
            session_id,
            session: Some(session),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Error for a wait on another thread's open that ran out of time.
    fn timed_out(&self, worker: &WorkerId, started: Instant) -> StoreError {
        let sessions = &self.shared.sessions;
        if sessions.state().connections < sessions.max_size() {
            return StoreError::ConnectionLost(format!(
                "no session opened for worker {worker} within {}ms",
                self.shared.acquire_timeout.as_millis()
            ));
        }
        self.exhausted(worker, started)
    }

    fn exhausted(&self, worker: &WorkerId, started: Instant) -> StoreError {
        let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        metrics::counter!(POOL_EXHAUSTED_TOTAL).increment(1);
        warn!(worker = %worker, waited_ms, "connection pool exhausted");
        StoreError::PoolExhausted {
            worker: worker.clone(),
            waited_ms,
        }
    }

    /// Get a session from `r2d2` for a worker that has none.
    fn open_session(
        &self,
        worker: &WorkerId,
        started: Instant,
        deadline: Instant,
    ) -> Result<PooledSession> {
        let sessions = &self.shared.sessions;
        let mut open_failure: Option<String> = None;
        loop {
            if let Some(session) = sessions.try_get() {
                return Ok(session);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(match open_failure {
                    Some(reason) => StoreError::ConnectionLost(format!(
                        "could not open a session within {}ms: {reason}",
                        self.shared.acquire_timeout.as_millis()
                    )),
                    None => self.exhausted(worker, started),
                });
            }
            let slice = (deadline - now).min(WAIT_SLICE);

            if sessions.state().connections < sessions.max_size() {
                match sessions.get_timeout(slice) {
                    Ok(session) => return Ok(session),
                    // Still below capacity after waiting: sessions fail to open
                    Err(err) if sessions.state().connections < sessions.max_size() => {
                        open_failure = Some(err.to_string());
                        continue;
                    }
                    Err(_) => {}
                }
            }
            open_failure = None;

            // At capacity: reclaim the longest-idle parked session, or wait
            // for somebody to give one back.
            let evicted = {
                let mut slots = self.shared.slots.lock();
                let evicted = evict_oldest_parked(&mut slots);
                if evicted.is_none() {
                    let _ = self.shared.returned.wait_for(&mut slots, slice);
                }
                evicted
            };
            if let Some((owner, session)) = evicted {
                debug!(
                    worker = %worker,
                    evicted_from = %owner,
                    session = session.id(),
                    "evicting idle parked session"
                );
                drop(session);
            }
        }
    }

    /// Close a parked session in place without telling the pool, as a
    /// server restart would.
    #[cfg(test)]
    pub(crate) fn sever_parked(&self, worker: &WorkerId) -> bool {
        let mut slots = self.shared.slots.lock();
        match slots.get_mut(worker) {
            Some(Slot::Parked { session, .. }) => {
                session.sever();
                true
            }
            _ => false,
        }
    }
}

fn evict_oldest_parked(slots: &mut HashMap<WorkerId, Slot>) -> Option<(WorkerId, PooledSession)> {
    let victim = slots
        .iter()
        .filter_map(|(worker, slot)| match slot {
            Slot::Parked { since, .. } => Some((worker, *since)),
            Slot::Opening | Slot::Bound { .. } => None,
        })
        .min_by_key(|(_, since)| *since)
        .map(|(worker, _)| worker.clone())?;
    match slots.remove(&victim) {
        Some(Slot::Parked { session, .. }) => Some((victim, session)),
        _ => None,
    }
}

/// A worker's hold on its session.
///
/// Every handle of one worker points at the same session. Dropping a handle
/// releases it, so an early return never strands the worker's slot.
pub struct ConnectionHandle {
    worker: WorkerId,
    session_id: u64,
    session: Option<BoundSession>,
    shared: Arc<Shared>,
}

impl ConnectionHandle {
    /// Worker this handle is bound to.
    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    /// Identifier of the underlying session.
    pub fn id(&self) -> u64 {
        self.session_id
    }

    /// Lock the session for a run of statements.
    ///
    /// The lock is reentrant: the thread holding it may acquire the same
    /// worker again and lock the shared session from inside.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, PooledSession> {
        self.session
            .as_ref()
            .expect("session is present until the handle is dropped")
            .lock()
    }

    /// Cheap liveness check of the session.
    pub fn probe(&self) -> Result<()> {
        self.lock().probe()
    }

    /// Whether the session has been marked broken.
    pub fn is_broken(&self) -> bool {
        self.lock().is_broken()
    }

    /// Flag the session so it is closed rather than parked.
    pub fn mark_broken(&self) {
        self.lock().mark_broken();
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("worker", &self.worker)
            .field("session", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.shared.release(&self.worker, session);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
