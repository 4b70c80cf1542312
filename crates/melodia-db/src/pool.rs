//! # Connection Pool
//!
//! Multiplexes many concurrent callers onto a bounded set of backing-store
//! sessions.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Connection Pool                                    │
//! │                                                                         │
//! │  acquire()                                                              │
//! │     │  1. take a permit (≤ max_connections leases, waits ≤ timeout)     │
//! │     │  2. pop an idle session, or connect a new one                     │
//! │     ▼                                                                   │
//! │  ┌──────────────┐        ┌────────────────────────────────────────┐    │
//! │  │  idle queue  │ ─────► │ in-use map: id → slot(Option<Conn>)    │    │
//! │  │ (pool owns)  │        │ (one caller owns, pool can reclaim)    │    │
//! │  └──────▲───────┘        └──────────────────┬─────────────────────┘    │
//! │         │                                   │                           │
//! │         │  release(): restore auto-commit,  │                           │
//! │         │  clear warnings, liveness check   │                           │
//! │         └───────────────────────────────────┘                           │
//! │                     (or close it for good)                              │
//! │                                                                         │
//! │  idle ∪ in-use = every session created and not yet closed               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! No two callers can ever hold the same session: a session is either in
//! the idle queue or in exactly one slot, and moving it between the two
//! happens under one lock.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{MappedMutexGuard, Mutex as AsyncMutex, MutexGuard, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::DbConfig;
use crate::error::{DbError, DbResult};

// =============================================================================
// Options & Status
// =============================================================================

/// Sizing of a [`ConnectionPool`].
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum concurrent leases, and maximum idle sessions kept.
    pub max_connections: u32,
    /// Sessions opened when the pool is created.
    pub min_connections: u32,
    /// How long `acquire` waits for a lease at full capacity.
    pub acquire_timeout: Duration,
}

impl PoolOptions {
    pub fn new(max_connections: u32) -> Self {
        PoolOptions {
            max_connections,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(10),
        }
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

impl From<&DbConfig> for PoolOptions {
    fn from(config: &DbConfig) -> Self {
        PoolOptions {
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            acquire_timeout: config.acquire_timeout,
        }
    }
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub in_use: usize,
    pub max_connections: u32,
    pub closed: bool,
}

// =============================================================================
// Internals
// =============================================================================

/// Shared between a lease and the pool so shutdown can reclaim the session.
struct Slot<C> {
    conn: AsyncMutex<Option<C>>,
}

struct IdleConn<C> {
    id: u64,
    conn: C,
}

struct PoolState<C> {
    idle: VecDeque<IdleConn<C>>,
    in_use: HashMap<u64, Arc<Slot<C>>>,
}

struct PoolInner<B: Backend> {
    backend: B,
    options: PoolOptions,
    permits: Arc<Semaphore>,
    state: Mutex<PoolState<B::Conn>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl<B: Backend> PoolInner<B> {
    /// Stops tracking a lease. Returns false if shutdown already dropped it.
    fn untrack(&self, id: u64) -> bool {
        self.state.lock().in_use.remove(&id).is_some()
    }
}

// =============================================================================
// ConnectionPool
// =============================================================================

/// A bounded pool of backing-store sessions.
///
/// Cloning is cheap; every clone shares the same sessions. Construct one
/// pool at startup and hand clones to each consumer.
pub struct ConnectionPool<B: Backend> {
    inner: Arc<PoolInner<B>>,
}

impl<B: Backend> Clone for ConnectionPool<B> {
    fn clone(&self) -> Self {
        ConnectionPool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> fmt::Debug for ConnectionPool<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("status", &self.status())
            .finish()
    }
}

impl<B: Backend> ConnectionPool<B> {
    /// Creates a pool and opens `min_connections` sessions up front.
    ///
    /// ## Returns
    /// * `Err(DbError::ConnectionFailed)` - the store is unreachable
    pub async fn new(backend: B, options: PoolOptions) -> DbResult<Self> {
        if options.max_connections == 0 {
            return Err(DbError::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        let warm = options.min_connections.min(options.max_connections);
        let pool = ConnectionPool {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(options.max_connections as usize)),
                backend,
                options,
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    in_use: HashMap::new(),
                }),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        };

        for _ in 0..warm {
            let conn = pool.inner.backend.connect().await?;
            let id = pool.inner.next_id.fetch_add(1, Ordering::Relaxed);
            pool.inner.state.lock().idle.push_back(IdleConn { id, conn });
        }

        info!(
            max_connections = pool.inner.options.max_connections,
            warm, "Connection pool created"
        );

        Ok(pool)
    }

    /// The backend this pool opens sessions with.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    /// Leases a session.
    ///
    /// ## Behaviour
    /// - Reuses an idle session when one exists
    /// - Otherwise opens a new one (never more than `max_connections` leased)
    /// - At capacity, waits up to `acquire_timeout` for a release
    ///
    /// ## Returns
    /// * `Err(DbError::PoolExhausted)` - no lease freed up in time
    /// * `Err(DbError::ConnectionFailed)` - the store is unreachable
    /// * `Err(DbError::PoolClosed)` - `close_all` was called
    pub async fn acquire(&self) -> DbResult<PooledConnection<B>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DbError::PoolClosed);
        }

        let permit = tokio::time::timeout(
            self.inner.options.acquire_timeout,
            Arc::clone(&self.inner.permits).acquire_owned(),
        )
        .await
        .map_err(|_| {
            warn!(
                timeout = ?self.inner.options.acquire_timeout,
                "Timed out waiting for a pooled connection"
            );
            DbError::PoolExhausted
        })?
        .map_err(|_| DbError::PoolClosed)?;

        let reused = self.inner.state.lock().idle.pop_front();
        let (id, conn) = match reused {
            Some(idle) => (idle.id, idle.conn),
            None => {
                // The permit is dropped on error, freeing the capacity.
                let conn = self.inner.backend.connect().await?;
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                debug!(conn_id = id, "Opened new pooled connection");
                (id, conn)
            }
        };

        let slot = Arc::new(Slot {
            conn: AsyncMutex::new(Some(conn)),
        });

        {
            let mut state = self.inner.state.lock();
            if self.inner.closed.load(Ordering::Acquire) {
                drop(state);
                if let Some(conn) = slot.conn.lock().await.take() {
                    self.inner.backend.close(conn).await;
                }
                return Err(DbError::PoolClosed);
            }
            state.in_use.insert(id, Arc::clone(&slot));
        }

        Ok(PooledConnection {
            id,
            slot,
            invalid: false,
            released: false,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Returns a leased session to the pool.
    ///
    /// Restores auto-commit, clears warnings, then keeps the session idle if
    /// there is room and it passes a liveness check. Anything else closes it.
    /// Never fails: a broken session is discarded silently.
    pub async fn release(&self, mut lease: PooledConnection<B>) {
        lease.released = true;
        let id = lease.id;

        let tracked = self.inner.untrack(id);
        let conn = lease.slot.conn.lock().await.take();

        let Some(mut conn) = conn else {
            debug!(conn_id = id, "Released connection was already reclaimed");
            return;
        };

        let backend = &self.inner.backend;

        if !tracked || self.inner.closed.load(Ordering::Acquire) {
            backend.close(conn).await;
            return;
        }

        if lease.invalid {
            debug!(conn_id = id, "Discarding connection marked invalid");
            backend.close(conn).await;
            return;
        }

        if let Err(e) = backend.set_auto_commit(&mut conn, true).await {
            warn!(conn_id = id, error = %e, "Could not restore auto-commit, discarding");
            backend.close(conn).await;
            return;
        }
        backend.clear_warnings(&mut conn);

        let has_room =
            self.inner.state.lock().idle.len() < self.inner.options.max_connections as usize;

        if has_room && backend.is_valid(&mut conn).await {
            let mut state = self.inner.state.lock();
            if !self.inner.closed.load(Ordering::Acquire) {
                state.idle.push_back(IdleConn { id, conn });
                return;
            }
            drop(state);
        } else {
            debug!(conn_id = id, has_room, "Closing released connection");
        }

        backend.close(conn).await;
    }

    /// Runs `work` on a leased session, then releases it.
    ///
    /// A fatal error marks the session for discard instead of reuse.
    pub async fn with_connection<R, F>(&self, work: F) -> DbResult<R>
    where
        R: Send,
        F: for<'c> FnOnce(&'c mut B::Conn) -> BoxFuture<'c, DbResult<R>> + Send,
    {
        let mut lease = self.acquire().await?;

        let result = async {
            let mut conn = lease.session().await?;
            work(&mut conn).await
        }
        .await;

        if matches!(&result, Err(e) if e.is_fatal()) {
            lease.invalidate();
        }

        self.release(lease).await;
        result
    }

    /// Closes every tracked session, idle or leased, and shuts the pool down.
    ///
    /// Leases still held by callers report `ConnectionLost` on next use. A
    /// session that is mid-operation is closed when its lease is released.
    /// Idempotent.
    pub async fn close_all(&self) {
        let (idle, in_use) = {
            let mut state = self.inner.state.lock();
            self.inner.closed.store(true, Ordering::Release);
            let idle: Vec<_> = state.idle.drain(..).collect();
            let in_use: Vec<_> = state.in_use.drain().collect();
            (idle, in_use)
        };
        self.inner.permits.close();

        if idle.is_empty() && in_use.is_empty() {
            debug!("Connection pool already empty");
            return;
        }

        info!(
            idle = idle.len(),
            in_use = in_use.len(),
            "Closing all pooled connections"
        );

        for IdleConn { conn, .. } in idle {
            self.inner.backend.close(conn).await;
        }

        for (id, slot) in in_use {
            let taken = match slot.conn.try_lock() {
                Ok(mut guard) => guard.take(),
                Err(_) => {
                    debug!(conn_id = id, "Connection busy, will close on release");
                    None
                }
            };
            if let Some(conn) = taken {
                self.inner.backend.close(conn).await;
            }
        }
    }

    /// Returns current occupancy.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len(),
            in_use: state.in_use.len(),
            max_connections: self.inner.options.max_connections,
            closed: self.inner.closed.load(Ordering::Acquire),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

// =============================================================================
// PooledConnection
// =============================================================================

/// A leased session. Hand it back with [`ConnectionPool::release`].
///
/// Dropping a lease without releasing it stops tracking and drops the
/// session without the release checks.
pub struct PooledConnection<B: Backend> {
    id: u64,
    slot: Arc<Slot<B::Conn>>,
    invalid: bool,
    released: bool,
    pool: Arc<PoolInner<B>>,
    _permit: OwnedSemaphorePermit,
}

impl<B: Backend> PooledConnection<B> {
    /// Stable id of the underlying session (survives idle round-trips).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Locks the session for use.
    ///
    /// ## Returns
    /// * `Err(DbError::ConnectionLost)` - the pool was shut down underneath this lease
    pub async fn session(&self) -> DbResult<MappedMutexGuard<'_, B::Conn>> {
        let guard = self.slot.conn.lock().await;
        MutexGuard::try_map(guard, |conn| conn.as_mut()).map_err(|_| {
            DbError::ConnectionLost(format!("connection {} was closed by the pool", self.id))
        })
    }

    /// Marks the session unusable; release will close it instead of reusing it.
    pub fn invalidate(&mut self) {
        self.invalid = true;
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid
    }
}

impl<B: Backend> fmt::Debug for PooledConnection<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("invalid", &self.invalid)
            .finish()
    }
}

impl<B: Backend> Drop for PooledConnection<B> {
    fn drop(&mut self) {
        if !self.released && self.pool.untrack(self.id) {
            warn!(conn_id = self.id, "Pooled connection dropped without release");
        }
    }
}

// =============================================================================
// Test Backend
// =============================================================================


// =============================================================================
// Unit Tests
// =============================================================================
