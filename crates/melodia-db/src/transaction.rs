//! # Transaction Runner
//!
//! Runs one unit of work under an explicit commit/rollback contract.
//!
//! ## Contract
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      run_in_transaction(work)                           │
//! │                                                                         │
//! │  acquire ─► remember auto-commit ─► auto-commit OFF ─► work(conn)       │
//! │                                                           │             │
//! │                 ┌──────────────────┬──────────────────────┤             │
//! │                 ▼                  ▼                      ▼             │
//! │            Ok(true)           Ok(false)                 Err(e)          │
//! │             COMMIT            ROLLBACK             ROLLBACK, keep e     │
//! │                 │                  │                      │             │
//! │                 └──────────────────┴──────────────────────┘             │
//! │                                    ▼                                    │
//! │              restore auto-commit ─► release (exactly once)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Single level only: running work inside work is not supported.

use futures::future::BoxFuture;
use std::fmt;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::DbResult;
use crate::pool::{ConnectionPool, PooledConnection};

/// What a unit of work asks the runner to do with its writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision<R> {
    Commit(R),
    Rollback(R),
}

impl<R> Decision<R> {
    pub fn is_commit(&self) -> bool {
        matches!(self, Decision::Commit(_))
    }

    /// The value produced by the work, whichever way it went.
    pub fn into_inner(self) -> R {
        match self {
            Decision::Commit(value) | Decision::Rollback(value) => value,
        }
    }
}

/// Runs work on pooled connections inside a transaction.
pub struct TransactionRunner<B: Backend> {
    pool: ConnectionPool<B>,
}

impl<B: Backend> Clone for TransactionRunner<B> {
    fn clone(&self) -> Self {
        TransactionRunner {
            pool: self.pool.clone(),
        }
    }
}

impl<B: Backend> fmt::Debug for TransactionRunner<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionRunner")
            .field("pool", &self.pool)
            .finish()
    }
}

impl<B: Backend> TransactionRunner<B> {
    pub fn new(pool: ConnectionPool<B>) -> Self {
        TransactionRunner { pool }
    }

    pub fn pool(&self) -> &ConnectionPool<B> {
        &self.pool
    }

    /// Runs `work` in a transaction on a freshly leased connection.
    ///
    /// ## Returns
    /// The decision that was applied, or the error that forced a rollback.
    /// A commit that fails is rolled back and its error returned.
    pub async fn run<R, F>(&self, work: F) -> DbResult<Decision<R>>
    where
        R: Send,
        F: for<'c> FnOnce(&'c mut B::Conn) -> BoxFuture<'c, DbResult<Decision<R>>> + Send,
    {
        let mut lease = self.pool.acquire().await?;
        let result = self.run_on_connection(&mut lease, work).await;
        self.pool.release(lease).await;
        result
    }

    /// Boolean form of [`run`](Self::run): `true` commits, `false` rolls back.
    ///
    /// ## Returns
    /// `Ok(true)` if the work's writes were committed.
    pub async fn run_in_transaction<F>(&self, work: F) -> DbResult<bool>
    where
        F: for<'c> FnOnce(&'c mut B::Conn) -> BoxFuture<'c, DbResult<bool>> + Send,
    {
        let decision = self
            .run(move |conn| {
                let work = work(conn);
                Box::pin(async move {
                    let commit = work.await?;
                    Ok(if commit {
                        Decision::Commit(())
                    } else {
                        Decision::Rollback(())
                    })
                })
            })
            .await?;

        Ok(decision.is_commit())
    }

    /// Same contract as [`run`](Self::run) on a connection the caller
    /// already holds. The caller remains responsible for releasing it.
    ///
    /// A fatal error marks the lease invalid so release discards it.
    pub async fn run_on_connection<R, F>(
        &self,
        lease: &mut PooledConnection<B>,
        work: F,
    ) -> DbResult<Decision<R>>
    where
        R: Send,
        F: for<'c> FnOnce(&'c mut B::Conn) -> BoxFuture<'c, DbResult<Decision<R>>> + Send,
    {
        let conn_id = lease.id();
        let result = async {
            let mut conn = lease.session().await?;
            self.transact(&mut conn, work).await
        }
        .await;

        match &result {
            Ok(Decision::Commit(_)) => debug!(conn_id, "Transaction committed"),
            Ok(Decision::Rollback(_)) => debug!(conn_id, "Transaction rolled back"),
            Err(e) if e.is_fatal() => {
                warn!(conn_id, error = %e, "Transaction failed on a broken connection");
                lease.invalidate();
            }
            Err(e) => debug!(conn_id, error = %e, "Transaction failed and was rolled back"),
        }

        result
    }

    async fn transact<R, F>(&self, conn: &mut B::Conn, work: F) -> DbResult<Decision<R>>
    where
        R: Send,
        F: for<'c> FnOnce(&'c mut B::Conn) -> BoxFuture<'c, DbResult<Decision<R>>> + Send,
    {
        let backend = self.pool.backend();
        let prior = backend.auto_commit(conn);
        backend.set_auto_commit(conn, false).await?;

        let outcome = work(&mut *conn).await;

        let result = match outcome {
            Ok(Decision::Commit(value)) => match backend.commit(conn).await {
                Ok(()) => Ok(Decision::Commit(value)),
                Err(e) => {
                    warn!(error = %e, "Commit failed, rolling back");
                    if let Err(rb) = backend.rollback(conn).await {
                        warn!(error = %rb, "Rollback after failed commit also failed");
                    }
                    Err(e)
                }
            },
            Ok(Decision::Rollback(value)) => backend
                .rollback(conn)
                .await
                .map(|()| Decision::Rollback(value)),
            Err(e) => {
                if let Err(rb) = backend.rollback(conn).await {
                    warn!(error = %rb, "Rollback failed");
                }
                Err(e)
            }
        };

        if let Err(e) = backend.set_auto_commit(conn, prior).await {
            warn!(error = %e, "Could not restore auto-commit mode");
            // The first error wins; release retries the restore anyway.
            return result.and(Err(e));
        }

        result
    }
}
