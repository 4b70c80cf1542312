//! # Backing Store Connections
//!
//! The connection-level collaborator the pool and the transaction runner
//! are written against, and its SQLite implementation.
//!
//! ## Auto-commit on SQLite
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SQLite has no auto-commit switch; a session emulates one:              │
//! │                                                                         │
//! │  set_auto_commit(false)  ──►  BEGIN                                     │
//! │  commit()                ──►  COMMIT; BEGIN   (still manual)            │
//! │  rollback()              ──►  ROLLBACK; BEGIN                           │
//! │  set_auto_commit(true)   ──►  COMMIT          (closes the open BEGIN)   │
//! │                                                                         │
//! │  A deferred BEGIN takes no lock until the first statement runs.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `PRAGMA foreign_keys` is ignored inside a transaction, so constraint
//! checks must be toggled while the session is in auto-commit mode.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{ConnectOptions, Connection, SqliteConnection};
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::DbConfig;
use crate::error::{DbError, DbResult};

/// Connection-level operations of a backing store.
///
/// The pool only ever talks to a store through this trait, so it can be
/// exercised without a database.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// One open session with the store.
    type Conn: Send + 'static;

    /// Opens a new session.
    async fn connect(&self) -> DbResult<Self::Conn>;

    /// Cheap liveness check.
    async fn is_valid(&self, conn: &mut Self::Conn) -> bool;

    /// Current auto-commit mode.
    fn auto_commit(&self, conn: &Self::Conn) -> bool;

    async fn set_auto_commit(&self, conn: &mut Self::Conn, enabled: bool) -> DbResult<()>;

    async fn commit(&self, conn: &mut Self::Conn) -> DbResult<()>;

    async fn rollback(&self, conn: &mut Self::Conn) -> DbResult<()>;

    /// Enables or disables foreign key enforcement for this session.
    async fn set_constraint_checks(&self, conn: &mut Self::Conn, enabled: bool) -> DbResult<()>;

    /// Drops warnings accumulated on the session. Returns how many were dropped.
    fn clear_warnings(&self, conn: &mut Self::Conn) -> usize;

    /// Closes the session. Errors are logged, never returned.
    async fn close(&self, conn: Self::Conn);
}

// =============================================================================
// SQLite
// =============================================================================

/// An open SQLite session plus the auto-commit state emulated on top of it.
#[derive(Debug)]
pub struct SqliteSession {
    conn: SqliteConnection,
    auto_commit: bool,
    warnings: Vec<String>,
}

impl SqliteSession {
    /// The underlying driver connection, for running statements.
    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    /// Records a non-fatal problem observed on this session.
    pub fn push_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Warnings recorded since the last release.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    async fn execute(&mut self, sql: &str) -> DbResult<()> {
        sqlx::query(sql).execute(&mut self.conn).await?;
        Ok(())
    }
}

impl Deref for SqliteSession {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for SqliteSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

/// Opens SQLite sessions for one database file.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    options: SqliteConnectOptions,
    connect_timeout: Duration,
}

impl SqliteBackend {
    /// Builds connect options from the configuration.
    ///
    /// ## Session Settings
    /// - WAL journal: readers don't block the single writer
    /// - NORMAL synchronous: durable enough, may lose the last commit on power loss
    /// - Foreign keys ON (repair turns them off for its own session only)
    /// - Busy timeout fixed at creation; there is no per-call override
    pub fn new(config: &DbConfig) -> DbResult<Self> {
        let url = if config.is_in_memory() {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", config.database_path.display())
        };

        let mut options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| DbError::Config(e.to_string()))?
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        if !config.is_in_memory() {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        Ok(SqliteBackend {
            options,
            connect_timeout: config.connect_timeout,
        })
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    type Conn = SqliteSession;

    async fn connect(&self) -> DbResult<SqliteSession> {
        let conn = tokio::time::timeout(self.connect_timeout, self.options.connect())
            .await
            .map_err(|_| {
                DbError::ConnectionFailed(format!(
                    "timed out after {:?} opening database",
                    self.connect_timeout
                ))
            })?
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        debug!("Opened SQLite session");

        Ok(SqliteSession {
            conn,
            auto_commit: true,
            warnings: Vec::new(),
        })
    }

    async fn is_valid(&self, conn: &mut SqliteSession) -> bool {
        conn.conn.ping().await.is_ok()
    }

    fn auto_commit(&self, conn: &SqliteSession) -> bool {
        conn.auto_commit
    }

    async fn set_auto_commit(&self, conn: &mut SqliteSession, enabled: bool) -> DbResult<()> {
        if conn.auto_commit == enabled {
            return Ok(());
        }

        let sql = if enabled { "COMMIT" } else { "BEGIN" };
        conn.execute(sql)
            .await
            .map_err(|e| transaction_error(sql, e))?;
        conn.auto_commit = enabled;
        Ok(())
    }

    async fn commit(&self, conn: &mut SqliteSession) -> DbResult<()> {
        if conn.auto_commit {
            debug!("Commit requested in auto-commit mode, nothing to do");
            return Ok(());
        }

        conn.execute("COMMIT")
            .await
            .map_err(|e| transaction_error("COMMIT", e))?;
        reopen(conn).await
    }

    async fn rollback(&self, conn: &mut SqliteSession) -> DbResult<()> {
        if conn.auto_commit {
            debug!("Rollback requested in auto-commit mode, nothing to do");
            return Ok(());
        }

        conn.execute("ROLLBACK")
            .await
            .map_err(|e| transaction_error("ROLLBACK", e))?;
        reopen(conn).await
    }

    async fn set_constraint_checks(&self, conn: &mut SqliteSession, enabled: bool) -> DbResult<()> {
        if !conn.auto_commit {
            // SQLite silently ignores the pragma here.
            return Err(DbError::TransactionFailed(
                "constraint checks can only be toggled outside a transaction".into(),
            ));
        }

        let sql = if enabled {
            "PRAGMA foreign_keys = ON"
        } else {
            "PRAGMA foreign_keys = OFF"
        };
        conn.execute(sql).await
    }

    fn clear_warnings(&self, conn: &mut SqliteSession) -> usize {
        let count = conn.warnings.len();
        if count > 0 {
            debug!(count, warnings = ?conn.warnings, "Clearing session warnings");
        }
        conn.warnings.clear();
        count
    }

    async fn close(&self, conn: SqliteSession) {
        if let Err(e) = conn.conn.close().await {
            warn!(error = %e, "Error while closing SQLite session");
        }
    }
}

/// Starts the next deferred transaction after COMMIT/ROLLBACK in manual mode.
async fn reopen(conn: &mut SqliteSession) -> DbResult<()> {
    if let Err(e) = conn.execute("BEGIN").await {
        // The session is now in auto-commit mode whatever the flag says.
        conn.auto_commit = true;
        conn.push_warning(format!("could not reopen transaction: {e}"));
        return Err(transaction_error("BEGIN", e));
    }
    Ok(())
}

fn transaction_error(statement: &str, err: DbError) -> DbError {
    if err.is_fatal() {
        err
    } else {
        DbError::TransactionFailed(format!("{statement}: {err}"))
    }
}
