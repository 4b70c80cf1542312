//! # Database Migrations
//!
//! Embedded SQL migrations for the library schema.
//!
//! ## How Migrations Work
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Migration Process                                  │
//! │                                                                         │
//! │  Library::open                                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Lease one pooled connection                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Compare embedded migrations vs _sqlx_migrations                        │
//! │       │                                                                 │
//! │       ├── 001_library_schema.sql ✓ (already applied)                    │
//! │       └── 002_...                ⬜ (NEW - needs to run)                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Run pending migrations in order, record each one                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Adding New Migrations
//!
//! 1. Create a new file in `migrations/sqlite/` with the next sequence number
//! 2. Name format: `NNN_description.sql`
//! 3. Write idempotent SQL (use `IF NOT EXISTS` where possible)
//! 4. **NEVER** modify existing migrations - always add new ones

use sqlx::SqliteConnection;
use tracing::info;

use crate::error::DbResult;

/// Embedded migrations from the `migrations/sqlite` directory.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations/sqlite");

/// Runs all pending database migrations on one connection.
///
/// ## Safety
/// - Idempotent: safe to run multiple times
/// - Ordered: migrations run in filename order (001, 002, ...)
/// - Must run in auto-commit mode; each migration opens its own transaction
pub async fn run_migrations(conn: &mut SqliteConnection) -> DbResult<()> {
    info!("Checking for pending migrations");

    MIGRATOR.run_direct(conn).await?;

    info!("All migrations applied successfully");
    Ok(())
}

/// Returns information about migrations.
///
/// ## Returns
/// Tuple of (total_migrations, applied_migrations). A database that never
/// ran a migration has no tracking table and reports zero applied; any
/// other failure propagates.
pub async fn migration_status(conn: &mut SqliteConnection) -> DbResult<(usize, usize)> {
    let total = MIGRATOR.migrations.len();

    let tracked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE name = '_sqlx_migrations'",
    )
    .fetch_one(&mut *conn)
    .await?;
    if tracked == 0 {
        return Ok((total, 0));
    }

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(&mut *conn)
        .await?;

    Ok((total, usize::try_from(applied).unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, SqliteBackend};
    use crate::config::DbConfig;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let backend = SqliteBackend::new(&DbConfig::in_memory()).unwrap();
        let mut session = backend.connect().await.unwrap();

        assert_eq!(migration_status(session.connection()).await.unwrap().1, 0);

        run_migrations(session.connection()).await.unwrap();
        run_migrations(session.connection()).await.unwrap();

        let (total, applied) = migration_status(session.connection()).await.unwrap();
        assert_eq!(total, applied);
        assert!(total >= 1);
    }

    #[tokio::test]
    async fn test_unreadable_tracking_table_is_an_error() {
        let backend = SqliteBackend::new(&DbConfig::in_memory()).unwrap();
        let mut session = backend.connect().await.unwrap();

        // A tracking "table" that fails on every read.
        sqlx::query(
            "CREATE VIEW _sqlx_migrations AS SELECT 1 AS version \
             WHERE abs(-9223372036854775807 - 1) > 0",
        )
        .execute(session.connection())
        .await
        .unwrap();

        let err = migration_status(session.connection()).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::TransientStoreError);
    }
}
