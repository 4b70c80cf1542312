//! # Database Error Types
//!
//! Error types for pool, transaction, store and cache operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)      ValidationError (melodia-core)        │
//! │       │                                 │                               │
//! │       ▼                                 ▼                               │
//! │  DbError (this module) ← Adds context and categorization               │
//! │       │                                                                 │
//! │       ├── kind() → ErrorKind  (what the caller may do next)            │
//! │       └── is_fatal()          (pool discards the connection)           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  External UI layer turns it into a user-facing message                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use melodia_core::{CoreError, ValidationError};
use thiserror::Error;

/// Coarse classification of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The pool could not hand out a connection.
    ResourceExhausted,
    /// The store rejected a write.
    ConstraintViolation,
    /// The id has no row.
    NotFound,
    /// Input rejected before any store call.
    InvalidArgument,
    /// The operation failed but the connection is still usable.
    TransientStoreError,
    /// The connection is unusable and must be discarded.
    FatalStoreError,
}

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique / primary key constraint violation.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    ///
    /// ## When This Occurs
    /// - Inserting an album for an artist id that does not exist
    /// - Deleting an artist that still owns albums
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// NOT NULL or CHECK constraint violation.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Caller input rejected before the store was touched.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A new connection could not be opened.
    ///
    /// ## When This Occurs
    /// - Database file can't be created or opened
    /// - File permissions issue
    /// - Connect attempt exceeded `connect_timeout`
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Every lease is taken and none was released within `acquire_timeout`.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// The pool has been shut down.
    #[error("Connection pool is closed")]
    PoolClosed,

    /// The connection broke mid-operation or was reclaimed by shutdown.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed; the connection is still usable.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction control statement failed.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Stored data violates a domain rule discovered while reading.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates a UniqueViolation error.
    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Classifies this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::NotFound { .. } => ErrorKind::NotFound,
            DbError::UniqueViolation { .. }
            | DbError::ForeignKeyViolation { .. }
            | DbError::ConstraintViolation(_)
            | DbError::Domain(_) => ErrorKind::ConstraintViolation,
            DbError::InvalidArgument(_) | DbError::Config(_) => ErrorKind::InvalidArgument,
            DbError::ConnectionFailed(_) | DbError::PoolExhausted => ErrorKind::ResourceExhausted,
            DbError::PoolClosed | DbError::ConnectionLost(_) => ErrorKind::FatalStoreError,
            DbError::MigrationFailed(_)
            | DbError::QueryFailed(_)
            | DbError::TransactionFailed(_)
            | DbError::Internal(_) => ErrorKind::TransientStoreError,
        }
    }

    /// Returns true if the connection that produced this error must be discarded.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::FatalStoreError
    }

    /// Returns true if the operation failed but the connection can be reused.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientStoreError
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound         → DbError::NotFound
/// sqlx::Error::Database            → by constraint kind, else QueryFailed
/// sqlx::Error::Io / Tls / Protocol → DbError::ConnectionLost
/// sqlx::Error::WorkerCrashed       → DbError::ConnectionLost
/// sqlx::Error::PoolTimedOut        → DbError::PoolExhausted
/// Other                            → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message().to_string();
                match db_err.kind() {
                    sqlx::error::ErrorKind::UniqueViolation => {
                        // "UNIQUE constraint failed: <table>.<column>"
                        let field = msg
                            .split("constraint failed: ")
                            .nth(1)
                            .unwrap_or("unknown")
                            .to_string();
                        DbError::UniqueViolation {
                            field,
                            value: "unknown".to_string(),
                        }
                    }
                    sqlx::error::ErrorKind::ForeignKeyViolation => {
                        DbError::ForeignKeyViolation { message: msg }
                    }
                    sqlx::error::ErrorKind::NotNullViolation
                    | sqlx::error::ErrorKind::CheckViolation => DbError::ConstraintViolation(msg),
                    _ => DbError::QueryFailed(msg),
                }
            }

            sqlx::Error::Io(e) => DbError::ConnectionLost(e.to_string()),
            sqlx::Error::Tls(e) => DbError::ConnectionLost(e.to_string()),
            sqlx::Error::Protocol(msg) => DbError::ConnectionLost(msg),
            sqlx::Error::WorkerCrashed => {
                DbError::ConnectionLost("SQLite worker thread crashed".to_string())
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::PoolClosed,

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<ValidationError> for DbError {
    fn from(err: ValidationError) -> Self {
        DbError::InvalidArgument(err.to_string())
    }
}

impl From<toml::de::Error> for DbError {
    fn from(err: toml::de::Error) -> Self {
        DbError::Config(err.to_string())
    }
}

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        DbError::Config(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(DbError::PoolExhausted.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(
            DbError::ConnectionFailed("unreachable".into()).kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            DbError::duplicate("artists.id", "a1").kind(),
            ErrorKind::ConstraintViolation
        );
        assert_eq!(DbError::not_found("Song", "s1").kind(), ErrorKind::NotFound);
        assert_eq!(
            DbError::QueryFailed("database is locked".into()).kind(),
            ErrorKind::TransientStoreError
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(DbError::ConnectionLost("broken pipe".into()).is_fatal());
        assert!(DbError::PoolClosed.is_fatal());
        assert!(!DbError::QueryFailed("syntax".into()).is_fatal());
        assert!(DbError::QueryFailed("syntax".into()).is_transient());
    }

    #[test]
    fn test_validation_becomes_invalid_argument() {
        let err: DbError = ValidationError::Required {
            field: "id".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.to_string(), "Invalid argument: id is required");
    }

    #[test]
    fn test_sqlx_mapping() {
        assert!(matches!(
            DbError::from(sqlx::Error::PoolTimedOut),
            DbError::PoolExhausted
        ));
        assert!(DbError::from(sqlx::Error::WorkerCrashed).is_fatal());
        assert_eq!(
            DbError::from(sqlx::Error::RowNotFound).kind(),
            ErrorKind::NotFound
        );
    }
}
