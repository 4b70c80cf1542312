//! # melodia-db: Backing Store Layer for Melodia
//!
//! Persistence for the music library: a bounded connection pool, scoped
//! transactions, write-through entity caches and the two maintenance passes
//! (duplicate merging and dangling reference repair). SQLite via sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Melodia Data Flow                                │
//! │                                                                         │
//! │  Console menu / import tool                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    melodia-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐   ┌───────────────┐   ┌───────────────┐    │   │
//! │  │   │    Library    │   │  EntityCache  │   │  Maintenance  │    │   │
//! │  │   │ (library.rs)  │──►│  (cache.rs)   │   │ dedup.rs      │    │   │
//! │  │   └───────────────┘   └───────┬───────┘   │ repair.rs     │    │   │
//! │  │                               │           └───────┬───────┘    │   │
//! │  │                       ┌───────▼───────┐           │            │   │
//! │  │                       │ Repositories  │◄──────────┘            │   │
//! │  │                       │ (Store impls) │                        │   │
//! │  │                       └───────┬───────┘                        │   │
//! │  │   ┌───────────────┐   ┌───────▼───────┐   ┌───────────────┐    │   │
//! │  │   │ Transaction   │──►│ConnectionPool │──►│   Backend     │    │   │
//! │  │   │ Runner        │   │  (pool.rs)    │   │ (backend.rs)  │    │   │
//! │  │   └───────────────┘   └───────────────┘   └───────────────┘    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   artists, albums, songs, playlists, playlist_songs             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`backend`] - Session-level store operations and the SQLite backend
//! - [`pool`] - Bounded connection pool with lease tracking
//! - [`transaction`] - Scoped commit/rollback on one leased connection
//! - [`store`] - The per-entity CRUD capability
//! - [`repository`] - SQLite `Store` implementations
//! - [`cache`] - Write-through, lazily loaded entity caches
//! - [`dedup`] - Merging duplicate rows at load time
//! - [`repair`] - Dangling reference repair
//! - [`library`] - The handle that wires all of the above
//! - [`config`] - Configuration loading
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use melodia_db::{DbConfig, Library};
//!
//! let library = Library::open(DbConfig::new("path/to/library.db")).await?;
//!
//! library.deduplicate().await?;
//! library.repair().await?;
//!
//! let artists = library.all_artists().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod backend;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod error;
pub mod library;
pub mod migrations;
pub mod pool;
pub mod repair;
pub mod repository;
pub mod store;
pub mod transaction;

// =============================================================================
// Re-exports
// =============================================================================

pub use backend::{Backend, SqliteBackend, SqliteSession};
pub use cache::EntityCache;
pub use config::DbConfig;
pub use dedup::{DedupReport, DeduplicatingLoader, MergeStore};
pub use error::{DbError, DbResult, ErrorKind};
pub use library::{Library, LibraryDedupReport};
pub use pool::{ConnectionPool, PoolOptions, PoolStatus, PooledConnection};
pub use repair::{IntegrityRepairer, RepairPhase, RepairReport};
pub use store::Store;
pub use transaction::{Decision, TransactionRunner};

// Repository re-exports for convenience
pub use repository::album::AlbumRepository;
pub use repository::artist::ArtistRepository;
pub use repository::playlist::PlaylistRepository;
pub use repository::song::SongRepository;

/// The pool every repository in this crate runs on.
pub type LibraryPool = ConnectionPool<SqliteBackend>;
