//! # Repository Module
//!
//! SQLite implementations of the [`Store`](crate::store::Store) capability,
//! one per entity type.
//!
//! ## Two Kinds of Operations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Operations                                │
//! │                                                                         │
//! │  Store operations (&self)             Named operations (conn)           │
//! │  ────────────────────────             ─────────────────────────         │
//! │  lease a pooled connection            run on a connection the caller    │
//! │  per call, release after              already holds, usually inside     │
//! │                                       one TransactionRunner pass        │
//! │                                                                         │
//! │  insert / select_by_id /              reassign_children                 │
//! │  select_all / update / delete         detach_album_reference            │
//! │                                       delete_dangling_playlist_links    │
//! │  EntityCache ───► Store               Dedup / Repair ───► named ops     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every named operation is idempotent: running it twice in a row changes
//! nothing the second time.
//!
//! ## Available Repositories
//!
//! - [`ArtistRepository`](artist::ArtistRepository) - Artists and child reassignment
//! - [`AlbumRepository`](album::AlbumRepository) - Albums and their songs
//! - [`SongRepository`](song::SongRepository) - Songs and their references
//! - [`PlaylistRepository`](playlist::PlaylistRepository) - Playlists and link rows

use std::collections::HashMap;

pub mod album;
pub mod artist;
pub mod playlist;
pub mod song;

/// Groups `(parent_id, child_id)` pairs by parent, keeping input order.
pub(crate) fn group_children(pairs: Vec<(String, String)>) -> HashMap<String, Vec<String>> {
    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for (parent, child) in pairs {
        grouped.entry(parent).or_default().push(child);
    }
    grouped
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::backend::SqliteBackend;
    use crate::config::DbConfig;
    use crate::migrations::run_migrations;
    use crate::pool::{ConnectionPool, PoolOptions};
    use crate::LibraryPool;

    /// A migrated in-memory database behind a single-connection pool.
    pub async fn pool() -> LibraryPool {
        let config = DbConfig::in_memory();
        let backend = SqliteBackend::new(&config).unwrap();
        let pool = ConnectionPool::new(backend, PoolOptions::from(&config))
            .await
            .unwrap();

        pool.with_connection(|session| Box::pin(run_migrations(session.connection())))
            .await
            .unwrap();

        pool
    }

    /// Runs raw SQL with foreign keys off, for planting orphans.
    pub async fn exec_unchecked(pool: &LibraryPool, sql: &'static str) {
        pool.with_connection(|session| {
            Box::pin(async move {
                let conn = session.connection();
                sqlx::query("PRAGMA foreign_keys = OFF").execute(&mut *conn).await?;
                sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(sql)).await?;
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                Ok(())
            })
        })
        .await
        .unwrap();
    }
}
