//! # Album Repository
//!
//! Database operations for albums.
//!
//! ## Relationships
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  artists ◄── albums.artist_id        albums ◄── songs.album_id          │
//! │                                                                         │
//! │  reassign_artist(album, artist)      reassign_songs(old, new)           │
//! │  find_dangling_artist_refs()         delete → songs detached first      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use sqlx::{FromRow, SqliteConnection};
use tracing::debug;

use crate::backend::SqliteBackend;
use crate::error::DbResult;
use crate::repository::group_children;
use crate::store::Store;
use crate::transaction::{Decision, TransactionRunner};
use crate::LibraryPool;
use melodia_core::Album;

#[derive(Debug, FromRow)]
struct AlbumRow {
    id: String,
    title: String,
    artist_id: Option<String>,
    year: Option<i32>,
    genre: Option<String>,
}

impl AlbumRow {
    fn into_album(self, song_ids: Vec<String>) -> Album {
        Album {
            id: self.id,
            title: self.title,
            artist_id: self.artist_id,
            year: self.year,
            genre: self.genre,
            song_ids,
        }
    }
}

/// Repository for album database operations.
#[derive(Debug, Clone)]
pub struct AlbumRepository {
    pool: LibraryPool,
    runner: TransactionRunner<SqliteBackend>,
}

impl AlbumRepository {
    /// Creates a new AlbumRepository.
    pub fn new(pool: LibraryPool) -> Self {
        AlbumRepository {
            runner: TransactionRunner::new(pool.clone()),
            pool,
        }
    }

    /// Gets an album by id on a held connection, with its song ids.
    pub async fn select_on(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Album>> {
        let row: Option<AlbumRow> = sqlx::query_as(
            "SELECT id, title, artist_id, year, genre FROM albums WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let song_ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM songs WHERE album_id = ?1 ORDER BY id")
                .bind(id)
                .fetch_all(&mut *conn)
                .await?;

        Ok(Some(row.into_album(song_ids)))
    }

    /// Points every song on album `old_id` at album `new_id`.
    ///
    /// ## Returns
    /// Number of songs moved. Zero on a second run.
    pub async fn reassign_songs(
        conn: &mut SqliteConnection,
        old_id: &str,
        new_id: &str,
    ) -> DbResult<u64> {
        if old_id == new_id {
            return Ok(0);
        }

        let moved = sqlx::query("UPDATE songs SET album_id = ?2 WHERE album_id = ?1")
            .bind(old_id)
            .bind(new_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        debug!(old_id, new_id, moved, "Reassigned album songs");
        Ok(moved)
    }

    /// Ids of albums whose artist reference resolves to no artist row.
    pub async fn find_dangling_artist_refs(conn: &mut SqliteConnection) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT al.id
            FROM albums al
            LEFT JOIN artists ar ON ar.id = al.artist_id
            WHERE al.artist_id IS NOT NULL AND ar.id IS NULL
            ORDER BY al.id
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(ids)
    }

    /// Sets one album's artist.
    pub async fn reassign_artist(
        conn: &mut SqliteConnection,
        album_id: &str,
        artist_id: &str,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE albums SET artist_id = ?2 WHERE id = ?1 AND artist_id IS NOT ?2",
        )
        .bind(album_id)
        .bind(artist_id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes an album row on a held connection. Songs must be detached first.
    pub async fn delete_on(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM albums WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl Store<Album> for AlbumRepository {
    async fn insert(&self, album: &Album) -> DbResult<bool> {
        debug!(id = %album.id, title = %album.title, "Inserting album");

        let album = album.clone();
        self.pool
            .with_connection(move |session| {
                Box::pin(async move {
                    let result = sqlx::query(
                        r#"
                        INSERT INTO albums (id, title, artist_id, year, genre)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        "#,
                    )
                    .bind(&album.id)
                    .bind(&album.title)
                    .bind(&album.artist_id)
                    .bind(album.year)
                    .bind(&album.genre)
                    .execute(session.connection())
                    .await?;

                    Ok(result.rows_affected() == 1)
                })
            })
            .await
    }

    async fn select_by_id(&self, id: &str) -> DbResult<Option<Album>> {
        let id = id.to_string();
        self.pool
            .with_connection(move |session| {
                Box::pin(async move { Self::select_on(session.connection(), &id).await })
            })
            .await
    }

    async fn select_all(&self) -> DbResult<Vec<Album>> {
        self.pool
            .with_connection(|session| {
                Box::pin(async move {
                    let conn = session.connection();

                    let rows: Vec<AlbumRow> = sqlx::query_as(
                        "SELECT id, title, artist_id, year, genre FROM albums ORDER BY id",
                    )
                    .fetch_all(&mut *conn)
                    .await?;

                    let pairs: Vec<(String, String)> = sqlx::query_as(
                        "SELECT album_id, id FROM songs WHERE album_id IS NOT NULL ORDER BY id",
                    )
                    .fetch_all(&mut *conn)
                    .await?;
                    let mut songs = group_children(pairs);

                    Ok(rows
                        .into_iter()
                        .map(|row| {
                            let song_ids = songs.remove(&row.id).unwrap_or_default();
                            row.into_album(song_ids)
                        })
                        .collect())
                })
            })
            .await
    }

    async fn update(&self, album: &Album) -> DbResult<bool> {
        let album = album.clone();
        self.pool
            .with_connection(move |session| {
                Box::pin(async move {
                    let result = sqlx::query(
                        r#"
                        UPDATE albums
                        SET title = ?2, artist_id = ?3, year = ?4, genre = ?5
                        WHERE id = ?1
                        "#,
                    )
                    .bind(&album.id)
                    .bind(&album.title)
                    .bind(&album.artist_id)
                    .bind(album.year)
                    .bind(&album.genre)
                    .execute(session.connection())
                    .await?;

                    Ok(result.rows_affected() > 0)
                })
            })
            .await
    }

    /// Deletes an album, detaching its songs in the same transaction.
    async fn delete(&self, id: &str) -> DbResult<bool> {
        debug!(id = %id, "Deleting album");

        let id = id.to_string();
        let decision = self
            .runner
            .run(move |session| {
                Box::pin(async move {
                    let conn = session.connection();

                    sqlx::query("UPDATE songs SET album_id = NULL WHERE album_id = ?1")
                        .bind(&id)
                        .execute(&mut *conn)
                        .await?;

                    if Self::delete_on(conn, &id).await? {
                        Ok(Decision::Commit(true))
                    } else {
                        Ok(Decision::Rollback(false))
                    }
                })
            })
            .await?;

        Ok(decision.into_inner())
    }
}
