//! # Artist Repository
//!
//! Database operations for artists.
//!
//! ## Key Operations
//! - CRUD through the [`Store`] capability
//! - Moving every album and song from one artist to another (duplicate merge)
//! - Looking up the "Unknown Artist" placeholder used by integrity repair

use async_trait::async_trait;
use sqlx::{FromRow, SqliteConnection};
use tracing::debug;

use crate::error::DbResult;
use crate::repository::group_children;
use crate::store::Store;
use crate::LibraryPool;
use melodia_core::{Artist, SENTINEL_ARTIST_ID, SENTINEL_ARTIST_NAME};

#[derive(Debug, FromRow)]
struct ArtistRow {
    id: String,
    name: String,
    biography: Option<String>,
}

impl ArtistRow {
    fn into_artist(self, album_ids: Vec<String>) -> Artist {
        Artist {
            id: self.id,
            name: self.name,
            biography: self.biography,
            album_ids,
        }
    }
}

/// Repository for artist database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = ArtistRepository::new(pool);
///
/// repo.insert(&Artist::new("Radiohead")).await?;
/// let all = repo.select_all().await?;
/// ```
#[derive(Debug, Clone)]
pub struct ArtistRepository {
    pool: LibraryPool,
}

impl ArtistRepository {
    /// Creates a new ArtistRepository.
    pub fn new(pool: LibraryPool) -> Self {
        ArtistRepository { pool }
    }

    /// Inserts an artist on a held connection.
    pub async fn insert_on(conn: &mut SqliteConnection, artist: &Artist) -> DbResult<bool> {
        let result = sqlx::query("INSERT INTO artists (id, name, biography) VALUES (?1, ?2, ?3)")
            .bind(&artist.id)
            .bind(&artist.name)
            .bind(&artist.biography)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Gets an artist by id on a held connection, with its album ids.
    pub async fn select_on(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Artist>> {
        let row: Option<ArtistRow> =
            sqlx::query_as("SELECT id, name, biography FROM artists WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let album_ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM albums WHERE artist_id = ?1 ORDER BY id")
                .bind(id)
                .fetch_all(&mut *conn)
                .await?;

        Ok(Some(row.into_artist(album_ids)))
    }

    /// Finds the first artist (by id) whose name matches exactly.
    pub async fn find_by_name(conn: &mut SqliteConnection, name: &str) -> DbResult<Option<Artist>> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT id FROM artists WHERE name = ?1 ORDER BY id LIMIT 1")
                .bind(name)
                .fetch_optional(&mut *conn)
                .await?;

        match id {
            Some(id) => Self::select_on(conn, &id).await,
            None => Ok(None),
        }
    }

    /// Finds the placeholder artist.
    ///
    /// ## Lookup Order
    /// 1. The reserved sentinel id
    /// 2. An artist named exactly "Unknown Artist" (databases from before
    ///    the id was reserved)
    pub async fn find_sentinel(conn: &mut SqliteConnection) -> DbResult<Option<Artist>> {
        if let Some(artist) = Self::select_on(conn, SENTINEL_ARTIST_ID).await? {
            return Ok(Some(artist));
        }
        Self::find_by_name(conn, SENTINEL_ARTIST_NAME).await
    }

    /// Points every album and song owned by `old_id` at `new_id`.
    ///
    /// ## Returns
    /// Number of album and song rows changed. Zero on a second run.
    pub async fn reassign_children(
        conn: &mut SqliteConnection,
        old_id: &str,
        new_id: &str,
    ) -> DbResult<u64> {
        if old_id == new_id {
            return Ok(0);
        }

        let albums = sqlx::query("UPDATE albums SET artist_id = ?2 WHERE artist_id = ?1")
            .bind(old_id)
            .bind(new_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        let songs = sqlx::query("UPDATE songs SET artist_id = ?2 WHERE artist_id = ?1")
            .bind(old_id)
            .bind(new_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();

        debug!(old_id, new_id, albums, songs, "Reassigned artist children");
        Ok(albums + songs)
    }

    /// Deletes an artist row on a held connection.
    pub async fn delete_on(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM artists WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl Store<Artist> for ArtistRepository {
    async fn insert(&self, artist: &Artist) -> DbResult<bool> {
        debug!(id = %artist.id, name = %artist.name, "Inserting artist");

        let artist = artist.clone();
        self.pool
            .with_connection(move |session| {
                Box::pin(async move { Self::insert_on(session.connection(), &artist).await })
            })
            .await
    }

    async fn select_by_id(&self, id: &str) -> DbResult<Option<Artist>> {
        let id = id.to_string();
        self.pool
            .with_connection(move |session| {
                Box::pin(async move { Self::select_on(session.connection(), &id).await })
            })
            .await
    }

    async fn select_all(&self) -> DbResult<Vec<Artist>> {
        self.pool
            .with_connection(|session| {
                Box::pin(async move {
                    let conn = session.connection();

                    let rows: Vec<ArtistRow> =
                        sqlx::query_as("SELECT id, name, biography FROM artists ORDER BY id")
                            .fetch_all(&mut *conn)
                            .await?;

                    let pairs: Vec<(String, String)> = sqlx::query_as(
                        "SELECT artist_id, id FROM albums WHERE artist_id IS NOT NULL ORDER BY id",
                    )
                    .fetch_all(&mut *conn)
                    .await?;
                    let mut albums = group_children(pairs);

                    Ok(rows
                        .into_iter()
                        .map(|row| {
                            let album_ids = albums.remove(&row.id).unwrap_or_default();
                            row.into_artist(album_ids)
                        })
                        .collect())
                })
            })
            .await
    }

    async fn update(&self, artist: &Artist) -> DbResult<bool> {
        let artist = artist.clone();
        self.pool
            .with_connection(move |session| {
                Box::pin(async move {
                    let result =
                        sqlx::query("UPDATE artists SET name = ?2, biography = ?3 WHERE id = ?1")
                            .bind(&artist.id)
                            .bind(&artist.name)
                            .bind(&artist.biography)
                            .execute(session.connection())
                            .await?;

                    Ok(result.rows_affected() > 0)
                })
            })
            .await
    }

    /// Fails with a foreign key violation while the artist still owns
    /// albums or songs.
    async fn delete(&self, id: &str) -> DbResult<bool> {
        debug!(id = %id, "Deleting artist");

        let id = id.to_string();
        self.pool
            .with_connection(move |session| {
                Box::pin(async move { Self::delete_on(session.connection(), &id).await })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::repository::fixtures;

    #[tokio::test]
    async fn test_insert_and_select() {
        let repo = ArtistRepository::new(fixtures::pool().await);

        let artist = Artist::with_id("a1", "Radiohead").biography("Abingdon, 1985");
        assert!(repo.insert(&artist).await.unwrap());

        let found = repo.select_by_id("a1").await.unwrap().unwrap();
        assert_eq!(found, artist);
        assert!(repo.select_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_constraint_violation() {
        let repo = ArtistRepository::new(fixtures::pool().await);
        repo.insert(&Artist::with_id("a1", "Radiohead")).await.unwrap();

        let err = repo
            .insert(&Artist::with_id("a1", "Portishead"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_select_all_fills_album_ids() {
        let pool = fixtures::pool().await;
        let repo = ArtistRepository::new(pool.clone());
        repo.insert(&Artist::with_id("a2", "Portishead")).await.unwrap();
        repo.insert(&Artist::with_id("a1", "Radiohead")).await.unwrap();
        fixtures::exec_unchecked(
            &pool,
            "INSERT INTO albums (id, title, artist_id) VALUES ('al2', 'Amnesiac', 'a1'), ('al1', 'Kid A', 'a1')",
        )
        .await;

        let all = repo.select_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a1");
        assert_eq!(all[0].album_ids, vec!["al1", "al2"]);
        assert!(all[1].album_ids.is_empty());
    }

    #[tokio::test]
    async fn test_missing_rows_are_false_not_errors() {
        let repo = ArtistRepository::new(fixtures::pool().await);

        assert!(!repo.update(&Artist::with_id("nope", "Nobody")).await.unwrap());
        assert!(!repo.delete("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_reassign_children_is_idempotent() {
        let pool = fixtures::pool().await;
        fixtures::exec_unchecked(
            &pool,
            "INSERT INTO artists (id, name) VALUES ('a1', 'Radiohead'), ('a2', 'radiohead');
             INSERT INTO albums (id, title, artist_id) VALUES ('al1', 'OK Computer', 'a2');
             INSERT INTO songs (id, title, artist_id, album_id) VALUES ('s1', 'Airbag', 'a2', 'al1')",
        )
        .await;

        let moved = |pool: LibraryPool| async move {
            pool.with_connection(|session| {
                Box::pin(async move {
                    ArtistRepository::reassign_children(session.connection(), "a2", "a1").await
                })
            })
            .await
            .unwrap()
        };

        assert_eq!(moved(pool.clone()).await, 2);
        assert_eq!(moved(pool.clone()).await, 0);
    }

    #[tokio::test]
    async fn test_find_sentinel_falls_back_to_legacy_name() {
        let pool = fixtures::pool().await;
        let repo = ArtistRepository::new(pool.clone());

        let none = pool
            .with_connection(|s| Box::pin(ArtistRepository::find_sentinel(s.connection())))
            .await
            .unwrap();
        assert!(none.is_none());

        repo.insert(&Artist::with_id("legacy", SENTINEL_ARTIST_NAME))
            .await
            .unwrap();
        let legacy = pool
            .with_connection(|s| Box::pin(ArtistRepository::find_sentinel(s.connection())))
            .await
            .unwrap();
        assert_eq!(legacy.unwrap().id, "legacy");

        repo.insert(&Artist::with_id(SENTINEL_ARTIST_ID, SENTINEL_ARTIST_NAME))
            .await
            .unwrap();
        let reserved = pool
            .with_connection(|s| Box::pin(ArtistRepository::find_sentinel(s.connection())))
            .await
            .unwrap();
        assert!(reserved.unwrap().is_sentinel());
    }
}
