//! # Playlist Repository
//!
//! Database operations for playlists and their ordered link rows.
//!
//! ## Storage Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  playlists                    playlist_songs                            │
//! │  ┌──────┬────────────┐        ┌─────────────┬──────────┬─────────┐      │
//! │  │ id   │ name       │        │ playlist_id │ position │ song_id │      │
//! │  ├──────┼────────────┤        ├─────────────┼──────────┼─────────┤      │
//! │  │ p1   │ Late night │ ◄───── │ p1          │ 0        │ s7      │      │
//! │  └──────┴────────────┘        │ p1          │ 1        │ s2      │      │
//! │                               │ p1          │ 3        │ s7      │      │
//! │                               └─────────────┴──────────┴─────────┘      │
//! │  Positions only order the rows; gaps are fine.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use sqlx::{FromRow, SqliteConnection};
use tracing::{debug, info};

use crate::backend::SqliteBackend;
use crate::error::DbResult;
use crate::repository::group_children;
use crate::store::Store;
use crate::transaction::{Decision, TransactionRunner};
use crate::LibraryPool;
use melodia_core::Playlist;

#[derive(Debug, FromRow)]
struct PlaylistRow {
    id: String,
    name: String,
    description: Option<String>,
}

impl PlaylistRow {
    fn into_playlist(self, song_ids: Vec<String>) -> Playlist {
        Playlist {
            id: self.id,
            name: self.name,
            description: self.description,
            song_ids,
        }
    }
}

/// Repository for playlist database operations.
#[derive(Debug, Clone)]
pub struct PlaylistRepository {
    pool: LibraryPool,
    runner: TransactionRunner<SqliteBackend>,
}

impl PlaylistRepository {
    /// Creates a new PlaylistRepository.
    pub fn new(pool: LibraryPool) -> Self {
        PlaylistRepository {
            runner: TransactionRunner::new(pool.clone()),
            pool,
        }
    }

    /// Gets a playlist by id on a held connection, songs in play order.
    pub async fn select_on(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Playlist>> {
        let row: Option<PlaylistRow> =
            sqlx::query_as("SELECT id, name, description FROM playlists WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let song_ids: Vec<String> = sqlx::query_scalar(
            "SELECT song_id FROM playlist_songs WHERE playlist_id = ?1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Some(row.into_playlist(song_ids)))
    }

    /// Appends a song to the end of a playlist.
    ///
    /// ## Returns
    /// The position the song was stored at.
    pub async fn add_song_on(
        conn: &mut SqliteConnection,
        playlist_id: &str,
        song_id: &str,
    ) -> DbResult<i64> {
        let position: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM playlist_songs WHERE playlist_id = ?1",
        )
        .bind(playlist_id)
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query("INSERT INTO playlist_songs (playlist_id, position, song_id) VALUES (?1, ?2, ?3)")
            .bind(playlist_id)
            .bind(position)
            .bind(song_id)
            .execute(&mut *conn)
            .await?;

        Ok(position)
    }

    /// Deletes every link whose song no longer exists.
    ///
    /// A link with no target cannot be repaired, only removed.
    ///
    /// ## Returns
    /// Number of links deleted. Zero on a second run.
    pub async fn delete_dangling_playlist_links(conn: &mut SqliteConnection) -> DbResult<u64> {
        let removed = sqlx::query(
            r#"
            DELETE FROM playlist_songs
            WHERE NOT EXISTS (SELECT 1 FROM songs s WHERE s.id = playlist_songs.song_id)
            "#,
        )
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if removed > 0 {
            info!(removed, "Deleted dangling playlist links");
        }
        Ok(removed)
    }

    /// Appends a song to a playlist.
    ///
    /// ## Returns
    /// * `Err(DbError::ForeignKeyViolation)` - playlist or song does not exist
    pub async fn add_song(&self, playlist_id: &str, song_id: &str) -> DbResult<i64> {
        debug!(playlist_id, song_id, "Adding song to playlist");

        let playlist_id = playlist_id.to_string();
        let song_id = song_id.to_string();
        let decision = self
            .runner
            .run(move |session| {
                Box::pin(async move {
                    let position =
                        Self::add_song_on(session.connection(), &playlist_id, &song_id).await?;
                    Ok(Decision::Commit(position))
                })
            })
            .await?;

        Ok(decision.into_inner())
    }

    /// Removes the first occurrence of a song from a playlist.
    ///
    /// ## Returns
    /// `Ok(false)` if the song was not on the playlist.
    pub async fn remove_song(&self, playlist_id: &str, song_id: &str) -> DbResult<bool> {
        debug!(playlist_id, song_id, "Removing song from playlist");

        let playlist_id = playlist_id.to_string();
        let song_id = song_id.to_string();
        self.pool
            .with_connection(move |session| {
                Box::pin(async move {
                    let result = sqlx::query(
                        r#"
                        DELETE FROM playlist_songs
                        WHERE playlist_id = ?1
                        AND position = (
                            SELECT MIN(position) FROM playlist_songs
                            WHERE playlist_id = ?1 AND song_id = ?2
                        )
                        "#,
                    )
                    .bind(&playlist_id)
                    .bind(&song_id)
                    .execute(session.connection())
                    .await?;

                    Ok(result.rows_affected() > 0)
                })
            })
            .await
    }
}

/// Writes `song_ids` as the playlist's links, positions 0..n.
async fn insert_links(
    conn: &mut SqliteConnection,
    playlist_id: &str,
    song_ids: &[String],
) -> DbResult<()> {
    for (position, song_id) in song_ids.iter().enumerate() {
        sqlx::query("INSERT INTO playlist_songs (playlist_id, position, song_id) VALUES (?1, ?2, ?3)")
            .bind(playlist_id)
            .bind(position as i64)
            .bind(song_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl Store<Playlist> for PlaylistRepository {
    /// Inserts the playlist and its links in one transaction.
    async fn insert(&self, playlist: &Playlist) -> DbResult<bool> {
        debug!(id = %playlist.id, songs = playlist.song_ids.len(), "Inserting playlist");

        let playlist = playlist.clone();
        let decision = self
            .runner
            .run(move |session| {
                Box::pin(async move {
                    let conn = session.connection();

                    let inserted = sqlx::query(
                        "INSERT INTO playlists (id, name, description) VALUES (?1, ?2, ?3)",
                    )
                    .bind(&playlist.id)
                    .bind(&playlist.name)
                    .bind(&playlist.description)
                    .execute(&mut *conn)
                    .await?
                    .rows_affected()
                        == 1;

                    insert_links(conn, &playlist.id, &playlist.song_ids).await?;
                    Ok(Decision::Commit(inserted))
                })
            })
            .await?;

        Ok(decision.into_inner())
    }

    async fn select_by_id(&self, id: &str) -> DbResult<Option<Playlist>> {
        let id = id.to_string();
        self.pool
            .with_connection(move |session| {
                Box::pin(async move { Self::select_on(session.connection(), &id).await })
            })
            .await
    }

    async fn select_all(&self) -> DbResult<Vec<Playlist>> {
        self.pool
            .with_connection(|session| {
                Box::pin(async move {
                    let conn = session.connection();

                    let rows: Vec<PlaylistRow> =
                        sqlx::query_as("SELECT id, name, description FROM playlists ORDER BY id")
                            .fetch_all(&mut *conn)
                            .await?;

                    let pairs: Vec<(String, String)> = sqlx::query_as(
                        "SELECT playlist_id, song_id FROM playlist_songs ORDER BY playlist_id, position",
                    )
                    .fetch_all(&mut *conn)
                    .await?;
                    let mut links = group_children(pairs);

                    Ok(rows
                        .into_iter()
                        .map(|row| {
                            let song_ids = links.remove(&row.id).unwrap_or_default();
                            row.into_playlist(song_ids)
                        })
                        .collect())
                })
            })
            .await
    }

    /// Overwrites name, description and the full song list.
    async fn update(&self, playlist: &Playlist) -> DbResult<bool> {
        let playlist = playlist.clone();
        let decision = self
            .runner
            .run(move |session| {
                Box::pin(async move {
                    let conn = session.connection();

                    let updated =
                        sqlx::query("UPDATE playlists SET name = ?2, description = ?3 WHERE id = ?1")
                            .bind(&playlist.id)
                            .bind(&playlist.name)
                            .bind(&playlist.description)
                            .execute(&mut *conn)
                            .await?
                            .rows_affected()
                            > 0;

                    if !updated {
                        return Ok(Decision::Rollback(false));
                    }

                    sqlx::query("DELETE FROM playlist_songs WHERE playlist_id = ?1")
                        .bind(&playlist.id)
                        .execute(&mut *conn)
                        .await?;
                    insert_links(conn, &playlist.id, &playlist.song_ids).await?;

                    Ok(Decision::Commit(true))
                })
            })
            .await?;

        Ok(decision.into_inner())
    }

    async fn delete(&self, id: &str) -> DbResult<bool> {
        debug!(id = %id, "Deleting playlist");

        let id = id.to_string();
        let decision = self
            .runner
            .run(move |session| {
                Box::pin(async move {
                    let conn = session.connection();

                    sqlx::query("DELETE FROM playlist_songs WHERE playlist_id = ?1")
                        .bind(&id)
                        .execute(&mut *conn)
                        .await?;

                    let deleted = sqlx::query("DELETE FROM playlists WHERE id = ?1")
                        .bind(&id)
                        .execute(&mut *conn)
                        .await?
                        .rows_affected()
                        > 0;

                    Ok(if deleted {
                        Decision::Commit(true)
                    } else {
                        Decision::Rollback(false)
                    })
                })
            })
            .await?;

        Ok(decision.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use crate::repository::fixtures;

    async fn seeded() -> (LibraryPool, PlaylistRepository) {
        let pool = fixtures::pool().await;
        fixtures::exec_unchecked(
            &pool,
            "INSERT INTO songs (id, title) VALUES ('s1', 'Roads'), ('s2', 'Glory Box'), ('s3', 'Wandering Star')",
        )
        .await;
        let repo = PlaylistRepository::new(pool.clone());
        (pool, repo)
    }

    #[tokio::test]
    async fn test_insert_keeps_order_and_repeats() {
        let (_pool, repo) = seeded().await;

        let playlist = Playlist::with_id("p1", "Trip hop").songs(["s2", "s1", "s2"]);
        assert!(repo.insert(&playlist).await.unwrap());

        let found = repo.select_by_id("p1").await.unwrap().unwrap();
        assert_eq!(found.song_ids, vec!["s2", "s1", "s2"]);
    }

    #[tokio::test]
    async fn test_insert_with_unknown_song_leaves_nothing() {
        let (_pool, repo) = seeded().await;

        let playlist = Playlist::with_id("p1", "Broken").songs(["s1", "nope"]);
        let err = repo.insert(&playlist).await.unwrap_err();

        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
        assert!(repo.select_by_id("p1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_add_and_remove_song() {
        let (_pool, repo) = seeded().await;
        repo.insert(&Playlist::with_id("p1", "Mix").songs(["s1"]))
            .await
            .unwrap();

        assert_eq!(repo.add_song("p1", "s3").await.unwrap(), 1);
        assert_eq!(repo.add_song("p1", "s1").await.unwrap(), 2);
        assert!(repo.remove_song("p1", "s1").await.unwrap());
        assert!(!repo.remove_song("p1", "s2").await.unwrap());

        let found = repo.select_by_id("p1").await.unwrap().unwrap();
        assert_eq!(found.song_ids, vec!["s3", "s1"]);
    }

    #[tokio::test]
    async fn test_update_replaces_links() {
        let (_pool, repo) = seeded().await;
        repo.insert(&Playlist::with_id("p1", "Mix").songs(["s1", "s2"]))
            .await
            .unwrap();

        let updated = Playlist::with_id("p1", "Mix v2")
            .description("reordered")
            .songs(["s3", "s1"]);
        assert!(repo.update(&updated).await.unwrap());
        assert_eq!(repo.select_by_id("p1").await.unwrap(), Some(updated));

        assert!(!repo.update(&Playlist::with_id("p9", "Ghost")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_dangling_links_is_idempotent() {
        let (pool, repo) = seeded().await;
        repo.insert(&Playlist::with_id("p1", "Mix").songs(["s1", "s2"]))
            .await
            .unwrap();
        fixtures::exec_unchecked(&pool, "DELETE FROM songs WHERE id = 's2'").await;

        for expected in [1, 0] {
            let removed = pool
                .with_connection(|s| {
                    Box::pin(PlaylistRepository::delete_dangling_playlist_links(s.connection()))
                })
                .await
                .unwrap();
            assert_eq!(removed, expected);
        }

        let found = repo.select_by_id("p1").await.unwrap().unwrap();
        assert_eq!(found.song_ids, vec!["s1"]);
    }
}
