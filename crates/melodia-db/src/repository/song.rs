//! # Song Repository
//!
//! Database operations for songs, plus the named repairs for the two
//! references a song carries (album and artist).

use async_trait::async_trait;
use sqlx::{FromRow, SqliteConnection};
use tracing::debug;

use crate::backend::SqliteBackend;
use crate::error::DbResult;
use crate::store::Store;
use crate::transaction::{Decision, TransactionRunner};
use crate::LibraryPool;
use melodia_core::Song;

#[derive(Debug, FromRow)]
struct SongRow {
    id: String,
    title: String,
    artist_id: Option<String>,
    album_id: Option<String>,
    duration_secs: i64,
    genre: Option<String>,
}

impl From<SongRow> for Song {
    fn from(row: SongRow) -> Self {
        Song {
            id: row.id,
            title: row.title,
            artist_id: row.artist_id,
            album_id: row.album_id,
            // CHECK (duration_secs >= 0) keeps this in range.
            duration_secs: u32::try_from(row.duration_secs).unwrap_or_default(),
            genre: row.genre,
        }
    }
}

/// Repository for song database operations.
#[derive(Debug, Clone)]
pub struct SongRepository {
    pool: LibraryPool,
    runner: TransactionRunner<SqliteBackend>,
}

impl SongRepository {
    /// Creates a new SongRepository.
    pub fn new(pool: LibraryPool) -> Self {
        SongRepository {
            runner: TransactionRunner::new(pool.clone()),
            pool,
        }
    }

    /// Ids of songs whose album reference resolves to no album row.
    pub async fn find_dangling_album_refs(conn: &mut SqliteConnection) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT s.id
            FROM songs s
            LEFT JOIN albums al ON al.id = s.album_id
            WHERE s.album_id IS NOT NULL AND al.id IS NULL
            ORDER BY s.id
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(ids)
    }

    /// Ids of songs whose artist reference resolves to no artist row.
    pub async fn find_dangling_artist_refs(conn: &mut SqliteConnection) -> DbResult<Vec<String>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT s.id
            FROM songs s
            LEFT JOIN artists ar ON ar.id = s.artist_id
            WHERE s.artist_id IS NOT NULL AND ar.id IS NULL
            ORDER BY s.id
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(ids)
    }

    /// Clears one song's album reference. The song itself is kept.
    ///
    /// ## Returns
    /// 1 if a reference was cleared, 0 if there was none.
    pub async fn detach_album_reference(
        conn: &mut SqliteConnection,
        song_id: &str,
    ) -> DbResult<u64> {
        let result =
            sqlx::query("UPDATE songs SET album_id = NULL WHERE id = ?1 AND album_id IS NOT NULL")
                .bind(song_id)
                .execute(&mut *conn)
                .await?;

        Ok(result.rows_affected())
    }

    /// Sets one song's artist.
    pub async fn reassign_artist(
        conn: &mut SqliteConnection,
        song_id: &str,
        artist_id: &str,
    ) -> DbResult<u64> {
        let result =
            sqlx::query("UPDATE songs SET artist_id = ?2 WHERE id = ?1 AND artist_id IS NOT ?2")
                .bind(song_id)
                .bind(artist_id)
                .execute(&mut *conn)
                .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Store<Song> for SongRepository {
    async fn insert(&self, song: &Song) -> DbResult<bool> {
        debug!(id = %song.id, title = %song.title, "Inserting song");

        let song = song.clone();
        self.pool
            .with_connection(move |session| {
                Box::pin(async move {
                    let result = sqlx::query(
                        r#"
                        INSERT INTO songs (id, title, artist_id, album_id, duration_secs, genre)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        "#,
                    )
                    .bind(&song.id)
                    .bind(&song.title)
                    .bind(&song.artist_id)
                    .bind(&song.album_id)
                    .bind(i64::from(song.duration_secs))
                    .bind(&song.genre)
                    .execute(session.connection())
                    .await?;

                    Ok(result.rows_affected() == 1)
                })
            })
            .await
    }

    async fn select_by_id(&self, id: &str) -> DbResult<Option<Song>> {
        let id = id.to_string();
        self.pool
            .with_connection(move |session| {
                Box::pin(async move {
                    let row: Option<SongRow> = sqlx::query_as(
                        r#"
                        SELECT id, title, artist_id, album_id, duration_secs, genre
                        FROM songs
                        WHERE id = ?1
                        "#,
                    )
                    .bind(&id)
                    .fetch_optional(session.connection())
                    .await?;

                    Ok(row.map(Song::from))
                })
            })
            .await
    }

    async fn select_all(&self) -> DbResult<Vec<Song>> {
        self.pool
            .with_connection(|session| {
                Box::pin(async move {
                    let rows: Vec<SongRow> = sqlx::query_as(
                        r#"
                        SELECT id, title, artist_id, album_id, duration_secs, genre
                        FROM songs
                        ORDER BY id
                        "#,
                    )
                    .fetch_all(session.connection())
                    .await?;

                    Ok(rows.into_iter().map(Song::from).collect())
                })
            })
            .await
    }

    async fn update(&self, song: &Song) -> DbResult<bool> {
        let song = song.clone();
        self.pool
            .with_connection(move |session| {
                Box::pin(async move {
                    let result = sqlx::query(
                        r#"
                        UPDATE songs
                        SET title = ?2, artist_id = ?3, album_id = ?4, duration_secs = ?5, genre = ?6
                        WHERE id = ?1
                        "#,
                    )
                    .bind(&song.id)
                    .bind(&song.title)
                    .bind(&song.artist_id)
                    .bind(&song.album_id)
                    .bind(i64::from(song.duration_secs))
                    .bind(&song.genre)
                    .execute(session.connection())
                    .await?;

                    Ok(result.rows_affected() > 0)
                })
            })
            .await
    }

    /// Deletes a song and every playlist link pointing at it.
    async fn delete(&self, id: &str) -> DbResult<bool> {
        debug!(id = %id, "Deleting song");

        let id = id.to_string();
        let decision = self
            .runner
            .run(move |session| {
                Box::pin(async move {
                    let conn = session.connection();

                    sqlx::query("DELETE FROM playlist_songs WHERE song_id = ?1")
                        .bind(&id)
                        .execute(&mut *conn)
                        .await?;

                    let deleted = sqlx::query("DELETE FROM songs WHERE id = ?1")
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
    use crate::repository::fixtures;

    async fn run<R, F>(pool: &LibraryPool, f: F) -> R
    where
        R: Send,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> futures::future::BoxFuture<'c, DbResult<R>>
            + Send,
    {
        pool.with_connection(move |session| f(session.connection()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_keeps_duration() {
        let pool = fixtures::pool().await;
        let repo = SongRepository::new(pool.clone());
        fixtures::exec_unchecked(&pool, "INSERT INTO artists (id, name) VALUES ('a1', 'Björk')").await;

        let song = Song::with_id("s1", "Jóga", "a1").duration_secs(305).genre("Electronic");
        assert!(repo.insert(&song).await.unwrap());
        assert_eq!(repo.select_by_id("s1").await.unwrap(), Some(song));
    }

    #[tokio::test]
    async fn test_detach_album_reference() {
        let pool = fixtures::pool().await;
        fixtures::exec_unchecked(
            &pool,
            "INSERT INTO songs (id, title, album_id) VALUES ('s1', 'Hunter', 'missing'), ('s2', 'Bachelorette', NULL)",
        )
        .await;

        let dangling = run(&pool, |c| Box::pin(SongRepository::find_dangling_album_refs(c))).await;
        assert_eq!(dangling, vec!["s1"]);

        assert_eq!(
            run(&pool, |c| Box::pin(SongRepository::detach_album_reference(c, "s1"))).await,
            1
        );
        assert_eq!(
            run(&pool, |c| Box::pin(SongRepository::detach_album_reference(c, "s1"))).await,
            0
        );

        let dangling = run(&pool, |c| Box::pin(SongRepository::find_dangling_album_refs(c))).await;
        assert!(dangling.is_empty());
    }

    #[tokio::test]
    async fn test_dangling_artist_refs_and_reassign() {
        let pool = fixtures::pool().await;
        fixtures::exec_unchecked(
            &pool,
            "INSERT INTO artists (id, name) VALUES ('a1', 'Björk');
             INSERT INTO songs (id, title, artist_id) VALUES ('s1', 'Army of Me', 'ghost'), ('s2', 'Isobel', 'a1')",
        )
        .await;

        let dangling = run(&pool, |c| Box::pin(SongRepository::find_dangling_artist_refs(c))).await;
        assert_eq!(dangling, vec!["s1"]);

        assert_eq!(
            run(&pool, |c| Box::pin(SongRepository::reassign_artist(c, "s1", "a1"))).await,
            1
        );
        assert_eq!(
            run(&pool, |c| Box::pin(SongRepository::reassign_artist(c, "s1", "a1"))).await,
            0
        );
    }

    #[tokio::test]
    async fn test_delete_removes_playlist_links() {
        let pool = fixtures::pool().await;
        let repo = SongRepository::new(pool.clone());
        fixtures::exec_unchecked(
            &pool,
            "INSERT INTO songs (id, title) VALUES ('s1', 'Venus as a Boy');
             INSERT INTO playlists (id, name) VALUES ('p1', 'Debut');
             INSERT INTO playlist_songs (playlist_id, position, song_id) VALUES ('p1', 0, 's1')",
        )
        .await;

        assert!(repo.delete("s1").await.unwrap());
        assert!(!repo.delete("s1").await.unwrap());

        let links: i64 = run(&pool, |c| {
            Box::pin(async move {
                Ok(sqlx::query_scalar("SELECT COUNT(*) FROM playlist_songs")
                    .fetch_one(c)
                    .await?)
            })
        })
        .await;
        assert_eq!(links, 0);
    }
}
