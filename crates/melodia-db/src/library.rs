//! # Library Handle
//!
//! One pool, one cache per entity type, the merge loaders and the repairer,
//! wired together behind a single handle.
//!
//! ## Ownership
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Library                                    │
//! │                                                                         │
//! │  LibraryPool ─────────┬──────────────┬──────────────┬────────────┐      │
//! │      │                │              │              │            │      │
//! │      ▼                ▼              ▼              ▼            ▼      │
//! │  ArtistCache      AlbumCache     SongCache    PlaylistCache  Repairer   │
//! │      ▲                ▲                                                 │
//! │      │                │                                                 │
//! │  artist_loader    album_loader    (share the caches above)              │
//! │                                                                         │
//! │  Cross-entity writes evict the parent entry so its child list is        │
//! │  re-read on the next lookup.                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use melodia_core::validation::validate_id;
use melodia_core::{Album, Artist, CoreError, Playlist, Song};

use crate::backend::SqliteBackend;
use crate::cache::EntityCache;
use crate::config::DbConfig;
use crate::dedup::{DedupReport, DeduplicatingLoader};
use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::pool::{ConnectionPool, PoolOptions, PoolStatus};
use crate::repair::{IntegrityRepairer, RepairReport};
use crate::repository::album::AlbumRepository;
use crate::repository::artist::ArtistRepository;
use crate::repository::playlist::PlaylistRepository;
use crate::repository::song::SongRepository;
use crate::store::Store;
use crate::transaction::TransactionRunner;
use crate::LibraryPool;

pub type ArtistCache = EntityCache<Artist, ArtistRepository>;
pub type AlbumCache = EntityCache<Album, AlbumRepository>;
pub type SongCache = EntityCache<Song, SongRepository>;
pub type PlaylistCache = EntityCache<Playlist, PlaylistRepository>;

/// Merge results for both merge-capable entity types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LibraryDedupReport {
    pub artists: DedupReport,
    pub albums: DedupReport,
}

impl LibraryDedupReport {
    pub fn is_noop(&self) -> bool {
        self.artists.is_noop() && self.albums.is_noop()
    }
}

/// Main handle to a music library.
///
/// ## Usage
/// ```rust,ignore
/// let library = Library::open(DbConfig::new("./library.db")).await?;
///
/// let artist = Artist::new("Radiohead");
/// library.artists().add(artist.clone()).await?;
/// library.add_album(Album::new("OK Computer", &artist.id)).await?;
///
/// let albums = library.artist_albums(&artist.id).await?;
/// ```
pub struct Library {
    pool: LibraryPool,
    artists: Arc<ArtistCache>,
    albums: Arc<AlbumCache>,
    songs: Arc<SongCache>,
    playlists: Arc<PlaylistCache>,
    artist_loader: DeduplicatingLoader<Artist, ArtistRepository>,
    album_loader: DeduplicatingLoader<Album, AlbumRepository>,
    repairer: IntegrityRepairer,
}

impl Library {
    /// Opens (creating if needed) the library at `config.database_path`.
    ///
    /// ## What This Does
    /// 1. Validates the configuration
    /// 2. Builds the connection pool and warms `min_connections` sessions
    /// 3. Runs migrations (if enabled)
    /// 4. Wires the caches, loaders and repairer
    pub async fn open(config: DbConfig) -> DbResult<Self> {
        config.validate()?;

        info!(
            path = %config.database_path.display(),
            max_connections = config.max_connections,
            "Opening library"
        );

        let backend = SqliteBackend::new(&config)?;
        let pool = ConnectionPool::new(backend, PoolOptions::from(&config)).await?;

        if config.run_migrations {
            pool.with_connection(|session| Box::pin(migrations::run_migrations(session.connection())))
                .await?;
        }

        Ok(Self::from_pool(pool))
    }

    /// Wires a library over an existing pool. Migrations are not run.
    pub fn from_pool(pool: LibraryPool) -> Self {
        let runner = TransactionRunner::new(pool.clone());

        let artists = Arc::new(EntityCache::new(Arc::new(ArtistRepository::new(pool.clone()))));
        let albums = Arc::new(EntityCache::new(Arc::new(AlbumRepository::new(pool.clone()))));
        let songs = Arc::new(EntityCache::new(Arc::new(SongRepository::new(pool.clone()))));
        let playlists = Arc::new(EntityCache::new(Arc::new(PlaylistRepository::new(
            pool.clone(),
        ))));

        Library {
            artist_loader: DeduplicatingLoader::new(Arc::clone(&artists), runner.clone()),
            album_loader: DeduplicatingLoader::new(Arc::clone(&albums), runner),
            repairer: IntegrityRepairer::new(pool.clone()),
            pool,
            artists,
            albums,
            songs,
            playlists,
        }
    }

    pub fn pool(&self) -> &LibraryPool {
        &self.pool
    }

    /// The per-type caches.
    ///
    /// Plain reads and single-type writes can go straight to a cache. Writes
    /// that change a parent's child list (adding, moving or removing an album
    /// or song) must go through the `Library` wrappers, which also drop the
    /// affected parent entries; a cache only ever touches its own map.
    pub fn artists(&self) -> &Arc<ArtistCache> {
        &self.artists
    }

    pub fn albums(&self) -> &Arc<AlbumCache> {
        &self.albums
    }

    pub fn songs(&self) -> &Arc<SongCache> {
        &self.songs
    }

    pub fn playlists(&self) -> &Arc<PlaylistCache> {
        &self.playlists
    }

    pub fn repairer(&self) -> &IntegrityRepairer {
        &self.repairer
    }

    // =========================================================================
    // Loads
    // =========================================================================

    /// Every artist after merging case/whitespace duplicates.
    pub async fn all_artists(&self) -> DbResult<Vec<Artist>> {
        let (artists, report) = self.artist_loader.load().await?;
        if !report.is_noop() {
            // Albums and songs of merged artists now point at the survivor.
            self.albums.invalidate().await;
            self.songs.invalidate().await;
        }
        Ok(artists)
    }

    /// Every album after merging same-title duplicates per artist.
    pub async fn all_albums(&self) -> DbResult<Vec<Album>> {
        let (albums, report) = self.album_loader.load().await?;
        if !report.is_noop() {
            // Album lists of artists and album ids of songs changed.
            self.artists.invalidate().await;
            self.songs.invalidate().await;
        }
        Ok(albums)
    }

    // =========================================================================
    // Cross-entity Writes
    // =========================================================================

    /// Adds an album and evicts its artist, whose album list just grew.
    pub async fn add_album(&self, album: Album) -> DbResult<bool> {
        let artist_id = album.artist_id.clone();
        let inserted = self.albums.add(album).await?;
        if inserted {
            if let Some(artist_id) = artist_id {
                self.artists.evict(&artist_id).await;
            }
        }
        Ok(inserted)
    }

    /// Adds a song and evicts its album.
    pub async fn add_song(&self, song: Song) -> DbResult<bool> {
        let album_id = song.album_id.clone();
        let inserted = self.songs.add(song).await?;
        if inserted {
            if let Some(album_id) = album_id {
                self.albums.evict(&album_id).await;
            }
        }
        Ok(inserted)
    }

    /// Updates an album and evicts its old and new artist.
    pub async fn update_album(&self, album: Album) -> DbResult<bool> {
        let previous = self
            .albums
            .store()
            .select_by_id(&album.id)
            .await?
            .and_then(|old| old.artist_id);
        let current = album.artist_id.clone();

        let updated = self.albums.update(album).await?;
        if updated {
            for artist_id in previous.iter().chain(current.iter()) {
                self.artists.evict(artist_id).await;
            }
        }
        Ok(updated)
    }

    /// Updates a song and evicts its old and new album.
    pub async fn update_song(&self, song: Song) -> DbResult<bool> {
        let previous = self
            .songs
            .store()
            .select_by_id(&song.id)
            .await?
            .and_then(|old| old.album_id);
        let current = song.album_id.clone();

        let updated = self.songs.update(song).await?;
        if updated {
            for album_id in previous.iter().chain(current.iter()) {
                self.albums.evict(album_id).await;
            }
        }
        Ok(updated)
    }

    /// Deletes an album. Its songs stay, detached from it.
    pub async fn remove_album(&self, album_id: &str) -> DbResult<bool> {
        let owner = self
            .albums
            .get_by_id(album_id)
            .await?
            .and_then(|album| album.artist_id);

        let removed = self.albums.remove(album_id).await?;
        if removed {
            if let Some(artist_id) = owner {
                self.artists.evict(&artist_id).await;
            }
            self.songs.invalidate().await;
        }
        Ok(removed)
    }

    /// Deletes a song along with its playlist links.
    pub async fn remove_song(&self, song_id: &str) -> DbResult<bool> {
        let album_id = self
            .songs
            .get_by_id(song_id)
            .await?
            .and_then(|song| song.album_id);

        let removed = self.songs.remove(song_id).await?;
        if removed {
            if let Some(album_id) = album_id {
                self.albums.evict(&album_id).await;
            }
            self.playlists.invalidate().await;
        }
        Ok(removed)
    }

    /// Appends a song to a playlist.
    ///
    /// ## Returns
    /// The position the song landed at.
    pub async fn add_song_to_playlist(&self, playlist_id: &str, song_id: &str) -> DbResult<i64> {
        validate_id("playlist_id", playlist_id)?;
        validate_id("song_id", song_id)?;

        let position = self.playlists.store().add_song(playlist_id, song_id).await?;
        self.playlists.evict(playlist_id).await;
        Ok(position)
    }

    /// Removes the first occurrence of a song from a playlist.
    pub async fn remove_song_from_playlist(
        &self,
        playlist_id: &str,
        song_id: &str,
    ) -> DbResult<bool> {
        validate_id("playlist_id", playlist_id)?;
        validate_id("song_id", song_id)?;

        let removed = self
            .playlists
            .store()
            .remove_song(playlist_id, song_id)
            .await?;
        if removed {
            self.playlists.evict(playlist_id).await;
        }
        Ok(removed)
    }

    // =========================================================================
    // Materialized Reads
    // =========================================================================

    /// Albums of an artist, in the artist's order.
    ///
    /// ## Returns
    /// * `Ok(None)` - no such artist
    /// * `Err(DbError::Domain(CoreError::DanglingReference))` - a listed album is gone
    pub async fn artist_albums(&self, artist_id: &str) -> DbResult<Option<Vec<Album>>> {
        let Some(artist) = self.artists.get_by_id(artist_id).await? else {
            return Ok(None);
        };

        let mut albums = Vec::with_capacity(artist.album_ids.len());
        for album_id in &artist.album_ids {
            match self.albums.get_by_id(album_id).await? {
                Some(album) => albums.push(album),
                None => return Err(dangling("artist", &artist.id, "album", album_id)),
            }
        }
        Ok(Some(albums))
    }

    /// Songs of an album, in the album's order.
    pub async fn album_songs(&self, album_id: &str) -> DbResult<Option<Vec<Song>>> {
        let Some(album) = self.albums.get_by_id(album_id).await? else {
            return Ok(None);
        };

        let mut songs = Vec::with_capacity(album.song_ids.len());
        for song_id in &album.song_ids {
            match self.songs.get_by_id(song_id).await? {
                Some(song) => songs.push(song),
                None => return Err(dangling("album", &album.id, "song", song_id)),
            }
        }
        Ok(Some(songs))
    }

    /// Songs of a playlist in play order; repeats are kept.
    pub async fn playlist_songs(&self, playlist_id: &str) -> DbResult<Option<Vec<Song>>> {
        let Some(playlist) = self.playlists.get_by_id(playlist_id).await? else {
            return Ok(None);
        };

        let mut songs = Vec::with_capacity(playlist.song_ids.len());
        for song_id in &playlist.song_ids {
            match self.songs.get_by_id(song_id).await? {
                Some(song) => songs.push(song),
                None => return Err(dangling("playlist", &playlist.id, "song", song_id)),
            }
        }
        Ok(Some(songs))
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Merges duplicate artists, then duplicate albums.
    ///
    /// Artists go first: merging two artists can turn their albums into
    /// duplicates of each other.
    pub async fn deduplicate(&self) -> DbResult<LibraryDedupReport> {
        let artists = self.artist_loader.deduplicate().await?;
        let albums = self.album_loader.deduplicate().await?;

        // Album lists, song owners and song albums may all have moved.
        self.artists.invalidate().await;
        self.songs.invalidate().await;

        let report = LibraryDedupReport { artists, albums };
        info!(
            artists_merged = report.artists.merged,
            albums_merged = report.albums.merged,
            "Deduplication finished"
        );
        Ok(report)
    }

    /// Runs one integrity repair pass and drops every cached entry.
    pub async fn repair(&self) -> DbResult<RepairReport> {
        let result = self.repairer.repair().await;
        self.invalidate_all().await;
        result
    }

    /// Drops every cached entry of every type.
    pub async fn invalidate_all(&self) {
        self.artists.invalidate().await;
        self.albums.invalidate().await;
        self.songs.invalidate().await;
        self.playlists.invalidate().await;
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        self.pool
            .with_connection(|session| {
                Box::pin(async move {
                    sqlx::query("SELECT 1").execute(session.connection()).await?;
                    Ok(())
                })
            })
            .await
            .is_ok()
    }

    /// Returns (total, applied) migration counts.
    pub async fn migration_status(&self) -> DbResult<(usize, usize)> {
        self.pool
            .with_connection(|session| Box::pin(migrations::migration_status(session.connection())))
            .await
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Closes every pooled connection. Later operations fail with `PoolClosed`.
    pub async fn close(&self) {
        info!("Closing library");
        self.pool.close_all().await;
        self.invalidate_all().await;
        debug!("Library closed");
    }
}

fn dangling(entity: &'static str, id: &str, target: &'static str, target_id: &str) -> DbError {
    DbError::Domain(CoreError::DanglingReference {
        entity,
        id: id.to_string(),
        target,
        target_id: target_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::fixtures;

    async fn library() -> Library {
        Library::from_pool(fixtures::pool().await)
    }

    #[tokio::test]
    async fn test_add_album_refreshes_artist_album_list() {
        let library = library().await;
        let artist = Artist::with_id("a1", "Radiohead");
        library.artists().add(artist).await.unwrap();

        // Prime the cached artist with an empty album list.
        assert!(library.artist_albums("a1").await.unwrap().unwrap().is_empty());

        library
            .add_album(Album::with_id("al1", "OK Computer", "a1"))
            .await
            .unwrap();

        let albums = library.artist_albums("a1").await.unwrap().unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].title, "OK Computer");
    }

    #[tokio::test]
    async fn test_missing_parent_is_none() {
        let library = library().await;
        assert!(library.artist_albums("nope").await.unwrap().is_none());
        assert!(library.album_songs("nope").await.unwrap().is_none());
        assert!(library.playlist_songs("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_playlist_keeps_order_and_repeats() {
        let library = library().await;
        fixtures::exec_unchecked(
            library.pool(),
            "INSERT INTO songs (id, title) VALUES ('s1', 'Airbag'), ('s2', 'Lucky');
             INSERT INTO playlists (id, name) VALUES ('p1', 'Mix')",
        )
        .await;

        library.add_song_to_playlist("p1", "s2").await.unwrap();
        library.add_song_to_playlist("p1", "s1").await.unwrap();
        library.add_song_to_playlist("p1", "s2").await.unwrap();

        let titles: Vec<String> = library
            .playlist_songs("p1")
            .await
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|s| s.title)
            .collect();
        assert_eq!(titles, vec!["Lucky", "Airbag", "Lucky"]);

        assert!(library.remove_song_from_playlist("p1", "s2").await.unwrap());
        let playlist = library.playlists().get_by_id("p1").await.unwrap().unwrap();
        assert_eq!(playlist.song_ids, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn test_dangling_child_surfaces_as_domain_error() {
        let library = library().await;
        fixtures::exec_unchecked(
            library.pool(),
            "INSERT INTO playlists (id, name) VALUES ('p1', 'Mix');
             INSERT INTO playlist_songs (playlist_id, position, song_id) VALUES ('p1', 0, 'ghost')",
        )
        .await;

        let err = library.playlist_songs("p1").await.unwrap_err();
        assert!(matches!(
            err,
            DbError::Domain(CoreError::DanglingReference { ref target_id, .. }) if target_id == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_remove_song_drops_playlist_links() {
        let library = library().await;
        fixtures::exec_unchecked(
            library.pool(),
            "INSERT INTO songs (id, title) VALUES ('s1', 'Airbag');
             INSERT INTO playlists (id, name) VALUES ('p1', 'Mix');
             INSERT INTO playlist_songs (playlist_id, position, song_id) VALUES ('p1', 0, 's1')",
        )
        .await;
        assert_eq!(library.playlist_songs("p1").await.unwrap().unwrap().len(), 1);

        assert!(library.remove_song("s1").await.unwrap());

        assert!(library.playlist_songs("p1").await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_artist_merge_refreshes_album_and_song_caches() {
        let library = library().await;
        fixtures::exec_unchecked(
            library.pool(),
            "INSERT INTO artists (id, name) VALUES ('a1', 'Radiohead'), ('a2', 'radiohead');
             INSERT INTO albums (id, title, artist_id) VALUES ('al2', 'Kid A', 'a2');
             INSERT INTO songs (id, title, artist_id, album_id) VALUES ('s1', 'Idioteque', 'a2', 'al2')",
        )
        .await;
        library.albums().get_all().await.unwrap();
        library.songs().get_all().await.unwrap();

        let artists = library.all_artists().await.unwrap();
        assert_eq!(artists.len(), 1);

        let album = library.albums().get_by_id("al2").await.unwrap().unwrap();
        assert_eq!(album.artist_id.as_deref(), Some("a1"));
        let song = library.songs().get_by_id("s1").await.unwrap().unwrap();
        assert_eq!(song.artist_id.as_deref(), Some("a1"));

        let albums = library.artist_albums("a1").await.unwrap().unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].id, "al2");
    }

    #[tokio::test]
    async fn test_album_merge_refreshes_artist_album_lists() {
        let library = library().await;
        fixtures::exec_unchecked(
            library.pool(),
            "INSERT INTO artists (id, name) VALUES ('a1', 'Portishead');
             INSERT INTO albums (id, title, artist_id) VALUES ('al1', 'Dummy', 'a1'), ('al2', 'dummy', 'a1');
             INSERT INTO songs (id, title, artist_id, album_id) VALUES ('s1', 'Roads', 'a1', 'al2')",
        )
        .await;
        let artists = library.artists().get_all().await.unwrap();
        assert_eq!(artists[0].album_ids, vec!["al1", "al2"]);
        library.songs().get_all().await.unwrap();

        library.all_albums().await.unwrap();

        let albums = library.artist_albums("a1").await.unwrap().unwrap();
        let ids: Vec<&str> = albums.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["al1"]);
        let song = library.songs().get_by_id("s1").await.unwrap().unwrap();
        assert_eq!(song.album_id.as_deref(), Some("al1"));
    }

    #[tokio::test]
    async fn test_update_song_moves_between_albums() {
        let library = library().await;
        fixtures::exec_unchecked(
            library.pool(),
            "INSERT INTO artists (id, name) VALUES ('a1', 'Björk');
             INSERT INTO albums (id, title, artist_id) VALUES ('al1', 'Debut', 'a1'), ('al2', 'Post', 'a1');
             INSERT INTO songs (id, title, artist_id, album_id) VALUES ('s1', 'Army of Me', 'a1', 'al1')",
        )
        .await;
        assert_eq!(library.album_songs("al1").await.unwrap().unwrap().len(), 1);
        assert!(library.album_songs("al2").await.unwrap().unwrap().is_empty());

        let mut song = library.songs().get_by_id("s1").await.unwrap().unwrap();
        song.album_id = Some("al2".into());
        assert!(library.update_song(song).await.unwrap());

        assert!(library.album_songs("al1").await.unwrap().unwrap().is_empty());
        let moved = library.album_songs("al2").await.unwrap().unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].id, "s1");
    }

    #[tokio::test]
    async fn test_update_album_changes_artist() {
        let library = library().await;
        fixtures::exec_unchecked(
            library.pool(),
            "INSERT INTO artists (id, name) VALUES ('a1', 'Massive Attack'), ('a2', 'Tricky');
             INSERT INTO albums (id, title, artist_id) VALUES ('al1', 'Maxinquaye', 'a1')",
        )
        .await;
        assert_eq!(library.artist_albums("a1").await.unwrap().unwrap().len(), 1);
        assert!(library.artist_albums("a2").await.unwrap().unwrap().is_empty());

        let mut album = library.albums().get_by_id("al1").await.unwrap().unwrap();
        album.artist_id = Some("a2".into());
        assert!(library.update_album(album).await.unwrap());

        assert!(library.artist_albums("a1").await.unwrap().unwrap().is_empty());
        let albums = library.artist_albums("a2").await.unwrap().unwrap();
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].id, "al1");
    }

    #[tokio::test]
    async fn test_health_check_and_close() {
        let library = library().await;
        assert!(library.health_check().await);

        library.close().await;

        assert!(!library.health_check().await);
        assert!(library.pool_status().closed);
    }
}
