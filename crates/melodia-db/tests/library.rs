//! End-to-end behaviour of a library on a real database file.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tempfile::TempDir;

use melodia_core::{Album, Artist, Entity, Song, SENTINEL_ARTIST_NAME};
use melodia_db::{
    ConnectionPool, DbConfig, DbError, ErrorKind, Library, PoolOptions, SqliteBackend,
    TransactionRunner,
};

async fn open_library(max_connections: u32) -> (TempDir, Library) {
    let dir = tempfile::tempdir().unwrap();
    let config = DbConfig::new(dir.path().join("library.db")).max_connections(max_connections);
    let library = Library::open(config).await.unwrap();
    (dir, library)
}

/// Runs raw SQL with foreign keys off, for planting duplicates and orphans.
async fn plant(library: &Library, sql: &'static str) {
    library
        .pool()
        .with_connection(|session| {
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
    library.invalidate_all().await;
}

// =============================================================================
// Cache
// =============================================================================

#[tokio::test]
async fn test_interleaved_cache_writes_are_reflected_exactly_once() {
    let (_dir, library) = open_library(2).await;
    let cache = library.artists();
    let mut model: BTreeMap<String, String> = BTreeMap::new();

    // Fixed pseudo-random walk over a small id space.
    let mut seed: u64 = 0x5eed;
    for step in 0..200 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let id = format!("a{}", (seed >> 33) % 12);

        match (seed >> 40) % 4 {
            0 if !model.contains_key(&id) => {
                let name = format!("Artist {step}");
                assert!(cache.add(Artist::with_id(&id, &name)).await.unwrap());
                model.insert(id, name);
            }
            1 => {
                let found = cache.get_by_id(&id).await.unwrap();
                assert_eq!(found.map(|a| a.name), model.get(&id).cloned());
            }
            2 => {
                let removed = cache.remove(&id).await.unwrap();
                assert_eq!(removed, model.remove(&id).is_some());
            }
            _ => {
                let all = cache.get_all().await.unwrap();
                let seen: Vec<(String, String)> =
                    all.into_iter().map(|a| (a.id, a.name)).collect();
                let expected: Vec<(String, String)> =
                    model.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                assert_eq!(seen, expected, "step {step}");
            }
        }
    }

    let ids: Vec<String> = cache.get_all().await.unwrap().into_iter().map(|a| a.id).collect();
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(ids.len(), unique.len());
    assert_eq!(ids, model.keys().cloned().collect::<Vec<_>>());
}

#[tokio::test]
async fn test_rejected_write_never_reaches_store() {
    let (_dir, library) = open_library(1).await;

    let err = library.artists().add(Artist::with_id("", "Nameless")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = library.artists().remove("").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    assert!(library.artists().get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_rows_are_boolean_failures() {
    let (_dir, library) = open_library(1).await;

    assert!(library.songs().get_by_id("ghost").await.unwrap().is_none());
    assert!(!library.songs().remove("ghost").await.unwrap());
    assert!(!library
        .songs()
        .update(Song::with_id("ghost", "Nothing", "a1"))
        .await
        .unwrap());
}

// =============================================================================
// Pool and Transactions
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_never_share_a_lease() {
    let (_dir, library) = open_library(4).await;
    let pool = library.pool().clone();
    let leased: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));
    let peak = Arc::new(Mutex::new(0usize));

    let mut handles = Vec::new();
    for caller in 0..16 {
        let pool = pool.clone();
        let leased = Arc::clone(&leased);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            for _ in 0..5 {
                let lease = pool.acquire().await.unwrap();
                {
                    let mut held = leased.lock();
                    assert!(held.insert(lease.id()), "caller {caller} got a leased connection");
                    let mut peak = peak.lock();
                    *peak = (*peak).max(held.len());
                }

                {
                    let mut session = lease.session().await.unwrap();
                    sqlx::query("SELECT 1")
                        .execute(session.connection())
                        .await
                        .unwrap();
                }
                tokio::time::sleep(Duration::from_millis(2)).await;

                leased.lock().remove(&lease.id());
                pool.release(lease).await;
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert!(*peak.lock() <= 4);
    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert!(status.idle <= 4);
}

#[tokio::test]
async fn test_write_then_error_leaves_no_trace() {
    let (_dir, library) = open_library(2).await;
    let runner = TransactionRunner::new(library.pool().clone());

    let result = runner
        .run_in_transaction(|session| {
            Box::pin(async move {
                sqlx::query("INSERT INTO artists (id, name) VALUES ('a1', 'Ghost')")
                    .execute(session.connection())
                    .await?;
                Err(DbError::QueryFailed("work failed after writing".into()))
            })
        })
        .await;

    assert!(matches!(result, Err(DbError::QueryFailed(_))));
    assert!(library.artists().get_by_id("a1").await.unwrap().is_none());
    assert!(library.artists().get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_full_pool_fails_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let config = DbConfig::new(dir.path().join("library.db"))
        .max_connections(1)
        .acquire_timeout(Duration::from_millis(200));
    let library = Library::open(config).await.unwrap();

    let held = library.pool().acquire().await.unwrap();

    let started = Instant::now();
    let err = library.artists().get_all().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert!(started.elapsed() < Duration::from_secs(2));

    library.pool().release(held).await;
    assert!(library.artists().get_all().await.is_ok());
}

#[tokio::test]
async fn test_unreachable_store_fails_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let config = DbConfig::new(dir.path().join("no-such-dir").join("library.db"))
        .min_connections(0)
        .max_connections(1)
        .connect_timeout(Duration::from_secs(1))
        .acquire_timeout(Duration::from_millis(200));
    let backend = SqliteBackend::new(&config).unwrap();
    let pool = ConnectionPool::new(backend, PoolOptions::from(&config))
        .await
        .unwrap();

    let started = Instant::now();
    let err = pool.acquire().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert!(started.elapsed() < Duration::from_secs(2));

    // The failed connect gave its capacity back.
    assert_eq!(pool.status().in_use, 0);
    assert_eq!(
        pool.acquire().await.unwrap_err().kind(),
        ErrorKind::ResourceExhausted
    );
}

// =============================================================================
// Deduplication
// =============================================================================

#[tokio::test]
async fn test_case_duplicates_collapse_to_one_artist() {
    let (_dir, library) = open_library(2).await;
    plant(
        &library,
        "INSERT INTO artists (id, name) VALUES ('a2', 'radiohead'), ('a1', 'Radiohead');
         INSERT INTO albums (id, title, artist_id) VALUES
             ('al1', 'OK Computer', 'a1'),
             ('al2', 'Kid A', 'a2');",
    )
    .await;

    let artists = library.all_artists().await.unwrap();
    assert_eq!(artists.len(), 1);
    let survivor = &artists[0];
    assert_eq!(survivor.id, "a1");
    assert_eq!(survivor.album_ids, vec!["al1", "al2"]);

    for album in library.artist_albums("a1").await.unwrap().unwrap() {
        assert_eq!(album.artist_id.as_deref(), Some("a1"));
    }
    assert!(library.artists().get_by_id("a2").await.unwrap().is_none());

    let again = library.deduplicate().await.unwrap();
    assert!(again.is_noop());
    assert_eq!(library.all_artists().await.unwrap(), artists);
}

#[tokio::test]
async fn test_artist_merge_exposes_album_duplicates() {
    let (_dir, library) = open_library(2).await;
    plant(
        &library,
        "INSERT INTO artists (id, name) VALUES ('a1', 'Portishead'), ('a2', 'PORTISHEAD ');
         INSERT INTO albums (id, title, artist_id) VALUES ('al1', 'Dummy', 'a1'), ('al2', 'dummy', 'a2');
         INSERT INTO songs (id, title, artist_id, album_id) VALUES ('s1', 'Roads', 'a2', 'al2');",
    )
    .await;

    let report = library.deduplicate().await.unwrap();
    assert_eq!(report.artists.merged, 1);
    assert_eq!(report.albums.merged, 1);

    let song = library.songs().get_by_id("s1").await.unwrap().unwrap();
    assert_eq!(song.artist_id.as_deref(), Some("a1"));
    assert_eq!(song.album_id.as_deref(), Some("al1"));

    let songs = library.album_songs("al1").await.unwrap().unwrap();
    assert_eq!(songs.len(), 1);
}

// =============================================================================
// Repair
// =============================================================================

#[tokio::test]
async fn test_missing_album_reference_is_cleared_once() {
    let (_dir, library) = open_library(2).await;
    plant(
        &library,
        "INSERT INTO artists (id, name) VALUES ('a1', 'Björk');
         INSERT INTO songs (id, title, artist_id, album_id) VALUES ('s1', 'Hunter', 'a1', 'gone');",
    )
    .await;

    let first = library.repair().await.unwrap();
    assert_eq!(first.albums_detached, 1);
    assert_eq!(first.total_fixes(), 1);

    let song = library.songs().get_by_id("s1").await.unwrap().unwrap();
    assert_eq!(song.album_id, None);

    let second = library.repair().await.unwrap();
    assert_eq!(second.total_fixes(), 0);
}

#[tokio::test]
async fn test_orphans_share_one_placeholder_artist() {
    let (_dir, library) = open_library(2).await;
    plant(
        &library,
        "INSERT INTO songs (id, title, artist_id) VALUES ('s1', 'Lost', 'gone');",
    )
    .await;

    let first = library.repair().await.unwrap();
    assert!(first.sentinel_created);
    let sentinel_id = first.sentinel_id.clone().unwrap();
    let song = library.songs().get_by_id("s1").await.unwrap().unwrap();
    assert_eq!(song.artist_id.as_deref(), Some(sentinel_id.as_str()));

    plant(
        &library,
        "INSERT INTO songs (id, title, artist_id) VALUES ('s2', 'Also Lost', 'gone-too');",
    )
    .await;

    let second = library.repair().await.unwrap();
    assert!(!second.sentinel_created);
    assert_eq!(second.sentinel_id.as_deref(), Some(sentinel_id.as_str()));
    assert_eq!(second.song_artists_reassigned, 1);

    let placeholders: Vec<Artist> = library
        .artists()
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.name == SENTINEL_ARTIST_NAME)
        .collect();
    assert_eq!(placeholders.len(), 1);
    assert!(placeholders[0].is_sentinel());
    assert_eq!(placeholders[0].id(), sentinel_id);
}

#[tokio::test]
async fn test_repair_leaves_constraints_enforced() {
    let (_dir, library) = open_library(1).await;
    plant(
        &library,
        "INSERT INTO songs (id, title, album_id) VALUES ('s1', 'Lost', 'gone');",
    )
    .await;

    library.repair().await.unwrap();

    // Same single connection the repair pass used.
    let err = library
        .add_album(Album::with_id("al1", "Nowhere", "no-such-artist"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
}
