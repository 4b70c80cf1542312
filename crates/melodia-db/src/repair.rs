//! # Integrity Repair
//!
//! One maintenance pass that finds and fixes every dangling cross-entity
//! reference, with the store's own foreign key checks switched off.
//!
//! ## Pass Phases
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Integrity Repair Pass                            │
//! │                                                                         │
//! │  NotStarted                                                             │
//! │      │  PRAGMA foreign_keys = OFF   (outside any transaction)           │
//! │      ▼                                                                  │
//! │  ConstraintsDisabled                                                    │
//! │      │  BEGIN                                                           │
//! │      ▼                                                                  │
//! │  Repairing                                                              │
//! │      │  song → album          detach the reference                      │
//! │      │  song / album → artist point at "Unknown Artist"                 │
//! │      │  playlist link → song  delete the link                           │
//! │      ▼                                                                  │
//! │  Committing ─── or, on any failure ───► RollingBack                     │
//! │      │                                      │                           │
//! │      ▼                                      ▼                           │
//! │  ConstraintsRestored   (PRAGMA foreign_keys = ON, both paths)           │
//! │      ▼                                                                  │
//! │  Done                                                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A pass over clean data writes nothing and reports zero fixes. The pass
//! assumes a quiescent snapshot: nobody else writes while it runs.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, info, warn};

use melodia_core::{Artist, SENTINEL_ARTIST_ID, SENTINEL_ARTIST_NAME};

use crate::backend::{Backend, SqliteBackend};
use crate::error::DbResult;
use crate::pool::PooledConnection;
use crate::repository::album::AlbumRepository;
use crate::repository::artist::ArtistRepository;
use crate::repository::playlist::PlaylistRepository;
use crate::repository::song::SongRepository;
use crate::transaction::{Decision, TransactionRunner};
use crate::LibraryPool;

/// Where a repair pass is (or stopped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RepairPhase {
    NotStarted,
    ConstraintsDisabled,
    Repairing,
    Committing,
    RollingBack,
    ConstraintsRestored,
    Done,
}

/// What one repair pass fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Songs whose album reference was cleared.
    pub albums_detached: u64,
    /// Songs pointed at the placeholder artist.
    pub song_artists_reassigned: u64,
    /// Albums pointed at the placeholder artist.
    pub album_artists_reassigned: u64,
    /// Playlist links to missing songs that were deleted.
    pub playlist_links_removed: u64,
    /// The placeholder artist, if any orphan needed one.
    pub sentinel_id: Option<String>,
    pub sentinel_created: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RepairReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        RepairReport {
            albums_detached: 0,
            song_artists_reassigned: 0,
            album_artists_reassigned: 0,
            playlist_links_removed: 0,
            sentinel_id: None,
            sentinel_created: false,
            started_at,
            finished_at: started_at,
        }
    }

    /// Dangling references fixed across every relationship.
    pub fn total_fixes(&self) -> u64 {
        self.albums_detached
            + self.song_artists_reassigned
            + self.album_artists_reassigned
            + self.playlist_links_removed
    }
}

/// Runs integrity repair passes over the library.
#[derive(Debug)]
pub struct IntegrityRepairer {
    pool: LibraryPool,
    runner: TransactionRunner<SqliteBackend>,
    last_phases: Mutex<Vec<RepairPhase>>,
}

impl IntegrityRepairer {
    pub fn new(pool: LibraryPool) -> Self {
        IntegrityRepairer {
            runner: TransactionRunner::new(pool.clone()),
            pool,
            last_phases: Mutex::new(vec![RepairPhase::NotStarted]),
        }
    }

    /// Phases the most recent pass went through, in order.
    pub fn last_phases(&self) -> Vec<RepairPhase> {
        self.last_phases.lock().clone()
    }

    /// Runs one repair pass.
    ///
    /// ## Returns
    /// The fixes made, or the error that rolled the whole pass back.
    /// Constraint checks are re-enabled before returning either way.
    pub async fn repair(&self) -> DbResult<RepairReport> {
        let mut phases = vec![RepairPhase::NotStarted];
        let started_at = Utc::now();

        let result = match self.pool.acquire().await {
            Ok(mut lease) => {
                let result = self.run_pass(&mut lease, &mut phases, started_at).await;
                self.pool.release(lease).await;
                result
            }
            Err(e) => Err(e),
        };

        debug!(?phases, "Repair pass phases");
        *self.last_phases.lock() = phases;

        match &result {
            Ok(report) => info!(
                fixes = report.total_fixes(),
                albums_detached = report.albums_detached,
                song_artists_reassigned = report.song_artists_reassigned,
                album_artists_reassigned = report.album_artists_reassigned,
                playlist_links_removed = report.playlist_links_removed,
                sentinel_created = report.sentinel_created,
                "Integrity repair finished"
            ),
            Err(e) => warn!(error = %e, "Integrity repair rolled back"),
        }

        result
    }

    async fn run_pass(
        &self,
        lease: &mut PooledConnection<SqliteBackend>,
        phases: &mut Vec<RepairPhase>,
        started_at: DateTime<Utc>,
    ) -> DbResult<RepairReport> {
        self.set_constraint_checks(lease, false).await?;
        phases.push(RepairPhase::ConstraintsDisabled);
        phases.push(RepairPhase::Repairing);

        let outcome = self
            .runner
            .run_on_connection(lease, move |session| {
                Box::pin(async move {
                    let report = repair_on(session.connection(), started_at).await?;
                    Ok(Decision::Commit(report))
                })
            })
            .await;

        phases.push(if outcome.is_ok() {
            RepairPhase::Committing
        } else {
            RepairPhase::RollingBack
        });

        let restored = self.set_constraint_checks(lease, true).await;
        match &restored {
            Ok(()) => phases.push(RepairPhase::ConstraintsRestored),
            Err(e) => {
                // Never hand a connection with checks off back to the pool.
                warn!(error = %e, "Could not re-enable constraint checks, discarding connection");
                lease.invalidate();
            }
        }
        phases.push(RepairPhase::Done);

        let mut report = outcome?.into_inner();
        restored?;
        report.finished_at = Utc::now();
        Ok(report)
    }

    async fn set_constraint_checks(
        &self,
        lease: &PooledConnection<SqliteBackend>,
        enabled: bool,
    ) -> DbResult<()> {
        let mut session = lease.session().await?;
        self.pool
            .backend()
            .set_constraint_checks(&mut session, enabled)
            .await
    }
}

/// Every repair step, in one open transaction.
async fn repair_on(
    conn: &mut SqliteConnection,
    started_at: DateTime<Utc>,
) -> DbResult<RepairReport> {
    let mut report = RepairReport::new(started_at);

    for song_id in SongRepository::find_dangling_album_refs(conn).await? {
        report.albums_detached += SongRepository::detach_album_reference(conn, &song_id).await?;
    }

    let orphan_songs = SongRepository::find_dangling_artist_refs(conn).await?;
    let orphan_albums = AlbumRepository::find_dangling_artist_refs(conn).await?;

    if !orphan_songs.is_empty() || !orphan_albums.is_empty() {
        let (sentinel_id, created) = resolve_sentinel(conn).await?;

        for song_id in &orphan_songs {
            report.song_artists_reassigned +=
                SongRepository::reassign_artist(conn, song_id, &sentinel_id).await?;
        }
        for album_id in &orphan_albums {
            report.album_artists_reassigned +=
                AlbumRepository::reassign_artist(conn, album_id, &sentinel_id).await?;
        }

        report.sentinel_id = Some(sentinel_id);
        report.sentinel_created = created;
    }

    report.playlist_links_removed = PlaylistRepository::delete_dangling_playlist_links(conn).await?;

    Ok(report)
}

/// Finds the placeholder artist, creating it under the reserved id if absent.
async fn resolve_sentinel(conn: &mut SqliteConnection) -> DbResult<(String, bool)> {
    if let Some(existing) = ArtistRepository::find_sentinel(conn).await? {
        debug!(id = %existing.id, "Reusing placeholder artist");
        return Ok((existing.id, false));
    }

    let sentinel = Artist::with_id(SENTINEL_ARTIST_ID, SENTINEL_ARTIST_NAME);
    ArtistRepository::insert_on(conn, &sentinel).await?;
    info!(id = SENTINEL_ARTIST_ID, "Created placeholder artist");
    Ok((sentinel.id, true))
}
