//! # Deduplicating Loader
//!
//! Full loads that merge rows colliding under a normalized identity
//! ("Radiohead" and "radiohead" inserted under different ids).
//!
//! ## One Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Deduplicating Load                                │
//! │                                                                         │
//! │  store.select_all()                                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  group by identity_key        "radiohead" → [a7, a3]                    │
//! │       │                       "portishead" → [a5]                       │
//! │       ▼                                                                 │
//! │  primary = smallest id        a3 keeps, a7 merges into it               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ONE TRANSACTION: merge_into(a7 → a3) for every duplicate               │
//! │       │           (reassign children, delete duplicate row)             │
//! │       ▼                                                                 │
//! │  re-read, cache.replace_all(survivors)                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every pass rescans the whole set; collisions can only be found that way.
//! A pass with no collisions writes nothing. The pass assumes nobody else
//! writes the same tables while it runs.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use melodia_core::validation::{album_identity_key, normalize_key};
use melodia_core::{Album, Artist, Entity};

use crate::backend::SqliteBackend;
use crate::cache::EntityCache;
use crate::error::DbResult;
use crate::repository::album::AlbumRepository;
use crate::repository::artist::ArtistRepository;
use crate::store::Store;
use crate::transaction::{Decision, TransactionRunner};

/// A store whose rows can be merged into one another.
#[async_trait]
pub trait MergeStore<T: Entity>: Store<T> {
    /// Normalized identity; rows with equal keys are the same real-world thing.
    /// `None` means the row never merges.
    fn identity_key(&self, entity: &T) -> Option<String>;

    /// Moves everything that references `duplicate_id` to `primary_id`, then
    /// deletes the duplicate row.
    ///
    /// ## Returns
    /// Number of dependent rows reassigned.
    async fn merge_into(
        &self,
        conn: &mut SqliteConnection,
        duplicate_id: &str,
        primary_id: &str,
    ) -> DbResult<u64>;
}

/// Outcome of one deduplicating pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupReport {
    /// Identity keys that had more than one row.
    pub groups: usize,
    /// Duplicate rows merged away.
    pub merged: usize,
    /// Dependent rows pointed at a primary.
    pub rows_reassigned: u64,
}

impl DedupReport {
    pub fn is_noop(&self) -> bool {
        self.merged == 0
    }
}

/// Loads an [`EntityCache`] through a merge pass.
pub struct DeduplicatingLoader<T: Entity, S: MergeStore<T>> {
    cache: Arc<EntityCache<T, S>>,
    runner: TransactionRunner<SqliteBackend>,
}

impl<T: Entity, S: MergeStore<T>> DeduplicatingLoader<T, S> {
    pub fn new(cache: Arc<EntityCache<T, S>>, runner: TransactionRunner<SqliteBackend>) -> Self {
        DeduplicatingLoader { cache, runner }
    }

    pub fn cache(&self) -> &Arc<EntityCache<T, S>> {
        &self.cache
    }

    /// Returns every surviving entity, ordered by id, after merging duplicates.
    ///
    /// Always rebuilds the cache from the merged set.
    pub async fn get_all(&self) -> DbResult<Vec<T>> {
        let (survivors, _) = self.load().await?;
        Ok(survivors)
    }

    /// Runs a pass and reports what it merged.
    pub async fn deduplicate(&self) -> DbResult<DedupReport> {
        let (_, report) = self.load().await?;
        Ok(report)
    }

    /// Runs a pass and returns both the survivors and the report.
    ///
    /// Only this loader's cache is rebuilt. Callers holding caches of related
    /// types must drop them when the report is not a no-op.
    pub async fn load(&self) -> DbResult<(Vec<T>, DedupReport)> {
        let store = Arc::clone(self.cache.store());
        let rows = store.select_all().await?;

        let mut groups: BTreeMap<String, Vec<&T>> = BTreeMap::new();
        for row in &rows {
            if let Some(key) = store.identity_key(row) {
                groups.entry(key).or_default().push(row);
            }
        }

        let mut report = DedupReport::default();
        let mut plan: Vec<(String, String)> = Vec::new();

        for (key, mut members) in groups {
            if members.len() < 2 {
                continue;
            }
            members.sort_by(|a, b| a.id().cmp(b.id()));
            let primary = members[0].id();

            debug!(kind = T::KIND, key = %key, primary, size = members.len(), "Duplicate group");
            report.groups += 1;
            for duplicate in &members[1..] {
                plan.push((duplicate.id().to_string(), primary.to_string()));
            }
        }

        if plan.is_empty() {
            self.cache.replace_all(rows.clone()).await;
            return Ok((rows, report));
        }

        report.merged = plan.len();
        let merge_store = Arc::clone(&store);
        let decision = self
            .runner
            .run(move |session| {
                Box::pin(async move {
                    let mut reassigned = 0;
                    for (duplicate, primary) in &plan {
                        reassigned += merge_store
                            .merge_into(session.connection(), duplicate, primary)
                            .await?;
                    }
                    Ok(Decision::Commit(reassigned))
                })
            })
            .await?;
        report.rows_reassigned = decision.into_inner();

        info!(
            kind = T::KIND,
            groups = report.groups,
            merged = report.merged,
            rows_reassigned = report.rows_reassigned,
            "Merged duplicate rows"
        );

        // Child lists changed; read the merged state back.
        let survivors = store.select_all().await?;
        self.cache.replace_all(survivors.clone()).await;

        Ok((survivors, report))
    }
}

// =============================================================================
// Merge Rules
// =============================================================================

/// Artists collide on case- and whitespace-insensitive name.
#[async_trait]
impl MergeStore<Artist> for ArtistRepository {
    fn identity_key(&self, artist: &Artist) -> Option<String> {
        Some(normalize_key(&artist.name))
    }

    async fn merge_into(
        &self,
        conn: &mut SqliteConnection,
        duplicate_id: &str,
        primary_id: &str,
    ) -> DbResult<u64> {
        let moved = ArtistRepository::reassign_children(conn, duplicate_id, primary_id).await?;
        ArtistRepository::delete_on(conn, duplicate_id).await?;
        Ok(moved)
    }
}

/// Albums collide on artist plus normalized title. Artist-less albums never do.
#[async_trait]
impl MergeStore<Album> for AlbumRepository {
    fn identity_key(&self, album: &Album) -> Option<String> {
        album_identity_key(album.artist_id.as_deref(), &album.title)
    }

    async fn merge_into(
        &self,
        conn: &mut SqliteConnection,
        duplicate_id: &str,
        primary_id: &str,
    ) -> DbResult<u64> {
        let moved = AlbumRepository::reassign_songs(conn, duplicate_id, primary_id).await?;
        AlbumRepository::delete_on(conn, duplicate_id).await?;
        Ok(moved)
    }
}
