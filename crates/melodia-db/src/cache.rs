//! # Entity Cache
//!
//! Lazily-loaded, write-through, id-keyed view over one [`Store`].
//!
//! ## Read and Write Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         EntityCache<T>                                  │
//! │                                                                         │
//! │  get_all()                                                              │
//! │     loaded? ── yes ──► snapshot of the map                              │
//! │        │                                                                │
//! │        no ──► store.select_all() ──► replace map, loaded = true         │
//! │                                                                         │
//! │  get_by_id(id)                                                          │
//! │     in map? ── yes ──► clone                                            │
//! │        │                                                                │
//! │        no ──► store.select_by_id() ──► insert (loaded unchanged)        │
//! │                                                                         │
//! │  add / update / remove                                                  │
//! │     validate ──► store call ──► map changes only after the store        │
//! │                                 accepted the write                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//! - No TTL: the cache is as fresh as the last operation that touched it
//! - Writes made to the store behind the cache's back are seen only after
//!   `invalidate()` followed by `get_all()`
//! - Loads and writes hold the write lock for the whole store round-trip,
//!   so a reader never sees a half-loaded map

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use melodia_core::validation::validate_id;
use melodia_core::Entity;

use crate::error::DbResult;
use crate::store::Store;

struct CacheState<T> {
    entries: HashMap<String, T>,
    /// The full set was fetched since the last invalidation.
    loaded: bool,
}

impl<T: Entity> CacheState<T> {
    fn snapshot(&self) -> Vec<T> {
        let mut all: Vec<T> = self.entries.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.loaded = false;
    }
}

/// Write-through cache for one entity type.
///
/// ## Usage
/// ```rust,ignore
/// let artists = EntityCache::new(Arc::new(ArtistRepository::new(pool)));
///
/// artists.add(Artist::new("Radiohead")).await?;
/// let all = artists.get_all().await?;
/// ```
pub struct EntityCache<T: Entity, S: Store<T>> {
    store: Arc<S>,
    state: RwLock<CacheState<T>>,
}

impl<T: Entity, S: Store<T>> fmt::Debug for EntityCache<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCache")
            .field("kind", &T::KIND)
            .finish_non_exhaustive()
    }
}

impl<T: Entity, S: Store<T>> EntityCache<T, S> {
    pub fn new(store: Arc<S>) -> Self {
        EntityCache {
            store,
            state: RwLock::new(CacheState {
                entries: HashMap::new(),
                loaded: false,
            }),
        }
    }

    /// The store this cache writes through to.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns every entity, ordered by id.
    ///
    /// The first call (and the first after an invalidation) loads the full
    /// set from the store; later calls return the cached snapshot.
    pub async fn get_all(&self) -> DbResult<Vec<T>> {
        {
            let state = self.state.read().await;
            if state.loaded {
                return Ok(state.snapshot());
            }
        }

        let mut state = self.state.write().await;
        if !state.loaded {
            let rows = self.store.select_all().await?;
            state.entries = rows
                .into_iter()
                .map(|entity| (entity.id().to_string(), entity))
                .collect();
            state.loaded = true;
            info!(kind = T::KIND, count = state.entries.len(), "Cache loaded");
        }

        Ok(state.snapshot())
    }

    /// Looks up one entity, falling back to the store on a miss.
    ///
    /// A row found in the store is cached but does not mark the cache
    /// loaded. A missing row is `Ok(None)`.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<T>> {
        {
            let state = self.state.read().await;
            if let Some(entity) = state.entries.get(id) {
                return Ok(Some(entity.clone()));
            }
        }

        let mut state = self.state.write().await;
        if let Some(entity) = state.entries.get(id) {
            return Ok(Some(entity.clone()));
        }

        let found = self.store.select_by_id(id).await?;
        if let Some(entity) = &found {
            debug!(kind = T::KIND, id, "Cache miss filled from store");
            state.entries.insert(id.to_string(), entity.clone());
        }
        Ok(found)
    }

    /// Inserts through to the store; caches the entity only if the store
    /// accepted it.
    ///
    /// ## Returns
    /// * `Err(DbError::InvalidArgument)` - entity failed validation, store untouched
    /// * `Ok(false)` - the store reported no row written
    pub async fn add(&self, entity: T) -> DbResult<bool> {
        entity.validate()?;

        let mut state = self.state.write().await;
        let inserted = self.store.insert(&entity).await?;
        if inserted {
            debug!(kind = T::KIND, id = entity.id(), "Cached new entity");
            state.entries.insert(entity.id().to_string(), entity);
        }
        Ok(inserted)
    }

    /// Updates through to the store.
    ///
    /// ## Returns
    /// `Ok(false)` if the store has no such row; any stale entry is dropped.
    pub async fn update(&self, entity: T) -> DbResult<bool> {
        entity.validate()?;

        let mut state = self.state.write().await;
        let updated = self.store.update(&entity).await?;
        if updated {
            state.entries.insert(entity.id().to_string(), entity);
        } else {
            state.entries.remove(entity.id());
        }
        Ok(updated)
    }

    /// Deletes through to the store and drops the cached entry either way.
    ///
    /// ## Returns
    /// The store's answer. If the store call fails the cache is marked
    /// unloaded so the next `get_all` re-fetches, and the error propagates.
    pub async fn remove(&self, id: &str) -> DbResult<bool> {
        validate_id("id", id)?;

        let mut state = self.state.write().await;
        let result = self.store.delete(id).await;
        state.entries.remove(id);

        match &result {
            Ok(deleted) => debug!(kind = T::KIND, id, deleted, "Removed from cache"),
            Err(e) => {
                warn!(kind = T::KIND, id, error = %e, "Store delete failed, cache marked stale");
                state.loaded = false;
            }
        }
        result
    }

    /// Drops every entry; the next `get_all` reloads from the store.
    pub async fn invalidate(&self) {
        self.state.write().await.reset();
        debug!(kind = T::KIND, "Cache invalidated");
    }

    /// Same as [`invalidate`](Self::invalidate).
    pub async fn clear(&self) {
        self.invalidate().await;
    }

    /// Drops one entry and marks the cache unloaded.
    ///
    /// Used when an entity's child list changed in the store.
    pub async fn evict(&self, id: &str) {
        let mut state = self.state.write().await;
        state.entries.remove(id);
        state.loaded = false;
    }

    /// Swaps in a complete set as the loaded state.
    pub async fn replace_all(&self, entities: Vec<T>) {
        let mut state = self.state.write().await;
        state.entries = entities
            .into_iter()
            .map(|entity| (entity.id().to_string(), entity))
            .collect();
        state.loaded = true;
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.loaded
    }
}

// =============================================================================
// Test Store
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::DbError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory store with call counters and failure switches.
    pub struct MemoryStore<T> {
        pub rows: Mutex<BTreeMap<String, T>>,
        pub select_all_calls: AtomicUsize,
        pub select_by_id_calls: AtomicUsize,
        pub fail_writes: AtomicBool,
    }

    impl<T: Entity> MemoryStore<T> {
        pub fn with_rows(rows: impl IntoIterator<Item = T>) -> Self {
            let store = MemoryStore {
                rows: Mutex::new(BTreeMap::new()),
                select_all_calls: AtomicUsize::new(0),
                select_by_id_calls: AtomicUsize::new(0),
                fail_writes: AtomicBool::new(false),
            };
            for row in rows {
                store.rows.lock().insert(row.id().to_string(), row);
            }
            store
        }

        fn check_writable(&self) -> DbResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(DbError::QueryFailed("database is locked".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl<T: Entity> Store<T> for MemoryStore<T> {
        async fn insert(&self, entity: &T) -> DbResult<bool> {
            self.check_writable()?;
            let mut rows = self.rows.lock();
            if rows.contains_key(entity.id()) {
                return Err(DbError::duplicate("id", entity.id()));
            }
            rows.insert(entity.id().to_string(), entity.clone());
            Ok(true)
        }

        async fn select_by_id(&self, id: &str) -> DbResult<Option<T>> {
            self.select_by_id_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.lock().get(id).cloned())
        }

        async fn select_all(&self) -> DbResult<Vec<T>> {
            self.select_all_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.lock().values().cloned().collect())
        }

        async fn update(&self, entity: &T) -> DbResult<bool> {
            self.check_writable()?;
            let mut rows = self.rows.lock();
            match rows.get_mut(entity.id()) {
                Some(row) => {
                    *row = entity.clone();
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn delete(&self, id: &str) -> DbResult<bool> {
            self.check_writable()?;
            Ok(self.rows.lock().remove(id).is_some())
        }
    }
}
