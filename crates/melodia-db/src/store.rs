//! # Store Capability
//!
//! Per-entity CRUD surface the caches are written against. The SQLite
//! repositories implement it; tests substitute in-memory doubles.

use async_trait::async_trait;
use melodia_core::Entity;

use crate::error::DbResult;

/// Single-row operations for one entity type.
///
/// ## Semantics
/// - A missing row is a normal outcome: `select_by_id` returns `None`,
///   `update`/`delete` return `Ok(false)`
/// - `select_all` returns rows ordered by id
/// - Errors are reserved for constraint violations and store failures
#[async_trait]
pub trait Store<T: Entity>: Send + Sync + 'static {
    /// Inserts a new row. `Ok(true)` once the row is persisted.
    async fn insert(&self, entity: &T) -> DbResult<bool>;

    async fn select_by_id(&self, id: &str) -> DbResult<Option<T>>;

    async fn select_all(&self) -> DbResult<Vec<T>>;

    /// Overwrites an existing row. `Ok(false)` if there is none.
    async fn update(&self, entity: &T) -> DbResult<bool>;

    /// Deletes a row. `Ok(false)` if there is none.
    async fn delete(&self, id: &str) -> DbResult<bool>;
}

