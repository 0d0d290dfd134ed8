//! Backing stores.
//!
//! ## Logical layout
//!
//! - one record per root entity, keyed by its ID
//! - a child index per root entity (child IDs in insertion order)
//! - one record per child, keyed by `(parent_id, child_id)`
//!
//! Every record carries a purge deadline (`expires_at + grace`). Records past
//! their deadline are invisible to every read, and [`Store::purge_expired`]
//! reclaims them physically.
//!
//! Multi-record mutations (child insert, entity delete, expiry extension) are
//! applied as one atomic batch scoped to a single root entity.

mod memory;
mod schema;
mod sqlite;

pub use memory::MemoryStore;
pub use schema::init_database;
pub use sqlite::SqliteStore;

use crate::model::{Child, Entity};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// An insert collided with an existing key.
    #[error("key already exists")]
    KeyExists,
    /// A stored record could not be mapped to its typed form.
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("backing store failure: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        if err.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) {
            return BackendError::KeyExists;
        }
        match err {
            rusqlite::Error::FromSqlConversionFailure(col, _, inner) => {
                BackendError::Corrupt(format!("column {}: {}", col, inner))
            }
            other => BackendError::Backend(other.to_string()),
        }
    }
}

/// Outcome of a conditional (compare-and-swap) write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Swap<T> {
    /// The write was applied; carries the updated record.
    Applied(T),
    /// The stored version differed from the expected one.
    VersionMismatch { current: u64 },
    /// No live record under that key.
    Missing,
}

/// Outcome of an atomic child insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildInsert {
    Inserted,
    /// The parent already has `cap` live children.
    CapacityExceeded,
    /// The parent disappeared before the batch was applied.
    ParentMissing,
    /// The child ID, or the participant key, is already taken under this parent.
    DuplicateKey,
}

/// Backing store for root entities and their children.
///
/// Implementations must make every conditional write and every multi-record
/// batch atomic with respect to concurrent writers on the same root entity.
pub trait Store: Send + Sync {
    /// Insert a new root entity. Fails with [`BackendError::KeyExists`] on an ID collision.
    fn insert_entity(&self, entity: &Entity, purge_at: DateTime<Utc>) -> Result<(), BackendError>;

    fn load_entity(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Entity>, BackendError>;

    /// Replace the payload if the stored version equals `expected_version`,
    /// bumping the version by one.
    fn swap_entity_payload(
        &self,
        id: &str,
        expected_version: u64,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<Swap<Entity>, BackendError>;

    /// Set a new expiry and re-apply the purge deadline to the entity, its
    /// child index and every child.
    fn set_entity_expiry(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
        purge_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Entity>, BackendError>;

    /// Delete the entity, its child index and all children. Returns whether
    /// the entity existed.
    fn delete_entity(&self, id: &str) -> Result<bool, BackendError>;

    /// Insert a child under its parent, enforcing `cap` and copying the
    /// parent's purge deadline.
    fn insert_child(
        &self,
        child: &Child,
        cap: usize,
        now: DateTime<Utc>,
    ) -> Result<ChildInsert, BackendError>;

    fn load_child(
        &self,
        parent_id: &str,
        child_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Child>, BackendError>;

    fn find_participant_child(
        &self,
        parent_id: &str,
        participant: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Child>, BackendError>;

    /// Live children of a parent in insertion order.
    fn list_children(&self, parent_id: &str, now: DateTime<Utc>)
    -> Result<Vec<Child>, BackendError>;

    fn swap_child_payload(
        &self,
        parent_id: &str,
        child_id: &str,
        expected_version: u64,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<Swap<Child>, BackendError>;

    /// Set the unencrypted completion flag without touching the version.
    fn set_child_completed(
        &self,
        parent_id: &str,
        child_id: &str,
        completed: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Child>, BackendError>;

    /// Delete a child and its index entry. Returns whether it existed.
    fn delete_child(&self, parent_id: &str, child_id: &str) -> Result<bool, BackendError>;

    /// Physically remove every record past its purge deadline. Returns the
    /// number of root entities removed.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, BackendError>;

    /// Cheap liveness probe for health checks.
    fn ping(&self) -> Result<(), BackendError>;
}
