use super::{BackendError, ChildInsert, Store, Swap};
use crate::model::{Child, Entity};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::HashMap;

/// Everything stored for one root entity. All mutations on a bucket happen
/// under its map entry lock, so batches are atomic per entity without a
/// store-wide lock.
#[derive(Debug, Clone)]
struct Bucket {
    entity: Entity,
    purge_at: DateTime<Utc>,
    /// Child index in insertion order.
    order: Vec<String>,
    children: HashMap<String, StoredChild>,
}

#[derive(Debug, Clone)]
struct StoredChild {
    child: Child,
    purge_at: DateTime<Utc>,
}

impl Bucket {
    fn live_children(&self, now: DateTime<Utc>) -> impl Iterator<Item = &Child> {
        self.order.iter().filter_map(move |id| {
            self.children
                .get(id)
                .filter(|stored| stored.purge_at > now)
                .map(|stored| &stored.child)
        })
    }

    fn live_child_mut(&mut self, child_id: &str, now: DateTime<Utc>) -> Option<&mut Child> {
        self.children
            .get_mut(child_id)
            .filter(|stored| stored.purge_at > now)
            .map(|stored| &mut stored.child)
    }
}

/// In-memory store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryStore {
    buckets: DashMap<String, Bucket>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Whether anything at all is stored for `entity_id`, ignoring purge deadlines.
    pub fn contains(&self, entity_id: &str) -> bool {
        self.buckets.contains_key(entity_id)
    }

    /// Number of stored root entities, ignoring purge deadlines.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl Store for MemoryStore {
    fn insert_entity(&self, entity: &Entity, purge_at: DateTime<Utc>) -> Result<(), BackendError> {
        match self.buckets.entry(entity.id.clone()) {
            Entry::Occupied(_) => Err(BackendError::KeyExists),
            Entry::Vacant(slot) => {
                slot.insert(Bucket {
                    entity: entity.clone(),
                    purge_at,
                    order: Vec::new(),
                    children: HashMap::new(),
                });
                Ok(())
            }
        }
    }

    fn load_entity(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Entity>, BackendError> {
        Ok(self
            .buckets
            .get(id)
            .filter(|bucket| bucket.purge_at > now)
            .map(|bucket| bucket.entity.clone()))
    }

    fn swap_entity_payload(
        &self,
        id: &str,
        expected_version: u64,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<Swap<Entity>, BackendError> {
        let Some(mut bucket) = self.buckets.get_mut(id) else {
            return Ok(Swap::Missing);
        };
        if bucket.purge_at <= now {
            return Ok(Swap::Missing);
        }
        if bucket.entity.version != expected_version {
            return Ok(Swap::VersionMismatch {
                current: bucket.entity.version,
            });
        }
        bucket.entity.payload = payload.to_string();
        bucket.entity.version += 1;
        bucket.entity.updated_at = now;
        Ok(Swap::Applied(bucket.entity.clone()))
    }

    fn set_entity_expiry(
        &self,
        id: &str,
        expires_at: DateTime<Utc>,
        purge_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Entity>, BackendError> {
        let Some(mut bucket) = self.buckets.get_mut(id) else {
            return Ok(None);
        };
        if bucket.purge_at <= now {
            return Ok(None);
        }
        bucket.entity.expires_at = expires_at;
        bucket.entity.updated_at = now;
        bucket.purge_at = purge_at;
        for stored in bucket.children.values_mut() {
            stored.purge_at = purge_at;
        }
        Ok(Some(bucket.entity.clone()))
    }

    fn delete_entity(&self, id: &str) -> Result<bool, BackendError> {
        Ok(self.buckets.remove(id).is_some())
    }

    fn insert_child(
        &self,
        child: &Child,
        cap: usize,
        now: DateTime<Utc>,
    ) -> Result<ChildInsert, BackendError> {
        let Some(mut bucket) = self.buckets.get_mut(&child.parent_id) else {
            return Ok(ChildInsert::ParentMissing);
        };
        if bucket.purge_at <= now {
            return Ok(ChildInsert::ParentMissing);
        }
        if bucket.live_children(now).count() >= cap {
            return Ok(ChildInsert::CapacityExceeded);
        }
        let participant_taken = child.participant.as_ref().is_some_and(|key| {
            bucket
                .children
                .values()
                .any(|stored| stored.child.participant.as_ref() == Some(key))
        });
        if bucket.children.contains_key(&child.id) || participant_taken {
            return Ok(ChildInsert::DuplicateKey);
        }

        let purge_at = bucket.purge_at;
        bucket.order.push(child.id.clone());
        bucket.children.insert(
            child.id.clone(),
            StoredChild {
                child: child.clone(),
                purge_at,
            },
        );
        Ok(ChildInsert::Inserted)
    }

    fn load_child(
        &self,
        parent_id: &str,
        child_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Child>, BackendError> {
        Ok(self.buckets.get(parent_id).and_then(|bucket| {
            bucket
                .children
                .get(child_id)
                .filter(|stored| stored.purge_at > now)
                .map(|stored| stored.child.clone())
        }))
    }

    fn find_participant_child(
        &self,
        parent_id: &str,
        participant: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Child>, BackendError> {
        Ok(self.buckets.get(parent_id).and_then(|bucket| {
            bucket
                .live_children(now)
                .find(|child| child.participant.as_deref() == Some(participant))
                .cloned()
        }))
    }

    fn list_children(
        &self,
        parent_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Child>, BackendError> {
        Ok(self
            .buckets
            .get(parent_id)
            .map(|bucket| bucket.live_children(now).cloned().collect())
            .unwrap_or_default())
    }

    fn swap_child_payload(
        &self,
        parent_id: &str,
        child_id: &str,
        expected_version: u64,
        payload: &str,
        now: DateTime<Utc>,
    ) -> Result<Swap<Child>, BackendError> {
        let Some(mut bucket) = self.buckets.get_mut(parent_id) else {
            return Ok(Swap::Missing);
        };
        let Some(child) = bucket.live_child_mut(child_id, now) else {
            return Ok(Swap::Missing);
        };
        if child.version != expected_version {
            return Ok(Swap::VersionMismatch {
                current: child.version,
            });
        }
        child.payload = payload.to_string();
        child.version += 1;
        child.updated_at = now;
        Ok(Swap::Applied(child.clone()))
    }

    fn set_child_completed(
        &self,
        parent_id: &str,
        child_id: &str,
        completed: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<Child>, BackendError> {
        let Some(mut bucket) = self.buckets.get_mut(parent_id) else {
            return Ok(None);
        };
        Ok(bucket.live_child_mut(child_id, now).map(|child| {
            child.completed = completed;
            child.updated_at = now;
            child.clone()
        }))
    }

    fn delete_child(&self, parent_id: &str, child_id: &str) -> Result<bool, BackendError> {
        let Some(mut bucket) = self.buckets.get_mut(parent_id) else {
            return Ok(false);
        };
        bucket.order.retain(|id| id != child_id);
        Ok(bucket.children.remove(child_id).is_some())
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, BackendError> {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.purge_at > now);
        let purged = before.saturating_sub(self.buckets.len());

        for mut bucket in self.buckets.iter_mut() {
            let bucket = bucket.value_mut();
            bucket.children.retain(|_, stored| stored.purge_at > now);
            let children = &bucket.children;
            bucket.order.retain(|id| children.contains_key(id));
        }
        Ok(purged)
    }

    fn ping(&self) -> Result<(), BackendError> {
        Ok(())
    }
}
