//! Runtime wiring and the per-kind engine handle.
//!
//! Entity operations live in `entity.rs`, child operations in `child.rs` and
//! live snapshots in `subscription.rs`; all of them are methods on [`Engine`].

use crate::auth::{self, AdminCheck};
use crate::bus::NotificationBus;
use crate::error::{EngineError, Result};
use crate::ids::{IdSource, RandomIds, ROOT_ID_LEN};
use crate::kind::{AppKind, KindLimits};
use crate::model::Entity;
use crate::store::Store;
use crate::time::{SystemTimeSource, TimeSource};
use crate::validate;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Retention after logical expiry during which reads report `Expired`.
pub const GRACE_PERIOD_DAYS: i64 = 7;

/// Attempts at allocating a fresh ID before giving up.
pub(crate) const MAX_ID_ATTEMPTS: usize = 5;

/// Read-check-write rounds for updates without an expected version.
pub(crate) const MAX_UPDATE_ATTEMPTS: usize = 8;

/// Shared handles for every engine: store, bus, clock and ID source.
#[derive(Clone)]
pub struct Runtime {
    store: Arc<dyn Store>,
    bus: Arc<NotificationBus>,
    clock: Arc<dyn TimeSource>,
    ids: Arc<dyn IdSource>,
}

impl Runtime {
    pub fn new(store: Arc<dyn Store>, bus: Arc<NotificationBus>) -> Self {
        Self {
            store,
            bus,
            clock: Arc::new(SystemTimeSource),
            ids: Arc::new(RandomIds),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.ids = ids;
        self
    }

    /// Engine for one app kind.
    pub fn engine(&self, kind: AppKind) -> Engine {
        Engine {
            kind,
            limits: kind.limits(),
            store: self.store.clone(),
            bus: self.bus.clone(),
            clock: self.clock.clone(),
            ids: self.ids.clone(),
        }
    }

    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    /// Physically remove everything past its purge deadline.
    pub fn purge_expired(&self) -> Result<usize> {
        Ok(self.store.purge_expired(self.clock.now())?)
    }

    /// Probe the backing store.
    pub fn health(&self) -> Result<()> {
        Ok(self.store.ping()?)
    }
}

/// Engine bound to one app kind. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    pub(crate) kind: AppKind,
    pub(crate) limits: KindLimits,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) bus: Arc<NotificationBus>,
    pub(crate) clock: Arc<dyn TimeSource>,
    pub(crate) ids: Arc<dyn IdSource>,
}

impl Engine {
    pub fn kind(&self) -> AppKind {
        self.kind
    }

    pub fn limits(&self) -> KindLimits {
        self.limits
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn purge_deadline(expires_at: DateTime<Utc>) -> DateTime<Utc> {
        expires_at + Duration::days(GRACE_PERIOD_DAYS)
    }

    /// Load a root entity of this kind that is visible to readers.
    ///
    /// Entities of another kind are reported as `NotFound`.
    pub(crate) fn load_live(&self, id: &str) -> Result<Entity> {
        validate::id(id, ROOT_ID_LEN)?;
        let now = self.now();
        let entity = self
            .store
            .load_entity(id, now)?
            .filter(|entity| entity.kind == self.kind)
            .ok_or(EngineError::NotFound)?;
        if now > entity.expires_at {
            return Err(EngineError::Expired);
        }
        Ok(entity)
    }

    /// Load a live entity and check the admin token against it.
    pub(crate) fn authorize_admin(&self, id: &str, admin_token: &str) -> Result<Entity> {
        validate::token(admin_token)?;
        let entity = self.load_live(id)?;
        match auth::authorize(Some(entity), admin_token) {
            AdminCheck::Authorized(entity) => Ok(entity),
            AdminCheck::NotFoundOrUnauthorized => Err(EngineError::NotFound),
        }
    }

    pub(crate) fn publish(&self, entity_id: &str) {
        self.bus.publish(entity_id);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::store::MemoryStore;
    use crate::time::ManualTimeSource;

    pub(crate) fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    /// Runtime over an in-memory store with a manual clock.
    pub(crate) fn runtime() -> (Runtime, Arc<ManualTimeSource>) {
        let clock = Arc::new(ManualTimeSource::new(start()));
        let runtime = Runtime::new(Arc::new(MemoryStore::new()), Arc::new(NotificationBus::new()))
            .with_clock(clock.clone());
        (runtime, clock)
    }
}
