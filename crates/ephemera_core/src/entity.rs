use crate::auth::hash_token;
use crate::engine::{Engine, MAX_ID_ATTEMPTS, MAX_UPDATE_ATTEMPTS};
use crate::error::{EngineError, Result};
use crate::ids::ROOT_ID_LEN;
use crate::model::{Created, Entity, FullState};
use crate::store::{BackendError, Swap};
use crate::time::truncate_to_seconds;
use crate::validate::{self, MAX_EXTEND_DAYS, MAX_ROOT_PAYLOAD_BYTES};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

impl Engine {
    /// Create a root entity. The returned admin token is never stored or
    /// shown again.
    pub fn create(&self, payload: &str, expires_at: Option<DateTime<Utc>>) -> Result<Created> {
        validate::payload(payload, MAX_ROOT_PAYLOAD_BYTES)?;
        let now = self.now();
        let expires_at = match expires_at.map(truncate_to_seconds) {
            Some(at) if at <= now => {
                return Err(EngineError::InvalidArgument(
                    "expires_at must be in the future".to_string(),
                ));
            }
            Some(at) if at > now + Duration::days(MAX_EXTEND_DAYS) => {
                return Err(EngineError::InvalidArgument(format!(
                    "expires_at must be at most {} days out",
                    MAX_EXTEND_DAYS
                )));
            }
            Some(at) => at,
            None => now + Duration::days(self.limits.default_expiry_days),
        };

        let admin_token = self.ids.admin_token();
        let admin_token_hash = hash_token(&admin_token);
        let purge_at = Self::purge_deadline(expires_at);

        for attempt in 1..=MAX_ID_ATTEMPTS {
            let entity = Entity {
                id: self.ids.public_id(ROOT_ID_LEN),
                kind: self.kind,
                payload: payload.to_string(),
                admin_token_hash: admin_token_hash.clone(),
                version: 1,
                created_at: now,
                updated_at: now,
                expires_at,
            };
            match self.store.insert_entity(&entity, purge_at) {
                Ok(()) => {
                    info!(kind = self.kind.as_str(), id = %entity.id, "Created entity");
                    return Ok(Created {
                        entity,
                        admin_token,
                    });
                }
                Err(BackendError::KeyExists) => {
                    warn!(kind = self.kind.as_str(), attempt, "Entity id collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::Internal(
            "could not allocate a unique entity id".to_string(),
        ))
    }

    /// Fetch a live root entity.
    pub fn get(&self, id: &str) -> Result<Entity> {
        self.load_live(id)
    }

    /// Replace the payload. With `expected_version` the write only applies if
    /// the stored version still matches; without it the engine writes against
    /// whatever version it reads.
    pub fn update(
        &self,
        id: &str,
        admin_token: &str,
        payload: &str,
        expected_version: Option<u64>,
    ) -> Result<Entity> {
        validate::payload(payload, MAX_ROOT_PAYLOAD_BYTES)?;
        let mut observed = self.authorize_admin(id, admin_token)?;

        if let Some(expected) = expected_version {
            if observed.version != expected {
                return Err(EngineError::Conflict {
                    current_version: observed.version,
                });
            }
            return match self
                .store
                .swap_entity_payload(id, expected, payload, self.now())?
            {
                Swap::Applied(entity) => Ok(self.updated(entity)),
                Swap::VersionMismatch { current } => Err(EngineError::Conflict {
                    current_version: current,
                }),
                Swap::Missing => Err(EngineError::NotFound),
            };
        }

        for _ in 0..MAX_UPDATE_ATTEMPTS {
            match self
                .store
                .swap_entity_payload(id, observed.version, payload, self.now())?
            {
                Swap::Applied(entity) => return Ok(self.updated(entity)),
                Swap::VersionMismatch { current } => {
                    debug!(id, current, "Lost update race, re-reading");
                    observed = self.load_live(id)?;
                }
                Swap::Missing => return Err(EngineError::NotFound),
            }
        }
        Err(EngineError::Conflict {
            current_version: observed.version,
        })
    }

    fn updated(&self, entity: Entity) -> Entity {
        debug!(id = %entity.id, version = entity.version, "Updated entity");
        self.publish(&entity.id);
        entity
    }

    /// Move the expiry to `now + days` and re-apply the retention deadline to
    /// the entity and all of its children.
    pub fn extend(&self, id: &str, admin_token: &str, days: i64) -> Result<Entity> {
        validate::extend_days(days)?;
        self.authorize_admin(id, admin_token)?;

        let now = self.now();
        let expires_at = now + Duration::days(days);
        let entity = self
            .store
            .set_entity_expiry(id, expires_at, Self::purge_deadline(expires_at), now)?
            .ok_or(EngineError::NotFound)?;
        info!(id, days, "Extended entity");
        self.publish(id);
        Ok(entity)
    }

    /// Remove the entity, its child index and every child in one batch.
    pub fn delete(&self, id: &str, admin_token: &str) -> Result<()> {
        self.authorize_admin(id, admin_token)?;
        if !self.store.delete_entity(id)? {
            return Err(EngineError::NotFound);
        }
        info!(kind = self.kind.as_str(), id, "Deleted entity");
        self.publish(id);
        Ok(())
    }

    /// Root entity plus its live children.
    pub fn snapshot(&self, id: &str) -> Result<FullState> {
        let entity = self.load_live(id)?;
        let children = self.store.list_children(id, self.now())?;
        Ok(FullState { entity, children })
    }
}
