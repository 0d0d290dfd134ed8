//! Live full-state snapshots for one root entity.

use crate::bus::BusSubscription;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::ids::ROOT_ID_LEN;
use crate::model::FullState;
use crate::validate;
use futures::Stream;
use serde::Serialize;
use tracing::{debug, warn};

/// One item of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SnapshotEvent {
    Snapshot { state: FullState },
    /// The entity expired or was deleted. Always the last event.
    Gone,
}

/// Stream of snapshots: the current state first, then one fresh state per
/// (coalesced) change notification.
///
/// Dropping it deregisters the bus listener.
pub struct LiveSnapshots {
    engine: Engine,
    entity_id: String,
    listener: BusSubscription,
    initial: Option<FullState>,
    finished: bool,
}

impl Engine {
    /// Open a live subscription. Fails if the entity is not currently visible.
    pub fn subscribe(&self, id: &str) -> Result<LiveSnapshots> {
        validate::id(id, ROOT_ID_LEN)?;
        // Listen before reading so a write racing the open still shows up.
        let listener = self.bus.subscribe(id);
        let initial = self.snapshot(id)?;
        debug!(channel = listener.channel(), "Opened live snapshots");
        Ok(LiveSnapshots {
            engine: self.clone(),
            entity_id: id.to_string(),
            listener,
            initial: Some(initial),
            finished: false,
        })
    }
}

impl LiveSnapshots {
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Next event, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<SnapshotEvent> {
        if self.finished {
            return None;
        }
        if let Some(state) = self.initial.take() {
            return Some(SnapshotEvent::Snapshot { state });
        }
        if !self.listener.changed().await {
            self.finished = true;
            return None;
        }
        match self.engine.snapshot(&self.entity_id) {
            Ok(state) => Some(SnapshotEvent::Snapshot { state }),
            Err(EngineError::NotFound) | Err(EngineError::Expired) => {
                debug!(id = %self.entity_id, "Entity gone, ending live snapshots");
                self.finished = true;
                Some(SnapshotEvent::Gone)
            }
            Err(e) => {
                warn!(id = %self.entity_id, "Snapshot refresh failed: {}", e);
                self.finished = true;
                None
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = SnapshotEvent> + Send {
        futures::stream::unfold(self, |mut live| async move {
            live.next().await.map(|event| (event, live))
        })
    }
}
