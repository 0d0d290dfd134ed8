//! Per-entity change notifications.
//!
//! Each root entity gets its own broadcast channel, created on first
//! subscribe and dropped with its last listener. Notifications carry no
//! payload: receivers always re-read full state.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::debug;

/// Default number of undelivered notifications buffered per listener.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Channel key for an entity.
pub fn channel_name(entity_id: &str) -> String {
    format!("channel:{}", entity_id)
}

type Channels = Arc<DashMap<String, broadcast::Sender<()>>>;

/// In-process fan-out of "something changed" signals.
pub struct NotificationBus {
    channels: Channels,
    capacity: usize,
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Signal every listener of `entity_id`. Returns how many were reached.
    pub fn publish(&self, entity_id: &str) -> usize {
        let key = channel_name(entity_id);
        let reached = match self.channels.get(&key) {
            Some(sender) => sender.send(()).unwrap_or(0),
            None => 0,
        };
        debug!(channel = %key, listeners = reached, "Published change");
        reached
    }

    /// Register a listener. Dropping the returned handle deregisters it.
    pub fn subscribe(&self, entity_id: &str) -> BusSubscription {
        let key = channel_name(entity_id);
        let receiver = self
            .channels
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        BusSubscription {
            receiver,
            channels: self.channels.clone(),
            key,
        }
    }

    pub fn listener_count(&self, entity_id: &str) -> usize {
        self.channels
            .get(&channel_name(entity_id))
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of channels with at least one listener.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

/// A registered listener on one entity's channel.
pub struct BusSubscription {
    receiver: broadcast::Receiver<()>,
    channels: Channels,
    key: String,
}

impl BusSubscription {
    /// Wait for the next change. Any notifications already queued are folded
    /// into this one wake-up, and a lagged receiver counts as changed.
    ///
    /// Returns `false` once the channel can no longer deliver.
    pub async fn changed(&mut self) -> bool {
        match self.receiver.recv().await {
            Ok(()) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return false,
        }
        loop {
            match self.receiver.try_recv() {
                Ok(()) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        true
    }

    pub fn channel(&self) -> &str {
        &self.key
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        // Our receiver is still counted here; remove the channel if it is the last one.
        self.channels
            .remove_if(&self.key, |_, sender| sender.receiver_count() <= 1);
    }
}
