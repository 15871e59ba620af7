use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-space broadcast hub for domain events. The notification, payment
/// and analytics collaborators subscribe here; a slow consumer only lags
/// its own channel.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a space. Creates the channel if needed.
    pub fn subscribe(&self, space_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(space_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, space_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&space_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a space is removed).
    pub fn remove(&self, space_id: &Ulid) {
        self.channels.remove(space_id);
    }
}
