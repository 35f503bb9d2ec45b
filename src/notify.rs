use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, ItemId};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-item lifecycle events (LISTEN item_<id>).
pub struct NotifyHub {
    channels: DashMap<ItemId, broadcast::Sender<Event>>,
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

    /// Subscribe to events for an item. Creates the channel if needed.
    pub fn subscribe(&self, item_id: ItemId) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(item_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, item_id: ItemId, event: &Event) {
        if let Some(sender) = self.channels.get(&item_id) {
            let _ = sender.send(event.clone());
        }
    }
}
