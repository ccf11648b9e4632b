use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-provider broadcast of committed events, feeding the provider calendar stream.
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

    /// Subscribe to a provider's events. Creates the channel on first use.
    pub fn subscribe(&self, provider_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(provider_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// No-op if nobody is listening. Channels whose last receiver went away are dropped.
    pub fn send(&self, provider_id: Ulid, event: &Event) {
        let orphaned = match self.channels.get(&provider_id) {
            Some(sender) => sender.send(event.clone()).is_err(),
            None => false,
        };
        if orphaned {
            self.channels
                .remove_if(&provider_id, |_, sender| sender.receiver_count() == 0);
        }
    }

    pub fn listeners(&self, provider_id: &Ulid) -> usize {
        self.channels
            .get(provider_id)
            .map_or(0, |sender| sender.receiver_count())
    }
}
