use tokio::sync::broadcast;

use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::types::GameEvent;

/// Fans out state deltas to every live subscriber. Events are published
/// from inside the mutating critical sections, so successive updates to
/// the same tile always arrive in application order. A subscriber that
/// falls behind the channel capacity sees `Lagged` and is expected to
/// resync from a snapshot rather than replay.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<GameEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: GameEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
