use std::sync::RwLock;

use tokio::sync::broadcast;
use tracing::debug;

use scast_protocol::Event;

/// Fans the authoritative running flag out to any number of observers.
///
/// Publish is fire-and-forget: a slow or departed subscriber never blocks
/// the publisher. The last published value is retained so new subscribers
/// can be brought up to date immediately. Subscribers unsubscribe by
/// dropping their receiver.
pub struct StatusBroker {
    tx: broadcast::Sender<Event>,
    last: RwLock<Option<bool>>,
}

impl StatusBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            last: RwLock::new(None),
        }
    }

    /// Subscribe to status changes. Returns the live receiver plus the
    /// last published status, if any, for catch-up.
    pub fn subscribe(&self) -> (broadcast::Receiver<Event>, Option<bool>) {
        // Receiver first: a publish landing between the two lines shows
        // up in the snapshot, the stream, or both; never in neither.
        let rx = self.tx.subscribe();
        let last = *self.last.read().unwrap_or_else(|e| e.into_inner());
        (rx, last)
    }

    /// Publish a status change to all current subscribers.
    pub fn publish(&self, running: bool) {
        *self.last.write().unwrap_or_else(|e| e.into_inner()) = Some(running);
        // Err means no live subscribers, which is fine.
        if self.tx.send(Event::StatusChanged { running }).is_err() {
            debug!(running, "status published with no subscribers");
        }
    }

    /// The last published status, if any.
    pub fn last(&self) -> Option<bool> {
        *self.last.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for StatusBroker {
    fn default() -> Self {
        Self::new(16)
    }
}
