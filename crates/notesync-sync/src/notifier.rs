//! Broadcast notification service
//!
//! Fans engine events out to any number of subscribers (daemon log sink,
//! CLI progress output). Publishing never blocks; slow subscribers lag and
//! lose the oldest events.

use tokio::sync::broadcast;
use tracing::trace;

use notesync_core::ports::{INotificationService, SyncEvent};

const DEFAULT_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<SyncEvent>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl INotificationService for BroadcastNotifier {
    fn publish(&self, event: SyncEvent) {
        if self.tx.send(event).is_err() {
            trace!("No notification subscribers");
        }
    }
}
