use libris_shared::LibraryEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// In-process fan-out of change notifications. Delivery is best-effort:
/// a mutation never fails because nobody is listening.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LibraryEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: impl Into<LibraryEvent>) {
        let event = event.into();
        let name = event.name();
        if self.tx.send(event).is_err() {
            debug!("No subscribers for {}", name);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
