use tokio::sync::broadcast;

use hive_types::EventRecord;

/// Live mirror of the durable event log for in-process subscribers
/// (UI, tracker sync). Lossy by design: slow receivers may miss events,
/// the JSONL log is the source of truth.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventRecord>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(2048);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EventRecord) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
