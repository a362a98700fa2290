use std::sync::atomic::{AtomicU64, Ordering};

use blaster_core::EventSink;
use serde_json::{json, Value};
use tokio::sync::broadcast;

const BROADCAST_CAPACITY: usize = 256;

/// Fan-out events to all connected WS clients via tokio broadcast channel.
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
    seq: AtomicU64,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            seq: AtomicU64::new(0),
        }
    }

    /// New client subscribes to the broadcast stream.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Monotonically increasing sequence for event frames.
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBroadcaster {
    /// Push an event frame to all subscribers.
    /// Silently drops if no subscribers exist.
    fn emit(&self, event: &str, payload: Value) {
        let frame = json!({
            "type": "event",
            "event": event,
            "payload": payload,
            "seq": self.next_seq(),
        });
        let _ = self.tx.send(frame.to_string());
    }
}
