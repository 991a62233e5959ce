use std::{collections::HashMap, sync::Mutex};

use data_model::PushFrame;
use tokio::sync::broadcast;
use tracing::trace;

pub const DEFAULT_CHANNEL: &str = "jobs";
const DEFAULT_CAPACITY: usize = 256;

/// Source of push notifications. Delivery is at-least-once and unordered;
/// subscribers must tolerate duplicates and lag.
pub trait PushChannel: Send + Sync {
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<PushFrame>;
}

/// In-process fan-out hub. A transport adapter (websocket, SSE) publishes
/// decoded frames into it.
pub struct BroadcastPushChannel {
    channels: Mutex<HashMap<String, broadcast::Sender<PushFrame>>>,
    capacity: usize,
}

impl Default for BroadcastPushChannel {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastPushChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<PushFrame> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Returns the number of subscribers that will see the frame.
    pub fn publish(&self, channel: &str, frame: PushFrame) -> usize {
        trace!(channel, kind = %frame.kind, "publishing push frame");
        self.sender(channel).send(frame).unwrap_or(0)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.sender(channel).receiver_count()
    }
}

impl PushChannel for BroadcastPushChannel {
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<PushFrame> {
        self.sender(channel).subscribe()
    }
}
