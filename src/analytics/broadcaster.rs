//! Push channel fanning live summaries out to admin clients.

use crate::model::AnalyticsSummary;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Message envelope sent over the analytics WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage<'a> {
    /// `snapshot` on connect, `summary` on every publish tick.
    pub r#type: &'a str,
    /// The summary payload.
    pub payload: &'a AnalyticsSummary,
}

/// Serialize an envelope; `None` only on serializer failure.
#[must_use]
pub fn envelope(kind: &str, payload: &AnalyticsSummary) -> Option<String> {
    serde_json::to_string(&PushMessage {
        r#type: kind,
        payload,
    })
    .ok()
}

/// A registered subscriber's receiving half.
#[derive(Debug)]
pub struct Subscription {
    /// Id to pass back to [`AnalyticsBroadcaster::unsubscribe`].
    pub id: u64,
    /// Messages queued for this subscriber.
    pub rx: mpsc::UnboundedReceiver<String>,
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

/// Fan-out registry of admin push subscribers.
///
/// Subscribers never send anything back; a closed channel is detected on
/// the next broadcast and the subscriber dropped.
#[derive(Default)]
pub struct AnalyticsBroadcaster {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for AnalyticsBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl AnalyticsBroadcaster {
    /// Create an empty broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and hand back its message stream.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.push(Subscriber { id, tx });
        info!(id, total = subscribers.len(), "analytics subscriber attached");
        Subscription { id, rx }
    }

    /// Remove a subscriber.
    pub fn unsubscribe(&self, id: u64) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| s.id != id);
        info!(id, total = subscribers.len(), "analytics subscriber detached");
    }

    /// Deliver a message to every live subscriber, dropping dead ones.
    /// Returns how many received it.
    pub fn broadcast(&self, message: &str) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| s.tx.send(message.to_string()).is_ok());
        let delivered = subscribers.len();
        debug!(delivered, "broadcast analytics message");
        delivered
    }

    /// Current subscriber count.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}
