//! Per-user fan-out on the relay: one broadcast sender per connected user.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::models::{EventEnvelope, Id};
use crate::services::classifier::EventSink;

/// Envelopes a stream may fall behind before it is closed.
pub const USER_BUFFER: usize = 64;

/// Routes envelopes to the push streams of connected users.
#[derive(Clone, Default)]
pub struct EventHub {
    /// user id -> sender shared by all of that user's open streams.
    clients: Arc<RwLock<HashMap<Id, broadcast::Sender<Arc<EventEnvelope>>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the user's sender and return a receiver for one stream.
    pub async fn subscribe(&self, user_id: &str) -> broadcast::Receiver<Arc<EventEnvelope>> {
        let mut clients = self.clients.write().await;
        prune(&mut clients);
        let tx = clients
            .entry(user_id.to_string())
            .or_insert_with(|| broadcast::channel(USER_BUFFER).0);
        debug!(user_id = %user_id, streams = tx.receiver_count() + 1, "stream subscribed");
        tx.subscribe()
    }

    /// Send to every recipient with an open stream. Offline recipients are
    /// skipped. Returns how many users it reached.
    pub async fn broadcast(&self, recipients: &[Id], envelope: EventEnvelope) -> usize {
        let envelope = Arc::new(envelope);
        let mut delivered = 0;
        let mut stale = Vec::new();
        {
            let clients = self.clients.read().await;
            for user_id in recipients {
                if let Some(tx) = clients.get(user_id) {
                    match tx.send(Arc::clone(&envelope)) {
                        Ok(_) => delivered += 1,
                        Err(_) => stale.push(user_id.clone()),
                    }
                }
            }
        }
        if !stale.is_empty() {
            let mut clients = self.clients.write().await;
            for user_id in &stale {
                // a stream may have reconnected since the read lock was dropped
                if clients.get(user_id).is_some_and(|tx| tx.receiver_count() == 0) {
                    clients.remove(user_id);
                }
            }
        }
        info!(kind = %envelope.kind(), recipients = recipients.len(), delivered, "broadcast");
        delivered
    }

    /// Users with at least one open stream. Entries for closed streams are dropped.
    pub async fn connected_users(&self) -> Vec<Id> {
        let mut clients = self.clients.write().await;
        prune(&mut clients);
        let mut users: Vec<Id> = clients.keys().cloned().collect();
        users.sort();
        users
    }
}

fn prune(clients: &mut HashMap<Id, broadcast::Sender<Arc<EventEnvelope>>>) {
    let before = clients.len();
    clients.retain(|_, tx| tx.receiver_count() > 0);
    if clients.len() < before {
        debug!(pruned = before - clients.len(), "dropped closed streams");
    }
}

#[async_trait]
impl EventSink for EventHub {
    async fn send_to(&self, recipient: &str, envelope: EventEnvelope) {
        self.broadcast(&[recipient.to_string()], envelope).await;
    }
}
