//! Drives one view from a registry subscription.

use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::services::channel::ChannelState;
use crate::services::registry::{Delivery, Subscription};
use crate::views::{Fold, Resync};

/// Folds deliveries into a shared view. Resyncs when it lagged behind the
/// registry or the channel reconnected.
pub struct Consumer<V> {
    name: &'static str,
    view: Arc<RwLock<V>>,
    subscription: Subscription,
    resync: Option<Arc<dyn Resync<V>>>,
    channel_state: Option<watch::Receiver<ChannelState>>,
    seen_generation: u64,
}

impl<V> Consumer<V>
where
    V: Fold + Send + Sync + 'static,
{
    pub fn new(name: &'static str, view: Arc<RwLock<V>>, subscription: Subscription) -> Self {
        Self {
            name,
            view,
            subscription,
            resync: None,
            channel_state: None,
            seen_generation: 0,
        }
    }

    pub fn with_resync(mut self, resync: Arc<dyn Resync<V>>) -> Self {
        self.resync = Some(resync);
        self
    }

    /// Resync on every reconnect after the first connection.
    pub fn watch_channel(mut self, state: watch::Receiver<ChannelState>) -> Self {
        if let ChannelState::Live { generation } = *state.borrow() {
            self.seen_generation = generation;
        }
        self.channel_state = Some(state);
        self
    }

    pub fn view(&self) -> &Arc<RwLock<V>> {
        &self.view
    }

    async fn resync(&self, reason: &str) {
        let Some(resync) = &self.resync else {
            debug!(consumer = self.name, reason, "no resync configured");
            return;
        };
        let mut view = self.view.write().await;
        match resync.resync(&mut view).await {
            Ok(()) => info!(consumer = self.name, reason, "view resynced"),
            Err(e) => warn!(consumer = self.name, reason, error = %e, "resync failed, keeping last state"),
        }
    }

    async fn handle(&self, delivery: Delivery) {
        match delivery {
            Delivery::Event(envelope) => {
                let changed = self.view.write().await.apply(&envelope);
                debug!(consumer = self.name, kind = %envelope.kind(), changed, "folded");
            }
            Delivery::Lagged { missed } => {
                warn!(consumer = self.name, missed, "consumer lagged behind the registry");
                self.resync("lagged").await;
            }
        }
    }

    /// Fold everything already published. Returns how many deliveries were handled.
    pub async fn catch_up(&mut self) -> usize {
        let ready = self.subscription.drain();
        let n = ready.len();
        for delivery in ready {
            self.handle(delivery).await;
        }
        n
    }

    /// Run until the registry goes away.
    pub async fn run(mut self) {
        loop {
            let watching = self.channel_state.is_some();
            tokio::select! {
                delivery = self.subscription.next() => match delivery {
                    Some(delivery) => self.handle(delivery).await,
                    None => return,
                },
                changed = changed(&mut self.channel_state), if watching => {
                    if changed.is_err() {
                        self.channel_state = None;
                        continue;
                    }
                    self.on_channel_change().await;
                }
            }
        }
    }

    async fn on_channel_change(&mut self) {
        let state = match &self.channel_state {
            Some(rx) => rx.borrow().clone(),
            None => return,
        };
        if let ChannelState::Live { generation } = state {
            if generation > self.seen_generation {
                let reconnect = self.seen_generation > 0 || generation > 1;
                self.seen_generation = generation;
                if reconnect {
                    self.resync("reconnected").await;
                }
            }
        }
    }
}

async fn changed(rx: &mut Option<watch::Receiver<ChannelState>>) -> Result<(), watch::error::RecvError> {
    match rx {
        Some(rx) => rx.changed().await,
        None => std::future::pending().await,
    }
}
