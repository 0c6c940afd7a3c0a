//! Terminal watcher: connects the push channel as a signed-in user and keeps
//! the inbox, conversation list and activity feed up to date.
//!
//! Usage: `dashfeed-watch <viewer-id>` with `SESSION_TOKEN` set.

use std::sync::Arc;

use dashfeed::api::{DashboardApi, HttpDashboardApi};
use dashfeed::config::Config;
use dashfeed::services::{
    ChannelState, EventChannel, HttpPushTransport, SessionCredentials, SubscriptionRegistry,
};
use dashfeed::views::{
    ActivityFeed, Consumer, ConversationList, ConversationListResync, InboxResync, MessageInbox, Resync,
};
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let viewer = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: dashfeed-watch <viewer-id>"))?;
    let credentials = match &config.session_token {
        Some(token) => SessionCredentials::Cookie(token.clone()),
        None => anyhow::bail!("SESSION_TOKEN is not set"),
    };

    let api: Arc<dyn DashboardApi> =
        Arc::new(HttpDashboardApi::new(config.api_base_url.clone(), credentials.clone())?);
    let registry = SubscriptionRegistry::new(config.event_log_capacity);
    let transport = HttpPushTransport::new(config.events_url.clone(), credentials)?;
    let channel = EventChannel::new(Arc::new(transport), registry.clone(), config.reconnect_policy());

    let inbox = Arc::new(RwLock::new(MessageInbox::new(viewer.clone())));
    let conversations = Arc::new(RwLock::new(ConversationList::new(viewer.clone())));
    let feed = Arc::new(RwLock::new(ActivityFeed::default()));

    // initial load; failures leave empty views that fill from the stream
    let inbox_resync = Arc::new(InboxResync { api: api.clone() });
    let list_resync = Arc::new(ConversationListResync { api: api.clone() });
    if let Err(e) = inbox_resync.resync(&mut *inbox.write().await).await {
        warn!(error = %e, "initial inbox load failed");
    }
    if let Err(e) = list_resync.resync(&mut *conversations.write().await).await {
        warn!(error = %e, "initial conversation load failed");
    }

    let tasks = vec![
        tokio::spawn(
            Consumer::new("inbox", inbox.clone(), registry.subscribe())
                .with_resync(inbox_resync)
                .watch_channel(channel.state())
                .run(),
        ),
        tokio::spawn(
            Consumer::new("conversations", conversations.clone(), registry.subscribe())
                .with_resync(list_resync)
                .watch_channel(channel.state())
                .run(),
        ),
        tokio::spawn(Consumer::new("feed", feed.clone(), registry.subscribe()).run()),
    ];

    let lease = channel.connect();
    let mut state = channel.state();
    let mut updates = registry.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow().clone();
                info!(state = ?current, "push channel");
                if matches!(current, ChannelState::Unauthorized | ChannelState::Disconnected) {
                    warn!("push channel is not live; restart after signing in again");
                    break;
                }
            }
            delivery = updates.next() => {
                if delivery.is_none() {
                    break;
                }
                let counts = inbox.read().await.counts();
                let latest = feed.read().await.items().next().map(|i| i.summary.clone());
                info!(?counts, conversations = conversations.read().await.items().len(), latest = ?latest, "views updated");
            }
        }
    }

    drop(lease);
    for task in tasks {
        task.abort();
    }
    Ok(())
}
