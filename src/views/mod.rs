//! Local view state folded from the event stream.
//!
//! Every view filters the envelopes it cares about and applies them as an
//! idempotent upsert keyed by id, so folding a duplicate is a no-op.

pub mod consumer;
pub mod conversation;
pub mod conversations;
pub mod feed;
pub mod inbox;
pub mod posts;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::EventEnvelope;

pub use consumer::Consumer;
pub use conversation::{ConversationResync, ConversationView, ViewMessage};
pub use conversations::{ConversationList, ConversationListResync};
pub use feed::{ActivityFeed, ActivityItem};
pub use inbox::{InboxResync, MessageInbox};
pub use posts::{PostHistory, PostHistoryResync};

/// A reducer over envelopes.
pub trait Fold {
    /// Apply one envelope. Returns whether the view changed.
    fn apply(&mut self, envelope: &EventEnvelope) -> bool;
}

/// Reloads a view from the REST API after events may have been missed.
#[async_trait]
pub trait Resync<V>: Send + Sync + 'static {
    async fn resync(&self, view: &mut V) -> AppResult<()>;
}
