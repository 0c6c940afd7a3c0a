//! Bounded trailing buffer of recent activity, newest first.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::models::{content_text, EventEnvelope, EventKind, Id};
use crate::views::Fold;

pub const DEFAULT_FEED_CAPACITY: usize = 50;
const SUMMARY_CHARS: usize = 80;

#[derive(Debug, Clone, PartialEq)]
pub struct ActivityItem {
    pub kind: EventKind,
    /// Id of the message, conversation or post the item is about.
    pub subject_id: Id,
    pub summary: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ActivityFeed {
    capacity: usize,
    items: VecDeque<ActivityItem>,
}

impl Default for ActivityFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl ActivityFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            items: VecDeque::new(),
        }
    }

    pub fn items(&self) -> impl Iterator<Item = &ActivityItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= SUMMARY_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(SUMMARY_CHARS - 1).collect();
    cut.push('…');
    cut
}

fn describe(envelope: &EventEnvelope) -> (Id, String, DateTime<Utc>) {
    match envelope {
        EventEnvelope::NewMessage(m) => (
            m.id.clone(),
            format!("{}: {}", m.sender_id, truncate(&m.text())),
            m.created_at,
        ),
        EventEnvelope::NewConversation(c) => (
            c.id.clone(),
            format!("new conversation with {}", c.participants.join(", ")),
            c.created_at,
        ),
        EventEnvelope::EditConversation(c) => (
            c.id.clone(),
            format!("renamed to {}", c.title.as_deref().unwrap_or("(untitled)")),
            c.updated_at,
        ),
        EventEnvelope::UsersAddedToConversation {
            conversation,
            new_user_ids,
        } => (
            conversation.id.clone(),
            format!("{} joined", new_user_ids.join(", ")),
            conversation.updated_at,
        ),
        EventEnvelope::MessageCategorized {
            message_id,
            category,
            ..
        } => (message_id.clone(), format!("marked {}", category), Utc::now()),
        EventEnvelope::NewPost(p) => (
            p.id.clone(),
            format!("{} posted: {}", p.user_id, truncate(&content_text(&p.content))),
            p.created_at,
        ),
    }
}

impl Fold for ActivityFeed {
    fn apply(&mut self, envelope: &EventEnvelope) -> bool {
        let kind = envelope.kind();
        let (subject_id, summary, at) = describe(envelope);

        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|i| i.kind == kind && i.subject_id == subject_id)
        {
            if existing.summary == summary {
                return false;
            }
            existing.summary = summary;
            existing.at = at;
            return true;
        }

        // ordered by time so a replay of an evicted item falls off the tail
        let pos = self
            .items
            .iter()
            .position(|i| i.at <= at)
            .unwrap_or(self.items.len());
        if pos >= self.capacity {
            return false;
        }
        self.items.insert(
            pos,
            ActivityItem {
                kind,
                subject_id,
                summary,
                at,
            },
        );
        self.items.truncate(self.capacity);
        true
    }
}
