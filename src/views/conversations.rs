//! The viewer's conversations, most recently active first.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::api::DashboardApi;
use crate::error::AppResult;
use crate::models::{Conversation, EventEnvelope, Id};
use crate::views::{Fold, Resync};

#[derive(Debug, Clone)]
pub struct ConversationList {
    viewer: Id,
    items: Vec<Conversation>,
    /// Messages already folded; a replay must not bump a stale id to the front.
    applied_messages: HashSet<Id>,
}

impl ConversationList {
    pub fn new(viewer: impl Into<Id>) -> Self {
        Self {
            viewer: viewer.into(),
            items: Vec::new(),
            applied_messages: HashSet::new(),
        }
    }

    pub fn viewer(&self) -> &str {
        &self.viewer
    }

    pub fn items(&self) -> &[Conversation] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id == id)
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|c| c.id == id)
    }

    fn insert_front(&mut self, conversation: Conversation) -> bool {
        if self.position(&conversation.id).is_some() {
            return false;
        }
        self.items.insert(0, conversation);
        true
    }

    /// Title comes from the event. Locally folded activity wins over the
    /// event's snapshot and the roster only grows.
    fn merge(&mut self, idx: usize, incoming: &Conversation) -> bool {
        let current = &self.items[idx];
        let mut next = incoming.clone();
        if current.last_message_id.is_some() {
            next.last_message_id = current.last_message_id.clone();
        }
        next.updated_at = next.updated_at.max(current.updated_at);
        for p in &current.participants {
            if !next.participants.contains(p) {
                next.participants.push(p.clone());
            }
        }
        if *current == next {
            return false;
        }
        self.items[idx] = next;
        true
    }

    pub fn replace_all(&mut self, mut conversations: Vec<Conversation>) {
        let mut seen = HashSet::new();
        conversations.retain(|c| seen.insert(c.id.clone()));
        self.applied_messages
            .extend(conversations.iter().filter_map(|c| c.last_message_id.clone()));
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        self.items = conversations;
    }
}

impl Fold for ConversationList {
    fn apply(&mut self, envelope: &EventEnvelope) -> bool {
        match envelope {
            EventEnvelope::NewConversation(c) if c.includes(&self.viewer) => self.insert_front(c.clone()),
            EventEnvelope::EditConversation(c) => match self.position(&c.id) {
                Some(idx) => self.merge(idx, c),
                None => false,
            },
            EventEnvelope::UsersAddedToConversation {
                conversation,
                new_user_ids,
            } => match self.position(&conversation.id) {
                Some(idx) => self.merge(idx, conversation),
                None if new_user_ids.contains(&self.viewer) => self.insert_front(conversation.clone()),
                None => false,
            },
            EventEnvelope::NewMessage(m) => {
                let Some(idx) = self.position(&m.conversation_id) else {
                    return false;
                };
                if !self.applied_messages.insert(m.id.clone()) {
                    return false;
                }
                let mut conversation = self.items.remove(idx);
                conversation.last_message_id = Some(m.id.clone());
                conversation.updated_at = conversation.updated_at.max(m.created_at);
                self.items.insert(0, conversation);
                true
            }
            _ => false,
        }
    }
}

pub struct ConversationListResync {
    pub api: Arc<dyn DashboardApi>,
}

#[async_trait]
impl Resync<ConversationList> for ConversationListResync {
    async fn resync(&self, view: &mut ConversationList) -> AppResult<()> {
        let conversations = self.api.list_conversations(None).await?;
        view.replace_all(conversations);
        Ok(())
    }
}
