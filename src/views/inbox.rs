//! Incoming messages bucketed into category tabs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::api::DashboardApi;
use crate::error::AppResult;
use crate::models::{Categorization, EventEnvelope, Id, Message, MessageCategory};
use crate::views::{Fold, Resync};

#[derive(Debug, Clone)]
pub struct MessageInbox {
    viewer: Id,
    messages: HashMap<Id, Message>,
    categories: HashMap<Id, Categorization>,
    /// Newest first within each tab.
    tabs: HashMap<MessageCategory, Vec<Id>>,
    uncategorized: Vec<Id>,
}

impl MessageInbox {
    pub fn new(viewer: impl Into<Id>) -> Self {
        Self {
            viewer: viewer.into(),
            messages: HashMap::new(),
            categories: HashMap::new(),
            tabs: HashMap::new(),
            uncategorized: Vec::new(),
        }
    }

    pub fn tab(&self, category: MessageCategory) -> &[Id] {
        self.tabs.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn uncategorized(&self) -> &[Id] {
        &self.uncategorized
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.get(id)
    }

    pub fn categorization(&self, id: &str) -> Option<&Categorization> {
        self.categories.get(id)
    }

    /// Tab sizes in display order.
    pub fn counts(&self) -> Vec<(MessageCategory, usize)> {
        MessageCategory::ALL
            .into_iter()
            .map(|c| (c, self.tab(c).len()))
            .collect()
    }

    fn add_message(&mut self, message: Message) -> bool {
        if message.sender_id == self.viewer {
            return false;
        }
        let id = message.id.clone();
        let is_new = !self.messages.contains_key(&id);
        let changed = self.messages.get(&id) != Some(&message);
        self.messages.insert(id.clone(), message);
        if is_new && !self.categories.contains_key(&id) {
            self.uncategorized.insert(0, id);
        }
        changed
    }

    /// Move the message into exactly one tab.
    fn categorize(&mut self, message_id: &Id, next: Categorization) -> bool {
        let previous = self.categories.get(message_id).map(|c| c.category);
        if self.categories.get(message_id) == Some(&next) {
            return false;
        }
        match previous {
            Some(old) if old == next.category => {}
            Some(old) => {
                if let Some(ids) = self.tabs.get_mut(&old) {
                    ids.retain(|id| id != message_id);
                }
                self.tabs.entry(next.category).or_default().insert(0, message_id.clone());
            }
            None => {
                self.uncategorized.retain(|id| id != message_id);
                self.tabs.entry(next.category).or_default().insert(0, message_id.clone());
            }
        }
        self.categories.insert(message_id.clone(), next);
        true
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.categories.clear();
        self.tabs.clear();
        self.uncategorized.clear();
    }
}

impl Fold for MessageInbox {
    fn apply(&mut self, envelope: &EventEnvelope) -> bool {
        match envelope {
            EventEnvelope::NewMessage(m) => self.add_message(m.clone()),
            EventEnvelope::MessageCategorized {
                message_id,
                category,
                reasoning,
            } => self.categorize(
                message_id,
                Categorization {
                    category: *category,
                    reasoning: reasoning.clone(),
                },
            ),
            _ => false,
        }
    }
}

/// Rebuild the inbox from the categorized listings of the viewer's conversations.
pub struct InboxResync {
    pub api: Arc<dyn DashboardApi>,
}

#[async_trait]
impl Resync<MessageInbox> for InboxResync {
    async fn resync(&self, view: &mut MessageInbox) -> AppResult<()> {
        let conversations = self.api.list_conversations(None).await?;
        let mut listed = Vec::new();
        for conversation in conversations {
            listed.extend(self.api.get_categorized_messages(&conversation.id).await?);
        }
        listed.sort_by(|a, b| a.message.created_at.cmp(&b.message.created_at));

        view.clear();
        for entry in listed {
            let category = entry.categorization();
            let id = entry.message.id.clone();
            view.add_message(entry.message);
            if let Some(category) = category {
                view.categorize(&id, category);
            }
        }
        Ok(())
    }
}
