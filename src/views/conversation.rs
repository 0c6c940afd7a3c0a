//! Messages of the one conversation the viewer has open.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::api::DashboardApi;
use crate::error::AppResult;
use crate::models::{Categorization, EventEnvelope, Id, Message};
use crate::views::{Fold, Resync};

#[derive(Debug, Clone, PartialEq)]
pub struct ViewMessage {
    pub message: Message,
    pub category: Option<Categorization>,
}

#[derive(Debug, Clone)]
pub struct ConversationView {
    conversation_id: Id,
    /// Arrival order.
    order: Vec<Id>,
    messages: HashMap<Id, ViewMessage>,
}

impl ConversationView {
    pub fn new(conversation_id: impl Into<Id>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            order: Vec::new(),
            messages: HashMap::new(),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn messages(&self) -> Vec<&ViewMessage> {
        self.order.iter().filter_map(|id| self.messages.get(id)).collect()
    }

    pub fn get(&self, message_id: &str) -> Option<&ViewMessage> {
        self.messages.get(message_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Insert or replace by id. A replaced message keeps its position and category.
    pub fn upsert(&mut self, message: Message) -> bool {
        match self.messages.get_mut(&message.id) {
            Some(existing) if existing.message == message => false,
            Some(existing) => {
                existing.message = message;
                true
            }
            None => {
                self.order.push(message.id.clone());
                self.messages.insert(
                    message.id.clone(),
                    ViewMessage {
                        message,
                        category: None,
                    },
                );
                true
            }
        }
    }

    /// Replace everything with an authoritative listing, oldest first.
    pub fn replace_all(&mut self, listing: impl IntoIterator<Item = (Message, Option<Categorization>)>) {
        self.order.clear();
        self.messages.clear();
        for (message, category) in listing {
            if message.conversation_id != self.conversation_id {
                continue;
            }
            let id = message.id.clone();
            if !self.messages.contains_key(&id) {
                self.order.push(id.clone());
            }
            self.messages.insert(id, ViewMessage { message, category });
        }
    }
}

impl Fold for ConversationView {
    fn apply(&mut self, envelope: &EventEnvelope) -> bool {
        match envelope {
            EventEnvelope::NewMessage(m) if m.conversation_id == self.conversation_id => {
                self.upsert(m.clone())
            }
            EventEnvelope::MessageCategorized {
                message_id,
                category,
                reasoning,
            } => match self.messages.get_mut(message_id) {
                Some(entry) => {
                    let next = Categorization {
                        category: *category,
                        reasoning: reasoning.clone(),
                    };
                    if entry.category.as_ref() == Some(&next) {
                        return false;
                    }
                    entry.category = Some(next);
                    true
                }
                // categorization for a message outside this conversation
                None => false,
            },
            _ => false,
        }
    }
}

/// Reload the open conversation with categories.
pub struct ConversationResync {
    pub api: Arc<dyn DashboardApi>,
}

#[async_trait]
impl Resync<ConversationView> for ConversationResync {
    async fn resync(&self, view: &mut ConversationView) -> AppResult<()> {
        let listing = self.api.get_categorized_messages(view.conversation_id()).await?;
        view.replace_all(listing.into_iter().map(|m| {
            let category = m.categorization();
            (m.message, category)
        }));
        Ok(())
    }
}
