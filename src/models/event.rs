//! Event envelope: the tagged union carried by the push channel.

use std::fmt;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppResult;
use crate::models::delegation::Delegation;
use crate::models::domain::{Conversation, Id, Message, MessageCategory, Post};

/// One real-time event. Encoded as `{"type": <kind>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum EventEnvelope {
    NewMessage(Message),
    NewConversation(Conversation),
    EditConversation(Conversation),
    UsersAddedToConversation {
        conversation: Conversation,
        #[serde(rename = "newUserIds")]
        new_user_ids: Vec<Id>,
    },
    MessageCategorized {
        #[serde(rename = "messageId")]
        message_id: Id,
        category: MessageCategory,
        reasoning: String,
    },
    NewPost(Post),
}

/// Discriminant of [`EventEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    NewMessage,
    NewConversation,
    EditConversation,
    UsersAddedToConversation,
    MessageCategorized,
    NewPost,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewMessage => "newMessage",
            EventKind::NewConversation => "newConversation",
            EventKind::EditConversation => "editConversation",
            EventKind::UsersAddedToConversation => "usersAddedToConversation",
            EventKind::MessageCategorized => "messageCategorized",
            EventKind::NewPost => "newPost",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lenient outer shape: `type`/`data` as the relay sends, `kind`/`payload` accepted too.
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(alias = "kind")]
    r#type: String,
    #[serde(alias = "payload", default)]
    data: serde_json::Value,
}

impl RawEnvelope {
    fn into_envelope(self) -> AppResult<EventEnvelope> {
        let tagged = serde_json::json!({ "type": self.r#type, "data": self.data });
        Ok(serde_json::from_value(tagged)?)
    }
}

impl EventEnvelope {
    /// Parse one frame's data into an envelope.
    pub fn parse(text: &str) -> AppResult<Self> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        raw.into_envelope()
    }

    pub fn from_value(value: serde_json::Value) -> AppResult<Self> {
        let raw: RawEnvelope = serde_json::from_value(value)?;
        raw.into_envelope()
    }

    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EventEnvelope::NewMessage(_) => EventKind::NewMessage,
            EventEnvelope::NewConversation(_) => EventKind::NewConversation,
            EventEnvelope::EditConversation(_) => EventKind::EditConversation,
            EventEnvelope::UsersAddedToConversation { .. } => EventKind::UsersAddedToConversation,
            EventEnvelope::MessageCategorized { .. } => EventKind::MessageCategorized,
            EventEnvelope::NewPost(_) => EventKind::NewPost,
        }
    }

    /// Conversation the event belongs to, if any.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            EventEnvelope::NewMessage(m) => Some(&m.conversation_id),
            EventEnvelope::NewConversation(c) | EventEnvelope::EditConversation(c) => Some(&c.id),
            EventEnvelope::UsersAddedToConversation { conversation, .. } => Some(&conversation.id),
            EventEnvelope::MessageCategorized { .. } | EventEnvelope::NewPost(_) => None,
        }
    }

    /// Users who should receive this event when the sender names no recipients.
    pub fn default_audience(&self) -> Vec<Id> {
        let mut audience: Vec<Id> = match self {
            EventEnvelope::NewConversation(c) | EventEnvelope::EditConversation(c) => {
                c.participants.clone()
            }
            EventEnvelope::UsersAddedToConversation {
                conversation,
                new_user_ids,
            } => conversation
                .participants
                .iter()
                .chain(new_user_ids.iter())
                .cloned()
                .collect(),
            EventEnvelope::NewPost(p) => vec![p.user_id.clone(), p.created_by.clone()],
            EventEnvelope::NewMessage(_) | EventEnvelope::MessageCategorized { .. } => Vec::new(),
        };
        audience.sort();
        audience.dedup();
        audience
    }
}

/// Payload for `POST /api/broadcast`.
#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastRequest {
    /// Explicit recipients, merged with the event's own audience.
    #[serde(default)]
    pub recipients: Vec<Id>,
    /// Envelope in either accepted encoding.
    pub event: serde_json::Value,
    /// Owner's delegations, used to widen `newPost` audiences.
    #[serde(default)]
    pub delegations: Vec<Delegation>,
}

/// Payload for `POST /api/classify`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ClassifyRequest {
    pub message: Message,
    /// Earlier messages of the conversation, oldest first.
    #[serde(default)]
    pub history: Vec<Message>,
    #[validate(length(min = 1))]
    pub participants: Vec<Id>,
}
