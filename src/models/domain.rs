//! Domain payloads carried by events: messages, conversations, posts, content blocks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Opaque identifier (UUIDs in production, anything stable in tests).
pub type Id = String;

/// The six triage categories a message can land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageCategory {
    #[serde(alias = "Important")]
    Important,
    #[serde(alias = "Sponsorship")]
    Sponsorship,
    #[serde(alias = "Networking")]
    Networking,
    #[serde(alias = "GeneralInquiry")]
    GeneralInquiry,
    #[serde(alias = "Spam")]
    Spam,
    #[serde(alias = "Urgent")]
    Urgent,
}

impl MessageCategory {
    pub const ALL: [MessageCategory; 6] = [
        MessageCategory::Important,
        MessageCategory::Sponsorship,
        MessageCategory::Networking,
        MessageCategory::GeneralInquiry,
        MessageCategory::Spam,
        MessageCategory::Urgent,
    ];

    /// Wire literal.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageCategory::Important => "important",
            MessageCategory::Sponsorship => "sponsorship",
            MessageCategory::Networking => "networking",
            MessageCategory::GeneralInquiry => "generalInquiry",
            MessageCategory::Spam => "spam",
            MessageCategory::Urgent => "urgent",
        }
    }

    /// Lenient match for labels written by people or models:
    /// `generalInquiry`, `General Inquiry`, `general_inquiry`, `URGENT` all resolve.
    pub fn from_label(label: &str) -> Option<Self> {
        let folded: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().to_ascii_lowercase() == folded)
    }
}

impl fmt::Display for MessageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| format!("unknown message category: {}", s))
    }
}

/// Result of the categorization collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Categorization {
    pub category: MessageCategory,
    pub reasoning: String,
}

/// Where the bytes of a media block live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum MediaSource {
    Url(String),
    Base64(String),
    Unknown,
}

impl<'de> Deserialize<'de> for MediaSourceField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Tagged(MediaSource),
            Bare(String),
        }

        Ok(MediaSourceField(match Raw::deserialize(deserializer)? {
            Raw::Tagged(source) => source,
            Raw::Bare(s) if s.starts_with("http://") || s.starts_with("https://") => {
                MediaSource::Url(s)
            }
            Raw::Bare(s) if s.is_empty() => MediaSource::Unknown,
            Raw::Bare(s) => MediaSource::Base64(s),
        }))
    }
}

/// Accepts either the tagged `{type, value}` form or a bare string for `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MediaSourceField(pub MediaSource);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Base64,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    Low,
    High,
    Auto,
}

/// Payload of a non-text content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaBlock {
    pub data: MediaSourceField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ContentFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ImageDetail>,
}

impl MediaBlock {
    pub fn source(&self) -> &MediaSource {
        &self.data.0
    }
}

/// One typed block of message or post content. The tag always matches the payload shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text { text: String },
    Image(MediaBlock),
    Audio(MediaBlock),
    Video(MediaBlock),
    Document(MediaBlock),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ContentBlock::Text { .. } => "text",
            ContentBlock::Image(_) => "image",
            ContentBlock::Audio(_) => "audio",
            ContentBlock::Video(_) => "video",
            ContentBlock::Document(_) => "document",
        }
    }
}

/// Content arrives as a block array, a single block, a JSON string encoding the
/// array (how the REST backend stores it), or plain text.
pub fn deserialize_content<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Blocks(Vec<ContentBlock>),
        Single(ContentBlock),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Blocks(blocks) => blocks,
        Raw::Single(block) => vec![block],
        Raw::Text(text) => match serde_json::from_str::<Vec<ContentBlock>>(&text) {
            Ok(blocks) => blocks,
            Err(_) => match serde_json::from_str::<ContentBlock>(&text) {
                Ok(block) => vec![block],
                Err(_) => vec![ContentBlock::Text { text }],
            },
        },
    })
}

/// Concatenated text of all text blocks.
pub fn content_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Id,
    pub conversation_id: Id,
    pub sender_id: Id,
    #[serde(deserialize_with = "deserialize_content")]
    pub content: Vec<ContentBlock>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn text(&self) -> String {
        content_text(&self.content)
    }
}

/// A message with the viewer's own categorization, as the REST API lists them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizedMessage {
    #[serde(flatten)]
    pub message: Message,
    #[serde(default)]
    pub category: Option<MessageCategory>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl CategorizedMessage {
    pub fn categorization(&self) -> Option<Categorization> {
        self.category.map(|category| Categorization {
            category,
            reasoning: self.reasoning.clone().unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Id,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub last_message_id: Option<Id>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub participants: Vec<Id>,
}

impl Conversation {
    pub fn includes(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Id,
    #[serde(deserialize_with = "deserialize_content")]
    pub content: Vec<ContentBlock>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    pub created_by: Id,
    pub user_id: Id,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}
