//! Categorizer backed by an OpenAI-compatible `/chat/completions` endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{Categorization, Message, MessageCategory};
use crate::services::classifier::Categorizer;

const TRIAGE_PROMPT: &str = r#"You triage incoming direct messages for a creator's inbox.
You receive a JSON object with `currentMessage` (the message to classify) and
`messageHistory` (earlier messages of the same conversation, oldest first, possibly empty).
Use both: who said what, whether this is a reply, and what the message asks for.

Choose exactly one category:
- important: personal, likely needs a reply (close contacts, direct questions, ongoing threads)
- sponsorship: paid partnerships, brand deals, affiliate or advertising offers
- networking: peers or new contacts looking for unpaid collaboration or advice
- generalInquiry: neutral, non time-sensitive questions or requests for information
- spam: unsolicited, irrelevant, low-quality or malicious
- urgent: explicitly time-critical or an emergency; use sparingly

Reply with a single JSON object and nothing else:
{"reasoning": "<one sentence>", "category": "<category>"}"#;

pub struct HttpCategorizer {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpCategorizer {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatTurn<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Categorizer for HttpCategorizer {
    async fn categorize(&self, message: &Message, history: &[Message]) -> AppResult<Categorization> {
        let endpoint = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let input = json!({
            "currentMessage": {
                "id": message.id,
                "userId": message.sender_id,
                "conversationId": message.conversation_id,
                "content": message.text(),
                "createdAt": message.created_at,
            },
            "messageHistory": history
                .iter()
                .map(|m| json!({ "userId": m.sender_id, "content": m.text(), "createdAt": m.created_at }))
                .collect::<Vec<_>>(),
        });
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatTurn {
                    role: "system",
                    content: TRIAGE_PROMPT.to_string(),
                },
                ChatTurn {
                    role: "user",
                    content: input.to_string(),
                },
            ],
            temperature: 0.0,
            stream: false,
        };

        let mut request = self.client.post(&endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(%status, "categorizer response");

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AppError::Unauthorized);
        }
        if !status.is_success() {
            return Err(AppError::Upstream {
                status: status.as_u16(),
                message: text,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::Classifier("empty completion".into()))?;
        parse_categorization(&reply)
    }
}

#[derive(Deserialize)]
struct RawCategorization {
    #[serde(default)]
    reasoning: String,
    category: String,
}

/// Extract `{reasoning, category}` from model text. Code fences and prose
/// around the object are ignored; the category must name one of the six.
pub fn parse_categorization(text: &str) -> AppResult<Categorization> {
    let start = text.find('{');
    let end = text.rfind('}');
    let object = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => return Err(AppError::Classifier(format!("no JSON object in reply: {}", text.trim()))),
    };
    let raw: RawCategorization = serde_json::from_str(object)
        .map_err(|e| AppError::Classifier(format!("malformed reply: {}", e)))?;
    let category = MessageCategory::from_label(&raw.category)
        .ok_or_else(|| AppError::Classifier(format!("unknown category: {}", raw.category)))?;
    Ok(Categorization {
        category,
        reasoning: raw.reasoning,
    })
}
