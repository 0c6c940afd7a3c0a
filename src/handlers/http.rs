//! HTTP handlers: signed backend triggers and health.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::json;
use tracing::info;
use validator::Validate;

use crate::auth::JwtSecret;
use crate::error::AppError;
use crate::models::{BroadcastRequest, ClassifyRequest, DelegationSet, EventEnvelope, Id};
use crate::services::{ClassifierPipeline, EventHub, TriggerAuth};

/// Shared application state for the relay.
#[derive(Clone)]
pub struct AppState {
    pub hub: EventHub,
    pub classifier: Arc<ClassifierPipeline>,
    pub trigger_auth: TriggerAuth,
    pub jwt_secret: JwtSecret,
}

impl AppState {
    pub fn jwt_secret(&self) -> &JwtSecret {
        &self.jwt_secret
    }
    pub fn trigger_auth(&self) -> &TriggerAuth {
        &self.trigger_auth
    }
}

const HEADER_APP_KEY: &str = "x-app-key";
const HEADER_SIGNATURE: &str = "x-signature";

fn verify_trigger(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), AppError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    state
        .trigger_auth()
        .verify(header(HEADER_APP_KEY), header(HEADER_SIGNATURE), body)
}

/// Explicit recipients plus whoever the event itself names.
fn resolve_recipients(request: &BroadcastRequest, envelope: &EventEnvelope) -> Vec<Id> {
    let mut recipients = request.recipients.clone();
    recipients.extend(envelope.default_audience());
    if let EventEnvelope::NewPost(post) = envelope {
        let delegations = DelegationSet::from_grants(request.delegations.iter().cloned());
        recipients.extend(delegations.post_audience(post));
    }
    recipients.sort();
    recipients.dedup();
    recipients
}

/// POST /api/broadcast — push one envelope to its recipients' streams.
/// Requires `x-app-key` and `x-signature` (hex HMAC-SHA256 of the body).
pub async fn broadcast(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    verify_trigger(&state, &headers, &body)?;

    let request: BroadcastRequest = serde_json::from_slice(&body)?;
    let envelope = EventEnvelope::from_value(request.event.clone())?;
    let recipients = resolve_recipients(&request, &envelope);
    if recipients.is_empty() {
        return Err(AppError::Validation("event has no recipients".to_string()));
    }

    let kind = envelope.kind();
    let delivered = state.hub.broadcast(&recipients, envelope).await;

    Ok(Json(json!({
        "ok": true,
        "type": kind,
        "recipients": recipients.len(),
        "delivered": delivered
    })))
}

/// POST /api/classify — categorize a new message for every recipient but the sender.
/// Results arrive later as `messageCategorized` on each recipient's stream.
pub async fn classify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    verify_trigger(&state, &headers, &body)?;

    let request: ClassifyRequest = serde_json::from_slice(&body)?;
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let message_id = request.message.id.clone();
    let scheduled = state
        .classifier
        .classify_for_recipients(request.message, request.history, &request.participants)
        .len();
    info!(message_id = %message_id, scheduled, "classification requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "ok": true, "messageId": message_id, "scheduled": scheduled })),
    ))
}

/// GET /health — liveness probe.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "dashfeed",
            "connected_users": state.hub.connected_users().await.len()
        })),
    )
}
