//! GET /api/events — the per-user push stream.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::handlers::http::AppState;
use crate::middleware::SessionUser;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Streams every envelope addressed to the session's user as
/// `data: {"type": .., "data": ..}` frames. A stream that falls behind its
/// buffer is closed so the client reconnects and re-fetches what it missed.
pub async fn events_handler(
    State(state): State<AppState>,
    SessionUser(user_id): SessionUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream_id = Uuid::new_v4();
    let rx = state.hub.subscribe(&user_id).await;
    info!(user_id = %user_id, %stream_id, "push stream opened");

    let frames = stream::unfold(rx, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => match Event::default().json_data(envelope.as_ref()) {
                    Ok(event) => return Some((Ok(event), rx)),
                    Err(e) => warn!(%stream_id, error = %e, "failed to encode envelope"),
                },
                Err(RecvError::Lagged(missed)) => {
                    warn!(%stream_id, missed, "push stream lagged, closing");
                    return None;
                }
                Err(RecvError::Closed) => {
                    info!(%stream_id, "push stream closed");
                    return None;
                }
            }
        }
    });

    Sse::new(frames).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("keep-alive"))
}
