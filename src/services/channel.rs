//! Push channel client: one long-lived SSE connection per session, parsed
//! envelopes republished to the local [`SubscriptionRegistry`] in arrival order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::models::EventEnvelope;
use crate::services::registry::SubscriptionRegistry;
use crate::services::sse::{SseDecoder, SseFrame};

pub const SESSION_COOKIE: &str = "session";

pub type ByteStream = BoxStream<'static, AppResult<Vec<u8>>>;

/// Opens the raw byte stream of the push channel.
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    async fn open(&self) -> AppResult<ByteStream>;
}

/// How the client proves its session.
#[derive(Debug, Clone)]
pub enum SessionCredentials {
    /// Sent as the `session` cookie, like a browser would.
    Cookie(String),
    Bearer(String),
    None,
}

impl SessionCredentials {
    pub(crate) fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            SessionCredentials::Cookie(token) => request.header(
                reqwest::header::COOKIE,
                format!("{}={}", SESSION_COOKIE, token),
            ),
            SessionCredentials::Bearer(token) => request.bearer_auth(token),
            SessionCredentials::None => request,
        }
    }
}

/// `GET <events url>` with `Accept: text/event-stream`.
pub struct HttpPushTransport {
    client: reqwest::Client,
    url: String,
    credentials: SessionCredentials,
}

impl HttpPushTransport {
    pub fn new(url: impl Into<String>, credentials: SessionCredentials) -> AppResult<Self> {
        // no overall timeout: the response body never ends on its own
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(1)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            credentials,
        })
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn open(&self) -> AppResult<ByteStream> {
        let request = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let response = self.credentials.apply(request).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(AppError::Unauthorized);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response
            .bytes_stream()
            .map_ok(|bytes| bytes.to_vec())
            .map_err(AppError::from)
            .boxed())
    }
}

/// Exponential backoff for reconnects.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Attempts after a drop before giving up; 0 disables reconnecting. A
    /// session that closes before sending any bytes counts as a failed attempt.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    pub fn never() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay)
    }
}

/// Observable liveness of the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    /// `generation` increases on each successful (re)connect for the lifetime of
    /// the channel, across `connect()` calls; consumers seeing it change should
    /// re-fetch authoritative state, events may have been missed.
    Live { generation: u64 },
    Reconnecting { attempt: u32 },
    /// Reconnect attempts exhausted. `connect()` starts over.
    Disconnected,
    /// Session rejected; needs re-authentication.
    Unauthorized,
}

impl ChannelState {
    pub fn is_live(&self) -> bool {
        matches!(self, ChannelState::Live { .. })
    }
}

struct Connection {
    id: u64,
    leases: usize,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    current: Option<Connection>,
    next_id: u64,
}

pub struct EventChannel {
    transport: Arc<dyn PushTransport>,
    registry: Arc<SubscriptionRegistry>,
    policy: ReconnectPolicy,
    state: watch::Sender<ChannelState>,
    generation: Arc<AtomicU64>,
    slot: Mutex<Slot>,
}

impl EventChannel {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        registry: Arc<SubscriptionRegistry>,
        policy: ReconnectPolicy,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ChannelState::Idle);
        Arc::new(Self {
            transport,
            registry,
            policy,
            state,
            generation: Arc::new(AtomicU64::new(0)),
            slot: Mutex::new(Slot::default()),
        })
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    /// Acquire the connection. Opens it on first use; while it is running,
    /// further calls share it. The connection closes when the last lease drops.
    pub fn connect(self: &Arc<Self>) -> ChannelLease {
        let mut slot = self.slot();
        if let Some(conn) = slot.current.as_mut() {
            if !conn.task.is_finished() {
                conn.leases += 1;
                debug!(conn_id = conn.id, leases = conn.leases, "sharing push connection");
                return ChannelLease {
                    channel: Arc::clone(self),
                    conn_id: conn.id,
                };
            }
        }

        slot.next_id += 1;
        let id = slot.next_id;
        let task = tokio::spawn(read_loop(
            Arc::clone(&self.transport),
            Arc::clone(&self.registry),
            self.policy.clone(),
            self.state.clone(),
            Arc::clone(&self.generation),
        ));
        if let Some(stale) = slot.current.replace(Connection {
            id,
            leases: 1,
            task,
        }) {
            stale.task.abort();
        }
        info!(conn_id = id, "push connection started");
        ChannelLease {
            channel: Arc::clone(self),
            conn_id: id,
        }
    }

    /// Close the connection regardless of outstanding leases.
    pub fn disconnect(&self) {
        let taken = self.slot().current.take();
        if let Some(conn) = taken {
            conn.task.abort();
            self.state.send_replace(ChannelState::Idle);
            info!(conn_id = conn.id, "push connection closed");
        }
    }

    fn release(&self, conn_id: u64) {
        let mut slot = self.slot();
        let last = match slot.current.as_mut() {
            Some(conn) if conn.id == conn_id => {
                conn.leases = conn.leases.saturating_sub(1);
                conn.leases == 0
            }
            _ => false,
        };
        if last {
            if let Some(conn) = slot.current.take() {
                conn.task.abort();
                // a finished loop already reported Disconnected/Unauthorized
                if !conn.task.is_finished() || self.state.borrow().is_live() {
                    self.state.send_replace(ChannelState::Idle);
                }
                info!(conn_id, "push connection released");
            }
        }
    }
}

/// Scoped hold on the push connection. Dropping it releases the connection on
/// every exit path.
pub struct ChannelLease {
    channel: Arc<EventChannel>,
    conn_id: u64,
}

impl ChannelLease {
    pub fn channel(&self) -> &Arc<EventChannel> {
        &self.channel
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.channel.release(self.conn_id);
    }
}

async fn read_loop(
    transport: Arc<dyn PushTransport>,
    registry: Arc<SubscriptionRegistry>,
    policy: ReconnectPolicy,
    state: watch::Sender<ChannelState>,
    generations: Arc<AtomicU64>,
) {
    let mut attempt = 0u32;
    state.send_replace(ChannelState::Connecting);

    loop {
        match transport.open().await {
            Ok(stream) => {
                let generation = generations.fetch_add(1, Ordering::SeqCst) + 1;
                state.send_replace(ChannelState::Live { generation });
                info!(generation, "push channel live");
                let (received, outcome) = pump(stream, &registry).await;
                match outcome {
                    Ok(()) => warn!(generation, received, "push channel closed by server"),
                    Err(e) => warn!(generation, received, error = %e, "push channel transport error"),
                }
                // only a session that carried data proves the server healthy
                if received > 0 {
                    attempt = 0;
                }
            }
            Err(AppError::Unauthorized) => {
                warn!("push channel rejected the session");
                state.send_replace(ChannelState::Unauthorized);
                return;
            }
            Err(e) => warn!(attempt, error = %e, "push channel connect failed"),
        }

        attempt += 1;
        if attempt > policy.max_attempts {
            warn!(attempts = attempt - 1, "push channel giving up");
            state.send_replace(ChannelState::Disconnected);
            return;
        }
        state.send_replace(ChannelState::Reconnecting { attempt });
        tokio::time::sleep(policy.delay(attempt)).await;
    }
}

/// Drain one connection's byte stream into the registry. Returns the number of
/// bytes received (keep-alive comments included) once the stream ends or errors.
#[instrument(skip_all)]
async fn pump(mut stream: ByteStream, registry: &SubscriptionRegistry) -> (usize, AppResult<()>) {
    let mut decoder = SseDecoder::new();
    let mut received = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return (received, Err(e)),
        };
        received += chunk.len();
        for frame in decoder.feed(&chunk) {
            deliver(&frame, registry);
        }
    }
    (received, Ok(()))
}

/// Parse a frame and publish it. A malformed frame is dropped, never fatal.
fn deliver(frame: &SseFrame, registry: &SubscriptionRegistry) {
    match EventEnvelope::parse(&frame.data) {
        Ok(envelope) => {
            debug!(kind = %envelope.kind(), "envelope received");
            registry.publish(envelope);
        }
        Err(e) => warn!(error = %e, data = %frame.data, "discarding malformed envelope"),
    }
}
