//! Message classification: call the categorizer for a new message, record the
//! outcome per (message, recipient), and publish `messageCategorized`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::models::{Categorization, EventEnvelope, Id, Message};

/// Black-box categorization model.
#[async_trait]
pub trait Categorizer: Send + Sync + 'static {
    /// `history` is the conversation so far, oldest first.
    async fn categorize(&self, message: &Message, history: &[Message]) -> AppResult<Categorization>;
}

/// Where finished classifications are delivered.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn send_to(&self, recipient: &str, envelope: EventEnvelope);
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    /// Per categorizer call.
    pub timeout: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl ClassifierSettings {
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(10);
        self.base_backoff
            .saturating_mul(2u32.pow(exp))
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationState {
    Created,
    Classifying { attempt: u32 },
    Categorized(Categorization),
    Failed { reason: String },
}

impl ClassificationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClassificationState::Categorized(_) | ClassificationState::Failed { .. }
        )
    }
}

struct Tracked {
    /// Newest run started for this pair.
    latest_run: u64,
    state: ClassificationState,
}

struct Shared {
    categorizer: Arc<dyn Categorizer>,
    sink: Arc<dyn EventSink>,
    settings: ClassifierSettings,
    /// (message id, recipient) -> latest state
    states: RwLock<HashMap<(Id, Id), Tracked>>,
    runs: AtomicU64,
    shutdown: watch::Sender<bool>,
}

/// Runs classifications as independent tasks. Not tied to any push connection.
#[derive(Clone)]
pub struct ClassifierPipeline {
    shared: Arc<Shared>,
}

impl ClassifierPipeline {
    pub fn new(
        categorizer: Arc<dyn Categorizer>,
        sink: Arc<dyn EventSink>,
        settings: ClassifierSettings,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                categorizer,
                sink,
                settings,
                states: RwLock::new(HashMap::new()),
                runs: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    /// Classify `message` on behalf of `recipient`. The result goes to that
    /// recipient only. A second call for the same pair overwrites the first.
    pub fn classify(&self, message: Message, history: Vec<Message>, recipient: Id) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let run = shared.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let mut stop = shared.shutdown.subscribe();
        tokio::spawn(async move {
            let message_id = message.id.clone();
            tokio::select! {
                _ = stop.wait_for(|stopped| *stopped) => {
                    debug!(message_id = %message_id, "classification aborted by shutdown");
                }
                _ = shared.run(run, message, history, recipient) => {}
            }
        })
    }

    /// One classification per participant other than the sender.
    pub fn classify_for_recipients(
        &self,
        message: Message,
        history: Vec<Message>,
        participants: &[Id],
    ) -> Vec<JoinHandle<()>> {
        let mut recipients: Vec<&Id> = participants
            .iter()
            .filter(|p| **p != message.sender_id)
            .collect();
        recipients.sort();
        recipients.dedup();
        info!(
            message_id = %message.id,
            recipients = recipients.len(),
            "scheduling classification"
        );
        recipients
            .into_iter()
            .map(|r| self.classify(message.clone(), history.clone(), r.clone()))
            .collect()
    }

    pub async fn status(&self, message_id: &str, recipient: &str) -> Option<ClassificationState> {
        self.shared
            .states
            .read()
            .await
            .get(&(message_id.to_string(), recipient.to_string()))
            .map(|tracked| tracked.state.clone())
    }

    /// Abort every in-flight classification. Later calls to `classify` exit immediately.
    pub fn shutdown(&self) {
        self.shared.shutdown.send_replace(true);
        info!("classifier shut down");
    }
}

impl Shared {
    async fn start(&self, key: &(Id, Id), run: u64) {
        let mut states = self.states.write().await;
        match states.get_mut(key) {
            Some(tracked) if tracked.latest_run > run => {}
            Some(tracked) => {
                tracked.latest_run = run;
                tracked.state = ClassificationState::Created;
            }
            None => {
                states.insert(
                    key.clone(),
                    Tracked {
                        latest_run: run,
                        state: ClassificationState::Created,
                    },
                );
            }
        }
    }

    /// Progress and failure are recorded only by the newest run for the pair.
    /// A result is always recorded: the last one to arrive wins.
    async fn set_state(&self, key: &(Id, Id), run: u64, state: ClassificationState) {
        let mut states = self.states.write().await;
        let Some(tracked) = states.get_mut(key) else {
            return;
        };
        let is_result = matches!(state, ClassificationState::Categorized(_));
        if is_result || tracked.latest_run == run {
            tracked.state = state;
        } else {
            debug!(run, latest_run = tracked.latest_run, "stale classification state ignored");
        }
    }

    #[instrument(skip(self, message, history), fields(message_id = %message.id))]
    async fn run(&self, run: u64, message: Message, history: Vec<Message>, recipient: Id) {
        let key = (message.id.clone(), recipient.clone());
        self.start(&key, run).await;

        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;
        let failure = loop {
            attempt += 1;
            self.set_state(&key, run, ClassificationState::Classifying { attempt })
                .await;

            let outcome = tokio::time::timeout(
                self.settings.timeout,
                self.categorizer.categorize(&message, &history),
            )
            .await
            .unwrap_or(Err(AppError::Timeout(self.settings.timeout)));

            match outcome {
                Ok(result) => {
                    self.finish(&key, run, &recipient, result).await;
                    return;
                }
                Err(e) if attempt < max_attempts && worth_retrying(&e) => {
                    let delay = self.settings.backoff(attempt);
                    warn!(attempt, error = %e, ?delay, "classification attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break e,
            }
        };

        warn!(recipient = %recipient, attempts = attempt, error = %failure, "classification failed");
        self.set_state(
            &key,
            run,
            ClassificationState::Failed {
                reason: failure.to_string(),
            },
        )
        .await;
    }

    async fn finish(&self, key: &(Id, Id), run: u64, recipient: &str, result: Categorization) {
        info!(
            recipient = %recipient,
            category = %result.category,
            "message categorized"
        );
        self.set_state(key, run, ClassificationState::Categorized(result.clone()))
            .await;
        let envelope = EventEnvelope::MessageCategorized {
            message_id: key.0.clone(),
            category: result.category,
            reasoning: result.reasoning,
        };
        self.sink.send_to(recipient, envelope).await;
    }
}

/// Model replies that name no category are worth another try; auth failures are not.
fn worth_retrying(e: &AppError) -> bool {
    e.is_retryable() || matches!(e, AppError::Classifier(_))
}
