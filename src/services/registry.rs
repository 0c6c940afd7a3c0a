//! Subscription registry: one inbound event stream, many independent readers.
//!
//! Envelopes are appended to a bounded, insertion-ordered log. Every
//! subscriber owns a cursor into it and pulls at its own pace; `publish` never
//! waits on a reader. A reader that falls out of the retained window is told
//! how many envelopes it missed and resumes at the oldest one still held.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::models::EventEnvelope;
use crate::services::classifier::EventSink;

pub const DEFAULT_CAPACITY: usize = 512;

/// What a subscriber gets from its cursor.
#[derive(Debug, Clone)]
pub enum Delivery {
    Event(Arc<EventEnvelope>),
    /// Cursor fell behind the retained window; local state may have gaps.
    Lagged { missed: u64 },
}

struct Log {
    entries: VecDeque<Arc<EventEnvelope>>,
    /// Sequence number of `entries[0]`.
    first_seq: u64,
    capacity: usize,
}

impl Log {
    fn next_seq(&self) -> u64 {
        self.first_seq + self.entries.len() as u64
    }
}

pub struct SubscriptionRegistry {
    log: Mutex<Log>,
    head: watch::Sender<u64>,
}

impl SubscriptionRegistry {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (head, _) = watch::channel(0);
        Arc::new(Self {
            log: Mutex::new(Log {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                first_seq: 0,
                capacity: capacity.max(1),
            }),
            head,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an envelope and wake readers. Returns its sequence number.
    pub fn publish(&self, envelope: EventEnvelope) -> u64 {
        let kind = envelope.kind();
        let (seq, next) = {
            let mut log = self.lock();
            let seq = log.next_seq();
            log.entries.push_back(Arc::new(envelope));
            if log.entries.len() > log.capacity {
                log.entries.pop_front();
                log.first_seq += 1;
            }
            (seq, log.next_seq())
        };
        self.head.send_replace(next);
        trace!(seq, kind = %kind, "published");
        seq
    }

    /// Subscribe at the live head: only envelopes published from now on.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let cursor = self.lock().next_seq();
        self.subscription_at(cursor)
    }

    /// Subscribe at the start of the retained window.
    pub fn subscribe_from_start(self: &Arc<Self>) -> Subscription {
        let cursor = self.lock().first_seq;
        self.subscription_at(cursor)
    }

    fn subscription_at(self: &Arc<Self>, cursor: u64) -> Subscription {
        debug!(cursor, "new subscription");
        Subscription {
            registry: Arc::clone(self),
            cursor,
            head_rx: self.head.subscribe(),
        }
    }

    /// Envelopes currently retained.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sequence number the next publish will get.
    pub fn head(&self) -> u64 {
        self.lock().next_seq()
    }

    /// Copy of the retained window, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<EventEnvelope>> {
        self.lock().entries.iter().cloned().collect()
    }
}

#[async_trait]
impl EventSink for SubscriptionRegistry {
    /// The local registry belongs to one viewer; the recipient is implied.
    async fn send_to(&self, _recipient: &str, envelope: EventEnvelope) {
        self.publish(envelope);
    }
}

/// A reader's private cursor into the registry.
pub struct Subscription {
    registry: Arc<SubscriptionRegistry>,
    cursor: u64,
    head_rx: watch::Receiver<u64>,
}

impl Subscription {
    /// Next delivery if one is ready.
    pub fn try_next(&mut self) -> Option<Delivery> {
        let log = self.registry.lock();
        if self.cursor < log.first_seq {
            let missed = log.first_seq - self.cursor;
            self.cursor = log.first_seq;
            return Some(Delivery::Lagged { missed });
        }
        let idx = (self.cursor - log.first_seq) as usize;
        let envelope = log.entries.get(idx)?.clone();
        self.cursor += 1;
        Some(Delivery::Event(envelope))
    }

    /// Wait for the next delivery.
    pub async fn next(&mut self) -> Option<Delivery> {
        loop {
            if let Some(delivery) = self.try_next() {
                return Some(delivery);
            }
            if self.head_rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Everything ready right now.
    pub fn drain(&mut self) -> Vec<Delivery> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    pub fn position(&self) -> u64 {
        self.cursor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventKind, MessageCategory};

    fn categorized(id: &str) -> EventEnvelope {
        EventEnvelope::MessageCategorized {
            message_id: id.into(),
            category: MessageCategory::Spam,
            reasoning: String::new(),
        }
    }

    fn ids(deliveries: &[Delivery]) -> Vec<String> {
        deliveries
            .iter()
            .filter_map(|d| match d {
                Delivery::Event(e) => match e.as_ref() {
                    EventEnvelope::MessageCategorized { message_id, .. } => Some(message_id.clone()),
                    _ => None,
                },
                Delivery::Lagged { .. } => None,
            })
            .collect()
    }

    #[test]
    fn subscribers_see_publish_order_independently() {
        let registry = SubscriptionRegistry::new(16);
        let mut a = registry.subscribe();
        registry.publish(categorized("1"));
        let mut b = registry.subscribe();
        registry.publish(categorized("2"));
        registry.publish(categorized("3"));

        assert_eq!(ids(&a.drain()), vec!["1", "2", "3"]);
        assert_eq!(ids(&b.drain()), vec!["2", "3"]);
        // reading a does not move b
        registry.publish(categorized("4"));
        assert_eq!(ids(&a.drain()), vec!["4"]);
        assert_eq!(ids(&b.drain()), vec!["4"]);
    }

    #[test]
    fn duplicates_pass_through() {
        let registry = SubscriptionRegistry::new(16);
        let mut sub = registry.subscribe();
        registry.publish(categorized("1"));
        registry.publish(categorized("1"));
        assert_eq!(ids(&sub.drain()), vec!["1", "1"]);
    }

    #[test]
    fn slow_reader_gets_lagged_signal() {
        let registry = SubscriptionRegistry::new(2);
        let mut sub = registry.subscribe();
        for id in ["1", "2", "3", "4", "5"] {
            registry.publish(categorized(id));
        }
        let deliveries = sub.drain();
        assert!(matches!(deliveries[0], Delivery::Lagged { missed: 3 }));
        assert_eq!(ids(&deliveries), vec!["4", "5"]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.head(), 5);
    }

    #[test]
    fn replay_from_start_of_window() {
        let registry = SubscriptionRegistry::new(8);
        registry.publish(categorized("1"));
        registry.publish(categorized("2"));
        let mut late = registry.subscribe_from_start();
        assert_eq!(ids(&late.drain()), vec!["1", "2"]);
        assert_eq!(registry.snapshot()[0].kind(), EventKind::MessageCategorized);
    }

    #[tokio::test]
    async fn next_wakes_on_publish() {
        let registry = SubscriptionRegistry::new(8);
        let mut sub = registry.subscribe();
        let publisher = Arc::clone(&registry);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            publisher.publish(categorized("late"));
        });
        let delivery = tokio::time::timeout(std::time::Duration::from_secs(2), sub.next())
            .await
            .expect("subscriber was not woken")
            .expect("registry closed");
        assert_eq!(ids(&[delivery]), vec!["late"]);
        handle.await.unwrap();
    }
}
