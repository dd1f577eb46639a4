//! In-process message bus
//!
//! Routes published messages to every matching subscriber within the same
//! process. Keeps a log of everything published so callers can inspect what
//! the router sent.

use super::{topic_matches, BusMessage, MessageBus, Subscription, SubscriptionId};
use crate::error::RouterResult;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

struct Subscriber {
    id: SubscriptionId,
    pattern: String,
    sender: mpsc::UnboundedSender<BusMessage>,
}

/// Broker living entirely in memory
pub struct InMemoryBus {
    subscribers: Mutex<Vec<Subscriber>>,
    published: Mutex<Vec<BusMessage>>,
    next_id: AtomicU64,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Every message published so far, oldest first
    pub fn published(&self) -> Vec<BusMessage> {
        self.published
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Messages published on exactly `topic`
    pub fn published_on(&self, topic: &str) -> Vec<BusMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    /// Number of live subscriptions registered with exactly this pattern
    pub fn active_subscriptions(&self, pattern: &str) -> usize {
        self.subscribers
            .lock()
            .map(|subs| subs.iter().filter(|s| s.pattern == pattern).count())
            .unwrap_or(0)
    }

    /// Total number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscribers.lock().map(|subs| subs.len()).unwrap_or(0)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> RouterResult<()> {
        let message = BusMessage::new(topic, payload);

        if let Ok(mut log) = self.published.lock() {
            log.push(message.clone());
        }

        if let Ok(mut subs) = self.subscribers.lock() {
            // Receivers dropped without unsubscribing are pruned here
            subs.retain(|s| {
                if !topic_matches(&s.pattern, topic) {
                    return true;
                }
                s.sender.send(message.clone()).is_ok()
            });
        }

        Ok(())
    }

    fn subscribe(&self, pattern: &str) -> RouterResult<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();

        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Subscriber {
                id,
                pattern: pattern.to_string(),
                sender,
            });
        }

        Ok(Subscription {
            id,
            pattern: pattern.to_string(),
            receiver,
        })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|s| s.id != id);
        }
    }
}
