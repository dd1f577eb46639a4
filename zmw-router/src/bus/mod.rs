//! Publish/subscribe transport abstraction
//!
//! The router never manages broker connections itself. It only needs a bus
//! that can publish to hierarchical topics and deliver messages matching a
//! subscription pattern (MQTT-style `+` and `#` wildcards).
//!
//! - **Trait**: [`MessageBus`] - the seam a real MQTT client plugs into
//! - **Memory**: `memory.rs` - in-process broker used by tests and the CLI

pub mod memory;

pub use memory::InMemoryBus;

use crate::error::RouterResult;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Identifier handed out by [`MessageBus::subscribe`]
pub type SubscriptionId = u64;

/// A message delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// A live subscription. Messages matching `pattern` arrive on `receiver`
/// until the subscription is removed with [`MessageBus::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub pattern: String,
    pub receiver: mpsc::UnboundedReceiver<BusMessage>,
}

/// Minimal pub/sub surface the router depends on.
///
/// Delivery is assumed at-least-once. `subscribe` and `unsubscribe` are
/// synchronous so that cleanup can run from `Drop` guards.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload on a concrete topic
    async fn publish(&self, topic: &str, payload: &[u8]) -> RouterResult<()>;

    /// Register interest in every topic matching `pattern`
    fn subscribe(&self, pattern: &str) -> RouterResult<Subscription>;

    /// Remove a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// MQTT topic matching: `+` matches exactly one level, a trailing `#`
/// matches any number of remaining levels (including zero).
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_levels = pattern.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (pattern_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return pattern_levels.next().is_none(),
            (Some("+"), Some(_)) => continue,
            (Some(p), Some(t)) if p == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_wildcard() {
        assert!(topic_matches(
            "+/get_mqtt_description_reply",
            "zmw_lights/get_mqtt_description_reply"
        ));
        assert!(!topic_matches(
            "+/get_mqtt_description_reply",
            "a/b/get_mqtt_description_reply"
        ));
        assert!(!topic_matches("+/get_mqtt_description_reply", "zmw_lights/get_lights"));
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(topic_matches("zigbee2mqtt/#", "zigbee2mqtt/Kitchen/set"));
        assert!(topic_matches("zigbee2mqtt/#", "zigbee2mqtt"));
        assert!(!topic_matches("zigbee2mqtt/#", "zmw_lights/set"));
    }

    #[test]
    fn exact_topics() {
        assert!(topic_matches("zmw_sonos/ls_speakers_reply", "zmw_sonos/ls_speakers_reply"));
        assert!(!topic_matches("zmw_sonos/ls_speakers", "zmw_sonos/ls_speakers_reply"));
        assert!(!topic_matches("zmw_sonos", "zmw_sonos/ls_speakers"));
    }
}
