//! Command dispatcher
//!
//! Turns a model completion into a bus message. Commands whose service
//! announces `<command>_reply` are request/reply: the dispatcher subscribes to
//! the reply topic, publishes, and waits up to `reply_timeout` for the
//! answer. Everything else is fire-and-forget.
//!
//! Outstanding waits live in a correlation table keyed by reply topic. An
//! entry is inserted before the command is published and removed by a drop
//! guard, so a late reply can never reach a later call on the same topic.

use crate::bus::{MessageBus, SubscriptionId};
use crate::error::{RouterError, RouterResult};
use crate::grammar::FALLBACK_SENTINEL;
use crate::registry::RegistrySnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default wait for a correlated reply
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// What the model asked for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub service: String,
    pub command: String,
    #[serde(default)]
    pub args: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The model answered with the fallback sentinel
    NoMatch,
    /// Published, nothing to wait for
    Dispatched { service: String, command: String },
    /// Published and answered
    Replied {
        service: String,
        command: String,
        reply: JsonValue,
    },
}

/// Decode a completion. `Ok(None)` is the fallback sentinel.
pub fn parse_completion(completion: &str) -> RouterResult<Option<ModelSelection>> {
    if completion.trim() == FALLBACK_SENTINEL {
        return Ok(None);
    }
    serde_json::from_str::<ModelSelection>(completion)
        .map(Some)
        .map_err(|_| RouterError::InvalidModelOutput {
            raw: completion.to_string(),
        })
}

/// Reply payloads are JSON when they parse, opaque text otherwise
pub fn decode_reply(payload: &[u8]) -> JsonValue {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(payload).into_owned()))
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingReply {
    pub service: String,
    pub command: String,
    pub subscription_id: SubscriptionId,
    pub registered_at: DateTime<Utc>,
}

type PendingTable = Arc<Mutex<HashMap<String, PendingReply>>>;

/// Removes the correlation entry and the one-shot subscription however the
/// wait ends, including cancellation of the calling future.
struct PendingGuard {
    bus: Arc<dyn MessageBus>,
    pending: PendingTable,
    reply_topic: String,
    subscription_id: SubscriptionId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscription_id);
        if let Ok(mut table) = self.pending.lock() {
            table.remove(&self.reply_topic);
        }
        debug!("Released reply subscription on {}", self.reply_topic);
    }
}

pub struct CommandDispatcher {
    bus: Arc<dyn MessageBus>,
    reply_timeout: Duration,
    pending: PendingTable,
}

impl CommandDispatcher {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }

    /// Number of replies currently awaited
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn pending_replies(&self) -> Vec<(String, PendingReply)> {
        self.pending
            .lock()
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Parse, validate against `snapshot`, and execute a completion.
    pub async fn dispatch(
        &self,
        completion: &str,
        snapshot: &RegistrySnapshot,
    ) -> RouterResult<CommandOutcome> {
        match parse_completion(completion)? {
            None => Ok(CommandOutcome::NoMatch),
            Some(selection) => self.execute(selection, snapshot).await,
        }
    }

    pub async fn execute(
        &self,
        selection: ModelSelection,
        snapshot: &RegistrySnapshot,
    ) -> RouterResult<CommandOutcome> {
        let ModelSelection {
            service,
            command,
            args,
        } = selection;

        let iface = snapshot
            .get(&service)
            .ok_or_else(|| RouterError::UnknownService(service.clone()))?;
        let topic = iface
            .command_topic(&command)
            .ok_or_else(|| RouterError::NoTransport(service.clone()))?;
        if !iface.commands.contains_key(&command) {
            debug!("{} does not declare command '{}', sending anyway", service, command);
        }

        let payload = serde_json::to_vec(&JsonValue::Object(args))?;

        if !iface.expects_reply(&command) {
            info!("Dispatching {}.{} on {}", service, command, topic);
            self.bus.publish(&topic, &payload).await?;
            return Ok(CommandOutcome::Dispatched { service, command });
        }

        let reply_topic = format!("{}_reply", topic);
        let (guard, mut subscription) = {
            let mut table = self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if table.contains_key(&reply_topic) {
                return Err(RouterError::ReplyInFlight(reply_topic));
            }
            let subscription = self.bus.subscribe(&reply_topic)?;
            table.insert(
                reply_topic.clone(),
                PendingReply {
                    service: service.clone(),
                    command: command.clone(),
                    subscription_id: subscription.id,
                    registered_at: Utc::now(),
                },
            );
            let guard = PendingGuard {
                bus: Arc::clone(&self.bus),
                pending: Arc::clone(&self.pending),
                reply_topic: reply_topic.clone(),
                subscription_id: subscription.id,
            };
            (guard, subscription)
        };

        info!(
            "Dispatching {}.{} on {}, waiting for {}",
            service, command, topic, reply_topic
        );
        self.bus.publish(&topic, &payload).await?;

        let received =
            tokio::time::timeout(self.reply_timeout, subscription.receiver.recv()).await;
        drop(guard);

        match received {
            Ok(Some(message)) => Ok(CommandOutcome::Replied {
                service,
                command,
                reply: decode_reply(&message.payload),
            }),
            Ok(None) => Err(RouterError::Bus(format!(
                "Subscription to {} closed before a reply arrived",
                reply_topic
            ))),
            Err(_) => {
                warn!(
                    "No reply from {}.{} within {:?}",
                    service, command, self.reply_timeout
                );
                Err(RouterError::ReplyTimeout { service, command })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::interface::ServiceInterface;
    use serde_json::json;

    fn snapshot() -> RegistrySnapshot {
        let docs = vec![
            json!({
                "meta": {"name": "ZmwLights", "mqtt_topic": "zmw_lights"},
                "commands": {"all_lights_on": {"params": {"prefix": "Name"}}}
            }),
            json!({
                "meta": {"name": "ZmwSonosCtrl", "mqtt_topic": "zmw_sonos_ctrl"},
                "commands": {"ls_speakers": {"params": {}}},
                "announcements": {"ls_speakers_reply": {"description": "names", "payload": []}}
            }),
            json!({
                "meta": {"name": "Detached"},
                "commands": {"ping": {}}
            }),
        ];
        docs.iter()
            .map(|d| {
                let iface = ServiceInterface::from_json(d).unwrap();
                (iface.name.clone(), iface)
            })
            .collect()
    }

    fn dispatcher() -> (Arc<InMemoryBus>, CommandDispatcher) {
        let bus = Arc::new(InMemoryBus::new());
        let dispatcher = CommandDispatcher::new(bus.clone());
        (bus, dispatcher)
    }

    #[test]
    fn sentinel_is_no_match_even_with_whitespace() {
        assert_eq!(parse_completion("DONT_KNOW").unwrap(), None);
        assert_eq!(parse_completion("  DONT_KNOW\n").unwrap(), None);
    }

    #[test]
    fn broken_json_keeps_raw_text() {
        match parse_completion(r#"{"service": "ZmwLights""#) {
            Err(RouterError::InvalidModelOutput { raw }) => {
                assert_eq!(raw, r#"{"service": "ZmwLights""#)
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn non_json_reply_becomes_text() {
        assert_eq!(decode_reply(b"[1, 2]"), json!([1, 2]));
        assert_eq!(decode_reply(b"not json"), json!("not json"));
    }

    #[tokio::test]
    async fn fire_and_forget_publishes_args() {
        let (bus, dispatcher) = dispatcher();
        let outcome = dispatcher
            .dispatch(
                r#"{"service":"ZmwLights","command":"all_lights_on","args":{"prefix":"Kitchen"}}"#,
                &snapshot(),
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            CommandOutcome::Dispatched {
                service: "ZmwLights".to_string(),
                command: "all_lights_on".to_string()
            }
        );
        let sent = bus.published_on("zmw_lights/all_lights_on");
        assert_eq!(sent.len(), 1);
        let args: JsonValue = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(args, json!({"prefix": "Kitchen"}));
        assert_eq!(bus.subscription_count(), 0);
    }

    #[tokio::test]
    async fn unknown_service_and_missing_topic() {
        let (bus, dispatcher) = dispatcher();
        let err = dispatcher
            .dispatch(r#"{"service":"Nope","command":"x","args":{}}"#, &snapshot())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownService(s) if s == "Nope"));

        let err = dispatcher
            .dispatch(r#"{"service":"Detached","command":"ping","args":{}}"#, &snapshot())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Service Detached has no MQTT topic");
        assert!(bus.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reply_is_returned_and_subscription_released() {
        let (bus, dispatcher) = dispatcher();
        let responder_bus = bus.clone();
        let responder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            responder_bus
                .publish("zmw_sonos_ctrl/ls_speakers_reply", br#"["Cocina","Baticueva"]"#)
                .await
                .unwrap();
        });

        let outcome = dispatcher
            .dispatch(
                r#"{"service":"ZmwSonosCtrl","command":"ls_speakers","args":{}}"#,
                &snapshot(),
            )
            .await
            .unwrap();
        responder.await.unwrap();

        assert_eq!(
            outcome,
            CommandOutcome::Replied {
                service: "ZmwSonosCtrl".to_string(),
                command: "ls_speakers".to_string(),
                reply: json!(["Cocina", "Baticueva"]),
            }
        );
        assert_eq!(bus.active_subscriptions("zmw_sonos_ctrl/ls_speakers_reply"), 0);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_times_out_and_subscription_released() {
        let (bus, dispatcher) = dispatcher();
        let started = tokio::time::Instant::now();

        let err = dispatcher
            .dispatch(
                r#"{"service":"ZmwSonosCtrl","command":"ls_speakers","args":{}}"#,
                &snapshot(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Timeout waiting for ZmwSonosCtrl.ls_speakers");
        assert!(started.elapsed() >= DEFAULT_REPLY_TIMEOUT);
        assert_eq!(bus.active_subscriptions("zmw_sonos_ctrl/ls_speakers_reply"), 0);
        assert_eq!(dispatcher.pending_count(), 0);
        assert_eq!(bus.published_on("zmw_sonos_ctrl/ls_speakers").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_wait_on_same_topic_is_rejected() {
        let (bus, dispatcher) = dispatcher();
        let dispatcher = Arc::new(dispatcher);
        let snap = snapshot();

        let first = {
            let dispatcher = Arc::clone(&dispatcher);
            let snap = snap.clone();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(
                        r#"{"service":"ZmwSonosCtrl","command":"ls_speakers","args":{}}"#,
                        &snap,
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(dispatcher.pending_count(), 1);
        let pending = dispatcher.pending_replies();
        assert_eq!(pending[0].0, "zmw_sonos_ctrl/ls_speakers_reply");
        assert_eq!(pending[0].1.service, "ZmwSonosCtrl");
        assert_eq!(pending[0].1.command, "ls_speakers");

        let second = dispatcher
            .dispatch(
                r#"{"service":"ZmwSonosCtrl","command":"ls_speakers","args":{}}"#,
                &snap,
            )
            .await;
        assert!(matches!(second, Err(RouterError::ReplyInFlight(_))));

        bus.publish("zmw_sonos_ctrl/ls_speakers_reply", b"late but fine")
            .await
            .unwrap();
        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, CommandOutcome::Replied { reply, .. } if reply == json!("late but fine")));
        assert_eq!(dispatcher.pending_count(), 0);
    }
}
