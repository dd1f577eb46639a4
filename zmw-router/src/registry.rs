//! Capability registry
//!
//! Holds the latest interface document per service, learned through the
//! discovery protocol: the router publishes `<topic>/get_mqtt_description`
//! and every service answers on `<topic>/get_mqtt_description_reply`.
//!
//! All access goes through one mutex around the backing map. Readers take a
//! [`RegistrySnapshot`] copy instead of holding the lock while they filter,
//! compile or dispatch.

use crate::bus::{BusMessage, MessageBus, SubscriptionId};
use crate::error::{RouterError, RouterResult};
use crate::interface::{ServiceInterface, DISCOVERY_COMMAND};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Wildcard matching every service's discovery reply topic
pub const DISCOVERY_REPLY_WILDCARD: &str = "+/get_mqtt_description_reply";

/// Immutable copy of the registry, in first-discovered order
pub type RegistrySnapshot = IndexMap<String, ServiceInterface>;

/// Counters for discovery traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub accepted: u64,
    /// Malformed replies. Each one is also logged once at `warn!`.
    pub dropped: u64,
}

pub struct CapabilityRegistry {
    bus: Arc<dyn MessageBus>,
    services: Mutex<IndexMap<String, ServiceInterface>>,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl CapabilityRegistry {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            bus,
            services: Mutex::new(IndexMap::new()),
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Replace the stored document for `service_name`. Last write wins, no
    /// merge with the previous document.
    pub fn record_discovery_reply(&self, service_name: &str, iface: ServiceInterface) {
        let mut services = self
            .services
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        info!("Received interface definition for {}", service_name);
        services.insert(service_name.to_string(), iface);
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Decode a raw discovery reply and record it.
    ///
    /// Malformed payloads are dropped with a warning and leave the registry
    /// untouched. Returns the recorded service name.
    pub fn ingest_discovery_payload(&self, topic: &str, payload: &[u8]) -> RouterResult<String> {
        let parsed = serde_json::from_slice::<JsonValue>(payload)
            .map_err(|e| format!("payload is not JSON ({})", e))
            .and_then(|doc| ServiceInterface::from_json(&doc));

        match parsed {
            Ok(iface) => {
                let name = iface.name.clone();
                self.record_discovery_reply(&name, iface);
                Ok(name)
            }
            Err(reason) => {
                warn!("Ignoring interface reply on '{}': {}", topic, reason);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(RouterError::MalformedDiscoveryReply {
                    topic: topic.to_string(),
                    reason,
                })
            }
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        self.services
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get(&self, service_name: &str) -> Option<ServiceInterface> {
        self.services
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(service_name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.services
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Ask one service to publish its interface document
    pub async fn request_discovery(&self, service_name: &str, topic: &str) -> RouterResult<()> {
        info!("Requesting interface for {}", service_name);
        self.bus
            .publish(&format!("{}/{}", topic, DISCOVERY_COMMAND), &[])
            .await
    }

    /// Re-request every known service that has a topic. Returns how many
    /// requests were sent.
    pub async fn request_discovery_all(&self) -> RouterResult<usize> {
        let targets: Vec<(String, String)> = self
            .snapshot()
            .values()
            .filter_map(|iface| iface.topic.clone().map(|t| (iface.name.clone(), t)))
            .collect();

        for (name, topic) in &targets {
            self.request_discovery(name, topic).await?;
        }
        Ok(targets.len())
    }

    /// A service came up. Services without a pub/sub interface are ignored.
    pub async fn on_service_announced(
        &self,
        service_name: &str,
        topic: Option<&str>,
    ) -> RouterResult<bool> {
        match topic {
            Some(topic) => {
                self.request_discovery(service_name, topic).await?;
                Ok(true)
            }
            None => {
                debug!(
                    "Service {} came up, but exposes no MQTT interface. Ignoring.",
                    service_name
                );
                Ok(false)
            }
        }
    }

    /// Subscribe to all discovery replies and feed them into the registry
    /// from a background task.
    pub fn start_discovery_worker(self: &Arc<Self>) -> RouterResult<DiscoveryWorker> {
        let mut subscription = self.bus.subscribe(DISCOVERY_REPLY_WILDCARD)?;
        let subscription_id = subscription.id;
        let registry = Arc::clone(self);

        let handle = tokio::spawn(async move {
            while let Some(BusMessage { topic, payload }) = subscription.receiver.recv().await {
                // Failures are already logged and counted
                let _ = registry.ingest_discovery_payload(&topic, &payload);
            }
            debug!("Discovery reply stream closed");
        });

        Ok(DiscoveryWorker {
            bus: Arc::clone(&self.bus),
            subscription_id,
            handle,
        })
    }

    /// Load a saved set of interface documents: either a JSON object keyed
    /// by service name or an array of documents. Returns how many were
    /// recorded.
    pub fn load_snapshot_file(&self, path: &Path) -> RouterResult<usize> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::Io(format!("Failed to read interfaces file {:?}: {}", path, e))
        })?;
        let doc: JsonValue = serde_json::from_str(&content)?;

        let docs: Vec<JsonValue> = match doc {
            JsonValue::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            JsonValue::Array(items) => items,
            _ => {
                return Err(RouterError::Serde(format!(
                    "Interfaces file {:?} must hold an object or an array",
                    path
                )))
            }
        };

        let source = path.display().to_string();
        let mut loaded = 0;
        for doc in docs {
            let payload = serde_json::to_vec(&doc)?;
            if self.ingest_discovery_payload(&source, &payload).is_ok() {
                loaded += 1;
            }
        }
        Ok(loaded)
    }
}

/// Handle on the background discovery subscription
pub struct DiscoveryWorker {
    bus: Arc<dyn MessageBus>,
    subscription_id: SubscriptionId,
    handle: JoinHandle<()>,
}

impl DiscoveryWorker {
    pub fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Remove the subscription and stop the task
    pub fn stop(self) {
        self.bus.unsubscribe(self.subscription_id);
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use serde_json::json;

    fn registry() -> (Arc<InMemoryBus>, CapabilityRegistry) {
        let bus = Arc::new(InMemoryBus::new());
        let registry = CapabilityRegistry::new(bus.clone());
        (bus, registry)
    }

    fn doc(name: &str, topic: &str, description: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "meta": {"name": name, "mqtt_topic": topic},
            "description": description,
            "commands": {}
        }))
        .unwrap()
    }

    #[test]
    fn last_write_wins_without_merge() {
        let (_, registry) = registry();
        registry
            .ingest_discovery_payload("t", &doc("ZmwLights", "zmw_lights", "first"))
            .unwrap();
        registry
            .ingest_discovery_payload("t", &doc("ZmwLights", "zmw_lights", "second"))
            .unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["ZmwLights"].description, "second");
    }

    #[test]
    fn missing_name_is_dropped() {
        let (_, registry) = registry();
        let payload = serde_json::to_vec(&json!({"meta": {"mqtt_topic": "x"}})).unwrap();
        let err = registry.ingest_discovery_payload("x/get_mqtt_description_reply", &payload);
        assert!(matches!(err, Err(RouterError::MalformedDiscoveryReply { .. })));
        assert!(registry.is_empty());
        assert_eq!(registry.stats().dropped, 1);
    }

    #[tokio::test]
    async fn rediscovery_targets_known_topics() {
        let (bus, registry) = registry();
        registry
            .ingest_discovery_payload("t", &doc("ZmwLights", "zmw_lights", ""))
            .unwrap();
        registry
            .ingest_discovery_payload("t", &doc("ZmwHeating", "zmw_heating", ""))
            .unwrap();

        assert_eq!(registry.request_discovery_all().await.unwrap(), 2);
        let topics: Vec<String> = bus.published().into_iter().map(|m| m.topic).collect();
        assert_eq!(
            topics,
            vec![
                "zmw_lights/get_mqtt_description",
                "zmw_heating/get_mqtt_description"
            ]
        );
        assert!(bus.published().iter().all(|m| m.payload.is_empty()));
    }

    #[tokio::test]
    async fn announced_service_without_topic_is_ignored() {
        let (bus, registry) = registry();
        assert!(!registry.on_service_announced("ZmwWww", None).await.unwrap());
        assert!(registry
            .on_service_announced("ZmwLights", Some("zmw_lights"))
            .await
            .unwrap());
        assert_eq!(bus.published().len(), 1);
    }
}
