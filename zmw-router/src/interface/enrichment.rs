//! Per-service enrichment handlers.
//!
//! Some services publish structured extras next to their commands (known
//! lights, speakers, sensors...). An [`Enricher`] turns those extras into a
//! short text for the prompt and into closed value domains for the grammar.
//! Handlers are registered by service name at startup; services without a
//! handler fall back to the self-declared `llm_context_extra` and
//! `llm_grammar_values` keys.

use super::types::ServiceInterface;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Closed value domains keyed by parameter name
pub type ValueDomains = BTreeMap<String, Vec<String>>;

pub trait Enricher: Send + Sync {
    /// Extra lines describing the service's current state, if any
    fn context(&self, iface: &ServiceInterface) -> Option<String>;

    /// Valid values for parameters that only accept known names
    fn value_domains(&self, iface: &ServiceInterface) -> ValueDomains;
}

/// Handler lookup by service name
#[derive(Clone)]
pub struct EnricherRegistry {
    handlers: HashMap<String, Arc<dyn Enricher>>,
    fallback: Arc<dyn Enricher>,
}

impl EnricherRegistry {
    /// Registry without any per-service handler
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(SelfDeclaredEnricher),
        }
    }

    /// Registry with handlers for the known service families
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("ZmwLights", Arc::new(LightsEnricher));
        registry.register("ZmwContactmon", Arc::new(ContactmonEnricher));
        registry.register("ZmwReolinkCams", Arc::new(CamerasEnricher));
        registry.register("ZmwSensormon", Arc::new(SensormonEnricher));
        registry.register("ZmwSonosCtrl", Arc::new(SonosEnricher));
        registry
    }

    pub fn register(&mut self, service: &str, handler: Arc<dyn Enricher>) {
        self.handlers.insert(service.to_string(), handler);
    }

    pub fn handler_for(&self, service: &str) -> &dyn Enricher {
        self.handlers
            .get(service)
            .map(|h| h.as_ref())
            .unwrap_or(self.fallback.as_ref())
    }

    /// Enrichment text for a service, `None` when empty
    pub fn context(&self, iface: &ServiceInterface) -> Option<String> {
        self.handler_for(&iface.name)
            .context(iface)
            .filter(|text| !text.trim().is_empty())
    }

    pub fn value_domains(&self, iface: &ServiceInterface) -> ValueDomains {
        let mut domains = self.handler_for(&iface.name).value_domains(iface);
        domains.retain(|_, values| !values.is_empty());
        domains
    }
}

impl Default for EnricherRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for EnricherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut services: Vec<&String> = self.handlers.keys().collect();
        services.sort();
        f.debug_struct("EnricherRegistry")
            .field("services", &services)
            .finish()
    }
}

/// Decode the declared enrichment keys into a typed struct. Shapes that do
/// not match are treated as "no extras".
fn extras<T: DeserializeOwned + Default>(iface: &ServiceInterface, keys: &[&str]) -> T {
    let selected: Map<String, JsonValue> = keys
        .iter()
        .filter_map(|k| iface.enrichment.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect();
    match serde_json::from_value(JsonValue::Object(selected)) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Ignoring unexpected enrichment shape for {}: {}", iface.name, e);
            T::default()
        }
    }
}

/// Reads `llm_context_extra` / `llm_grammar_values` published by the service
pub struct SelfDeclaredEnricher;

#[derive(Debug, Default, Deserialize)]
struct SelfDeclared {
    #[serde(default)]
    llm_context_extra: Option<String>,
    #[serde(default)]
    llm_grammar_values: BTreeMap<String, Vec<String>>,
}

impl Enricher for SelfDeclaredEnricher {
    fn context(&self, iface: &ServiceInterface) -> Option<String> {
        extras::<SelfDeclared>(iface, &["llm_context_extra"]).llm_context_extra
    }

    fn value_domains(&self, iface: &ServiceInterface) -> ValueDomains {
        extras::<SelfDeclared>(iface, &["llm_grammar_values"]).llm_grammar_values
    }
}

#[derive(Debug, Default, Deserialize)]
struct Named {
    name: String,
}

pub struct LightsEnricher;

#[derive(Debug, Default, Deserialize)]
struct LightsExtras {
    #[serde(default)]
    known_groups: Vec<Named>,
    #[serde(default)]
    known_lights: Vec<Named>,
}

impl Enricher for LightsEnricher {
    fn context(&self, iface: &ServiceInterface) -> Option<String> {
        let extras: LightsExtras = extras(iface, &["known_groups", "known_lights"]);
        let mut parts = Vec::new();
        if !extras.known_groups.is_empty() {
            let groups: Vec<&str> = extras.known_groups.iter().map(|g| g.name.as_str()).collect();
            parts.push(format!("Groups: {}", groups.join(", ")));
        }
        if !extras.known_lights.is_empty() {
            let mut lights: Vec<&str> = extras.known_lights.iter().map(|l| l.name.as_str()).collect();
            lights.sort();
            parts.push(format!("Lights: {}", lights.join(", ")));
        }
        Some(parts.join("\n"))
    }

    fn value_domains(&self, iface: &ServiceInterface) -> ValueDomains {
        let extras: LightsExtras = extras(iface, &["known_groups", "known_lights"]);
        let names: BTreeSet<String> = extras
            .known_groups
            .into_iter()
            .chain(extras.known_lights)
            .map(|n| n.name)
            .collect();
        let mut domains = ValueDomains::new();
        domains.insert("prefix".to_string(), names.into_iter().collect());
        domains
    }
}

pub struct ContactmonEnricher;

#[derive(Debug, Deserialize)]
struct ContactSensor {
    name: String,
    #[serde(default = "default_normal_state")]
    normal_state: bool,
}

fn default_normal_state() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct ContactmonExtras {
    #[serde(default)]
    sensors: Vec<ContactSensor>,
}

impl Enricher for ContactmonEnricher {
    fn context(&self, iface: &ServiceInterface) -> Option<String> {
        let extras: ContactmonExtras = extras(iface, &["sensors"]);
        if extras.sensors.is_empty() {
            return None;
        }
        let items: Vec<String> = extras
            .sensors
            .iter()
            .map(|s| {
                let state = if s.normal_state { "closed" } else { "open" };
                format!("{} ({})", s.name, state)
            })
            .collect();
        Some(format!("Sensors: {}", items.join(", ")))
    }

    fn value_domains(&self, _iface: &ServiceInterface) -> ValueDomains {
        ValueDomains::new()
    }
}

pub struct CamerasEnricher;

#[derive(Debug, Deserialize)]
struct Camera {
    cam_host: String,
    #[serde(default)]
    alias: Option<String>,
}

impl Camera {
    fn display_name(&self) -> String {
        self.alias
            .clone()
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| self.cam_host.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
struct CamerasExtras {
    #[serde(default)]
    known_cameras: Vec<Camera>,
}

impl Enricher for CamerasEnricher {
    fn context(&self, iface: &ServiceInterface) -> Option<String> {
        let extras: CamerasExtras = extras(iface, &["known_cameras"]);
        if extras.known_cameras.is_empty() {
            return None;
        }
        let names: Vec<String> = extras.known_cameras.iter().map(Camera::display_name).collect();
        Some(format!("Cameras: {}", names.join(", ")))
    }

    fn value_domains(&self, iface: &ServiceInterface) -> ValueDomains {
        let extras: CamerasExtras = extras(iface, &["known_cameras"]);
        let mut domains = ValueDomains::new();
        domains.insert(
            "cam_host".to_string(),
            extras.known_cameras.iter().map(Camera::display_name).collect(),
        );
        domains
    }
}

pub struct SensormonEnricher;

/// Metrics people actually ask about. Power monitors, motion and buttons
/// stay out of the prompt.
const USEFUL_METRICS: &[&str] = &["temperature", "humidity", "pm25", "voc_index", "feels_like_temp"];

#[derive(Debug, Deserialize)]
struct MonitoredSensor {
    name: String,
    #[serde(default)]
    metrics: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SensormonExtras {
    #[serde(default)]
    sensors: Vec<MonitoredSensor>,
}

impl Enricher for SensormonEnricher {
    fn context(&self, iface: &ServiceInterface) -> Option<String> {
        let extras: SensormonExtras = extras(iface, &["sensors"]);
        if extras.sensors.is_empty() {
            return None;
        }
        let items: Vec<String> = extras
            .sensors
            .iter()
            .filter_map(|s| {
                let useful: Vec<&str> = s
                    .metrics
                    .iter()
                    .map(String::as_str)
                    .filter(|m| USEFUL_METRICS.contains(m))
                    .collect();
                if useful.is_empty() {
                    None
                } else {
                    Some(format!("{} ({})", s.name, useful.join(", ")))
                }
            })
            .collect();
        if items.is_empty() {
            return None;
        }
        Some(format!("Sensors: {}", items.join("; ")))
    }

    fn value_domains(&self, iface: &ServiceInterface) -> ValueDomains {
        let extras: SensormonExtras = extras(iface, &["sensors"]);
        let names: BTreeSet<String> = extras.sensors.iter().map(|s| s.name.clone()).collect();
        let metrics: BTreeSet<String> = extras
            .sensors
            .iter()
            .flat_map(|s| s.metrics.iter().cloned())
            .collect();
        let mut domains = ValueDomains::new();
        domains.insert("name".to_string(), names.into_iter().collect());
        domains.insert("metric".to_string(), metrics.into_iter().collect());
        domains
    }
}

pub struct SonosEnricher;

#[derive(Debug, Deserialize)]
struct SpeakerInfo {
    zone_name: String,
}

#[derive(Debug, Deserialize)]
struct Speaker {
    speaker_info: SpeakerInfo,
}

#[derive(Debug, Default, Deserialize)]
struct SonosState {
    #[serde(default)]
    speakers: Vec<Speaker>,
    #[serde(default)]
    groups: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct SonosExtras {
    #[serde(default)]
    sonos_state: SonosState,
}

impl SonosExtras {
    fn speaker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sonos_state
            .speakers
            .iter()
            .map(|s| s.speaker_info.zone_name.clone())
            .collect();
        names.sort();
        names
    }
}

impl Enricher for SonosEnricher {
    fn context(&self, iface: &ServiceInterface) -> Option<String> {
        let extras: SonosExtras = extras(iface, &["sonos_state"]);
        let mut parts = Vec::new();
        let speakers = extras.speaker_names();
        if !speakers.is_empty() {
            parts.push(format!("Speakers: {}", speakers.join(", ")));
        }
        if !extras.sonos_state.groups.is_empty() {
            let groups: Vec<String> = extras
                .sonos_state
                .groups
                .iter()
                .map(|(name, members)| format!("{}: [{}]", name, members.join(", ")))
                .collect();
            parts.push(format!("Groups: {}", groups.join("; ")));
        }
        Some(parts.join("\n"))
    }

    fn value_domains(&self, iface: &ServiceInterface) -> ValueDomains {
        let extras: SonosExtras = extras(iface, &["sonos_state"]);
        let mut domains = ValueDomains::new();
        domains.insert("<speaker_name>".to_string(), extras.speaker_names());
        domains
    }
}
