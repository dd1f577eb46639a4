//! Physical device registry
//!
//! Zigbee devices ("things") are not services: they are controlled by
//! publishing JSON to `zigbee2mqtt/<device>/set`. The router only reads the
//! device list, filters it against the query and renders a compact section
//! for the prompt.
//!
//! - **Types**: [`Thing`], [`ThingAction`], [`ValueDomain`]
//! - **Sources**: [`ThingSource`] trait, [`JsonFileThingSource`]
//! - **Rendering**: `compact.rs` - keyword filter and prompt text

pub mod compact;

pub use compact::{compact_things, filter_things};

use crate::cache::TtlCache;
use crate::error::{RouterError, RouterResult};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Range of values an action accepts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ValueDomain {
    Binary { on: String, off: String },
    Numeric { min: Option<String>, max: Option<String> },
    Enum(Vec<String>),
    /// Composite, list and anything else not worth describing inline
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThingAction {
    pub name: String,
    pub domain: ValueDomain,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thing {
    pub name: String,
    pub thing_type: Option<String>,
    pub broken: bool,
    /// Actions in declaration order
    pub actions: IndexMap<String, ThingAction>,
}

/// On-disk action metadata, zigbee2mqtt exposes style
#[derive(Debug, Deserialize)]
struct RawAction {
    #[serde(rename = "type", default)]
    kind: String,
    value_on: Option<JsonValue>,
    value_off: Option<JsonValue>,
    value_min: Option<JsonValue>,
    value_max: Option<JsonValue>,
    #[serde(default)]
    values: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct RawThing {
    name: String,
    #[serde(rename = "type", default)]
    thing_type: Option<String>,
    #[serde(default)]
    broken: bool,
    #[serde(default)]
    actions: IndexMap<String, RawAction>,
}

fn scalar_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl From<RawAction> for ValueDomain {
    fn from(raw: RawAction) -> Self {
        match raw.kind.as_str() {
            "binary" => ValueDomain::Binary {
                on: raw.value_on.as_ref().map(scalar_text).unwrap_or_default(),
                off: raw.value_off.as_ref().map(scalar_text).unwrap_or_default(),
            },
            "numeric" => ValueDomain::Numeric {
                min: raw.value_min.as_ref().map(scalar_text),
                max: raw.value_max.as_ref().map(scalar_text),
            },
            "enum" => ValueDomain::Enum(raw.values.iter().map(scalar_text).collect()),
            other => ValueDomain::Other(other.to_string()),
        }
    }
}

impl From<RawThing> for Thing {
    fn from(raw: RawThing) -> Self {
        let actions = raw
            .actions
            .into_iter()
            .map(|(name, action)| {
                let domain = ValueDomain::from(action);
                (name.clone(), ThingAction { name, domain })
            })
            .collect();
        Thing {
            name: raw.name,
            thing_type: raw.thing_type.filter(|t| !t.is_empty()),
            broken: raw.broken,
            actions,
        }
    }
}

/// Decode a JSON array of device descriptions
pub fn parse_things(content: &str) -> RouterResult<Vec<Thing>> {
    let raw: Vec<RawThing> = serde_json::from_str(content)?;
    Ok(raw.into_iter().map(Thing::from).collect())
}

/// Where the device list comes from
#[async_trait]
pub trait ThingSource: Send + Sync {
    async fn fetch(&self) -> RouterResult<Vec<Thing>>;
}

/// Device list exported to a JSON file
pub struct JsonFileThingSource {
    path: PathBuf,
}

impl JsonFileThingSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ThingSource for JsonFileThingSource {
    async fn fetch(&self) -> RouterResult<Vec<Thing>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            RouterError::Io(format!("Failed to read things file {:?}: {}", self.path, e))
        })?;
        let things = parse_things(&content)?;
        debug!("Loaded {} things from {:?}", things.len(), self.path);
        Ok(things)
    }
}

/// Cached device list plus the per-query rendering
pub struct ThingDirectory {
    source: Arc<dyn ThingSource>,
    cache: TtlCache<Vec<Thing>>,
    max_results: usize,
}

impl ThingDirectory {
    pub fn new(source: Arc<dyn ThingSource>, ttl: Duration, max_results: usize) -> Self {
        Self {
            source,
            cache: TtlCache::new(ttl),
            max_results,
        }
    }

    pub async fn things(&self) -> RouterResult<Vec<Thing>> {
        let source = Arc::clone(&self.source);
        self.cache
            .get_or_refresh(|| async move { source.fetch().await })
            .await
    }

    /// Prompt section for the devices relevant to `query`. Empty when none
    /// match.
    pub async fn context_for(&self, query: &str) -> RouterResult<String> {
        let things = self.things().await?;
        let relevant = filter_things(query, &things, self.max_results);
        if relevant.is_empty() {
            return Ok(String::new());
        }
        Ok(compact_things(&relevant))
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }
}
