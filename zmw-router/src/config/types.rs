//! Router configuration types
//!
//! Every field has a default, so an empty or partial `router.toml` is valid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Infrastructure services with no user-facing command surface
pub const DEFAULT_SKIP_SERVICES: &[&str] = &[
    "ZmwDoorman",
    "ZmwShellyPlug",
    "ZmwSpeechToText",
    "ZmwTelegram",
    "ZmwWhatsapp",
];

/// Top-level router configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RouterConfig {
    pub router: RoutingConfig,
    pub llm: LlmConfig,
    pub devices: DevicesConfig,
}

/// Query pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RoutingConfig {
    /// Services shown to the model per query
    pub max_services: usize,
    /// Constrain completions with the compiled grammar
    pub use_grammar: bool,
    pub reply_timeout_secs: u64,
    /// Queries kept in the history, newest last
    pub history_len: usize,
    pub skip_services: Vec<String>,
    /// Replaces the built-in system preamble
    pub preamble: Option<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_services: 3,
            use_grammar: true,
            reply_timeout_secs: 10,
            history_len: 20,
            skip_services: DEFAULT_SKIP_SERVICES.iter().map(|s| s.to_string()).collect(),
            preamble: None,
        }
    }
}

impl RoutingConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }
}

/// Inference server settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            max_tokens: 256,
            temperature: 0.0,
            request_timeout_secs: 120,
        }
    }
}

/// Zigbee device list settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DevicesConfig {
    /// JSON export of the device list; no device context without it
    pub things_file: Option<PathBuf>,
    pub cache_ttl_secs: u64,
    pub max_things: usize,
    /// Append the device section to the system prompt
    pub include_in_prompt: bool,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            things_file: None,
            cache_ttl_secs: 30,
            max_things: 10,
            include_in_prompt: false,
        }
    }
}
