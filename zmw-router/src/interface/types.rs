//! Typed view of a service interface document.
//!
//! Discovery replies are free-form JSON. Only `meta.name` is mandatory;
//! everything else is decoded leniently and unknown top-level keys are kept
//! in the enrichment map for the per-service [`super::Enricher`]s.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

/// Command every service exposes for the discovery protocol itself
pub const DISCOVERY_COMMAND: &str = "get_mqtt_description";

/// Suffix marking a parameter as optional in its declared name
pub const OPTIONAL_NAME_SUFFIX: char = '?';

/// Substring in a parameter description that marks it as optional
pub const OPTIONAL_DESCRIPTION_HINT: &str = "(optional)";

/// Trailing "Response on X_reply" hints are noise for the model
static REPLY_HINT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*\.?\s*Response\s+(published\s+)?on\s+\S+\s*$")
        .expect("reply hint regex is valid")
});

/// Capability document for one service, replaced wholesale on every
/// discovery reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceInterface {
    pub name: String,
    pub description: String,
    /// Pub/sub topic prefix (`meta.mqtt_topic`)
    pub topic: Option<String>,
    pub commands: IndexMap<String, Command>,
    pub announcements: IndexMap<String, Announcement>,
    /// Every top-level key not part of the core schema
    pub enrichment: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub description: String,
    /// Parameters in declaration order
    pub params: IndexMap<String, ParamSpec>,
}

/// How a parameter ended up required or optional
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Requirement {
    /// The document carried an explicit `optional` / `required` flag
    Declared,
    /// The name ends with `?`
    NameSuffix,
    /// The description mentions "(optional)". Ambiguous: the text may be
    /// talking about something else.
    DescriptionHint,
    /// Nothing said otherwise, so the parameter is required
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub requirement: Requirement,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Announcement {
    pub description: String,
    /// Documentation only, never executed
    pub payload: JsonValue,
}

impl ServiceInterface {
    /// Build an interface from a raw discovery reply.
    ///
    /// Fails only when `meta.name` is missing or not a string.
    pub fn from_json(doc: &JsonValue) -> Result<Self, String> {
        let obj = doc
            .as_object()
            .ok_or_else(|| "interface document is not a JSON object".to_string())?;

        let meta = obj
            .get("meta")
            .and_then(|m| m.as_object())
            .ok_or_else(|| "missing 'meta' section".to_string())?;
        let name = meta
            .get("name")
            .and_then(|n| n.as_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| "missing 'meta.name'".to_string())?
            .to_string();
        let topic = meta
            .get("mqtt_topic")
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let description = text_field(obj.get("description"));

        let mut commands = IndexMap::new();
        if let Some(cmds) = obj.get("commands").and_then(|c| c.as_object()) {
            for (cmd_name, cmd) in cmds {
                commands.insert(cmd_name.clone(), Command::from_json(&name, cmd_name, cmd));
            }
        }

        let mut announcements = IndexMap::new();
        if let Some(anns) = obj.get("announcements").and_then(|a| a.as_object()) {
            for (ann_name, ann) in anns {
                announcements.insert(
                    ann_name.clone(),
                    Announcement {
                        description: text_field(ann.get("description")),
                        payload: ann.get("payload").cloned().unwrap_or(JsonValue::Null),
                    },
                );
            }
        }

        let enrichment = obj
            .iter()
            .filter(|(k, _)| {
                !matches!(
                    k.as_str(),
                    "meta" | "description" | "commands" | "announcements"
                )
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            name,
            description,
            topic,
            commands,
            announcements,
            enrichment,
        })
    }

    /// A command expects a reply iff the service announces `<command>_reply`
    pub fn expects_reply(&self, command: &str) -> bool {
        self.announcements
            .contains_key(&format!("{}_reply", command))
    }

    /// Commands offered to the model, sorted by name. The discovery command
    /// is never offered.
    pub fn eligible_commands(&self) -> Vec<(&str, &Command)> {
        let mut cmds: Vec<(&str, &Command)> = self
            .commands
            .iter()
            .filter(|(name, _)| name.as_str() != DISCOVERY_COMMAND)
            .map(|(name, cmd)| (name.as_str(), cmd))
            .collect();
        cmds.sort_by(|a, b| a.0.cmp(b.0));
        cmds
    }

    /// Topic a command is published on
    pub fn command_topic(&self, command: &str) -> Option<String> {
        self.topic.as_ref().map(|t| format!("{}/{}", t, command))
    }
}

impl Command {
    fn from_json(service: &str, cmd_name: &str, cmd: &JsonValue) -> Self {
        let description = text_field(cmd.get("description"));
        let mut params = IndexMap::new();
        if let Some(declared) = cmd.get("params").and_then(|p| p.as_object()) {
            for (param_name, decl) in declared {
                let spec = ParamSpec::from_json(param_name, decl);
                if spec.requirement == Requirement::DescriptionHint {
                    debug!(
                        "{}.{}: parameter '{}' treated as optional because its description mentions {}; declare \"optional\": true to make this explicit",
                        service, cmd_name, param_name, OPTIONAL_DESCRIPTION_HINT
                    );
                }
                params.insert(param_name.clone(), spec);
            }
        }
        Self {
            description,
            params,
        }
    }

    /// Required parameters in declaration order
    pub fn required_params(&self) -> Vec<&ParamSpec> {
        self.params.values().filter(|p| p.required).collect()
    }

    /// Description without the trailing reply-topic hint
    pub fn model_description(&self) -> String {
        strip_reply_hint(&self.description)
    }
}

impl ParamSpec {
    fn from_json(name: &str, decl: &JsonValue) -> Self {
        // Explicit form: {"description": "...", "optional": true}
        if let Some(obj) = decl.as_object() {
            let declared = obj
                .get("optional")
                .and_then(|v| v.as_bool())
                .map(|optional| !optional)
                .or_else(|| obj.get("required").and_then(|v| v.as_bool()));
            if let Some(required) = declared {
                return Self {
                    name: name.to_string(),
                    description: text_field(obj.get("description")),
                    required,
                    requirement: Requirement::Declared,
                };
            }
        }

        let description = match decl {
            JsonValue::String(s) => s.clone(),
            JsonValue::Null => String::new(),
            other => other.to_string(),
        };
        let (required, requirement) = classify_param(name, &description);
        Self {
            name: name.to_string(),
            description,
            required,
            requirement,
        }
    }
}

/// Required/optional classification for parameters declared without an
/// explicit flag. The name suffix wins over the description hint.
pub fn classify_param(name: &str, description: &str) -> (bool, Requirement) {
    if name.ends_with(OPTIONAL_NAME_SUFFIX) {
        (false, Requirement::NameSuffix)
    } else if description
        .to_lowercase()
        .contains(OPTIONAL_DESCRIPTION_HINT)
    {
        (false, Requirement::DescriptionHint)
    } else {
        (true, Requirement::Default)
    }
}

pub fn strip_reply_hint(description: &str) -> String {
    REPLY_HINT_RE.replace(description, "").into_owned()
}

fn text_field(value: Option<&JsonValue>) -> String {
    value
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sonos_doc() -> JsonValue {
        json!({
            "description": "Manage Sonos speakers",
            "meta": {"name": "ZmwSonosCtrl", "mqtt_topic": "zmw_sonos_ctrl"},
            "llm_context_extra": "Speakers: Cocina",
            "commands": {
                "volume_up": {"description": "raise volume", "params": {"vol?": "Step percentage, default 5"}},
                "spotify_hijack": {
                    "description": "Move Spotify playback to set of Sonos speakers",
                    "params": {"<speaker_name>": {"vol?": "level (0-100)"}}
                },
                "ls_speakers": {"description": "List of speaker names. Response on ls_speakers_reply", "params": {}},
                "get_mqtt_description": {"description": "Service description", "params": {}}
            },
            "announcements": {
                "ls_speakers_reply": {"description": "speaker list", "payload": ["names"]}
            }
        })
    }

    #[test]
    fn decodes_core_schema_and_keeps_extras() {
        let iface = ServiceInterface::from_json(&sonos_doc()).unwrap();
        assert_eq!(iface.name, "ZmwSonosCtrl");
        assert_eq!(iface.topic.as_deref(), Some("zmw_sonos_ctrl"));
        assert_eq!(iface.commands.len(), 4);
        assert!(iface.enrichment.contains_key("llm_context_extra"));
        assert!(!iface.enrichment.contains_key("meta"));
    }

    #[test]
    fn requires_meta_name() {
        assert!(ServiceInterface::from_json(&json!({"meta": {}})).is_err());
        assert!(ServiceInterface::from_json(&json!({"description": "x"})).is_err());
        assert!(ServiceInterface::from_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn reply_expectation_follows_announcements() {
        let iface = ServiceInterface::from_json(&sonos_doc()).unwrap();
        assert!(iface.expects_reply("ls_speakers"));
        assert!(!iface.expects_reply("volume_up"));
    }

    #[test]
    fn param_classification() {
        let iface = ServiceInterface::from_json(&sonos_doc()).unwrap();
        let vol = &iface.commands["volume_up"].params["vol?"];
        assert!(!vol.required);
        assert_eq!(vol.requirement, Requirement::NameSuffix);

        // Nested declarations are required and keep their JSON as description
        let speaker = &iface.commands["spotify_hijack"].params["<speaker_name>"];
        assert!(speaker.required);
        assert_eq!(speaker.description, r#"{"vol?":"level (0-100)"}"#);

        assert_eq!(
            classify_param("msg", "Message (optional)"),
            (false, Requirement::DescriptionHint)
        );
        assert_eq!(classify_param("msg", "Message"), (true, Requirement::Default));
    }

    #[test]
    fn explicit_flag_wins() {
        let doc = json!({
            "meta": {"name": "Svc"},
            "commands": {"cmd": {"params": {
                "a": {"description": "Not (optional) at all", "optional": false},
                "b": {"description": "Level", "required": false}
            }}}
        });
        let iface = ServiceInterface::from_json(&doc).unwrap();
        let params = &iface.commands["cmd"].params;
        assert!(params["a"].required);
        assert_eq!(params["a"].requirement, Requirement::Declared);
        assert!(!params["b"].required);
    }

    #[test]
    fn eligible_commands_are_sorted_and_skip_discovery() {
        let iface = ServiceInterface::from_json(&sonos_doc()).unwrap();
        let names: Vec<&str> = iface.eligible_commands().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["ls_speakers", "spotify_hijack", "volume_up"]);
    }

    #[test]
    fn strips_reply_hint() {
        assert_eq!(
            strip_reply_hint("List of speaker names. Response on ls_speakers_reply"),
            "List of speaker names"
        );
        assert_eq!(
            strip_reply_hint("Current state. Response published on zmw_x/state"),
            "Current state"
        );
        assert_eq!(strip_reply_hint("Prev track"), "Prev track");
    }
}
