use super::{Thing, ThingAction, ValueDomain};
use crate::relevance::{keyword_set, score_keywords, split_case_boundaries, tokenize_query};
use std::collections::BTreeMap;

/// Actions that are noise for the model
const SKIP_ACTIONS: &[&str] = &[
    "linkquality",
    "update",
    "identify",
    "battery",
    "power_on_behavior",
    "color_temp_startup",
    "effect",
    "execute_if_off",
];

/// Device types with nothing to control
const SKIP_TYPES: &[&str] = &["button"];

const SENSOR_TYPE: &str = "sensor";

fn action_inline(action: &ThingAction) -> Option<String> {
    if SKIP_ACTIONS.contains(&action.name.as_str()) {
        return None;
    }
    match &action.domain {
        ValueDomain::Binary { on, off } => Some(format!("{} {}/{}", action.name, on, off)),
        ValueDomain::Numeric { min: None, max: None } => Some(action.name.clone()),
        ValueDomain::Numeric { min, max } => Some(format!(
            "{} {}-{}",
            action.name,
            min.as_deref().unwrap_or(""),
            max.as_deref().unwrap_or("")
        )),
        ValueDomain::Enum(values) if values.is_empty() => Some(action.name.clone()),
        ValueDomain::Enum(values) => Some(format!("{} {}", action.name, values.join("/"))),
        ValueDomain::Other(kind) if matches!(kind.as_str(), "composite" | "list" | "user_defined") => None,
        ValueDomain::Other(_) => Some(action.name.clone()),
    }
}

/// "light" → "Lights", "switch" → "Switches"
fn section_label(thing_type: &str) -> String {
    let mut label = String::with_capacity(thing_type.len() + 2);
    let mut upper_next = true;
    for c in thing_type.chars() {
        if upper_next {
            label.extend(c.to_uppercase());
        } else {
            label.extend(c.to_lowercase());
        }
        upper_next = !c.is_alphabetic();
    }
    let lower = label.to_lowercase();
    if ["s", "sh", "ch", "x", "z"].iter().any(|s| lower.ends_with(s)) {
        label.push_str("es");
    } else {
        label.push('s');
    }
    label
}

/// Render devices grouped by type. Controllable types come first in
/// alphabetical order, sensors last since they are read through the sensor
/// monitor service.
pub fn compact_things(things: &[Thing]) -> String {
    let mut lines = vec![
        "## Zigbee2MQTT Devices".to_string(),
        "Control devices by publishing JSON to zigbee2mqtt/{device_name}/set".to_string(),
        String::new(),
    ];

    let mut by_type: BTreeMap<String, Vec<&Thing>> = BTreeMap::new();
    for thing in things {
        let thing_type = thing.thing_type.as_deref().unwrap_or("other");
        if thing.broken || SKIP_TYPES.contains(&thing_type) || thing.actions.is_empty() {
            continue;
        }
        by_type.entry(thing_type.to_string()).or_default().push(thing);
    }

    let sensors = by_type.remove(SENSOR_TYPE).unwrap_or_default();

    for (thing_type, mut group) in by_type {
        lines.push(format!("### {}", section_label(&thing_type)));
        group.sort_by(|a, b| a.name.cmp(&b.name));
        for thing in group {
            let actions: Vec<String> = thing.actions.values().filter_map(action_inline).collect();
            if actions.is_empty() {
                lines.push(format!("- {}", thing.name));
            } else {
                lines.push(format!("- {}: {}", thing.name, actions.join(", ")));
            }
        }
        lines.push(String::new());
    }

    if !sensors.is_empty() {
        let mut sensors = sensors;
        sensors.sort_by(|a, b| a.name.cmp(&b.name));
        lines.push("### Sensors (query via ZmwSensormon)".to_string());
        for thing in sensors {
            let metrics: Vec<&str> = thing
                .actions
                .keys()
                .map(String::as_str)
                .filter(|name| !SKIP_ACTIONS.contains(name))
                .collect();
            if !metrics.is_empty() {
                lines.push(format!("- {}: {}", thing.name, metrics.join(", ")));
            }
        }
        lines.push(String::new());
    }

    lines.join("\n")
}

fn thing_keywords(thing: &Thing) -> String {
    let mut parts = vec![split_case_boundaries(&thing.name).to_lowercase()];
    if let Some(thing_type) = &thing.thing_type {
        parts.push(thing_type.to_lowercase());
    }
    for name in thing.actions.keys() {
        parts.push(name.replace('_', " "));
    }
    parts.join(" ")
}

/// Same ranking rules as the service filter: empty signal keeps every
/// device, no overlap keeps none.
pub fn filter_things(query: &str, things: &[Thing], max_results: usize) -> Vec<Thing> {
    let query_words = tokenize_query(query);
    if query_words.is_empty() {
        return things.to_vec();
    }

    let mut scored: Vec<(usize, &Thing)> = things
        .iter()
        .filter_map(|thing| {
            let score = score_keywords(&query_words, &keyword_set(&thing_keywords(thing)));
            (score > 0).then_some((score, thing))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored
        .into_iter()
        .take(max_results)
        .map(|(_, thing)| thing.clone())
        .collect()
}
