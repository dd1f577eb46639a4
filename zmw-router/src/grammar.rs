//! Generation grammar compiler
//!
//! Compiles a set of service interfaces into a GBNF grammar that only admits
//! `{"service":…,"command":…,"args":{…}}` for the commands shown to the model,
//! or the literal fallback sentinel.
//!
//! Output layout:
//!
//! ```text
//! root ::= svc-ZmwLights | svc-ZmwSonosCtrl | "DONT_KNOW"
//! svc-ZmwLights ::= "{\"service\":\"ZmwLights\",…\"prefix\":\"" ("Kitchen" | "LivingRoom") "\"}}" | …
//! val ::= [^"\\\x00-\x1F]+
//! ```
//!
//! The compiler is pure: the same interface set always yields byte-identical
//! text.

use crate::interface::{EnricherRegistry, ServiceInterface};
use std::collections::HashSet;

/// Completion meaning "no command matches the request"
pub const FALLBACK_SENTINEL: &str = "DONT_KNOW";

/// Rule used for parameters without a closed value domain
pub const OPEN_VALUE_RULE: &str = "val";

/// Free text that cannot terminate the surrounding JSON string
const OPEN_VALUE_BODY: &str = r#"[^"\\\x00-\x1F]+"#;

/// Quote `text` as a GBNF string literal
pub fn gbnf_literal(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// JSON string escaping without the surrounding quotes
pub fn json_escape(text: &str) -> String {
    let quoted = serde_json::Value::String(text.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Deterministic rule name for a service
pub fn rule_name(service: &str) -> String {
    let sanitized: String = service
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("svc-{}", sanitized)
}

/// Compile the grammar for `services`.
pub fn compile_grammar(services: &[ServiceInterface], enrichers: &EnricherRegistry) -> String {
    let mut sorted: Vec<&ServiceInterface> = services.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut used_names: HashSet<String> = HashSet::new();
    let mut service_rules: Vec<String> = Vec::new();
    let mut rules: Vec<String> = Vec::new();
    let mut needs_open_value = false;

    for iface in sorted {
        let commands = iface.eligible_commands();
        if commands.is_empty() {
            continue;
        }

        let domains = enrichers.value_domains(iface);
        let service = json_escape(&iface.name);
        let mut alternatives = Vec::with_capacity(commands.len());

        for (cmd_name, cmd) in commands {
            let command = json_escape(cmd_name);
            let required = cmd.required_params();

            if required.is_empty() {
                alternatives.push(gbnf_literal(&format!(
                    r#"{{"service":"{}","command":"{}","args":{{}}}}"#,
                    service, command
                )));
                continue;
            }

            let mut parts = Vec::with_capacity(required.len() * 2 + 1);
            let mut fragment = format!(r#"{{"service":"{}","command":"{}","args":{{"#, service, command);
            for (i, param) in required.iter().enumerate() {
                if i > 0 {
                    fragment.push(',');
                }
                fragment.push_str(&format!(r#""{}":""#, json_escape(&param.name)));
                parts.push(gbnf_literal(&fragment));

                match domains.get(&param.name) {
                    Some(values) if !values.is_empty() => {
                        let choices: Vec<String> = values
                            .iter()
                            .map(|v| gbnf_literal(&json_escape(v)))
                            .collect();
                        parts.push(format!("({})", choices.join(" | ")));
                    }
                    _ => {
                        parts.push(OPEN_VALUE_RULE.to_string());
                        needs_open_value = true;
                    }
                }
                fragment = "\"".to_string();
            }
            fragment.push_str("}}");
            parts.push(gbnf_literal(&fragment));
            alternatives.push(parts.join(" "));
        }

        let name = unique_rule_name(&iface.name, &mut used_names);
        rules.push(format!("{} ::= {}", name, alternatives.join(" | ")));
        service_rules.push(name);
    }

    let mut root_alternatives = service_rules;
    root_alternatives.push(gbnf_literal(FALLBACK_SENTINEL));
    rules.insert(0, format!("root ::= {}", root_alternatives.join(" | ")));

    if needs_open_value {
        rules.push(format!("{} ::= {}", OPEN_VALUE_RULE, OPEN_VALUE_BODY));
    }

    rules.join("\n")
}

fn unique_rule_name(service: &str, used: &mut HashSet<String>) -> String {
    let base = rule_name(service);
    let mut candidate = base.clone();
    let mut n = 2;
    while used.contains(&candidate) {
        candidate = format!("{}-{}", base, n);
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}
