//! Compact text rendering of service interfaces for the model prompt.
//!
//! Announcements, reply schemas and metadata are left out. Only the
//! description, enrichment text and one signature line per command remain.
//! Optional parameters are omitted from signatures.

use crate::interface::{EnricherRegistry, ServiceInterface};

/// Render interfaces sorted by service name, commands sorted by name.
pub fn compact_services(services: &[ServiceInterface], enrichers: &EnricherRegistry) -> String {
    let mut sorted: Vec<&ServiceInterface> = services.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut lines = Vec::new();
    for iface in sorted {
        lines.push(format!("## {}", iface.name));
        if !iface.description.is_empty() {
            lines.push(iface.description.clone());
        }
        if let Some(extra) = enrichers.context(iface) {
            lines.push(extra);
        }

        let commands = iface.eligible_commands();
        if !commands.is_empty() {
            lines.push("Commands:".to_string());
            for (cmd_name, cmd) in commands {
                let required: Vec<&str> = cmd
                    .required_params()
                    .iter()
                    .map(|p| p.name.as_str())
                    .collect();
                let signature = if required.is_empty() {
                    cmd_name.to_string()
                } else {
                    format!("{}({})", cmd_name, required.join(", "))
                };
                let description = cmd.model_description();
                if description.is_empty() {
                    lines.push(format!("- {}", signature));
                } else {
                    lines.push(format!("- {}: {}", signature, description));
                }
            }
        }
        lines.push(String::new());
    }

    lines.join("\n")
}
