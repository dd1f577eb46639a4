//! Output formatting for CLI commands

use colored::Colorize;
use serde::Serialize;
use std::fmt::Display;

/// Supported output formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format (default)
    #[default]
    Table,
    Json,
    /// Plain text, no colors
    Plain,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "plain" => Ok(OutputFormat::Plain),
            _ => Err(format!(
                "Unknown output format '{}'. Valid options: table, json, plain",
                s
            )),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Plain => write!(f, "plain"),
        }
    }
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Table => println!("{} {}", "✓".green(), message),
            OutputFormat::Plain => println!("OK {}", message),
        }
    }

    pub fn error(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({"status": "error", "message": message})
                );
            }
            OutputFormat::Table => eprintln!("{} {}", "✗".red(), message),
            OutputFormat::Plain => eprintln!("ERROR {}", message),
        }
    }

    pub fn warning(&self, message: &str) {
        match self.format {
            OutputFormat::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({"status": "warning", "message": message})
                );
            }
            OutputFormat::Table => eprintln!("{} {}", "⚠".yellow(), message),
            OutputFormat::Plain => eprintln!("WARNING {}", message),
        }
    }

    /// Print data as JSON
    pub fn json<T: Serialize>(&self, data: &T) {
        match serde_json::to_string_pretty(data) {
            Ok(json) => println!("{}", json),
            Err(e) => self.error(&format!("Failed to serialize to JSON: {}", e)),
        }
    }

    pub fn kv(&self, key: &str, value: &str) {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::json!({key: value})),
            OutputFormat::Table => println!("{}: {}", key.cyan(), value),
            OutputFormat::Plain => println!("{}: {}", key, value),
        }
    }

    /// Column widths are taken from `widths`; values longer than their
    /// column push the rest of the row right.
    pub fn table_header(&self, columns: &[&str], widths: &[usize]) {
        if self.format == OutputFormat::Table {
            let header: Vec<String> = columns
                .iter()
                .zip(widths)
                .map(|(c, w)| format!("{:<w$}", c, w = *w).bold().to_string())
                .collect();
            println!("{}", header.join("  "));
            println!("{}", "-".repeat(widths.iter().map(|w| w + 2).sum()));
        }
    }

    pub fn table_row(&self, values: &[&str], widths: &[usize]) {
        match self.format {
            OutputFormat::Table => {
                let row: Vec<String> = values
                    .iter()
                    .zip(widths)
                    .map(|(v, w)| format!("{:<w$}", v, w = *w))
                    .collect();
                println!("{}", row.join("  "));
            }
            OutputFormat::Plain => println!("{}", values.join("\t")),
            OutputFormat::Json => {}
        }
    }

    pub fn section(&self, title: &str) {
        match self.format {
            OutputFormat::Table => {
                println!();
                println!("{}", title.bold().underline());
                println!();
            }
            OutputFormat::Plain => {
                println!();
                println!("{}", title);
                println!();
            }
            OutputFormat::Json => {}
        }
    }

    /// Multi-line text block, printed verbatim
    pub fn block(&self, text: &str) {
        if self.format != OutputFormat::Json {
            println!("{}", text);
        }
    }

    pub fn list_item(&self, item: &str) {
        match self.format {
            OutputFormat::Table => println!("  {} {}", "•".cyan(), item),
            OutputFormat::Plain => println!("  - {}", item),
            OutputFormat::Json => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_formats_case_insensitively() {
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("plain".parse::<OutputFormat>(), Ok(OutputFormat::Plain));
        assert!("rtfs".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::default().to_string(), "table");
    }
}
