//! zmw-router CLI module
//!
//! # Commands
//!
//! - `services` - List known services
//! - `context` - Show the prompt context selected for a query
//! - `grammar` - Show the generation grammar compiled for a query
//! - `ask` - Run a query end to end
//! - `evaluate` - Score a labelled prompt set

pub mod commands;
pub mod context;
pub mod output;

pub use context::CliContext;
pub use output::{OutputFormat, OutputFormatter};
