//! LLM command router
//!
//! Turns a natural-language request into one validated command against one
//! of many independently running services on a pub/sub bus.
//!
//! - **Discovery**: [`registry`] learns service interface documents
//! - **Filtering**: [`relevance`] bounds which services the model sees
//! - **Prompting**: [`compactor`] and [`grammar`] render the same filtered set
//!   as prompt text and as a GBNF generation grammar
//! - **Execution**: [`dispatch`] publishes the chosen command and correlates
//!   replies
//! - **Orchestration**: [`router`] wires it together around an
//!   [`inference::InferenceEngine`]

pub mod bus;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compactor;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod grammar;
pub mod inference;
pub mod interface;
pub mod registry;
pub mod relevance;
pub mod router;
pub mod things;

pub use bus::{BusMessage, InMemoryBus, MessageBus};
pub use config::RouterConfig;
pub use dispatch::{CommandDispatcher, CommandOutcome, ModelSelection};
pub use error::{RouterError, RouterResult};
pub use grammar::{compile_grammar, FALLBACK_SENTINEL};
pub use interface::{EnricherRegistry, ServiceInterface};
pub use registry::{CapabilityRegistry, RegistrySnapshot};
pub use relevance::RelevanceFilter;
pub use router::{AskOptions, QueryOutcome, QueryReport, Router};
