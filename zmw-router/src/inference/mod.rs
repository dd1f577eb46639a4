//! Inference engine abstraction
//!
//! The router needs exactly one thing from a language model: given a system
//! prompt, a user utterance and an optional GBNF grammar, return one
//! completion. Engines implement [`InferenceEngine`].
//!
//! - **llama.cpp server**: `llama.rs` - HTTP client for a local llama-server
//! - **Scripted**: `scripted.rs` - canned completions for tests and offline runs

pub mod llama;
pub mod scripted;

pub use llama::{LlamaServerConfig, LlamaServerEngine};
pub use scripted::ScriptedEngine;

use crate::error::RouterResult;
use async_trait::async_trait;
use serde::Serialize;

/// One constrained completion call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub grammar: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            grammar: None,
            max_tokens: 256,
            temperature: 0.0,
        }
    }

    pub fn with_grammar(mut self, grammar: Option<String>) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Human readable engine name for logs and reports
    fn name(&self) -> &str;

    /// Run one completion. An engine that is not ready yet answers
    /// `RouterError::ModelUnavailable`.
    async fn complete(&self, request: &CompletionRequest) -> RouterResult<String>;

    /// Token count of `text`, when the engine can tell
    async fn count_tokens(&self, _text: &str) -> Option<usize> {
        None
    }
}
