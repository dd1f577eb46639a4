use super::{CompletionRequest, InferenceEngine};
use crate::error::{RouterError, RouterResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays a fixed queue of completions and records every request it saw.
/// An exhausted queue behaves like an engine that is not loaded.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    replies: Mutex<VecDeque<RouterResult<String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedEngine {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a failure instead of a completion
    pub fn push_error(&self, error: RouterError) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(error));
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> RouterResult<String> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front())
            .unwrap_or_else(|| {
                Err(RouterError::ModelUnavailable(
                    "no scripted completion left".to_string(),
                ))
            })
    }

    async fn count_tokens(&self, text: &str) -> Option<usize> {
        Some(text.split_whitespace().count())
    }
}
