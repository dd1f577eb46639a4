use super::{CompletionRequest, InferenceEngine};
use crate::error::{RouterError, RouterResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct LlamaServerConfig {
    /// Base URL, e.g. `http://127.0.0.1:8080`
    pub endpoint: String,
    pub request_timeout: Duration,
}

impl Default for LlamaServerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    grammar: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct TokenizeRequest<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenizeResponse {
    tokens: Vec<serde_json::Value>,
}

fn chat_body(request: &CompletionRequest) -> ChatRequest<'_> {
    ChatRequest {
        messages: vec![
            ChatMessage {
                role: "system",
                content: &request.system_prompt,
            },
            ChatMessage {
                role: "user",
                content: &request.user_prompt,
            },
        ],
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        stream: false,
        grammar: request.grammar.as_deref(),
    }
}

fn first_choice(raw_body: &str) -> RouterResult<String> {
    let response: ChatResponse = serde_json::from_str(raw_body)
        .map_err(|e| RouterError::Inference(format!("Unexpected completion response: {}", e)))?;
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| RouterError::Inference("Completion response has no choices".to_string()))
}

fn preview(body: &str) -> String {
    if body.len() > 500 {
        let cut = (0..=500).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        format!("{}... [truncated, total length: {} chars]", &body[..cut], body.len())
    } else {
        body.to_string()
    }
}

/// Client for llama.cpp's `llama-server` (OpenAI compatible chat endpoint
/// plus native grammar and tokenizer support)
pub struct LlamaServerEngine {
    config: LlamaServerConfig,
    client: reqwest::Client,
}

impl LlamaServerEngine {
    pub fn new(config: LlamaServerConfig) -> RouterResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RouterError::Inference(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn map_send_error(&self, e: reqwest::Error) -> RouterError {
        if e.is_connect() || e.is_timeout() {
            RouterError::ModelUnavailable(format!(
                "llama-server at {} not reachable: {}",
                self.config.endpoint, e
            ))
        } else {
            RouterError::Inference(format!("HTTP request failed: {}", e))
        }
    }
}

#[async_trait]
impl InferenceEngine for LlamaServerEngine {
    fn name(&self) -> &str {
        "llama-server"
    }

    async fn complete(&self, request: &CompletionRequest) -> RouterResult<String> {
        let url = self.url("v1/chat/completions");
        debug!(
            "POST {} (grammar: {}, max_tokens: {})",
            url,
            request.grammar.is_some(),
            request.max_tokens
        );

        let response = self
            .client
            .post(&url)
            .json(&chat_body(request))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let raw_body = response
            .text()
            .await
            .map_err(|e| RouterError::Inference(format!("Failed to read response body: {}", e)))?;

        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(RouterError::ModelUnavailable(
                "LLM is still loading".to_string(),
            ));
        }
        if !status.is_success() {
            warn!("llama-server answered HTTP {}", status.as_u16());
            return Err(RouterError::Inference(format!(
                "Completion request failed (HTTP {}): {}",
                status.as_u16(),
                preview(&raw_body)
            )));
        }

        first_choice(&raw_body)
    }

    async fn count_tokens(&self, text: &str) -> Option<usize> {
        let response = self
            .client
            .post(self.url("tokenize"))
            .json(&TokenizeRequest { content: text })
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response
            .json::<TokenizeResponse>()
            .await
            .ok()
            .map(|r| r.tokens.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engine_for(server: &MockServer) -> LlamaServerEngine {
        LlamaServerEngine::new(LlamaServerConfig {
            endpoint: server.uri(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    async fn answer_completions(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[test]
    fn chat_body_carries_grammar_only_when_set() {
        let request = CompletionRequest::new("sys", "turn on the lights");
        let body = serde_json::to_value(chat_body(&request)).unwrap();
        assert_eq!(body["messages"][0], json!({"role": "system", "content": "sys"}));
        assert_eq!(body["messages"][1]["content"], json!("turn on the lights"));
        assert!(body.get("grammar").is_none());

        let request = request.with_grammar(Some("root ::= \"DONT_KNOW\"".to_string()));
        let body = serde_json::to_value(chat_body(&request)).unwrap();
        assert_eq!(body["grammar"], json!("root ::= \"DONT_KNOW\""));
    }

    #[test]
    fn extracts_first_choice() {
        let raw = r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"DONT_KNOW"}}]}"#;
        assert_eq!(first_choice(raw).unwrap(), "DONT_KNOW");
        assert!(matches!(
            first_choice(r#"{"choices":[]}"#),
            Err(RouterError::Inference(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_model_unavailable() {
        let engine = LlamaServerEngine::new(LlamaServerConfig {
            endpoint: "http://127.0.0.1:9".to_string(),
            request_timeout: Duration::from_secs(2),
        })
        .unwrap();
        let err = engine
            .complete(&CompletionRequest::new("sys", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::ModelUnavailable(_)));
        assert_eq!(engine.count_tokens("hello").await, None);
    }

    #[tokio::test]
    async fn completion_returns_first_choice() {
        let server = MockServer::start().await;
        answer_completions(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "DONT_KNOW"}}]
            })),
        )
        .await;

        let request = CompletionRequest::new("sys", "meaning of life")
            .with_grammar(Some("root ::= \"DONT_KNOW\"".to_string()));
        let completion = engine_for(&server).complete(&request).await.unwrap();
        assert_eq!(completion, "DONT_KNOW");

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["grammar"], json!("root ::= \"DONT_KNOW\""));
        assert_eq!(body["stream"], json!(false));
    }

    #[tokio::test]
    async fn loading_model_is_unavailable() {
        let server = MockServer::start().await;
        answer_completions(
            &server,
            ResponseTemplate::new(503).set_body_string("Loading model"),
        )
        .await;

        let err = engine_for(&server)
            .complete(&CompletionRequest::new("sys", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RouterError::ModelUnavailable(reason) if reason == "LLM is still loading"
        ));
    }

    #[tokio::test]
    async fn server_error_is_an_inference_error() {
        let server = MockServer::start().await;
        answer_completions(
            &server,
            ResponseTemplate::new(500).set_body_string("grammar parse failed"),
        )
        .await;

        let err = engine_for(&server)
            .complete(&CompletionRequest::new("sys", "hello"))
            .await
            .unwrap_err();
        match err {
            RouterError::Inference(message) => {
                assert!(message.contains("HTTP 500"));
                assert!(message.contains("grammar parse failed"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn counts_tokens_through_tokenize() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tokenize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tokens": [1, 2, 3]})))
            .mount(&server)
            .await;

        assert_eq!(engine_for(&server).count_tokens("turn on").await, Some(3));
    }
}
