//! OpenAI-compatible chat-completions client
//!
//! Every request is self-contained. Rate limits (429) and server errors (5xx)
//! are retried with exponential backoff; other failures trip a circuit breaker
//! shared by all clones of the client.

use async_trait::async_trait;
use frag_core::{FragConfig, FragError, Result, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::model::ChatModel;
use crate::types::{
    ChatMessage, ChatRequest, MessageContent, ModelResponse, OutputMessage, ToolCall, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MAX_TOKENS: usize = 16000;

// Rate limit retry configuration
const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Chat-completions client
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_tokens: usize,
    initial_backoff: Duration,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            initial_backoff: INITIAL_BACKOFF,
            circuit_breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    /// Build from the `[provider]` config section, reading the key from the environment
    pub fn from_config(config: &FragConfig) -> Result<Self> {
        let api_key = auth::api_key_from_env(&config.provider.api_key_env)?;
        Ok(Self::new(api_key)
            .with_base_url(&config.provider.base_url)
            .with_max_tokens(config.provider.max_tokens))
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelResponse> {
        if !self.circuit_breaker.can_execute() {
            return Err(FragError::ApiLimit(format!(
                "Circuit breaker is OPEN after repeated provider failures. Wait {} seconds before retry.",
                self.circuit_breaker.time_until_retry().as_secs()
            )));
        }

        let body = WireRequest::from_request(request, self.max_tokens);
        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            tracing::debug!(
                "Sending request to {} (model {}, attempt {})",
                self.endpoint(),
                request.model,
                retries + 1
            );

            let response = self
                .http
                .post(self.endpoint())
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| FragError::Api(format!("Failed to send request: {}", e)))?;

            let status = response.status();

            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RETRIES {
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown".to_string());
                    return Err(FragError::ApiLimit(format!(
                        "Rate limit exceeded after {} retries. Last error: {}",
                        MAX_RETRIES, error_text
                    )));
                }

                let wait = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(backoff);

                tracing::warn!(
                    "Rate limited (429). Waiting {:?} before retry {}/{}",
                    wait,
                    retries,
                    MAX_RETRIES
                );
                tokio::time::sleep(wait).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());

                if status.is_server_error() && retries < MAX_RETRIES {
                    retries += 1;
                    tracing::warn!(
                        "Server error ({}). Waiting {:?} before retry {}/{}",
                        status,
                        backoff,
                        retries,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }

                self.circuit_breaker.record_failure();
                tracing::error!(
                    "Circuit breaker: recorded failure (count: {})",
                    self.circuit_breaker.failure_count()
                );
                return Err(FragError::Api(format!(
                    "Provider error {}: {}",
                    status, error_text
                )));
            }

            let wire: WireResponse = response
                .json()
                .await
                .map_err(|e| FragError::Api(format!("Failed to parse response: {}", e)))?;
            let parsed = wire.into_model_response()?;

            self.circuit_breaker.record_success();

            match parsed.usage {
                Some(usage) => tracing::info!(
                    "Model {} answered with {} message(s) ({} input tokens, {} output tokens)",
                    request.model,
                    parsed.output.len(),
                    usage.input_tokens,
                    usage.output_tokens
                ),
                None => tracing::info!(
                    "Model {} answered with {} message(s)",
                    request.model,
                    parsed.output.len()
                ),
            }

            return Ok(parsed);
        }
    }
}

// Wire format

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    max_tokens: usize,
}

impl<'a> WireRequest<'a> {
    fn from_request(request: &'a ChatRequest, max_tokens: usize) -> Self {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(WireMessage::text("system", &request.system));
        messages.extend(request.messages.iter().map(WireMessage::from_chat));

        let tools = request
            .tools
            .iter()
            .map(|tool| WireTool {
                kind: "function",
                function: WireFunctionDef {
                    name: &tool.name,
                    description: &tool.description,
                    parameters: &tool.parameters,
                },
            })
            .collect();

        Self {
            model: &request.model,
            messages,
            tools,
            temperature: request.temperature,
            max_tokens,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn from_chat(message: &ChatMessage) -> Self {
        match message {
            ChatMessage::User { content } => Self::text("user", content),
            ChatMessage::Assistant { content, tool_calls } => Self {
                role: "assistant".to_string(),
                content: content.clone(),
                tool_calls: (!tool_calls.is_empty())
                    .then(|| tool_calls.iter().map(WireToolCall::from_call).collect()),
                tool_call_id: None,
            },
            ChatMessage::Tool {
                tool_call_id,
                content,
            } => Self {
                role: "tool".to_string(),
                content: Some(content.clone()),
                tool_calls: None,
                tool_call_id: Some(tool_call_id.clone()),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

impl WireToolCall {
    fn from_call(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            kind: function_kind(),
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunctionDef<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

impl WireResponse {
    fn into_model_response(self) -> Result<ModelResponse> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| FragError::Api("No choices in response".to_string()))?;

        let mut output = Vec::new();
        if let Some(content) = choice.message.content.filter(|c| !c.is_empty()) {
            output.push(OutputMessage::Text {
                role: Role::Assistant,
                content: MessageContent::Text(content),
            });
        }
        for call in choice.message.tool_calls.unwrap_or_default() {
            output.push(OutputMessage::ToolCall(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            }));
        }

        Ok(ModelResponse {
            output,
            usage: self.usage.map(|usage| Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolDefinition;
    use serde_json::json;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4.1".to_string(),
            temperature: Some(0.1),
            system: "You are a coder".to_string(),
            messages: vec![
                ChatMessage::user("Build a counter"),
                ChatMessage::Assistant {
                    content: None,
                    tool_calls: vec![ToolCall {
                        id: "call_1".to_string(),
                        name: "terminal".to_string(),
                        arguments: r#"{"command":"ls"}"#.to_string(),
                    }],
                },
                ChatMessage::tool("call_1", "app\n"),
            ],
            tools: vec![ToolDefinition {
                name: "terminal".to_string(),
                description: "Run a command".to_string(),
                parameters: json!({"type": "object"}),
            }],
        }
    }

    #[test]
    fn test_request_wire_shape() {
        let request = request();
        let wire = serde_json::to_value(WireRequest::from_request(&request, 1000)).unwrap();

        assert_eq!(wire["model"], "gpt-4.1");
        assert_eq!(wire["max_tokens"], 1000);
        assert_eq!(wire["messages"][0]["role"], "system");
        assert_eq!(wire["messages"][1]["content"], "Build a counter");
        assert_eq!(wire["messages"][2]["tool_calls"][0]["type"], "function");
        assert_eq!(wire["messages"][2]["tool_calls"][0]["function"]["name"], "terminal");
        assert!(wire["messages"][2].get("content").is_none());
        assert_eq!(wire["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(wire["tools"][0]["function"]["name"], "terminal");
    }

    #[test]
    fn test_no_tools_omits_field() {
        let mut request = request();
        request.tools.clear();
        request.temperature = None;
        let wire = serde_json::to_value(WireRequest::from_request(&request, 1000)).unwrap();

        assert!(wire.get("tools").is_none());
        assert!(wire.get("temperature").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let wire: WireResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "readFiles", "arguments": "{\"files\":[\"a\"]}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 3}
        }))
        .unwrap();

        let response = wire.into_model_response().unwrap();
        assert_eq!(response.output.len(), 1);
        assert_eq!(
            response.output[0],
            OutputMessage::tool_call("call_9", "readFiles", "{\"files\":[\"a\"]}")
        );
        assert_eq!(
            response.usage,
            Some(Usage {
                input_tokens: 10,
                output_tokens: 3
            })
        );
    }

    #[test]
    fn test_empty_choices_is_error() {
        let wire: WireResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(wire.into_model_response(), Err(FragError::Api(_))));
    }

    #[test]
    fn test_builder() {
        let client = OpenAiClient::new("sk-test")
            .with_base_url("http://localhost:8080/v1/")
            .with_max_tokens(8000);
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(client.max_tokens, 8000);
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast() {
        let client = OpenAiClient::new("sk-test").with_base_url("http://127.0.0.1:9");
        for _ in 0..3 {
            client.circuit_breaker().record_failure();
        }

        let result = client.complete(&request()).await;
        assert!(matches!(result, Err(FragError::ApiLimit(_))));
    }
}
