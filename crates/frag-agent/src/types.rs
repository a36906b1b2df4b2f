//! Type definitions for agent/model interactions

use chrono::{DateTime, Utc};
use frag_core::{HistoryMessage, Role};
use serde::{Deserialize, Serialize};

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string, exactly as the model produced it
    pub arguments: String,
}

/// One message in the conversation sent to a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    User {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}

impl From<&HistoryMessage> for ChatMessage {
    fn from(message: &HistoryMessage) -> Self {
        match message.role {
            Role::User => Self::user(message.content.clone()),
            Role::Assistant => Self::assistant(message.content.clone()),
        }
    }
}

/// Tool schema advertised to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object
    pub parameters: serde_json::Value,
}

/// A single model inference request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// Text payload of an output message: a plain string or a list of text parts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<TextPart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

impl MessageContent {
    /// Plain text, with list parts concatenated in order
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts.iter().map(|part| part.text.as_str()).collect(),
        }
    }
}

/// One element of a model response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputMessage {
    Text {
        role: Role,
        content: MessageContent,
    },
    ToolCall(ToolCall),
}

impl OutputMessage {
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Text {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self::ToolCall(ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        })
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// What a model returned for one request
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    pub output: Vec<OutputMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ModelResponse {
    pub fn new(output: Vec<OutputMessage>) -> Self {
        Self { output, usage: None }
    }

    /// Response holding a single assistant text message
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![OutputMessage::assistant_text(text)])
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.output.iter().filter_map(|message| match message {
            OutputMessage::ToolCall(call) => Some(call),
            OutputMessage::Text { .. } => None,
        })
    }
}

/// Output of one executed tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub output: String,
}

/// Result of a single agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent: String,
    pub output: Vec<OutputMessage>,
    pub tool_results: Vec<ToolResult>,
    pub usage: Option<Usage>,
    pub timestamp: DateTime<Utc>,
}

impl AgentResult {
    /// Messages to append to the conversation so the next invocation sees this one
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for message in &self.output {
            match message {
                OutputMessage::Text {
                    role: Role::Assistant,
                    content,
                } => text.push_str(&content.to_text()),
                OutputMessage::Text { .. } => {}
                OutputMessage::ToolCall(call) => tool_calls.push(call.clone()),
            }
        }

        let mut messages = Vec::with_capacity(1 + self.tool_results.len());
        if !text.is_empty() || !tool_calls.is_empty() {
            messages.push(ChatMessage::Assistant {
                content: (!text.is_empty()).then_some(text),
                tool_calls,
            });
        }
        messages.extend(
            self.tool_results
                .iter()
                .map(|result| ChatMessage::tool(result.call_id.clone(), result.output.clone())),
        );
        messages
    }
}
