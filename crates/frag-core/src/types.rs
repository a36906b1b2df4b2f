//! Core type definitions for Frag jobs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::{FragError, Result};

/// Substring an agent embeds in its final message to signal completion
pub const COMPLETION_MARKER: &str = "<task_summary>";

/// Event name a prompt submission is enqueued under
pub const CODE_AGENT_EVENT: &str = "code-agent/run";

/// Longest prompt a user may submit
pub const MAX_PROMPT_CHARS: usize = 10_000;

/// Content of the outcome message when a job produced nothing usable
pub const ERROR_MESSAGE: &str = "Something went wrong. Please try again later.";

/// Fallback fragment title
pub const DEFAULT_TITLE: &str = "Fragment";

/// Fallback assistant response
pub const DEFAULT_RESPONSE: &str = "Here you go";

/// Project identifier (opaque, owned by the data store)
pub type ProjectId = String;

/// Relative path -> full file content. Ordered so serialized fragments are stable.
pub type FileMap = BTreeMap<String, String>;

/// Opaque handle to a sandbox instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxId(pub String);

impl SandboxId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SandboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    /// Anything that isn't an assistant is treated as the user
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("assistant") {
            Ok(Self::Assistant)
        } else {
            Ok(Self::User)
        }
    }
}

/// Kind of a persisted message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Result,
    Error,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Result => write!(f, "RESULT"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// One prior message used to seed the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

impl HistoryMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A file path with its full content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
}

/// Shared, job-scoped accumulator mutated by tools and the lifecycle hook
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// Final task summary. Empty until the agent emits the completion marker.
    pub summary: String,
    /// Every file written so far. Later writes to a path overwrite earlier ones.
    pub files: FileMap,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the summary carries the completion marker (substring match only)
    pub fn has_completion_marker(&self) -> bool {
        self.summary.contains(COMPLETION_MARKER)
    }

    /// A job whose state looks like this is reported as an error
    pub fn is_incomplete(&self) -> bool {
        self.summary.is_empty() || self.files.is_empty()
    }
}

/// Fragment attached to a successful outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    pub sandbox_url: String,
    pub title: String,
    pub files: FileMap,
}

/// Message to persist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub project_id: ProjectId,
    pub content: String,
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
}

impl NewMessage {
    /// The fixed outcome for a job that produced nothing usable
    pub fn error(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            content: ERROR_MESSAGE.to_string(),
            role: Role::Assistant,
            kind: MessageKind::Error,
            fragment: None,
        }
    }

    /// A successful outcome carrying its fragment
    pub fn result(project_id: impl Into<String>, content: impl Into<String>, fragment: Fragment) -> Self {
        Self {
            project_id: project_id.into(),
            content: content.into(),
            role: Role::Assistant,
            kind: MessageKind::Result,
            fragment: Some(fragment),
        }
    }

    /// A prompt typed by the user
    pub fn user_prompt(project_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            content: content.into(),
            role: Role::User,
            kind: MessageKind::Result,
            fragment: None,
        }
    }
}

/// Message as returned by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub content: String,
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn from_new(message: NewMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: message.project_id,
            content: message.content,
            role: message.role,
            kind: message.kind,
            fragment: message.fragment,
            created_at: Utc::now(),
        }
    }

    pub fn to_history(&self) -> HistoryMessage {
        HistoryMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Payload of a job submission event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEventData {
    pub value: String,
    pub project_id: ProjectId,
}

/// Job submission event as enqueued for the step runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    pub name: String,
    pub data: JobEventData,
}

impl JobEvent {
    /// Build a validated `code-agent/run` event
    pub fn code_agent_run(value: impl Into<String>, project_id: impl Into<String>) -> Result<Self> {
        let event = Self {
            name: CODE_AGENT_EVENT.to_string(),
            data: JobEventData {
                value: value.into(),
                project_id: project_id.into(),
            },
        };
        event.validate()?;
        Ok(event)
    }

    /// Check prompt length and project id
    pub fn validate(&self) -> Result<()> {
        if self.name != CODE_AGENT_EVENT {
            return Err(FragError::Validation(format!("Unknown event: {}", self.name)));
        }
        if self.data.project_id.trim().is_empty() {
            return Err(FragError::Validation("Project Id is required".to_string()));
        }
        let chars = self.data.value.chars().count();
        if chars == 0 {
            return Err(FragError::Validation("Value is required".to_string()));
        }
        if chars > MAX_PROMPT_CHARS {
            return Err(FragError::Validation(format!(
                "Value must be at most {} characters",
                MAX_PROMPT_CHARS
            )));
        }
        Ok(())
    }
}

/// Immutable input of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInput {
    pub value: String,
    pub project_id: ProjectId,
    /// Chronological (oldest first)
    pub recent_history: Vec<HistoryMessage>,
}

/// Structured return value of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub status: String,
    pub sandbox_url: String,
    pub title: String,
    pub files: FileMap,
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_is_substring_match() {
        let mut state = AgentState::new();
        assert!(!state.has_completion_marker());

        state.summary = "done <task_summary>half-written".to_string();
        assert!(state.has_completion_marker());
    }

    #[test]
    fn test_is_incomplete() {
        let mut state = AgentState::new();
        assert!(state.is_incomplete());

        state.summary = "<task_summary>Built</task_summary>".to_string();
        assert!(state.is_incomplete());

        state.files.insert("index.html".to_string(), "<html></html>".to_string());
        assert!(!state.is_incomplete());

        state.summary.clear();
        assert!(state.is_incomplete());
    }

    #[test]
    fn test_role_parsing_defaults_to_user() {
        assert_eq!("ASSISTANT".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!("assistant".parse::<Role>().unwrap(), Role::Assistant);
        assert_eq!("USER".parse::<Role>().unwrap(), Role::User);
        assert_eq!("system".parse::<Role>().unwrap(), Role::User);
    }

    #[test]
    fn test_error_message_shape() {
        let msg = NewMessage::error("p1");
        assert_eq!(msg.content, ERROR_MESSAGE);
        assert_eq!(msg.kind, MessageKind::Error);
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.fragment.is_none());
    }

    #[test]
    fn test_job_event_validation() {
        assert!(JobEvent::code_agent_run("build a todo app", "p1").is_ok());
        assert!(JobEvent::code_agent_run("", "p1").is_err());
        assert!(JobEvent::code_agent_run("x", "  ").is_err());
        assert!(JobEvent::code_agent_run("x".repeat(MAX_PROMPT_CHARS), "p1").is_ok());
        assert!(JobEvent::code_agent_run("x".repeat(MAX_PROMPT_CHARS + 1), "p1").is_err());
    }

    #[test]
    fn test_job_event_wire_shape() {
        let event = JobEvent::code_agent_run("hi", "p1").unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["name"], "code-agent/run");
        assert_eq!(json["data"]["value"], "hi");
        assert_eq!(json["data"]["projectId"], "p1");
    }

    #[test]
    fn test_job_result_wire_shape() {
        let result = JobResult {
            status: "ok".to_string(),
            sandbox_url: "https://3000-abc.localhost".to_string(),
            title: "Todo".to_string(),
            files: FileMap::new(),
            summary: String::new(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["sandboxUrl"], "https://3000-abc.localhost");
        assert_eq!(json["status"], "ok");
    }

    #[test]
    fn test_new_message_serializes_type_field() {
        let json = serde_json::to_value(NewMessage::error("p1")).unwrap();
        assert_eq!(json["type"], "ERROR");
        assert_eq!(json["role"], "assistant");
        assert!(json.get("fragment").is_none());
    }
}
