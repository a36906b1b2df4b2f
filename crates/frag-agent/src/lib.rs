//! # frag-agent
//!
//! Chat-model client, sandbox tools and the agent runtime for Frag jobs.
//!
//! - [`ChatModel`] answers a self-contained [`ChatRequest`]; [`OpenAiClient`]
//!   talks to any OpenAI-compatible chat-completions endpoint
//! - [`Tool`]s act on the job's sandbox through a [`ToolContext`] that carries
//!   the sandbox id and the job's mutable [`AgentState`](frag_core::AgentState)
//! - An [`Agent`] runs one model call plus its tool calls per invocation,
//!   then lets its [`LifecycleHook`]s inspect the result
//!
//! Model calls and tool calls are memoized through
//! [`Steps`](frag_core::Steps), so a retried job replays instead of repeating.

mod agent;
mod auth;
mod circuit_breaker;
mod client;
pub mod lifecycle;
pub mod marker;
mod mock;
mod model;
pub mod tools;
mod types;

pub use agent::Agent;
pub use auth::api_key_from_env;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::OpenAiClient;
pub use lifecycle::{LifecycleHook, SummaryHook};
pub use mock::ScriptedModel;
pub use model::ChatModel;
pub use tools::{ReadFiles, RunCommand, Tool, ToolContext, ToolSet, WriteFiles, WriteOutcome};
pub use types::*;
