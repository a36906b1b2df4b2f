//! Agent runtime
//!
//! One invocation is one model call followed by sequential execution of
//! every tool call in the response, then the lifecycle hooks. The model call
//! is a memoized step named after the agent, so a replayed invocation sees
//! exactly the output the first attempt saw.

use chrono::Utc;
use frag_core::config::AgentModelConfig;
use frag_core::{FragError, Result, Steps};
use std::sync::Arc;
use tracing::{debug, info};

use crate::lifecycle::LifecycleHook;
use crate::model::ChatModel;
use crate::tools::{ToolContext, ToolSet};
use crate::types::{AgentResult, ChatMessage, ChatRequest, ModelResponse, ToolCall, ToolResult};

/// A model binding plus system prompt, tools and hooks
#[derive(Clone)]
pub struct Agent {
    name: String,
    description: String,
    system: String,
    model: Arc<dyn ChatModel>,
    config: AgentModelConfig,
    tools: ToolSet,
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        system: impl Into<String>,
        model: Arc<dyn ChatModel>,
        config: AgentModelConfig,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            system: system.into(),
            model,
            config,
            tools: ToolSet::new(),
            hooks: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_hook(mut self, hook: impl LifecycleHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Invoke the agent once over `messages`
    ///
    /// Tool failures come back as text inside the result. Model failures,
    /// malformed tool calls and an unavailable sandbox are errors.
    pub async fn run(&self, messages: &[ChatMessage], ctx: &mut ToolContext<'_>) -> Result<AgentResult> {
        let response = self.infer(ctx.steps, messages).await?;

        let mut tool_results = Vec::new();
        for call in response.tool_calls() {
            let output = self.call_tool(call, ctx).await?;
            tool_results.push(ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                output,
            });
        }

        let result = AgentResult {
            agent: self.name.clone(),
            output: response.output,
            tool_results,
            usage: response.usage,
            timestamp: Utc::now(),
        };

        for hook in &self.hooks {
            debug!("Running {} hook for {}", hook.name(), self.name);
            hook.on_response(&result, ctx.state);
        }

        Ok(result)
    }

    /// Single-turn, tool-less invocation with `input` as the only user message
    ///
    /// Any tool calls in the response are ignored and hooks do not run.
    pub async fn run_once(&self, steps: &Steps, input: &str) -> Result<AgentResult> {
        let response = self.infer(steps, &[ChatMessage::user(input)]).await?;

        Ok(AgentResult {
            agent: self.name.clone(),
            output: response.output,
            tool_results: Vec::new(),
            usage: response.usage,
            timestamp: Utc::now(),
        })
    }

    fn request(&self, messages: &[ChatMessage]) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            system: self.system.clone(),
            messages: messages.to_vec(),
            tools: self.tools.definitions(),
        }
    }

    async fn infer(&self, steps: &Steps, messages: &[ChatMessage]) -> Result<ModelResponse> {
        let request = self.request(messages);
        let model = &self.model;

        debug!(
            "{} inference over {} message(s) with {} tool(s)",
            self.name,
            request.messages.len(),
            request.tools.len()
        );
        steps
            .run(&self.name, || async { model.complete(&request).await })
            .await
    }

    async fn call_tool(&self, call: &ToolCall, ctx: &mut ToolContext<'_>) -> Result<String> {
        let tool = self.tools.get(&call.name).ok_or_else(|| {
            FragError::MalformedToolCall(format!("{} called unknown tool {}", self.name, call.name))
        })?;

        let raw = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };
        let arguments: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
            FragError::MalformedToolCall(format!("{} arguments are not JSON: {}", call.name, e))
        })?;

        info!("{} calling tool {}", self.name, call.name);
        tool.execute(arguments, ctx).await
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.config.model)
            .field("tools", &self.tools)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
