//! Title and response generation from the final summary

use frag_agent::{Agent, ChatModel, OutputMessage};
use frag_core::config::ModelsConfig;
use frag_core::{Result, Steps, DEFAULT_RESPONSE, DEFAULT_TITLE};
use std::sync::Arc;
use tracing::debug;

use crate::prompt::{FRAGMENT_TITLE_PROMPT, RESPONSE_PROMPT};

pub const TITLE_AGENT: &str = "fragment-title-generator";
pub const RESPONSE_AGENT: &str = "response-generator";

/// Generated title and user-facing reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostProcessed {
    pub title: String,
    pub response: String,
}

/// Text of the first output message, or `default`
///
/// Only a missing or non-text first message yields the default. Text is
/// used as is, even when blank. List content is concatenated.
pub fn extract_output(output: &[OutputMessage], default: &str) -> String {
    match output.first() {
        Some(OutputMessage::Text { content, .. }) => content.to_text(),
        _ => default.to_string(),
    }
}

/// The two single-turn, tool-less agents run after the network halts
#[derive(Debug, Clone)]
pub struct PostProcessor {
    title: Agent,
    response: Agent,
}

impl PostProcessor {
    pub fn new(title_model: Arc<dyn ChatModel>, response_model: Arc<dyn ChatModel>, models: &ModelsConfig) -> Self {
        Self {
            title: Agent::new(TITLE_AGENT, FRAGMENT_TITLE_PROMPT, title_model, models.title.clone())
                .with_description("A fragment title generator"),
            response: Agent::new(
                RESPONSE_AGENT,
                RESPONSE_PROMPT,
                response_model,
                models.response.clone(),
            )
            .with_description("A response generator"),
        }
    }

    /// Run both agents over `summary`. Each model call is a memoized step.
    pub async fn run(&self, steps: &Steps, summary: &str) -> Result<PostProcessed> {
        let title = self.title.run_once(steps, summary).await?;
        let response = self.response.run_once(steps, summary).await?;

        let processed = PostProcessed {
            title: extract_output(&title.output, DEFAULT_TITLE),
            response: extract_output(&response.output, DEFAULT_RESPONSE),
        };
        debug!("Generated title {:?}", processed.title);
        Ok(processed)
    }
}
