//! Lifecycle hooks run after each agent invocation
//!
//! Hooks see the finished [`AgentResult`] and may update the shared
//! [`AgentState`]. They run after every tool call of the invocation has
//! executed, in registration order, and never fail.

use frag_core::AgentState;
use tracing::{debug, info};

use crate::marker::{contains_marker, last_assistant_text, summary_body};
use crate::types::AgentResult;

/// Callback invoked with each agent result
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_response(&self, result: &AgentResult, state: &mut AgentState);
}

/// Copies the agent's final message into `state.summary` once it carries the
/// completion marker
///
/// This is the only writer of the summary. A message without the marker
/// leaves any earlier summary alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryHook;

impl LifecycleHook for SummaryHook {
    fn name(&self) -> &'static str {
        "summary"
    }

    fn on_response(&self, result: &AgentResult, state: &mut AgentState) {
        let Some(text) = last_assistant_text(&result.output) else {
            debug!("{}: no assistant text in response", result.agent);
            return;
        };

        if contains_marker(&text) {
            match summary_body(&text) {
                Some(body) => info!("{} completed: {}", result.agent, body),
                None => info!("{} emitted the completion marker", result.agent),
            }
            state.summary = text;
        }
    }
}
