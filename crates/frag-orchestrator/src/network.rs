//! Control loop driving the coding agent
//!
//! The conversation starts from the job's recent history plus the prompt.
//! After every invocation the agent's messages are appended and the state
//! machine decides whether to invoke again.

use frag_agent::{Agent, ChatMessage, ToolContext, Usage};
use frag_core::{FragError, JobInput, Result};
use tracing::{debug, info};

use crate::activity_logger::ActivityLogger;
use crate::state_machine::{transition, Action, Event, HaltReason, State};

/// Terminal state of one network run
#[derive(Debug, Clone)]
pub struct NetworkRun {
    pub call_count: usize,
    pub reason: HaltReason,
    /// Full conversation, seed messages included
    pub messages: Vec<ChatMessage>,
    pub usage: Usage,
}

/// Bounded loop over a single agent
#[derive(Debug, Clone)]
pub struct Network {
    name: String,
    agent: Agent,
    max_iter: usize,
    activity_logger: Option<ActivityLogger>,
}

impl Network {
    pub fn new(name: impl Into<String>, agent: Agent, max_iter: usize) -> Self {
        Self {
            name: name.into(),
            agent,
            max_iter,
            activity_logger: None,
        }
    }

    pub fn with_activity_logger(mut self, logger: ActivityLogger) -> Self {
        self.activity_logger = Some(logger);
        self
    }

    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    /// Conversation the first invocation sees
    pub fn seed_messages(input: &JobInput) -> Vec<ChatMessage> {
        input
            .recent_history
            .iter()
            .map(ChatMessage::from)
            .chain(std::iter::once(ChatMessage::user(input.value.clone())))
            .collect()
    }

    /// Run until the summary carries the completion marker or `max_iter`
    /// invocations have happened
    pub async fn run(&self, input: &JobInput, ctx: &mut ToolContext<'_>) -> Result<NetworkRun> {
        let mut messages = Self::seed_messages(input);
        let mut usage = Usage::default();

        let (mut state, mut actions) = transition(
            State::Start,
            Event::Begin {
                max_iter: self.max_iter,
            },
        );

        loop {
            let mut invoked = false;

            for action in std::mem::take(&mut actions) {
                match action {
                    Action::LogActivity { message } => info!("{}: {}", self.name, message),
                    Action::InvokeAgent { invocation } => {
                        info!("=== {} invocation {} of {} ===", self.name, invocation, self.max_iter);
                        if let Some(logger) = &self.activity_logger {
                            logger.log_iteration_start(invocation, self.max_iter).await;
                        }

                        let result = self.agent.run(&messages, ctx).await?;
                        if let Some(step_usage) = &result.usage {
                            usage.add(step_usage);
                        }
                        messages.extend(result.to_messages());
                        debug!(
                            "Invocation {} ran {} tool call(s); {} file(s) tracked",
                            invocation,
                            result.tool_results.len(),
                            ctx.state.files.len()
                        );

                        if let Some(logger) = &self.activity_logger {
                            logger
                                .log_iteration_complete(invocation, &result, ctx.state.files.len())
                                .await;
                        }
                        invoked = true;
                    }
                }
            }

            if let State::Halted { call_count, reason } = state {
                return Ok(NetworkRun {
                    call_count,
                    reason,
                    messages,
                    usage,
                });
            }

            if !invoked {
                return Err(FragError::Other(format!(
                    "{} stalled in state {:?}",
                    self.name, state
                )));
            }

            (state, actions) = transition(
                state,
                Event::InvocationComplete {
                    marker_present: ctx.state.has_completion_marker(),
                },
            );
        }
    }
}
