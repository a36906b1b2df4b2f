//! The `code-agent/run` job and its at-least-once runner
//!
//! Steps of one attempt, in order:
//!
//! 1. `get-sandbox-id`: provision the sandbox
//! 2. `get-previous-messages`: recent project history, oldest first
//! 3. the coding network (model and tool calls are steps of their own)
//! 4. title and response generation
//! 5. `get-sandbox-url` and `save-result`
//!
//! A retried attempt replays every completed step from the journal and
//! resumes at the first one that did not finish.

use frag_agent::{Agent, ChatModel, SummaryHook, ToolContext, ToolSet};
use frag_core::{
    AgentState, FragConfig, FragError, HistoryMessage, JobEvent, JobInput, JobResult, MemoryJournal,
    Result, SandboxId, StepJournal, Steps, StoredMessage,
};
use frag_sandbox::SandboxProvider;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::activity_logger::ActivityLogger;
use crate::finalizer::{is_error, Finalizer};
use crate::network::Network;
use crate::post_process::PostProcessor;
use crate::prompt::CODE_AGENT_PROMPT;
use crate::store::MessageStore;

pub const CODE_AGENT: &str = "code-agent";
pub const NETWORK_NAME: &str = "coding-agent-network";

/// Model backing each agent of a job
#[derive(Clone)]
pub struct AgentModels {
    pub code: Arc<dyn ChatModel>,
    pub title: Arc<dyn ChatModel>,
    pub response: Arc<dyn ChatModel>,
}

impl AgentModels {
    /// One client for all three agents; model names still come from config
    pub fn shared(model: Arc<dyn ChatModel>) -> Self {
        Self {
            code: model.clone(),
            title: model.clone(),
            response: model,
        }
    }
}

/// Turns a prompt into a saved fragment
#[derive(Clone)]
pub struct CodeAgentJob {
    config: FragConfig,
    sandbox: Arc<dyn SandboxProvider>,
    store: Arc<dyn MessageStore>,
    models: AgentModels,
    activity_root: Option<PathBuf>,
}

impl CodeAgentJob {
    pub fn new(
        config: FragConfig,
        sandbox: Arc<dyn SandboxProvider>,
        store: Arc<dyn MessageStore>,
        models: AgentModels,
    ) -> Self {
        Self {
            config,
            sandbox,
            store,
            models,
            activity_root: None,
        }
    }

    /// Write `<dir>/<job_id>/activity.md` for every job
    pub fn with_activity_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.activity_root = Some(dir.into());
        self
    }

    pub fn config(&self) -> &FragConfig {
        &self.config
    }

    fn code_agent(&self) -> Agent {
        Agent::new(
            CODE_AGENT,
            CODE_AGENT_PROMPT,
            self.models.code.clone(),
            self.config.models.code_agent.clone(),
        )
        .with_description("An expert coding agent")
        .with_tools(ToolSet::sandbox_tools())
        .with_hook(SummaryHook)
    }

    /// Run one attempt of the job
    pub async fn execute(&self, job_id: &str, event: &JobEvent, steps: &Steps, attempt: usize) -> Result<JobResult> {
        event.validate()?;
        let project_id = event.data.project_id.as_str();
        let logger = self
            .activity_root
            .as_ref()
            .map(|root| ActivityLogger::new(root.join(job_id)));
        if let Some(logger) = &logger {
            logger
                .log_job_start(project_id, &event.data.value, attempt, self.config.network.max_iter)
                .await;
        }

        let sandbox = &self.sandbox;
        let template = self.config.sandbox.template.as_str();
        let idle_timeout = Duration::from_secs(self.config.sandbox.idle_timeout_secs);
        let sandbox_id: SandboxId = steps
            .run("get-sandbox-id", || async {
                sandbox.create(template, idle_timeout).await
            })
            .await?;

        let store = &self.store;
        let limit = self.config.history.limit;
        let recent_history: Vec<HistoryMessage> = steps
            .run("get-previous-messages", || async {
                let mut history: Vec<HistoryMessage> = store
                    .recent_messages(project_id, limit)
                    .await?
                    .iter()
                    .map(StoredMessage::to_history)
                    .collect();
                history.reverse();
                Ok(history)
            })
            .await?;

        let input = JobInput {
            value: event.data.value.clone(),
            project_id: project_id.to_string(),
            recent_history,
        };

        let mut network = Network::new(NETWORK_NAME, self.code_agent(), self.config.network.max_iter);
        if let Some(logger) = &logger {
            network = network.with_activity_logger(logger.clone());
        }

        let mut state = AgentState::new();
        let run = {
            let mut ctx = ToolContext {
                steps,
                sandbox: self.sandbox.as_ref(),
                sandbox_id: &sandbox_id,
                state: &mut state,
            };
            network.run(&input, &mut ctx).await?
        };

        let post = PostProcessor::new(
            self.models.title.clone(),
            self.models.response.clone(),
            &self.config.models,
        )
        .run(steps, &state.summary)
        .await?;

        let finalizer = Finalizer::new(
            self.sandbox.clone(),
            self.store.clone(),
            self.config.sandbox.preview_port,
        );
        let result = finalizer
            .finalize(steps, project_id, &sandbox_id, &state, &post)
            .await?;

        if let Some(logger) = &logger {
            logger
                .log_job_complete(run.call_count, run.reason, is_error(&state), &run.usage)
                .await;
        }
        info!(
            "Job {} done after {} invocation(s) ({})",
            job_id, run.call_count, run.reason
        );
        Ok(result)
    }
}

/// Retries a job until it succeeds or attempts run out
///
/// Every attempt shares one journal, so work committed by an earlier attempt
/// is replayed rather than redone. That includes `get-sandbox-id`: a job owns
/// exactly one sandbox for its whole life, and once that sandbox is gone the
/// job fails with `SessionUnavailable` after its remaining attempts.
#[derive(Clone)]
pub struct JobRunner {
    job: CodeAgentJob,
    max_attempts: usize,
    retry_delay: Duration,
    journal_dir: Option<PathBuf>,
}

impl JobRunner {
    pub fn new(job: CodeAgentJob) -> Self {
        let max_attempts = job.config.runner.max_attempts.max(1);
        Self {
            job,
            max_attempts,
            retry_delay: Duration::from_secs(1),
            journal_dir: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Base delay between attempts, multiplied by the attempt number
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Persist journals as `<dir>/<job_id>.json` instead of in memory
    pub fn with_journal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.journal_dir = Some(dir.into());
        self
    }

    /// Run `event` under a fresh job id
    pub async fn run(&self, event: &JobEvent) -> Result<JobResult> {
        let job_id = uuid::Uuid::new_v4().simple().to_string();
        let journal: Arc<dyn StepJournal> = match &self.journal_dir {
            Some(dir) => Arc::new(frag_core::FileJournal::for_job(dir, &job_id)),
            None => Arc::new(MemoryJournal::new()),
        };
        self.run_with_journal(&job_id, event, journal).await
    }

    /// Run `event` against an existing journal, e.g. to resume a crashed job
    pub async fn run_with_journal(
        &self,
        job_id: &str,
        event: &JobEvent,
        journal: Arc<dyn StepJournal>,
    ) -> Result<JobResult> {
        event.validate()?;
        info!(
            "Running job {} for project {} (up to {} attempts)",
            job_id, event.data.project_id, self.max_attempts
        );

        let mut attempt = 1;
        loop {
            let steps = Steps::new(journal.clone());
            let err = match self.job.execute(job_id, event, &steps, attempt).await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            if !is_retryable(&err) || attempt >= self.max_attempts {
                error!("Job {} failed on attempt {}: {}", job_id, attempt, err);
                return Err(err);
            }

            warn!(
                "Job {} attempt {}/{} failed, retrying: {}",
                job_id, attempt, self.max_attempts, err
            );

            tokio::time::sleep(self.retry_delay * attempt as u32).await;
            attempt += 1;
        }
    }
}

/// Input and configuration problems fail the same way on every attempt
fn is_retryable(err: &FragError) -> bool {
    !matches!(
        err,
        FragError::Validation(_) | FragError::Config(_) | FragError::Auth(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(is_retryable(&FragError::Model("overloaded".to_string())));
        assert!(is_retryable(&FragError::SessionUnavailable("gone".to_string())));
        assert!(is_retryable(&FragError::MalformedToolCall("x".to_string())));
        assert!(!is_retryable(&FragError::Validation("empty".to_string())));
        assert!(!is_retryable(&FragError::Auth("no key".to_string())));
    }
}
