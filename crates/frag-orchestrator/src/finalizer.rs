//! Result finalization: preview URL, outcome message, job result

use frag_core::{
    AgentState, Fragment, JobResult, NewMessage, Result, SandboxId, Steps,
};
use frag_sandbox::SandboxProvider;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::post_process::PostProcessed;
use crate::store::MessageStore;

/// A job that finished without a summary or without files is reported as an error
pub fn is_error(state: &AgentState) -> bool {
    state.is_incomplete()
}

/// The single outcome message persisted for a job
pub fn outcome_message(
    project_id: &str,
    state: &AgentState,
    sandbox_url: &str,
    post: &PostProcessed,
) -> NewMessage {
    if is_error(state) {
        NewMessage::error(project_id)
    } else {
        NewMessage::result(
            project_id,
            post.response.clone(),
            Fragment {
                sandbox_url: sandbox_url.to_string(),
                title: post.title.clone(),
                files: state.files.clone(),
            },
        )
    }
}

/// Persists the outcome and builds the job's return value
#[derive(Clone)]
pub struct Finalizer {
    sandbox: Arc<dyn SandboxProvider>,
    store: Arc<dyn MessageStore>,
    preview_port: u16,
}

impl Finalizer {
    pub fn new(sandbox: Arc<dyn SandboxProvider>, store: Arc<dyn MessageStore>, preview_port: u16) -> Self {
        Self {
            sandbox,
            store,
            preview_port,
        }
    }

    /// Run the `get-sandbox-url` and `save-result` steps
    pub async fn finalize(
        &self,
        steps: &Steps,
        project_id: &str,
        sandbox_id: &SandboxId,
        state: &AgentState,
        post: &PostProcessed,
    ) -> Result<JobResult> {
        let sandbox = &self.sandbox;
        let port = self.preview_port;

        let sandbox_url: String = steps
            .run("get-sandbox-url", || async {
                let session = sandbox.resolve(sandbox_id).await?;
                Ok(format!("https://{}", session.host(port)))
            })
            .await?;

        let message = outcome_message(project_id, state, &sandbox_url, post);
        let kind = message.kind;
        let store = &self.store;
        let message_id: Uuid = steps
            .run("save-result", || async move {
                let stored = store.create_message(message).await?;
                Ok(stored.id)
            })
            .await?;

        if is_error(state) {
            warn!(
                "Job for project {} finished without a usable fragment (saved {} {})",
                project_id, kind, message_id
            );
        } else {
            info!(
                "Saved fragment {:?} for project {} ({} files, message {})",
                post.title,
                project_id,
                state.files.len(),
                message_id
            );
        }

        Ok(JobResult {
            status: "ok".to_string(),
            sandbox_url,
            title: post.title.clone(),
            files: state.files.clone(),
            summary: state.summary.clone(),
        })
    }
}

impl std::fmt::Debug for Finalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Finalizer")
            .field("preview_port", &self.preview_port)
            .finish_non_exhaustive()
    }
}
