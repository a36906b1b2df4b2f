//! Prompt submission

use frag_core::{JobEvent, NewMessage, Result};
use tracing::info;

use crate::store::MessageStore;

/// Validate a prompt, record it as the user's message and build the job event
///
/// Nothing is stored when validation fails.
pub async fn submit_prompt(store: &dyn MessageStore, value: &str, project_id: &str) -> Result<JobEvent> {
    let event = JobEvent::code_agent_run(value, project_id)?;
    let stored = store
        .create_message(NewMessage::user_prompt(project_id, value))
        .await?;
    info!("Recorded prompt {} for project {}", stored.id, project_id);
    Ok(event)
}
