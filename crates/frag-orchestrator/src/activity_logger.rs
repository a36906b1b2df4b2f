//! Human-readable per-job activity log (`activity.md`)
//!
//! Records the job header, each agent invocation with its tool calls, and the
//! outcome. Every write is fail-open: a broken log never fails a job.

use chrono::Utc;
use frag_agent::{AgentResult, Usage};
use frag_core::fail_open::fail_open;
use frag_core::Result;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::state_machine::HaltReason;

/// Longest tool output or agent text quoted in the log
const PREVIEW_CHARS: usize = 400;

/// Appends to `<dir>/activity.md`
#[derive(Debug, Clone)]
pub struct ActivityLogger {
    output_path: PathBuf,
}

impl ActivityLogger {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            output_path: dir.as_ref().join("activity.md"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.output_path
    }

    /// Header for one attempt of a job
    pub async fn log_job_start(&self, project_id: &str, prompt: &str, attempt: usize, max_iter: usize) {
        fail_open("activity_logger::log_job_start", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            let content = format!(
                "# Frag Activity Log\n\n## Prompt: {}\n**Project**: {}\n**Attempt**: {}\n**Started**: {}\n**Max Iterations**: {}\n\n---\n\n",
                prompt.lines().next().unwrap_or(prompt),
                project_id,
                attempt,
                timestamp,
                max_iter
            );
            self.append(&content).await
        })
        .await;
    }

    pub async fn log_iteration_start(&self, invocation: usize, max_iter: usize) {
        fail_open("activity_logger::log_iteration_start", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            self.append(&format!(
                "### Iteration {}/{}\n**Time**: {}\n\n",
                invocation, max_iter, timestamp
            ))
            .await
        })
        .await;
    }

    pub async fn log_iteration_complete(&self, invocation: usize, result: &AgentResult, file_count: usize) {
        fail_open("activity_logger::log_iteration_complete", || async {
            let mut content = format!("**Iteration {} completed**\n\n", invocation);

            if !result.tool_results.is_empty() {
                content.push_str("**Tool Calls**:\n");
                for tool in &result.tool_results {
                    content.push_str(&format!("- `{}`: {}\n", tool.name, one_line(&tool.output)));
                }
                content.push('\n');
            }

            content.push_str(&format!("**Files Tracked**: {}\n\n", file_count));

            if let Some(text) = frag_agent::marker::last_assistant_text(&result.output) {
                content.push_str("**Agent Output** (truncated):\n> ");
                content.push_str(&preview(&text).replace('\n', "\n> "));
                content.push_str("\n\n");
            }

            content.push_str("---\n\n");
            self.append(&content).await
        })
        .await;
    }

    pub async fn log_job_complete(
        &self,
        call_count: usize,
        reason: HaltReason,
        is_error: bool,
        usage: &Usage,
    ) {
        fail_open("activity_logger::log_job_complete", || async {
            let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
            let outcome = if is_error { "✗ Error" } else { "✓ Fragment saved" };
            let content = format!(
                "## Job Summary\n\n\
                **Completed**: {}\n\
                **Invocations**: {}\n\
                **Stop Reason**: {}\n\
                **Outcome**: {}\n\
                **Tokens**: {} input, {} output\n\n",
                timestamp, call_count, reason, outcome, usage.input_tokens, usage.output_tokens
            );
            self.append(&content).await
        })
        .await;
    }

    async fn append(&self, content: &str) -> Result<()> {
        if let Some(parent) = self.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        let truncated: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}

fn one_line(text: &str) -> String {
    preview(text.trim()).replace('\n', " ⏎ ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use frag_agent::{OutputMessage, ToolResult};
    use tempfile::TempDir;
    use tokio::fs;

    fn result(text: &str) -> AgentResult {
        AgentResult {
            agent: "code-agent".to_string(),
            output: vec![OutputMessage::assistant_text(text)],
            tool_results: vec![ToolResult {
                call_id: "c1".to_string(),
                name: "terminal".to_string(),
                output: "line one\nline two".to_string(),
            }],
            usage: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_full_job_log() {
        let temp_dir = TempDir::new().unwrap();
        let logger = ActivityLogger::new(temp_dir.path().join("jobs").join("j1"));

        logger.log_job_start("p1", "Build a todo app\nwith tags", 1, 15).await;
        logger.log_iteration_start(1, 15).await;
        logger
            .log_iteration_complete(1, &result("<task_summary>Built</task_summary>"), 2)
            .await;
        logger
            .log_job_complete(
                1,
                HaltReason::SummaryComplete,
                false,
                &Usage {
                    input_tokens: 120,
                    output_tokens: 40,
                },
            )
            .await;

        let content = fs::read_to_string(logger.path()).await.unwrap();
        assert!(content.contains("## Prompt: Build a todo app\n"));
        assert!(content.contains("### Iteration 1/15"));
        assert!(content.contains("- `terminal`: line one ⏎ line two"));
        assert!(content.contains("**Files Tracked**: 2"));
        assert!(content.contains("**Stop Reason**: summary complete"));
        assert!(content.contains("120 input, 40 output"));
    }

    #[tokio::test]
    async fn test_long_output_truncated() {
        let temp_dir = TempDir::new().unwrap();
        let logger = ActivityLogger::new(temp_dir.path());

        logger.log_iteration_complete(1, &result(&"x".repeat(1000)), 0).await;

        let content = fs::read_to_string(logger.path()).await.unwrap();
        assert!(content.contains("..."));
        assert!(!content.contains(&"x".repeat(500)));
    }

    #[tokio::test]
    async fn test_unwritable_log_is_swallowed() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "file, not a dir").await.unwrap();

        let logger = ActivityLogger::new(&blocker);
        logger.log_iteration_start(1, 1).await;
        assert!(!logger.path().exists());
    }
}
