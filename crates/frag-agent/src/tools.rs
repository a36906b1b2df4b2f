//! Sandbox tools exposed to the coding agent
//!
//! Every tool call runs as one memoized step, so a retried job replays a
//! committed call instead of repeating it. Failures inside the sandbox are
//! reported back to the model as text. The one exception is a sandbox that
//! can no longer be resolved, which aborts the attempt so the runner can
//! retry the job.

use async_trait::async_trait;
use frag_core::{AgentState, FileEntry, FileMap, FragError, Result, SandboxId, Steps};
use frag_sandbox::{OutputBuffers, SandboxProvider};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::types::ToolDefinition;

/// Everything a tool may touch during one call
pub struct ToolContext<'a> {
    pub steps: &'a Steps,
    pub sandbox: &'a dyn SandboxProvider,
    pub sandbox_id: &'a SandboxId,
    pub state: &'a mut AgentState,
}

/// A named capability the model can call
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema of the arguments object
    fn parameters(&self) -> Value;

    /// Execute with already-parsed JSON arguments, returning text for the model
    async fn execute(&self, arguments: Value, ctx: &mut ToolContext<'_>) -> Result<String>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Ordered set of tools available to one agent
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// `terminal`, `createOrUpdateFiles` and `readFiles`
    pub fn sandbox_tools() -> Self {
        Self::new()
            .with(RunCommand)
            .with(WriteFiles)
            .with(ReadFiles)
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|tool| tool.definition()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|tool| tool.name()))
            .finish()
    }
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T> {
    serde_json::from_value(arguments)
        .map_err(|e| FragError::MalformedToolCall(format!("{}: {}", tool, e)))
}

/// Runs a shell command in the sandbox
#[derive(Debug, Clone, Copy, Default)]
pub struct RunCommand;

#[derive(Debug, Deserialize)]
struct RunCommandArgs {
    command: String,
}

#[async_trait]
impl Tool for RunCommand {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn description(&self) -> &'static str {
        "Use the terminal to run commands"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &mut ToolContext<'_>) -> Result<String> {
        let args: RunCommandArgs = parse_args(self.name(), arguments)?;
        let provider = ctx.sandbox;
        let sandbox_id = ctx.sandbox_id;
        let command = args.command;

        info!("terminal: {}", command);
        ctx.steps
            .run_with_input(self.name(), &command, || async {
                let session = provider.resolve(sandbox_id).await?;
                let mut buffers = OutputBuffers::default();

                match session.run_command(&command, &mut buffers).await {
                    Ok(output) => Ok(output.stdout),
                    Err(e) if e.is_session_unavailable() => Err(e),
                    Err(e) => {
                        warn!("Command failed: {}", e);
                        Ok(command_failure(&e, &buffers))
                    }
                }
            })
            .await
    }
}

/// Diagnostic text handed back to the model when a command fails
pub fn command_failure(error: &FragError, buffers: &OutputBuffers) -> String {
    format!(
        "Command failed: {} \nstdout: {}\nstderr: {}",
        error, buffers.stdout, buffers.stderr
    )
}

/// Outcome of a file write step
///
/// Only a `Written` outcome replaces the agent's file map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// Full file map after the write
    Written(FileMap),
    /// Error text for the model
    Failed(String),
}

/// Creates or overwrites files in the sandbox
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteFiles;

#[derive(Debug, Deserialize)]
struct WriteFilesArgs {
    files: Vec<FileEntry>,
}

#[async_trait]
impl Tool for WriteFiles {
    fn name(&self) -> &'static str {
        "createOrUpdateFiles"
    }

    fn description(&self) -> &'static str {
        "Create or update files in the sandbox"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "path": { "type": "string" },
                            "content": { "type": "string" }
                        },
                        "required": ["path", "content"]
                    }
                }
            },
            "required": ["files"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &mut ToolContext<'_>) -> Result<String> {
        let args: WriteFilesArgs = parse_args(self.name(), arguments)?;
        let provider = ctx.sandbox;
        let sandbox_id = ctx.sandbox_id;
        let current = ctx.state.files.clone();
        let files = args.files;

        let outcome: WriteOutcome = ctx
            .steps
            .run_with_input(self.name(), &files, || async {
                let session = provider.resolve(sandbox_id).await?;
                let mut updated = current;

                for file in &files {
                    match session.write_file(&file.path, &file.content).await {
                        Ok(()) => {
                            updated.insert(file.path.clone(), file.content.clone());
                        }
                        Err(e) if e.is_session_unavailable() => return Err(e),
                        Err(e) => return Ok(WriteOutcome::Failed(format!("Error: {}", e))),
                    }
                }
                Ok(WriteOutcome::Written(updated))
            })
            .await?;

        Ok(commit_write(ctx.state, outcome))
    }
}

/// Apply a write outcome to the agent state, returning text for the model
pub fn commit_write(state: &mut AgentState, outcome: WriteOutcome) -> String {
    match outcome {
        WriteOutcome::Written(files) => {
            let count = files.len();
            state.files = files;
            debug!("Committed file map ({} files)", count);
            format!("Files updated. The sandbox now holds {} file(s).", count)
        }
        WriteOutcome::Failed(message) => {
            warn!("File write failed, state unchanged: {}", message);
            message
        }
    }
}

/// Reads files from the sandbox
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadFiles;

#[derive(Debug, Deserialize)]
struct ReadFilesArgs {
    files: Vec<String>,
}

#[async_trait]
impl Tool for ReadFiles {
    fn name(&self) -> &'static str {
        "readFiles"
    }

    fn description(&self) -> &'static str {
        "Read files from the sandbox"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": { "type": "string" }
                }
            },
            "required": ["files"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &mut ToolContext<'_>) -> Result<String> {
        let args: ReadFilesArgs = parse_args(self.name(), arguments)?;
        let provider = ctx.sandbox;
        let sandbox_id = ctx.sandbox_id;
        let paths = args.files;

        ctx.steps
            .run_with_input(self.name(), &paths, || async {
                let session = provider.resolve(sandbox_id).await?;
                let mut contents = Vec::with_capacity(paths.len());

                for path in &paths {
                    match session.read_file(path).await {
                        Ok(content) => contents.push(FileEntry {
                            path: path.clone(),
                            content,
                        }),
                        Err(e) if e.is_session_unavailable() => return Err(e),
                        Err(e) => return Ok(format!("Error reading files: {}", e)),
                    }
                }
                Ok(serde_json::to_string(&contents)?)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frag_core::MemoryJournal;
    use frag_sandbox::{MockCommand, MockSandbox};
    use std::time::Duration;

    async fn sandbox() -> (MockSandbox, SandboxId) {
        let sandbox = MockSandbox::new()
            .with_command("ls", MockCommand::ok("app\n"))
            .with_command("npm run build", MockCommand::fail("building", "oops", "exit status 1"))
            .with_failing_write("locked.txt")
            .with_failing_read("secret.txt");
        let id = sandbox.create("t", Duration::from_secs(60)).await.unwrap();
        (sandbox, id)
    }

    async fn call(
        tool: &dyn Tool,
        args: Value,
        steps: &Steps,
        sandbox: &MockSandbox,
        id: &SandboxId,
        state: &mut AgentState,
    ) -> Result<String> {
        let mut ctx = ToolContext {
            steps,
            sandbox,
            sandbox_id: id,
            state,
        };
        tool.execute(args, &mut ctx).await
    }

    #[tokio::test]
    async fn test_terminal_returns_stdout() {
        let (sandbox, id) = sandbox().await;
        let steps = Steps::new(Arc::new(MemoryJournal::new()));
        let mut state = AgentState::new();

        let out = call(&RunCommand, json!({"command": "ls"}), &steps, &sandbox, &id, &mut state)
            .await
            .unwrap();
        assert_eq!(out, "app\n");
    }

    #[tokio::test]
    async fn test_terminal_failure_is_text() {
        let (sandbox, id) = sandbox().await;
        let steps = Steps::new(Arc::new(MemoryJournal::new()));
        let mut state = AgentState::new();

        let out = call(
            &RunCommand,
            json!({"command": "npm run build"}),
            &steps,
            &sandbox,
            &id,
            &mut state,
        )
        .await
        .unwrap();
        assert!(out.starts_with("Command failed: "));
        assert!(out.contains("\nstdout: building\nstderr: oops"));
    }

    #[tokio::test]
    async fn test_later_write_wins_and_union_is_kept() {
        let (sandbox, id) = sandbox().await;
        let steps = Steps::new(Arc::new(MemoryJournal::new()));
        let mut state = AgentState::new();

        let first = json!({"files": [
            {"path": "a.tsx", "content": "A1"},
            {"path": "b.tsx", "content": "B"}
        ]});
        let second = json!({"files": [{"path": "a.tsx", "content": "A2"}]});
        call(&WriteFiles, first, &steps, &sandbox, &id, &mut state).await.unwrap();
        call(&WriteFiles, second, &steps, &sandbox, &id, &mut state).await.unwrap();

        assert_eq!(state.files.len(), 2);
        assert_eq!(state.files["a.tsx"], "A2");
        assert_eq!(state.files["b.tsx"], "B");
        assert_eq!(sandbox.files(&id)["a.tsx"], "A2");
    }

    #[tokio::test]
    async fn test_failed_write_leaves_state_unchanged() {
        let (sandbox, id) = sandbox().await;
        let steps = Steps::new(Arc::new(MemoryJournal::new()));
        let mut state = AgentState::new();
        state.files.insert("keep.txt".to_string(), "K".to_string());

        let args = json!({"files": [
            {"path": "new.txt", "content": "N"},
            {"path": "locked.txt", "content": "L"}
        ]});
        let out = call(&WriteFiles, args, &steps, &sandbox, &id, &mut state).await.unwrap();

        assert!(out.starts_with("Error: "));
        assert_eq!(state.files.len(), 1);
        assert_eq!(state.files["keep.txt"], "K");
    }

    #[tokio::test]
    async fn test_read_files_json() {
        let (sandbox, id) = sandbox().await;
        sandbox.put_file(&id, "app/page.tsx", "export default 1");
        let steps = Steps::new(Arc::new(MemoryJournal::new()));
        let mut state = AgentState::new();

        let out = call(
            &ReadFiles,
            json!({"files": ["app/page.tsx"]}),
            &steps,
            &sandbox,
            &id,
            &mut state,
        )
        .await
        .unwrap();
        let parsed: Vec<FileEntry> = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed[0].path, "app/page.tsx");
        assert_eq!(parsed[0].content, "export default 1");
    }

    #[tokio::test]
    async fn test_read_failure_is_text() {
        let (sandbox, id) = sandbox().await;
        let steps = Steps::new(Arc::new(MemoryJournal::new()));
        let mut state = AgentState::new();

        let out = call(
            &ReadFiles,
            json!({"files": ["secret.txt"]}),
            &steps,
            &sandbox,
            &id,
            &mut state,
        )
        .await
        .unwrap();
        assert!(out.starts_with("Error reading files: "));
    }

    #[tokio::test]
    async fn test_expired_sandbox_propagates() {
        let (sandbox, id) = sandbox().await;
        sandbox.expire(&id);
        let steps = Steps::new(Arc::new(MemoryJournal::new()));
        let mut state = AgentState::new();

        let result = call(&RunCommand, json!({"command": "ls"}), &steps, &sandbox, &id, &mut state).await;
        assert!(matches!(result, Err(FragError::SessionUnavailable(_))));
    }

    #[tokio::test]
    async fn test_replayed_call_does_not_touch_sandbox() {
        let (sandbox, id) = sandbox().await;
        let journal = Arc::new(MemoryJournal::new());
        let args = json!({"files": [{"path": "a.txt", "content": "A"}]});

        let mut first_state = AgentState::new();
        let steps = Steps::new(journal.clone());
        call(&WriteFiles, args.clone(), &steps, &sandbox, &id, &mut first_state)
            .await
            .unwrap();

        let mut replay_state = AgentState::new();
        let steps = Steps::new(journal);
        call(&WriteFiles, args, &steps, &sandbox, &id, &mut replay_state)
            .await
            .unwrap();

        assert_eq!(sandbox.write_count(), 1);
        assert_eq!(replay_state, first_state);
    }

    #[tokio::test]
    async fn test_bad_arguments_are_malformed() {
        let (sandbox, id) = sandbox().await;
        let steps = Steps::new(Arc::new(MemoryJournal::new()));
        let mut state = AgentState::new();

        let result = call(&RunCommand, json!({"cmd": "ls"}), &steps, &sandbox, &id, &mut state).await;
        assert!(matches!(result, Err(FragError::MalformedToolCall(_))));
    }

    #[test]
    fn test_sandbox_tool_definitions() {
        let tools = ToolSet::sandbox_tools();
        let names: Vec<String> = tools.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["terminal", "createOrUpdateFiles", "readFiles"]);
        assert!(tools.get("readFiles").is_some());
        assert!(tools.get("deploy").is_none());
    }
}
