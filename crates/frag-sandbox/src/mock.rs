//! In-memory sandbox for tests

use async_trait::async_trait;
use frag_core::{FileMap, FragError, Result, SandboxId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::provider::{CommandOutput, OutputSink, SandboxProvider, SandboxSession};

/// Scripted response for one command
#[derive(Debug, Clone)]
pub struct MockCommand {
    pub stdout: String,
    pub stderr: String,
    /// Set to make the command fail after emitting its output
    pub error: Option<String>,
}

impl MockCommand {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            error: None,
        }
    }

    pub fn fail(
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    sandboxes: HashMap<SandboxId, FileMap>,
    expired: HashSet<SandboxId>,
    timeouts: HashMap<SandboxId, Duration>,
    commands: HashMap<String, MockCommand>,
    command_log: Vec<String>,
    failing_writes: HashSet<String>,
    failing_reads: HashSet<String>,
    created: usize,
    resolves: usize,
    writes: usize,
}

/// Mock sandbox provider
///
/// Clones share state, so a test can keep one handle for assertions while the
/// job owns another. Unscripted commands succeed with empty output.
#[derive(Debug, Clone, Default)]
pub struct MockSandbox {
    state: Arc<Mutex<MockState>>,
}

impl MockSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_command(self, command: &str, response: MockCommand) -> Self {
        self.lock().commands.insert(command.to_string(), response);
        self
    }

    /// Writes to `path` fail
    pub fn with_failing_write(self, path: &str) -> Self {
        self.lock().failing_writes.insert(path.to_string());
        self
    }

    /// Reads of `path` fail
    pub fn with_failing_read(self, path: &str) -> Self {
        self.lock().failing_reads.insert(path.to_string());
        self
    }

    /// Seed a file into an existing sandbox
    pub fn put_file(&self, id: &SandboxId, path: &str, content: &str) {
        self.lock()
            .sandboxes
            .entry(id.clone())
            .or_default()
            .insert(path.to_string(), content.to_string());
    }

    /// Make every later resolve of `id` fail
    pub fn expire(&self, id: &SandboxId) {
        self.lock().expired.insert(id.clone());
    }

    /// Files currently in the sandbox
    pub fn files(&self, id: &SandboxId) -> FileMap {
        self.lock().sandboxes.get(id).cloned().unwrap_or_default()
    }

    /// Idle timeout last set on the sandbox
    pub fn timeout(&self, id: &SandboxId) -> Option<Duration> {
        self.lock().timeouts.get(id).copied()
    }

    pub fn created_count(&self) -> usize {
        self.lock().created
    }

    pub fn resolve_count(&self) -> usize {
        self.lock().resolves
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Every command run so far, in order
    pub fn commands_run(&self) -> Vec<String> {
        self.lock().command_log.clone()
    }
}

#[async_trait]
impl SandboxProvider for MockSandbox {
    async fn create(&self, _template: &str, idle_timeout: Duration) -> Result<SandboxId> {
        let mut state = self.lock();
        state.created += 1;
        let id = SandboxId::new(format!("mock-{}", state.created));
        state.sandboxes.insert(id.clone(), FileMap::new());
        state.timeouts.insert(id.clone(), idle_timeout);
        Ok(id)
    }

    async fn resolve(&self, id: &SandboxId) -> Result<Arc<dyn SandboxSession>> {
        let mut state = self.lock();
        state.resolves += 1;

        if state.expired.contains(id) || !state.sandboxes.contains_key(id) {
            return Err(FragError::SessionUnavailable(format!("sandbox {} expired", id)));
        }

        Ok(Arc::new(MockSession {
            id: id.clone(),
            sandbox: self.clone(),
        }))
    }
}

struct MockSession {
    id: SandboxId,
    sandbox: MockSandbox,
}

#[async_trait]
impl SandboxSession for MockSession {
    fn id(&self) -> &SandboxId {
        &self.id
    }

    async fn run_command(&self, command: &str, sink: &mut dyn OutputSink) -> Result<CommandOutput> {
        let response = {
            let mut state = self.sandbox.lock();
            state.command_log.push(command.to_string());
            state
                .commands
                .get(command)
                .cloned()
                .unwrap_or_else(|| MockCommand::ok(""))
        };

        if !response.stdout.is_empty() {
            sink.on_stdout(&response.stdout);
        }
        if !response.stderr.is_empty() {
            sink.on_stderr(&response.stderr);
        }

        match response.error {
            Some(error) => Err(FragError::Sandbox(error)),
            None => Ok(CommandOutput {
                stdout: response.stdout,
                stderr: response.stderr,
                exit_code: Some(0),
            }),
        }
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let state = self.sandbox.lock();
        if state.failing_reads.contains(path) {
            return Err(FragError::Sandbox(format!("Failed to read {}", path)));
        }
        state
            .sandboxes
            .get(&self.id)
            .and_then(|files| files.get(path))
            .cloned()
            .ok_or_else(|| FragError::Sandbox(format!("File not found: {}", path)))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let mut state = self.sandbox.lock();
        if state.failing_writes.contains(path) {
            return Err(FragError::Sandbox(format!("Failed to write {}", path)));
        }
        state.writes += 1;
        state
            .sandboxes
            .entry(self.id.clone())
            .or_default()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    fn host(&self, port: u16) -> String {
        format!("{}-{}.mock.dev", port, self.id)
    }

    async fn set_timeout(&self, idle_timeout: Duration) -> Result<()> {
        self.sandbox.lock().timeouts.insert(self.id.clone(), idle_timeout);
        Ok(())
    }
}
