//! Sandbox provider and session abstraction

use async_trait::async_trait;
use frag_core::{Result, SandboxId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Receives command output as it is produced
pub trait OutputSink: Send {
    fn on_stdout(&mut self, data: &str);
    fn on_stderr(&mut self, data: &str);
}

/// Sink that accumulates both streams
///
/// Survives a failed command, so whatever was printed before the failure
/// can still be reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputBuffers {
    pub stdout: String,
    pub stderr: String,
}

impl OutputSink for OutputBuffers {
    fn on_stdout(&mut self, data: &str) {
        self.stdout.push_str(data);
    }

    fn on_stderr(&mut self, data: &str) {
        self.stderr.push_str(data);
    }
}

/// A live sandbox instance
#[async_trait]
pub trait SandboxSession: Send + Sync {
    fn id(&self) -> &SandboxId;

    /// Run a shell command, streaming output into `sink`
    ///
    /// A command that cannot be spawned, times out, or exits non-zero is an error.
    async fn run_command(&self, command: &str, sink: &mut dyn OutputSink) -> Result<CommandOutput>;

    async fn read_file(&self, path: &str) -> Result<String>;

    /// Write a file, creating parent directories
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// Externally routable host for a port (no scheme)
    fn host(&self, port: u16) -> String;

    /// Replace the idle timeout, measured from now
    async fn set_timeout(&self, idle_timeout: Duration) -> Result<()>;
}

/// Creates and resolves sandboxes by id
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Provision a sandbox from `template` that expires after `idle_timeout` without use
    async fn create(&self, template: &str, idle_timeout: Duration) -> Result<SandboxId>;

    /// Re-acquire a live sandbox. Safe to call any number of times.
    async fn resolve(&self, id: &SandboxId) -> Result<Arc<dyn SandboxSession>>;
}
