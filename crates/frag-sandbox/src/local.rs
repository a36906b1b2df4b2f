//! Local sandbox provider
//!
//! Each sandbox is a directory under the provider root:
//!
//! ```text
//! <root>/<id>/sandbox.json   metadata (template, idle timeout, last activity)
//! <root>/<id>/workspace/     files the agent reads and writes; cwd for commands
//! ```
//!
//! All state lives on disk so any process can resolve a sandbox by id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use frag_core::fail_open::fail_open_with_retries;
use frag_core::{FragError, Result, SandboxId};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, info, instrument, warn};

use crate::provider::{CommandOutput, OutputSink, SandboxProvider, SandboxSession};

const METADATA_FILE: &str = "sandbox.json";
const WORKSPACE_DIR: &str = "workspace";
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_HOST_TEMPLATE: &str = "{port}-{id}.localhost";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SandboxMetadata {
    id: SandboxId,
    template: String,
    idle_timeout_secs: u64,
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
}

impl SandboxMetadata {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let idle_ms = (now - self.last_active).num_milliseconds();
        idle_ms >= (self.idle_timeout_secs as i64).saturating_mul(1000)
    }
}

/// Directory-backed sandboxes with shell command execution
#[derive(Debug, Clone)]
pub struct LocalProvider {
    root: PathBuf,
    template_root: Option<PathBuf>,
    host_template: String,
    command_timeout: Duration,
}

impl LocalProvider {
    /// Create a provider storing sandboxes under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            template_root: None,
            host_template: DEFAULT_HOST_TEMPLATE.to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Copy `<template_root>/<template>` into new sandboxes when it exists
    pub fn with_template_root(mut self, template_root: impl Into<PathBuf>) -> Self {
        self.template_root = Some(template_root.into());
        self
    }

    /// `{port}` and `{id}` are substituted
    pub fn with_host_template(mut self, host_template: impl Into<String>) -> Self {
        self.host_template = host_template.into();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn sandbox_dir(&self, id: &SandboxId) -> Result<PathBuf> {
        let raw = id.as_str();
        if raw.is_empty() || raw.contains('/') || raw.contains('\\') || raw.starts_with('.') {
            return Err(FragError::Validation(format!("Invalid sandbox id: {}", id)));
        }
        Ok(self.root.join(raw))
    }

    async fn reclaim(&self, dir: &Path) {
        fail_open_with_retries(
            "sandbox_reclaim",
            || async move { tokio::fs::remove_dir_all(dir).await.map_err(FragError::from) },
            3,
        )
        .await;
    }
}

#[async_trait]
impl SandboxProvider for LocalProvider {
    async fn create(&self, template: &str, idle_timeout: Duration) -> Result<SandboxId> {
        let id = SandboxId::new(uuid::Uuid::new_v4().simple().to_string());
        let dir = self.sandbox_dir(&id)?;
        let workspace = dir.join(WORKSPACE_DIR);
        tokio::fs::create_dir_all(&workspace).await?;

        if let Some(template_root) = &self.template_root {
            let source = template_root.join(template);
            if source.is_dir() {
                let target = workspace.clone();
                tokio::task::spawn_blocking(move || copy_dir_all(&source, &target))
                    .await
                    .map_err(|e| FragError::Sandbox(format!("Template copy failed: {}", e)))??;
                debug!("Copied template {} into sandbox {}", template, id);
            } else {
                warn!("Template {} not found under {:?}, starting empty", template, template_root);
            }
        }

        let now = Utc::now();
        write_metadata(
            &dir,
            &SandboxMetadata {
                id: id.clone(),
                template: template.to_string(),
                idle_timeout_secs: idle_timeout.as_secs(),
                created_at: now,
                last_active: now,
            },
        )
        .await?;

        info!(
            "Created sandbox {} from template {} (idle timeout {}s)",
            id,
            template,
            idle_timeout.as_secs()
        );
        Ok(id)
    }

    async fn resolve(&self, id: &SandboxId) -> Result<Arc<dyn SandboxSession>> {
        let dir = self.sandbox_dir(id)?;

        let metadata = read_metadata(&dir)
            .await
            .map_err(|e| FragError::SessionUnavailable(format!("sandbox {} not found: {}", id, e)))?;

        let now = Utc::now();
        if metadata.is_expired(now) {
            warn!(
                "Sandbox {} idle past {}s, reclaiming",
                id, metadata.idle_timeout_secs
            );
            self.reclaim(&dir).await;
            return Err(FragError::SessionUnavailable(format!(
                "sandbox {} expired",
                id
            )));
        }

        write_metadata(
            &dir,
            &SandboxMetadata {
                last_active: now,
                ..metadata
            },
        )
        .await?;

        Ok(Arc::new(LocalSession {
            id: id.clone(),
            workspace: dir.join(WORKSPACE_DIR),
            dir,
            host_template: self.host_template.clone(),
            command_timeout: self.command_timeout,
        }))
    }
}

/// A resolved local sandbox
#[derive(Debug)]
struct LocalSession {
    id: SandboxId,
    dir: PathBuf,
    workspace: PathBuf,
    host_template: String,
    command_timeout: Duration,
}

#[async_trait]
impl SandboxSession for LocalSession {
    fn id(&self) -> &SandboxId {
        &self.id
    }

    #[instrument(skip(self, sink), fields(sandbox = %self.id))]
    async fn run_command(&self, command: &str, sink: &mut dyn OutputSink) -> Result<CommandOutput> {
        debug!("Running command");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FragError::Sandbox(format!("Failed to spawn command: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FragError::Sandbox("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FragError::Sandbox("stderr was not captured".to_string()))?;

        match tokio::time::timeout(self.command_timeout, stream_output(child, stdout, stderr, sink))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(FragError::Sandbox(format!(
                "Command timed out after {}s",
                self.command_timeout.as_secs()
            ))),
        }
    }

    async fn read_file(&self, path: &str) -> Result<String> {
        let full = resolve_path(&self.workspace, path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| FragError::Sandbox(format!("Failed to read {}: {}", path, e)))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let full = resolve_path(&self.workspace, path)?;

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                FragError::Sandbox(format!("Failed to create directory {}: {}", parent.display(), e))
            })?;
        }

        tokio::fs::write(&full, content)
            .await
            .map_err(|e| FragError::Sandbox(format!("Failed to write {}: {}", path, e)))?;
        debug!("Wrote {} ({} bytes) in sandbox {}", path, content.len(), self.id);
        Ok(())
    }

    fn host(&self, port: u16) -> String {
        self.host_template
            .replace("{port}", &port.to_string())
            .replace("{id}", self.id.as_str())
    }

    async fn set_timeout(&self, idle_timeout: Duration) -> Result<()> {
        let metadata = read_metadata(&self.dir).await?;
        write_metadata(
            &self.dir,
            &SandboxMetadata {
                idle_timeout_secs: idle_timeout.as_secs(),
                last_active: Utc::now(),
                ..metadata
            },
        )
        .await?;
        debug!("Sandbox {} idle timeout set to {}s", self.id, idle_timeout.as_secs());
        Ok(())
    }
}

/// Read size for each pipe
const CHUNK_SIZE: usize = 8192;

/// Bytes read from a pipe that do not yet form complete UTF-8
#[derive(Debug, Default)]
struct PendingUtf8(Vec<u8>);

impl PendingUtf8 {
    /// Append `bytes` and take every complete character decoded so far
    fn push(&mut self, bytes: &[u8]) -> String {
        self.0.extend_from_slice(bytes);
        let complete = match std::str::from_utf8(&self.0) {
            Ok(_) => self.0.len(),
            // a character split across reads waits for its remaining bytes
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.0.len(),
        };
        let rest = self.0.split_off(complete);
        let text = String::from_utf8_lossy(&self.0).into_owned();
        self.0 = rest;
        text
    }

    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.0).into_owned();
        self.0.clear();
        text
    }
}

/// Drain both pipes into `sink` exactly as written, then wait for exit
async fn stream_output(
    mut child: Child,
    mut stdout: ChildStdout,
    mut stderr: ChildStderr,
    sink: &mut dyn OutputSink,
) -> Result<CommandOutput> {
    let mut stdout_buf = vec![0u8; CHUNK_SIZE];
    let mut stderr_buf = vec![0u8; CHUNK_SIZE];
    let mut stdout_pending = PendingUtf8::default();
    let mut stderr_pending = PendingUtf8::default();
    let mut output = CommandOutput::default();
    let mut stdout_done = false;
    let mut stderr_done = false;

    while !(stdout_done && stderr_done) {
        tokio::select! {
            read = stdout.read(&mut stdout_buf), if !stdout_done => {
                let n = read?;
                let chunk = if n == 0 {
                    stdout_done = true;
                    stdout_pending.finish()
                } else {
                    stdout_pending.push(&stdout_buf[..n])
                };
                if !chunk.is_empty() {
                    sink.on_stdout(&chunk);
                    output.stdout.push_str(&chunk);
                }
            }
            read = stderr.read(&mut stderr_buf), if !stderr_done => {
                let n = read?;
                let chunk = if n == 0 {
                    stderr_done = true;
                    stderr_pending.finish()
                } else {
                    stderr_pending.push(&stderr_buf[..n])
                };
                if !chunk.is_empty() {
                    sink.on_stderr(&chunk);
                    output.stderr.push_str(&chunk);
                }
            }
        }
    }

    let status = child.wait().await?;
    output.exit_code = status.code();

    if status.success() {
        Ok(output)
    } else {
        Err(FragError::Sandbox(match status.code() {
            Some(code) => format!("Command exited with status {}", code),
            None => "Command terminated by signal".to_string(),
        }))
    }
}

/// Map a sandbox path onto the workspace
///
/// Absolute paths are taken relative to the workspace root; `..` is rejected.
pub fn resolve_path(workspace: &Path, path: &str) -> Result<PathBuf> {
    let mut resolved = workspace.to_path_buf();
    let mut depth = 0usize;

    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(FragError::Sandbox(format!(
                    "Path traversal not allowed: {}",
                    path
                )));
            }
        }
    }

    if depth == 0 {
        return Err(FragError::Sandbox(format!("Not a file path: {:?}", path)));
    }
    Ok(resolved)
}

async fn read_metadata(dir: &Path) -> Result<SandboxMetadata> {
    let content = tokio::fs::read_to_string(dir.join(METADATA_FILE)).await?;
    Ok(serde_json::from_str(&content)?)
}

async fn write_metadata(dir: &Path, metadata: &SandboxMetadata) -> Result<()> {
    let json = serde_json::to_string_pretty(metadata)?;
    let tmp = dir.join(format!("{}.tmp", METADATA_FILE));
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, dir.join(METADATA_FILE)).await?;
    Ok(())
}

fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
