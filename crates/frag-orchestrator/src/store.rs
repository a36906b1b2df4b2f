//! Message persistence
//!
//! The store is shared by the submission path and every running job, so
//! implementations synchronize internally.

use async_trait::async_trait;
use frag_core::{FragError, NewMessage, ProjectId, Result, StoredMessage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Project message log
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(&self, message: NewMessage) -> Result<StoredMessage>;

    /// Up to `limit` messages of the project, newest first
    async fn recent_messages(&self, project_id: &str, limit: usize) -> Result<Vec<StoredMessage>>;

    /// Every message of the project, oldest first
    async fn messages(&self, project_id: &str) -> Result<Vec<StoredMessage>>;
}

fn newest_first(mut messages: Vec<StoredMessage>, limit: usize) -> Vec<StoredMessage> {
    messages.reverse();
    messages.truncate(limit);
    messages
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: Mutex<HashMap<ProjectId, Vec<StoredMessage>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ProjectId, Vec<StoredMessage>>> {
        self.projects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn create_message(&self, message: NewMessage) -> Result<StoredMessage> {
        let stored = StoredMessage::from_new(message);
        self.lock()
            .entry(stored.project_id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn recent_messages(&self, project_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let messages = self.lock().get(project_id).cloned().unwrap_or_default();
        Ok(newest_first(messages, limit))
    }

    async fn messages(&self, project_id: &str) -> Result<Vec<StoredMessage>> {
        Ok(self.lock().get(project_id).cloned().unwrap_or_default())
    }
}

/// One JSON file per project under a directory
///
/// Writes go through a `.tmp` file and a rename. A single async lock
/// serializes writers within the process.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn project_path(&self, project_id: &str) -> Result<PathBuf> {
        let valid = !project_id.is_empty()
            && project_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(FragError::Validation(format!("Invalid project id: {}", project_id)));
        }
        Ok(self.dir.join(format!("{}.json", project_id)))
    }

    async fn load(path: &Path) -> Result<Vec<StoredMessage>> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content)
            .map_err(|e| FragError::Store(format!("Corrupt message file {}: {}", path.display(), e)))
    }
}

#[async_trait]
impl MessageStore for FileStore {
    async fn create_message(&self, message: NewMessage) -> Result<StoredMessage> {
        let path = self.project_path(&message.project_id)?;
        let _guard = self.write_lock.lock().await;

        let mut messages = Self::load(&path).await?;
        let stored = StoredMessage::from_new(message);
        messages.push(stored.clone());

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serde_json::to_string_pretty(&messages)?).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(
            "Stored {} message {} for project {}",
            stored.kind, stored.id, stored.project_id
        );
        Ok(stored)
    }

    async fn recent_messages(&self, project_id: &str, limit: usize) -> Result<Vec<StoredMessage>> {
        let messages = Self::load(&self.project_path(project_id)?).await?;
        Ok(newest_first(messages, limit))
    }

    async fn messages(&self, project_id: &str) -> Result<Vec<StoredMessage>> {
        Self::load(&self.project_path(project_id)?).await
    }
}
