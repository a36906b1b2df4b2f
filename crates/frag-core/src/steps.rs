//! Durable step memoization
//!
//! A job is a sequence of named steps. Each step's successful output is
//! recorded in a [`StepJournal`]; when the job is retried against the same
//! journal, completed steps return their recorded output instead of running
//! again. Failed steps are never recorded.
//!
//! Step keys are the step name for its first occurrence within an attempt,
//! then `name:1`, `name:2` and so on. Because every nondeterministic input
//! (model output, command output) is itself a step, a replay walks the same
//! key sequence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::{FragError, Result};

/// Recorded output of one completed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub output: serde_json::Value,
    /// sha256 of the step input, when the step declared one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Storage for completed steps of a single job
#[async_trait]
pub trait StepJournal: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<StepRecord>>;
    async fn store(&self, key: &str, record: StepRecord) -> Result<()>;
}

/// Journal held in memory. Survives retries within one process.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    entries: Mutex<HashMap<String, StepRecord>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StepRecord>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StepJournal for MemoryJournal {
    async fn load(&self, key: &str) -> Result<Option<StepRecord>> {
        Ok(self.lock().get(key).cloned())
    }

    async fn store(&self, key: &str, record: StepRecord) -> Result<()> {
        self.lock().insert(key.to_string(), record);
        Ok(())
    }
}

/// Journal persisted as one JSON file per job
///
/// The whole file is rewritten on every store (write to `.tmp`, then rename),
/// so a crash mid-write leaves the previous version intact.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    entries: tokio::sync::Mutex<Option<BTreeMap<String, StepRecord>>>,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: tokio::sync::Mutex::new(None),
        }
    }

    /// Journal for `job_id` under `dir`
    pub fn for_job(dir: &Path, job_id: &str) -> Self {
        Self::new(dir.join(format!("{}.json", job_id)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_entries(path: &Path) -> Result<BTreeMap<String, StepRecord>> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(BTreeMap::new());
        }
        let content = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&content)
            .map_err(|e| FragError::Step(format!("Corrupt journal {}: {}", path.display(), e)))
    }
}

#[async_trait]
impl StepJournal for FileJournal {
    async fn load(&self, key: &str) -> Result<Option<StepRecord>> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(Self::read_entries(&self.path).await?);
        }
        Ok(guard.as_ref().and_then(|entries| entries.get(key).cloned()))
    }

    async fn store(&self, key: &str, record: StepRecord) -> Result<()> {
        let mut guard = self.entries.lock().await;
        let entries = match guard.take() {
            Some(entries) => entries,
            None => Self::read_entries(&self.path).await?,
        };
        let entries = guard.insert(entries);
        entries.insert(key.to_string(), record);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(&*entries)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

/// Per-attempt step runner over a shared journal
///
/// Create a fresh `Steps` for every attempt so occurrence counters restart
/// from zero while the journal carries completed work forward.
pub struct Steps {
    journal: Arc<dyn StepJournal>,
    occurrences: Mutex<HashMap<String, usize>>,
    executed: Mutex<Vec<String>>,
}

impl Steps {
    pub fn new(journal: Arc<dyn StepJournal>) -> Self {
        Self {
            journal,
            occurrences: Mutex::new(HashMap::new()),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Keys of steps that actually ran (not replayed) during this attempt
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .map(|keys| keys.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Run `f` as the next occurrence of step `name`, or replay its recorded output
    pub async fn run<T, F, Fut>(&self, name: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_step(name, None, f).await
    }

    /// Like [`Steps::run`], but records a fingerprint of `input`
    ///
    /// A replay whose input differs from the recorded one still returns the
    /// recorded output (the journal wins) and logs a warning.
    pub async fn run_with_input<I, T, F, Fut>(&self, name: &str, input: &I, f: F) -> Result<T>
    where
        I: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let fingerprint = fingerprint(input)?;
        self.run_step(name, Some(fingerprint), f).await
    }

    async fn run_step<T, F, Fut>(&self, name: &str, fingerprint: Option<String>, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let key = self.next_key(name);

        if let Some(record) = self.journal.load(&key).await? {
            if let (Some(expected), Some(actual)) = (&record.fingerprint, &fingerprint) {
                if expected != actual {
                    warn!("Step {} replayed with different input", key);
                }
            }
            debug!("Replaying step {}", key);
            return serde_json::from_value(record.output)
                .map_err(|e| FragError::Step(format!("Recorded output of {} unreadable: {}", key, e)));
        }

        debug!("Running step {}", key);
        let output = f().await?;

        let record = StepRecord {
            output: serde_json::to_value(&output)?,
            fingerprint,
            completed_at: Utc::now(),
        };
        self.journal.store(&key, record).await?;

        if let Ok(mut executed) = self.executed.lock() {
            executed.push(key);
        }
        Ok(output)
    }

    fn next_key(&self, name: &str) -> String {
        let mut occurrences = self
            .occurrences
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = occurrences.entry(name.to_string()).or_insert(0);
        let key = if *count == 0 {
            name.to_string()
        } else {
            format!("{}:{}", name, count)
        };
        *count += 1;
        key
    }
}

/// Hex sha256 of a value's JSON encoding
pub fn fingerprint<I: Serialize + ?Sized>(input: &I) -> Result<String> {
    let bytes = serde_json::to_vec(input)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_repeated_names_get_numbered_keys() {
        let journal = Arc::new(MemoryJournal::new());
        let steps = Steps::new(journal.clone());

        for i in 0..3 {
            let value: usize = steps.run("call", || async move { Ok(i) }).await.unwrap();
            assert_eq!(value, i);
        }

        assert_eq!(journal.keys(), vec!["call", "call:1", "call:2"]);
    }

    #[tokio::test]
    async fn test_replay_skips_completed_steps() {
        let journal = Arc::new(MemoryJournal::new());
        let runs = AtomicUsize::new(0);

        for _ in 0..2 {
            let steps = Steps::new(journal.clone());
            let value: String = steps
                .run("get-sandbox-id", || async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok("sbx-1".to_string())
                })
                .await
                .unwrap();
            assert_eq!(value, "sbx-1");
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_step_not_recorded() {
        let journal = Arc::new(MemoryJournal::new());
        let steps = Steps::new(journal.clone());

        let result: Result<String> = steps
            .run("flaky", || async { Err(FragError::Sandbox("boom".to_string())) })
            .await;
        assert!(result.is_err());
        assert!(journal.is_empty());

        let steps = Steps::new(journal.clone());
        let value: String = steps.run("flaky", || async { Ok("ok".to_string()) }).await.unwrap();
        assert_eq!(value, "ok");
        assert_eq!(steps.executed(), vec!["flaky"]);
    }

    #[tokio::test]
    async fn test_changed_input_still_replays() {
        let journal = Arc::new(MemoryJournal::new());

        let steps = Steps::new(journal.clone());
        let first: String = steps
            .run_with_input("terminal", "ls", || async { Ok("a".to_string()) })
            .await
            .unwrap();

        let steps = Steps::new(journal.clone());
        let second: String = steps
            .run_with_input("terminal", "pwd", || async { Ok("b".to_string()) })
            .await
            .unwrap();

        assert_eq!(first, second);
        assert!(steps.executed().is_empty());
    }

    #[tokio::test]
    async fn test_file_journal_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("journals").join("job-1.json");

        let journal = Arc::new(FileJournal::new(&path));
        let steps = Steps::new(journal);
        let _: u32 = steps.run("step", || async { Ok(7) }).await.unwrap();

        let reopened = Arc::new(FileJournal::new(&path));
        let steps = Steps::new(reopened);
        let value: u32 = steps.run("step", || async { Ok(8) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(fingerprint("ls").unwrap(), fingerprint("ls").unwrap());
        assert_ne!(fingerprint("ls").unwrap(), fingerprint("pwd").unwrap());
        assert_eq!(fingerprint("ls").unwrap().len(), 64);
    }
}
