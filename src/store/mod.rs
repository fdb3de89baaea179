//! Durable registry of jobs: a single JSON document, written atomically.
//!
//! Grounded on `storage::local::LocalFileStorage`'s temp-file-then-rename
//! write pattern, but applied to one document (an array of [`Job`]
//! records) rather than per-file blobs, per spec.md §4.1.

use crate::error::StoreError;
use crate::model::Job;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// The durable job registry.
///
/// Every method is `async` because every method may touch disk; a single
/// `tokio::sync::Mutex` serializes access to the in-memory copy and the
/// file beneath it.
pub struct Store {
    path: PathBuf,
    inner: Mutex<Vec<Job>>,
}

impl Store {
    /// Load the store from `path`, creating an empty document if the file
    /// does not exist. A corrupt file is logged and treated as empty
    /// rather than aborting startup.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let jobs = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                tracing::warn!(path = %path.display(), error = %err, "job storage file is corrupt, starting empty");
                Vec::new()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(StoreError::Io(err.to_string())),
        };

        Ok(Self {
            path,
            inner: Mutex::new(jobs),
        })
    }

    /// Insert a new job. Fails if a job with the same name already exists.
    pub async fn put(&self, job: Job) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        if guard.iter().any(|j| j.name == job.name) {
            return Err(StoreError::NameInUse(job.name));
        }
        guard.push(job);
        Self::persist(&self.path, &guard).await
    }

    /// Replace an existing job's definition in place, preserving
    /// `created_at` and `last_run` from the stored record (spec.md §4.7:
    /// updates never touch run history).
    pub async fn replace(&self, name: &str, mut job: Job) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let existing = guard
            .iter_mut()
            .find(|j| j.name == name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        job.created_at = existing.created_at;
        job.last_run = existing.last_run;
        *existing = job;
        Self::persist(&self.path, &guard).await
    }

    /// Remove a job by name.
    pub async fn remove(&self, name: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let before = guard.len();
        guard.retain(|j| j.name != name);
        if guard.len() == before {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Self::persist(&self.path, &guard).await
    }

    /// Fetch a single job by name.
    pub async fn get(&self, name: &str) -> Result<Job, StoreError> {
        let guard = self.inner.lock().await;
        guard
            .iter()
            .find(|j| j.name == name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// List every stored job.
    pub async fn list(&self) -> Vec<Job> {
        self.inner.lock().await.clone()
    }

    /// Advance `last_run` to `at` after a job completes successfully.
    /// Silently a no-op if the job was deleted mid-run.
    pub async fn touch_last_run(&self, name: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().await;
        let Some(job) = guard.iter_mut().find(|j| j.name == name) else {
            return Ok(());
        };
        job.last_run = Some(at);
        Self::persist(&self.path, &guard).await
    }

    async fn persist(path: &Path, jobs: &[Job]) -> Result<(), StoreError> {
        let bytes =
            serde_json::to_vec_pretty(jobs).map_err(|err| StoreError::Io(err.to_string()))?;

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|err| StoreError::Io(err.to_string()))?;
            }
        }

        let tmp_path = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|err| StoreError::Io(err.to_string()))?;
        file.write_all(&bytes)
            .await
            .map_err(|err| StoreError::Io(err.to_string()))?;
        file.sync_all()
            .await
            .map_err(|err| StoreError::Io(err.to_string()))?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|err| StoreError::Io(err.to_string()))?;

        Ok(())
    }
}
