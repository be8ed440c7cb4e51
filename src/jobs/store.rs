//! Job persistence.
//!
//! [`MemoryJobStore`] keeps records in a map. [`FileJobStore`] writes one
//! `<dir>/<job_id>.json` per job (temp file + rename, so a reader never sees a
//! half-written record) and keeps an in-memory index that is rebuilt from the
//! directory on open.
//!
//! Both stores refuse an overwrite that would move a record backwards or
//! change one that already finished.
//!
//! Retention eviction only trims what is held in memory. A file-backed record
//! evicted from the index is still served from disk by `get` and `list`.

use crate::error::JobError;
use crate::jobs::{ExtractionJob, JobStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, job_id: &str) -> Result<Option<ExtractionJob>, JobError>;

    /// Insert or replace a record.
    ///
    /// Replacing fails with [`JobError::InvalidTransition`] when the stored
    /// record is terminal or cannot move to the new status.
    async fn put(&self, job: &ExtractionJob) -> Result<(), JobError>;

    /// Replace an existing record under the same rules as [`put`](Self::put).
    /// `false` when there is no record to replace; nothing is written then.
    async fn update(&self, job: &ExtractionJob) -> Result<bool, JobError>;

    /// Every record currently held, in no particular order.
    async fn list(&self) -> Result<Vec<ExtractionJob>, JobError>;

    /// `true` when a record was removed.
    async fn delete(&self, job_id: &str) -> Result<bool, JobError>;

    /// Drop terminal records last updated more than `ttl` ago from memory.
    /// Returns how many were evicted.
    async fn evict_expired(&self, ttl: Duration) -> usize;
}

/// A stored record may be rewritten with its own status or moved one legal
/// step forward. Terminal records are final.
fn check_overwrite(stored: &ExtractionJob, next: &ExtractionJob) -> Result<(), JobError> {
    let from = stored.status;
    if from.is_terminal() || (from != next.status && !from.can_transition_to(next.status)) {
        return Err(JobError::InvalidTransition {
            job_id: next.job_id.clone(),
            from,
            to: next.status,
        });
    }
    Ok(())
}

fn is_expired(job: &ExtractionJob, ttl: Duration) -> bool {
    let age = Utc::now().signed_duration_since(job.updated_at);
    job.status.is_terminal() && age.to_std().map(|a| a > ttl).unwrap_or(false)
}

// ── In-memory ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, ExtractionJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, job_id: &str) -> Result<Option<ExtractionJob>, JobError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn put(&self, job: &ExtractionJob) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().await;
        if let Some(stored) = jobs.get(&job.job_id) {
            check_overwrite(stored, job)?;
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn update(&self, job: &ExtractionJob) -> Result<bool, JobError> {
        let mut jobs = self.jobs.write().await;
        let Some(stored) = jobs.get(&job.job_id) else {
            return Ok(false);
        };
        check_overwrite(stored, job)?;
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<ExtractionJob>, JobError> {
        Ok(self.jobs.read().await.values().cloned().collect())
    }

    async fn delete(&self, job_id: &str) -> Result<bool, JobError> {
        Ok(self.jobs.write().await.remove(job_id).is_some())
    }

    async fn evict_expired(&self, ttl: Duration) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !is_expired(job, ttl));
        before - jobs.len()
    }
}

// ── File-backed ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct FileJobStore {
    dir: PathBuf,
    index: RwLock<HashMap<String, ExtractionJob>>,
}

impl FileJobStore {
    /// Open (creating if needed) a store directory and load every record in it.
    ///
    /// Unreadable or malformed files are skipped with a warning.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, JobError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| JobError::Storage {
                path: dir.clone(),
                source,
            })?;

        let mut index = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|source| JobError::Storage {
                path: dir.clone(),
                source,
            })?;
        while let Some(entry) = entries.next_entry().await.map_err(|source| JobError::Storage {
            path: dir.clone(),
            source,
        })? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path).await {
                Ok(job) => {
                    index.insert(job.job_id.clone(), job);
                }
                Err(e) => warn!("Skipping unreadable job record {}: {}", path.display(), e),
            }
        }

        info!(dir = %dir.display(), jobs = index.len(), "Job store opened");
        Ok(Self {
            dir,
            index: RwLock::new(index),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, job_id: &str) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    async fn read_from_disk(&self, job_id: &str) -> Result<Option<ExtractionJob>, JobError> {
        if !is_valid_id(job_id) {
            return Ok(None);
        }
        let path = self.record_path(job_id);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => read_record(&path).await.map(Some),
            _ => Ok(None),
        }
    }

    /// Check and write `job` while the caller holds the index lock.
    ///
    /// Returns whether a record existed before the write. With
    /// `require_existing` set, nothing is written when none did.
    async fn write_locked(
        &self,
        index: &mut HashMap<String, ExtractionJob>,
        job: &ExtractionJob,
        require_existing: bool,
    ) -> Result<bool, JobError> {
        let stored = match index.get(&job.job_id) {
            Some(stored) => Some(stored.clone()),
            None => self.read_from_disk(&job.job_id).await?,
        };
        match &stored {
            Some(stored) => check_overwrite(stored, job)?,
            None if require_existing => return Ok(false),
            None => {}
        }

        let path = self.record_path(&job.job_id);
        let tmp = self.dir.join(format!(".{}.json.tmp", job.job_id));
        let json = serde_json::to_vec_pretty(job)?;

        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|source| JobError::Storage {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| JobError::Storage {
                path: path.clone(),
                source,
            })?;

        index.insert(job.job_id.clone(), job.clone());
        debug!(job_id = %job.job_id, status = %job.status, "Job record written");
        Ok(stored.is_some())
    }
}

/// Only ids we generate (hex) map to file names; anything else is unknown.
fn is_valid_id(job_id: &str) -> bool {
    !job_id.is_empty() && job_id.chars().all(|c| c.is_ascii_alphanumeric())
}

async fn read_record(path: &Path) -> Result<ExtractionJob, JobError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| JobError::Storage {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn get(&self, job_id: &str) -> Result<Option<ExtractionJob>, JobError> {
        if let Some(job) = self.index.read().await.get(job_id) {
            return Ok(Some(job.clone()));
        }
        self.read_from_disk(job_id).await
    }

    async fn put(&self, job: &ExtractionJob) -> Result<(), JobError> {
        let mut index = self.index.write().await;
        self.write_locked(&mut index, job, false).await?;
        Ok(())
    }

    async fn update(&self, job: &ExtractionJob) -> Result<bool, JobError> {
        let mut index = self.index.write().await;
        self.write_locked(&mut index, job, true).await
    }

    /// Indexed records plus any record only present on disk.
    async fn list(&self) -> Result<Vec<ExtractionJob>, JobError> {
        let index = self.index.read().await;
        let mut jobs: Vec<ExtractionJob> = index.values().cloned().collect();

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|source| JobError::Storage {
                path: self.dir.clone(),
                source,
            })?;
        while let Some(entry) = entries.next_entry().await.map_err(|source| JobError::Storage {
            path: self.dir.clone(),
            source,
        })? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(job_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_valid_id(job_id) || index.contains_key(job_id) {
                continue;
            }
            match read_record(&path).await {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping unreadable job record {}: {}", path.display(), e),
            }
        }
        Ok(jobs)
    }

    async fn delete(&self, job_id: &str) -> Result<bool, JobError> {
        let mut index = self.index.write().await;
        let in_index = index.remove(job_id).is_some();
        if !is_valid_id(job_id) {
            return Ok(in_index);
        }
        let path = self.record_path(job_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(in_index),
            Err(source) => Err(JobError::Storage { path, source }),
        }
    }

    async fn evict_expired(&self, ttl: Duration) -> usize {
        let mut index = self.index.write().await;
        let before = index.len();
        index.retain(|_, job| !is_expired(job, ttl));
        before - index.len()
    }
}

/// Mark jobs left `pending` or `processing` by a previous process as failed.
///
/// Call once at startup, before any worker runs against `store`. Returns the
/// ids that were marked.
pub async fn recover_interrupted(store: &dyn JobStore) -> Result<Vec<String>, JobError> {
    let mut recovered = Vec::new();
    for mut job in store.list().await? {
        if job.status.is_terminal() {
            continue;
        }
        job.fail("interrupted: the process stopped before the job finished")?;
        match store.put(&job).await {
            Ok(()) => {}
            Err(JobError::InvalidTransition { from, .. }) => {
                debug!(job_id = %job.job_id, %from, "Job finished before recovery reached it");
                continue;
            }
            Err(e) => return Err(e),
        }
        warn!(job_id = %job.job_id, "Marked interrupted job as failed");
        recovered.push(job.job_id);
    }
    recovered.sort();
    Ok(recovered)
}

/// Jobs sorted newest first, optionally filtered by status.
pub(crate) fn newest_first(mut jobs: Vec<ExtractionJob>, status: Option<JobStatus>) -> Vec<ExtractionJob> {
    jobs.retain(|j| status.is_none_or(|s| j.status == s));
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.job_id.cmp(&b.job_id)));
    jobs
}
