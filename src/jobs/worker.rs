//! Background execution of extraction jobs.
//!
//! [`JobManager`] is the submission surface: it validates the input, records
//! a `pending` job, and hands it to a [`JobWorker`] on its own
//! [`WorkerPool`], separate from the page pool each extraction uses. The
//! worker is the only writer of its job's record, and only ever replaces it:
//! a record deleted or finished elsewhere while the job runs stays that way.

use crate::config::{ExtractionConfig, ExtractionOptions, JobConfig};
use crate::error::{ExtractError, JobError};
use crate::extract::extract_resolved;
use crate::jobs::store::{newest_first, recover_interrupted, FileJobStore, JobStore, MemoryJobStore};
use crate::jobs::{ExtractionJob, JobStatus, JobSummary, JobView};
use crate::pipeline::input::{self, ResolvedInput};
use crate::pool::WorkerPool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Runs one job through the pipeline and records every transition.
#[derive(Clone)]
pub struct JobWorker {
    store: Arc<dyn JobStore>,
    config: ExtractionConfig,
    timeout: Option<Duration>,
}

impl JobWorker {
    pub fn new(store: Arc<dyn JobStore>, config: ExtractionConfig, timeout: Option<Duration>) -> Self {
        Self {
            store,
            config,
            timeout,
        }
    }

    /// Drive `job` to a terminal state and return the final record.
    ///
    /// Never leaves the job `processing`: pipeline errors, panics, and
    /// timeouts all end in `failed`.
    pub async fn run(&self, mut job: ExtractionJob, input: ResolvedInput) -> ExtractionJob {
        if let Err(e) = job.start() {
            warn!(job_id = %job.job_id, "Job not started: {}", e);
            return job;
        }
        match self.persist(job).await {
            Persisted::Kept(started) => job = started,
            Persisted::Gone(job) => {
                info!(job_id = %job.job_id, "Job deleted before it started");
                return job;
            }
            Persisted::Superseded(stored) => return stored,
        }
        info!(job_id = %job.job_id, filename = %job.filename, "Job processing");

        let config = self.config.clone();
        let options = job.options.clone();
        let filename = job.filename.clone();
        let task = tokio::spawn(async move {
            extract_resolved(&input, &filename, &config, &options).await
        });
        let abort = task.abort_handle();

        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    abort.abort();
                    Ok(Err(ExtractError::Internal(timeout_message(limit))))
                }
            },
            None => task.await,
        };

        let recorded = match outcome {
            Ok(Ok(result)) => {
                info!(
                    job_id = %job.job_id,
                    approved = result.quality.approved_count,
                    needs_review = result.quality.needs_review_count,
                    "Job completed"
                );
                job.complete(result)
            }
            Ok(Err(e)) => {
                warn!(job_id = %job.job_id, "Job failed: {}", e);
                job.fail(short_message(&e.to_string()))
            }
            Err(join) => {
                error!(job_id = %job.job_id, "Job task aborted: {}", join);
                job.fail("internal error: extraction task did not finish")
            }
        };
        if let Err(e) = recorded {
            error!(job_id = %job.job_id, "Could not record job outcome: {}", e);
        }
        match self.persist(job).await {
            Persisted::Kept(job) => job,
            Persisted::Gone(job) => {
                info!(job_id = %job.job_id, status = %job.status, "Job deleted while running; outcome dropped");
                job
            }
            Persisted::Superseded(stored) => stored,
        }
    }

    /// Replace the stored record with `job`, never recreating or reopening it.
    async fn persist(&self, job: ExtractionJob) -> Persisted {
        match self.store.update(&job).await {
            Ok(true) => Persisted::Kept(job),
            Ok(false) => Persisted::Gone(job),
            Err(JobError::InvalidTransition { from, to, .. }) => {
                warn!(job_id = %job.job_id, %from, %to, "Job record already finished; keeping it");
                match self.store.get(&job.job_id).await {
                    Ok(Some(stored)) => Persisted::Superseded(stored),
                    _ => Persisted::Gone(job),
                }
            }
            Err(e) => {
                error!(job_id = %job.job_id, status = %job.status, "Failed to persist job: {}", e);
                Persisted::Kept(job)
            }
        }
    }
}

enum Persisted {
    /// Ours is the current record; a storage error was only logged.
    Kept(ExtractionJob),
    /// The record was deleted.
    Gone(ExtractionJob),
    /// The stored record finished elsewhere and wins.
    Superseded(ExtractionJob),
}

fn timeout_message(limit: Duration) -> String {
    format!("job timed out after {limit:?}")
}

/// First line of an error message, capped for storage.
fn short_message(msg: &str) -> String {
    const MAX: usize = 300;
    let first = msg.lines().next().unwrap_or_default().trim();
    if first.chars().count() <= MAX {
        first.to_string()
    } else {
        let cut: String = first.chars().take(MAX).collect();
        format!("{cut}…")
    }
}

/// A submitted job.
#[derive(Debug)]
pub struct JobHandle {
    job_id: String,
    task: JoinHandle<ExtractionJob>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Wait for the job to reach a terminal state.
    pub async fn wait(self) -> Result<ExtractionJob, JobError> {
        self.task
            .await
            .map_err(|e| JobError::Aborted(format!("{}: {e}", self.job_id)))
    }
}

/// Submission, polling, and listing of extraction jobs.
pub struct JobManager {
    store: Arc<dyn JobStore>,
    pool: WorkerPool,
    worker: JobWorker,
    jobs: JobConfig,
    max_file_size: u64,
}

impl JobManager {
    /// Build a manager with the store `jobs.store_dir` selects: file-backed
    /// when set, in-memory otherwise.
    pub async fn new(extraction: ExtractionConfig, jobs: JobConfig) -> Result<Self, JobError> {
        let store: Arc<dyn JobStore> = match &jobs.store_dir {
            Some(dir) => Arc::new(FileJobStore::open(dir).await?),
            None => Arc::new(MemoryJobStore::new()),
        };
        Ok(Self::with_store(store, extraction, jobs))
    }

    pub fn with_store(store: Arc<dyn JobStore>, mut extraction: ExtractionConfig, jobs: JobConfig) -> Self {
        extraction.max_pages = jobs.max_pages.max(1);
        let max_file_size = extraction.max_file_size;
        let worker = JobWorker::new(Arc::clone(&store), extraction, jobs.timeout);
        Self {
            store,
            pool: WorkerPool::new(jobs.workers),
            worker,
            jobs,
            max_file_size,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Queue a PDF file. Input errors are returned here and no job is created.
    pub async fn submit(
        &self,
        path: impl AsRef<Path>,
        options: ExtractionOptions,
    ) -> Result<JobHandle, JobError> {
        let resolved = input::resolve_local(path.as_ref(), self.max_file_size)
            .map_err(|e| JobError::Input(e.to_string()))?;
        let filename = input::display_name(resolved.path());
        self.enqueue(resolved, filename, options).await
    }

    /// Queue an uploaded PDF. The bytes are spooled to a temp file owned by
    /// the job and removed once it finishes.
    pub async fn submit_bytes(
        &self,
        bytes: &[u8],
        filename: &str,
        options: ExtractionOptions,
    ) -> Result<JobHandle, JobError> {
        let resolved = input::spool_bytes(bytes, filename, self.max_file_size)
            .map_err(|e| JobError::Input(e.to_string()))?;
        self.enqueue(resolved, filename.to_string(), options).await
    }

    async fn enqueue(
        &self,
        input: ResolvedInput,
        filename: String,
        options: ExtractionOptions,
    ) -> Result<JobHandle, JobError> {
        let evicted = self.store.evict_expired(self.jobs.retention).await;
        if evicted > 0 {
            info!(evicted, "Evicted expired jobs");
        }

        let job = ExtractionJob::new(filename, options);
        self.store.put(&job).await?;
        let job_id = job.job_id.clone();
        info!(job_id = %job_id, filename = %job.filename, "Job submitted");

        let worker = self.worker.clone();
        let task = self.pool.spawn(async move { worker.run(job, input).await });
        Ok(JobHandle { job_id, task })
    }

    /// Current state of a job. Read-only; never creates a record.
    pub async fn poll(&self, job_id: &str) -> Result<JobView, JobError> {
        self.store
            .get(job_id)
            .await?
            .map(|job| job.view())
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Job summaries, newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<JobStatus>) -> Result<Vec<JobSummary>, JobError> {
        let jobs = newest_first(self.store.list().await?, status);
        Ok(jobs.iter().map(ExtractionJob::summary).collect())
    }

    /// Remove a job record.
    pub async fn delete(&self, job_id: &str) -> Result<(), JobError> {
        if self.store.delete(job_id).await? {
            Ok(())
        } else {
            Err(JobError::NotFound(job_id.to_string()))
        }
    }

    /// Mark jobs a crashed process left unfinished as failed. Call before
    /// submitting anything.
    pub async fn recover_interrupted(&self) -> Result<Vec<String>, JobError> {
        recover_interrupted(self.store.as_ref()).await
    }
}
