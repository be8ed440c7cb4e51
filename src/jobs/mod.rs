//! Asynchronous extraction jobs.
//!
//! A job wraps one document submitted for background extraction. Its record
//! moves through `pending → processing → {completed, failed}` and is written
//! to a [`JobStore`] at every step, so callers can poll it by id while the
//! pipeline runs in a [`JobWorker`].

pub mod store;
pub mod worker;

pub use store::{recover_interrupted, FileJobStore, JobStore, MemoryJobStore};
pub use worker::{JobHandle, JobManager, JobWorker};

use crate::config::ExtractionOptions;
use crate::error::JobError;
use crate::output::{DocumentResult, PageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Legal lifecycle steps. A pending job may fail directly when it never
    /// got to run (staging error, interrupted process).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (*self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!(
                "unknown job status '{other}' (expected pending, processing, completed or failed)"
            )),
        }
    }
}

/// The persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionJob {
    /// UUID v4, hex without hyphens.
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filename: String,
    pub options: ExtractionOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DocumentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionJob {
    pub fn new(filename: impl Into<String>, options: ExtractionOptions) -> Self {
        let now = Utc::now();
        Self {
            job_id: uuid::Uuid::new_v4().simple().to_string(),
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
            filename: filename.into(),
            options,
            result: None,
            error: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(to) {
            return Err(JobError::InvalidTransition {
                job_id: self.job_id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Processing)
    }

    pub fn complete(&mut self, result: DocumentResult) -> Result<(), JobError> {
        self.transition(JobStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), JobError> {
        self.transition(JobStatus::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    pub fn view(&self) -> JobView {
        JobView {
            job_id: self.job_id.clone(),
            status: self.status,
            filename: self.filename.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            job_id: self.job_id.clone(),
            status: self.status,
            filename: self.filename.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            quality: self.result.as_ref().map(|r| r.quality.status),
            error: self.error.clone(),
        }
    }
}

/// What a poll returns: status plus the result or the error, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DocumentResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Listing entry, without the result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Document quality status of a completed job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<PageStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
