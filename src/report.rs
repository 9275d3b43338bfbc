use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::context::TriggerSource;

/// Outcome of one pipeline run, serializable for `--output`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineReport {
    pub project: String,
    pub ref_name: String,
    pub tag: bool,
    pub source: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub status: JobStatus,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub status: JobStatus,
    pub jobs: Vec<JobReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub name: String,
    pub stage: String,
    pub status: JobStatus,
    pub duration_secs: f64,
    /// Exit code of the last attempt, absent for jobs that never ran
    pub exit_code: Option<i32>,
    /// Executions including retries; 0 for skipped jobs
    pub attempts: u32,
    pub allow_failure: bool,
    pub image: Option<String>,
    /// Skip reason or failure note
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Failed,
    Skipped,
    Manual,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Manual => "manual",
        }
    }
}

impl StageReport {
    /// Derive a stage status from its jobs. A failed job only fails the
    /// stage when it does not allow failure; a stage where nothing ran is
    /// skipped.
    pub fn derive_status(jobs: &[JobReport]) -> JobStatus {
        if jobs
            .iter()
            .any(|job| job.status == JobStatus::Failed && !job.allow_failure)
        {
            JobStatus::Failed
        } else if jobs.iter().any(|job| job.attempts > 0) {
            JobStatus::Success
        } else {
            JobStatus::Skipped
        }
    }
}

impl PipelineReport {
    /// Derive a pipeline status from its stages. An empty or all-skipped
    /// pipeline counts as success.
    pub fn derive_status(stages: &[StageReport]) -> JobStatus {
        if stages
            .iter()
            .any(|stage| stage.status == JobStatus::Failed)
        {
            JobStatus::Failed
        } else {
            JobStatus::Success
        }
    }

    pub fn failed(&self) -> bool {
        self.status == JobStatus::Failed
    }
}
