use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Stage;
use crate::state_machine::JobStatus;

/// Execution of one stage for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: i64,
    pub run_id: i64,
    pub stage: Stage,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub configuration: Value,
    pub result_ref: Option<Value>,
    /// Last time a start command for this job was observed as sent
    #[serde(default)]
    pub dispatched_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Waiting for a worker with no start command ever observed as sent
    pub fn is_undispatched(&self) -> bool {
        self.status.is_awaiting_worker() && self.dispatched_at.is_none()
    }
}

/// New Job for creation (without generated fields)
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub run_id: i64,
    pub stage: Stage,
    pub configuration: Value,
    pub created_at: DateTime<Utc>,
}

/// Forward status change of a job
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatusUpdate {
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result_ref: Option<Value>,
}

impl JobStatusUpdate {
    pub fn to(status: JobStatus) -> Self {
        Self {
            status,
            started_at: None,
            finished_at: None,
            result_ref: None,
        }
    }

    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(at),
            ..Self::to(JobStatus::Running)
        }
    }

    pub fn finished(status: JobStatus, at: DateTime<Utc>) -> Self {
        Self {
            finished_at: Some(at),
            ..Self::to(status)
        }
    }

    pub fn with_result_ref(mut self, result_ref: Option<Value>) -> Self {
        self.result_ref = result_ref;
        self
    }

    /// Apply this update to an in-memory copy of the job
    pub fn apply_to(&self, job: &mut Job) {
        job.status = self.status;
        if let Some(started_at) = self.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(finished_at) = self.finished_at {
            job.finished_at = Some(finished_at);
        }
        if self.result_ref.is_some() {
            job.result_ref = self.result_ref.clone();
        }
    }
}
