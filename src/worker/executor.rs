use async_trait::async_trait;
use serde_json::Value;

use super::context::WorkerContext;
use crate::messaging::payloads::{FailureCause, JobRequest, WorkerOutcome};
use crate::models::{Issue, Stage};

/// What a stage execution produced
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    Success {
        issues: Vec<Issue>,
        result_ref: Option<Value>,
    },
    Failed(FailureCause),
    /// The job must not run, e.g. because this worker already handled it
    Ignored(String),
}

impl RunResult {
    pub fn success() -> Self {
        Self::Success {
            issues: Vec::new(),
            result_ref: None,
        }
    }

    pub fn success_with(issues: Vec<Issue>, result_ref: Option<Value>) -> Self {
        Self::Success { issues, result_ref }
    }

    pub fn into_outcome(self) -> WorkerOutcome {
        match self {
            Self::Success { issues, result_ref } => WorkerOutcome::Success { issues, result_ref },
            Self::Failed(cause) => WorkerOutcome::Failure { cause },
            Self::Ignored(reason) => WorkerOutcome::Ignored { reason },
        }
    }
}

/// Stage-specific work behind a worker endpoint
///
/// An `Err` is reported to the orchestrator as a job failure, exactly like
/// [`RunResult::Failed`].
#[async_trait]
pub trait StageExecutor: Send + Sync + 'static {
    fn stage(&self) -> Stage;

    async fn execute(&self, context: &WorkerContext, request: &JobRequest) -> anyhow::Result<RunResult>;
}
