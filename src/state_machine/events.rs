use chrono::{DateTime, Utc};
use std::fmt;

use crate::messaging::payloads::{OrchestratorMessage, WorkerResult};
use crate::models::Stage;

/// Inputs to the run state machine
///
/// Every orchestrator message maps to one event; the reconciliation sweep adds
/// [`OrchestratorEvent::Reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    RunCreated,
    JobStarted { stage: Stage, job_id: i64 },
    WorkerResult(WorkerResult),
    CancelRun { reason: Option<String> },
    /// Repair a run whose outbound message may have been lost. Jobs created
    /// at or before `stale_before` that still await a worker are re-dispatched.
    Reconcile { stale_before: DateTime<Utc> },
}

impl OrchestratorEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RunCreated => "run_created",
            Self::JobStarted { .. } => "job_started",
            Self::WorkerResult(_) => "worker_result",
            Self::CancelRun { .. } => "cancel_run",
            Self::Reconcile { .. } => "reconcile",
        }
    }

    /// Job referenced by the event, if any
    pub fn job_id(&self) -> Option<i64> {
        match self {
            Self::JobStarted { job_id, .. } => Some(*job_id),
            Self::WorkerResult(result) => Some(result.job_id),
            _ => None,
        }
    }
}

impl From<OrchestratorMessage> for OrchestratorEvent {
    fn from(message: OrchestratorMessage) -> Self {
        match message {
            OrchestratorMessage::RunCreated => Self::RunCreated,
            OrchestratorMessage::JobStarted { stage, job_id } => Self::JobStarted { stage, job_id },
            OrchestratorMessage::WorkerResult(result) => Self::WorkerResult(result),
            OrchestratorMessage::CancelRun { reason } => Self::CancelRun { reason },
        }
    }
}

impl fmt::Display for OrchestratorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}
