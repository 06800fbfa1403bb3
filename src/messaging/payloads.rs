//! # Message Payloads
//!
//! JSON discriminated unions exchanged between the orchestrator and the
//! stage workers. Run correlation lives in the header, never in the body.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::models::{Issue, Stage};

/// Messages consumed by the orchestrator endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OrchestratorMessage {
    /// Published by the API after the run row is committed
    RunCreated,
    /// Published by a worker when it begins executing a job
    #[serde(rename_all = "camelCase")]
    JobStarted { stage: Stage, job_id: i64 },
    /// Published by a worker when a job ends
    WorkerResult(WorkerResult),
    /// Published by the API to stop a run
    CancelRun {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl OrchestratorMessage {
    /// Stable name for logging
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::RunCreated => "RunCreated",
            Self::JobStarted { .. } => "JobStarted",
            Self::WorkerResult(_) => "WorkerResult",
            Self::CancelRun { .. } => "CancelRun",
        }
    }
}

/// Result of a job reported by its worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResult {
    pub stage: Stage,
    pub job_id: i64,
    pub outcome: WorkerOutcome,
}

impl WorkerResult {
    pub fn success(stage: Stage, job_id: i64, issues: Vec<Issue>) -> Self {
        Self {
            stage,
            job_id,
            outcome: WorkerOutcome::Success {
                issues,
                result_ref: None,
            },
        }
    }

    pub fn failure(stage: Stage, job_id: i64, cause: FailureCause) -> Self {
        Self {
            stage,
            job_id,
            outcome: WorkerOutcome::Failure { cause },
        }
    }

    pub fn ignored(stage: Stage, job_id: i64, reason: impl Into<String>) -> Self {
        Self {
            stage,
            job_id,
            outcome: WorkerOutcome::Ignored {
                reason: reason.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerOutcome {
    #[serde(rename_all = "camelCase")]
    Success {
        #[serde(default)]
        issues: Vec<Issue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_ref: Option<Value>,
    },
    Failure { cause: FailureCause },
    /// The worker refused the job, typically because it was already handled
    Ignored { reason: String },
}

/// Why a job failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureCause {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureCause {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Error, message)
    }

    pub fn cancelled(reason: Option<&str>) -> Self {
        let message = match reason {
            Some(reason) => format!("Run cancelled: {reason}"),
            None => "Run cancelled".to_string(),
        };
        Self::new(FailureKind::Cancelled, message)
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Error,
    Timeout,
    Crash,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Crash => "CRASH",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Start command sent to a stage endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub job_id: i64,
    pub stage: Stage,
    pub configuration: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_orchestrator_message_tags() {
        assert_eq!(
            serde_json::to_value(&OrchestratorMessage::RunCreated).unwrap(),
            json!({"type": "RunCreated"})
        );
        assert_eq!(
            serde_json::to_value(&OrchestratorMessage::JobStarted {
                stage: Stage::Scanner,
                job_id: 7
            })
            .unwrap(),
            json!({"type": "JobStarted", "stage": "scanner", "jobId": 7})
        );
    }

    #[test]
    fn test_worker_result_wire_format() {
        let message = OrchestratorMessage::WorkerResult(WorkerResult::failure(
            Stage::Advisor,
            3,
            FailureCause::error("advisor crashed"),
        ));
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["type"], "WorkerResult");
        assert_eq!(value["jobId"], 3);
        assert_eq!(value["outcome"]["status"], "FAILURE");
        assert_eq!(value["outcome"]["cause"]["kind"], "ERROR");

        let parsed: OrchestratorMessage = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_success_outcome_defaults() {
        let parsed: WorkerOutcome = serde_json::from_value(json!({"status": "SUCCESS"})).unwrap();
        assert_eq!(
            parsed,
            WorkerOutcome::Success {
                issues: vec![],
                result_ref: None
            }
        );

        let with_issue = WorkerResult::success(
            Stage::Analyzer,
            1,
            vec![Issue::orchestrator(Utc::now(), "x")],
        );
        let value = serde_json::to_value(&with_issue).unwrap();
        assert_eq!(value["outcome"]["issues"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_cancel_reason_optional() {
        let parsed: OrchestratorMessage = serde_json::from_value(json!({"type": "CancelRun"})).unwrap();
        assert_eq!(parsed, OrchestratorMessage::CancelRun { reason: None });
        assert_eq!(parsed.message_type(), "CancelRun");
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let result = serde_json::from_value::<OrchestratorMessage>(json!({"type": "Reticulate"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_cancelled_cause_message() {
        assert_eq!(
            FailureCause::cancelled(Some("user request")).message,
            "Run cancelled: user request"
        );
        assert_eq!(FailureCause::cancelled(None).to_string(), "CANCELLED: Run cancelled");
    }
}
