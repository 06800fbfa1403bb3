use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::ORCHESTRATOR_ISSUE_SOURCE;

/// Issue severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Hint,
    Warning,
    Error,
}

/// A problem recorded against a run, either reported by a stage or raised
/// by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub message: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_path: Option<String>,
}

impl Issue {
    pub fn new(
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            timestamp,
            source: source.into(),
            message: message.into(),
            severity,
            affected_path: None,
        }
    }

    /// Issue raised by the orchestrator itself
    pub fn orchestrator(timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self::new(timestamp, ORCHESTRATOR_ISSUE_SOURCE, message, Severity::Error)
    }

    pub fn with_affected_path(mut self, path: impl Into<String>) -> Self {
        self.affected_path = Some(path.into());
        self
    }

    /// Warnings and errors turn a finished job into `FINISHED_WITH_ISSUES`;
    /// hints are recorded only.
    pub fn is_significant(&self) -> bool {
        self.severity >= Severity::Warning
    }
}
