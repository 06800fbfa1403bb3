use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Run row exists, no job has been scheduled yet
    Created,
    /// At least one job has been scheduled
    Active,
    /// Every configured stage finished without issues
    Finished,
    /// Every configured stage finished, at least one with issues
    FinishedWithIssues,
    /// A stage failed or the run was cancelled
    Failed,
}

impl RunStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished | Self::FinishedWithIssues | Self::Failed
        )
    }

    /// Check if the run is still being driven by the orchestrator
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Check if moving to `target` keeps the status monotonic
    pub fn can_transition_to(&self, target: RunStatus) -> bool {
        match (self, target) {
            (from, to) if from.is_terminal() => *from == to,
            (Self::Created, _) => true,
            (Self::Active, Self::Created) => false,
            (Self::Active, _) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Active => "ACTIVE",
            Self::Finished => "FINISHED",
            Self::FinishedWithIssues => "FINISHED_WITH_ISSUES",
            Self::Failed => "FAILED",
        }
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "ACTIVE" => Ok(Self::Active),
            "FINISHED" => Ok(Self::Finished),
            "FINISHED_WITH_ISSUES" => Ok(Self::FinishedWithIssues),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Unknown run status: {s}")),
        }
    }
}

/// Job lifecycle status
///
/// Jobs only move forward: `CREATED -> SCHEDULED -> RUNNING -> terminal`.
/// `RUNNING` may be skipped when the worker's start notice is lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Scheduled,
    Running,
    Finished,
    FinishedWithIssues,
    Failed,
}

impl JobStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished | Self::FinishedWithIssues | Self::Failed
        )
    }

    /// Check if the job still occupies its stage
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Check if the job waits for a worker to pick up its start command
    pub fn is_awaiting_worker(&self) -> bool {
        matches!(self, Self::Created | Self::Scheduled)
    }

    /// Position in the forward-only lifecycle; all terminal states share the last rank
    fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Scheduled => 1,
            Self::Running => 2,
            Self::Finished | Self::FinishedWithIssues | Self::Failed => 3,
        }
    }

    /// Check if moving to `target` is a forward move
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        !self.is_terminal() && target.rank() > self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Scheduled => "SCHEDULED",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::FinishedWithIssues => "FINISHED_WITH_ISSUES",
            Self::Failed => "FAILED",
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Created
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
        match s {
            "CREATED" => Ok(Self::Created),
            "SCHEDULED" => Ok(Self::Scheduled),
            "RUNNING" => Ok(Self::Running),
            "FINISHED" => Ok(Self::Finished),
            "FINISHED_WITH_ISSUES" => Ok(Self::FinishedWithIssues),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Unknown job status: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_terminal_states() {
        assert!(RunStatus::Finished.is_terminal());
        assert!(RunStatus::FinishedWithIssues.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Created.is_terminal());
        assert!(RunStatus::Active.is_active());
    }

    #[test]
    fn test_run_status_never_regresses() {
        assert!(RunStatus::Created.can_transition_to(RunStatus::Active));
        assert!(RunStatus::Created.can_transition_to(RunStatus::Finished));
        assert!(RunStatus::Active.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Active.can_transition_to(RunStatus::Created));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Active));
        assert!(!RunStatus::Finished.can_transition_to(RunStatus::Failed));
    }

    #[test]
    fn test_job_forward_only() {
        assert!(JobStatus::Created.can_transition_to(JobStatus::Scheduled));
        assert!(JobStatus::Scheduled.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Scheduled.can_transition_to(JobStatus::Finished));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Scheduled));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Finished.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&RunStatus::FinishedWithIssues).unwrap();
        assert_eq!(json, "\"FINISHED_WITH_ISSUES\"");

        let status: JobStatus = serde_json::from_str("\"SCHEDULED\"").unwrap();
        assert_eq!(status, JobStatus::Scheduled);
    }

    #[test]
    fn test_state_parsing_matches_display() {
        for status in [
            JobStatus::Created,
            JobStatus::Scheduled,
            JobStatus::Running,
            JobStatus::Finished,
            JobStatus::FinishedWithIssues,
            JobStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert!("RETRYING".parse::<RunStatus>().is_err());
    }
}
