use std::fmt;

use crate::error::OrchestratorError;
use crate::state_machine::{IgnoreReason, RunStatus};

/// What handling one orchestrator message amounted to
#[derive(Debug)]
pub enum HandlingOutcome {
    /// The transition was committed. `command_sent` is false when there was
    /// nothing to send or the send failed and is left to reconciliation.
    Applied { run_status: RunStatus, command_sent: bool },
    /// Nothing changed
    Ignored(IgnoreReason),
    /// Load, decide or persist failed; the message must be redelivered
    Failed(OrchestratorError),
}

impl HandlingOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for HandlingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied {
                run_status,
                command_sent,
            } => write!(f, "applied (run {run_status}, command sent: {command_sent})"),
            Self::Ignored(reason) => write!(f, "ignored: {reason}"),
            Self::Failed(error) => write!(f, "failed: {error}"),
        }
    }
}
