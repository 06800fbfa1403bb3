// Run and job state machine
//
// Status enums, the events that drive them, and the pure decision function
// the orchestrator consults for every inbound message.

pub mod decision;
pub mod events;
pub mod states;

pub use decision::{decide, next_stage, Decision, IgnoreReason, JobTransition, ScheduledStage, Transition};
pub use events::OrchestratorEvent;
pub use states::{JobStatus, RunStatus};
