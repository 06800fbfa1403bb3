//! # Orchestration
//!
//! The orchestrator message handler, the reconciliation sweep that repairs
//! lost messages, and the bootstrap that wires both to the store and the
//! transport.

pub mod bootstrap;
pub mod orchestrator;
pub mod outcome;
pub mod reconciler;

pub use bootstrap::{OrchestrationSystem, OrchestrationSystemHandle, SystemStatus};
pub use orchestrator::Orchestrator;
pub use outcome::HandlingOutcome;
pub use reconciler::{Reconciler, SweepReport, RECONCILER_TOKEN};
