//! # Stage Workers
//!
//! Worker-side half of the message contract: receive job requests on a stage
//! endpoint, run them through a [`StageExecutor`], and report back to the
//! orchestrator endpoint.

pub mod context;
pub mod executor;
pub mod harness;

pub use context::{HeaderContextFactory, WorkerContext, WorkerContextFactory};
pub use executor::{RunResult, StageExecutor};
pub use harness::StageWorker;
