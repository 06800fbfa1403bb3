//! # Domain Models
//!
//! Runs, jobs, stages and issues as persisted by the run store and carried
//! on the wire.

pub mod issue;
pub mod job;
pub mod run;
pub mod stage;

pub use issue::{Issue, Severity};
pub use job::{Job, JobStatusUpdate, NewJob};
pub use run::{JobConfigurations, NewRun, Run, RunUpdate, TraceContext};
pub use stage::Stage;
