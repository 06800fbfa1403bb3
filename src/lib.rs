#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, RabbitMQ in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # SCA Orchestrator
//!
//! Pipeline orchestrator for software-composition-analysis runs, plus the
//! broker-agnostic transport it talks to its stage workers over.
//!
//! ## Overview
//!
//! A run is a sequence of stages (`ANALYZER`, `ADVISOR`, `SCANNER`,
//! `EVALUATOR`, `REPORTER`), each executed by a remote worker as one job.
//! The orchestrator is the only writer of run and job status: workers report
//! `JobStarted` and a final result, and every report goes through one pure
//! decision function before anything is persisted or sent.
//!
//! ## Architecture
//!
//! ```text
//!   API ──RunCreated──▶ orchestrator_queue ──▶ Orchestrator ──▶ RunStore
//!                              ▲                   │
//!          JobStarted / result │                   │ JobRequest
//!                              │                   ▼
//!                         StageWorker ◀──── {stage}_queue
//! ```
//!
//! Every message carries a header with `token`, `traceId` and `runId`. The
//! header travels unchanged from the message that created a run to every
//! command and report that follows.
//!
//! ## Delivery Guarantees
//!
//! Transports deliver at least once. Handling is idempotent: redelivered
//! reports are recognised from persisted state and dropped. State is
//! committed before a command is sent; a lost send is repaired by the
//! [`orchestration::Reconciler`].
//!
//! ## Module Organization
//!
//! - [`models`] - Runs, jobs, stages and issues
//! - [`state_machine`] - Status enums and the transition decision function
//! - [`store`] - Run persistence (PostgreSQL or in-memory)
//! - [`messaging`] - Message format, endpoints and transport bindings
//! - [`orchestration`] - Orchestrator, reconciliation and process bootstrap
//! - [`worker`] - Worker-side harness for stage executors
//! - [`config`] - Layered TOML configuration
//! - [`logging`] - Tracing subscriber setup
//! - [`error`] - Top-level error and failure classification
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sca_orchestrator::config::ConfigManager;
//! use sca_orchestrator::logging::init_tracing;
//! use sca_orchestrator::orchestration::OrchestrationSystem;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! init_tracing(&manager.config().logging);
//!
//! let mut system = OrchestrationSystem::bootstrap(manager.config()).await?;
//! tokio::signal::ctrl_c().await?;
//! system.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, scenario and property tests
//! ```
//!
//! Tests marked `#[ignore]` need a running PostgreSQL or RabbitMQ.

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod store;
pub mod worker;

pub use config::{ConfigManager, OrchestratorConfig};
pub use error::{ErrorClass, OrchestratorError, OrchestratorResult};
pub use messaging::{Message, MessageHeader, OrchestratorMessage, TransportFactory};
pub use models::{Issue, Job, Run, Severity, Stage};
pub use orchestration::{OrchestrationSystem, OrchestrationSystemHandle, Orchestrator, Reconciler};
pub use state_machine::{JobStatus, RunStatus};
pub use store::{RunStore, StoreError};
pub use worker::{StageExecutor, StageWorker};
