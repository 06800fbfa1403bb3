//! # Reconciliation Sweep
//!
//! Background service that repairs runs whose outbound message was lost:
//! a `RunCreated` that never arrived, or a start command whose send failed
//! after the transition was committed.
//!
//! ## Sweep Flow
//!
//! 1. Timer tick triggers a sweep (the first tick fires at startup)
//! 2. The store lists runs whose persisted state implies a missing message
//! 3. Each run gets a `Reconcile` event through the regular handling path,
//!    under the token and trace id recorded with the run (a fresh trace id
//!    when the run was never handled)
//!
//! ## Configuration
//!
//! ```toml
//! [reconciliation]
//! enabled = true
//! interval_seconds = 60
//! stale_after_seconds = 300
//! batch_size = 100
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, info_span, Instrument};

use super::orchestrator::Orchestrator;
use super::outcome::HandlingOutcome;
use crate::config::ReconciliationConfig;
use crate::messaging::MessageHeader;
use crate::state_machine::OrchestratorEvent;
use crate::store::StoreResult;

/// Token for runs that have no recorded trace context
pub const RECONCILER_TOKEN: &str = "";

/// Counts from one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub applied: usize,
    pub commands_sent: usize,
    pub ignored: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: &HandlingOutcome) {
        self.examined += 1;
        match outcome {
            HandlingOutcome::Applied { command_sent, .. } => {
                self.applied += 1;
                if *command_sent {
                    self.commands_sent += 1;
                }
            }
            HandlingOutcome::Ignored(_) => self.ignored += 1,
            HandlingOutcome::Failed(_) => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    orchestrator: Arc<Orchestrator>,
    config: ReconciliationConfig,
}

impl Reconciler {
    pub fn new(orchestrator: Arc<Orchestrator>, config: ReconciliationConfig) -> Self {
        Self { orchestrator, config }
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }

    /// Sweep on every interval tick until `shutdown` flips to `true`
    ///
    /// A failed sweep is logged and does not stop the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = interval(self.config.interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_seconds = self.config.interval_seconds,
            stale_after_seconds = self.config.stale_after_seconds,
            batch_size = self.config.batch_size,
            "Starting reconciliation sweep"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = timer.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            match self.sweep().await {
                Ok(report) if report.examined > 0 => info!(
                    examined = report.examined,
                    applied = report.applied,
                    commands_sent = report.commands_sent,
                    ignored = report.ignored,
                    failed = report.failed,
                    "Reconciliation sweep completed"
                ),
                Ok(_) => debug!("No runs need reconciliation this cycle"),
                Err(e) => error!(error = %e, "Reconciliation sweep failed"),
            }
        }

        info!("Reconciliation sweep stopped");
    }

    /// One sweep with the cutoff derived from the current time
    pub async fn sweep(&self) -> StoreResult<SweepReport> {
        self.sweep_at(Utc::now()).await
    }

    /// One sweep as of `now`
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> StoreResult<SweepReport> {
        let stale_before = now - self.config.stale_after();
        let run_ids = self
            .orchestrator
            .store()
            .find_reconcilable_runs(stale_before, self.config.batch_size)
            .await?;

        let mut report = SweepReport::default();
        for run_id in run_ids {
            let header = self.header_for(run_id).await?;
            let span = info_span!("reconcile_run", trace_id = %header.trace_id, run_id);
            let outcome = self
                .orchestrator
                .handle_event(&header, OrchestratorEvent::Reconcile { stale_before })
                .instrument(span)
                .await;
            report.record(&outcome);
        }
        Ok(report)
    }

    async fn header_for(&self, run_id: i64) -> StoreResult<MessageHeader> {
        let context = self
            .orchestrator
            .store()
            .find_run(run_id)
            .await?
            .and_then(|run| run.trace_context);
        Ok(match context {
            Some(context) => MessageHeader::new(context.token, context.trace_id, run_id),
            None => MessageHeader::with_new_trace(RECONCILER_TOKEN, run_id),
        })
    }
}
