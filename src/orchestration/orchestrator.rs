//! # Orchestrator
//!
//! Handler bound to the orchestrator endpoint. For every message it locks the
//! run, reloads run and jobs, asks [`decide`] what to do, persists the
//! transition, commits, and only then sends the resulting start command.
//!
//! A send that fails after the commit is logged and left for the reconciler;
//! the orchestrator never retries from memory. No lock is held while sending.
//! A send that succeeds is recorded on the job in a short follow-up
//! transaction, which keeps the reconciler away from it.
//!
//! The token and trace id of the first header that changes a run are stored
//! with it, so commands re-sent by the reconciler carry them too.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::outcome::HandlingOutcome;
use crate::error::OrchestratorResult;
use crate::logging::{log_job_transition, log_run_transition};
use crate::messaging::{
    Endpoint, JobRequest, Message, MessageHandler, MessageHeader, MessageSender, MessagingResult, OrchestratorMessage,
    TransportFactory,
};
use crate::models::{Job, JobStatusUpdate, NewJob, Run, Stage, TraceContext};
use crate::state_machine::{decide, Decision, IgnoreReason, JobStatus, OrchestratorEvent, Transition};
use crate::store::{RunStore, RunTransaction, StoreResult};

pub struct Orchestrator {
    store: Arc<dyn RunStore>,
    workers: HashMap<Stage, MessageSender<JobRequest>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store.backend_name())
            .field("workers", &self.workers.len())
            .finish()
    }
}

/// Job status change persisted in one transaction, logged after commit
struct PersistedJob {
    job_id: i64,
    stage: Stage,
    from: Option<JobStatus>,
    to: JobStatus,
}

impl Orchestrator {
    pub fn new(store: Arc<dyn RunStore>, workers: HashMap<Stage, MessageSender<JobRequest>>) -> Self {
        Self { store, workers }
    }

    /// Build with one sender per stage endpoint
    pub fn from_factory(store: Arc<dyn RunStore>, factory: &TransportFactory) -> MessagingResult<Self> {
        let workers = Stage::ALL
            .into_iter()
            .map(|stage| Ok((stage, factory.create_sender(Endpoint::worker(stage))?)))
            .collect::<MessagingResult<HashMap<_, _>>>()?;
        Ok(Self::new(store, workers))
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Handle one inbound message
    pub async fn process(&self, message: Message<OrchestratorMessage>) -> HandlingOutcome {
        let Message { header, payload } = message;
        self.handle_event(&header, OrchestratorEvent::from(payload)).await
    }

    /// Handle one event for the run named in `header`
    ///
    /// Outbound commands reuse `header`, so token and trace id follow the run.
    pub async fn handle_event(&self, header: &MessageHeader, event: OrchestratorEvent) -> HandlingOutcome {
        match self.apply(header, &event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    run_id = header.run_id,
                    event = %event,
                    error = %e,
                    error_class = %e.class(),
                    "Failed to handle orchestrator event"
                );
                HandlingOutcome::Failed(e)
            }
        }
    }

    async fn apply(&self, header: &MessageHeader, event: &OrchestratorEvent) -> OrchestratorResult<HandlingOutcome> {
        let run_id = header.run_id;
        let mut tx = self.store.begin(run_id).await?;

        let Some(run) = tx.get_run().await? else {
            tx.rollback().await?;
            return Ok(ignored(run_id, event, IgnoreReason::UnknownRun { run_id }));
        };
        let jobs = tx.list_jobs().await?;

        if let Some(job_id) = event.job_id() {
            if !jobs.iter().any(|job| job.id == job_id) {
                if let Some(foreign) = tx.get_job(job_id).await? {
                    tx.rollback().await?;
                    let reason = IgnoreReason::JobRunMismatch {
                        job_id,
                        owner_run_id: foreign.run_id,
                    };
                    return Ok(ignored(run_id, event, reason));
                }
            }
        }

        let now = Utc::now();
        let mut transition = match decide(&run, &jobs, event, now) {
            Decision::Apply(transition) => transition,
            Decision::Ignore(reason) => {
                tx.rollback().await?;
                return Ok(ignored(run_id, event, reason));
            }
        };
        if run.trace_context.is_none() && !matches!(event, OrchestratorEvent::Reconcile { .. }) {
            let context = TraceContext::new(header.token.clone(), header.trace_id.clone());
            let run_update = transition.run_update.take().unwrap_or_default();
            transition.run_update = Some(run_update.with_trace_context(context));
        }

        let (persisted, command) = persist(tx.as_mut(), &run, &jobs, &transition, now).await?;
        tx.commit().await?;

        for job in &persisted {
            log_job_transition(run_id, job.job_id, job.stage, job.from, job.to);
        }
        let run_status = transition.run_status().unwrap_or(run.status);
        if run_status != run.status {
            log_run_transition(run_id, run.status, run_status, event.event_type());
        }

        let command_sent = match command {
            Some(request) => self.dispatch(header, request).await,
            None => false,
        };
        Ok(HandlingOutcome::Applied {
            run_status,
            command_sent,
        })
    }

    /// Send a start command; failures are logged and left to reconciliation
    async fn dispatch(&self, header: &MessageHeader, request: JobRequest) -> bool {
        let job_id = request.job_id;
        let sent = self.send_request(header, request).await;
        if sent {
            self.record_dispatch(header.run_id, job_id).await;
        }
        sent
    }

    /// A failure here only means the reconciler may send the command once more
    async fn record_dispatch(&self, run_id: i64, job_id: i64) {
        let recorded: StoreResult<()> = async {
            let mut tx = self.store.begin(run_id).await?;
            tx.mark_dispatched(job_id, Utc::now()).await?;
            tx.commit().await
        }
        .await;

        if let Err(e) = recorded {
            warn!(run_id, job_id, error = %e, "Start command sent but not recorded");
        }
    }

    async fn send_request(&self, header: &MessageHeader, request: JobRequest) -> bool {
        let stage = request.stage;
        let job_id = request.job_id;
        let Some(sender) = self.workers.get(&stage) else {
            error!(run_id = header.run_id, job_id, stage = %stage, "No sender configured for stage");
            return false;
        };

        match sender.send(&Message::new(header.clone(), request)).await {
            Ok(()) => {
                debug!(run_id = header.run_id, job_id, stage = %stage, "Start command sent");
                true
            }
            Err(e) => {
                warn!(
                    run_id = header.run_id,
                    job_id,
                    stage = %stage,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Start command not sent; reconciliation will re-dispatch"
                );
                false
            }
        }
    }
}

async fn persist(
    tx: &mut dyn RunTransaction,
    run: &Run,
    jobs: &[Job],
    transition: &Transition,
    now: DateTime<Utc>,
) -> OrchestratorResult<(Vec<PersistedJob>, Option<JobRequest>)> {
    let mut persisted = Vec::new();
    let mut command = None;

    for job_update in &transition.job_updates {
        tx.update_job_status(job_update.job_id, &job_update.update).await?;
        persisted.push(PersistedJob {
            job_id: job_update.job_id,
            stage: job_update.stage,
            from: Some(job_update.from),
            to: job_update.update.status,
        });
    }

    if let Some(scheduled) = &transition.schedule {
        let job = tx
            .create_job(NewJob {
                run_id: run.id,
                stage: scheduled.stage,
                configuration: scheduled.configuration.clone(),
                created_at: now,
            })
            .await?;
        let job = tx
            .update_job_status(job.id, &JobStatusUpdate::to(JobStatus::Scheduled))
            .await?;
        persisted.push(PersistedJob {
            job_id: job.id,
            stage: job.stage,
            from: None,
            to: job.status,
        });
        command = Some(JobRequest {
            job_id: job.id,
            stage: job.stage,
            configuration: job.configuration,
        });
    }

    if let Some(run_update) = &transition.run_update {
        tx.update_run(run_update).await?;
    }

    if let Some(job_id) = transition.redispatch {
        if let Some(job) = jobs.iter().find(|job| job.id == job_id) {
            info!(run_id = run.id, job_id, stage = %job.stage, "Re-dispatching start command");
            command = Some(JobRequest {
                job_id,
                stage: job.stage,
                configuration: job.configuration.clone(),
            });
        }
    }

    Ok((persisted, command))
}

fn ignored(run_id: i64, event: &OrchestratorEvent, reason: IgnoreReason) -> HandlingOutcome {
    if reason.is_expected_duplicate() {
        debug!(run_id, event = %event, reason = %reason, "Event ignored");
    } else {
        warn!(run_id, event = %event, reason = %reason, "Event dropped");
    }
    HandlingOutcome::Ignored(reason)
}

#[async_trait]
impl MessageHandler<OrchestratorMessage> for Orchestrator {
    async fn handle(&self, message: Message<OrchestratorMessage>) -> anyhow::Result<()> {
        match self.process(message).await {
            HandlingOutcome::Failed(e) => Err(anyhow::Error::new(e).context("orchestrator event not applied")),
            HandlingOutcome::Applied { .. } | HandlingOutcome::Ignored(_) => Ok(()),
        }
    }
}
