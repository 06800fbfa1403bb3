//! # Stage Worker
//!
//! [`MessageHandler`] for a stage endpoint. Per job request it reports
//! `JobStarted`, runs the executor in its own task, and reports the outcome
//! to the orchestrator. Workers never touch job state; the orchestrator
//! decides what a report means.
//!
//! Executor errors, panics and timeouts all become `FAILURE` reports. Only a
//! failed report to the orchestrator fails the handler, which requeues the
//! request.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::context::{HeaderContextFactory, WorkerContext, WorkerContextFactory};
use super::executor::{RunResult, StageExecutor};
use crate::messaging::payloads::{FailureCause, FailureKind, JobRequest, OrchestratorMessage, WorkerResult};
use crate::messaging::{
    Message, MessageHandler, MessageHeader, MessageSender, MessagingResult, TransportFactory, ORCHESTRATOR_ENDPOINT,
};
use crate::models::Stage;

pub struct StageWorker<E> {
    executor: Arc<E>,
    context_factory: Arc<dyn WorkerContextFactory>,
    orchestrator: MessageSender<OrchestratorMessage>,
    execution_timeout: Option<Duration>,
}

impl<E: StageExecutor> StageWorker<E> {
    pub fn new(executor: E, orchestrator: MessageSender<OrchestratorMessage>) -> Self {
        Self {
            executor: Arc::new(executor),
            context_factory: Arc::new(HeaderContextFactory),
            orchestrator,
            execution_timeout: None,
        }
    }

    pub fn from_factory(executor: E, factory: &TransportFactory) -> MessagingResult<Self> {
        Ok(Self::new(executor, factory.create_sender(ORCHESTRATOR_ENDPOINT)?))
    }

    pub fn with_context_factory(mut self, context_factory: impl WorkerContextFactory) -> Self {
        self.context_factory = Arc::new(context_factory);
        self
    }

    /// Report executions running longer than `timeout` as `TIMEOUT` failures
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    pub fn stage(&self) -> Stage {
        self.executor.stage()
    }

    async fn report(&self, header: &MessageHeader, payload: OrchestratorMessage) -> MessagingResult<()> {
        let message_type = payload.message_type();
        self.orchestrator.send(&Message::new(header.clone(), payload)).await?;
        debug!(stage = %self.stage(), message_type, "Reported to orchestrator");
        Ok(())
    }

    async fn run_job(&self, context: WorkerContext, request: JobRequest) -> RunResult {
        let executor = Arc::clone(&self.executor);
        let mut task = tokio::spawn(async move { executor.execute(&context, &request).await });

        let joined = match self.execution_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    task.abort();
                    return RunResult::Failed(FailureCause::new(
                        FailureKind::Timeout,
                        format!("execution exceeded {}s", limit.as_secs()),
                    ));
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => RunResult::Failed(FailureCause::error(format!("{e:#}"))),
            Err(e) if e.is_panic() => RunResult::Failed(FailureCause::new(FailureKind::Crash, "executor panicked")),
            Err(_) => RunResult::Failed(FailureCause::new(FailureKind::Crash, "execution cancelled")),
        }
    }
}

#[async_trait]
impl<E: StageExecutor> MessageHandler<JobRequest> for StageWorker<E> {
    async fn handle(&self, message: Message<JobRequest>) -> anyhow::Result<()> {
        let Message { header, payload: request } = message;
        let stage = self.stage();
        let job_id = request.job_id;

        if request.stage != stage {
            warn!(job_id, requested = %request.stage, worker = %stage, "Job request delivered to the wrong stage");
            let result = WorkerResult::ignored(request.stage, job_id, format!("delivered to the {stage} worker"));
            self.report(&header, OrchestratorMessage::WorkerResult(result)).await?;
            return Ok(());
        }

        self.report(&header, OrchestratorMessage::JobStarted { stage, job_id })
            .await?;

        let context = self.context_factory.create_context(&header, &request);
        let result = self.run_job(context, request).await;
        match &result {
            RunResult::Success { issues, .. } => info!(job_id, stage = %stage, issues = issues.len(), "Job finished"),
            RunResult::Failed(cause) => error!(job_id, stage = %stage, cause = %cause, "Job failed"),
            RunResult::Ignored(reason) => warn!(job_id, stage = %stage, reason = %reason, "Job ignored"),
        }

        let result = WorkerResult {
            stage,
            job_id,
            outcome: result.into_outcome(),
        };
        self.report(&header, OrchestratorMessage::WorkerResult(result)).await?;
        Ok(())
    }
}
