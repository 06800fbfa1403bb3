//! Shared fixtures: an orchestrator wired to the in-memory store and
//! transport, plus scripted stage workers that can be pumped step by step.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sca_orchestrator::messaging::{
    DeliveryOutcome, Endpoint, FailureCause, InMemoryTransport, JobRequest, Message, MessageHeader, MessageReceiver,
    MessageSender, OrchestratorMessage, ReceiverConfig, TransportFactory, ORCHESTRATOR_ENDPOINT,
};
use sca_orchestrator::models::{Issue, Job, JobConfigurations, NewRun, Run, Severity, Stage};
use sca_orchestrator::orchestration::Orchestrator;
use sca_orchestrator::store::{InMemoryRunStore, RunStore};
use sca_orchestrator::worker::{RunResult, StageExecutor, StageWorker, WorkerContext};

pub const TOKEN: &str = "api-token";

pub fn receiver_config() -> ReceiverConfig {
    ReceiverConfig {
        batch_size: 10,
        visibility_timeout: Duration::from_secs(30),
        poll_interval: Duration::from_millis(5),
        max_concurrent_handlers: 4,
    }
}

/// Configuration for every stage in `stages`, tagged with the stage name
pub fn configs_for(stages: &[Stage]) -> JobConfigurations {
    stages.iter().fold(JobConfigurations::default(), |configs, stage| {
        configs.with_stage(*stage, json!({ "stage": stage.as_str() }))
    })
}

pub struct TestEnv {
    pub transport: Arc<InMemoryTransport>,
    pub factory: TransportFactory,
    pub store: Arc<InMemoryRunStore>,
    pub orchestrator: Arc<Orchestrator>,
    orchestrator_sender: MessageSender<OrchestratorMessage>,
    orchestrator_receiver: MessageReceiver<OrchestratorMessage>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let transport = Arc::new(InMemoryTransport::new());
        let factory = TransportFactory::in_memory(Arc::clone(&transport));
        factory.ensure_queues().await.expect("queues provisioned");

        let store = Arc::new(InMemoryRunStore::new());
        let orchestrator = Arc::new(
            Orchestrator::from_factory(store.clone(), &factory).expect("orchestrator built"),
        );
        let orchestrator_sender = factory.create_sender(ORCHESTRATOR_ENDPOINT).expect("sender");
        let orchestrator_receiver = factory
            .create_receiver(ORCHESTRATOR_ENDPOINT, receiver_config())
            .expect("receiver");

        Self {
            transport,
            factory,
            store,
            orchestrator,
            orchestrator_sender,
            orchestrator_receiver,
        }
    }

    pub async fn create_run(&self, stages: &[Stage]) -> Run {
        self.store
            .create_run(NewRun::new("https://git.example.org/acme/service.git", "main", configs_for(stages)))
            .await
            .expect("run created")
    }

    pub fn header(&self, run_id: i64) -> MessageHeader {
        MessageHeader::new(TOKEN, format!("trace-{run_id}"), run_id)
    }

    pub async fn publish(&self, header: MessageHeader, payload: OrchestratorMessage) {
        self.orchestrator_sender
            .send(&Message::new(header, payload))
            .await
            .expect("published to orchestrator");
    }

    /// Handle orchestrator messages until the queue is empty
    pub async fn drain_orchestrator(&self) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..50 {
            let batch = self
                .orchestrator_receiver
                .receive_once(self.orchestrator.as_ref())
                .await
                .expect("orchestrator receive");
            if batch.is_empty() {
                break;
            }
            outcomes.extend(batch);
        }
        outcomes
    }

    pub async fn run(&self, run_id: i64) -> Run {
        self.store.find_run(run_id).await.expect("find run").expect("run exists")
    }

    pub async fn jobs(&self, run_id: i64) -> Vec<Job> {
        self.store.find_jobs(run_id).await.expect("find jobs")
    }

    pub async fn job_for(&self, run_id: i64, stage: Stage) -> Job {
        self.jobs(run_id)
            .await
            .into_iter()
            .find(|job| job.stage == stage)
            .unwrap_or_else(|| panic!("no {stage} job for run {run_id}"))
    }

    /// Start commands waiting on a stage queue, oldest first
    pub async fn pending_requests(&self, stage: Stage) -> Vec<Message<JobRequest>> {
        self.transport
            .peek_all(&queue_name(stage))
            .await
            .iter()
            .map(|m| Message::<JobRequest>::decode(&m.properties, &m.body).expect("valid job request"))
            .collect()
    }

    pub async fn sent_to(&self, stage: Stage) -> u64 {
        self.transport.total_sent(&queue_name(stage)).await
    }
}

pub fn queue_name(stage: Stage) -> String {
    format!("{}_queue", stage.as_str())
}

/// What a scripted executor does when asked to run a job
#[derive(Debug, Clone)]
pub enum Script {
    Succeed,
    SucceedWithIssues(Severity),
    Fail(String),
}

pub struct ScriptedExecutor {
    stage: Stage,
    script: Script,
}

impl ScriptedExecutor {
    pub fn new(stage: Stage, script: Script) -> Self {
        Self { stage, script }
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn execute(&self, context: &WorkerContext, _request: &JobRequest) -> anyhow::Result<RunResult> {
        match &self.script {
            Script::Succeed => Ok(RunResult::success_with(
                Vec::new(),
                Some(json!({ "jobId": context.job_id })),
            )),
            Script::SucceedWithIssues(severity) => Ok(RunResult::success_with(
                vec![Issue::new(
                    Utc::now(),
                    self.stage.as_str(),
                    format!("{} finding", self.stage),
                    *severity,
                )],
                None,
            )),
            Script::Fail(message) => Ok(RunResult::Failed(FailureCause::error(message.clone()))),
        }
    }
}

/// One scripted worker per stage, driven batch by batch
pub struct WorkerPool {
    workers: HashMap<Stage, (StageWorker<ScriptedExecutor>, MessageReceiver<JobRequest>)>,
}

impl WorkerPool {
    pub fn new(env: &TestEnv, scripts: &[(Stage, Script)]) -> Self {
        let workers = scripts
            .iter()
            .map(|(stage, script)| {
                let worker = StageWorker::from_factory(ScriptedExecutor::new(*stage, script.clone()), &env.factory)
                    .expect("worker built");
                let receiver = env
                    .factory
                    .create_receiver(Endpoint::worker(*stage), receiver_config())
                    .expect("worker receiver");
                (*stage, (worker, receiver))
            })
            .collect();
        Self { workers }
    }

    /// Every stage that is not explicitly scripted succeeds
    pub fn succeeding_except(env: &TestEnv, overrides: &[(Stage, Script)]) -> Self {
        let scripts: Vec<_> = Stage::ALL
            .into_iter()
            .map(|stage| {
                overrides
                    .iter()
                    .find(|(s, _)| *s == stage)
                    .cloned()
                    .unwrap_or((stage, Script::Succeed))
            })
            .collect();
        Self::new(env, &scripts)
    }

    /// Let workers handle pending requests once; returns the number handled
    pub async fn step(&self) -> usize {
        let mut handled = 0;
        for (worker, receiver) in self.workers.values() {
            handled += receiver.receive_once(worker).await.expect("worker receive").len();
        }
        handled
    }
}

/// Alternate orchestrator and workers until nothing is left to deliver
pub async fn run_to_completion(env: &TestEnv, pool: &WorkerPool) {
    for _ in 0..50 {
        let orchestrated = env.drain_orchestrator().await.len();
        let worked = pool.step().await;
        if orchestrated == 0 && worked == 0 {
            return;
        }
    }
    panic!("pipeline did not settle");
}
