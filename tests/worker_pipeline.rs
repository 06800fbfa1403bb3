//! End-to-end pipelines: orchestrator plus scripted stage workers talking
//! over the in-memory transport.

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use sca_orchestrator::config::OrchestratorConfig;
use sca_orchestrator::messaging::{Endpoint, OrchestratorMessage};
use sca_orchestrator::models::{Severity, Stage};
use sca_orchestrator::orchestration::OrchestrationSystem;
use sca_orchestrator::state_machine::{JobStatus, RunStatus};
use sca_orchestrator::store::RunStore;
use sca_orchestrator::worker::StageWorker;

const FULL_PIPELINE: [Stage; 5] = [Stage::Analyzer, Stage::Advisor, Stage::Scanner, Stage::Evaluator, Stage::Reporter];

#[tokio::test]
async fn test_full_pipeline_finishes_in_stage_order() {
    let env = TestEnv::new().await;
    let pool = WorkerPool::succeeding_except(&env, &[]);
    let run = env.create_run(&FULL_PIPELINE).await;

    env.publish(env.header(run.id), OrchestratorMessage::RunCreated).await;
    run_to_completion(&env, &pool).await;

    let run = env.run(run.id).await;
    assert_eq!(run.status, RunStatus::Finished);

    let jobs = env.jobs(run.id).await;
    assert_eq!(jobs.iter().map(|job| job.stage).collect::<Vec<_>>(), FULL_PIPELINE);
    for pair in jobs.windows(2) {
        assert!(pair[0].finished_at <= pair[1].started_at, "{} overlapped {}", pair[0].stage, pair[1].stage);
    }
    for job in &jobs {
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.result_ref.as_ref().unwrap()["jobId"], job.id);
        assert_eq!(env.sent_to(job.stage).await, 1);
    }
}

#[tokio::test]
async fn test_evaluator_warnings_finish_run_with_issues() {
    let env = TestEnv::new().await;
    let pool = WorkerPool::succeeding_except(&env, &[(Stage::Evaluator, Script::SucceedWithIssues(Severity::Warning))]);
    let run = env.create_run(&FULL_PIPELINE).await;

    env.publish(env.header(run.id), OrchestratorMessage::RunCreated).await;
    run_to_completion(&env, &pool).await;

    let run = env.run(run.id).await;
    assert_eq!(run.status, RunStatus::FinishedWithIssues);
    assert_eq!(run.issues.len(), 1);
    assert_eq!(run.issues[0].source, "evaluator");
    assert_eq!(env.job_for(run.id, Stage::Evaluator).await.status, JobStatus::FinishedWithIssues);
    assert_eq!(env.job_for(run.id, Stage::Reporter).await.status, JobStatus::Finished);
}

#[tokio::test]
async fn test_advisor_failure_stops_downstream_stages() {
    let env = TestEnv::new().await;
    let pool = WorkerPool::succeeding_except(&env, &[(Stage::Advisor, Script::Fail("vulnerability feed unreachable".into()))]);
    let run = env.create_run(&FULL_PIPELINE).await;

    env.publish(env.header(run.id), OrchestratorMessage::RunCreated).await;
    run_to_completion(&env, &pool).await;

    let run = env.run(run.id).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.issues.last().unwrap().message, "ERROR: vulnerability feed unreachable");

    let stages: Vec<_> = env.jobs(run.id).await.iter().map(|job| job.stage).collect();
    assert_eq!(stages, vec![Stage::Analyzer, Stage::Advisor]);
    for stage in [Stage::Scanner, Stage::Evaluator, Stage::Reporter] {
        assert_eq!(env.sent_to(stage).await, 0);
    }
}

#[tokio::test]
async fn test_redelivered_worker_reports_do_not_change_the_outcome() {
    let env = TestEnv::new().await;
    let pool = WorkerPool::succeeding_except(&env, &[]);
    let run = env.create_run(&[Stage::Analyzer, Stage::Scanner]).await;

    env.publish(env.header(run.id), OrchestratorMessage::RunCreated).await;
    env.drain_orchestrator().await;

    // Deliver the analyzer command twice, as a broker would after a lost ack
    let request = env.pending_requests(Stage::Analyzer).await.remove(0);
    env.factory
        .create_sender(Endpoint::worker(Stage::Analyzer))
        .unwrap()
        .send(&request)
        .await
        .unwrap();

    run_to_completion(&env, &pool).await;

    let run = env.run(run.id).await;
    assert_eq!(run.status, RunStatus::Finished);
    assert_eq!(env.jobs(run.id).await.len(), 2);
    assert_eq!(env.sent_to(Stage::Scanner).await, 1);
}

#[tokio::test]
async fn test_bootstrapped_system_runs_pipeline_with_receive_loops() {
    let env = TestEnv::new().await;
    let mut config = OrchestratorConfig::default();
    config.processing.poll_interval_ms = 5;
    config.reconciliation.enabled = false;

    let mut system = OrchestrationSystem::bootstrap_with(&config, env.store.clone(), env.factory.clone())
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker_tasks = Vec::new();
    for stage in [Stage::Analyzer, Stage::Scanner] {
        let worker = Arc::new(StageWorker::from_factory(ScriptedExecutor::new(stage, Script::Succeed), &env.factory).unwrap());
        let receiver = env.factory.create_receiver(Endpoint::worker(stage), receiver_config()).unwrap();
        let shutdown = shutdown_rx.clone();
        worker_tasks.push(tokio::spawn(async move { receiver.receive(worker, shutdown).await }));
    }

    let run = env.create_run(&[Stage::Analyzer, Stage::Scanner]).await;
    env.publish(env.header(run.id), OrchestratorMessage::RunCreated).await;

    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current = env.store.find_run(run.id).await.unwrap().unwrap();
            if current.status.is_terminal() {
                return current;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("run reached a terminal state");
    assert_eq!(finished.status, RunStatus::Finished);

    shutdown_tx.send(true).unwrap();
    for task in worker_tasks {
        task.await.unwrap().unwrap();
    }
    system.stop().await.unwrap();
    assert!(!system.is_running());
}
