//! # Run Decision Function
//!
//! `decide` maps the persisted state of one run plus one event to the
//! transition the orchestrator must persist. It performs no I/O and reads no
//! clock; `now` is passed in. Everything the orchestrator does to a run goes
//! through here, so redelivered messages, lost start notices and
//! cancellations all resolve against persisted state only.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;

use super::events::OrchestratorEvent;
use super::states::{JobStatus, RunStatus};
use crate::messaging::payloads::{FailureCause, WorkerOutcome, WorkerResult};
use crate::models::{Issue, Job, JobStatusUpdate, Run, RunUpdate, Severity, Stage};

/// Result of evaluating one event against one run
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Apply(Transition),
    Ignore(IgnoreReason),
}

impl Decision {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignore(_))
    }

    pub fn transition(&self) -> Option<&Transition> {
        match self {
            Self::Apply(transition) => Some(transition),
            Self::Ignore(_) => None,
        }
    }
}

/// Status change for an existing job
#[derive(Debug, Clone, PartialEq)]
pub struct JobTransition {
    pub job_id: i64,
    pub stage: Stage,
    pub from: JobStatus,
    pub update: JobStatusUpdate,
}

/// A stage that must get a new job and a start command
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledStage {
    pub stage: Stage,
    pub configuration: Value,
}

/// Everything to persist, and at most one command to send afterwards
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    pub job_updates: Vec<JobTransition>,
    pub schedule: Option<ScheduledStage>,
    pub run_update: Option<RunUpdate>,
    /// Existing job whose start command is sent again
    pub redispatch: Option<i64>,
}

impl Transition {
    /// Whether the transition produces an outbound start command
    pub fn emits_command(&self) -> bool {
        self.schedule.is_some() || self.redispatch.is_some()
    }

    /// Resulting run status, when the transition changes it
    pub fn run_status(&self) -> Option<RunStatus> {
        self.run_update.as_ref().and_then(|update| update.status)
    }

    fn update_run(&mut self, update: RunUpdate) {
        match self.run_update.as_mut() {
            Some(existing) => {
                if update.status.is_some() {
                    existing.status = update.status;
                }
                if update.finished_at.is_some() {
                    existing.finished_at = update.finished_at;
                }
                existing.append_issues.extend(update.append_issues);
            }
            None => self.run_update = Some(update),
        }
    }
}

/// Why an event changed nothing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownRun { run_id: i64 },
    DuplicateRunCreated { status: RunStatus },
    RunAlreadyTerminal { status: RunStatus },
    UnknownJob { job_id: i64 },
    JobRunMismatch { job_id: i64, owner_run_id: i64 },
    StageMismatch { job_id: i64, expected: Stage, reported: Stage },
    JobAlreadyTerminal { job_id: i64, status: JobStatus },
    DuplicateStart { job_id: i64 },
    WorkerIgnored { job_id: i64, reason: String },
    NothingToReconcile,
}

impl IgnoreReason {
    /// Redeliveries and races that at-least-once delivery makes routine.
    /// Everything else points at a broken producer and is logged as a warning.
    pub fn is_expected_duplicate(&self) -> bool {
        matches!(
            self,
            Self::DuplicateRunCreated { .. }
                | Self::RunAlreadyTerminal { .. }
                | Self::JobAlreadyTerminal { .. }
                | Self::DuplicateStart { .. }
                | Self::WorkerIgnored { .. }
                | Self::NothingToReconcile
        )
    }
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownRun { run_id } => write!(f, "run {run_id} does not exist"),
            Self::DuplicateRunCreated { status } => {
                write!(f, "run already started (status {status})")
            }
            Self::RunAlreadyTerminal { status } => write!(f, "run is already {status}"),
            Self::UnknownJob { job_id } => write!(f, "job {job_id} does not exist"),
            Self::JobRunMismatch { job_id, owner_run_id } => {
                write!(f, "job {job_id} belongs to run {owner_run_id}")
            }
            Self::StageMismatch {
                job_id,
                expected,
                reported,
            } => write!(f, "job {job_id} is a {expected} job, message reports {reported}"),
            Self::JobAlreadyTerminal { job_id, status } => {
                write!(f, "job {job_id} is already {status}")
            }
            Self::DuplicateStart { job_id } => write!(f, "job {job_id} is already running"),
            Self::WorkerIgnored { job_id, reason } => {
                write!(f, "worker ignored job {job_id}: {reason}")
            }
            Self::NothingToReconcile => write!(f, "run needs no repair"),
        }
    }
}

/// Evaluate `event` against the persisted state of `run` and its `jobs`
pub fn decide(run: &Run, jobs: &[Job], event: &OrchestratorEvent, now: DateTime<Utc>) -> Decision {
    match event {
        OrchestratorEvent::RunCreated => on_run_created(run, jobs, now),
        OrchestratorEvent::JobStarted { stage, job_id } => on_job_started(run, jobs, *stage, *job_id, now),
        OrchestratorEvent::WorkerResult(result) => on_worker_result(run, jobs, result, now),
        OrchestratorEvent::CancelRun { reason } => on_cancel(run, jobs, reason.as_deref(), now),
        OrchestratorEvent::Reconcile { stale_before } => on_reconcile(run, jobs, *stale_before, now),
    }
}

fn on_run_created(run: &Run, jobs: &[Job], now: DateTime<Utc>) -> Decision {
    if run.status.is_terminal() {
        return Decision::Ignore(IgnoreReason::RunAlreadyTerminal { status: run.status });
    }
    if run.status != RunStatus::Created || !jobs.is_empty() {
        return Decision::Ignore(IgnoreReason::DuplicateRunCreated { status: run.status });
    }
    Decision::Apply(advance(run, jobs, Transition::default(), now))
}

fn on_job_started(run: &Run, jobs: &[Job], stage: Stage, job_id: i64, now: DateTime<Utc>) -> Decision {
    let job = match find_job(run, jobs, job_id, stage) {
        Ok(job) => job,
        Err(reason) => return Decision::Ignore(reason),
    };
    if run.status.is_terminal() {
        return Decision::Ignore(IgnoreReason::RunAlreadyTerminal { status: run.status });
    }
    if job.status.is_terminal() {
        return Decision::Ignore(IgnoreReason::JobAlreadyTerminal {
            job_id,
            status: job.status,
        });
    }
    if !job.status.can_transition_to(JobStatus::Running) {
        return Decision::Ignore(IgnoreReason::DuplicateStart { job_id });
    }

    Decision::Apply(Transition {
        job_updates: vec![JobTransition {
            job_id,
            stage,
            from: job.status,
            update: JobStatusUpdate::started(now),
        }],
        ..Default::default()
    })
}

fn on_worker_result(run: &Run, jobs: &[Job], result: &WorkerResult, now: DateTime<Utc>) -> Decision {
    let job = match find_job(run, jobs, result.job_id, result.stage) {
        Ok(job) => job,
        Err(reason) => return Decision::Ignore(reason),
    };
    if run.status.is_terminal() {
        return Decision::Ignore(IgnoreReason::RunAlreadyTerminal { status: run.status });
    }
    if job.status.is_terminal() {
        return Decision::Ignore(IgnoreReason::JobAlreadyTerminal {
            job_id: job.id,
            status: job.status,
        });
    }

    match &result.outcome {
        WorkerOutcome::Ignored { reason } => Decision::Ignore(IgnoreReason::WorkerIgnored {
            job_id: job.id,
            reason: reason.clone(),
        }),
        WorkerOutcome::Success { issues, result_ref } => {
            let status = if issues.iter().any(Issue::is_significant) {
                JobStatus::FinishedWithIssues
            } else {
                JobStatus::Finished
            };
            let update = JobStatusUpdate::finished(status, now).with_result_ref(result_ref.clone());

            let mut transition = Transition::default();
            if !issues.is_empty() {
                transition.update_run(RunUpdate::default().with_issues(issues.iter().cloned()));
            }
            let after = with_update(jobs, job.id, &update);
            transition.job_updates.push(JobTransition {
                job_id: job.id,
                stage: job.stage,
                from: job.status,
                update,
            });
            Decision::Apply(advance(run, &after, transition, now))
        }
        WorkerOutcome::Failure { cause } => {
            let mut transition = Transition::default();
            transition.job_updates.push(JobTransition {
                job_id: job.id,
                stage: job.stage,
                from: job.status,
                update: failed_with(cause, now),
            });
            transition.update_run(
                RunUpdate::finished(RunStatus::Failed, now).with_issues([failure_issue(job.stage, cause, now)]),
            );
            Decision::Apply(transition)
        }
    }
}

fn on_cancel(run: &Run, jobs: &[Job], reason: Option<&str>, now: DateTime<Utc>) -> Decision {
    if run.status.is_terminal() {
        return Decision::Ignore(IgnoreReason::RunAlreadyTerminal { status: run.status });
    }

    let cause = FailureCause::cancelled(reason);
    let job_updates = jobs
        .iter()
        .filter(|job| job.status.is_active())
        .map(|job| JobTransition {
            job_id: job.id,
            stage: job.stage,
            from: job.status,
            update: failed_with(&cause, now),
        })
        .collect();

    Decision::Apply(Transition {
        job_updates,
        run_update: Some(
            RunUpdate::finished(RunStatus::Failed, now).with_issues([Issue::orchestrator(now, cause.message)]),
        ),
        ..Default::default()
    })
}

fn on_reconcile(run: &Run, jobs: &[Job], stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Decision {
    if run.status.is_terminal() {
        return Decision::Ignore(IgnoreReason::RunAlreadyTerminal { status: run.status });
    }

    match jobs.iter().find(|job| job.status.is_active()) {
        Some(job) if job.is_undispatched() && job.created_at <= stale_before => {
            let mut transition = Transition {
                redispatch: Some(job.id),
                ..Default::default()
            };
            if job.status == JobStatus::Created {
                transition.job_updates.push(JobTransition {
                    job_id: job.id,
                    stage: job.stage,
                    from: job.status,
                    update: JobStatusUpdate::to(JobStatus::Scheduled),
                });
            }
            Decision::Apply(transition)
        }
        Some(_) => Decision::Ignore(IgnoreReason::NothingToReconcile),
        None => {
            if run.status == RunStatus::Created && run.created_at > stale_before {
                return Decision::Ignore(IgnoreReason::NothingToReconcile);
            }
            Decision::Apply(advance(run, jobs, Transition::default(), now))
        }
    }
}

/// Schedule the next stage, or finalize the run when nothing is left.
/// `jobs` must already reflect the job updates in `transition`.
fn advance(run: &Run, jobs: &[Job], mut transition: Transition, now: DateTime<Utc>) -> Transition {
    if jobs.iter().any(|job| job.status == JobStatus::Failed) {
        transition.update_run(RunUpdate::finished(RunStatus::Failed, now));
        return transition;
    }

    match next_stage(run, jobs) {
        Some(stage) => {
            transition.schedule = Some(ScheduledStage {
                stage,
                configuration: run.job_configs.get(stage).cloned().unwrap_or(Value::Null),
            });
            if run.status == RunStatus::Created {
                transition.update_run(RunUpdate::status(RunStatus::Active));
            }
        }
        None => {
            let status = if jobs.iter().any(|job| job.status == JobStatus::FinishedWithIssues) {
                RunStatus::FinishedWithIssues
            } else {
                RunStatus::Finished
            };
            transition.update_run(RunUpdate::finished(status, now));
        }
    }
    transition
}

/// First enabled stage, in pipeline order, that has no job yet
pub fn next_stage(run: &Run, jobs: &[Job]) -> Option<Stage> {
    run.job_configs
        .enabled_stages()
        .into_iter()
        .find(|stage| jobs.iter().all(|job| job.stage != *stage))
}

fn find_job<'a>(run: &Run, jobs: &'a [Job], job_id: i64, stage: Stage) -> Result<&'a Job, IgnoreReason> {
    let job = jobs
        .iter()
        .find(|job| job.id == job_id)
        .ok_or(IgnoreReason::UnknownJob { job_id })?;
    if job.run_id != run.id {
        return Err(IgnoreReason::JobRunMismatch {
            job_id,
            owner_run_id: job.run_id,
        });
    }
    if job.stage != stage {
        return Err(IgnoreReason::StageMismatch {
            job_id,
            expected: job.stage,
            reported: stage,
        });
    }
    Ok(job)
}

fn with_update(jobs: &[Job], job_id: i64, update: &JobStatusUpdate) -> Vec<Job> {
    jobs.iter()
        .cloned()
        .map(|mut job| {
            if job.id == job_id {
                update.apply_to(&mut job);
            }
            job
        })
        .collect()
}

/// `FAILED` update that keeps the cause on the job as its result reference
fn failed_with(cause: &FailureCause, now: DateTime<Utc>) -> JobStatusUpdate {
    JobStatusUpdate::finished(JobStatus::Failed, now).with_result_ref(serde_json::to_value(cause).ok())
}

fn failure_issue(stage: Stage, cause: &FailureCause, now: DateTime<Utc>) -> Issue {
    Issue::new(now, stage.as_str(), cause.to_string(), Severity::Error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobConfigurations;
    use chrono::Duration;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn run_with(stages: &[Stage], status: RunStatus) -> Run {
        let job_configs = stages.iter().fold(JobConfigurations::default(), |configs, stage| {
            configs.with_stage(*stage, json!({"stage": stage.as_str()}))
        });
        Run {
            id: 7,
            repository_url: "https://example.org/repo.git".to_string(),
            revision: "main".to_string(),
            created_at: Utc::now() - Duration::minutes(30),
            finished_at: None,
            status,
            job_configs,
            issues: Vec::new(),
            labels: BTreeMap::new(),
            trace_context: None,
        }
    }

    fn job(id: i64, stage: Stage, status: JobStatus) -> Job {
        Job {
            id,
            run_id: 7,
            stage,
            status,
            created_at: Utc::now() - Duration::minutes(20),
            started_at: None,
            finished_at: None,
            configuration: json!({}),
            result_ref: None,
            dispatched_at: None,
        }
    }

    fn apply(decision: Decision) -> Transition {
        match decision {
            Decision::Apply(transition) => transition,
            Decision::Ignore(reason) => panic!("expected a transition, got ignore: {reason}"),
        }
    }

    fn ignored(decision: Decision) -> IgnoreReason {
        match decision {
            Decision::Ignore(reason) => reason,
            Decision::Apply(transition) => panic!("expected ignore, got {transition:?}"),
        }
    }

    #[test]
    fn test_run_created_schedules_first_configured_stage() {
        let run = run_with(&[Stage::Scanner, Stage::Analyzer], RunStatus::Created);
        let transition = apply(decide(&run, &[], &OrchestratorEvent::RunCreated, Utc::now()));

        let scheduled = transition.schedule.unwrap();
        assert_eq!(scheduled.stage, Stage::Analyzer);
        assert_eq!(scheduled.configuration, json!({"stage": "analyzer"}));
        assert_eq!(transition.run_update.unwrap().status, Some(RunStatus::Active));
    }

    #[test]
    fn test_run_created_without_stages_finishes_run() {
        let run = run_with(&[], RunStatus::Created);
        let now = Utc::now();
        let transition = apply(decide(&run, &[], &OrchestratorEvent::RunCreated, now));

        assert!(transition.schedule.is_none());
        assert_eq!(transition.run_update, Some(RunUpdate::finished(RunStatus::Finished, now)));
    }

    #[test]
    fn test_duplicate_run_created_is_ignored() {
        let run = run_with(&[Stage::Analyzer], RunStatus::Active);
        let jobs = [job(1, Stage::Analyzer, JobStatus::Scheduled)];
        let reason = ignored(decide(&run, &jobs, &OrchestratorEvent::RunCreated, Utc::now()));
        assert!(matches!(reason, IgnoreReason::DuplicateRunCreated { .. }));
        assert!(reason.is_expected_duplicate());
    }

    #[test]
    fn test_success_schedules_next_stage() {
        let run = run_with(&[Stage::Analyzer, Stage::Scanner], RunStatus::Active);
        let jobs = [job(1, Stage::Analyzer, JobStatus::Running)];
        let event = OrchestratorEvent::WorkerResult(WorkerResult::success(Stage::Analyzer, 1, vec![]));
        let transition = apply(decide(&run, &jobs, &event, Utc::now()));

        assert_eq!(transition.job_updates.len(), 1);
        assert_eq!(transition.job_updates[0].update.status, JobStatus::Finished);
        assert_eq!(transition.schedule.unwrap().stage, Stage::Scanner);
        assert!(transition.run_update.is_none());
    }

    #[test]
    fn test_last_success_with_issues_finishes_run_with_issues() {
        let run = run_with(&[Stage::Analyzer], RunStatus::Active);
        let jobs = [job(1, Stage::Analyzer, JobStatus::Running)];
        let now = Utc::now();
        let issue = Issue::new(now, "analyzer", "unresolved dependency", Severity::Warning);
        let event = OrchestratorEvent::WorkerResult(WorkerResult::success(Stage::Analyzer, 1, vec![issue.clone()]));
        let transition = apply(decide(&run, &jobs, &event, now));

        assert_eq!(transition.job_updates[0].update.status, JobStatus::FinishedWithIssues);
        let run_update = transition.run_update.unwrap();
        assert_eq!(run_update.status, Some(RunStatus::FinishedWithIssues));
        assert_eq!(run_update.finished_at, Some(now));
        assert_eq!(run_update.append_issues, vec![issue]);
    }

    #[test]
    fn test_hints_do_not_change_job_status() {
        let run = run_with(&[Stage::Analyzer], RunStatus::Active);
        let jobs = [job(1, Stage::Analyzer, JobStatus::Running)];
        let now = Utc::now();
        let hint = Issue::new(now, "analyzer", "consider pinning", Severity::Hint);
        let event = OrchestratorEvent::WorkerResult(WorkerResult::success(Stage::Analyzer, 1, vec![hint]));
        let transition = apply(decide(&run, &jobs, &event, now));

        assert_eq!(transition.job_updates[0].update.status, JobStatus::Finished);
        let run_update = transition.run_update.unwrap();
        assert_eq!(run_update.status, Some(RunStatus::Finished));
        assert_eq!(run_update.append_issues.len(), 1);
    }

    #[test]
    fn test_earlier_issues_carry_into_final_status() {
        let run = run_with(&[Stage::Analyzer, Stage::Scanner], RunStatus::Active);
        let jobs = [
            job(1, Stage::Analyzer, JobStatus::FinishedWithIssues),
            job(2, Stage::Scanner, JobStatus::Running),
        ];
        let event = OrchestratorEvent::WorkerResult(WorkerResult::success(Stage::Scanner, 2, vec![]));
        let transition = apply(decide(&run, &jobs, &event, Utc::now()));
        assert_eq!(transition.run_status(), Some(RunStatus::FinishedWithIssues));
    }

    #[test]
    fn test_failure_fails_run_without_scheduling() {
        let run = run_with(&[Stage::Analyzer, Stage::Scanner, Stage::Evaluator], RunStatus::Active);
        let jobs = [
            job(1, Stage::Analyzer, JobStatus::Finished),
            job(2, Stage::Scanner, JobStatus::Running),
        ];
        let event = OrchestratorEvent::WorkerResult(WorkerResult::failure(
            Stage::Scanner,
            2,
            FailureCause::error("scanner crashed"),
        ));
        let transition = apply(decide(&run, &jobs, &event, Utc::now()));

        assert!(!transition.emits_command());
        assert_eq!(transition.job_updates[0].update.status, JobStatus::Failed);
        assert_eq!(
            transition.job_updates[0].update.result_ref,
            Some(json!({"kind": "ERROR", "message": "scanner crashed"}))
        );
        let run_update = transition.run_update.unwrap();
        assert_eq!(run_update.status, Some(RunStatus::Failed));
        assert_eq!(run_update.append_issues[0].source, "scanner");
        assert_eq!(run_update.append_issues[0].message, "ERROR: scanner crashed");
        assert_eq!(run_update.append_issues[0].severity, Severity::Error);
    }

    #[test]
    fn test_result_for_terminal_job_is_ignored() {
        let run = run_with(&[Stage::Analyzer, Stage::Scanner], RunStatus::Active);
        let jobs = [
            job(1, Stage::Analyzer, JobStatus::Finished),
            job(2, Stage::Scanner, JobStatus::Scheduled),
        ];
        let event = OrchestratorEvent::WorkerResult(WorkerResult::success(Stage::Analyzer, 1, vec![]));
        let reason = ignored(decide(&run, &jobs, &event, Utc::now()));
        assert_eq!(
            reason,
            IgnoreReason::JobAlreadyTerminal {
                job_id: 1,
                status: JobStatus::Finished
            }
        );
    }

    #[test]
    fn test_result_for_scheduled_job_is_accepted() {
        let run = run_with(&[Stage::Analyzer], RunStatus::Active);
        let jobs = [job(1, Stage::Analyzer, JobStatus::Scheduled)];
        let event = OrchestratorEvent::WorkerResult(WorkerResult::success(Stage::Analyzer, 1, vec![]));
        let transition = apply(decide(&run, &jobs, &event, Utc::now()));
        assert_eq!(transition.job_updates[0].from, JobStatus::Scheduled);
        assert_eq!(transition.run_status(), Some(RunStatus::Finished));
    }

    #[test]
    fn test_reference_errors_are_ignored() {
        let run = run_with(&[Stage::Analyzer], RunStatus::Active);
        let mut foreign = job(9, Stage::Analyzer, JobStatus::Running);
        foreign.run_id = 8;
        let jobs = [job(1, Stage::Analyzer, JobStatus::Running), foreign];

        let unknown = OrchestratorEvent::WorkerResult(WorkerResult::success(Stage::Analyzer, 42, vec![]));
        assert_eq!(
            ignored(decide(&run, &jobs, &unknown, Utc::now())),
            IgnoreReason::UnknownJob { job_id: 42 }
        );

        let mismatch = OrchestratorEvent::WorkerResult(WorkerResult::success(Stage::Scanner, 1, vec![]));
        let reason = ignored(decide(&run, &jobs, &mismatch, Utc::now()));
        assert!(matches!(reason, IgnoreReason::StageMismatch { .. }));
        assert!(!reason.is_expected_duplicate());

        let other_run = OrchestratorEvent::WorkerResult(WorkerResult::success(Stage::Analyzer, 9, vec![]));
        assert_eq!(
            ignored(decide(&run, &jobs, &other_run, Utc::now())),
            IgnoreReason::JobRunMismatch {
                job_id: 9,
                owner_run_id: 8
            }
        );
    }

    #[test]
    fn test_worker_ignored_changes_nothing() {
        let run = run_with(&[Stage::Analyzer], RunStatus::Active);
        let jobs = [job(1, Stage::Analyzer, JobStatus::Running)];
        let event = OrchestratorEvent::WorkerResult(WorkerResult::ignored(Stage::Analyzer, 1, "already done"));
        assert!(matches!(
            ignored(decide(&run, &jobs, &event, Utc::now())),
            IgnoreReason::WorkerIgnored { job_id: 1, .. }
        ));
    }

    #[test]
    fn test_job_started_moves_to_running_once() {
        let run = run_with(&[Stage::Analyzer], RunStatus::Active);
        let now = Utc::now();
        let event = OrchestratorEvent::JobStarted {
            stage: Stage::Analyzer,
            job_id: 1,
        };

        let transition = apply(decide(&run, &[job(1, Stage::Analyzer, JobStatus::Scheduled)], &event, now));
        assert_eq!(transition.job_updates[0].update, JobStatusUpdate::started(now));
        assert!(!transition.emits_command());

        let reason = ignored(decide(&run, &[job(1, Stage::Analyzer, JobStatus::Running)], &event, now));
        assert_eq!(reason, IgnoreReason::DuplicateStart { job_id: 1 });
    }

    #[test]
    fn test_cancel_fails_active_job_and_run() {
        let run = run_with(&[Stage::Analyzer, Stage::Scanner, Stage::Evaluator], RunStatus::Active);
        let jobs = [
            job(1, Stage::Analyzer, JobStatus::Finished),
            job(2, Stage::Scanner, JobStatus::Running),
        ];
        let event = OrchestratorEvent::CancelRun {
            reason: Some("user request".to_string()),
        };
        let transition = apply(decide(&run, &jobs, &event, Utc::now()));

        assert_eq!(transition.job_updates.len(), 1);
        assert_eq!(transition.job_updates[0].job_id, 2);
        assert_eq!(transition.job_updates[0].update.status, JobStatus::Failed);
        assert_eq!(
            transition.job_updates[0].update.result_ref,
            Some(json!({"kind": "CANCELLED", "message": "Run cancelled: user request"}))
        );
        assert!(!transition.emits_command());
        let run_update = transition.run_update.unwrap();
        assert_eq!(run_update.status, Some(RunStatus::Failed));
        assert_eq!(run_update.append_issues[0].message, "Run cancelled: user request");
    }

    #[test]
    fn test_cancel_terminal_run_is_ignored() {
        let run = run_with(&[Stage::Analyzer], RunStatus::Finished);
        let event = OrchestratorEvent::CancelRun { reason: None };
        assert!(decide(&run, &[], &event, Utc::now()).is_ignored());
    }

    #[test]
    fn test_reconcile_redispatches_stale_created_job() {
        let run = run_with(&[Stage::Analyzer], RunStatus::Active);
        let jobs = [job(1, Stage::Analyzer, JobStatus::Created)];
        let event = OrchestratorEvent::Reconcile {
            stale_before: Utc::now() - Duration::minutes(5),
        };
        let transition = apply(decide(&run, &jobs, &event, Utc::now()));

        assert_eq!(transition.redispatch, Some(1));
        assert_eq!(transition.job_updates[0].update.status, JobStatus::Scheduled);
        assert!(transition.run_update.is_none());
    }

    #[test]
    fn test_reconcile_skips_job_whose_command_was_sent() {
        let run = run_with(&[Stage::Analyzer], RunStatus::Active);
        let mut sent = job(1, Stage::Analyzer, JobStatus::Scheduled);
        sent.dispatched_at = Some(sent.created_at);
        let event = OrchestratorEvent::Reconcile { stale_before: Utc::now() };

        assert_eq!(
            ignored(decide(&run, &[sent.clone()], &event, Utc::now())),
            IgnoreReason::NothingToReconcile
        );

        sent.dispatched_at = None;
        assert_eq!(apply(decide(&run, &[sent], &event, Utc::now())).redispatch, Some(1));
    }

    #[test]
    fn test_reconcile_leaves_fresh_and_running_jobs_alone() {
        let run = run_with(&[Stage::Analyzer], RunStatus::Active);
        let old_cutoff = OrchestratorEvent::Reconcile {
            stale_before: Utc::now() - Duration::hours(1),
        };
        let scheduled = [job(1, Stage::Analyzer, JobStatus::Scheduled)];
        assert_eq!(
            ignored(decide(&run, &scheduled, &old_cutoff, Utc::now())),
            IgnoreReason::NothingToReconcile
        );

        let recent_cutoff = OrchestratorEvent::Reconcile { stale_before: Utc::now() };
        let running = [job(1, Stage::Analyzer, JobStatus::Running)];
        assert!(decide(&run, &running, &recent_cutoff, Utc::now()).is_ignored());
    }

    #[test]
    fn test_reconcile_advances_run_without_active_job() {
        let run = run_with(&[Stage::Analyzer, Stage::Scanner], RunStatus::Active);
        let jobs = [job(1, Stage::Analyzer, JobStatus::Finished)];
        let event = OrchestratorEvent::Reconcile { stale_before: Utc::now() };
        let transition = apply(decide(&run, &jobs, &event, Utc::now()));
        assert_eq!(transition.schedule.unwrap().stage, Stage::Scanner);

        let failed = [job(1, Stage::Analyzer, JobStatus::Failed)];
        let transition = apply(decide(&run, &failed, &event, Utc::now()));
        assert!(transition.schedule.is_none());
        assert_eq!(transition.run_status(), Some(RunStatus::Failed));
    }

    #[test]
    fn test_reconcile_starts_stale_created_run() {
        let run = run_with(&[Stage::Advisor], RunStatus::Created);
        let stale = OrchestratorEvent::Reconcile { stale_before: Utc::now() };
        let transition = apply(decide(&run, &[], &stale, Utc::now()));
        assert_eq!(transition.schedule.unwrap().stage, Stage::Advisor);

        let fresh = OrchestratorEvent::Reconcile {
            stale_before: run.created_at - Duration::minutes(1),
        };
        assert!(decide(&run, &[], &fresh, Utc::now()).is_ignored());
    }
}
