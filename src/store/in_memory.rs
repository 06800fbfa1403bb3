//! # In-Memory Run Store
//!
//! Process-local [`RunStore`] for tests and single-process deployments.
//! A per-run async mutex stands in for the row lock; writes are staged in the
//! transaction and only become visible on commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::errors::{StoreError, StoreResult};
use super::traits::{RunStore, RunTransaction};
use crate::models::{Job, JobStatusUpdate, NewJob, NewRun, Run, RunUpdate};
use crate::state_machine::{JobStatus, RunStatus};

#[derive(Debug, Default)]
struct StoreState {
    runs: RwLock<BTreeMap<i64, Run>>,
    jobs: RwLock<BTreeMap<i64, Job>>,
    run_locks: DashMap<i64, Arc<Mutex<()>>>,
    next_run_id: AtomicI64,
    next_job_id: AtomicI64,
    fail_next_commit: AtomicBool,
}

impl StoreState {
    fn lock_for(&self, run_id: i64) -> Arc<Mutex<()>> {
        self.run_locks.entry(run_id).or_default().value().clone()
    }
}

/// In-memory run store; clones share state
#[derive(Debug, Clone, Default)]
pub struct InMemoryRunStore {
    state: Arc<StoreState>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail and discard its writes
    pub fn fail_next_commit(&self) {
        self.state.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn run_count(&self) -> usize {
        self.state.runs.read().len()
    }

    pub fn job_count(&self) -> usize {
        self.state.jobs.read().len()
    }

    fn run_jobs(&self, run_id: i64) -> Vec<Job> {
        self.state
            .jobs
            .read()
            .values()
            .filter(|job| job.run_id == run_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn begin(&self, run_id: i64) -> StoreResult<Box<dyn RunTransaction>> {
        let guard = self.state.lock_for(run_id).lock_owned().await;

        let run = self.state.runs.read().get(&run_id).cloned();
        let jobs = self
            .run_jobs(run_id)
            .into_iter()
            .map(|job| (job.id, job))
            .collect();

        Ok(Box::new(InMemoryTransaction {
            state: Arc::clone(&self.state),
            run_id,
            run,
            jobs,
            dirty: false,
            _guard: guard,
        }))
    }

    async fn create_run(&self, new_run: NewRun) -> StoreResult<Run> {
        let id = self.state.next_run_id.fetch_add(1, Ordering::SeqCst) + 1;
        let run = Run {
            id,
            repository_url: new_run.repository_url,
            revision: new_run.revision,
            created_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Created,
            job_configs: new_run.job_configs,
            issues: Vec::new(),
            labels: new_run.labels,
            trace_context: None,
        };
        self.state.runs.write().insert(id, run.clone());
        debug!(run_id = id, "Run created in memory");
        Ok(run)
    }

    async fn find_run(&self, run_id: i64) -> StoreResult<Option<Run>> {
        Ok(self.state.runs.read().get(&run_id).cloned())
    }

    async fn find_jobs(&self, run_id: i64) -> StoreResult<Vec<Job>> {
        Ok(self.run_jobs(run_id))
    }

    async fn find_reconcilable_runs(&self, stale_before: DateTime<Utc>, limit: usize) -> StoreResult<Vec<i64>> {
        let runs = self.state.runs.read();
        let jobs = self.state.jobs.read();

        let reconcilable = runs
            .values()
            .filter(|run| match run.status {
                RunStatus::Created => run.created_at <= stale_before,
                RunStatus::Active => {
                    let mut active = jobs
                        .values()
                        .filter(|job| job.run_id == run.id && job.status.is_active())
                        .peekable();
                    match active.peek() {
                        None => true,
                        Some(_) => active.any(|job| job.is_undispatched() && job.created_at <= stale_before),
                    }
                }
                _ => false,
            })
            .map(|run| run.id)
            .take(limit)
            .collect();
        Ok(reconcilable)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(true)
    }

    fn backend_name(&self) -> &'static str {
        "in_memory"
    }
}

struct InMemoryTransaction {
    state: Arc<StoreState>,
    run_id: i64,
    run: Option<Run>,
    jobs: BTreeMap<i64, Job>,
    dirty: bool,
    _guard: OwnedMutexGuard<()>,
}

impl InMemoryTransaction {
    fn run_mut(&mut self) -> StoreResult<&mut Run> {
        let run_id = self.run_id;
        self.run.as_mut().ok_or(StoreError::RunNotFound { run_id })
    }
}

#[async_trait]
impl RunTransaction for InMemoryTransaction {
    fn run_id(&self) -> i64 {
        self.run_id
    }

    async fn get_run(&mut self) -> StoreResult<Option<Run>> {
        Ok(self.run.clone())
    }

    async fn list_jobs(&mut self) -> StoreResult<Vec<Job>> {
        Ok(self.jobs.values().cloned().collect())
    }

    async fn get_job(&mut self, job_id: i64) -> StoreResult<Option<Job>> {
        if let Some(job) = self.jobs.get(&job_id) {
            return Ok(Some(job.clone()));
        }
        Ok(self.state.jobs.read().get(&job_id).cloned())
    }

    async fn create_job(&mut self, new_job: NewJob) -> StoreResult<Job> {
        self.run_mut()?;
        if new_job.run_id != self.run_id {
            return Err(StoreError::database(
                "create_job",
                format!("job for run {} created in transaction of run {}", new_job.run_id, self.run_id),
            ));
        }
        if self
            .jobs
            .values()
            .any(|job| job.stage == new_job.stage && job.status.is_active())
        {
            return Err(StoreError::database(
                "create_job",
                format!("run {} already has an active {} job", self.run_id, new_job.stage),
            ));
        }

        let id = self.state.next_job_id.fetch_add(1, Ordering::SeqCst) + 1;
        let job = Job {
            id,
            run_id: new_job.run_id,
            stage: new_job.stage,
            status: JobStatus::Created,
            created_at: new_job.created_at,
            started_at: None,
            finished_at: None,
            configuration: new_job.configuration,
            result_ref: None,
            dispatched_at: None,
        };
        self.jobs.insert(id, job.clone());
        self.dirty = true;
        Ok(job)
    }

    async fn update_job_status(&mut self, job_id: i64, update: &JobStatusUpdate) -> StoreResult<Job> {
        let job = self.jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound { job_id })?;
        if !job.status.can_transition_to(update.status) {
            return Err(StoreError::invalid_transition("job", job.status, update.status));
        }
        update.apply_to(job);
        let updated = job.clone();
        self.dirty = true;
        Ok(updated)
    }

    async fn mark_dispatched(&mut self, job_id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let job = self.jobs.get_mut(&job_id).ok_or(StoreError::JobNotFound { job_id })?;
        job.dispatched_at = Some(at);
        self.dirty = true;
        Ok(())
    }

    async fn update_run(&mut self, update: &RunUpdate) -> StoreResult<Run> {
        let run = self.run_mut()?;
        if let Some(status) = update.status {
            if !run.status.can_transition_to(status) {
                return Err(StoreError::invalid_transition("run", run.status, status));
            }
        }
        update.apply_to(run);
        let updated = run.clone();
        self.dirty = true;
        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if self.state.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::commit(self.run_id, "simulated commit failure"));
        }
        if !self.dirty {
            return Ok(());
        }

        let this = *self;
        if let Some(run) = this.run {
            this.state.runs.write().insert(run.id, run);
        }
        this.state.jobs.write().extend(this.jobs);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
