use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::errors::StoreResult;
use crate::models::{Job, JobStatusUpdate, NewJob, NewRun, Run, RunUpdate};

/// Persistence for runs and their jobs
///
/// All orchestrator mutations go through a [`RunTransaction`] obtained from
/// [`RunStore::begin`]. A transaction holds the run's lock until it is
/// committed, rolled back or dropped, which serializes every handler working
/// on the same run.
#[async_trait]
pub trait RunStore: Send + Sync + 'static {
    /// Open a transaction scoped to one run and lock it
    ///
    /// Succeeds for unknown run ids; [`RunTransaction::get_run`] then returns `None`.
    async fn begin(&self, run_id: i64) -> StoreResult<Box<dyn RunTransaction>>;

    /// Persist a new run in `CREATED` status
    async fn create_run(&self, new_run: NewRun) -> StoreResult<Run>;

    /// Read a run outside any transaction
    async fn find_run(&self, run_id: i64) -> StoreResult<Option<Run>>;

    /// Read a run's jobs outside any transaction, ordered by id
    async fn find_jobs(&self, run_id: i64) -> StoreResult<Vec<Job>>;

    /// Runs whose persisted state implies a lost outbound message:
    /// `CREATED` runs created at or before `stale_before`, and `ACTIVE` runs
    /// that either have a `CREATED`/`SCHEDULED` job created at or before
    /// `stale_before` whose start command was never observed as sent, or have
    /// no active job at all.
    async fn find_reconcilable_runs(&self, stale_before: DateTime<Utc>, limit: usize) -> StoreResult<Vec<i64>>;

    async fn health_check(&self) -> StoreResult<bool>;

    fn backend_name(&self) -> &'static str;
}

/// Unit of work on one locked run
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait RunTransaction: Send {
    fn run_id(&self) -> i64;

    async fn get_run(&mut self) -> StoreResult<Option<Run>>;

    /// Jobs of the locked run, ordered by id
    async fn list_jobs(&mut self) -> StoreResult<Vec<Job>>;

    /// Look up any job by id, including jobs of other runs
    async fn get_job(&mut self, job_id: i64) -> StoreResult<Option<Job>>;

    /// Create a job in `CREATED` status for the locked run
    async fn create_job(&mut self, new_job: NewJob) -> StoreResult<Job>;

    /// Move a job of the locked run forward; backward moves are rejected
    async fn update_job_status(&mut self, job_id: i64, update: &JobStatusUpdate) -> StoreResult<Job>;

    /// Record that a start command for a job of the locked run was sent
    async fn mark_dispatched(&mut self, job_id: i64, at: DateTime<Utc>) -> StoreResult<()>;

    /// Update the locked run; a terminal run cannot change status
    async fn update_run(&mut self, update: &RunUpdate) -> StoreResult<Run>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
