//! # PostgreSQL Run Store
//!
//! Runs and jobs in two tables (see `migrations/`). Each [`RunTransaction`]
//! wraps one database transaction that starts with `SELECT ... FOR UPDATE` on
//! the run row, so concurrent handlers for the same run queue up behind the
//! row lock while other runs proceed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::errors::{StoreError, StoreResult};
use super::traits::{RunStore, RunTransaction};
use crate::config::DatabaseConfig;
use crate::models::{Issue, Job, JobConfigurations, JobStatusUpdate, NewJob, NewRun, Run, RunUpdate, TraceContext};
use crate::state_machine::JobStatus;

const RUN_COLUMNS: &str =
    "id, repository_url, revision, created_at, finished_at, status, job_configs, issues, labels, trace_token, trace_id";
const JOB_COLUMNS: &str =
    "id, run_id, stage, status, created_at, started_at, finished_at, configuration, result_ref, dispatched_at";

#[derive(Debug, FromRow)]
struct RunRow {
    id: i64,
    repository_url: String,
    revision: String,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    status: String,
    job_configs: Json<JobConfigurations>,
    issues: Json<Vec<Issue>>,
    labels: Json<BTreeMap<String, String>>,
    trace_token: Option<String>,
    trace_id: Option<String>,
}

impl TryFrom<RunRow> for Run {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|e: String| StoreError::corrupt_row("sca_runs", row.id, e))?;
        Ok(Run {
            id: row.id,
            repository_url: row.repository_url,
            revision: row.revision,
            created_at: row.created_at,
            finished_at: row.finished_at,
            status,
            job_configs: row.job_configs.0,
            issues: row.issues.0,
            labels: row.labels.0,
            trace_context: row
                .trace_token
                .zip(row.trace_id)
                .map(|(token, trace_id)| TraceContext { token, trace_id }),
        })
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: i64,
    run_id: i64,
    stage: String,
    status: String,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    configuration: Value,
    result_ref: Option<Value>,
    dispatched_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let stage = row
            .stage
            .parse()
            .map_err(|e: String| StoreError::corrupt_row("sca_jobs", row.id, e))?;
        let status = row
            .status
            .parse()
            .map_err(|e: String| StoreError::corrupt_row("sca_jobs", row.id, e))?;
        Ok(Job {
            id: row.id,
            run_id: row.run_id,
            stage,
            status,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
            configuration: row.configuration,
            result_ref: row.result_ref,
            dispatched_at: row.dispatched_at,
        })
    }
}

fn into_jobs(rows: Vec<JobRow>) -> StoreResult<Vec<Job>> {
    rows.into_iter().map(Job::try_from).collect()
}

#[derive(Debug, Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    /// Connect and, when configured, apply the embedded migrations
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::connection(format!("Run store connection failed: {e}")))?;

        let store = Self { pool };
        if config.run_migrations {
            store.migrate().await?;
        }
        info!(max_connections = config.max_connections, "PostgreSQL run store connected");
        Ok(store)
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        debug!("Run store migrations applied");
        Ok(())
    }
}

#[async_trait]
impl RunStore for PostgresRunStore {
    async fn begin(&self, run_id: i64) -> StoreResult<Box<dyn RunTransaction>> {
        let mut tx = self.pool.begin().await?;
        let row: Option<RunRow> = sqlx::query_as(&format!(
            "SELECT {RUN_COLUMNS} FROM sca_runs WHERE id = $1 FOR UPDATE"
        ))
        .bind(run_id)
        .fetch_optional(&mut *tx)
        .await?;

        let run = row.map(Run::try_from).transpose()?;
        Ok(Box::new(PostgresTransaction { tx, run_id, run }))
    }

    async fn create_run(&self, new_run: NewRun) -> StoreResult<Run> {
        let row: RunRow = sqlx::query_as(&format!(
            "INSERT INTO sca_runs (repository_url, revision, job_configs, labels) \
             VALUES ($1, $2, $3, $4) RETURNING {RUN_COLUMNS}"
        ))
        .bind(&new_run.repository_url)
        .bind(&new_run.revision)
        .bind(Json(&new_run.job_configs))
        .bind(Json(&new_run.labels))
        .fetch_one(&self.pool)
        .await?;
        Run::try_from(row)
    }

    async fn find_run(&self, run_id: i64) -> StoreResult<Option<Run>> {
        let row: Option<RunRow> = sqlx::query_as(&format!("SELECT {RUN_COLUMNS} FROM sca_runs WHERE id = $1"))
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Run::try_from).transpose()
    }

    async fn find_jobs(&self, run_id: i64) -> StoreResult<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM sca_jobs WHERE run_id = $1 ORDER BY id"
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;
        into_jobs(rows)
    }

    async fn find_reconcilable_runs(&self, stale_before: DateTime<Utc>, limit: usize) -> StoreResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT r.id
            FROM sca_runs r
            WHERE (r.status = 'CREATED' AND r.created_at <= $1)
               OR (r.status = 'ACTIVE' AND (
                    EXISTS (
                        SELECT 1 FROM sca_jobs j
                        WHERE j.run_id = r.id
                          AND j.status IN ('CREATED', 'SCHEDULED')
                          AND j.dispatched_at IS NULL
                          AND j.created_at <= $1
                    )
                    OR NOT EXISTS (
                        SELECT 1 FROM sca_jobs j
                        WHERE j.run_id = r.id
                          AND j.status IN ('CREATED', 'SCHEDULED', 'RUNNING')
                    )
               ))
            ORDER BY r.id
            LIMIT $2
            "#,
        )
        .bind(stale_before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
    run_id: i64,
    run: Option<Run>,
}

impl PostgresTransaction {
    async fn fetch_job(&mut self, job_id: i64) -> StoreResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM sca_jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Job::try_from).transpose()
    }
}

#[async_trait]
impl RunTransaction for PostgresTransaction {
    fn run_id(&self) -> i64 {
        self.run_id
    }

    async fn get_run(&mut self) -> StoreResult<Option<Run>> {
        Ok(self.run.clone())
    }

    async fn list_jobs(&mut self) -> StoreResult<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM sca_jobs WHERE run_id = $1 ORDER BY id"
        ))
        .bind(self.run_id)
        .fetch_all(&mut *self.tx)
        .await?;
        into_jobs(rows)
    }

    async fn get_job(&mut self, job_id: i64) -> StoreResult<Option<Job>> {
        self.fetch_job(job_id).await
    }

    async fn create_job(&mut self, new_job: NewJob) -> StoreResult<Job> {
        if self.run.is_none() {
            return Err(StoreError::RunNotFound { run_id: self.run_id });
        }
        let row: JobRow = sqlx::query_as(&format!(
            "INSERT INTO sca_jobs (run_id, stage, status, created_at, configuration) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {JOB_COLUMNS}"
        ))
        .bind(new_job.run_id)
        .bind(new_job.stage.as_str())
        .bind(JobStatus::Created.as_str())
        .bind(new_job.created_at)
        .bind(&new_job.configuration)
        .fetch_one(&mut *self.tx)
        .await?;
        Job::try_from(row)
    }

    async fn update_job_status(&mut self, job_id: i64, update: &JobStatusUpdate) -> StoreResult<Job> {
        let current = self
            .fetch_job(job_id)
            .await?
            .filter(|job| job.run_id == self.run_id)
            .ok_or(StoreError::JobNotFound { job_id })?;
        if !current.status.can_transition_to(update.status) {
            return Err(StoreError::invalid_transition("job", current.status, update.status));
        }

        let row: JobRow = sqlx::query_as(&format!(
            "UPDATE sca_jobs SET status = $2, \
                started_at = COALESCE($3, started_at), \
                finished_at = COALESCE($4, finished_at), \
                result_ref = COALESCE($5, result_ref) \
             WHERE id = $1 RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id)
        .bind(update.status.as_str())
        .bind(update.started_at)
        .bind(update.finished_at)
        .bind(&update.result_ref)
        .fetch_one(&mut *self.tx)
        .await?;
        Job::try_from(row)
    }

    async fn mark_dispatched(&mut self, job_id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let updated = sqlx::query("UPDATE sca_jobs SET dispatched_at = $3 WHERE id = $1 AND run_id = $2")
            .bind(job_id)
            .bind(self.run_id)
            .bind(at)
            .execute(&mut *self.tx)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::JobNotFound { job_id });
        }
        Ok(())
    }

    async fn update_run(&mut self, update: &RunUpdate) -> StoreResult<Run> {
        let current = self
            .run
            .as_ref()
            .ok_or(StoreError::RunNotFound { run_id: self.run_id })?;
        if let Some(status) = update.status {
            if !current.status.can_transition_to(status) {
                return Err(StoreError::invalid_transition("run", current.status, status));
            }
        }

        let row: RunRow = sqlx::query_as(&format!(
            "UPDATE sca_runs SET status = COALESCE($2, status), \
                finished_at = COALESCE($3, finished_at), \
                issues = issues || $4, \
                trace_token = COALESCE(trace_token, $5), \
                trace_id = COALESCE(trace_id, $6) \
             WHERE id = $1 RETURNING {RUN_COLUMNS}"
        ))
        .bind(self.run_id)
        .bind(update.status.map(|status| status.as_str()))
        .bind(update.finished_at)
        .bind(Json(&update.append_issues))
        .bind(update.trace_context.as_ref().map(|context| context.token.as_str()))
        .bind(update.trace_context.as_ref().map(|context| context.trace_id.as_str()))
        .fetch_one(&mut *self.tx)
        .await?;

        let run = Run::try_from(row)?;
        self.run = Some(run.clone());
        Ok(run)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let run_id = self.run_id;
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::commit(run_id, e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stage;
    use crate::state_machine::RunStatus;
    use serde_json::json;

    #[test]
    fn test_job_row_conversion() {
        let row = JobRow {
            id: 3,
            run_id: 1,
            stage: "scanner".to_string(),
            status: "SCHEDULED".to_string(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            configuration: json!({"timeout": 60}),
            result_ref: None,
            dispatched_at: None,
        };
        let job = Job::try_from(row).unwrap();
        assert_eq!(job.stage, Stage::Scanner);
        assert_eq!(job.status, JobStatus::Scheduled);
    }

    #[test]
    fn test_corrupt_row_detected() {
        let row = RunRow {
            id: 9,
            repository_url: "https://example.org/repo.git".to_string(),
            revision: "main".to_string(),
            created_at: Utc::now(),
            finished_at: None,
            status: "PAUSED".to_string(),
            job_configs: Json(JobConfigurations::default()),
            issues: Json(Vec::new()),
            labels: Json(BTreeMap::new()),
            trace_token: Some("token".to_string()),
            trace_id: None,
        };
        assert!(matches!(
            Run::try_from(row),
            Err(StoreError::CorruptRow { table: "sca_runs", id: 9, .. })
        ));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL running"]
    async fn test_run_lifecycle_against_database() {
        let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "postgresql://localhost/sca_test".to_string());
        let store = PostgresRunStore::connect(&DatabaseConfig {
            url,
            ..DatabaseConfig::default()
        })
        .await
        .unwrap();

        let run = store
            .create_run(NewRun::new(
                "https://example.org/repo.git",
                "main",
                JobConfigurations::default().with_stage(Stage::Analyzer, json!({})),
            ))
            .await
            .unwrap();

        let mut tx = store.begin(run.id).await.unwrap();
        let job = tx
            .create_job(NewJob {
                run_id: run.id,
                stage: Stage::Analyzer,
                configuration: json!({}),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        tx.update_job_status(job.id, &JobStatusUpdate::to(JobStatus::Scheduled))
            .await
            .unwrap();
        tx.update_run(&RunUpdate::status(RunStatus::Active).with_trace_context(TraceContext::new("token", "trace-1")))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert!(store.find_reconcilable_runs(cutoff, 100).await.unwrap().contains(&run.id));

        let mut tx = store.begin(run.id).await.unwrap();
        tx.mark_dispatched(job.id, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();
        assert!(!store.find_reconcilable_runs(cutoff, 100).await.unwrap().contains(&run.id));

        let jobs = store.find_jobs(run.id).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Scheduled);
        assert!(jobs[0].dispatched_at.is_some());
        let stored = store.find_run(run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Active);
        assert_eq!(stored.trace_context, Some(TraceContext::new("token", "trace-1")));
    }
}
