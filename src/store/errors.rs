//! Run store error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Database error during {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: i64 },

    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: i64 },

    #[error("Invalid {entity} transition {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Corrupt {table} row {id}: {message}")]
    CorruptRow {
        table: &'static str,
        id: i64,
        message: String,
    },

    #[error("Commit failed for run {run_id}: {message}")]
    Commit { run_id: i64, message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },
}

impl StoreError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invalid_transition(entity: &'static str, from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn corrupt_row(table: &'static str, id: i64, message: impl Into<String>) -> Self {
        Self::CorruptRow {
            table,
            id,
            message: message.into(),
        }
    }

    pub fn commit(run_id: i64, message: impl Into<String>) -> Self {
        Self::Commit {
            run_id,
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Database { .. } | Self::Commit { .. }
        )
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::connection(err.to_string())
            }
            other => Self::database("query", other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Migration {
            message: err.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
