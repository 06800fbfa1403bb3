//! # Structured Logging Module
//!
//! Environment-aware console logging with `tracing`. Output goes to stdout,
//! colored only when attached to a terminal, optionally as JSON lines for log
//! shippers.
//!
//! Every inbound message is handled inside a span carrying `trace_id` and
//! `run_id`, so events logged below the receive loop are correlated without
//! passing ids to each call.

use chrono::Utc;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::models::Stage;
use crate::state_machine::{JobStatus, RunStatus};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global subscriber once; later calls are no-ops
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = get_log_level(&environment, config.level.as_deref());
        let use_ansi = IsTerminal::is_terminal(&std::io::stdout()) && !config.json;

        let console_layer = if config.json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(true)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(use_ansi)
                .with_filter(EnvFilter::new(&log_level))
                .boxed()
        };

        if tracing_subscriber::registry().with(console_layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        } else {
            tracing::info!(
                environment = %environment,
                log_level = %log_level,
                ansi_colors = use_ansi,
                json = config.json,
                "Console logging initialized"
            );
        }
    });
}

/// Current environment name, lowercased
pub fn get_environment() -> String {
    std::env::var("ORCHESTRATOR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
        .to_lowercase()
}

/// `RUST_LOG`, then the configured level, then the environment default
fn get_log_level(environment: &str, configured: Option<&str>) -> String {
    if let Ok(level) = std::env::var("RUST_LOG") {
        return level.to_lowercase();
    }
    if let Some(level) = configured {
        return level.to_lowercase();
    }

    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log a persisted run status change
pub fn log_run_transition(run_id: i64, from: RunStatus, to: RunStatus, trigger: &str) {
    tracing::info!(
        run_id = run_id,
        from = %from,
        to = %to,
        trigger = %trigger,
        timestamp = %Utc::now().to_rfc3339(),
        "RUN_TRANSITION"
    );
}

/// Log a persisted job status change
pub fn log_job_transition(run_id: i64, job_id: i64, stage: Stage, from: Option<JobStatus>, to: JobStatus) {
    tracing::info!(
        run_id = run_id,
        job_id = job_id,
        stage = %stage,
        from = from.map(|status| status.as_str()),
        to = %to,
        timestamp = %Utc::now().to_rfc3339(),
        "JOB_TRANSITION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_environment_detection() {
        std::env::set_var("ORCHESTRATOR_ENV", "Staging");
        assert_eq!(get_environment(), "staging");
        std::env::remove_var("ORCHESTRATOR_ENV");
    }

    #[test]
    #[serial]
    fn test_log_level_precedence() {
        std::env::remove_var("RUST_LOG");
        assert_eq!(get_log_level("production", None), "info");
        assert_eq!(get_log_level("development", None), "debug");
        assert_eq!(get_log_level("production", Some("WARN")), "warn");

        std::env::set_var("RUST_LOG", "sca_orchestrator=trace");
        assert_eq!(get_log_level("production", Some("warn")), "sca_orchestrator=trace");
        std::env::remove_var("RUST_LOG");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing(&LoggingConfig::default());
        init_tracing(&LoggingConfig {
            level: Some("error".to_string()),
            json: true,
        });
    }
}
