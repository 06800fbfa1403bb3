use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{Issue, Stage};
use crate::state_machine::RunStatus;

/// Per-stage job configuration of a run
///
/// A stage is enabled when its entry is present. Parameters are opaque to the
/// orchestrator and forwarded verbatim in the stage's start command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfigurations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisor: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scanner: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifier: Option<Value>,
}

impl JobConfigurations {
    pub fn get(&self, stage: Stage) -> Option<&Value> {
        match stage {
            Stage::Analyzer => self.analyzer.as_ref(),
            Stage::Advisor => self.advisor.as_ref(),
            Stage::Scanner => self.scanner.as_ref(),
            Stage::Evaluator => self.evaluator.as_ref(),
            Stage::Reporter => self.reporter.as_ref(),
            Stage::Notifier => self.notifier.as_ref(),
        }
    }

    fn slot_mut(&mut self, stage: Stage) -> &mut Option<Value> {
        match stage {
            Stage::Analyzer => &mut self.analyzer,
            Stage::Advisor => &mut self.advisor,
            Stage::Scanner => &mut self.scanner,
            Stage::Evaluator => &mut self.evaluator,
            Stage::Reporter => &mut self.reporter,
            Stage::Notifier => &mut self.notifier,
        }
    }

    /// Enable `stage` with the given parameters
    pub fn with_stage(mut self, stage: Stage, parameters: Value) -> Self {
        *self.slot_mut(stage) = Some(parameters);
        self
    }

    pub fn is_enabled(&self, stage: Stage) -> bool {
        self.get(stage).is_some()
    }

    /// Enabled stages in pipeline order
    pub fn enabled_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|stage| self.is_enabled(*stage))
            .collect()
    }
}

/// Caller token and trace id of the message that first drove a run
///
/// Replayed on commands the reconciliation sweep re-sends, so recovered jobs
/// run with the run's credential and stay on its trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceContext {
    pub token: String,
    pub trace_id: String,
}

impl TraceContext {
    pub fn new(token: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            trace_id: trace_id.into(),
        }
    }
}

/// A single execution of the analysis pipeline against one repository revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: i64,
    pub repository_url: String,
    pub revision: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub job_configs: JobConfigurations,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_context: Option<TraceContext>,
}

/// New Run for creation (without generated fields)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRun {
    pub repository_url: String,
    pub revision: String,
    pub job_configs: JobConfigurations,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NewRun {
    pub fn new(
        repository_url: impl Into<String>,
        revision: impl Into<String>,
        job_configs: JobConfigurations,
    ) -> Self {
        Self {
            repository_url: repository_url.into(),
            revision: revision.into(),
            job_configs,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Partial run update applied by the orchestrator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub finished_at: Option<DateTime<Utc>>,
    pub append_issues: Vec<Issue>,
    /// Only written while the run has none
    pub trace_context: Option<TraceContext>,
}

impl RunUpdate {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn finished(status: RunStatus, finished_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            finished_at: Some(finished_at),
            ..Default::default()
        }
    }

    pub fn with_issues(mut self, issues: impl IntoIterator<Item = Issue>) -> Self {
        self.append_issues.extend(issues);
        self
    }

    pub fn with_trace_context(mut self, trace_context: TraceContext) -> Self {
        self.trace_context = Some(trace_context);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.finished_at.is_none()
            && self.append_issues.is_empty()
            && self.trace_context.is_none()
    }

    /// Apply this update to an in-memory copy of the run
    pub fn apply_to(&self, run: &mut Run) {
        if let Some(status) = self.status {
            run.status = status;
        }
        if let Some(finished_at) = self.finished_at {
            run.finished_at = Some(finished_at);
        }
        run.issues.extend(self.append_issues.iter().cloned());
        if run.trace_context.is_none() {
            run.trace_context = self.trace_context.clone();
        }
    }
}
