//! # System Constants
//!
//! Wire-level names and default policies shared by the orchestrator, the
//! transport bindings and the worker harness.

/// Header attribute names carried as broker metadata on every message
pub mod headers {
    pub const TOKEN: &str = "token";
    pub const TRACE_ID: &str = "traceId";
    pub const RUN_ID: &str = "runId";

    /// All header attributes, in wire order
    pub const ALL: [&str; 3] = [TOKEN, TRACE_ID, RUN_ID];
}

/// Logical endpoint names
pub mod endpoints {
    pub const ORCHESTRATOR: &str = "orchestrator";
    pub const ANALYZER: &str = "analyzer";
    pub const ADVISOR: &str = "advisor";
    pub const SCANNER: &str = "scanner";
    pub const EVALUATOR: &str = "evaluator";
    pub const REPORTER: &str = "reporter";
    pub const NOTIFIER: &str = "notifier";
}

/// Issue source used for issues raised by the orchestrator itself
pub const ORCHESTRATOR_ISSUE_SOURCE: &str = "orchestrator";

/// Content type published with every message body
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Default operational policies, overridable through configuration
pub mod defaults {
    pub const MAX_CONCURRENT_HANDLERS: usize = 16;
    pub const RECEIVE_BATCH_SIZE: usize = 10;
    pub const VISIBILITY_TIMEOUT_SECONDS: u64 = 30;
    pub const POLL_INTERVAL_MS: u64 = 250;
    pub const PUBLISH_TIMEOUT_SECONDS: u64 = 10;
    pub const RECONCILIATION_INTERVAL_SECONDS: u64 = 60;
    pub const RECONCILIATION_STALE_AFTER_SECONDS: u64 = 300;
    pub const RECONCILIATION_BATCH_SIZE: usize = 100;
}
