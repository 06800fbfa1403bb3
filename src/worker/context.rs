use serde_json::Value;

use crate::messaging::payloads::JobRequest;
use crate::messaging::MessageHeader;
use crate::models::Stage;

/// Everything an executor knows about the job it runs
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerContext {
    pub run_id: i64,
    pub job_id: i64,
    pub stage: Stage,
    pub trace_id: String,
    /// Opaque credential for calls back into the platform
    pub token: String,
    pub configuration: Value,
}

/// Builds the context for each delivered job request
pub trait WorkerContextFactory: Send + Sync + 'static {
    fn create_context(&self, header: &MessageHeader, request: &JobRequest) -> WorkerContext;
}

/// Context straight from the message header and request
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderContextFactory;

impl WorkerContextFactory for HeaderContextFactory {
    fn create_context(&self, header: &MessageHeader, request: &JobRequest) -> WorkerContext {
        WorkerContext {
            run_id: header.run_id,
            job_id: request.job_id,
            stage: request.stage,
            trace_id: header.trace_id.clone(),
            token: header.token.clone(),
            configuration: request.configuration.clone(),
        }
    }
}
