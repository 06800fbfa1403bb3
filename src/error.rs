//! # Orchestrator Errors
//!
//! Top-level error aggregating the layer errors, plus the classification
//! that decides how a failure is surfaced: redelivery, dead-lettering,
//! a dropped message, or process exit.

use std::fmt;
use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Orchestration error: {0}")]
    Internal(String),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// How a failure is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Broker unreachable or publish timed out; redelivered on receive,
    /// repaired by reconciliation on send
    TransientTransport,
    /// Redelivered or out-of-date event; dropped, logged at debug
    StaleEvent,
    /// A worker reported failure; a regular transition to `FAILED`
    DomainFailure,
    /// Reference to a run or job that does not exist; dropped with a warning
    UnknownReference,
    /// Load or persist failed; the message is redelivered
    Persistence,
    /// Header or payload cannot be decoded; dead-lettered
    Poison,
    /// Invalid configuration; fatal at startup
    Configuration,
}

impl ErrorClass {
    /// Whether the inbound message should be delivered again
    pub fn requeues(&self) -> bool {
        matches!(self, Self::TransientTransport | Self::Persistence)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientTransport => "transient_transport",
            Self::StaleEvent => "stale_event",
            Self::DomainFailure => "domain_failure",
            Self::UnknownReference => "unknown_reference",
            Self::Persistence => "persistence",
            Self::Poison => "poison",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OrchestratorError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Configuration(_) => ErrorClass::Configuration,
            Self::Messaging(err) if err.is_poison() => ErrorClass::Poison,
            Self::Messaging(_) => ErrorClass::TransientTransport,
            Self::Store(StoreError::RunNotFound { .. } | StoreError::JobNotFound { .. }) => {
                ErrorClass::UnknownReference
            }
            Self::Store(_) | Self::Internal(_) => ErrorClass::Persistence,
        }
    }
}
