//! # Endpoints
//!
//! An endpoint is a named logical channel bound to one payload type. The
//! binding and the physical queue name behind it are configuration.

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use super::payloads::{JobRequest, OrchestratorMessage};
use crate::constants::endpoints;
use crate::models::Stage;

/// Untyped endpoint identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EndpointKind {
    Orchestrator,
    Worker(Stage),
}

impl EndpointKind {
    /// Every endpoint known to the system
    pub fn all() -> impl Iterator<Item = EndpointKind> {
        std::iter::once(EndpointKind::Orchestrator).chain(Stage::ALL.into_iter().map(EndpointKind::Worker))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Orchestrator => endpoints::ORCHESTRATOR,
            Self::Worker(stage) => stage.as_str(),
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EndpointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case(endpoints::ORCHESTRATOR) {
            return Ok(Self::Orchestrator);
        }
        s.parse::<Stage>()
            .map(Self::Worker)
            .map_err(|_| format!("Unknown endpoint: {s}"))
    }
}

/// Typed endpoint: an [`EndpointKind`] tied to the payload it carries
pub struct Endpoint<T> {
    kind: EndpointKind,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Endpoint<T> {
    const fn new(kind: EndpointKind) -> Self {
        Self {
            kind,
            _payload: PhantomData,
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

impl Endpoint<OrchestratorMessage> {
    pub const fn orchestrator() -> Self {
        Self::new(EndpointKind::Orchestrator)
    }
}

impl Endpoint<JobRequest> {
    pub const fn worker(stage: Stage) -> Self {
        Self::new(EndpointKind::Worker(stage))
    }
}

pub const ORCHESTRATOR_ENDPOINT: Endpoint<OrchestratorMessage> = Endpoint::orchestrator();

impl<T> Clone for Endpoint<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Endpoint<T> {}

impl<T> fmt::Debug for Endpoint<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Endpoint").field(&self.kind).finish()
    }
}

impl<T> PartialEq for Endpoint<T> {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}
