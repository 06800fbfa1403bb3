//! # Transport Provider
//!
//! Enum dispatch over the concrete bindings. The binding is chosen once at
//! startup from configuration; callers hold an `Arc<TransportProvider>` and
//! never see the broker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::in_memory::InMemoryTransport;
use super::pgmq::PgmqTransport;
use super::rabbitmq::RabbitMqTransport;
use super::traits::TransportService;
use super::types::{OutboundMessage, ReceiptHandle, ReceivedMessage};
use crate::messaging::errors::MessagingResult;

/// Configurable binding kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    InMemory,
    #[serde(rename = "rabbitmq")]
    RabbitMq,
    Pgmq,
}

impl BindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InMemory => "in_memory",
            Self::RabbitMq => "rabbitmq",
            Self::Pgmq => "pgmq",
        }
    }
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BindingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in_memory" | "inmemory" | "memory" => Ok(Self::InMemory),
            "rabbitmq" | "amqp" => Ok(Self::RabbitMq),
            "pgmq" => Ok(Self::Pgmq),
            _ => Err(format!("Unknown transport binding: {s}")),
        }
    }
}

/// A connected binding
#[derive(Debug)]
pub enum TransportProvider {
    /// Shared so tests can inspect queues the orchestrator writes to
    InMemory(Arc<InMemoryTransport>),
    RabbitMq(RabbitMqTransport),
    Pgmq(PgmqTransport),
}

impl TransportProvider {
    pub fn kind(&self) -> BindingKind {
        match self {
            Self::InMemory(_) => BindingKind::InMemory,
            Self::RabbitMq(_) => BindingKind::RabbitMq,
            Self::Pgmq(_) => BindingKind::Pgmq,
        }
    }

    fn service(&self) -> &dyn TransportService {
        match self {
            Self::InMemory(service) => service.as_ref() as &dyn TransportService,
            Self::RabbitMq(service) => service,
            Self::Pgmq(service) => service,
        }
    }

    pub async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        self.service().ensure_queue(queue_name).await
    }

    pub async fn publish(&self, queue_name: &str, message: OutboundMessage) -> MessagingResult<()> {
        self.service().publish(queue_name, message).await
    }

    pub async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<ReceivedMessage>> {
        self.service()
            .receive(queue_name, max_messages, visibility_timeout)
            .await
    }

    pub async fn ack(&self, queue_name: &str, receipt_handle: &ReceiptHandle) -> MessagingResult<()> {
        self.service().ack(queue_name, receipt_handle).await
    }

    pub async fn nack(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> MessagingResult<()> {
        self.service().nack(queue_name, receipt_handle, requeue).await
    }

    pub async fn health_check(&self) -> MessagingResult<bool> {
        self.service().health_check().await
    }

    pub fn binding_name(&self) -> &'static str {
        self.service().binding_name()
    }
}

impl From<Arc<InMemoryTransport>> for TransportProvider {
    fn from(service: Arc<InMemoryTransport>) -> Self {
        Self::InMemory(service)
    }
}

impl From<RabbitMqTransport> for TransportProvider {
    fn from(service: RabbitMqTransport) -> Self {
        Self::RabbitMq(service)
    }
}

impl From<PgmqTransport> for TransportProvider {
    fn from(service: PgmqTransport) -> Self {
        Self::Pgmq(service)
    }
}
