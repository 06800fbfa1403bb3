//! # Transport Service Trait
//!
//! One interface, one implementation per broker. Bindings move opaque bodies
//! and header properties; typing happens above them in
//! [`MessageSender`](super::MessageSender) and
//! [`MessageReceiver`](super::MessageReceiver).

use async_trait::async_trait;
use std::time::Duration;

use super::types::{OutboundMessage, ReceiptHandle, ReceivedMessage};
use crate::messaging::errors::MessagingResult;

/// Broker-agnostic queue operations
///
/// Delivery is at-least-once: a received message stays owned by the broker
/// until it is acknowledged, and a negative acknowledgment with `requeue`
/// makes it deliverable again.
#[async_trait]
pub trait TransportService: Send + Sync + 'static {
    /// Create the queue if it does not exist (idempotent)
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()>;

    /// Enqueue one message; header properties travel as broker metadata
    async fn publish(&self, queue_name: &str, message: OutboundMessage) -> MessagingResult<()>;

    /// Take up to `max_messages` visible messages
    ///
    /// Bindings with native visibility timeouts hide the messages for
    /// `visibility_timeout`; others rely on unacknowledged-delivery tracking.
    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<ReceivedMessage>>;

    /// Acknowledge successful processing, removing the message
    async fn ack(&self, queue_name: &str, receipt_handle: &ReceiptHandle) -> MessagingResult<()>;

    /// Negative acknowledgment: redeliver when `requeue`, dead-letter otherwise
    async fn nack(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> MessagingResult<()>;

    async fn health_check(&self) -> MessagingResult<bool>;

    /// Binding name for logs
    fn binding_name(&self) -> &'static str;
}
