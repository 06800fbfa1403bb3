//! # In-Memory Transport
//!
//! Thread-safe in-memory queues for tests and single-process development.
//!
//! - **Visibility timeout**: received messages stay hidden until acked, nacked
//!   or the timeout lapses
//! - **Dead letters**: nack without requeue moves the message aside so tests
//!   can assert on it
//! - **Fault injection**: publishes can be forced to fail or stall to simulate
//!   a broker outage

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::traits::TransportService;
use super::types::{OutboundMessage, ReceiptHandle, ReceivedMessage};
use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::message::HeaderProperties;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    properties: HeaderProperties,
    body: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    /// When the message becomes visible again (None = visible now)
    visible_at: Option<DateTime<Utc>>,
    receive_count: u32,
}

impl StoredMessage {
    fn snapshot(&self) -> ReceivedMessage {
        ReceivedMessage {
            receipt_handle: ReceiptHandle::from(self.id),
            properties: self.properties.clone(),
            body: self.body.clone(),
            receive_count: self.receive_count,
            enqueued_at: self.enqueued_at,
        }
    }
}

#[derive(Debug, Default)]
struct InMemoryQueue {
    messages: VecDeque<StoredMessage>,
    dead_letters: Vec<StoredMessage>,
    total_sent: u64,
    total_acked: u64,
    total_nacked: u64,
}

/// In-memory transport binding
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    queues: RwLock<HashMap<String, InMemoryQueue>>,
    next_id: AtomicU64,
    fail_publishes: AtomicBool,
    publish_delay_ms: AtomicU64,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-provisioned queues
    pub fn with_queues<I, S>(queue_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queues = queue_names
            .into_iter()
            .map(|name| (name.into(), InMemoryQueue::default()))
            .collect();
        Self {
            queues: RwLock::new(queues),
            ..Self::default()
        }
    }

    /// Make every subsequent publish fail until reset
    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Hold every subsequent publish for `delay`; zero disables
    pub fn set_publish_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.publish_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Messages currently held by a queue, visible or not
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues.get(queue_name).map(|q| q.messages.len()).unwrap_or(0)
    }

    /// Snapshot of the messages held by a queue in FIFO order
    pub async fn peek_all(&self, queue_name: &str) -> Vec<ReceivedMessage> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.messages.iter().map(StoredMessage::snapshot).collect())
            .unwrap_or_default()
    }

    /// Snapshot of the messages dead-lettered from a queue
    pub async fn dead_letters(&self, queue_name: &str) -> Vec<ReceivedMessage> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.dead_letters.iter().map(StoredMessage::snapshot).collect())
            .unwrap_or_default()
    }

    /// Total messages ever published to a queue
    pub async fn total_sent(&self, queue_name: &str) -> u64 {
        let queues = self.queues.read().await;
        queues.get(queue_name).map(|q| q.total_sent).unwrap_or(0)
    }

    /// Remove every message from a queue
    pub async fn clear_queue(&self, queue_name: &str) {
        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.get_mut(queue_name) {
            queue.messages.clear();
        }
    }

    fn parse_handle(receipt_handle: &ReceiptHandle) -> MessagingResult<u64> {
        receipt_handle
            .as_str()
            .parse()
            .map_err(|_| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
    }
}

#[async_trait]
impl TransportService for InMemoryTransport {
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        let mut queues = self.queues.write().await;
        queues.entry(queue_name.to_string()).or_default();
        Ok(())
    }

    async fn publish(&self, queue_name: &str, message: OutboundMessage) -> MessagingResult<()> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(MessagingError::send(queue_name, "simulated broker outage"));
        }
        let delay_ms = self.publish_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        queue.total_sent += 1;
        queue.messages.push_back(StoredMessage {
            id,
            properties: message.properties,
            body: message.body,
            enqueued_at: Utc::now(),
            visible_at: None,
            receive_count: 0,
        });
        Ok(())
    }

    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<ReceivedMessage>> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Utc::now();
        let timeout = chrono::Duration::from_std(visibility_timeout)
            .map_err(|e| MessagingError::configuration("visibility_timeout", e.to_string()))?;
        let visible_until = now + timeout;

        let mut received = Vec::new();
        for message in queue.messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if message.visible_at.map(|at| at <= now).unwrap_or(true) {
                message.visible_at = Some(visible_until);
                message.receive_count += 1;
                received.push(message.snapshot());
            }
        }
        Ok(received)
    }

    async fn ack(&self, queue_name: &str, receipt_handle: &ReceiptHandle) -> MessagingResult<()> {
        let id = Self::parse_handle(receipt_handle)?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let position = queue
            .messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| MessagingError::message_not_found(id.to_string()))?;
        queue.messages.remove(position);
        queue.total_acked += 1;
        Ok(())
    }

    async fn nack(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> MessagingResult<()> {
        let id = Self::parse_handle(receipt_handle)?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let position = queue
            .messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| MessagingError::message_not_found(id.to_string()))?;
        queue.total_nacked += 1;

        if requeue {
            if let Some(message) = queue.messages.get_mut(position) {
                message.visible_at = None;
            }
        } else if let Some(message) = queue.messages.remove(position) {
            queue.dead_letters.push(message);
        }
        Ok(())
    }

    async fn health_check(&self) -> MessagingResult<bool> {
        Ok(true)
    }

    fn binding_name(&self) -> &'static str {
        "in_memory"
    }
}
