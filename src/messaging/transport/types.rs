use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::messaging::message::HeaderProperties;

/// Binding-specific handle used to acknowledge a received message
///
/// RabbitMQ delivery tags, PGMQ message IDs and in-memory IDs all fit in a
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for ReceiptHandle {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for ReceiptHandle {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message handed to a binding for publishing
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub properties: HeaderProperties,
    pub body: Vec<u8>,
}

impl OutboundMessage {
    pub fn new(properties: HeaderProperties, body: Vec<u8>) -> Self {
        Self { properties, body }
    }
}

/// Message returned by a binding, not yet decoded
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub receipt_handle: ReceiptHandle,
    pub properties: HeaderProperties,
    pub body: Vec<u8>,
    /// Number of deliveries including this one (approximate on RabbitMQ)
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl ReceivedMessage {
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}
