use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::provider::TransportProvider;
use super::types::OutboundMessage;
use crate::constants::defaults;
use crate::messaging::endpoint::Endpoint;
use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::message::Message;

/// Typed sender bound to one endpoint
pub struct MessageSender<T> {
    endpoint: Endpoint<T>,
    queue_name: String,
    provider: Arc<TransportProvider>,
    publish_timeout: Duration,
}

impl<T> MessageSender<T> {
    pub fn new(endpoint: Endpoint<T>, queue_name: impl Into<String>, provider: Arc<TransportProvider>) -> Self {
        Self {
            endpoint,
            queue_name: queue_name.into(),
            provider,
            publish_timeout: Duration::from_secs(defaults::PUBLISH_TIMEOUT_SECONDS),
        }
    }

    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    pub fn endpoint(&self) -> Endpoint<T> {
        self.endpoint
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

impl<T: Serialize + Send + Sync> MessageSender<T> {
    /// Publish one message within the publish timeout; failures are
    /// retryable transport errors
    pub async fn send(&self, message: &Message<T>) -> MessagingResult<()> {
        let body = message.encode_body()?;
        let publish = self.provider.publish(
            &self.queue_name,
            OutboundMessage::new(message.header.to_properties(), body),
        );
        tokio::time::timeout(self.publish_timeout, publish)
            .await
            .map_err(|_| {
                MessagingError::timeout(format!("publish to {}", self.queue_name), self.publish_timeout.as_secs())
            })??;

        debug!(
            endpoint = %self.endpoint.name(),
            queue = %self.queue_name,
            binding = self.provider.binding_name(),
            trace_id = %message.header.trace_id,
            run_id = message.header.run_id,
            "Message sent"
        );
        Ok(())
    }
}

impl<T> Clone for MessageSender<T> {
    fn clone(&self) -> Self {
        Self {
            endpoint: self.endpoint,
            queue_name: self.queue_name.clone(),
            provider: Arc::clone(&self.provider),
            publish_timeout: self.publish_timeout,
        }
    }
}

impl<T> std::fmt::Debug for MessageSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSender")
            .field("endpoint", &self.endpoint.name())
            .field("queue_name", &self.queue_name)
            .field("binding", &self.provider.binding_name())
            .field("publish_timeout", &self.publish_timeout)
            .finish()
    }
}
