//! # Message Receiver
//!
//! Receive loop for one endpoint. Every delivered message is decoded and
//! handed to a [`MessageHandler`] in its own task, bounded by a semaphore.
//! Acknowledgment follows the handler result:
//!
//! - handler `Ok` → ack
//! - handler `Err` → nack with requeue (redelivery)
//! - undecodable header or payload → nack without requeue (dead-letter)

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::provider::TransportProvider;
use super::types::ReceivedMessage;
use crate::constants::defaults;
use crate::messaging::endpoint::Endpoint;
use crate::messaging::errors::MessagingResult;
use crate::messaging::message::Message;

/// Consumer of typed messages
#[async_trait]
pub trait MessageHandler<T>: Send + Sync + 'static {
    /// Returning `Err` requests redelivery of the message
    async fn handle(&self, message: Message<T>) -> anyhow::Result<()>;
}

/// Polling and concurrency policy for a receiver
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub batch_size: usize,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
    pub max_concurrent_handlers: usize,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::RECEIVE_BATCH_SIZE,
            visibility_timeout: Duration::from_secs(defaults::VISIBILITY_TIMEOUT_SECONDS),
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
            max_concurrent_handlers: defaults::MAX_CONCURRENT_HANDLERS,
        }
    }
}

/// What happened to a delivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acknowledged,
    Requeued,
    DeadLettered,
}

/// Typed receiver bound to one endpoint
pub struct MessageReceiver<T> {
    endpoint: Endpoint<T>,
    queue_name: String,
    provider: Arc<TransportProvider>,
    config: ReceiverConfig,
    semaphore: Arc<Semaphore>,
}

impl<T> MessageReceiver<T> {
    pub fn new(
        endpoint: Endpoint<T>,
        queue_name: impl Into<String>,
        provider: Arc<TransportProvider>,
        config: ReceiverConfig,
    ) -> Self {
        let permits = config.max_concurrent_handlers.max(1);
        Self {
            endpoint,
            queue_name: queue_name.into(),
            provider,
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    pub fn endpoint(&self) -> Endpoint<T> {
        self.endpoint
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

impl<T> MessageReceiver<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Run the receive loop until `shutdown` flips to `true`
    ///
    /// In-flight handlers are awaited before returning. Transient receive
    /// errors are logged and retried after the poll interval.
    pub async fn receive<H>(&self, handler: Arc<H>, mut shutdown: watch::Receiver<bool>) -> MessagingResult<()>
    where
        H: MessageHandler<T>,
    {
        info!(
            endpoint = %self.endpoint.name(),
            queue = %self.queue_name,
            binding = self.provider.binding_name(),
            max_concurrent_handlers = self.config.max_concurrent_handlers,
            "Receive loop started"
        );

        let mut in_flight = JoinSet::new();

        while !*shutdown.borrow() {
            // Reap finished handler tasks
            while let Some(joined) = in_flight.try_join_next() {
                if let Err(e) = joined {
                    error!(endpoint = %self.endpoint.name(), error = %e, "Message handler task panicked");
                }
            }

            let capacity = self.semaphore.available_permits().min(self.config.batch_size);
            if capacity == 0 {
                tokio::select! {
                    permit = self.semaphore.acquire() => drop(permit),
                    changed = shutdown.changed() => if changed.is_err() { break; },
                }
                continue;
            }

            let batch = match self
                .provider
                .receive(&self.queue_name, capacity, self.config.visibility_timeout)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(
                        endpoint = %self.endpoint.name(),
                        queue = %self.queue_name,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Receive failed"
                    );
                    Vec::new()
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                    changed = shutdown.changed() => if changed.is_err() { break; },
                }
                continue;
            }

            for delivery in batch {
                let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                    break;
                };
                let provider = Arc::clone(&self.provider);
                let handler = Arc::clone(&handler);
                let queue_name = self.queue_name.clone();
                let endpoint = self.endpoint.name();

                in_flight.spawn(async move {
                    let _permit = permit;
                    if let Err(e) =
                        process_delivery::<T, H>(&provider, &queue_name, endpoint, handler.as_ref(), delivery).await
                    {
                        warn!(endpoint = %endpoint, error = %e, "Acknowledgment failed; broker will redeliver");
                    }
                });
            }
        }

        debug!(
            endpoint = %self.endpoint.name(),
            in_flight = in_flight.len(),
            "Receive loop stopping, draining in-flight handlers"
        );
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(endpoint = %self.endpoint.name(), error = %e, "Message handler task panicked");
            }
        }

        info!(endpoint = %self.endpoint.name(), "Receive loop stopped");
        Ok(())
    }

    /// Receive and handle a single batch sequentially
    pub async fn receive_once<H>(&self, handler: &H) -> MessagingResult<Vec<DeliveryOutcome>>
    where
        H: MessageHandler<T>,
    {
        let batch = self
            .provider
            .receive(&self.queue_name, self.config.batch_size, self.config.visibility_timeout)
            .await?;

        let mut outcomes = Vec::with_capacity(batch.len());
        for delivery in batch {
            outcomes.push(
                process_delivery::<T, H>(&self.provider, &self.queue_name, self.endpoint.name(), handler, delivery)
                    .await?,
            );
        }
        Ok(outcomes)
    }
}

async fn process_delivery<T, H>(
    provider: &TransportProvider,
    queue_name: &str,
    endpoint: &'static str,
    handler: &H,
    delivery: ReceivedMessage,
) -> MessagingResult<DeliveryOutcome>
where
    T: DeserializeOwned + Send + 'static,
    H: MessageHandler<T>,
{
    let message = match Message::<T>::decode(&delivery.properties, &delivery.body) {
        Ok(message) => message,
        Err(e) => {
            error!(
                endpoint = %endpoint,
                queue = %queue_name,
                receipt_handle = %delivery.receipt_handle,
                error = %e,
                "Undecodable message, dead-lettering"
            );
            provider.nack(queue_name, &delivery.receipt_handle, false).await?;
            return Ok(DeliveryOutcome::DeadLettered);
        }
    };

    let span = info_span!(
        "handle_message",
        endpoint = %endpoint,
        trace_id = %message.header.trace_id,
        run_id = message.header.run_id,
        receive_count = delivery.receive_count,
    );

    match handler.handle(message).instrument(span.clone()).await {
        Ok(()) => {
            provider.ack(queue_name, &delivery.receipt_handle).await?;
            Ok(DeliveryOutcome::Acknowledged)
        }
        Err(e) => {
            span.in_scope(|| warn!(error = %e, "Handler failed, requesting redelivery"));
            provider.nack(queue_name, &delivery.receipt_handle, true).await?;
            Ok(DeliveryOutcome::Requeued)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::endpoint::ORCHESTRATOR_ENDPOINT;
    use crate::messaging::message::MessageHeader;
    use crate::messaging::payloads::OrchestratorMessage;
    use crate::messaging::transport::{InMemoryTransport, MessageSender, OutboundMessage, TransportService};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const QUEUE: &str = "orchestrator_queue";

    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<i64>>,
        failures_remaining: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler<OrchestratorMessage> for RecordingHandler {
        async fn handle(&self, message: Message<OrchestratorMessage>) -> anyhow::Result<()> {
            self.seen.lock().push(message.run_id());
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("store unavailable");
            }
            Ok(())
        }
    }

    fn fixture() -> (Arc<InMemoryTransport>, MessageSender<OrchestratorMessage>, MessageReceiver<OrchestratorMessage>) {
        let transport = Arc::new(InMemoryTransport::with_queues([QUEUE]));
        let provider = Arc::new(TransportProvider::from(transport.clone()));
        let sender = MessageSender::new(ORCHESTRATOR_ENDPOINT, QUEUE, provider.clone());
        let receiver = MessageReceiver::new(ORCHESTRATOR_ENDPOINT, QUEUE, provider, ReceiverConfig::default());
        (transport, sender, receiver)
    }

    #[tokio::test]
    async fn test_ack_after_successful_handling() {
        let (transport, sender, receiver) = fixture();
        sender
            .send(&Message::new(MessageHeader::new("t", "trace", 1), OrchestratorMessage::RunCreated))
            .await
            .unwrap();

        let handler = RecordingHandler::default();
        let outcomes = receiver.receive_once(&handler).await.unwrap();

        assert_eq!(outcomes, vec![DeliveryOutcome::Acknowledged]);
        assert_eq!(*handler.seen.lock(), vec![1]);
        assert_eq!(transport.queue_length(QUEUE).await, 0);
    }

    #[tokio::test]
    async fn test_handler_error_requeues() {
        let (transport, sender, receiver) = fixture();
        sender
            .send(&Message::new(MessageHeader::new("t", "trace", 2), OrchestratorMessage::RunCreated))
            .await
            .unwrap();

        let handler = RecordingHandler {
            failures_remaining: AtomicUsize::new(1),
            ..Default::default()
        };
        assert_eq!(receiver.receive_once(&handler).await.unwrap(), vec![DeliveryOutcome::Requeued]);
        assert_eq!(transport.queue_length(QUEUE).await, 1);

        assert_eq!(receiver.receive_once(&handler).await.unwrap(), vec![DeliveryOutcome::Acknowledged]);
        assert_eq!(*handler.seen.lock(), vec![2, 2]);
    }

    #[tokio::test]
    async fn test_poison_messages_are_dead_lettered() {
        let (transport, _sender, receiver) = fixture();
        transport
            .publish(QUEUE, OutboundMessage::new(Default::default(), br#"{"type":"RunCreated"}"#.to_vec()))
            .await
            .unwrap();
        transport
            .publish(
                QUEUE,
                OutboundMessage::new(MessageHeader::new("t", "trace", 3).to_properties(), b"garbage".to_vec()),
            )
            .await
            .unwrap();

        let handler = RecordingHandler::default();
        let outcomes = receiver.receive_once(&handler).await.unwrap();

        assert_eq!(outcomes, vec![DeliveryOutcome::DeadLettered, DeliveryOutcome::DeadLettered]);
        assert!(handler.seen.lock().is_empty());
        assert_eq!(transport.dead_letters(QUEUE).await.len(), 2);
    }

    #[tokio::test]
    async fn test_receive_loop_stops_on_shutdown() {
        let (transport, sender, receiver) = fixture();
        for run_id in 1..=5 {
            sender
                .send(&Message::new(MessageHeader::new("t", "trace", run_id), OrchestratorMessage::RunCreated))
                .await
                .unwrap();
        }

        let handler = Arc::new(RecordingHandler::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let receiver = Arc::new(receiver);
        let loop_handle = {
            let receiver = receiver.clone();
            let handler = handler.clone();
            tokio::spawn(async move { receiver.receive(handler, shutdown_rx).await })
        };

        for _ in 0..100 {
            if transport.queue_length(QUEUE).await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown_tx.send(true).unwrap();
        loop_handle.await.unwrap().unwrap();

        let mut seen = handler.seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    }
}
