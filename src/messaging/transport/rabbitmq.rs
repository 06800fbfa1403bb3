//! # RabbitMQ Transport
//!
//! AMQP 0.9.1 binding built on `lapin`. Header properties travel as AMQP
//! message headers (`token`/`traceId` as long strings, `runId` as a 64-bit
//! integer); the body is the JSON payload. Each queue gets a dead-letter
//! exchange so rejected messages are kept rather than dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::traits::TransportService;
use super::types::{OutboundMessage, ReceiptHandle, ReceivedMessage};
use crate::config::RabbitMqConfig;
use crate::constants::JSON_CONTENT_TYPE;
use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::message::{HeaderProperties, HeaderValue};

/// RabbitMQ transport binding
pub struct RabbitMqTransport {
    connection: Connection,
    channel: Channel,
    config: RabbitMqConfig,
    declared_queues: Arc<RwLock<std::collections::HashSet<String>>>,
}

impl std::fmt::Debug for RabbitMqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMqTransport")
            .field("url", &self.config.redacted_url())
            .field("prefetch_count", &self.config.prefetch_count)
            .finish()
    }
}

impl RabbitMqTransport {
    /// Connect and open the operations channel
    pub async fn connect(config: &RabbitMqConfig) -> MessagingResult<Self> {
        let connection = Connection::connect(
            &config.url,
            ConnectionProperties::default().with_connection_name(config.connection_name.clone().into()),
        )
        .await
        .map_err(|e| MessagingError::connection(format!("RabbitMQ connection failed: {e}")))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                // Do not leak the connection when the channel cannot be opened
                let _ = connection.close(0, "channel creation failed").await;
                return Err(MessagingError::connection(format!(
                    "RabbitMQ channel creation failed: {e}"
                )));
            }
        };

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| MessagingError::configuration("rabbitmq", format!("Failed to set QoS: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| MessagingError::configuration("rabbitmq", format!("Failed to enable publisher confirms: {e}")))?;

        info!(
            url = %config.redacted_url(),
            prefetch_count = config.prefetch_count,
            "RabbitMQ transport connected"
        );

        Ok(Self {
            connection,
            channel,
            config: config.clone(),
            declared_queues: Arc::new(RwLock::new(std::collections::HashSet::new())),
        })
    }

    /// Close the channel and connection
    pub async fn close(&self) -> MessagingResult<()> {
        self.channel.close(200, "shutdown").await?;
        self.connection.close(200, "shutdown").await?;
        Ok(())
    }

    async fn setup_dead_letter(&self, queue_name: &str) -> MessagingResult<()> {
        let dlx_name = format!("{queue_name}_dlx");
        let dlq_name = format!("{queue_name}_dlq");

        self.channel
            .exchange_declare(
                &dlx_name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_operation(&dlx_name, "exchange_declare", e.to_string()))?;

        self.channel
            .queue_declare(
                &dlq_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_operation(&dlq_name, "queue_declare", e.to_string()))?;

        self.channel
            .queue_bind(
                &dlq_name,
                &dlx_name,
                queue_name,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| MessagingError::queue_operation(&dlq_name, "queue_bind", e.to_string()))?;

        Ok(())
    }

    fn parse_delivery_tag(receipt_handle: &ReceiptHandle) -> MessagingResult<u64> {
        receipt_handle
            .as_str()
            .parse()
            .map_err(|_| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
    }
}

/// Encode header properties as an AMQP header table
pub fn to_field_table(properties: &HeaderProperties) -> FieldTable {
    let mut table = FieldTable::default();
    for (name, value) in properties.iter() {
        let amqp_value = match value {
            HeaderValue::Text(text) => AMQPValue::LongString(text.as_str().into()),
            HeaderValue::Integer(number) => AMQPValue::LongLongInt(*number),
        };
        table.insert(name.as_str().into(), amqp_value);
    }
    table
}

/// Decode an AMQP header table; unsupported value types are skipped
pub fn from_field_table(table: Option<&FieldTable>) -> HeaderProperties {
    let Some(table) = table else {
        return HeaderProperties::default();
    };

    table
        .inner()
        .iter()
        .filter_map(|(name, value)| {
            let value = match value {
                AMQPValue::LongString(text) => {
                    HeaderValue::Text(String::from_utf8_lossy(text.as_bytes()).into_owned())
                }
                AMQPValue::ShortString(text) => HeaderValue::Text(text.as_str().to_string()),
                AMQPValue::LongLongInt(number) => HeaderValue::Integer(*number),
                AMQPValue::LongInt(number) => HeaderValue::Integer(i64::from(*number)),
                AMQPValue::LongUInt(number) => HeaderValue::Integer(i64::from(*number)),
                AMQPValue::ShortInt(number) => HeaderValue::Integer(i64::from(*number)),
                AMQPValue::ShortUInt(number) => HeaderValue::Integer(i64::from(*number)),
                _ => return None,
            };
            Some((name.as_str().to_string(), value))
        })
        .collect()
}

#[async_trait]
impl TransportService for RabbitMqTransport {
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        if self.declared_queues.read().await.contains(queue_name) {
            return Ok(());
        }

        self.setup_dead_letter(queue_name).await?;

        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(format!("{queue_name}_dlx").as_str().into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(queue_name.into()),
        );

        self.channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                args,
            )
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "queue_declare", e.to_string()))?;

        self.declared_queues.write().await.insert(queue_name.to_string());
        debug!(queue = %queue_name, "RabbitMQ queue declared");
        Ok(())
    }

    async fn publish(&self, queue_name: &str, message: OutboundMessage) -> MessagingResult<()> {
        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type(JSON_CONTENT_TYPE.into())
            .with_headers(to_field_table(&message.properties));

        let confirm = self
            .channel
            .basic_publish(
                "",
                queue_name,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| MessagingError::send(queue_name, format!("Publish failed: {e}")))?;

        let confirmation = confirm
            .await
            .map_err(|e| MessagingError::send(queue_name, format!("Publish confirmation failed: {e}")))?;
        if confirmation.is_nack() {
            return Err(MessagingError::send(queue_name, "Broker rejected the message"));
        }
        Ok(())
    }

    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
        _visibility_timeout: Duration,
    ) -> MessagingResult<Vec<ReceivedMessage>> {
        // Visibility is governed by unacked-delivery tracking, not a timeout
        let mut messages = Vec::with_capacity(max_messages);

        for _ in 0..max_messages {
            let fetched = self
                .channel
                .basic_get(queue_name, BasicGetOptions { no_ack: false })
                .await
                .map_err(|e| MessagingError::receive(queue_name, format!("basic_get failed: {e}")))?;

            let Some(message) = fetched else {
                break;
            };
            let delivery = message.delivery;

            messages.push(ReceivedMessage {
                receipt_handle: ReceiptHandle::from(delivery.delivery_tag),
                properties: from_field_table(delivery.properties.headers().as_ref()),
                body: delivery.data,
                receive_count: if delivery.redelivered { 2 } else { 1 },
                enqueued_at: Utc::now(),
            });
        }

        Ok(messages)
    }

    async fn ack(&self, queue_name: &str, receipt_handle: &ReceiptHandle) -> MessagingResult<()> {
        let delivery_tag = Self::parse_delivery_tag(receipt_handle)?;
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| MessagingError::acknowledge(queue_name, format!("ack failed: {e}")))
    }

    async fn nack(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> MessagingResult<()> {
        let delivery_tag = Self::parse_delivery_tag(receipt_handle)?;
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    requeue,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MessagingError::acknowledge(queue_name, format!("nack failed: {e}")))
    }

    async fn health_check(&self) -> MessagingResult<bool> {
        if self.connection.status().connected() {
            Ok(true)
        } else {
            Err(MessagingError::health_check("RabbitMQ connection is not connected"))
        }
    }

    fn binding_name(&self) -> &'static str {
        "rabbitmq"
    }
}
