//! # PGMQ Transport
//!
//! PostgreSQL message queue binding driven through the `pgmq` SQL functions
//! with `sqlx`. Header properties are stored in the message `headers` JSONB
//! column, the payload in the `message` column. Nack without requeue
//! archives the message, which is PGMQ's dead-letter.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info, warn};

use super::traits::TransportService;
use super::types::{OutboundMessage, ReceiptHandle, ReceivedMessage};
use crate::config::PgmqConfig;
use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::message::HeaderProperties;

/// PGMQ limits queue names so that derived table names stay valid identifiers
const MAX_QUEUE_NAME_LENGTH: usize = 47;

#[derive(Debug, FromRow)]
struct PgmqMessageRow {
    msg_id: i64,
    read_ct: i32,
    enqueued_at: DateTime<Utc>,
    message: Option<Json<Value>>,
    headers: Option<Json<Value>>,
}

/// PGMQ transport binding
#[derive(Debug, Clone)]
pub struct PgmqTransport {
    pool: PgPool,
}

impl PgmqTransport {
    pub async fn connect(config: &PgmqConfig) -> MessagingResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await
            .map_err(|e| MessagingError::connection(format!("PGMQ database connection failed: {e}")))?;

        info!(max_connections = config.max_connections, "PGMQ transport connected");
        Ok(Self { pool })
    }

    /// Use an existing pool (shared with the run store)
    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn validate_queue_name(queue_name: &str) -> MessagingResult<()> {
        let valid_chars = queue_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if queue_name.is_empty() || queue_name.len() > MAX_QUEUE_NAME_LENGTH || !valid_chars {
            return Err(MessagingError::configuration(
                "pgmq",
                format!("invalid queue name '{queue_name}': use up to {MAX_QUEUE_NAME_LENGTH} alphanumeric or '_' characters"),
            ));
        }
        Ok(())
    }

    fn parse_message_id(receipt_handle: &ReceiptHandle) -> MessagingResult<i64> {
        receipt_handle
            .as_str()
            .parse()
            .map_err(|_| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
    }

    fn decode_headers(msg_id: i64, headers: Option<Json<Value>>) -> HeaderProperties {
        match headers {
            Some(Json(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!(msg_id = msg_id, error = %e, "PGMQ message headers are not a flat attribute map");
                HeaderProperties::default()
            }),
            None => HeaderProperties::default(),
        }
    }
}

#[async_trait]
impl TransportService for PgmqTransport {
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        Self::validate_queue_name(queue_name)?;
        sqlx::query("SELECT pgmq.create($1::text)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "create", e.to_string()))?;
        debug!(queue = %queue_name, "PGMQ queue ensured");
        Ok(())
    }

    async fn publish(&self, queue_name: &str, message: OutboundMessage) -> MessagingResult<()> {
        let body: Value = serde_json::from_slice(&message.body)
            .map_err(|e| MessagingError::message_serialization(format!("PGMQ bodies must be JSON: {e}")))?;
        let headers = serde_json::to_value(&message.properties)
            .map_err(|e| MessagingError::message_serialization(e.to_string()))?;

        sqlx::query_scalar::<_, i64>("SELECT pgmq.send($1::text, $2::jsonb, $3::jsonb)")
            .bind(queue_name)
            .bind(Json(body))
            .bind(Json(headers))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::send(queue_name, e.to_string()))?;
        Ok(())
    }

    async fn receive(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> MessagingResult<Vec<ReceivedMessage>> {
        let vt_seconds = i32::try_from(visibility_timeout.as_secs()).unwrap_or(i32::MAX);
        let qty = i32::try_from(max_messages).unwrap_or(i32::MAX);

        let rows = sqlx::query_as::<_, PgmqMessageRow>(
            r#"
            SELECT msg_id, read_ct, enqueued_at, message, headers
            FROM pgmq.read($1::text, $2::integer, $3::integer)
            "#,
        )
        .bind(queue_name)
        .bind(vt_seconds)
        .bind(qty)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MessagingError::receive(queue_name, e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let body = serde_json::to_vec(&row.message.map(|Json(v)| v).unwrap_or(Value::Null))
                    .map_err(|e| MessagingError::message_deserialization(e.to_string()))?;
                Ok(ReceivedMessage {
                    receipt_handle: ReceiptHandle::from(row.msg_id),
                    properties: Self::decode_headers(row.msg_id, row.headers),
                    body,
                    receive_count: u32::try_from(row.read_ct).unwrap_or(1),
                    enqueued_at: row.enqueued_at,
                })
            })
            .collect()
    }

    async fn ack(&self, queue_name: &str, receipt_handle: &ReceiptHandle) -> MessagingResult<()> {
        let msg_id = Self::parse_message_id(receipt_handle)?;
        let deleted: bool = sqlx::query_scalar("SELECT pgmq.delete($1::text, $2::bigint)")
            .bind(queue_name)
            .bind(msg_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::acknowledge(queue_name, e.to_string()))?;

        if deleted {
            Ok(())
        } else {
            Err(MessagingError::message_not_found(msg_id.to_string()))
        }
    }

    async fn nack(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> MessagingResult<()> {
        let msg_id = Self::parse_message_id(receipt_handle)?;

        if requeue {
            sqlx::query("SELECT msg_id FROM pgmq.set_vt($1::text, $2::bigint, 0)")
                .bind(queue_name)
                .bind(msg_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| MessagingError::acknowledge(queue_name, e.to_string()))?;
            return Ok(());
        }

        let archived: bool = sqlx::query_scalar("SELECT pgmq.archive($1::text, $2::bigint)")
            .bind(queue_name)
            .bind(msg_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::acknowledge(queue_name, e.to_string()))?;

        if archived {
            Ok(())
        } else {
            Err(MessagingError::message_not_found(msg_id.to_string()))
        }
    }

    async fn health_check(&self) -> MessagingResult<bool> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::health_check(format!("PGMQ database unreachable: {e}")))?;
        Ok(true)
    }

    fn binding_name(&self) -> &'static str {
        "pgmq"
    }
}
