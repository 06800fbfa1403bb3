//! # Messaging Error Types
//!
//! Structured transport errors shared by every binding. Callers only need
//! two questions answered: can the operation be retried, and is the message
//! itself unreadable.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Database query error: {operation}: {message}")]
    DatabaseQuery { operation: String, message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Send failed on {queue_name}: {message}")]
    Send { queue_name: String, message: String },

    #[error("Receive failed on {queue_name}: {message}")]
    Receive { queue_name: String, message: String },

    #[error("Acknowledgment failed on {queue_name}: {message}")]
    Acknowledge { queue_name: String, message: String },

    #[error("Invalid receipt handle: {handle}")]
    InvalidReceiptHandle { handle: String },

    #[error("Message not found: {message_id}")]
    MessageNotFound { message_id: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Invalid message header attribute '{attribute}': {reason}")]
    InvalidHeader { attribute: String, reason: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Network timeout: operation {operation} timed out after {timeout_seconds}s")]
    Timeout {
        operation: String,
        timeout_seconds: u64,
    },

    #[error("Health check failed: {message}")]
    HealthCheck { message: String },
}

impl MessagingError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn database_query(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DatabaseQuery {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    pub fn send(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Send {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    pub fn receive(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Receive {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    pub fn acknowledge(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Acknowledge {
            queue_name: queue_name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_receipt_handle(handle: impl Into<String>) -> Self {
        Self::InvalidReceiptHandle {
            handle: handle.into(),
        }
    }

    pub fn message_not_found(message_id: impl Into<String>) -> Self {
        Self::MessageNotFound {
            message_id: message_id.into(),
        }
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    pub fn invalid_header(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidHeader {
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_seconds,
        }
    }

    pub fn health_check(message: impl Into<String>) -> Self {
        Self::HealthCheck {
            message: message.into(),
        }
    }

    /// Transient broker or network failures that may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::DatabaseQuery { .. }
                | Self::QueueOperation { .. }
                | Self::Send { .. }
                | Self::Receive { .. }
                | Self::Acknowledge { .. }
                | Self::Timeout { .. }
                | Self::HealthCheck { .. }
        )
    }

    /// The delivered message cannot be decoded; redelivery will not help
    pub fn is_poison(&self) -> bool {
        matches!(
            self,
            Self::MessageDeserialization { .. } | Self::InvalidHeader { .. }
        )
    }
}

impl From<sqlx::Error> for MessagingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                MessagingError::database_query("database", db_err.to_string())
            }
            sqlx::Error::PoolTimedOut => MessagingError::timeout("database_pool", 30),
            sqlx::Error::PoolClosed => MessagingError::connection("Database pool is closed"),
            sqlx::Error::Configuration(config_err) => {
                MessagingError::configuration("database", config_err.to_string())
            }
            _ => MessagingError::connection(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            MessagingError::message_deserialization(err.to_string())
        } else {
            MessagingError::message_serialization(err.to_string())
        }
    }
}

impl From<lapin::Error> for MessagingError {
    fn from(err: lapin::Error) -> Self {
        MessagingError::connection(format!("AMQP error: {err}"))
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
