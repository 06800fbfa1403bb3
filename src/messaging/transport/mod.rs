//! # Message Transport
//!
//! Broker-agnostic transport. [`TransportService`] is the one interface every
//! binding implements; [`TransportProvider`] dispatches to the configured
//! binding; [`MessageSender`] and [`MessageReceiver`] add typing, header
//! encoding and acknowledgment policy on top.

pub mod factory;
pub mod in_memory;
pub mod pgmq;
pub mod provider;
pub mod rabbitmq;
pub mod receiver;
pub mod sender;
pub mod traits;
pub mod types;

pub use factory::TransportFactory;
pub use in_memory::InMemoryTransport;
pub use pgmq::PgmqTransport;
pub use provider::{BindingKind, TransportProvider};
pub use rabbitmq::RabbitMqTransport;
pub use receiver::{DeliveryOutcome, MessageHandler, MessageReceiver, ReceiverConfig};
pub use sender::MessageSender;
pub use traits::TransportService;
pub use types::{OutboundMessage, ReceiptHandle, ReceivedMessage};
