//! # Messaging
//!
//! Message envelope, payload unions, typed endpoints and the transport layer
//! connecting the orchestrator with the stage workers.

pub mod endpoint;
pub mod errors;
pub mod message;
pub mod payloads;
pub mod transport;

pub use endpoint::{Endpoint, EndpointKind, ORCHESTRATOR_ENDPOINT};
pub use errors::{MessagingError, MessagingResult};
pub use message::{HeaderProperties, HeaderValue, Message, MessageHeader};
pub use payloads::{FailureCause, FailureKind, JobRequest, OrchestratorMessage, WorkerOutcome, WorkerResult};
pub use transport::{
    BindingKind, DeliveryOutcome, InMemoryTransport, MessageHandler, MessageReceiver, MessageSender,
    OutboundMessage, ReceivedMessage, ReceiverConfig, TransportFactory, TransportProvider, TransportService,
};
