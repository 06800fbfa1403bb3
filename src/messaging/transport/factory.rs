//! # Transport Factory
//!
//! Builds typed senders and receivers from configuration. Every binding that
//! at least one endpoint resolves to is connected once at startup; a failed
//! connection is returned to the caller, which treats it as fatal.

use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::in_memory::InMemoryTransport;
use super::pgmq::PgmqTransport;
use super::provider::{BindingKind, TransportProvider};
use super::rabbitmq::RabbitMqTransport;
use super::receiver::{MessageReceiver, ReceiverConfig};
use super::sender::MessageSender;
use crate::config::{OrchestratorConfig, PgmqConfig, TransportConfig};
use crate::messaging::endpoint::{Endpoint, EndpointKind};
use crate::messaging::errors::{MessagingError, MessagingResult};

#[derive(Debug, Clone)]
pub struct TransportFactory {
    config: TransportConfig,
    providers: HashMap<BindingKind, Arc<TransportProvider>>,
}

impl TransportFactory {
    /// Connect every binding referenced by the endpoint configuration
    pub async fn connect(config: &OrchestratorConfig) -> MessagingResult<Self> {
        let transport = &config.transport;
        let mut providers = HashMap::new();

        for binding in [BindingKind::InMemory, BindingKind::RabbitMq, BindingKind::Pgmq] {
            if !transport.uses(binding) {
                continue;
            }
            let provider = match binding {
                BindingKind::InMemory => TransportProvider::from(Arc::new(InMemoryTransport::new())),
                BindingKind::RabbitMq => TransportProvider::from(RabbitMqTransport::connect(&transport.rabbitmq).await?),
                BindingKind::Pgmq => {
                    let pgmq_config = PgmqConfig {
                        url: transport.pgmq_url(&config.database).to_string(),
                        ..transport.pgmq.clone()
                    };
                    TransportProvider::from(PgmqTransport::connect(&pgmq_config).await?)
                }
            };
            info!(binding = %binding, "Transport binding connected");
            providers.insert(binding, Arc::new(provider));
        }

        Ok(Self {
            config: transport.clone(),
            providers,
        })
    }

    /// Route every endpoint through one already-connected provider
    pub fn with_provider(config: TransportConfig, provider: Arc<TransportProvider>) -> Self {
        let providers = [BindingKind::InMemory, BindingKind::RabbitMq, BindingKind::Pgmq]
            .into_iter()
            .map(|binding| (binding, Arc::clone(&provider)))
            .collect();
        Self { config, providers }
    }

    /// Every endpoint on one shared in-memory transport, default queue names
    pub fn in_memory(transport: Arc<InMemoryTransport>) -> Self {
        Self::with_provider(
            TransportConfig::default(),
            Arc::new(TransportProvider::from(transport)),
        )
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn provider_for(&self, kind: EndpointKind) -> MessagingResult<Arc<TransportProvider>> {
        let binding = self.config.binding_for(kind);
        self.providers.get(&binding).cloned().ok_or_else(|| {
            MessagingError::configuration(
                "transport",
                format!("binding '{binding}' for endpoint '{kind}' is not connected"),
            )
        })
    }

    pub fn create_sender<T>(&self, endpoint: Endpoint<T>) -> MessagingResult<MessageSender<T>> {
        let kind = endpoint.kind();
        Ok(MessageSender::new(endpoint, self.config.queue_name_for(kind), self.provider_for(kind)?)
            .with_publish_timeout(self.config.publish_timeout()))
    }

    pub fn create_receiver<T>(
        &self,
        endpoint: Endpoint<T>,
        receiver_config: ReceiverConfig,
    ) -> MessagingResult<MessageReceiver<T>> {
        let kind = endpoint.kind();
        Ok(MessageReceiver::new(
            endpoint,
            self.config.queue_name_for(kind),
            self.provider_for(kind)?,
            receiver_config,
        ))
    }

    /// Provision the queue behind every endpoint
    pub async fn ensure_queues(&self) -> MessagingResult<()> {
        for kind in EndpointKind::all() {
            let queue_name = self.config.queue_name_for(kind);
            self.provider_for(kind)?.ensure_queue(&queue_name).await?;
        }
        Ok(())
    }

    /// Healthy only when every connected binding is healthy; bindings are probed concurrently
    pub async fn health_check(&self) -> MessagingResult<bool> {
        let probes = self.providers.values().map(|provider| provider.health_check());
        let results = try_join_all(probes).await?;
        Ok(results.into_iter().all(|healthy| healthy))
    }
}
