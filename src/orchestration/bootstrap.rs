//! # Orchestration Bootstrap
//!
//! Connects the run store and every configured transport binding, provisions
//! the queues, and starts the orchestrator receive loop plus the
//! reconciliation sweep. Any connection failure is returned to the caller;
//! the binary treats it as fatal.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::orchestrator::Orchestrator;
use super::reconciler::Reconciler;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::messaging::{MessagingResult, TransportFactory, ORCHESTRATOR_ENDPOINT};
use crate::store::{self, RunStore};

/// Running orchestration system
pub struct OrchestrationSystemHandle {
    orchestrator: Arc<Orchestrator>,
    factory: TransportFactory,
    shutdown_sender: watch::Sender<bool>,
    receive_task: Option<JoinHandle<MessagingResult<()>>>,
    reconciler_task: Option<JoinHandle<()>>,
    started_at: DateTime<Utc>,
}

/// Point-in-time view of the system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemStatus {
    pub running: bool,
    pub store_backend: &'static str,
    pub store_healthy: bool,
    pub transport_healthy: bool,
    pub reconciliation_running: bool,
    pub started_at: DateTime<Utc>,
}

pub struct OrchestrationSystem;

impl OrchestrationSystem {
    /// Connect everything named by `config` and start processing
    pub async fn bootstrap(config: &OrchestratorConfig) -> OrchestratorResult<OrchestrationSystemHandle> {
        config.validate()?;

        let store = store::connect(&config.database).await?;
        info!(backend = store.backend_name(), "Run store ready");

        let factory = TransportFactory::connect(config).await?;
        Self::bootstrap_with(config, store, factory).await
    }

    /// Start processing on an already-connected store and transport
    pub async fn bootstrap_with(
        config: &OrchestratorConfig,
        store: Arc<dyn RunStore>,
        factory: TransportFactory,
    ) -> OrchestratorResult<OrchestrationSystemHandle> {
        factory.ensure_queues().await?;

        let orchestrator = Arc::new(Orchestrator::from_factory(store, &factory)?);
        let receiver = factory.create_receiver(ORCHESTRATOR_ENDPOINT, config.processing.receiver_config())?;
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);

        let receive_task = tokio::spawn({
            let handler = Arc::clone(&orchestrator);
            let shutdown = shutdown_receiver.clone();
            async move { receiver.receive(handler, shutdown).await }
        });

        let reconciler_task = if config.reconciliation.enabled {
            let reconciler = Reconciler::new(Arc::clone(&orchestrator), config.reconciliation.clone());
            let shutdown = shutdown_receiver.clone();
            Some(tokio::spawn(async move { reconciler.run(shutdown).await }))
        } else {
            info!("Reconciliation sweep disabled");
            None
        };

        info!(
            orchestrator_queue = %factory.config().queue_name_for(ORCHESTRATOR_ENDPOINT.kind()),
            reconciliation_enabled = config.reconciliation.enabled,
            "Orchestration system started"
        );

        Ok(OrchestrationSystemHandle {
            orchestrator,
            factory,
            shutdown_sender,
            receive_task: Some(receive_task),
            reconciler_task,
            started_at: Utc::now(),
        })
    }
}

impl OrchestrationSystemHandle {
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn factory(&self) -> &TransportFactory {
        &self.factory
    }

    pub fn is_running(&self) -> bool {
        self.receive_task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub async fn status(&self) -> SystemStatus {
        let store = self.orchestrator.store();
        SystemStatus {
            running: self.is_running(),
            store_backend: store.backend_name(),
            store_healthy: store.health_check().await.unwrap_or(false),
            transport_healthy: self.factory.health_check().await.unwrap_or(false),
            reconciliation_running: self
                .reconciler_task
                .as_ref()
                .is_some_and(|task| !task.is_finished()),
            started_at: self.started_at,
        }
    }

    /// Signal shutdown and wait for in-flight handlers to finish
    pub async fn stop(&mut self) -> OrchestratorResult<()> {
        let Some(receive_task) = self.receive_task.take() else {
            warn!("Orchestration system already stopped");
            return Ok(());
        };

        // Receivers may already be gone if both tasks ended on their own
        let _ = self.shutdown_sender.send(true);
        info!("Orchestration system shutdown requested");

        if let Some(reconciler_task) = self.reconciler_task.take() {
            if let Err(e) = reconciler_task.await {
                error!(error = %e, "Reconciliation task panicked");
            }
        }

        let result = match receive_task.await {
            Ok(result) => result.map_err(OrchestratorError::from),
            Err(e) => Err(OrchestratorError::internal(format!("receive loop panicked: {e}"))),
        };
        info!("Orchestration system stopped");
        result
    }
}
