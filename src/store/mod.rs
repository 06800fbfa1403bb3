//! # Run Store
//!
//! Persistence of runs and jobs behind [`RunStore`]. PostgreSQL backs
//! production deployments; [`InMemoryRunStore`] runs the orchestrator
//! without a database.

pub mod errors;
pub mod in_memory;
pub mod postgres;
pub mod traits;

use std::sync::Arc;
use tracing::info;

use crate::config::DatabaseConfig;

pub use errors::{StoreError, StoreResult};
pub use in_memory::InMemoryRunStore;
pub use postgres::PostgresRunStore;
pub use traits::{RunStore, RunTransaction};

/// Connect the store selected by configuration; an empty URL selects memory
pub async fn connect(config: &DatabaseConfig) -> StoreResult<Arc<dyn RunStore>> {
    if !config.is_configured() {
        info!("No database URL configured, using in-memory run store");
        return Ok(Arc::new(InMemoryRunStore::new()));
    }
    Ok(Arc::new(PostgresRunStore::connect(config).await?))
}
