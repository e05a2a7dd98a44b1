//! Job store factory
//!
//! Builds the backend selected by `database_target`.

use crate::adapters::cosmosdb::{CosmosDbClient, CosmosJobStore};
use crate::adapters::database::traits::JobStore;
use crate::adapters::memory::MemoryJobStore;
use crate::adapters::postgresql::{PostgreSQLClient, PostgreSQLJobStore};
use crate::config::schema::{DatabaseTarget, JobQueueConfig};
use crate::domain::{JobQueueError, Result};
use std::sync::Arc;

/// Create a job store based on the configuration
///
/// # Errors
///
/// Returns an error if the backend section is missing or the client cannot
/// be created
pub async fn create_job_store(config: &JobQueueConfig) -> Result<Arc<dyn JobStore>> {
    match config.database_target {
        DatabaseTarget::CosmosDB => {
            let cosmos_config = config.cosmosdb.as_ref().ok_or_else(|| {
                JobQueueError::Configuration(
                    "cosmosdb configuration is required when database_target = 'cosmosdb'"
                        .to_string(),
                )
            })?;

            tracing::info!("Creating Cosmos DB job store");
            let client = CosmosDbClient::new(cosmos_config.clone()).await?;
            Ok(Arc::new(CosmosJobStore::new(client)) as Arc<dyn JobStore>)
        }
        DatabaseTarget::PostgreSQL => {
            let pg_config = config.postgresql.as_ref().ok_or_else(|| {
                JobQueueError::Configuration(
                    "postgresql configuration is required when database_target = 'postgresql'"
                        .to_string(),
                )
            })?;

            tracing::info!("Creating PostgreSQL job store");
            let client = PostgreSQLClient::new(pg_config.clone()).await?;
            Ok(Arc::new(PostgreSQLJobStore::new(client)) as Arc<dyn JobStore>)
        }
        DatabaseTarget::Memory => {
            tracing::warn!("Using the in-memory job store; jobs are lost when the process exits");
            Ok(Arc::new(MemoryJobStore::new()) as Arc<dyn JobStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApplicationConfig, Environment, LoggingConfig, QueueConfig};

    fn config(target: DatabaseTarget) -> JobQueueConfig {
        JobQueueConfig {
            application: ApplicationConfig::default(),
            environment: Environment::Development,
            database_target: target,
            cosmosdb: None,
            postgresql: None,
            queue: QueueConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_from_config() {
        let store = create_job_store(&config(DatabaseTarget::Memory)).await.unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_missing_section_is_configuration_error() {
        let err = create_job_store(&config(DatabaseTarget::PostgreSQL))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, JobQueueError::Configuration(_)));
    }
}
