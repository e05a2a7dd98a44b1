//! Cosmos DB client implementation
//!
//! Connection setup and database/container provisioning for the Cosmos DB
//! job store.

use crate::adapters::cosmosdb::errors::store_error;
use crate::config::CosmosDbConfig;
use crate::domain::{JobQueueError, Result};
use azure_core::credentials::Secret;
use azure_data_cosmos::clients::{ContainerClient, DatabaseClient};
use azure_data_cosmos::models::{ContainerProperties, IndexingPolicy, PartitionKeyDefinition};
use azure_data_cosmos::{CosmosClient, CosmosClientOptions};
use std::borrow::Cow;

/// Partition key path of the job container
pub const JOB_PARTITION_KEY_PATH: &str = "/queue_type";

/// Cosmos DB connection for the job store
pub struct CosmosDbClient {
    client: CosmosClient,
    database: DatabaseClient,
    config: CosmosDbConfig,
}

impl CosmosDbClient {
    /// Create a new Cosmos DB client
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint or key cannot be used to build a
    /// client.
    pub async fn new(config: CosmosDbConfig) -> Result<Self> {
        use secrecy::ExposeSecret;

        let key = Secret::new(config.key.expose_secret().as_str().to_string());
        let options = Some(CosmosClientOptions::default());

        let client = CosmosClient::with_key(&config.endpoint, key, options).map_err(|e| {
            JobQueueError::Configuration(format!("Failed to create Cosmos client: {e}"))
        })?;

        let database = client.database_client(&config.database_name);

        Ok(Self {
            client,
            database,
            config,
        })
    }

    /// Test the connection by reading the database
    pub async fn test_connection(&self) -> Result<()> {
        self.database
            .read(None)
            .await
            .map_err(|e| store_error(e, "Cosmos DB connection test failed"))?;

        tracing::info!(
            database = %self.config.database_name,
            "Cosmos DB connection test successful"
        );
        Ok(())
    }

    /// Create the database and the job container if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        self.ensure_database_exists().await?;
        self.ensure_job_container_exists().await
    }

    async fn ensure_database_exists(&self) -> Result<()> {
        match self.database.read(None).await {
            Ok(_) => {
                tracing::debug!(database = %self.config.database_name, "Database already exists");
                Ok(())
            }
            Err(_) => {
                tracing::info!(database = %self.config.database_name, "Creating database");
                self.client
                    .create_database(&self.config.database_name, None)
                    .await
                    .map_err(|e| {
                        store_error(
                            e,
                            &format!("Failed to create database {}", self.config.database_name),
                        )
                    })?;
                Ok(())
            }
        }
    }

    async fn ensure_job_container_exists(&self) -> Result<()> {
        let container_name = &self.config.job_container;
        let container = self.database.container_client(container_name);

        if container.read(None).await.is_ok() {
            tracing::debug!(container = %container_name, "Job container already exists");
            return Ok(());
        }

        tracing::info!(container = %container_name, "Creating job container");

        let properties = ContainerProperties {
            id: Cow::Owned(container_name.clone()),
            partition_key: PartitionKeyDefinition {
                paths: vec![JOB_PARTITION_KEY_PATH.to_string()],
                kind: azure_data_cosmos::models::PartitionKeyKind::Hash,
                version: None,
            },
            indexing_policy: Some(IndexingPolicy::default()),
            ..Default::default()
        };

        self.database
            .create_container(properties, None)
            .await
            .map_err(|e| store_error(e, &format!("Failed to create container {container_name}")))?;

        tracing::info!(container = %container_name, "Job container created");
        Ok(())
    }

    /// Client for the job container
    pub fn job_container(&self) -> ContainerClient {
        self.database.container_client(&self.config.job_container)
    }

    /// Get the database name
    pub fn database_name(&self) -> &str {
        &self.config.database_name
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn config(&self) -> &CosmosDbConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::secret_string;

    fn config() -> CosmosDbConfig {
        CosmosDbConfig {
            endpoint: "https://jobs.documents.azure.com:443/".to_string(),
            key: secret_string("dGVzdC1rZXk=".to_string()),
            database_name: "fhir".to_string(),
            job_container: "job_queue".to_string(),
            max_concurrency: 10,
            request_timeout_seconds: 30,
        }
    }

    #[tokio::test]
    async fn test_new_does_not_connect() {
        let client = CosmosDbClient::new(config()).await.unwrap();
        assert_eq!(client.database_name(), "fhir");
        assert_eq!(client.endpoint(), "https://jobs.documents.azure.com:443/");
        assert_eq!(client.config().job_container, "job_queue");
    }
}
