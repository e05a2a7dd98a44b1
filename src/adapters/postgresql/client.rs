//! PostgreSQL client implementation
//!
//! Connection pooling, TLS selection and statement execution for the
//! PostgreSQL job store.

use crate::adapters::postgresql::errors::{pool_error, store_error};
use crate::config::schema::PostgreSQLConfig;
use crate::domain::{JobQueueError, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio_postgres::config::SslMode;
use tokio_postgres::{NoTls, Row};

/// Pooled PostgreSQL connection for the job store
pub struct PostgreSQLClient {
    pool: Pool,
    config: PostgreSQLConfig,
}

impl PostgreSQLClient {
    /// Create a new PostgreSQL client
    ///
    /// No connection is opened until the first statement runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection string is invalid or the TLS
    /// connector or pool cannot be built.
    pub async fn new(config: PostgreSQLConfig) -> Result<Self> {
        let mut pg_config: tokio_postgres::Config = config
            .connection_string
            .expose_secret()
            .as_str()
            .parse()
            .map_err(|e| {
                JobQueueError::Configuration(format!(
                    "Invalid PostgreSQL connection string: {}",
                    e
                ))
            })?;

        let manager_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let manager = match config.ssl_mode.as_str() {
            "disable" => {
                pg_config.ssl_mode(SslMode::Disable);
                Manager::from_config(pg_config, NoTls, manager_config)
            }
            mode => {
                pg_config.ssl_mode(if config.requires_tls() {
                    SslMode::Require
                } else {
                    SslMode::Prefer
                });
                Manager::from_config(pg_config, tls_connector(mode)?, manager_config)
            }
        };

        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let pool = Pool::builder(manager)
            .max_size(config.max_connections)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .recycle_timeout(Some(timeout))
            .runtime(deadpool_postgres::Runtime::Tokio1)
            .build()
            .map_err(|e| {
                JobQueueError::Configuration(format!("Failed to create connection pool: {}", e))
            })?;

        Ok(Self { pool, config })
    }

    /// Test the connection to PostgreSQL
    pub async fn test_connection(&self) -> Result<()> {
        let client = self.get_connection().await?;

        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(|e| store_error(e, "Connection test failed"))?;

        tracing::info!(
            target_db = %self.connection_string_safe(),
            "PostgreSQL connection test successful"
        );
        Ok(())
    }

    /// Create the job table, sequence and indexes if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.get_connection().await?;

        let migration_sql = include_str!("../../../migrations/001_job_queue.sql");

        client
            .batch_execute(migration_sql)
            .await
            .map_err(|e| store_error(e, "Failed to execute migration"))?;

        tracing::info!("PostgreSQL job_queue schema initialized");
        Ok(())
    }

    /// Get a connection from the pool with the statement timeout applied
    pub async fn get_connection(&self) -> Result<deadpool_postgres::Object> {
        let client = self.pool.get().await.map_err(pool_error)?;

        let timeout_query = format!(
            "SET statement_timeout = {}",
            self.config.statement_timeout_seconds * 1000
        );
        client
            .batch_execute(&timeout_query)
            .await
            .map_err(|e| store_error(e, "Failed to set statement timeout"))?;

        Ok(client)
    }

    /// Execute a query and return rows
    pub async fn query(
        &self,
        query: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<Row>> {
        let client = self.get_connection().await?;
        Ok(client
            .query(query, params)
            .await
            .map_err(|e| store_error(e, "Query failed"))?)
    }

    /// Execute a statement and return the number of affected rows
    pub async fn execute(
        &self,
        statement: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<u64> {
        let client = self.get_connection().await?;
        Ok(client
            .execute(statement, params)
            .await
            .map_err(|e| store_error(e, "Statement execution failed"))?)
    }

    /// Get the connection string (without credentials)
    pub fn connection_string_safe(&self) -> String {
        redact_connection_string(self.config.connection_string.expose_secret().as_str())
    }

    /// Get the pool statistics
    pub fn pool_status(&self) -> deadpool_postgres::Status {
        self.pool.status()
    }
}

fn tls_connector(ssl_mode: &str) -> Result<postgres_native_tls::MakeTlsConnector> {
    let mut builder = native_tls::TlsConnector::builder();
    match ssl_mode {
        "verify-full" => {}
        "verify-ca" => {
            builder.danger_accept_invalid_hostnames(true);
        }
        // allow, prefer and require encrypt without verifying the peer
        _ => {
            builder.danger_accept_invalid_certs(true);
        }
    }

    let connector = builder.build().map_err(|e| {
        JobQueueError::Configuration(format!("Failed to build TLS connector: {}", e))
    })?;
    Ok(postgres_native_tls::MakeTlsConnector::new(connector))
}

fn redact_connection_string(connection_string: &str) -> String {
    connection_string
        .rsplit_once('@')
        .map(|(_, host)| format!("postgresql://***@{}", host))
        .unwrap_or_else(|| "postgresql://***".to_string())
}
