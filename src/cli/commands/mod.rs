//! CLI command implementations
//!
//! Every command returns its process exit code: 0 success, 2 configuration
//! error, 4 connection error, 5 fatal error.

pub mod cancel;
pub mod enqueue;
pub mod init;
pub mod status;
pub mod validate;
pub mod worker;

use crate::adapters::database::{create_job_store, JobStore};
use crate::config::{load_config, JobQueueConfig};
use std::sync::Arc;

/// Load the configuration and connect to the configured job store
///
/// On failure the error is printed and the exit code is returned instead.
pub(crate) async fn connect(
    config_path: &str,
) -> std::result::Result<(JobQueueConfig, Arc<dyn JobStore>), i32> {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            eprintln!("❌ Failed to load configuration file");
            eprintln!("   Error: {e}");
            return Err(2);
        }
    };

    match create_job_store(&config).await {
        Ok(store) => Ok((config, store)),
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to job store");
            eprintln!("❌ Failed to connect to database");
            eprintln!("   Error: {e}");
            Err(4)
        }
    }
}
