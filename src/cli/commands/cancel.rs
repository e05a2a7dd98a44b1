//! Cancel command implementation

use crate::cli::commands::connect;
use crate::core::queue::QueueClient;
use crate::domain::{GroupId, QueueType};
use clap::Args;

/// Arguments for the cancel command
#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Queue the group lives in
    #[arg(long)]
    pub queue_type: QueueType,

    /// Group to cancel
    #[arg(long)]
    pub group_id: GroupId,
}

impl CancelArgs {
    /// Execute the cancel command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let (config, store) = match connect(config_path).await {
            Ok(connected) => connected,
            Err(code) => return Ok(code),
        };

        let client = QueueClient::new(store, config.worker_name(), &config.queue)?;
        match client.cancel_group(self.queue_type, self.group_id).await {
            Ok(0) => {
                println!(
                    "No unfinished jobs in group {} on queue {}.",
                    self.group_id, self.queue_type
                );
                Ok(0)
            }
            Ok(flagged) => {
                println!(
                    "🛑 Cancellation requested for {flagged} job(s) in group {}",
                    self.group_id
                );
                println!("   Running partitions stop at their next heartbeat.");
                Ok(0)
            }
            Err(e) => {
                tracing::error!(error = %e, "Cancel failed");
                eprintln!("❌ Failed to cancel group: {e}");
                Ok(5)
            }
        }
    }
}
