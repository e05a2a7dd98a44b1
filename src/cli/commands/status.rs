//! Status command implementation
//!
//! This module implements the `status` command for displaying the progress
//! of a job group.

use crate::cli::commands::connect;
use crate::core::jobs::GroupSummary;
use crate::domain::{GroupId, QueueType};
use clap::Args;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Queue the group lives in
    #[arg(long)]
    pub queue_type: QueueType,

    /// Group to report on
    #[arg(long)]
    pub group_id: GroupId,

    /// List every job of the group
    #[arg(long)]
    pub jobs: bool,
}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(
            queue_type = %self.queue_type,
            group_id = %self.group_id,
            "Checking group status"
        );

        let (_, store) = match connect(config_path).await {
            Ok(connected) => connected,
            Err(code) => return Ok(code),
        };

        let jobs = match store.get_by_group_id(self.queue_type, self.group_id).await {
            Ok(jobs) => jobs,
            Err(e) => {
                println!("❌ Failed to load group");
                println!("   Error: {e}");
                return Ok(5);
            }
        };

        let Some(summary) = GroupSummary::from_jobs(&jobs) else {
            println!(
                "No group {} found on queue {}.",
                self.group_id, self.queue_type
            );
            return Ok(0);
        };

        summary.log_summary();
        println!("📊 Job Group Status");
        println!();
        print!("{summary}");

        if self.jobs {
            println!();
            println!(
                "{:<12} {:<12} {:<10} {:<10} {:<25}",
                "Job ID", "Status", "Version", "Failures", "Last Heartbeat"
            );
            println!("{}", "-".repeat(72));
            for job in &jobs {
                println!(
                    "{:<12} {:<12} {:<10} {:<10} {:<25}",
                    job.id.to_string(),
                    job.status.to_string(),
                    job.version,
                    job.failure_count,
                    job.heartbeat_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        println!();
        Ok(0)
    }
}
