//! Enqueue command implementation
//!
//! Submits a bulk operation as a new job group. The root definition is
//! either built from the range arguments or given verbatim as JSON.

use crate::cli::commands::connect;
use crate::core::bulk::{BulkOperationRequest, BULK_COORDINATOR_TYPE};
use crate::core::queue::QueueClient;
use crate::domain::{JobDefinition, QueueType};
use clap::Args;

/// Arguments for the enqueue command
#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Queue to submit to (export, reindex, import, bulk_delete)
    #[arg(long)]
    pub queue_type: QueueType,

    /// Resource types to cover (comma-separated)
    #[arg(long, value_delimiter = ',', conflicts_with = "definition")]
    pub resource_types: Vec<String>,

    /// First surrogate id, inclusive
    #[arg(long, default_value_t = 0)]
    pub start_id: i64,

    /// Last surrogate id, exclusive
    #[arg(long)]
    pub end_id: Option<i64>,

    /// Ids per partition
    #[arg(long, default_value_t = 10_000)]
    pub partition_size: i64,

    /// Ids per batch inside a partition
    #[arg(long, default_value_t = 1_000)]
    pub batch_size: i64,

    /// Raw root definition as JSON, e.g. '{"type_id": "...", "payload": {}}'
    #[arg(long)]
    pub definition: Option<String>,
}

impl EnqueueArgs {
    /// Root definition described by the arguments
    pub fn root_definition(&self) -> Result<JobDefinition, String> {
        if let Some(raw) = &self.definition {
            return JobDefinition::parse(raw).map_err(|e| e.to_string());
        }

        let end_id = self
            .end_id
            .ok_or_else(|| "--end-id is required unless --definition is given".to_string())?;
        let request = BulkOperationRequest {
            resource_types: self.resource_types.clone(),
            start_id: self.start_id,
            end_id,
            partition_size: self.partition_size,
            batch_size: self.batch_size,
        };
        request.validate()?;

        JobDefinition::from_payload(BULK_COORDINATOR_TYPE, &request).map_err(|e| e.to_string())
    }

    /// Execute the enqueue command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let definition = match self.root_definition() {
            Ok(d) => d,
            Err(e) => {
                eprintln!("❌ Invalid bulk operation: {e}");
                return Ok(2);
            }
        };

        let (config, store) = match connect(config_path).await {
            Ok(connected) => connected,
            Err(code) => return Ok(code),
        };

        let client = QueueClient::new(store, config.worker_name(), &config.queue)?;
        match client.enqueue_group(self.queue_type, &[definition]).await {
            Ok(group_id) => {
                println!("✅ Enqueued group {group_id} on queue {}", self.queue_type);
                println!();
                println!("Track progress with:");
                println!(
                    "  fhir-jobqueue status --queue-type {} --group-id {group_id}",
                    self.queue_type
                );
                Ok(0)
            }
            Err(e) => {
                tracing::error!(error = %e, "Enqueue failed");
                eprintln!("❌ Failed to enqueue: {e}");
                Ok(5)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> EnqueueArgs {
        EnqueueArgs {
            queue_type: QueueType::Reindex,
            resource_types: vec!["Patient".to_string()],
            start_id: 0,
            end_id: Some(100),
            partition_size: 50,
            batch_size: 10,
            definition: None,
        }
    }

    #[test]
    fn test_range_arguments_build_bulk_request() {
        let definition = args().root_definition().unwrap();
        assert_eq!(definition.type_id, BULK_COORDINATOR_TYPE);

        let request: BulkOperationRequest = definition.payload_as().unwrap();
        assert_eq!(request.end_id, 100);
        assert_eq!(request.partition_size, 50);
    }

    #[test]
    fn test_end_id_required_without_definition() {
        let mut args = args();
        args.end_id = None;
        assert!(args.root_definition().is_err());
    }

    #[test]
    fn test_raw_definition_is_used_verbatim() {
        let mut args = args();
        args.definition = Some(r#"{"type_id": "custom", "payload": {"x": 1}}"#.to_string());
        let definition = args.root_definition().unwrap();
        assert_eq!(definition.type_id, "custom");
        assert_eq!(definition.payload["x"], 1);
    }
}
