//! Range planning for bulk operations
//!
//! A bulk request names resource types and a surrogate id range. The
//! planner cuts it into one partition per resource type and id window.

use crate::core::jobs::registry::Planner;
use crate::domain::{JobDefinition, JobQueueError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Root payload of a bulk export, reindex, import or delete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOperationRequest {
    pub resource_types: Vec<String>,

    /// First surrogate id, inclusive
    pub start_id: i64,

    /// Last surrogate id, exclusive
    pub end_id: i64,

    /// Ids per partition
    pub partition_size: i64,

    /// Ids per batch inside a partition
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
}

fn default_batch_size() -> i64 {
    100
}

impl BulkOperationRequest {
    /// Validates the request
    ///
    /// # Errors
    ///
    /// Returns an error if any values are out of range
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.resource_types.is_empty() {
            return Err("resource_types cannot be empty".to_string());
        }
        if let Some(blank) = self.resource_types.iter().find(|t| t.trim().is_empty()) {
            return Err(format!("resource type '{blank}' is blank"));
        }
        if self.end_id < self.start_id {
            return Err(format!(
                "end_id ({}) must not be below start_id ({})",
                self.end_id, self.start_id
            ));
        }
        if self.partition_size <= 0 {
            return Err(format!(
                "partition_size must be > 0, got {}",
                self.partition_size
            ));
        }
        if self.batch_size <= 0 {
            return Err(format!("batch_size must be > 0, got {}", self.batch_size));
        }
        Ok(())
    }
}

/// One child's slice of a bulk request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangePartition {
    pub resource_type: String,
    pub start_id: i64,
    pub end_id: i64,
    pub batch_size: i64,
}

/// Split `request` into partitions, resource type by resource type
pub fn plan_ranges(request: &BulkOperationRequest) -> Vec<RangePartition> {
    let mut partitions = Vec::new();
    for resource_type in &request.resource_types {
        let mut start = request.start_id;
        while start < request.end_id {
            let end = start.saturating_add(request.partition_size).min(request.end_id);
            partitions.push(RangePartition {
                resource_type: resource_type.clone(),
                start_id: start,
                end_id: end,
                batch_size: request.batch_size,
            });
            start = end;
        }
    }
    partitions
}

/// [`Planner`] for [`BulkOperationRequest`] payloads
pub struct RangePlanner {
    partition_type_id: String,
}

impl RangePlanner {
    /// Partitions are emitted with `partition_type_id` as their type
    pub fn new(partition_type_id: impl Into<String>) -> Self {
        Self {
            partition_type_id: partition_type_id.into(),
        }
    }
}

#[async_trait]
impl Planner for RangePlanner {
    async fn plan(&self, definition: &JobDefinition) -> Result<Vec<JobDefinition>> {
        let request: BulkOperationRequest = definition.payload_as()?;
        request.validate().map_err(JobQueueError::Planning)?;

        let partitions = plan_ranges(&request);
        tracing::info!(
            resource_types = request.resource_types.len(),
            partitions = partitions.len(),
            "Bulk operation planned"
        );

        partitions
            .iter()
            .map(|partition| JobDefinition::from_payload(self.partition_type_id.clone(), partition))
            .collect()
    }
}
