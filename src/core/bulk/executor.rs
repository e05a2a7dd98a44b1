//! Range execution for bulk partitions
//!
//! A partition is walked batch by batch. After each batch the position is
//! staged as a checkpoint, so a retried attempt skips what already ran.

use crate::core::bulk::planner::RangePartition;
use crate::core::jobs::context::{ExecutionContext, ExecutionError};
use crate::core::jobs::registry::Executor;
use crate::domain::{JobDefinition, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Boundary to the resource store
///
/// Handles resources of `resource_type` with surrogate ids in
/// `[start_id, end_id)` and returns how many were touched. Must be safe to
/// call again for the same range.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    async fn process_batch(&self, resource_type: &str, start_id: i64, end_id: i64) -> Result<u64>;
}

#[async_trait]
impl<P: BatchProcessor + ?Sized> BatchProcessor for Arc<P> {
    async fn process_batch(&self, resource_type: &str, start_id: i64, end_id: i64) -> Result<u64> {
        (**self).process_batch(resource_type, start_id, end_id).await
    }
}

/// Logs each batch without touching any resources
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunProcessor;

#[async_trait]
impl BatchProcessor for DryRunProcessor {
    async fn process_batch(&self, resource_type: &str, start_id: i64, end_id: i64) -> Result<u64> {
        tracing::info!(
            resource_type = %resource_type,
            start_id,
            end_id,
            "DRY RUN: would process batch"
        );
        Ok(0)
    }
}

/// Progress of a partition, stored in the job's `result`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeCheckpoint {
    /// First id not yet processed
    pub next_id: i64,
    pub processed: u64,
}

/// [`Executor`] for [`RangePartition`] payloads
pub struct RangeExecutor<P> {
    processor: P,
}

impl<P: BatchProcessor> RangeExecutor<P> {
    pub fn new(processor: P) -> Self {
        Self { processor }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }
}

#[async_trait]
impl<P: BatchProcessor> Executor for RangeExecutor<P> {
    async fn execute(
        &self,
        definition: &JobDefinition,
        ctx: &ExecutionContext,
    ) -> std::result::Result<Value, ExecutionError> {
        let partition: RangePartition = definition
            .payload_as()
            .map_err(|e| ExecutionError::Permanent(e.to_string()))?;
        if partition.batch_size <= 0 {
            return Err(ExecutionError::Permanent(format!(
                "batch_size must be > 0, got {}",
                partition.batch_size
            )));
        }

        // A stale or foreign result is not a checkpoint; start over
        let resumed = ctx
            .checkpoint::<RangeCheckpoint>()
            .ok()
            .flatten()
            .filter(|c| c.next_id >= partition.start_id && c.next_id <= partition.end_id);

        let mut checkpoint = resumed.unwrap_or(RangeCheckpoint {
            next_id: partition.start_id,
            processed: 0,
        });
        if resumed.is_some() {
            tracing::info!(
                job_id = %ctx.job().id,
                next_id = checkpoint.next_id,
                processed = checkpoint.processed,
                "Resuming partition from checkpoint"
            );
        }

        while checkpoint.next_id < partition.end_id {
            if let Some(stop) = ctx.should_stop() {
                tracing::info!(job_id = %ctx.job().id, reason = %stop, "Partition stopping");
                return Err(stop);
            }

            let batch_end = checkpoint
                .next_id
                .saturating_add(partition.batch_size)
                .min(partition.end_id);
            let count = self
                .processor
                .process_batch(&partition.resource_type, checkpoint.next_id, batch_end)
                .await
                .map_err(ExecutionError::from)?;

            checkpoint = RangeCheckpoint {
                next_id: batch_end,
                processed: checkpoint.processed + count,
            };
            ctx.save_checkpoint(&checkpoint)
                .map_err(|e| ExecutionError::Permanent(e.to_string()))?;
        }

        Ok(json!({
            "resource_type": partition.resource_type,
            "start_id": partition.start_id,
            "end_id": partition.end_id,
            "processed": checkpoint.processed,
        }))
    }
}
