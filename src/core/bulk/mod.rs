//! Built-in range bulk operations
//!
//! A bulk request is split by [`RangePlanner`] into resource type and id
//! range partitions; [`RangeExecutor`] walks each partition in batches and
//! hands every batch to a [`BatchProcessor`].

pub mod executor;
pub mod planner;

pub use executor::{BatchProcessor, DryRunProcessor, RangeCheckpoint, RangeExecutor};
pub use planner::{BulkOperationRequest, RangePartition, RangePlanner};

use crate::core::jobs::JobRegistry;
use std::sync::Arc;

/// Type id of bulk operation roots
pub const BULK_COORDINATOR_TYPE: &str = "bulk-operation";

/// Type id of the range partitions a bulk root plans into
pub const BULK_PARTITION_TYPE: &str = "bulk-range-partition";

/// Register the range planner and an executor backed by `processor`
pub fn register_bulk_operations<P>(registry: &mut JobRegistry, processor: P) -> &mut JobRegistry
where
    P: BatchProcessor + 'static,
{
    registry
        .register_coordinator(
            BULK_COORDINATOR_TYPE,
            Arc::new(RangePlanner::new(BULK_PARTITION_TYPE)),
        )
        .register_worker(BULK_PARTITION_TYPE, Arc::new(RangeExecutor::new(processor)))
}
