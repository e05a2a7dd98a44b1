//! Admission control for root jobs
//!
//! A cap limits how many coordinators of one queue type run at once. At the
//! cap, dequeue attempts are narrowed to child jobs instead of being
//! skipped, so the coordinators already running can still finish.
//! The count and the dequeue are separate calls; two processes may both
//! admit the last slot. The cap is best-effort.

use crate::adapters::database::{DequeueRequest, JobStore};
use crate::domain::{QueueType, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Per-queue caps on running root jobs
#[derive(Debug, Clone, Default)]
pub struct AdmissionController {
    caps: HashMap<QueueType, usize>,
}

impl AdmissionController {
    pub fn new(caps: HashMap<QueueType, usize>) -> Self {
        Self { caps }
    }

    /// Controller that never restricts a dequeue
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn cap(&self, queue_type: QueueType) -> Option<usize> {
        self.caps.get(&queue_type).copied()
    }

    /// Narrow `request` to child jobs when the root cap is reached
    pub async fn admit(
        &self,
        store: &dyn JobStore,
        request: DequeueRequest,
        lease: Duration,
    ) -> Result<DequeueRequest> {
        let Some(cap) = self.cap(request.queue_type) else {
            return Ok(request);
        };

        let running = store.count_running_roots(request.queue_type, lease).await?;
        if running >= cap {
            tracing::debug!(
                queue_type = %request.queue_type,
                running,
                cap,
                "Root job cap reached, leasing children only"
            );
            Ok(request.children_only())
        } else {
            Ok(request)
        }
    }
}
