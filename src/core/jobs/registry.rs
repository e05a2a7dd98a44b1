//! Job type registry
//!
//! Maps the `type_id` of a definition to the handler that runs it. A type is
//! either a coordinator (root jobs, planned into children) or a worker
//! (one partition).

use crate::core::jobs::context::{ExecutionContext, ExecutionError};
use crate::domain::{JobDefinition, JobQueueError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Splits a root definition into partition definitions
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, definition: &JobDefinition) -> Result<Vec<JobDefinition>>;
}

/// Runs one partition
///
/// Must be safe to repeat: a partition may run again after a crash or an
/// expired lease, resuming from its last checkpoint.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        definition: &JobDefinition,
        ctx: &ExecutionContext,
    ) -> std::result::Result<Value, ExecutionError>;
}

/// Handler registered for one type id
#[derive(Clone)]
pub enum JobHandler {
    Coordinator(Arc<dyn Planner>),
    Worker(Arc<dyn Executor>),
}

impl JobHandler {
    pub fn kind(&self) -> &'static str {
        match self {
            JobHandler::Coordinator(_) => "coordinator",
            JobHandler::Worker(_) => "worker",
        }
    }
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    handlers: HashMap<String, JobHandler>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a planner for root jobs of `type_id`
    pub fn register_coordinator(
        &mut self,
        type_id: impl Into<String>,
        planner: Arc<dyn Planner>,
    ) -> &mut Self {
        self.insert(type_id.into(), JobHandler::Coordinator(planner))
    }

    /// Register an executor for partitions of `type_id`
    pub fn register_worker(
        &mut self,
        type_id: impl Into<String>,
        executor: Arc<dyn Executor>,
    ) -> &mut Self {
        self.insert(type_id.into(), JobHandler::Worker(executor))
    }

    fn insert(&mut self, type_id: String, handler: JobHandler) -> &mut Self {
        if let Some(previous) = self.handlers.insert(type_id.clone(), handler) {
            tracing::warn!(type_id = %type_id, replaced = previous.kind(), "Job handler replaced");
        }
        self
    }

    /// Handler for `definition`
    pub fn resolve(&self, definition: &JobDefinition) -> Result<&JobHandler> {
        self.handlers
            .get(&definition.type_id)
            .ok_or_else(|| JobQueueError::UnknownJobType(definition.type_id.clone()))
    }

    /// Registered type ids, sorted
    pub fn type_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
