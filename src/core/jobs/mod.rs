//! Coordinator and worker jobs
//!
//! - [`registry`] - `type_id` to handler mapping, the [`Planner`] and
//!   [`Executor`] traits
//! - [`coordinator`] - plan, fan out, monitor and aggregate a group
//! - [`worker`] - execute one partition under a heartbeat
//! - [`context`] - what an executor sees during an attempt
//! - [`summary`] - progress reports and group status

pub mod context;
pub mod coordinator;
pub mod registry;
pub mod summary;
pub mod worker;

pub use context::{ExecutionContext, ExecutionError, JobOutcome, LeaseSignal};
pub use coordinator::CoordinatorJob;
pub use registry::{Executor, JobHandler, JobRegistry, Planner};
pub use summary::{CoordinatorPhase, CoordinatorReport, GroupSummary, StatusCounts};
pub use worker::WorkerJob;
