//! Domain models and types for the job queue.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`JobId`], [`GroupId`])
//! - **The job record** ([`JobInfo`], [`JobStatus`], [`QueueType`], [`LeaseToken`])
//! - **Definition envelope** ([`JobDefinition`])
//! - **Error types** ([`JobQueueError`], [`StoreError`], [`StoreErrorKind`])
//! - **Result type alias** ([`Result`])
//!
//! # Type Safety
//!
//! Job and group identifiers are newtypes so they cannot be mixed up:
//!
//! ```rust
//! use fhir_jobqueue::domain::{GroupId, JobId};
//!
//! let job = JobId::new(42);
//! let group = GroupId::from(job);
//!
//! // let wrong: JobId = group;  // Compile error!
//! assert_eq!(group.value(), 42);
//! ```
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T, JobQueueError>`]:
//!
//! ```rust,no_run
//! use fhir_jobqueue::domain::Result;
//!
//! fn example() -> Result<()> {
//!     let config = fhir_jobqueue::config::JobQueueConfig::from_file("fhir-jobqueue.toml")?;
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod definition;
pub mod errors;
pub mod ids;
pub mod job;
pub mod result;

pub use definition::JobDefinition;
pub use errors::{JobQueueError, PartitionErrorDetail, StoreError, StoreErrorKind};
pub use ids::{GroupId, JobId};
pub use job::{JobInfo, JobStatus, LeaseToken, QueueType};
pub use result::Result;
