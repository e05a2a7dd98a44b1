//! Job definition envelope
//!
//! Definitions are stored as opaque JSON. The envelope only fixes the
//! `type_id` discriminator the job registry dispatches on; everything else
//! lives in `payload`.

use crate::domain::{JobQueueError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Serialized description of one unit of work
///
/// # Examples
///
/// ```
/// use fhir_jobqueue::domain::JobDefinition;
/// use serde_json::json;
///
/// let definition = JobDefinition::new("export-partition", json!({"resource_type": "Patient"}));
/// let stored = definition.to_json().unwrap();
/// let parsed = JobDefinition::parse(&stored).unwrap();
/// assert_eq!(parsed.type_id, "export-partition");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    /// Handler discriminator
    pub type_id: String,

    /// Handler-specific payload
    #[serde(default)]
    pub payload: Value,
}

impl JobDefinition {
    /// Creates a new definition
    pub fn new(type_id: impl Into<String>, payload: Value) -> Self {
        Self {
            type_id: type_id.into(),
            payload,
        }
    }

    /// Creates a definition from a serializable payload
    pub fn from_payload<T: Serialize>(type_id: impl Into<String>, payload: &T) -> Result<Self> {
        Ok(Self::new(type_id, serde_json::to_value(payload)?))
    }

    /// Parses a stored definition
    pub fn parse(raw: &str) -> Result<Self> {
        let definition: JobDefinition = serde_json::from_str(raw).map_err(|e| {
            JobQueueError::Serialization(format!("Invalid job definition: {e}"))
        })?;

        if definition.type_id.trim().is_empty() {
            return Err(JobQueueError::Validation(
                "Job definition type_id cannot be empty".to_string(),
            ));
        }

        Ok(definition)
    }

    /// Serializes the definition for storage
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserializes the payload into a typed value
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            JobQueueError::Serialization(format!(
                "Invalid payload for job type '{}': {e}",
                self.type_id
            ))
        })
    }
}
