//! Domain identifier types
//!
//! Newtype wrappers keep job and group identifiers from being mixed up even
//! though both are plain 64-bit integers in storage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Job identifier, unique within a queue type
///
/// # Examples
///
/// ```
/// use fhir_jobqueue::domain::ids::JobId;
/// use std::str::FromStr;
///
/// let id = JobId::from_str("42").unwrap();
/// assert_eq!(id.value(), 42);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    /// Creates a new JobId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|e| format!("Invalid job id '{s}': {e}"))
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Group identifier shared by a coordinator and the children it fans out
///
/// A root job's own [`JobId`] equals its group id.
///
/// # Examples
///
/// ```
/// use fhir_jobqueue::domain::ids::{GroupId, JobId};
///
/// let group = GroupId::from(JobId::new(7));
/// assert_eq!(group.value(), 7);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(i64);

impl GroupId {
    /// Creates a new GroupId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|e| format!("Invalid group id '{s}': {e}"))
    }
}

impl From<i64> for GroupId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<JobId> for GroupId {
    fn from(id: JobId) -> Self {
        Self(id.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_parse() {
        assert_eq!(JobId::from_str(" 17 ").unwrap(), JobId::new(17));
        assert!(JobId::from_str("abc").is_err());
        assert!(JobId::from_str("").is_err());
    }

    #[test]
    fn test_group_id_from_job_id() {
        let job = JobId::new(1001);
        assert_eq!(GroupId::from(job), GroupId::new(1001));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&JobId::new(5)).unwrap();
        assert_eq!(json, "5");
        let group: GroupId = serde_json::from_str("9").unwrap();
        assert_eq!(group.value(), 9);
    }

    #[test]
    fn test_job_id_ordering() {
        let mut ids = vec![JobId::new(3), JobId::new(1), JobId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![JobId::new(1), JobId::new(2), JobId::new(3)]);
    }
}
