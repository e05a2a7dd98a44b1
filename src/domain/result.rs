//! Result type alias for the job queue

use super::errors::JobQueueError;

/// Result type alias for job queue operations
///
/// # Examples
///
/// ```
/// use fhir_jobqueue::domain::result::Result;
/// use fhir_jobqueue::domain::errors::JobQueueError;
///
/// fn example_function() -> Result<String> {
///     Ok("success".to_string())
/// }
///
/// fn failing_function() -> Result<()> {
///     Err(JobQueueError::Validation("Invalid input".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, JobQueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_with_question_mark() -> Result<()> {
        fn inner() -> Result<i64> {
            Ok(42)
        }

        let value = inner()?;
        assert_eq!(value, 42);
        Ok(())
    }
}
