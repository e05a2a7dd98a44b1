//! Cosmos DB error classification
//!
//! HTTP failures carry a status code and are classified on it. Errors
//! without one (transport, serialization) fall back to the error kind and,
//! last, to the rendered message.

use crate::domain::{StoreError, StoreErrorKind};
use azure_core::error::ErrorKind;
use azure_core::http::StatusCode;
use regex::Regex;
use std::sync::OnceLock;

/// Classify an SDK error for the queue client's retry policy
pub fn classify_store_error(err: &azure_core::Error) -> StoreErrorKind {
    if let Some(status) = err.http_status() {
        return classify_status(status);
    }
    match err.kind() {
        ErrorKind::Io => StoreErrorKind::Transient,
        _ => classify_message(&err.to_string()),
    }
}

/// Classify an HTTP status returned by the service
pub fn classify_status(status: StatusCode) -> StoreErrorKind {
    match status {
        StatusCode::PreconditionFailed | StatusCode::Conflict => StoreErrorKind::VersionConflict,
        StatusCode::NotFound => StoreErrorKind::NotFound,
        StatusCode::RequestTimeout
        | StatusCode::TooManyRequests
        | StatusCode::ServiceUnavailable
        | StatusCode::GatewayTimeout => StoreErrorKind::Transient,
        _ => StoreErrorKind::Fatal,
    }
}

/// Classify a numeric status found in a rendered message
fn classify_code(code: u16) -> StoreErrorKind {
    match code {
        409 | 412 => StoreErrorKind::VersionConflict,
        404 => StoreErrorKind::NotFound,
        408 | 429 | 503 | 504 => StoreErrorKind::Transient,
        _ => StoreErrorKind::Fatal,
    }
}

fn status_code_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\b([1-5]\d{2})\b").ok())
        .as_ref()
}

/// Classify a rendered error message that carries no structured status
///
/// The first standalone three digit code decides; digits inside longer
/// numbers such as document ids never count.
pub fn classify_message(message: &str) -> StoreErrorKind {
    if let Some(code) = status_code_pattern()
        .and_then(|pattern| pattern.captures(message))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
    {
        return classify_code(code);
    }

    let contains_any = |needles: &[&str]| needles.iter().any(|n| message.contains(n));
    if contains_any(&["PreconditionFailed", "Conflict"]) {
        StoreErrorKind::VersionConflict
    } else if contains_any(&["NotFound"]) {
        StoreErrorKind::NotFound
    } else if contains_any(&[
        "TooManyRequests",
        "ServiceUnavailable",
        "timed out",
        "connection refused",
        "connection reset",
        "connection closed",
    ]) {
        StoreErrorKind::Transient
    } else {
        StoreErrorKind::Fatal
    }
}

/// Wrap an SDK error with context, keeping its classification
pub fn store_error(err: azure_core::Error, context: &str) -> StoreError {
    StoreError::from_kind(classify_store_error(&err), format!("{context}: {err}"))
}

/// Whether a conditional write lost its race
pub fn is_precondition_failure(err: &azure_core::Error) -> bool {
    classify_store_error(err) == StoreErrorKind::VersionConflict
}
