//! PostgreSQL error classification

use crate::domain::{StoreError, StoreErrorKind};
use tokio_postgres::error::SqlState;

/// Classify a driver error for the queue client's retry policy
pub fn classify_store_error(err: &tokio_postgres::Error) -> StoreErrorKind {
    match err.code() {
        Some(code) => classify_sql_state(code),
        None if err.is_closed() => StoreErrorKind::Transient,
        None => {
            let io_failure = std::error::Error::source(err)
                .map(|source| source.is::<std::io::Error>())
                .unwrap_or(false);
            if io_failure {
                StoreErrorKind::Transient
            } else {
                StoreErrorKind::Fatal
            }
        }
    }
}

/// Classify a server-reported SQLSTATE
pub fn classify_sql_state(code: &SqlState) -> StoreErrorKind {
    let transient = [
        SqlState::T_R_SERIALIZATION_FAILURE,
        SqlState::T_R_DEADLOCK_DETECTED,
        SqlState::LOCK_NOT_AVAILABLE,
        SqlState::ADMIN_SHUTDOWN,
        SqlState::CRASH_SHUTDOWN,
        SqlState::CANNOT_CONNECT_NOW,
        SqlState::TOO_MANY_CONNECTIONS,
        SqlState::QUERY_CANCELED,
        SqlState::CONNECTION_EXCEPTION,
        SqlState::CONNECTION_FAILURE,
    ];

    if transient.contains(code) {
        StoreErrorKind::Transient
    } else if *code == SqlState::UNIQUE_VIOLATION {
        StoreErrorKind::VersionConflict
    } else if *code == SqlState::UNDEFINED_TABLE {
        StoreErrorKind::NotFound
    } else {
        StoreErrorKind::Fatal
    }
}

/// Wrap a driver error with context, keeping its classification
pub fn store_error(err: tokio_postgres::Error, context: &str) -> StoreError {
    StoreError::from_kind(classify_store_error(&err), format!("{context}: {err}"))
}

/// Pool exhaustion and connect failures are always worth retrying
pub fn pool_error(err: deadpool_postgres::PoolError) -> StoreError {
    StoreError::Transient(format!("Failed to get connection from pool: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(SqlState::T_R_SERIALIZATION_FAILURE, StoreErrorKind::Transient; "serialization failure")]
    #[test_case(SqlState::T_R_DEADLOCK_DETECTED, StoreErrorKind::Transient; "deadlock")]
    #[test_case(SqlState::ADMIN_SHUTDOWN, StoreErrorKind::Transient; "admin shutdown")]
    #[test_case(SqlState::TOO_MANY_CONNECTIONS, StoreErrorKind::Transient; "too many connections")]
    #[test_case(SqlState::QUERY_CANCELED, StoreErrorKind::Transient; "statement timeout")]
    #[test_case(SqlState::UNIQUE_VIOLATION, StoreErrorKind::VersionConflict; "unique violation")]
    #[test_case(SqlState::UNDEFINED_TABLE, StoreErrorKind::NotFound; "missing table")]
    #[test_case(SqlState::SYNTAX_ERROR, StoreErrorKind::Fatal; "syntax error")]
    fn test_classify_sql_state(code: SqlState, expected: StoreErrorKind) {
        assert_eq!(classify_sql_state(&code), expected);
    }
}
