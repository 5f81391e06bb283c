//! Storage error types and their failure classes.

use std::fmt;
use std::time::Duration;

use strata_core::CoreError;
use thiserror::Error;

/// How a failure must be handled by the job that hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Timeouts, connection loss, serialization failures, lock waits.
    /// Retried on the next tick with the same window.
    Transient,
    /// The object or range already exists, or a row violates a constraint.
    /// Treated as an idempotent no-op.
    Integrity,
    /// Misconfiguration, unknown tables, malformed catalog output.
    /// The tick aborts without advancing and the error repeats.
    Contract,
}

impl ErrorClass {
    /// Classifies a PostgreSQL SQLSTATE code.
    #[must_use]
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "55P03" | "55006" => Self::Transient,
            "42P07" | "42710" | "42P06" | "42P17" => Self::Integrity,
            _ => match code.get(..2) {
                Some("08" | "40" | "53" | "57" | "58") => Self::Transient,
                Some("23") => Self::Integrity,
                _ => Self::Contract,
            },
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Integrity => write!(f, "integrity"),
            Self::Contract => write!(f, "contract"),
        }
    }
}

/// Errors raised by checkpoint and catalog backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Could not obtain a pooled connection.
    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Pool could not be built from the configuration.
    #[error("pool configuration error: {0}")]
    PoolConfig(String),

    /// Error returned by PostgreSQL or the client library.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// A client-side deadline elapsed.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that was running.
        operation: &'static str,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// Retryable failure reported by a non-PostgreSQL backend.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// The object already exists or a row violates a constraint.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// The request cannot succeed without a configuration or schema change.
    #[error("contract violation: {0}")]
    Contract(String),

    /// A referenced table does not exist.
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// The unit of work was already committed or rolled back.
    #[error("unit of work is closed")]
    Closed,

    /// Planning error surfaced while talking to storage.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl StorageError {
    /// Failure class of this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Pool(err) => match err {
                deadpool_postgres::PoolError::Backend(pg) => classify_postgres(pg),
                deadpool_postgres::PoolError::NoRuntimeSpecified => ErrorClass::Contract,
                _ => ErrorClass::Transient,
            },
            Self::Postgres(err) => classify_postgres(err),
            Self::Timeout { .. } | Self::Transient(_) | Self::Closed => ErrorClass::Transient,
            Self::Integrity(_) => ErrorClass::Integrity,
            Self::PoolConfig(_) | Self::Contract(_) | Self::UnknownTable(_) | Self::Core(_) => {
                ErrorClass::Contract
            }
        }
    }

    /// Returns `true` if retrying the same operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Returns `true` if the operation hit an already-existing object or a
    /// constraint violation.
    #[must_use]
    pub fn is_integrity(&self) -> bool {
        self.class() == ErrorClass::Integrity
    }

    /// SQLSTATE code, if the error came from PostgreSQL.
    #[must_use]
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Postgres(err) | Self::Pool(deadpool_postgres::PoolError::Backend(err)) => {
                err.code().map(tokio_postgres::error::SqlState::code)
            }
            _ => None,
        }
    }
}

fn classify_postgres(err: &tokio_postgres::Error) -> ErrorClass {
    if err.is_closed() {
        return ErrorClass::Transient;
    }
    match err.code() {
        Some(state) => ErrorClass::from_sqlstate(state.code()),
        // No SQLSTATE: the failure happened on the socket, not in the server.
        None => ErrorClass::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlstate_classes() {
        assert_eq!(ErrorClass::from_sqlstate("57014"), ErrorClass::Transient);
        assert_eq!(ErrorClass::from_sqlstate("40001"), ErrorClass::Transient);
        assert_eq!(ErrorClass::from_sqlstate("40P01"), ErrorClass::Transient);
        assert_eq!(ErrorClass::from_sqlstate("08006"), ErrorClass::Transient);
        assert_eq!(ErrorClass::from_sqlstate("55P03"), ErrorClass::Transient);
        assert_eq!(ErrorClass::from_sqlstate("42P07"), ErrorClass::Integrity);
        assert_eq!(ErrorClass::from_sqlstate("42710"), ErrorClass::Integrity);
        assert_eq!(ErrorClass::from_sqlstate("42P17"), ErrorClass::Integrity);
        assert_eq!(ErrorClass::from_sqlstate("23505"), ErrorClass::Integrity);
        assert_eq!(ErrorClass::from_sqlstate("23514"), ErrorClass::Integrity);
        assert_eq!(ErrorClass::from_sqlstate("42P01"), ErrorClass::Contract);
        assert_eq!(ErrorClass::from_sqlstate("42601"), ErrorClass::Contract);
    }

    #[test]
    fn test_variant_classes() {
        let timeout = StorageError::Timeout {
            operation: "max_id",
            timeout: Duration::from_secs(1),
        };
        assert!(timeout.is_transient());
        assert!(StorageError::Integrity("dup".into()).is_integrity());
        assert_eq!(
            StorageError::UnknownTable("event".into()).class(),
            ErrorClass::Contract
        );
        assert_eq!(
            StorageError::Core(CoreError::InvalidStep(0)).class(),
            ErrorClass::Contract
        );
        assert!(StorageError::Closed.sqlstate().is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorClass::Integrity.to_string(), "integrity");
        assert_eq!(
            StorageError::UnknownTable("event".into()).to_string(),
            "unknown table 'event'"
        );
    }
}
