//! Error types for the job layer.

use strata_core::CoreError;
use strata_storage::{ErrorClass, StorageError};

/// Errors raised by jobs, the registry and the scheduler.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Storage backend error
    Storage(#[from] StorageError),

    /// Planning error
    Core(#[from] CoreError),

    /// Configuration is missing or inconsistent
    Config(String),

    /// No job registered under this name
    JobNotFound(String),

    /// A job with this name is already registered
    JobAlreadyRegistered(String),

    /// Business processor failure, with the class it asked for
    Processor {
        /// Failure class chosen by the processor.
        class: ErrorClass,
        /// Description.
        message: String,
    },
}

impl DbError {
    /// Failure class used to pick the log level and the retry policy.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Storage(err) => err.class(),
            Self::Processor { class, .. } => *class,
            Self::JobAlreadyRegistered(_) => ErrorClass::Integrity,
            Self::Core(_) | Self::Config(_) | Self::JobNotFound(_) => ErrorClass::Contract,
        }
    }

    /// Shorthand for a transient processor failure.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Processor {
            class: ErrorClass::Transient,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "Storage error: {e}"),
            Self::Core(e) => write!(f, "Planning error: {e}"),
            Self::Config(msg) => write!(f, "Config error: {msg}"),
            Self::JobNotFound(name) => write!(f, "Job '{name}' not found"),
            Self::JobAlreadyRegistered(name) => {
                write!(f, "Job '{name}' already registered")
            }
            Self::Processor { class, message } => {
                write!(f, "Processor error ({class}): {message}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_delegates_to_storage() {
        let err = DbError::from(StorageError::Integrity("dup".into()));
        assert_eq!(err.class(), ErrorClass::Integrity);
        let err = DbError::from(StorageError::UnknownTable("event".into()));
        assert_eq!(err.class(), ErrorClass::Contract);
    }

    #[test]
    fn test_processor_class() {
        assert_eq!(DbError::transient("rpc timeout").class(), ErrorClass::Transient);
        assert_eq!(
            DbError::Config("missing batch".into()).class(),
            ErrorClass::Contract
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            DbError::JobNotFound("crawl".into()).to_string(),
            "Job 'crawl' not found"
        );
        assert_eq!(
            DbError::transient("rpc timeout").to_string(),
            "Processor error (transient): rpc timeout"
        );
    }
}
