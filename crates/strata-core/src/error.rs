//! Error types for pure planning logic.

/// Errors raised while planning windows, partitions, or DDL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Partition step must be a positive integer.
    #[error("invalid partition step {0}: must be > 0")]
    InvalidStep(i64),

    /// An identifier cannot be used as a table, column, or constraint name.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// A partition bound expression from the catalog could not be parsed.
    #[error("malformed partition bound: {0}")]
    MalformedBound(String),

    /// A window was requested with no upper bound (no dependencies and no batch size).
    #[error("unbounded window for job '{0}': declare a dependency or a batch config")]
    UnboundedWindow(String),

    /// Batch sizing parameters are inconsistent.
    #[error("invalid batch sizing: {0}")]
    InvalidBatch(String),

    /// A checkpoint was asked to move backwards.
    #[error("checkpoint '{job}' cannot move from {from} back to {to}")]
    CheckpointRegression {
        /// Job that owns the checkpoint.
        job: String,
        /// Current height.
        from: i64,
        /// Requested height.
        to: i64,
    },
}
