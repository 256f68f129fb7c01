//! Driver-level error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by drivers, connections and statements.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A native connection could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The connection has been closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// The statement was closed, or its connection was closed underneath it.
    #[error("statement is closed")]
    StatementClosed,

    /// Query or update execution failed on the server.
    #[error("query failed: {0}")]
    Query(String),

    /// Commit, rollback or auto-commit switching failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// No registered driver accepts the URL.
    #[error("no suitable driver for URL '{0}'")]
    NoSuitableDriver(String),

    /// A parameter index outside the statement's placeholders.
    #[error("invalid parameter index {index} (statement has {count} parameters)")]
    ParameterIndex {
        /// Zero-based index that was used.
        index: usize,
        /// Number of placeholders in the statement.
        count: usize,
    },

    /// A value could not be converted to the requested Rust type.
    #[error("type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        /// Requested type.
        expected: &'static str,
        /// Description of the actual value.
        actual: String,
    },

    /// A column lookup failed.
    #[error("column not found: {0}")]
    ColumnNotFound(String),

    /// The cursor is not positioned on a row.
    #[error("result set is not positioned on a row")]
    NoCurrentRow,

    /// An operation exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// An isolation level name could not be parsed or is not supported.
    #[error("invalid isolation level: {0}")]
    InvalidIsolationLevel(String),

    /// The backend does not support the operation.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl Error {
    /// Whether the error indicates the underlying connection is unusable.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::ConnectionClosed)
    }
}

/// Result alias for driver-level operations.
pub type Result<T> = std::result::Result<T, Error>;
