//! Pool and transaction manager error types.

use std::time::Duration;

use thiserror::Error;

/// The transaction step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOperation {
    /// Borrowing a connection and disabling auto-commit.
    Begin,
    /// Committing.
    Commit,
    /// Rolling back.
    Rollback,
}

impl std::fmt::Display for TransactionOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Begin => "begin",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        })
    }
}

/// Errors raised by the connection pool and the transaction manager.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A native connection could not be opened.
    #[error("failed to open connection: {0}")]
    ConnectionFailure(#[source] dbc_core::Error),

    /// No connection became available within the wait budget.
    #[error("pool exhausted: no connection available after {waited:?} (max size {max_size})")]
    PoolExhausted {
        /// Time spent waiting.
        waited: Duration,
        /// Configured maximum pool size.
        max_size: u32,
    },

    /// Connections failed validation and no alternative was left.
    #[error("connection validation failed: {0}")]
    ValidationFailure(String),

    /// The transaction id is unknown, completed or timed out.
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    /// A transaction step failed; cleanup was still performed.
    #[error("transaction {id} {operation} failed: {source}")]
    TransactionOperationFailure {
        /// Transaction id.
        id: String,
        /// The failing step.
        operation: TransactionOperation,
        /// The driver error.
        #[source]
        source: dbc_core::Error,
    },

    /// The pool or manager has been closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Category of a [`PoolError`], for callers that branch on the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`PoolError::ConnectionFailure`].
    ConnectionFailure,
    /// See [`PoolError::PoolExhausted`].
    PoolExhausted,
    /// See [`PoolError::ValidationFailure`].
    ValidationFailure,
    /// See [`PoolError::TransactionNotFound`].
    TransactionNotFound,
    /// See [`PoolError::TransactionOperationFailure`].
    TransactionOperationFailure,
    /// See [`PoolError::PoolClosed`].
    PoolClosed,
    /// See [`PoolError::Config`].
    Config,
}

impl ErrorKind {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::ConnectionFailure => "CONNECTION_FAILURE",
            Self::PoolExhausted => "POOL_EXHAUSTED",
            Self::ValidationFailure => "VALIDATION_FAILURE",
            Self::TransactionNotFound => "TRANSACTION_NOT_FOUND",
            Self::TransactionOperationFailure => "TRANSACTION_OPERATION_FAILURE",
            Self::PoolClosed => "POOL_CLOSED",
            Self::Config => "CONFIG",
        }
    }
}

impl PoolError {
    /// The category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionFailure(_) => ErrorKind::ConnectionFailure,
            Self::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Self::ValidationFailure(_) => ErrorKind::ValidationFailure,
            Self::TransactionNotFound(_) => ErrorKind::TransactionNotFound,
            Self::TransactionOperationFailure { .. } => ErrorKind::TransactionOperationFailure,
            Self::PoolClosed => ErrorKind::PoolClosed,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Stable machine-readable code of this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailure(_) | Self::PoolExhausted { .. } | Self::ValidationFailure(_)
        )
    }
}
