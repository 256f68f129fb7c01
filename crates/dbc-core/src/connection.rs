//! Connection and prepared statement capabilities.

use async_trait::async_trait;

use crate::error::Result;
use crate::isolation::IsolationLevel;
use crate::result_set::ResultSet;
use crate::value::Value;

/// A live connection to one database.
///
/// Every backend driver provides one implementation. Methods take `&self`;
/// implementations synchronize internally so a connection can be shared as
/// `Arc<dyn Connection>` between the pool and the borrower.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a statement returning rows.
    async fn execute_query(&self, sql: &str) -> Result<ResultSet>;

    /// Execute a statement returning an affected-row count.
    async fn execute_update(&self, sql: &str) -> Result<u64>;

    /// Prepare a statement with positional `?` placeholders.
    async fn prepare_statement(&self, sql: &str) -> Result<Box<dyn PreparedStatement>>;

    /// Enable or disable auto-commit.
    ///
    /// Re-enabling auto-commit while a transaction is open commits it.
    async fn set_auto_commit(&self, enabled: bool) -> Result<()>;

    /// Current auto-commit mode.
    async fn auto_commit(&self) -> Result<bool>;

    /// Commit the current transaction.
    async fn commit(&self) -> Result<()>;

    /// Roll back the current transaction.
    async fn rollback(&self) -> Result<()>;

    /// Set the isolation level used by subsequent transactions.
    async fn set_transaction_isolation(&self, level: IsolationLevel) -> Result<()>;

    /// Current isolation level.
    async fn transaction_isolation(&self) -> Result<IsolationLevel>;

    /// Close the native connection.
    async fn close(&self) -> Result<()>;

    /// Whether [`close()`](Self::close) has been called or the link was lost.
    fn is_closed(&self) -> bool;

    /// Invalidate dependent objects (statements) ahead of a close.
    ///
    /// Called by owners that are about to destroy the native handle while
    /// statements may still be in flight on other tasks.
    fn notify_closing(&self) {}
}

/// A statement prepared on a [`Connection`].
///
/// Parameter indexes are zero-based. Once the owning connection closes, every
/// operation fails with [`Error::StatementClosed`](crate::Error::StatementClosed).
#[async_trait]
pub trait PreparedStatement: Send + Sync {
    /// The SQL text the statement was prepared from.
    fn sql(&self) -> &str;

    /// Bind a parameter.
    fn bind(&mut self, index: usize, value: Value) -> Result<()>;

    /// Reset all bound parameters to NULL.
    fn clear_parameters(&mut self);

    /// Execute with the bound parameters, returning rows.
    async fn execute_query(&mut self) -> Result<ResultSet>;

    /// Execute with the bound parameters, returning an affected-row count.
    async fn execute_update(&mut self) -> Result<u64>;

    /// Release the statement.
    fn close(&mut self);

    /// Whether the statement was closed, directly or through its connection.
    fn is_closed(&self) -> bool;
}
