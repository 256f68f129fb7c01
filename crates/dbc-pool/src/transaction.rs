//! Transaction manager.
//!
//! Maps opaque transaction ids to connections checked out of a [`Pool`] with
//! auto-commit disabled. Transactions end with [`commit`] or [`rollback`],
//! or are rolled back by a background sweep once they have been untouched
//! for longer than the configured timeout.
//!
//! [`commit`]: TransactionManager::commit
//! [`rollback`]: TransactionManager::rollback

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbc_core::{Connection, IsolationLevel, PreparedStatement, ResultSet};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{PoolError, TransactionOperation};
use crate::pool::{Pool, PooledConnection};

/// Configuration for a [`TransactionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionManagerConfig {
    /// Inactivity after which a transaction is rolled back.
    pub timeout: Duration,
    /// How often abandoned transactions are looked for.
    pub sweep_interval: Duration,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl TransactionManagerConfig {
    /// Set the inactivity timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the sweep period.
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Check the configuration for consistency.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.sweep_interval.is_zero() {
            return Err(PoolError::Config(
                "sweep_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Snapshot of an open transaction.
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    /// Transaction id.
    pub id: String,
    /// Pool id of the connection carrying the transaction.
    pub connection_id: u64,
    /// When the transaction began.
    pub started_at: DateTime<Utc>,
    /// Time since the transaction was last touched.
    pub idle: Duration,
}

struct TransactionContext {
    connection: Arc<PooledConnection>,
    started_at: DateTime<Utc>,
    last_access: Instant,
}

#[derive(Default)]
struct Registry {
    contexts: HashMap<String, TransactionContext>,
    closed: bool,
}

struct ManagerInner {
    pool: Pool,
    registry: Mutex<Registry>,
    timeout_ms: AtomicU64,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Tracks transactions running on pooled connections.
///
/// Cloning is cheap; clones share the same transactions.
///
/// # Example
///
/// ```rust,ignore
/// let manager = TransactionManager::new(pool.clone());
///
/// let tx = manager.begin_transaction().await?;
/// let conn = manager.connection(&tx)?;
/// conn.execute_update("INSERT INTO audit VALUES ('login')").await?;
/// manager.commit(&tx).await?;
/// ```
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

impl TransactionManager {
    /// Create a manager with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(pool: Pool) -> Self {
        Self::start(pool, TransactionManagerConfig::default())
    }

    /// Create a manager and start its timeout sweep.
    ///
    /// Fails with [`PoolError::Config`] if the configuration is invalid.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn with_config(pool: Pool, config: TransactionManagerConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self::start(pool, config))
    }

    fn start(pool: Pool, config: TransactionManagerConfig) -> Self {
        let inner = Arc::new(ManagerInner {
            pool,
            registry: Mutex::new(Registry::default()),
            timeout_ms: AtomicU64::new(millis(config.timeout)),
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
        });
        let sweeper = spawn_sweeper(&inner, config.sweep_interval);
        *inner.sweeper.lock() = Some(sweeper);

        tracing::info!(
            timeout_ms = millis(config.timeout),
            "transaction manager created"
        );
        Self { inner }
    }

    /// The pool transactions borrow from.
    #[must_use]
    pub fn pool(&self) -> &Pool {
        &self.inner.pool
    }

    /// Borrow a connection, disable auto-commit and return a fresh
    /// transaction id.
    ///
    /// Pool failures are returned as-is; failing to disable auto-commit is a
    /// [`PoolError::TransactionOperationFailure`], after which the connection
    /// has already been given back.
    pub async fn begin_transaction(&self) -> Result<String, PoolError> {
        if self.inner.registry.lock().closed {
            return Err(PoolError::PoolClosed);
        }

        let connection = self.inner.pool.get().await?;
        let id = Uuid::new_v4().to_string();
        if let Err(source) = connection.set_auto_commit(false).await {
            connection.return_to_pool().await;
            return Err(PoolError::TransactionOperationFailure {
                id,
                operation: TransactionOperation::Begin,
                source,
            });
        }

        let connection = Arc::new(connection);
        let connection_id = connection.id();
        let rejected = {
            let mut registry = self.inner.registry.lock();
            if registry.closed {
                true
            } else {
                registry.contexts.insert(
                    id.clone(),
                    TransactionContext {
                        connection: Arc::clone(&connection),
                        started_at: Utc::now(),
                        last_access: Instant::now(),
                    },
                );
                false
            }
        };
        if rejected {
            connection.return_to_pool().await;
            return Err(PoolError::PoolClosed);
        }

        tracing::debug!(transaction_id = %id, connection_id, "transaction started");
        Ok(id)
    }

    /// The connection carrying a transaction. Refreshes its last access time.
    ///
    /// Fails with [`PoolError::TransactionNotFound`] if the id is unknown,
    /// completed or timed out.
    pub fn connection(&self, id: &str) -> Result<TransactionConnection, PoolError> {
        let mut registry = self.inner.registry.lock();
        let context = registry
            .contexts
            .get_mut(id)
            .ok_or_else(|| PoolError::TransactionNotFound(id.to_string()))?;
        context.last_access = Instant::now();
        Ok(TransactionConnection {
            transaction_id: id.to_string(),
            connection: Arc::clone(&context.connection),
        })
    }

    /// Commit a transaction and give its connection back to the pool.
    ///
    /// Fails with [`PoolError::TransactionNotFound`] if the id is not active,
    /// or [`PoolError::TransactionOperationFailure`] if the commit failed; the
    /// transaction is finished either way. After a failed commit the
    /// connection is rolled back and parked, or closed if that rollback
    /// fails too.
    pub async fn commit(&self, id: &str) -> Result<(), PoolError> {
        let context = self.inner.take(id)?;
        self.inner
            .complete(id, context, TransactionOperation::Commit)
            .await
    }

    /// Roll back a transaction and give its connection back to the pool.
    ///
    /// Fails with [`PoolError::TransactionNotFound`] if the id is not active,
    /// or [`PoolError::TransactionOperationFailure`] if the rollback failed;
    /// the transaction is finished either way. A connection whose rollback
    /// failed is closed rather than parked, so its pool slot is freed but the
    /// connection itself is not reused.
    pub async fn rollback(&self, id: &str) -> Result<(), PoolError> {
        let context = self.inner.take(id)?;
        self.inner
            .complete(id, context, TransactionOperation::Rollback)
            .await
    }

    /// Whether the id names an open transaction.
    #[must_use]
    pub fn is_active(&self, id: &str) -> bool {
        self.inner.registry.lock().contexts.contains_key(id)
    }

    /// Number of open transactions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.registry.lock().contexts.len()
    }

    /// Set the inactivity timeout. Applies to open transactions too.
    pub fn set_timeout(&self, timeout: Duration) {
        self.inner.timeout_ms.store(millis(timeout), Ordering::Relaxed);
    }

    /// The inactivity timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    /// Open transactions, oldest first.
    #[must_use]
    pub fn transactions(&self) -> Vec<TransactionInfo> {
        let registry = self.inner.registry.lock();
        let mut infos: Vec<TransactionInfo> = registry
            .contexts
            .iter()
            .map(|(id, context)| TransactionInfo {
                id: id.clone(),
                connection_id: context.connection.id(),
                started_at: context.started_at,
                idle: context.last_access.elapsed(),
            })
            .collect();
        infos.sort_by_key(|info| info.started_at);
        infos
    }

    /// Roll back every open transaction and stop the timeout sweep.
    ///
    /// The pool stays open. Later calls to
    /// [`begin_transaction`](Self::begin_transaction) fail with
    /// [`PoolError::PoolClosed`]. Calling `close` again does nothing.
    pub async fn close(&self) {
        let contexts: Vec<(String, TransactionContext)> = {
            let mut registry = self.inner.registry.lock();
            if registry.closed {
                return;
            }
            registry.closed = true;
            registry.contexts.drain().collect()
        };

        self.inner.shutdown.cancel();
        let sweeper = self.inner.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                tracing::warn!(error = %e, "transaction sweeper failed");
            }
        }

        let outstanding = contexts.len();
        for (id, context) in contexts {
            let _ = self
                .inner
                .complete(&id, context, TransactionOperation::Rollback)
                .await;
        }
        tracing::info!(rolled_back = outstanding, "transaction manager closed");
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.active_count())
            .field("timeout", &self.timeout())
            .finish()
    }
}

impl ManagerInner {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    fn take(&self, id: &str) -> Result<TransactionContext, PoolError> {
        self.registry
            .lock()
            .contexts
            .remove(id)
            .ok_or_else(|| PoolError::TransactionNotFound(id.to_string()))
    }

    async fn complete(
        &self,
        id: &str,
        context: TransactionContext,
        operation: TransactionOperation,
    ) -> Result<(), PoolError> {
        finish(id, context.connection, operation).await
    }

    /// Roll back transactions untouched for longer than the timeout.
    async fn sweep(&self) -> usize {
        let timeout = self.timeout();
        let expired: Vec<(String, TransactionContext)> = {
            let mut registry = self.registry.lock();
            let ids: Vec<String> = registry
                .contexts
                .iter()
                .filter(|(_, context)| context.last_access.elapsed() > timeout)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| registry.contexts.remove(&id).map(|context| (id, context)))
                .collect()
        };

        let count = expired.len();
        for (id, context) in expired {
            tracing::warn!(
                transaction_id = %id,
                idle_ms = context.last_access.elapsed().as_millis() as u64,
                "rolling back abandoned transaction"
            );
            let _ = self
                .complete(&id, context, TransactionOperation::Rollback)
                .await;
        }
        count
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.shutdown.cancel();

        let abandoned: Vec<(String, TransactionContext)> =
            self.registry.get_mut().contexts.drain().collect();
        if abandoned.is_empty() {
            return;
        }
        tracing::warn!(
            outstanding = abandoned.len(),
            "transaction manager dropped with open transactions; rolling back"
        );
        // Outside a runtime the connections are forgotten by the pool and
        // their uncommitted work is dropped with them.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                for (id, context) in abandoned {
                    let _ = finish(&id, context.connection, TransactionOperation::Rollback).await;
                }
            });
        }
    }
}

/// Finish a transaction already removed from its manager.
///
/// The connection goes back to the pool after a successful commit or
/// rollback. After a failed commit one rollback is attempted; if the
/// connection still cannot be brought back to a clean state it is closed
/// instead of being parked.
async fn finish(
    id: &str,
    connection: Arc<PooledConnection>,
    operation: TransactionOperation,
) -> Result<(), PoolError> {
    let result = match operation {
        TransactionOperation::Commit => connection.commit().await,
        _ => connection.rollback().await,
    };

    match result {
        Ok(()) => {
            match connection.set_auto_commit(true).await {
                Ok(()) => connection.return_to_pool().await,
                Err(e) => {
                    tracing::warn!(
                        transaction_id = %id,
                        error = %e,
                        "failed to restore auto-commit; discarding connection"
                    );
                    connection.invalidate().await;
                }
            }
            tracing::debug!(transaction_id = %id, %operation, "transaction finished");
            Ok(())
        }
        Err(source) => {
            tracing::warn!(
                transaction_id = %id,
                %operation,
                error = %source,
                "transaction operation failed"
            );
            let recovered = operation == TransactionOperation::Commit
                && connection.rollback().await.is_ok();
            if recovered {
                connection.return_to_pool().await;
            } else {
                connection.invalidate().await;
            }
            Err(PoolError::TransactionOperationFailure {
                id: id.to_string(),
                operation,
                source,
            })
        }
    }
}

fn spawn_sweeper(inner: &Arc<ManagerInner>, period: Duration) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    let shutdown = inner.shutdown.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = weak.upgrade() else {
                break;
            };
            let swept = inner.sweep().await;
            if swept > 0 {
                tracing::debug!(swept, "transaction sweep");
            }
        }
        tracing::trace!("transaction sweeper stopped");
    })
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// The connection behind an open transaction.
///
/// Statements run inside the transaction. Transaction control belongs to the
/// [`TransactionManager`]: `commit`, `rollback` and `set_auto_commit` are
/// refused and `close` does nothing. Once the transaction ends every
/// operation fails with [`dbc_core::Error::ConnectionClosed`].
#[derive(Clone)]
pub struct TransactionConnection {
    transaction_id: String,
    connection: Arc<PooledConnection>,
}

impl TransactionConnection {
    /// Id of the transaction this connection carries.
    #[must_use]
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Pool id of the underlying connection.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.connection.id()
    }

    fn managed(&self) -> dbc_core::Error {
        dbc_core::Error::Transaction(format!(
            "transaction {} is controlled by the transaction manager",
            self.transaction_id
        ))
    }
}

#[async_trait]
impl Connection for TransactionConnection {
    async fn execute_query(&self, sql: &str) -> dbc_core::Result<ResultSet> {
        self.connection.execute_query(sql).await
    }

    async fn execute_update(&self, sql: &str) -> dbc_core::Result<u64> {
        self.connection.execute_update(sql).await
    }

    async fn prepare_statement(&self, sql: &str) -> dbc_core::Result<Box<dyn PreparedStatement>> {
        self.connection.prepare_statement(sql).await
    }

    async fn set_auto_commit(&self, _enabled: bool) -> dbc_core::Result<()> {
        Err(self.managed())
    }

    async fn auto_commit(&self) -> dbc_core::Result<bool> {
        self.connection.auto_commit().await
    }

    async fn commit(&self) -> dbc_core::Result<()> {
        Err(self.managed())
    }

    async fn rollback(&self) -> dbc_core::Result<()> {
        Err(self.managed())
    }

    async fn set_transaction_isolation(&self, level: IsolationLevel) -> dbc_core::Result<()> {
        self.connection.set_transaction_isolation(level).await
    }

    async fn transaction_isolation(&self) -> dbc_core::Result<IsolationLevel> {
        self.connection.transaction_isolation().await
    }

    async fn close(&self) -> dbc_core::Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }
}

impl std::fmt::Debug for TransactionConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionConnection")
            .field("transaction_id", &self.transaction_id)
            .field("connection_id", &self.connection.id())
            .finish()
    }
}
