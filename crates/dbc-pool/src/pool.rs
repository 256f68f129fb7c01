//! Connection pool implementation.
//!
//! The pool keeps an idle queue and an active set behind one mutex. Native
//! I/O (opening, validating, resetting and closing connections) always runs
//! with the lock released; while a connection is outside both collections its
//! capacity is held by a [`Reservation`] so `idle + active + reserved` never
//! exceeds `max_size`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dbc_core::{Connection, Driver, DriverRegistry, IsolationLevel, PreparedStatement, ResultSet};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::{
    ConnectionMetadata, ConnectionState, DefaultLifecycle, DynConnectionLifecycle,
    HealthCheckResult,
};
use crate::maintenance::{self, MaintenanceReport};

/// A pool of connections opened through one [`Driver`].
///
/// Cloning a `Pool` is cheap; every clone refers to the same connections.
///
/// # Example
///
/// ```rust,ignore
/// use dbc_pool::{Pool, PoolConfig};
///
/// let pool = Pool::builder()
///     .registry(registry)
///     .url("postgres://db/app")
///     .credentials("app", "secret")
///     .max_size(20)
///     .build()
///     .await?;
///
/// let conn = pool.get().await?;
/// conn.execute_update("DELETE FROM sessions").await?;
/// conn.close().await?; // back to the idle queue
/// ```
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct Connector {
    driver: Arc<dyn Driver>,
    url: String,
    user: String,
    password: String,
}

impl Connector {
    async fn connect(&self) -> dbc_core::Result<Arc<dyn Connection>> {
        let connection = self
            .driver
            .connect(&self.url, &self.user, &self.password)
            .await?;
        Ok(Arc::from(connection))
    }
}

pub(crate) struct PoolEntry {
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) metadata: ConnectionMetadata,
}

#[derive(Default)]
pub(crate) struct PoolState {
    /// Parked connections; released entries go to the back, borrowers take
    /// from the back.
    pub(crate) idle: VecDeque<PoolEntry>,
    /// Checked-out connections by id.
    pub(crate) active: HashMap<u64, PoolEntry>,
    /// Capacity held by connections being opened, validated or closed.
    pub(crate) reserved: usize,
    /// Callers blocked in [`Pool::get()`].
    pub(crate) waiting: usize,
    pub(crate) closed: bool,
}

impl PoolState {
    fn occupied(&self) -> usize {
        self.idle.len() + self.active.len() + self.reserved
    }
}

pub(crate) struct PoolInner {
    pub(crate) config: PoolConfig,
    connector: Connector,
    lifecycle: DynConnectionLifecycle,
    pub(crate) state: Mutex<PoolState>,
    /// Signalled whenever capacity frees up or the pool closes.
    pub(crate) available: Notify,
    next_connection_id: AtomicU64,
    created_at: Instant,
    pub(crate) metrics: Mutex<PoolMetricsInner>,
    pub(crate) shutdown: CancellationToken,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
pub(crate) struct PoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    validations_performed: u64,
    validations_failed: u64,
    resets_performed: u64,
    resets_failed: u64,
    pub(crate) idle_evictions: u64,
    pub(crate) lifetime_evictions: u64,
}

/// Capacity held for connections that are in neither the idle queue nor the
/// active set. Dropping an unsettled reservation gives the capacity back and
/// wakes waiters.
pub(crate) struct Reservation<'a> {
    pool: &'a PoolInner,
    count: usize,
}

impl<'a> Reservation<'a> {
    pub(crate) fn new(pool: &'a PoolInner, state: &mut PoolState, count: usize) -> Self {
        state.reserved += count;
        Self { pool, count }
    }

    /// Hand the capacity back under an already held lock, typically because
    /// the connection is being put into the idle queue or active set.
    pub(crate) fn settle(mut self, state: &mut PoolState) {
        state.reserved -= self.count;
        self.count = 0;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.count == 0 {
            return;
        }
        self.pool.state.lock().reserved -= self.count;
        for _ in 0..self.count {
            self.pool.available.notify_one();
        }
    }
}

struct Waiter<'a>(&'a PoolInner);

impl<'a> Waiter<'a> {
    fn new(pool: &'a PoolInner, state: &mut PoolState) -> Self {
        state.waiting += 1;
        Self(pool)
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.0.state.lock().waiting -= 1;
    }
}

enum Step<'a> {
    Idle(PoolEntry, Reservation<'a>),
    Create(Reservation<'a>),
    Wait(Waiter<'a>, Instant),
    Unavailable,
    Expired,
}

impl Pool {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Create a pool and open `initial_size` connections.
    ///
    /// Fails with [`PoolError::ConnectionFailure`] if any initial connection
    /// cannot be opened; connections already opened are closed first.
    /// Invalid configuration fails with [`PoolError::Config`].
    pub async fn new(
        driver: Arc<dyn Driver>,
        url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        let connector = Connector {
            driver,
            url: url.into(),
            user: user.into(),
            password: password.into(),
        };
        Self::open(connector, config, Arc::new(DefaultLifecycle)).await
    }

    async fn open(
        connector: Connector,
        config: PoolConfig,
        lifecycle: DynConnectionLifecycle,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        if !connector.driver.accepts_url(&connector.url) {
            return Err(PoolError::ConnectionFailure(
                dbc_core::Error::NoSuitableDriver(connector.url),
            ));
        }

        let inner = Arc::new(PoolInner {
            config,
            connector,
            lifecycle,
            state: Mutex::new(PoolState::default()),
            available: Notify::new(),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
            shutdown: CancellationToken::new(),
            maintenance: Mutex::new(None),
        });

        let initial = inner.config.initial_size as usize;
        let mut opened = Vec::with_capacity(initial);
        for _ in 0..initial {
            match inner.open_entry().await {
                Ok(entry) => opened.push(entry),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        opened = opened.len(),
                        "failed to open initial connections"
                    );
                    for entry in &opened {
                        inner.destroy(entry.connection.as_ref()).await;
                    }
                    return Err(PoolError::ConnectionFailure(e));
                }
            }
        }
        inner.state.lock().idle.extend(opened);

        let worker = maintenance::spawn(&inner);
        *inner.maintenance.lock() = Some(worker);

        tracing::info!(
            driver = inner.connector.driver.name(),
            initial = inner.config.initial_size,
            min_idle = inner.config.min_idle,
            max = inner.config.max_size,
            "connection pool created"
        );

        Ok(Self { inner })
    }

    /// Get a connection from the pool.
    ///
    /// Hands out an idle connection (validated first when `test_on_borrow`
    /// is set), opens a new one if the pool is below `max_size`, or waits up
    /// to `max_wait` for one to be released.
    ///
    /// Fails with [`PoolError::PoolExhausted`] on timeout,
    /// [`PoolError::ValidationFailure`] if the wait expired after idle
    /// connections were discarded for failing validation,
    /// [`PoolError::ConnectionFailure`] if a new connection cannot be opened
    /// and [`PoolError::PoolClosed`] once the pool is closed.
    pub async fn get(&self) -> Result<PooledConnection, PoolError> {
        let started = Instant::now();
        let deadline = started + self.inner.config.max_wait;
        tracing::trace!("acquiring connection from pool");

        let result = self
            .inner
            .acquire(Some(deadline))
            .await
            .and_then(|conn| conn.ok_or_else(|| self.inner.exhausted(started)));
        self.inner.record_checkout(result.is_ok());
        result
    }

    /// Get a connection without waiting.
    ///
    /// Returns `Ok(None)` if every connection is in use and the pool is at
    /// `max_size`.
    pub async fn try_get(&self) -> Result<Option<PooledConnection>, PoolError> {
        let result = self.inner.acquire(None).await;
        if let Ok(Some(_)) | Err(_) = &result {
            self.inner.record_checkout(result.is_ok());
        }
        result
    }

    /// Number of checked-out connections.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    /// Number of connections in the idle queue.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Idle plus active connections.
    #[must_use]
    pub fn total_count(&self) -> usize {
        let state = self.inner.state.lock();
        state.idle.len() + state.active.len()
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            available: state.idle.len() as u32,
            in_use: state.active.len() as u32,
            total: (state.idle.len() + state.active.len()) as u32,
            max: self.inner.config.max_size,
            waiting: state.waiting as u32,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            validations_performed: inner.validations_performed,
            validations_failed: inner.validations_failed,
            resets_performed: inner.resets_performed,
            resets_failed: inner.resets_failed,
            idle_evictions: inner.idle_evictions,
            lifetime_evictions: inner.lifetime_evictions,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Run one maintenance pass now: evict idle and expired connections,
    /// validate idle ones if `test_while_idle` is set, and replenish up to
    /// `min_idle`.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        self.inner.maintain().await
    }

    /// Close the pool.
    ///
    /// Stops the maintenance worker, wakes blocked callers (which fail with
    /// [`PoolError::PoolClosed`]) and closes every idle and checked-out
    /// connection. Statements prepared on those connections fail afterwards.
    /// Calling `close` again does nothing.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("url", &self.inner.connector.url)
            .field("status", &self.status())
            .finish()
    }
}

impl PoolInner {
    async fn acquire(
        self: &Arc<Self>,
        deadline: Option<Instant>,
    ) -> Result<Option<PooledConnection>, PoolError> {
        let started = Instant::now();
        let mut validation_error: Option<String> = None;

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let step = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(PoolError::PoolClosed);
                }
                if let Some(entry) = state.idle.pop_back() {
                    let reservation = Reservation::new(self, &mut state, 1);
                    Step::Idle(entry, reservation)
                } else if state.occupied() < self.config.max_size as usize {
                    Step::Create(Reservation::new(self, &mut state, 1))
                } else {
                    match deadline {
                        None => Step::Unavailable,
                        Some(deadline) if Instant::now() >= deadline => Step::Expired,
                        Some(deadline) => Step::Wait(Waiter::new(self, &mut state), deadline),
                    }
                }
            };

            match step {
                Step::Idle(entry, reservation) => match self.check_out(entry).await {
                    Ok(entry) => return self.activate(entry, reservation).await.map(Some),
                    Err(reason) => {
                        if reason.is_some() {
                            validation_error = reason;
                        }
                    }
                },
                Step::Create(reservation) => {
                    let entry = self
                        .open_entry()
                        .await
                        .map_err(PoolError::ConnectionFailure)?;
                    return self.activate(entry, reservation).await.map(Some);
                }
                Step::Wait(waiter, deadline) => {
                    tracing::trace!("pool at capacity; waiting for a connection");
                    let _ = tokio::time::timeout_at(deadline.into(), notified).await;
                    drop(waiter);
                }
                Step::Unavailable => return Ok(None),
                Step::Expired => {
                    return Err(match validation_error {
                        Some(reason) => PoolError::ValidationFailure(reason),
                        None => self.exhausted(started),
                    });
                }
            }
        }
    }

    fn exhausted(&self, started: Instant) -> PoolError {
        let waited = started.elapsed();
        tracing::warn!(
            waited_ms = waited.as_millis() as u64,
            max = self.config.max_size,
            "pool exhausted"
        );
        PoolError::PoolExhausted {
            waited,
            max_size: self.config.max_size,
        }
    }

    fn record_checkout(&self, success: bool) {
        let mut metrics = self.metrics.lock();
        if success {
            metrics.checkouts_successful += 1;
        } else {
            metrics.checkouts_failed += 1;
        }
    }

    /// Prepare an idle entry for hand-out. On failure the entry is closed and
    /// the validation error, if any, is returned.
    async fn check_out(&self, mut entry: PoolEntry) -> Result<PoolEntry, Option<String>> {
        let id = entry.metadata.id;
        if entry.connection.is_closed() {
            tracing::debug!(connection_id = id, "discarding closed idle connection");
            self.destroy(entry.connection.as_ref()).await;
            return Err(None);
        }
        if entry.metadata.is_expired(self.config.max_lifetime) {
            tracing::debug!(connection_id = id, "discarding idle connection past its max lifetime");
            self.metrics.lock().lifetime_evictions += 1;
            self.destroy(entry.connection.as_ref()).await;
            return Err(None);
        }
        if self.config.test_on_borrow {
            entry.metadata.state = ConnectionState::Validating;
            let result = self.check_health(entry.connection.as_ref()).await;
            if !result.healthy {
                let reason = result
                    .error
                    .unwrap_or_else(|| "validation failed".to_string());
                tracing::warn!(
                    connection_id = id,
                    error = %reason,
                    "connection failed validation on borrow; discarding"
                );
                self.destroy(entry.connection.as_ref()).await;
                return Err(Some(reason));
            }
            entry.metadata.mark_validated();
        }
        Ok(entry)
    }

    async fn activate(
        self: &Arc<Self>,
        mut entry: PoolEntry,
        reservation: Reservation<'_>,
    ) -> Result<PooledConnection, PoolError> {
        let id = entry.metadata.id;
        let checked_out = {
            let mut state = self.state.lock();
            reservation.settle(&mut state);
            if state.closed {
                Err(entry)
            } else {
                entry.metadata.mark_borrowed();
                let metadata = entry.metadata.clone();
                let connection = Arc::clone(&entry.connection);
                state.active.insert(id, entry);
                Ok((metadata, connection, state.idle.len(), state.active.len()))
            }
        };
        let (metadata, connection, idle, active) = match checked_out {
            Ok(checked_out) => checked_out,
            Err(entry) => {
                self.destroy(entry.connection.as_ref()).await;
                return Err(PoolError::PoolClosed);
            }
        };

        tracing::debug!(connection_id = id, idle, active, "connection checked out");
        Ok(PooledConnection {
            connection: Mutex::new(Some(connection)),
            metadata,
            pool: Arc::downgrade(self),
        })
    }

    /// Open a native connection, applying the configured isolation level.
    pub(crate) async fn open_entry(&self) -> dbc_core::Result<PoolEntry> {
        let connection = self.connector.connect().await?;
        if let Some(level) = self.config.transaction_isolation {
            if let Err(e) = connection.set_transaction_isolation(level).await {
                let _ = connection.close().await;
                return Err(e);
            }
        }

        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.metrics.lock().connections_created += 1;
        tracing::debug!(connection_id = id, "opened new connection");

        Ok(PoolEntry {
            connection,
            metadata: ConnectionMetadata::new(id),
        })
    }

    pub(crate) async fn check_health(&self, connection: &dyn Connection) -> HealthCheckResult {
        let result = self
            .lifecycle
            .validate(
                connection,
                &self.config.validation_query,
                self.config.validation_timeout,
            )
            .await;
        let mut metrics = self.metrics.lock();
        metrics.validations_performed += 1;
        if !result.healthy {
            metrics.validations_failed += 1;
        }
        result
    }

    /// Close a native connection that is no longer tracked.
    pub(crate) async fn destroy(&self, connection: &dyn Connection) {
        connection.notify_closing();
        if let Err(e) = connection.close().await {
            tracing::debug!(error = %e, "error closing connection");
        }
        self.metrics.lock().connections_closed += 1;
        if !self.config.close_delay.is_zero() {
            tokio::time::sleep(self.config.close_delay).await;
        }
    }

    /// Return a checked-out connection to the idle queue.
    pub(crate) async fn release(&self, id: u64) {
        let (mut entry, reservation) = {
            let mut state = self.state.lock();
            let Some(entry) = state.active.remove(&id) else {
                if !state.closed {
                    tracing::warn!(connection_id = id, "connection is not checked out; ignoring release");
                }
                return;
            };
            let reservation = Reservation::new(self, &mut state, 1);
            (entry, reservation)
        };

        if !self.prepare_for_idle(&mut entry).await {
            self.destroy(entry.connection.as_ref()).await;
            drop(reservation);
            return;
        }

        let parked = {
            let mut state = self.state.lock();
            reservation.settle(&mut state);
            if state.closed {
                Err(entry)
            } else {
                entry.metadata.mark_idle();
                state.idle.push_back(entry);
                Ok((state.idle.len(), state.active.len()))
            }
        };
        let (idle, active) = match parked {
            Ok(counts) => counts,
            Err(entry) => {
                self.destroy(entry.connection.as_ref()).await;
                return;
            }
        };

        self.available.notify_one();
        tracing::debug!(connection_id = id, idle, active, "connection returned to pool");
    }

    /// Decide whether a returned connection may be parked, resetting it if so.
    async fn prepare_for_idle(&self, entry: &mut PoolEntry) -> bool {
        let id = entry.metadata.id;
        if entry.connection.is_closed() {
            tracing::debug!(connection_id = id, "returned connection is closed; discarding");
            return false;
        }
        if entry.metadata.evict_on_return || entry.metadata.is_expired(self.config.max_lifetime) {
            tracing::debug!(connection_id = id, "retiring connection past its max lifetime");
            self.metrics.lock().lifetime_evictions += 1;
            return false;
        }
        if self.config.test_on_return {
            let result = self.check_health(entry.connection.as_ref()).await;
            if !result.healthy {
                tracing::warn!(
                    connection_id = id,
                    error = ?result.error,
                    "connection failed validation on return; discarding"
                );
                return false;
            }
            entry.metadata.mark_validated();
        }

        let reset = self.lifecycle.reset(entry.connection.as_ref()).await;
        let mut metrics = self.metrics.lock();
        metrics.resets_performed += 1;
        match reset {
            Ok(keep) => keep,
            Err(e) => {
                metrics.resets_failed += 1;
                tracing::warn!(connection_id = id, error = %e, "connection reset failed; discarding");
                false
            }
        }
    }

    /// Close a checked-out connection instead of returning it.
    async fn discard(&self, id: u64) {
        let (entry, reservation) = {
            let mut state = self.state.lock();
            let Some(entry) = state.active.remove(&id) else {
                return;
            };
            let reservation = Reservation::new(self, &mut state, 1);
            (entry, reservation)
        };
        tracing::debug!(connection_id = id, "discarding checked-out connection");
        self.destroy(entry.connection.as_ref()).await;
        drop(reservation);
    }

    /// Stop tracking a checked-out connection without closing it.
    fn forget(&self, id: u64) -> bool {
        let removed = self.state.lock().active.remove(&id).is_some();
        if removed {
            self.available.notify_one();
        }
        removed
    }

    async fn close(&self) {
        let connections: Vec<Arc<dyn Connection>> = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let mut all: Vec<_> = state.idle.drain(..).map(|e| e.connection).collect();
            all.extend(state.active.drain().map(|(_, e)| e.connection));
            all
        };

        self.available.notify_waiters();
        self.shutdown.cancel();
        let worker = self.maintenance.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "pool maintenance worker failed");
            }
        }

        for connection in &connections {
            self.destroy(connection.as_ref()).await;
        }
        tracing::info!(closed = connections.len(), "connection pool closed");
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Builder for creating a connection pool.
///
/// A driver is taken either directly or looked up by URL scheme in a
/// [`DriverRegistry`].
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder()
///     .driver(Arc::new(MemoryDriver::new()))
///     .url("memory://orders")
///     .initial_size(3)
///     .max_size(10)
///     .build()
///     .await?;
/// ```
pub struct PoolBuilder {
    driver: Option<Arc<dyn Driver>>,
    registry: Option<Arc<DriverRegistry>>,
    url: Option<String>,
    user: String,
    password: String,
    pool_config: PoolConfig,
    lifecycle: Option<DynConnectionLifecycle>,
}

impl PoolBuilder {
    /// Create a new pool builder with default settings.
    pub fn new() -> Self {
        Self {
            driver: None,
            registry: None,
            url: None,
            user: String::new(),
            password: String::new(),
            pool_config: PoolConfig::default(),
            lifecycle: None,
        }
    }

    /// Use this driver for every connection.
    #[must_use]
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    /// Look the driver up by URL scheme in this registry.
    #[must_use]
    pub fn registry(mut self, registry: Arc<DriverRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the database URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the user name and password.
    #[must_use]
    pub fn credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Replace the validation and reset hooks.
    #[must_use]
    pub fn lifecycle(mut self, lifecycle: DynConnectionLifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_size(mut self, count: u32) -> Self {
        self.pool_config.max_size = count;
        self
    }

    /// Set the number of connections kept open by maintenance.
    #[must_use]
    pub fn min_idle(mut self, count: u32) -> Self {
        self.pool_config.min_idle = count;
        self
    }

    /// Set the number of connections opened at construction.
    #[must_use]
    pub fn initial_size(mut self, count: u32) -> Self {
        self.pool_config.initial_size = count;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn max_wait(mut self, timeout: Duration) -> Self {
        self.pool_config.max_wait = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.pool_config.idle_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.pool_config.max_lifetime = lifetime;
        self
    }

    /// Enable or disable validation on borrow.
    #[must_use]
    pub fn test_on_borrow(mut self, enabled: bool) -> Self {
        self.pool_config.test_on_borrow = enabled;
        self
    }

    /// Enable or disable validation on return.
    #[must_use]
    pub fn test_on_return(mut self, enabled: bool) -> Self {
        self.pool_config.test_on_return = enabled;
        self
    }

    /// Build the pool.
    pub async fn build(self) -> Result<Pool, PoolError> {
        let url = self
            .url
            .ok_or_else(|| PoolError::Config("a database URL is required".into()))?;
        let driver = match (self.driver, self.registry) {
            (Some(driver), _) => driver,
            (None, Some(registry)) => registry
                .driver_for_url(&url)
                .map_err(PoolError::ConnectionFailure)?,
            (None, None) => {
                return Err(PoolError::Config(
                    "either a driver or a driver registry is required".into(),
                ));
            }
        };

        let connector = Connector {
            driver,
            url,
            user: self.user,
            password: self.password,
        };
        let lifecycle = self
            .lifecycle
            .unwrap_or_else(|| Arc::new(DefaultLifecycle));
        Pool::open(connector, self.pool_config, lifecycle).await
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Total number of connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
    /// Callers waiting for a connection.
    pub waiting: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (timeouts, pool closed, etc.).
    pub checkouts_failed: u64,
    /// Validation queries run.
    pub validations_performed: u64,
    /// Validation queries that failed.
    pub validations_failed: u64,
    /// Connection resets performed.
    pub resets_performed: u64,
    /// Connection resets that failed.
    pub resets_failed: u64,
    /// Connections closed for sitting idle too long.
    pub idle_evictions: u64,
    /// Connections closed for exceeding their max lifetime.
    pub lifetime_evictions: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Calculate validation success rate (0.0 to 1.0).
    #[must_use]
    pub fn validation_success_rate(&self) -> f64 {
        if self.validations_performed == 0 {
            return 1.0;
        }
        let successful = self.validations_performed - self.validations_failed;
        successful as f64 / self.validations_performed as f64
    }
}

/// A connection checked out of the pool.
///
/// Implements [`Connection`] by delegating to the native connection, except
/// that [`close()`](Connection::close) returns it to the pool. Closing twice
/// is a no-op. Dropping an unreturned connection inside a Tokio runtime
/// returns it in a background task.
pub struct PooledConnection {
    connection: Mutex<Option<Arc<dyn Connection>>>,
    metadata: ConnectionMetadata,
    pool: Weak<PoolInner>,
}

impl PooledConnection {
    /// Pool-assigned connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.metadata.id
    }

    /// Metadata as of checkout.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// Return the connection to the pool. Same as [`Connection::close`].
    pub async fn return_to_pool(&self) {
        let Some(connection) = self.connection.lock().take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => {
                drop(connection);
                pool.release(self.metadata.id).await;
            }
            None => {
                let _ = connection.close().await;
            }
        }
    }

    /// Close the native connection instead of returning it, freeing its
    /// slot in the pool.
    pub async fn invalidate(&self) {
        let Some(connection) = self.connection.lock().take() else {
            return;
        };
        match self.pool.upgrade() {
            Some(pool) => {
                drop(connection);
                pool.discard(self.metadata.id).await;
            }
            None => {
                let _ = connection.close().await;
            }
        }
    }

    /// Detach the connection from the pool.
    ///
    /// The pool stops tracking it and frees its slot; the caller owns the
    /// native connection from now on. Returns `None` if the connection was
    /// already returned.
    pub fn detach(self) -> Option<Arc<dyn Connection>> {
        let connection = self.connection.lock().take()?;
        if let Some(pool) = self.pool.upgrade() {
            pool.forget(self.metadata.id);
        }
        tracing::debug!(connection_id = self.metadata.id, "connection detached from pool");
        Some(connection)
    }

    fn native(&self) -> dbc_core::Result<Arc<dyn Connection>> {
        self.connection
            .lock()
            .clone()
            .ok_or(dbc_core::Error::ConnectionClosed)
    }
}

#[async_trait]
impl Connection for PooledConnection {
    async fn execute_query(&self, sql: &str) -> dbc_core::Result<ResultSet> {
        self.native()?.execute_query(sql).await
    }

    async fn execute_update(&self, sql: &str) -> dbc_core::Result<u64> {
        self.native()?.execute_update(sql).await
    }

    async fn prepare_statement(&self, sql: &str) -> dbc_core::Result<Box<dyn PreparedStatement>> {
        self.native()?.prepare_statement(sql).await
    }

    async fn set_auto_commit(&self, enabled: bool) -> dbc_core::Result<()> {
        self.native()?.set_auto_commit(enabled).await
    }

    async fn auto_commit(&self) -> dbc_core::Result<bool> {
        self.native()?.auto_commit().await
    }

    async fn commit(&self) -> dbc_core::Result<()> {
        self.native()?.commit().await
    }

    async fn rollback(&self) -> dbc_core::Result<()> {
        self.native()?.rollback().await
    }

    async fn set_transaction_isolation(&self, level: IsolationLevel) -> dbc_core::Result<()> {
        self.native()?.set_transaction_isolation(level).await
    }

    async fn transaction_isolation(&self) -> dbc_core::Result<IsolationLevel> {
        self.native()?.transaction_isolation().await
    }

    async fn close(&self) -> dbc_core::Result<()> {
        self.return_to_pool().await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .is_none_or(|connection| connection.is_closed())
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.metadata.id)
            .field("returned", &self.connection.lock().is_none())
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.get_mut().take() else {
            return;
        };
        drop(connection);
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let id = self.metadata.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::trace!(connection_id = id, "returning dropped connection to pool");
                handle.spawn(async move { pool.release(id).await });
            }
            Err(_) => {
                tracing::warn!(
                    connection_id = id,
                    "connection dropped outside a runtime; removing it from the pool"
                );
                pool.forget(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            available: 5,
            in_use: 5,
            total: 10,
            max: 20,
            waiting: 0,
        };
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_status_at_capacity() {
        let status = PoolStatus {
            available: 0,
            in_use: 10,
            total: 10,
            max: 10,
            waiting: 3,
        };
        assert!(status.is_at_capacity());

        let status2 = PoolStatus {
            available: 5,
            in_use: 5,
            total: 10,
            max: 20,
            waiting: 0,
        };
        assert!(!status2.is_at_capacity());
    }

    #[test]
    fn test_pool_metrics_success_rates() {
        let metrics = PoolMetrics {
            connections_created: 10,
            connections_closed: 2,
            checkouts_successful: 90,
            checkouts_failed: 10,
            validations_performed: 100,
            validations_failed: 5,
            resets_performed: 80,
            resets_failed: 2,
            idle_evictions: 1,
            lifetime_evictions: 1,
            uptime: Duration::from_secs(3600),
        };

        assert!((metrics.checkout_success_rate() - 0.9).abs() < f64::EPSILON);
        assert!((metrics.validation_success_rate() - 0.95).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder_default() {
        let builder = PoolBuilder::new();
        assert_eq!(builder.pool_config.initial_size, 5);
        assert_eq!(builder.pool_config.max_size, 20);
        assert!(builder.driver.is_none());
    }

    #[test]
    fn test_builder_fluent() {
        let builder = Pool::builder()
            .url("memory://fluent")
            .credentials("app", "secret")
            .min_idle(1)
            .max_size(50)
            .test_on_borrow(false);

        assert_eq!(builder.url.as_deref(), Some("memory://fluent"));
        assert_eq!(builder.user, "app");
        assert_eq!(builder.pool_config.min_idle, 1);
        assert_eq!(builder.pool_config.max_size, 50);
        assert!(!builder.pool_config.test_on_borrow);
    }

    #[tokio::test]
    async fn test_builder_requires_url_and_driver() {
        let err = Pool::builder().build().await.unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));

        let err = Pool::builder().url("memory://x").build().await.unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));

        let registry = Arc::new(DriverRegistry::new());
        let err = Pool::builder()
            .registry(registry)
            .url("nosuch://x")
            .build()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::ConnectionFailure(dbc_core::Error::NoSuitableDriver(_))
        ));
    }

}
