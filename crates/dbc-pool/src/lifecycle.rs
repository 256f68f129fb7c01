//! Connection lifecycle management.
//!
//! Every pooled connection carries [`ConnectionMetadata`] recording when it
//! was opened, borrowed, validated and parked. The [`ConnectionLifecycle`]
//! hooks decide whether a connection is healthy and how it is cleaned up on
//! its way back to the idle queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dbc_core::Connection;

/// Where a pooled connection currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Parked in the idle queue.
    Idle,
    /// Checked out by a caller.
    InUse,
    /// Taken out of the idle queue for a health check.
    Validating,
    /// Closed and no longer tracked.
    Closed,
}

/// Bookkeeping attached to each pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Pool-assigned connection id, unique per pool.
    pub id: u64,
    /// When the native connection was opened.
    pub created_at: Instant,
    /// Wall-clock time the native connection was opened.
    pub opened_at: DateTime<Utc>,
    /// When the connection was last handed out.
    pub last_borrowed_at: Option<Instant>,
    /// When the connection last passed validation.
    pub last_validated_at: Option<Instant>,
    /// When the connection last entered the idle queue.
    pub idle_since: Instant,
    /// Current state.
    pub state: ConnectionState,
    /// Number of times the connection was handed out.
    pub borrow_count: u64,
    /// Retire the connection instead of parking it when it comes back.
    pub evict_on_return: bool,
}

impl ConnectionMetadata {
    /// Metadata for a freshly opened connection.
    #[must_use]
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            opened_at: Utc::now(),
            last_borrowed_at: None,
            last_validated_at: None,
            idle_since: now,
            state: ConnectionState::Idle,
            borrow_count: 0,
            evict_on_return: false,
        }
    }

    /// Time since the connection was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time spent in the idle queue so far. Zero unless idle.
    #[must_use]
    pub fn idle_duration(&self) -> Duration {
        if self.state == ConnectionState::Idle {
            self.idle_since.elapsed()
        } else {
            Duration::ZERO
        }
    }

    /// Whether the connection outlived `max_lifetime`.
    #[must_use]
    pub fn is_expired(&self, max_lifetime: Option<Duration>) -> bool {
        max_lifetime.is_some_and(|limit| self.age() > limit)
    }

    /// Whether the connection sat idle longer than `idle_timeout`.
    #[must_use]
    pub fn is_idle_expired(&self, idle_timeout: Option<Duration>) -> bool {
        idle_timeout.is_some_and(|limit| self.idle_duration() > limit)
    }

    pub(crate) fn mark_borrowed(&mut self) {
        self.state = ConnectionState::InUse;
        self.last_borrowed_at = Some(Instant::now());
        self.borrow_count += 1;
    }

    pub(crate) fn mark_idle(&mut self) {
        self.state = ConnectionState::Idle;
        self.idle_since = Instant::now();
    }

    pub(crate) fn mark_validated(&mut self) {
        self.last_validated_at = Some(Instant::now());
    }
}

/// Outcome of a validation query.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Whether the connection is usable.
    pub healthy: bool,
    /// Round-trip time of the check.
    pub latency: Duration,
    /// Failure description when unhealthy.
    pub error: Option<String>,
}

impl HealthCheckResult {
    /// A passing result.
    #[must_use]
    pub fn healthy(latency: Duration) -> Self {
        Self {
            healthy: true,
            latency,
            error: None,
        }
    }

    /// A failing result.
    #[must_use]
    pub fn unhealthy(latency: Duration, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency,
            error: Some(error.into()),
        }
    }
}

/// Hooks run by the pool around a connection's life.
#[async_trait]
pub trait ConnectionLifecycle: Send + Sync {
    /// Check that a connection is usable.
    async fn validate(
        &self,
        connection: &dyn Connection,
        query: &str,
        timeout: Duration,
    ) -> HealthCheckResult;

    /// Restore session state before the connection is parked.
    ///
    /// Returns `Ok(false)` if the connection should be discarded instead.
    async fn reset(&self, connection: &dyn Connection) -> dbc_core::Result<bool>;
}

/// Shared lifecycle hooks.
pub type DynConnectionLifecycle = Arc<dyn ConnectionLifecycle>;

/// Runs the validation query under a timeout and forces auto-commit back on.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLifecycle;

#[async_trait]
impl ConnectionLifecycle for DefaultLifecycle {
    async fn validate(
        &self,
        connection: &dyn Connection,
        query: &str,
        timeout: Duration,
    ) -> HealthCheckResult {
        let start = Instant::now();
        if connection.is_closed() {
            return HealthCheckResult::unhealthy(start.elapsed(), "connection is closed");
        }
        match tokio::time::timeout(timeout, connection.execute_query(query)).await {
            Ok(Ok(_)) => HealthCheckResult::healthy(start.elapsed()),
            Ok(Err(e)) => HealthCheckResult::unhealthy(start.elapsed(), e.to_string()),
            Err(_) => HealthCheckResult::unhealthy(
                start.elapsed(),
                format!("validation query timed out after {timeout:?}"),
            ),
        }
    }

    async fn reset(&self, connection: &dyn Connection) -> dbc_core::Result<bool> {
        if connection.is_closed() {
            return Ok(false);
        }
        if !connection.auto_commit().await? {
            connection.set_auto_commit(true).await?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_expiry() {
        let mut meta = ConnectionMetadata::new(7);
        assert!(!meta.is_expired(None));
        assert!(!meta.is_expired(Some(Duration::from_secs(60))));
        assert!(!meta.is_idle_expired(None));

        meta.created_at -= Duration::from_secs(120);
        meta.idle_since -= Duration::from_secs(120);
        assert!(meta.is_expired(Some(Duration::from_secs(60))));
        assert!(meta.is_idle_expired(Some(Duration::from_secs(60))));

        meta.mark_borrowed();
        assert_eq!(meta.state, ConnectionState::InUse);
        assert_eq!(meta.borrow_count, 1);
        assert_eq!(meta.idle_duration(), Duration::ZERO);
        assert!(!meta.is_idle_expired(Some(Duration::from_secs(60))));

        meta.mark_idle();
        assert!(!meta.is_idle_expired(Some(Duration::from_secs(60))));
    }

    #[test]
    fn test_health_check_result() {
        let ok = HealthCheckResult::healthy(Duration::from_millis(1));
        assert!(ok.healthy && ok.error.is_none());

        let bad = HealthCheckResult::unhealthy(Duration::from_millis(1), "gone");
        assert!(!bad.healthy);
        assert_eq!(bad.error.as_deref(), Some("gone"));
    }
}
