//! Background pool maintenance.
//!
//! A single worker task per pool wakes every `maintenance_interval` and runs
//! [`PoolInner::maintain`]: lifetime and idle eviction, optional idle
//! validation, and replenishment up to `min_idle`. The worker holds only a
//! weak reference to the pool and stops when the pool's shutdown token is
//! cancelled.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::lifecycle::ConnectionState;
use crate::pool::{PoolEntry, PoolInner, Reservation};

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Idle connections closed for exceeding the idle timeout.
    pub idle_evicted: usize,
    /// Idle connections closed for exceeding the max lifetime.
    pub lifetime_evicted: usize,
    /// Idle connections closed for failing validation.
    pub validation_failed: usize,
    /// Connections opened to restore `min_idle`.
    pub replenished: usize,
}

impl MaintenanceReport {
    /// Whether the pass changed anything.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

pub(crate) fn spawn(pool: &Arc<PoolInner>) -> JoinHandle<()> {
    let weak = Arc::downgrade(pool);
    let shutdown = pool.shutdown.clone();
    let period = pool.config.maintenance_interval;

    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(pool) = weak.upgrade() else {
                break;
            };
            let report = pool.maintain().await;
            if !report.is_noop() {
                tracing::debug!(
                    idle_evicted = report.idle_evicted,
                    lifetime_evicted = report.lifetime_evicted,
                    validation_failed = report.validation_failed,
                    replenished = report.replenished,
                    "pool maintenance pass"
                );
            }
        }
        tracing::trace!("pool maintenance worker stopped");
    })
}

impl PoolInner {
    pub(crate) async fn maintain(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let max_lifetime = self.config.max_lifetime;
        let idle_timeout = self.config.idle_timeout;
        let min_idle = self.config.min_idle as usize;

        let (evicted, evicted_hold, to_validate, validate_hold) = {
            let mut state = self.state.lock();
            if state.closed {
                return report;
            }

            for entry in state.active.values_mut() {
                if entry.metadata.is_expired(max_lifetime) {
                    entry.metadata.evict_on_return = true;
                }
            }

            // Oldest parked entries sit at the front.
            let mut total = state.idle.len() + state.active.len();
            let mut evicted = Vec::new();
            let mut kept = VecDeque::with_capacity(state.idle.len());
            while let Some(entry) = state.idle.pop_front() {
                if entry.metadata.is_expired(max_lifetime) {
                    report.lifetime_evicted += 1;
                    total -= 1;
                    evicted.push(entry);
                } else if total > min_idle && entry.metadata.is_idle_expired(idle_timeout) {
                    report.idle_evicted += 1;
                    total -= 1;
                    evicted.push(entry);
                } else {
                    kept.push_back(entry);
                }
            }

            let to_validate = if self.config.test_while_idle {
                kept.into_iter().collect::<Vec<_>>()
            } else {
                state.idle = kept;
                Vec::new()
            };

            let evicted_hold = Reservation::new(self, &mut state, evicted.len());
            let validate_hold = Reservation::new(self, &mut state, to_validate.len());
            (evicted, evicted_hold, to_validate, validate_hold)
        };

        if report.idle_evicted + report.lifetime_evicted > 0 {
            let mut metrics = self.metrics.lock();
            metrics.idle_evictions += report.idle_evicted as u64;
            metrics.lifetime_evictions += report.lifetime_evicted as u64;
        }
        for entry in &evicted {
            tracing::debug!(
                connection_id = entry.metadata.id,
                age_ms = entry.metadata.age().as_millis() as u64,
                "evicting idle connection"
            );
            self.destroy(entry.connection.as_ref()).await;
        }
        drop(evicted_hold);

        if !to_validate.is_empty() {
            report.validation_failed = self.revalidate(to_validate, validate_hold).await;
        }

        report.replenished = self.replenish(min_idle).await;
        report
    }

    /// Validate entries taken out of the idle queue, closing failures and
    /// parking the rest back at the front. Returns the failure count.
    async fn revalidate(&self, entries: Vec<PoolEntry>, hold: Reservation<'_>) -> usize {
        let mut healthy = Vec::with_capacity(entries.len());
        let mut failed = 0;
        for mut entry in entries {
            entry.metadata.state = ConnectionState::Validating;
            let result = self.check_health(entry.connection.as_ref()).await;
            if result.healthy {
                entry.metadata.mark_validated();
                entry.metadata.state = ConnectionState::Idle;
                healthy.push(entry);
            } else {
                tracing::warn!(
                    connection_id = entry.metadata.id,
                    error = ?result.error,
                    "idle connection failed validation; discarding"
                );
                self.destroy(entry.connection.as_ref()).await;
                failed += 1;
            }
        }

        let stale = {
            let mut state = self.state.lock();
            hold.settle(&mut state);
            if state.closed {
                healthy
            } else {
                for entry in healthy.into_iter().rev() {
                    state.idle.push_front(entry);
                }
                Vec::new()
            }
        };
        if stale.is_empty() {
            self.available.notify_waiters();
        }
        for entry in &stale {
            self.destroy(entry.connection.as_ref()).await;
        }
        failed
    }

    /// Open connections until `idle + active` reaches `min_idle`, bounded by
    /// `max_size`. Stops at the first failure.
    async fn replenish(&self, min_idle: usize) -> usize {
        let max = self.config.max_size as usize;
        let mut opened = 0;

        loop {
            let reservation = {
                let mut state = self.state.lock();
                let occupied = state.idle.len() + state.active.len() + state.reserved;
                if state.closed || occupied >= min_idle || occupied >= max {
                    break;
                }
                Reservation::new(self, &mut state, 1)
            };

            let entry = match self.open_entry().await {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to replenish pool");
                    break;
                }
            };

            let rejected = {
                let mut state = self.state.lock();
                reservation.settle(&mut state);
                if state.closed {
                    Some(entry)
                } else {
                    state.idle.push_back(entry);
                    None
                }
            };
            if let Some(entry) = rejected {
                self.destroy(entry.connection.as_ref()).await;
                break;
            }
            self.available.notify_one();
            opened += 1;
        }
        opened
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_noop() {
        assert!(MaintenanceReport::default().is_noop());
        let report = MaintenanceReport {
            replenished: 1,
            ..Default::default()
        };
        assert!(!report.is_noop());
    }
}
