//! Fault injection and driver counters.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Shared switches that make driver operations fail on demand.
///
/// Counters are "fail the next N" budgets; each failing operation consumes
/// one unit.
#[derive(Debug, Default)]
pub struct FaultInjector {
    connect_failures: AtomicUsize,
    query_failures: AtomicUsize,
    commit_failures: AtomicUsize,
    rollback_failures: AtomicUsize,
    refuse_connections: AtomicBool,
    connect_delay_ms: AtomicU64,
}

impl FaultInjector {
    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` `execute_query` calls fail (validation queries included).
    pub fn fail_next_queries(&self, n: usize) {
        self.query_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` commits fail.
    pub fn fail_next_commits(&self, n: usize) {
        self.commit_failures.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` rollbacks fail.
    pub fn fail_next_rollbacks(&self, n: usize) {
        self.rollback_failures.store(n, Ordering::SeqCst);
    }

    /// Refuse every connection attempt until switched off.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    /// Delay every connection attempt.
    pub fn set_connect_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.connect_delay_ms.store(ms, Ordering::SeqCst);
    }

    pub(crate) fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms.load(Ordering::SeqCst))
    }

    pub(crate) fn take_connect_failure(&self) -> bool {
        self.refuse_connections.load(Ordering::SeqCst) || take(&self.connect_failures)
    }

    pub(crate) fn take_query_failure(&self) -> bool {
        take(&self.query_failures)
    }

    pub(crate) fn take_commit_failure(&self) -> bool {
        take(&self.commit_failures)
    }

    pub(crate) fn take_rollback_failure(&self) -> bool {
        take(&self.rollback_failures)
    }
}

fn take(budget: &AtomicUsize) -> bool {
    budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Counters of native driver activity.
#[derive(Debug, Default)]
pub struct DriverStats {
    pub(crate) opened: AtomicUsize,
    pub(crate) closed: AtomicUsize,
    pub(crate) commits: AtomicUsize,
    pub(crate) rollbacks: AtomicUsize,
    pub(crate) queries: AtomicUsize,
}

impl DriverStats {
    /// Native connections opened.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Native connections closed.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Native connections currently open.
    pub fn open(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }

    /// Successful explicit commits.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Successful explicit rollbacks.
    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// `execute_query` calls, including failed ones.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_is_consumed() {
        let faults = FaultInjector::default();
        faults.fail_next_commits(2);
        assert!(faults.take_commit_failure());
        assert!(faults.take_commit_failure());
        assert!(!faults.take_commit_failure());
    }

    #[test]
    fn test_refuse_overrides_budget() {
        let faults = FaultInjector::default();
        faults.refuse_connections(true);
        assert!(faults.take_connect_failure());
        assert!(faults.take_connect_failure());
        faults.refuse_connections(false);
        assert!(!faults.take_connect_failure());
    }
}
