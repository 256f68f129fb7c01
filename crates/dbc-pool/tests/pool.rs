//! Connection pool integration tests against the memory driver.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::{config, eventually, memory_pool};
use dbc_core::{Connection, Driver, DriverRegistry, Error, IsolationLevel};
use dbc_pool::{ErrorKind, Pool, PoolError};
use dbc_testing::MemoryDriver;

// =============================================================================
// Sizing and bookkeeping
// =============================================================================

#[tokio::test]
async fn test_basic_pool_accounting() {
    let (driver, pool) = memory_pool("basic", config(3, 10, 2)).await;
    assert_eq!(pool.idle_count(), 3);
    assert_eq!(pool.active_count(), 0);
    assert_eq!(pool.total_count(), 3);

    let mut held = Vec::new();
    for _ in 0..5 {
        held.push(pool.get().await.unwrap());
    }
    assert_eq!(pool.active_count(), 5);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.total_count(), 5);
    assert_eq!(driver.stats().opened(), 5);

    for conn in &held {
        conn.close().await.unwrap();
    }
    assert_eq!(pool.active_count(), 0);
    assert_eq!(pool.idle_count(), 5);

    let status = pool.status();
    assert_eq!(status.available, 5);
    assert_eq!(status.in_use, 0);
    assert_eq!(status.max, 10);
    assert_eq!(pool.metrics().checkouts_successful, 5);
}

#[tokio::test]
async fn test_round_trip_leaves_idle_unchanged() {
    let (_driver, pool) = memory_pool("round_trip", config(2, 4, 0)).await;

    let conn = pool.get().await.unwrap();
    let mut rs = conn.execute_query("SELECT 1").await.unwrap();
    assert!(rs.next());
    assert_eq!(rs.get::<i64>(0).unwrap(), 1);
    conn.close().await.unwrap();

    assert_eq!(pool.active_count(), 0);
    assert_eq!(pool.idle_count(), 2);
}

#[tokio::test]
async fn test_double_close_is_noop() {
    let (_driver, pool) = memory_pool("double_close", config(1, 2, 0)).await;

    let conn = pool.get().await.unwrap();
    conn.close().await.unwrap();
    conn.close().await.unwrap();
    conn.return_to_pool().await;

    assert_eq!(pool.active_count(), 0);
    assert_eq!(pool.idle_count(), 1);
    assert!(conn.is_closed());
    assert!(matches!(
        conn.execute_query("SELECT 1").await,
        Err(Error::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_idle_connections_are_reused() {
    let (driver, pool) = memory_pool("reuse", config(1, 4, 0)).await;

    let first = pool.get().await.unwrap();
    let id = first.id();
    first.close().await.unwrap();

    let second = pool.get().await.unwrap();
    assert_eq!(second.id(), id);
    assert_eq!(second.metadata().borrow_count, 2);
    assert_eq!(driver.stats().opened(), 1);
}

// =============================================================================
// Waiting and exhaustion
// =============================================================================

#[tokio::test]
async fn test_exhaustion_after_max_wait() {
    let (_driver, pool) = memory_pool(
        "exhaustion",
        config(0, 2, 0).max_wait(Duration::from_millis(100)),
    )
    .await;

    let _a = pool.get().await.unwrap();
    let _b = pool.get().await.unwrap();

    let started = Instant::now();
    let err = pool.get().await.unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, PoolError::PoolExhausted { max_size: 2, .. }));
    assert_eq!(err.kind(), ErrorKind::PoolExhausted);
    assert!(waited >= Duration::from_millis(100), "waited {waited:?}");
    assert!(waited < Duration::from_secs(1), "waited {waited:?}");
    assert_eq!(pool.active_count(), 2);
    assert_eq!(pool.metrics().checkouts_failed, 1);
    assert_eq!(pool.status().waiting, 0);
}

#[tokio::test]
async fn test_waiter_receives_released_connection() {
    let (_driver, pool) = memory_pool("handoff", config(1, 1, 0)).await;
    let held = pool.get().await.unwrap();
    let id = held.id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|c| c.id()) })
    };
    assert!(eventually(|| pool.status().waiting == 1).await);

    held.close().await.unwrap();
    assert_eq!(waiter.await.unwrap().unwrap(), id);
}

#[tokio::test]
async fn test_try_get_does_not_wait() {
    let (_driver, pool) = memory_pool("try_get", config(1, 1, 0)).await;

    let first = pool.try_get().await.unwrap().unwrap();
    assert!(pool.try_get().await.unwrap().is_none());

    first.close().await.unwrap();
    assert!(pool.try_get().await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_load_respects_max_size() {
    const MAX: usize = 4;
    const TASKS: usize = 16;
    const ITERATIONS: usize = 25;

    let (_driver, pool) = memory_pool(
        "load",
        config(2, MAX as u32, 0).max_wait(Duration::from_secs(10)),
    )
    .await;
    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..TASKS {
        let pool = pool.clone();
        let in_use = Arc::clone(&in_use);
        let peak = Arc::clone(&peak);
        let completed = Arc::clone(&completed);
        handles.push(tokio::spawn(async move {
            for _ in 0..ITERATIONS {
                let conn = pool.get().await.unwrap();
                let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                assert!(pool.active_count() <= MAX);
                assert!(pool.total_count() <= MAX);

                conn.execute_query("SELECT 1").await.unwrap();
                tokio::task::yield_now().await;

                in_use.fetch_sub(1, Ordering::SeqCst);
                conn.close().await.unwrap();
                completed.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(completed.load(Ordering::SeqCst), TASKS * ITERATIONS);
    assert!(peak.load(Ordering::SeqCst) <= MAX);
    assert_eq!(pool.active_count(), 0);
    assert!(pool.total_count() <= MAX);
}

// =============================================================================
// Validation
// =============================================================================

#[tokio::test]
async fn test_failed_borrow_validation_discards_and_retries() {
    let (driver, pool) = memory_pool("borrow_validation", config(2, 4, 0)).await;

    driver.faults().fail_next_queries(1);
    let conn = pool.get().await.unwrap();
    conn.execute_query("SELECT 1").await.unwrap();

    assert_eq!(pool.active_count(), 1);
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(driver.stats().closed(), 1);

    let metrics = pool.metrics();
    assert_eq!(metrics.validations_performed, 2);
    assert_eq!(metrics.validations_failed, 1);
}

#[tokio::test]
async fn test_failed_return_validation_discards() {
    let (driver, pool) = memory_pool(
        "return_validation",
        config(1, 2, 0).test_on_borrow(false).test_on_return(true),
    )
    .await;

    let conn = pool.get().await.unwrap();
    driver.faults().fail_next_queries(1);
    conn.close().await.unwrap();

    assert_eq!(pool.total_count(), 0);
    assert_eq!(driver.stats().open(), 0);
}

#[tokio::test]
async fn test_release_restores_auto_commit() {
    let (_driver, pool) = memory_pool("reset", config(1, 1, 0)).await;

    let conn = pool.get().await.unwrap();
    conn.set_auto_commit(false).await.unwrap();
    conn.close().await.unwrap();

    let conn = pool.get().await.unwrap();
    assert!(conn.auto_commit().await.unwrap());
    assert_eq!(pool.metrics().resets_performed, 1);
}

#[tokio::test]
async fn test_isolation_applied_to_new_connections() {
    let (_driver, pool) = memory_pool(
        "isolation",
        config(1, 2, 0).transaction_isolation(IsolationLevel::Serializable),
    )
    .await;

    let conn = pool.get().await.unwrap();
    assert_eq!(
        conn.transaction_isolation().await.unwrap(),
        IsolationLevel::Serializable
    );
}

// =============================================================================
// Construction
// =============================================================================

/// Lets a fixed number of connections through, then fails.
struct FlakyDriver {
    inner: MemoryDriver,
    successes: AtomicUsize,
}

#[async_trait]
impl Driver for FlakyDriver {
    fn name(&self) -> &str {
        "flaky"
    }

    fn accepts_url(&self, url: &str) -> bool {
        self.inner.accepts_url(url)
    }

    async fn connect(
        &self,
        url: &str,
        user: &str,
        password: &str,
    ) -> dbc_core::Result<Box<dyn Connection>> {
        let allowed = self
            .successes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(Error::Connection("server went away".into()));
        }
        self.inner.connect(url, user, password).await
    }
}

#[tokio::test]
async fn test_construction_fails_fast_and_cleans_up() {
    let driver = Arc::new(FlakyDriver {
        inner: MemoryDriver::new(),
        successes: AtomicUsize::new(2),
    });

    let err = Pool::new(driver.clone(), "memory://flaky", "", "", config(3, 5, 0))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PoolError::ConnectionFailure(Error::Connection(_))
    ));
    assert_eq!(driver.inner.stats().opened(), 2);
    assert_eq!(driver.inner.stats().open(), 0);
}

#[tokio::test]
async fn test_construction_rejects_bad_config_and_url() {
    let driver = Arc::new(MemoryDriver::new());

    let err = Pool::new(driver.clone(), "memory://x", "", "", config(5, 2, 0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "CONFIG");

    let err = Pool::new(driver, "postgres://x", "", "", config(1, 2, 0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PoolError::ConnectionFailure(Error::NoSuitableDriver(_))
    ));
}

#[tokio::test]
async fn test_builder_resolves_driver_from_registry() {
    let registry = Arc::new(DriverRegistry::new());
    registry.register("memory", Arc::new(MemoryDriver::new()));

    let pool = Pool::builder()
        .registry(registry)
        .url("memory://registry")
        .pool_config(config(2, 4, 0))
        .build()
        .await
        .unwrap();

    assert_eq!(pool.idle_count(), 2);
    pool.close().await;
}

#[tokio::test]
async fn test_connection_failure_after_construction() {
    let (driver, pool) = memory_pool("connect_failure", config(0, 2, 0)).await;

    driver.faults().refuse_connections(true);
    let err = pool.get().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionFailure);
    assert!(err.is_retryable());
    assert_eq!(pool.total_count(), 0);

    driver.faults().refuse_connections(false);
    assert!(pool.get().await.is_ok());
}

// =============================================================================
// Maintenance
// =============================================================================

#[tokio::test]
async fn test_idle_eviction_keeps_min_idle() {
    let (driver, pool) = memory_pool(
        "idle_eviction",
        config(3, 5, 1).idle_timeout(Some(Duration::from_millis(50))),
    )
    .await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let report = pool.run_maintenance().await;

    assert_eq!(report.idle_evicted, 2);
    assert_eq!(report.replenished, 0);
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(driver.stats().open(), 1);
    assert_eq!(pool.metrics().idle_evictions, 2);
}

#[tokio::test]
async fn test_lifetime_eviction_idle_and_active() {
    let (driver, pool) = memory_pool(
        "lifetime",
        config(2, 5, 2)
            .test_on_borrow(false)
            .max_lifetime(Some(Duration::from_millis(50))),
    )
    .await;

    let held = pool.get().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let report = pool.run_maintenance().await;
    assert_eq!(report.lifetime_evicted, 1);
    assert_eq!(report.replenished, 1);
    assert_eq!(pool.active_count(), 1);
    assert_eq!(pool.idle_count(), 1);

    // Flagged while checked out, retired on return.
    held.close().await.unwrap();
    assert_eq!(pool.idle_count(), 1);
    assert_eq!(pool.active_count(), 0);
    assert_eq!(driver.stats().open(), 1);
    assert_eq!(pool.metrics().lifetime_evictions, 2);
}

#[tokio::test]
async fn test_replenish_to_min_idle() {
    let (_driver, pool) = memory_pool("replenish", config(0, 3, 2)).await;
    assert_eq!(pool.total_count(), 0);

    let report = pool.run_maintenance().await;
    assert_eq!(report.replenished, 2);
    assert_eq!(pool.idle_count(), 2);

    let report = pool.run_maintenance().await;
    assert!(report.is_noop());
}

#[tokio::test]
async fn test_idle_validation_discards_broken_connections() {
    let (driver, pool) = memory_pool(
        "while_idle",
        config(2, 4, 2).test_while_idle(true),
    )
    .await;

    driver.faults().fail_next_queries(1);
    let report = pool.run_maintenance().await;

    assert_eq!(report.validation_failed, 1);
    assert_eq!(report.replenished, 1);
    assert_eq!(pool.idle_count(), 2);
    assert_eq!(driver.stats().opened(), 3);
}

#[tokio::test]
async fn test_background_worker_replenishes() {
    let (_driver, pool) = memory_pool(
        "worker",
        config(0, 3, 2).maintenance_interval(Duration::from_millis(20)),
    )
    .await;

    assert!(eventually(|| pool.idle_count() == 2).await);
    pool.close().await;
}

// =============================================================================
// Detach, drop and close
// =============================================================================

#[tokio::test]
async fn test_detach_frees_the_slot() {
    let (driver, pool) = memory_pool("detach", config(1, 1, 0)).await;

    let conn = pool.get().await.unwrap();
    let native = conn.detach().unwrap();
    assert_eq!(pool.total_count(), 0);
    assert!(!native.is_closed());

    let replacement = pool.get().await.unwrap();
    assert_eq!(driver.stats().opened(), 2);
    replacement.close().await.unwrap();

    native.close().await.unwrap();
    pool.close().await;
    assert_eq!(driver.stats().open(), 0);
}

#[tokio::test]
async fn test_dropped_connection_returns_to_pool() {
    let (_driver, pool) = memory_pool("drop", config(1, 1, 0)).await;

    let conn = pool.get().await.unwrap();
    drop(conn);

    assert!(eventually(|| pool.idle_count() == 1).await);
    assert_eq!(pool.active_count(), 0);
}

#[tokio::test]
async fn test_close_wakes_waiters() {
    let (_driver, pool) = memory_pool(
        "close_waiters",
        config(1, 1, 0).max_wait(Duration::from_secs(30)),
    )
    .await;
    let held = pool.get().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await })
    };
    assert!(eventually(|| pool.status().waiting == 1).await);

    let started = Instant::now();
    pool.close().await;
    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(PoolError::PoolClosed)));
    assert!(started.elapsed() < Duration::from_secs(5));

    // The checked-out connection was closed underneath its holder.
    assert!(held.is_closed());
    held.close().await.unwrap();
    assert!(matches!(pool.get().await, Err(PoolError::PoolClosed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_during_connect_closes_new_connection() {
    let (driver, pool) = memory_pool("close_connecting", config(0, 2, 0)).await;
    driver.faults().set_connect_delay(Duration::from_millis(200));

    let pending = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await.map(|c| c.id()) })
    };
    let releasing = {
        let pool = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let conn = pool.try_get().await?;
            if let Some(conn) = conn {
                conn.close().await.map_err(PoolError::ConnectionFailure)?;
            }
            Ok::<_, PoolError>(())
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    pool.close().await;
    assert!(matches!(pending.await.unwrap(), Err(PoolError::PoolClosed)));
    assert!(matches!(
        releasing.await.unwrap(),
        Ok(()) | Err(PoolError::PoolClosed)
    ));
    assert!(eventually(|| driver.stats().open() == 0).await);
    assert_eq!(pool.total_count(), 0);
}

#[tokio::test]
async fn test_close_invalidates_statements() {
    let (driver, pool) = memory_pool("close_statements", config(2, 2, 0)).await;

    let conn = pool.get().await.unwrap();
    conn.execute_update("CREATE TABLE t (v)").await.unwrap();
    let mut stmt = conn
        .prepare_statement("INSERT INTO t VALUES (?)")
        .await
        .unwrap();
    stmt.bind(0, 1i64.into()).unwrap();
    assert_eq!(stmt.execute_update().await.unwrap(), 1);

    pool.close().await;
    pool.close().await;

    assert!(stmt.is_closed());
    assert!(matches!(
        stmt.execute_update().await,
        Err(Error::StatementClosed)
    ));
    assert!(pool.is_closed());
    assert_eq!(pool.total_count(), 0);
    assert_eq!(driver.stats().open(), 0);
}
