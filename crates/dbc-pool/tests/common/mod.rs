//! Shared fixtures for pool integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use dbc_core::Connection;
use dbc_pool::{Pool, PoolConfig};
use dbc_testing::MemoryDriver;

/// Install a test-writer subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// A small configuration with no background surprises: maintenance runs only
/// when a test asks for it and closes do not pause.
pub fn config(initial: u32, max: u32, min_idle: u32) -> PoolConfig {
    PoolConfig::new()
        .initial_size(initial)
        .max_size(max)
        .min_idle(min_idle)
        .max_wait(Duration::from_secs(2))
        .maintenance_interval(Duration::from_secs(3600))
        .close_delay(Duration::ZERO)
}

/// A pool on a fresh memory driver.
pub async fn memory_pool(database: &str, config: PoolConfig) -> (Arc<MemoryDriver>, Pool) {
    init_tracing();
    let driver = Arc::new(MemoryDriver::new());
    let pool = Pool::new(
        driver.clone(),
        format!("memory://{database}"),
        "",
        "",
        config,
    )
    .await
    .expect("pool construction");
    (driver, pool)
}

/// Committed row count as seen by `conn`.
pub async fn count(conn: &dyn Connection, table: &str) -> i64 {
    let mut rs = conn
        .execute_query(&format!("SELECT COUNT(*) FROM {table}"))
        .await
        .unwrap();
    assert!(rs.next());
    rs.get(0).unwrap()
}

/// Wait until `check` holds, polling for up to a second.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
