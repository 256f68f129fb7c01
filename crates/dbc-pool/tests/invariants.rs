//! Property tests: pool bookkeeping under random acquire/release sequences.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;

use common::config;
use dbc_core::Connection;
use dbc_pool::{Pool, PooledConnection};
use dbc_testing::MemoryDriver;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Acquire,
    Release(usize),
    ReleaseTwice(usize),
    Detach(usize),
    Maintain,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Acquire),
        3 => any::<usize>().prop_map(Op::Release),
        1 => any::<usize>().prop_map(Op::ReleaseTwice),
        1 => any::<usize>().prop_map(Op::Detach),
        1 => Just(Op::Maintain),
    ]
}

fn check(pool: &Pool, held: &[PooledConnection], max: usize) -> Result<(), TestCaseError> {
    let status = pool.status();
    prop_assert!(status.in_use as usize <= max);
    prop_assert!((status.available + status.in_use) as usize <= max);
    prop_assert_eq!(status.in_use as usize, held.len());
    prop_assert_eq!(status.total, status.available + status.in_use);
    Ok(())
}

async fn run(initial: u32, max: u32, min_idle: u32, ops: Vec<Op>) -> Result<(), TestCaseError> {
    let driver = Arc::new(MemoryDriver::new());
    let pool = Pool::new(
        driver.clone(),
        "memory://invariants",
        "",
        "",
        config(initial, max, min_idle),
    )
    .await
    .unwrap();
    let max = max as usize;
    let mut held: Vec<PooledConnection> = Vec::new();

    for op in ops {
        match op {
            Op::Acquire => {
                let got = pool.try_get().await.unwrap();
                prop_assert_eq!(got.is_some(), held.len() < max);
                held.extend(got);
            }
            Op::Release(i) if !held.is_empty() => {
                let conn = held.swap_remove(i % held.len());
                conn.close().await.unwrap();
            }
            Op::ReleaseTwice(i) if !held.is_empty() => {
                let conn = held.swap_remove(i % held.len());
                conn.close().await.unwrap();
                conn.close().await.unwrap();
            }
            Op::Detach(i) if !held.is_empty() => {
                let conn = held.swap_remove(i % held.len());
                let native = conn.detach().unwrap();
                native.close().await.unwrap();
            }
            Op::Maintain => {
                pool.run_maintenance().await;
            }
            _ => {}
        }
        check(&pool, &held, max)?;
    }

    for conn in held.drain(..) {
        conn.close().await.unwrap();
    }
    check(&pool, &held, max)?;
    prop_assert_eq!(pool.active_count(), 0);

    pool.close().await;
    prop_assert_eq!(driver.stats().open(), 0);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(
        std::env::var("PROPTEST_CASES").ok().and_then(|v| v.parse().ok()).unwrap_or(64),
    ))]

    #[test]
    fn prop_bookkeeping_holds(
        (initial, max, min_idle) in (1u32..6).prop_flat_map(|max| (0..=max, Just(max), 0..=max)),
        ops in prop::collection::vec(op(), 0..60),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(run(initial, max, min_idle, ops))?;
    }
}
