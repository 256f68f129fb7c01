//! Behaviour of the memory backend that pool tests rely on.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use dbc_core::{Connection, DriverRegistry, Error, Value};
use dbc_testing::MemoryDriver;
use std::sync::Arc;

async fn count(conn: &dyn Connection, table: &str) -> i64 {
    let mut rs = conn
        .execute_query(&format!("SELECT COUNT(*) FROM {table}"))
        .await
        .unwrap();
    assert!(rs.next());
    rs.get(0).unwrap()
}

#[tokio::test]
async fn test_uncommitted_writes_are_private() {
    let driver = MemoryDriver::new();
    let writer = driver.open("memory://visibility").await.unwrap();
    let reader = driver.open("memory://visibility").await.unwrap();

    writer.execute_update("CREATE TABLE t (v)").await.unwrap();
    writer.set_auto_commit(false).await.unwrap();
    writer.execute_update("INSERT INTO t VALUES (1)").await.unwrap();

    assert_eq!(count(&writer, "t").await, 1);
    assert_eq!(count(&reader, "t").await, 0);

    writer.commit().await.unwrap();
    assert_eq!(count(&reader, "t").await, 1);

    writer.execute_update("INSERT INTO t VALUES (2)").await.unwrap();
    writer.rollback().await.unwrap();
    assert_eq!(count(&reader, "t").await, 1);
    assert_eq!(driver.stats().commits(), 1);
    assert_eq!(driver.stats().rollbacks(), 1);
}

#[tokio::test]
async fn test_enabling_auto_commit_commits_pending() {
    let driver = MemoryDriver::new();
    let conn = driver.open("memory://autocommit").await.unwrap();
    conn.execute_update("CREATE TABLE t (v)").await.unwrap();
    conn.set_auto_commit(false).await.unwrap();
    conn.execute_update("INSERT INTO t VALUES ('x')").await.unwrap();
    assert_eq!(conn.pending_writes(), 1);

    conn.set_auto_commit(true).await.unwrap();
    assert_eq!(conn.pending_writes(), 0);
    assert_eq!(driver.database("autocommit").row_count("t"), Some(1));
}

#[tokio::test]
async fn test_statements_fail_after_connection_close() {
    let driver = MemoryDriver::new();
    let conn = driver.open("memory://statements").await.unwrap();
    conn.execute_update("CREATE TABLE t (a, b)").await.unwrap();

    let mut stmt = conn
        .prepare_statement("INSERT INTO t VALUES (?, ?)")
        .await
        .unwrap();
    stmt.bind(0, Value::Int(1)).unwrap();
    stmt.bind(1, Value::from("one")).unwrap();
    assert_eq!(stmt.execute_update().await.unwrap(), 1);
    assert!(matches!(
        stmt.bind(2, Value::Null),
        Err(Error::ParameterIndex { index: 2, count: 2 })
    ));
    assert_eq!(conn.open_statements(), 1);

    conn.close().await.unwrap();
    assert!(stmt.is_closed());
    assert!(matches!(
        stmt.execute_update().await,
        Err(Error::StatementClosed)
    ));
    assert!(matches!(
        conn.execute_query("SELECT 1").await,
        Err(Error::ConnectionClosed)
    ));
    assert_eq!(driver.stats().open(), 0);
}

#[tokio::test]
async fn test_faults() {
    let driver = MemoryDriver::new();
    driver.faults().fail_next_connects(1);
    assert!(matches!(
        driver.open("memory://faults").await,
        Err(Error::Connection(_))
    ));

    let conn = driver.open("memory://faults").await.unwrap();
    driver.faults().fail_next_queries(1);
    assert!(conn.execute_query("SELECT 1").await.is_err());
    assert!(conn.execute_query("SELECT 1").await.is_ok());

    driver.faults().fail_next_commits(1);
    conn.set_auto_commit(false).await.unwrap();
    assert!(matches!(conn.commit().await, Err(Error::Transaction(_))));
}

#[tokio::test]
async fn test_registry_dispatch() {
    let registry = DriverRegistry::new();
    registry.register("memory", Arc::new(MemoryDriver::new()));

    let conn = registry.connect("memory://dispatch", "", "").await.unwrap();
    let mut rs = conn.execute_query("SELECT 1").await.unwrap();
    assert!(rs.next());
    assert_eq!(rs.get::<i64>(0).unwrap(), 1);

    assert!(matches!(
        registry.connect("memory://", "", "").await,
        Err(Error::NoSuitableDriver(_))
    ));
}
