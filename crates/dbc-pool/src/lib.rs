//! # dbc-pool
//!
//! Connection pool and transaction manager for rust-dbc drivers.
//!
//! The pool works with any [`dbc_core::Driver`]; it knows nothing about the
//! backend beyond the [`dbc_core::Connection`] capability set.
//!
//! ## Features
//!
//! - Bounded pool: `idle + active` never exceeds `max_size`
//! - Eager `initial_size` fill with fail-fast construction
//! - Bounded waiting for a free connection (`max_wait`)
//! - Validation on borrow, on return and while idle
//! - Auto-commit restored before a connection is parked
//! - Background idle-timeout and max-lifetime eviction, `min_idle`
//!   replenishment
//! - Transaction manager mapping opaque ids to checked-out connections, with
//!   rollback of abandoned transactions
//! - Metrics and status snapshots for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use dbc_pool::{Pool, PoolConfig, TransactionManager};
//! use std::time::Duration;
//!
//! // Using the builder pattern
//! let pool = Pool::builder()
//!     .registry(registry)
//!     .url("postgres://localhost/app")
//!     .credentials("app", "secret")
//!     .initial_size(3)
//!     .max_size(10)
//!     .max_wait(Duration::from_secs(2))
//!     .build()
//!     .await?;
//!
//! // Or from a settings string
//! let config = PoolConfig::from_properties("initialSize=3;maxSize=10;minIdle=2")?;
//! let pool = Pool::new(driver, "postgres://localhost/app", "app", "secret", config).await?;
//!
//! // Get a connection from the pool
//! let conn = pool.get().await?;
//! // Use connection...
//! conn.close().await?; // returned to the pool
//!
//! // Multi-statement transactions
//! let manager = TransactionManager::new(pool.clone());
//! let tx = manager.begin_transaction().await?;
//! manager.connection(&tx)?.execute_update("DELETE FROM carts").await?;
//! manager.commit(&tx).await?;
//!
//! // Check pool status
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod maintenance;
pub mod pool;
pub mod transaction;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::{ErrorKind, PoolError, TransactionOperation};

// Pool types
pub use maintenance::MaintenanceReport;
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection};

// Lifecycle management
pub use lifecycle::{
    ConnectionLifecycle, ConnectionMetadata, ConnectionState, DefaultLifecycle,
    DynConnectionLifecycle, HealthCheckResult,
};

// Transactions
pub use transaction::{
    TransactionConnection, TransactionInfo, TransactionManager, TransactionManagerConfig,
};
