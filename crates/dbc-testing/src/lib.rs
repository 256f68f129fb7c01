//! # dbc-testing
//!
//! Test infrastructure for rust-dbc.
//!
//! Provides [`MemoryDriver`], a `memory://<name>` backend that keeps tables in
//! process memory and understands a handful of statements:
//!
//! ```text
//! SELECT 1
//! CREATE TABLE [IF NOT EXISTS] t (a, b, ...)
//! INSERT INTO t VALUES (1, 'x', NULL, TRUE, 2.5)
//! SELECT * FROM t
//! SELECT COUNT(*) FROM t
//! DELETE FROM t
//! ```
//!
//! Connections honour auto-commit, commit and rollback, so transaction
//! visibility can be asserted across connections that share a database name.
//! A shared [`FaultInjector`] makes connects, queries, commits and rollbacks
//! fail on demand, and [`DriverStats`] counts native opens and closes.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod database;
pub mod driver;
pub mod fault;
mod sql;

pub use connection::{MemoryConnection, MemoryStatement};
pub use database::MemoryDatabase;
pub use driver::MemoryDriver;
pub use fault::{DriverStats, FaultInjector};
