//! # dbc-core
//!
//! Backend-neutral database connectivity abstractions.
//!
//! This crate defines the capability set every backend driver implements
//! and every higher layer (the connection pool, the transaction manager)
//! consumes. It does not talk to any database itself.
//!
//! ## Features
//!
//! - **`Connection`**: query/update execution, prepared statements,
//!   auto-commit and isolation control, close notification
//! - **`PreparedStatement`**: positional parameter binding with invalidation
//!   when the owning connection closes
//! - **`ResultSet`**: forward-only cursor over typed rows
//! - **`Driver` / `DriverRegistry`**: URL-scheme based driver selection with
//!   explicit registration
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dbc_core::DriverRegistry;
//!
//! let registry = DriverRegistry::new();
//! registry.register("postgres", Arc::new(PgDriver::new()));
//!
//! let conn = registry.connect("postgres://localhost/app", "app", "secret").await?;
//! let mut rows = conn.execute_query("SELECT id, name FROM users").await?;
//! while rows.next() {
//!     let name: String = rows.get_by_name("name")?;
//!     println!("user: {name}");
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod driver;
pub mod error;
pub mod isolation;
pub mod result_set;
pub mod statement;
pub mod value;

pub use connection::{Connection, PreparedStatement};
pub use driver::{Driver, DriverRegistry, url_scheme};
pub use error::{Error, Result};
pub use isolation::IsolationLevel;
pub use result_set::{Column, ResultSet, Row};
pub use statement::{StatementHandle, StatementRegistry};
pub use value::{FromValue, Value};
