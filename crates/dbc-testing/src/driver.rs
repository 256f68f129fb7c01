//! The `memory://` driver.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dbc_core::{Connection, Driver, Error, Result};
use parking_lot::Mutex;

use crate::connection::MemoryConnection;
use crate::database::MemoryDatabase;
use crate::fault::{DriverStats, FaultInjector};

const SCHEME_PREFIX: &str = "memory://";

/// Driver for in-process `memory://<name>` databases.
///
/// Connections opened on the same name share one [`MemoryDatabase`].
///
/// # Example
///
/// ```rust,ignore
/// let driver = Arc::new(MemoryDriver::new());
/// let conn = driver.connect("memory://orders", "", "").await?;
/// conn.execute_update("CREATE TABLE orders (id, total)").await?;
/// ```
#[derive(Debug, Default)]
pub struct MemoryDriver {
    databases: Mutex<HashMap<String, Arc<MemoryDatabase>>>,
    faults: Arc<FaultInjector>,
    stats: Arc<DriverStats>,
    next_id: AtomicU64,
}

impl MemoryDriver {
    /// Create a driver with no databases.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault switches shared by every connection of this driver.
    #[must_use]
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Native activity counters.
    #[must_use]
    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    /// The database behind a name, created on first use.
    pub fn database(&self, name: &str) -> Arc<MemoryDatabase> {
        Arc::clone(self.databases.lock().entry(name.to_string()).or_default())
    }

    /// Open a connection and keep the concrete type.
    pub async fn open(&self, url: &str) -> Result<MemoryConnection> {
        let name = database_name(url).ok_or_else(|| Error::NoSuitableDriver(url.to_string()))?;

        let delay = self.faults.connect_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.faults.take_connect_failure() {
            return Err(Error::Connection(format!("injected failure connecting to {url}")));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(connection_id = id, database = name, "memory connection opened");

        Ok(MemoryConnection::new(
            id,
            self.database(name),
            Arc::clone(&self.faults),
            Arc::clone(&self.stats),
        ))
    }
}

fn database_name(url: &str) -> Option<&str> {
    let name = url.strip_prefix(SCHEME_PREFIX)?;
    (!name.is_empty()).then_some(name)
}

#[async_trait]
impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        "memory"
    }

    fn accepts_url(&self, url: &str) -> bool {
        database_name(url).is_some()
    }

    async fn connect(&self, url: &str, _user: &str, _password: &str) -> Result<Box<dyn Connection>> {
        Ok(Box::new(self.open(url).await?))
    }
}
