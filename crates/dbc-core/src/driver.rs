//! Drivers and the explicit driver registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::connection::Connection;
use crate::error::{Error, Result};

/// Opens native connections for one backend.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Driver name (e.g. "postgres", "sqlite").
    fn name(&self) -> &str;

    /// Whether the driver can open the URL.
    fn accepts_url(&self, url: &str) -> bool;

    /// Open a single native connection.
    async fn connect(&self, url: &str, user: &str, password: &str) -> Result<Box<dyn Connection>>;
}

/// Extract the lower-cased scheme of a database URL.
///
/// The scheme is the text before `://`, or before the first `:` for URLs
/// like `sqlite:app.db`.
#[must_use]
pub fn url_scheme(url: &str) -> Option<String> {
    let end = url.find("://").or_else(|| url.find(':'))?;
    let scheme = url[..end].trim();
    if scheme.is_empty() {
        None
    } else {
        Some(scheme.to_ascii_lowercase())
    }
}

/// Process-wide registry mapping URL schemes to drivers.
///
/// Construct one at startup and register every driver before the first
/// connection is requested; there is no implicit static registration.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, Arc<dyn Driver>>>,
}

impl DriverRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver for a scheme, replacing any previous registration.
    pub fn register(&self, scheme: &str, driver: Arc<dyn Driver>) {
        let scheme = scheme.to_ascii_lowercase();
        tracing::info!(scheme = %scheme, driver = driver.name(), "registering database driver");
        self.drivers.write().insert(scheme, driver);
    }

    /// Remove the driver registered for a scheme.
    pub fn deregister(&self, scheme: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.write().remove(&scheme.to_ascii_lowercase())
    }

    /// Find the driver for a URL.
    ///
    /// Fails with [`Error::NoSuitableDriver`] if the scheme is unknown or the
    /// registered driver rejects the URL.
    pub fn driver_for_url(&self, url: &str) -> Result<Arc<dyn Driver>> {
        let scheme = url_scheme(url).ok_or_else(|| Error::NoSuitableDriver(url.to_string()))?;
        let driver = self.drivers.read().get(&scheme).cloned();
        match driver {
            Some(driver) if driver.accepts_url(url) => Ok(driver),
            Some(driver) => {
                tracing::warn!(scheme = %scheme, driver = driver.name(), "driver rejected URL");
                Err(Error::NoSuitableDriver(url.to_string()))
            }
            None => {
                tracing::warn!(scheme = %scheme, "no driver registered for scheme");
                Err(Error::NoSuitableDriver(url.to_string()))
            }
        }
    }

    /// Open a connection through the driver registered for the URL.
    pub async fn connect(
        &self,
        url: &str,
        user: &str,
        password: &str,
    ) -> Result<Box<dyn Connection>> {
        let driver = self.driver_for_url(url)?;
        driver.connect(url, user, password).await
    }

    /// Registered schemes, sorted.
    #[must_use]
    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.drivers.read().keys().cloned().collect();
        schemes.sort();
        schemes
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}
