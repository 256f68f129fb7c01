//! Pool configuration.

use std::time::Duration;

use dbc_core::IsolationLevel;

use crate::error::PoolError;

/// Configuration for a connection pool.
///
/// All fields are public and have defaults; use the fluent setters or
/// [`PoolConfig::from_properties`] to build one.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Connections opened eagerly at construction.
    pub initial_size: u32,

    /// Hard upper bound on idle + active connections.
    pub max_size: u32,

    /// Number of connections maintenance tries to keep open.
    pub min_idle: u32,

    /// Total time [`Pool::get()`](crate::Pool::get) may wait for a connection.
    pub max_wait: Duration,

    /// Time budget for one validation query.
    pub validation_timeout: Duration,

    /// Idle connections older than this are evicted. `None` disables.
    pub idle_timeout: Option<Duration>,

    /// Connections older than this are retired. `None` disables.
    pub max_lifetime: Option<Duration>,

    /// Period of the background maintenance pass.
    pub maintenance_interval: Duration,

    /// Validate idle connections before handing them out.
    pub test_on_borrow: bool,

    /// Validate connections when they are returned.
    pub test_on_return: bool,

    /// Validate idle connections during maintenance.
    pub test_while_idle: bool,

    /// Statement executed to validate a connection.
    pub validation_query: String,

    /// Isolation level applied to every new connection.
    pub transaction_isolation: Option<IsolationLevel>,

    /// Pause after closing a native connection before continuing. Some
    /// native client libraries are not stable when a teardown is
    /// immediately followed by further work.
    pub close_delay: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 5,
            max_size: 20,
            min_idle: 3,
            max_wait: Duration::from_secs(5),
            validation_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(300)),
            max_lifetime: Some(Duration::from_secs(1800)),
            maintenance_interval: Duration::from_secs(30),
            test_on_borrow: true,
            test_on_return: false,
            test_while_idle: false,
            validation_query: "SELECT 1".to_string(),
            transaction_isolation: None,
            close_delay: Duration::from_millis(10),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `key=value;` settings string on top of the defaults.
    ///
    /// Keys are case-insensitive and may be written `maxSize`, `max_size` or
    /// `max-size`. Durations are given in milliseconds; `0` disables the idle
    /// timeout and max lifetime.
    ///
    /// ```text
    /// initialSize=3;maxSize=10;minIdle=2;maxWaitMillis=100;testOnBorrow=true;
    /// ```
    pub fn from_properties(properties: &str) -> Result<Self, PoolError> {
        let mut config = Self::default();

        for part in properties.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PoolError::Config(format!("invalid key-value: {part}")))?;

            let key: String = key
                .trim()
                .chars()
                .filter(|c| !matches!(c, '_' | '-' | ' '))
                .map(|c| c.to_ascii_lowercase())
                .collect();
            let value = value.trim();

            match key.as_str() {
                "initialsize" => config.initial_size = parse_number(&key, value)?,
                "maxsize" | "maxtotal" => config.max_size = parse_number(&key, value)?,
                "minidle" => config.min_idle = parse_number(&key, value)?,
                "maxwaitmillis" | "maxwait" => config.max_wait = parse_millis(&key, value)?,
                "validationtimeoutmillis" | "validationtimeout" => {
                    config.validation_timeout = parse_millis(&key, value)?;
                }
                "idletimeoutmillis" | "idletimeout" => {
                    config.idle_timeout = non_zero(parse_millis(&key, value)?);
                }
                "maxlifetimemillis" | "maxlifetime" => {
                    config.max_lifetime = non_zero(parse_millis(&key, value)?);
                }
                "maintenanceintervalmillis" | "maintenanceinterval" => {
                    config.maintenance_interval = parse_millis(&key, value)?;
                }
                "testonborrow" => config.test_on_borrow = parse_bool(value),
                "testonreturn" => config.test_on_return = parse_bool(value),
                "testwhileidle" => config.test_while_idle = parse_bool(value),
                "validationquery" => config.validation_query = value.to_string(),
                "transactionisolation" => {
                    config.transaction_isolation = Some(value.parse().map_err(|_| {
                        PoolError::Config(format!("invalid transaction isolation: {value}"))
                    })?);
                }
                "closedelaymillis" | "closedelay" => {
                    config.close_delay = parse_millis(&key, value)?;
                }
                _ => {
                    // Ignore unknown options for forward compatibility
                    tracing::debug!(key = key, value = value, "ignoring unknown pool option");
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for contradictions.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::Config("max_size must be greater than 0".into()));
        }
        if self.initial_size > self.max_size {
            return Err(PoolError::Config(format!(
                "initial_size ({}) cannot exceed max_size ({})",
                self.initial_size, self.max_size
            )));
        }
        if self.min_idle > self.max_size {
            return Err(PoolError::Config(format!(
                "min_idle ({}) cannot exceed max_size ({})",
                self.min_idle, self.max_size
            )));
        }
        if self.maintenance_interval.is_zero() {
            return Err(PoolError::Config(
                "maintenance_interval must be greater than 0".into(),
            ));
        }
        let validates = self.test_on_borrow || self.test_on_return || self.test_while_idle;
        if validates && self.validation_query.trim().is_empty() {
            return Err(PoolError::Config(
                "validation_query is required when validation is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Set the number of connections opened at construction.
    #[must_use]
    pub fn initial_size(mut self, count: u32) -> Self {
        self.initial_size = count;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_size(mut self, count: u32) -> Self {
        self.max_size = count;
        self
    }

    /// Set the minimum number of connections kept open.
    #[must_use]
    pub fn min_idle(mut self, count: u32) -> Self {
        self.min_idle = count;
        self
    }

    /// Set the acquisition timeout.
    #[must_use]
    pub fn max_wait(mut self, timeout: Duration) -> Self {
        self.max_wait = timeout;
        self
    }

    /// Set the validation query timeout.
    #[must_use]
    pub fn validation_timeout(mut self, timeout: Duration) -> Self {
        self.validation_timeout = timeout;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set the maintenance period.
    #[must_use]
    pub fn maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Enable or disable validation on borrow.
    #[must_use]
    pub fn test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    /// Enable or disable validation on return.
    #[must_use]
    pub fn test_on_return(mut self, enabled: bool) -> Self {
        self.test_on_return = enabled;
        self
    }

    /// Enable or disable validation of idle connections during maintenance.
    #[must_use]
    pub fn test_while_idle(mut self, enabled: bool) -> Self {
        self.test_while_idle = enabled;
        self
    }

    /// Set the validation query.
    #[must_use]
    pub fn validation_query(mut self, query: impl Into<String>) -> Self {
        self.validation_query = query.into();
        self
    }

    /// Set the isolation level applied to new connections.
    #[must_use]
    pub fn transaction_isolation(mut self, level: IsolationLevel) -> Self {
        self.transaction_isolation = Some(level);
        self
    }

    /// Set the pause after closing a native connection.
    #[must_use]
    pub fn close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }
}

fn parse_number(key: &str, value: &str) -> Result<u32, PoolError> {
    value
        .parse()
        .map_err(|_| PoolError::Config(format!("invalid {key}: {value}")))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, PoolError> {
    value
        .parse()
        .map(Duration::from_millis)
        .map_err(|_| PoolError::Config(format!("invalid {key}: {value}")))
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") || value == "1"
}

fn non_zero(duration: Duration) -> Option<Duration> {
    (!duration.is_zero()).then_some(duration)
}
