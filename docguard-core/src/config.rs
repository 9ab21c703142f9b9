//! Connection settings handed to a [`Connector`](crate::driver::Connector).

use std::time::Duration;

use crate::error::{StoreError, StoreResult};

pub const ENV_ADDRESS: &str = "DOCGUARD_ADDRESS";
pub const ENV_DATABASE: &str = "DOCGUARD_DATABASE";
pub const ENV_APP_NAME: &str = "DOCGUARD_APP_NAME";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "DOCGUARD_CONNECT_TIMEOUT_MS";
pub const ENV_SERVER_SELECTION_TIMEOUT_MS: &str = "DOCGUARD_SERVER_SELECTION_TIMEOUT_MS";
pub const ENV_MAX_POOL_SIZE: &str = "DOCGUARD_MAX_POOL_SIZE";

/// Where and how to connect.
///
/// Only `address` and `database` are required. Every other setting is left to the
/// driver's default when unset.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use docguard::config::ConnectionConfig;
///
/// let config = ConnectionConfig::new("mongodb://localhost:27017", "app")
///     .with_app_name("billing")
///     .with_connect_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Connection string understood by the driver.
    pub address: String,
    /// Database selected after connecting.
    pub database: String,
    /// Application name reported to the server.
    pub app_name: Option<String>,
    /// Timeout for establishing a single connection.
    pub connect_timeout: Option<Duration>,
    /// Timeout for finding a suitable server.
    pub server_selection_timeout: Option<Duration>,
    /// Upper bound on pooled connections.
    pub max_pool_size: Option<u32>,
}

impl ConnectionConfig {
    /// Creates a configuration with driver defaults for everything but the address and database.
    pub fn new(address: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            database: database.into(),
            app_name: None,
            connect_timeout: None,
            server_selection_timeout: None,
            max_pool_size: None,
        }
    }

    /// Reads the configuration from `DOCGUARD_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Configuration`] if the address or database is missing or a
    /// numeric setting does not parse.
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, using the same keys as
    /// [`ConnectionConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> StoreResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| StoreError::Configuration(format!("{key} is not set")))
        };
        let number = |key: &str| -> StoreResult<Option<u64>> {
            lookup(key)
                .map(|value| {
                    value
                        .parse::<u64>()
                        .map_err(|e| StoreError::Configuration(format!("{key}: {e}")))
                })
                .transpose()
        };

        let mut config = Self::new(required(ENV_ADDRESS)?, required(ENV_DATABASE)?);

        config.app_name = lookup(ENV_APP_NAME);
        config.connect_timeout = number(ENV_CONNECT_TIMEOUT_MS)?.map(Duration::from_millis);
        config.server_selection_timeout =
            number(ENV_SERVER_SELECTION_TIMEOUT_MS)?.map(Duration::from_millis);
        config.max_pool_size = number(ENV_MAX_POOL_SIZE)?
            .map(|size| {
                u32::try_from(size)
                    .map_err(|e| StoreError::Configuration(format!("{ENV_MAX_POOL_SIZE}: {e}")))
            })
            .transpose()?;

        Ok(config)
    }

    /// Sets the application name reported to the server.
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the server selection timeout.
    pub fn with_server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }

    /// Sets the maximum connection pool size.
    pub fn with_max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = Some(size);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key| vars.get(key).cloned()
    }

    #[test]
    fn reads_required_and_optional_settings() {
        let config = ConnectionConfig::from_lookup(lookup(&[
            (ENV_ADDRESS, "mongodb://db:27017"),
            (ENV_DATABASE, "app"),
            (ENV_APP_NAME, "billing"),
            (ENV_CONNECT_TIMEOUT_MS, "2500"),
            (ENV_MAX_POOL_SIZE, "16"),
        ]))
        .unwrap();

        assert_eq!(
            config,
            ConnectionConfig::new("mongodb://db:27017", "app")
                .with_app_name("billing")
                .with_connect_timeout(Duration::from_millis(2500))
                .with_max_pool_size(16)
        );
    }

    #[test]
    fn missing_database_is_a_configuration_error() {
        let err = ConnectionConfig::from_lookup(lookup(&[(ENV_ADDRESS, "mongodb://db")]))
            .unwrap_err();

        assert!(matches!(err, StoreError::Configuration(msg) if msg.contains(ENV_DATABASE)));
    }

    #[test]
    fn rejects_non_numeric_timeouts() {
        let err = ConnectionConfig::from_lookup(lookup(&[
            (ENV_ADDRESS, "mongodb://db"),
            (ENV_DATABASE, "app"),
            (ENV_SERVER_SELECTION_TIMEOUT_MS, "soon"),
        ]))
        .unwrap_err();

        assert!(matches!(err, StoreError::Configuration(_)));
    }
}
