//! Process-wide configuration, read once at startup.
//!
//! The upstream client and the cache store copy what they need out of a
//! `&Config` when the proxy is built; nothing reads the environment after
//! startup.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default per-fetch timeout, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default listening interface.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default storage root, relative to the working directory.
pub const DEFAULT_STORAGE_DIR: &str = "storage";

/// Errors produced while reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is required (upstream base URL, e.g. https://wow.zamimg.com)")]
    Missing { key: &'static str },

    #[error("{key} has invalid value {value:?}: expected {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Runtime configuration for the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the true upstream, without a trailing slash.
    pub server_name: String,
    /// Hard deadline applied to every upstream fetch.
    pub timeout: Duration,
    pub host: String,
    pub port: u16,
    /// Directory holding one file per cached request target.
    pub storage_dir: PathBuf,
}

impl Config {
    /// Creates a configuration for `server_name` with every other value at its default.
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: normalize_server_name(&server_name.into()),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
        }
    }

    /// Reads configuration from the process environment.
    ///
    /// Recognised keys: `SERVER_NAME` (required), `TIMEOUT` (ms), `PORT`,
    /// `HOST`, `STORAGE_DIR`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let server_name = get("SERVER_NAME").ok_or(ConfigError::Missing { key: "SERVER_NAME" })?;
        let mut config = Self::new(server_name);

        if let Some(raw) = get("TIMEOUT") {
            let ms: u64 = parse_value("TIMEOUT", &raw, "a whole number of milliseconds")?;
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = get("PORT") {
            config.port = parse_value("PORT", &raw, "a port number between 0 and 65535")?;
        }
        if let Some(host) = get("HOST") {
            config.host = host.trim().to_owned();
        }
        if let Some(dir) = get("STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    /// Set the per-fetch timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the storage root.
    #[must_use]
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    /// Set the listening port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Returns the `host:port` pair to bind the listener to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn normalize_server_name(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_owned()
}

fn parse_value<T: std::str::FromStr>(
    key: &'static str,
    raw: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_owned(),
        expected,
    })
}
