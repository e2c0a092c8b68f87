//! Database connection settings.
//!
//! The password is kept apart from [`ConnectionConfig`] in a [`Password`]
//! that zeroes its memory on drop and never prints its contents.

use crate::{error::TapError, Result};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use zeroize::Zeroizing;

/// Default SQL Server port.
pub const DEFAULT_PORT: u16 = 1433;

/// A password that is zeroed on drop and redacted in debug output.
#[derive(Clone, Default)]
pub struct Password(Zeroizing<String>);

impl Password {
    /// Wraps a password.
    pub fn new(password: impl Into<String>) -> Self {
        Self(Zeroizing::new(password.into()))
    }

    /// Exposes the secret for handing to the driver.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True when no password was given.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

impl<'de> Deserialize<'de> for Password {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Where and how to connect, without credentials.
///
/// # Example
/// ```rust
/// use tap_mssql_core::config::ConnectionConfig;
///
/// let config = ConnectionConfig::new("db.internal")
///     .with_port(14330)
///     .with_database("sales")
///     .with_username("reader");
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.to_string(), "ConnectionConfig(db.internal:14330/sales)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server host name or address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Database to connect to
    pub database: String,
    /// SQL Server login
    pub username: String,
    /// Require TLS for the whole session
    pub encrypt: bool,
    /// Accept any server certificate
    pub trust_server_certificate: bool,
    /// Limit on establishing the session
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            database: "master".to_string(),
            username: String::new(),
            encrypt: true,
            trust_server_certificate: false,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // username and credentials are left out on purpose
        write!(f, "ConnectionConfig({}:{}/{})", self.host, self.port, self.database)
    }
}

impl ConnectionConfig {
    /// Creates a configuration for `host` with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Builder method to set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder method to set the database.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Builder method to set the login.
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Builder method to set TLS behavior.
    pub fn with_encryption(mut self, encrypt: bool, trust_server_certificate: bool) -> Self {
        self.encrypt = encrypt;
        self.trust_server_certificate = trust_server_certificate;
        self
    }

    /// Validates connection parameters.
    ///
    /// # Errors
    /// Returns error if host, database or username is empty, or the port is 0.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(TapError::configuration("host cannot be empty"));
        }
        if self.port == 0 {
            return Err(TapError::configuration("port must be greater than 0"));
        }
        if self.database.trim().is_empty() {
            return Err(TapError::configuration("database cannot be empty"));
        }
        if self.username.trim().is_empty() {
            return Err(TapError::configuration("user cannot be empty"));
        }
        if self.connect_timeout.is_zero() {
            return Err(TapError::configuration("connect_timeout must be greater than 0"));
        }
        Ok(())
    }
}
