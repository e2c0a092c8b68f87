//! Tap configuration.
//!
//! [`TapConfig`] is read from the JSON file passed with `--config`. The
//! keys follow the usual Singer tap layout:
//!
//! ```json
//! {
//!   "host": "db.internal",
//!   "port": 1433,
//!   "user": "reader",
//!   "password": "...",
//!   "database": "sales",
//!   "hd_jsonschema_types": true,
//!   "start_date": "2024-01-01T00:00:00Z",
//!   "batch_config": {
//!     "encoding": {"format": "jsonl", "compression": "gzip"},
//!     "storage": {"root": "file:///var/lib/tap/batches", "prefix": "sales-"}
//!   }
//! }
//! ```
//!
//! # Security
//! The password is zeroed on drop and never appears in `Debug` output or
//! error messages.

mod batch;
mod connection;

pub use batch::{BatchConfig, StorageConfig, DEFAULT_BATCH_SIZE};
pub use connection::{ConnectionConfig, Password, DEFAULT_PORT};

use crate::{error::TapError, typemap::TypeMappingPolicy, Result};
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use std::path::Path;

/// Name used in batch file names and log lines.
pub const TAP_NAME: &str = "tap-mssql";

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

/// Complete tap configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TapConfig {
    /// Server host name or address
    pub host: String,
    /// TCP port, 1433 by default
    #[serde(default = "default_port")]
    pub port: u16,
    /// SQL Server login
    pub user: String,
    /// Login password, never logged
    pub password: Password,
    /// Database to extract from
    pub database: String,
    /// Require TLS, on by default
    #[serde(default = "default_true")]
    pub encrypt: bool,
    /// Accept any server certificate
    #[serde(default)]
    pub trust_server_certificate: bool,
    /// Use the precise type mapping policy
    #[serde(default)]
    pub hd_jsonschema_types: bool,
    /// Refuse columns of unrecognized native types during discovery
    #[serde(default)]
    pub strict_types: bool,
    /// Lower bound for temporal replication keys without a bookmark
    #[serde(default)]
    pub start_date: Option<DateTime<FixedOffset>>,
    /// Abort a stream that returns more rows than this
    #[serde(default)]
    pub abort_at_record_count: Option<u64>,
    /// Write batch files instead of RECORD messages
    #[serde(default)]
    pub batch_config: Option<BatchConfig>,
}

impl TapConfig {
    /// Creates a configuration with defaults for everything but the
    /// connection essentials.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        password: Password,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            user: user.into(),
            password,
            database: database.into(),
            encrypt: true,
            trust_server_certificate: false,
            hd_jsonschema_types: false,
            strict_types: false,
            start_date: None,
            abort_at_record_count: None,
            batch_config: None,
        }
    }

    /// Parses and validates configuration JSON.
    ///
    /// # Errors
    /// Malformed JSON, missing required keys or invalid values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TapError::configuration(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| TapError::io(format!("reading config {}", path.display()), e))?;
        Self::from_json(&json)
    }

    /// Builder method to set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder method to select the precise type mapping policy.
    pub fn with_hd_jsonschema_types(mut self, enabled: bool) -> Self {
        self.hd_jsonschema_types = enabled;
        self
    }

    /// Builder method to set the start date.
    pub fn with_start_date(mut self, start_date: DateTime<FixedOffset>) -> Self {
        self.start_date = Some(start_date);
        self
    }

    /// Builder method to set the abort threshold.
    pub fn with_abort_at_record_count(mut self, threshold: u64) -> Self {
        self.abort_at_record_count = Some(threshold);
        self
    }

    /// Builder method to switch on batch mode.
    pub fn with_batch_config(mut self, batch_config: BatchConfig) -> Self {
        self.batch_config = Some(batch_config);
        self
    }

    /// Type mapping policy selected by `hd_jsonschema_types`.
    pub fn policy(&self) -> TypeMappingPolicy {
        TypeMappingPolicy::from_flag(self.hd_jsonschema_types)
    }

    /// Connection settings, without the password.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::new(&self.host)
            .with_port(self.port)
            .with_database(&self.database)
            .with_username(&self.user)
            .with_encryption(self.encrypt, self.trust_server_certificate)
    }

    /// Validates the whole configuration.
    ///
    /// # Errors
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<()> {
        self.connection().validate()?;
        if self.password.is_empty() {
            return Err(TapError::configuration("password cannot be empty"));
        }
        if self.abort_at_record_count == Some(0) {
            return Err(TapError::configuration(
                "abort_at_record_count must be greater than 0",
            ));
        }
        if let Some(batch_config) = &self.batch_config {
            batch_config.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{"host": "localhost", "user": "sa", "password": "s3cret!", "database": "sales"}"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = TapConfig::from_json(MINIMAL).unwrap();
        assert_eq!(config.port, 1433);
        assert!(config.encrypt);
        assert!(!config.hd_jsonschema_types);
        assert_eq!(config.policy(), TypeMappingPolicy::Basic);
        assert!(config.batch_config.is_none());
        assert!(config.start_date.is_none());
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "host": "db.internal", "port": 14330, "user": "reader", "password": "pw",
            "database": "sales", "hd_jsonschema_types": true,
            "start_date": "2024-01-01T00:00:00Z", "abort_at_record_count": 5000,
            "batch_config": {
                "encoding": {"format": "jsonl", "compression": "gzip"},
                "storage": {"root": "file://test/batches", "prefix": "test-batch-"},
                "batch_size": 250
            }
        }"#;
        let config = TapConfig::from_json(json).unwrap();

        assert_eq!(config.policy(), TypeMappingPolicy::Precise);
        assert_eq!(config.abort_at_record_count, Some(5000));
        assert_eq!(config.connection().port, 14330);
        let batch = config.batch_config.unwrap();
        assert_eq!(batch.batch_size, 250);
        assert_eq!(batch.prefix(), "test-batch-");
    }

    #[test]
    fn test_invalid_configs() {
        assert!(TapConfig::from_json(r#"{"host": "localhost"}"#).is_err());
        assert!(TapConfig::from_json("not json").is_err());

        let json = r#"{"host": "localhost", "user": "sa", "password": "", "database": "sales"}"#;
        assert!(TapConfig::from_json(json).is_err());

        let json = r#"{"host": "localhost", "user": "sa", "password": "x", "database": "sales", "abort_at_record_count": 0}"#;
        assert!(TapConfig::from_json(json).is_err());
    }

    #[test]
    fn test_password_never_in_debug_or_errors() {
        let config = TapConfig::from_json(MINIMAL).unwrap();
        assert!(!format!("{:?}", config).contains("s3cret!"));

        let json = r#"{"host": "", "user": "sa", "password": "s3cret!", "database": "sales"}"#;
        let error = TapConfig::from_json(json).unwrap_err();
        assert!(!error.to_string().contains("s3cret!"));
    }
}
