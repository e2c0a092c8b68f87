//! Batch output settings.

use crate::{
    batch::{BatchCompression, BatchEncoding},
    error::TapError,
    Result,
};
use serde::{Deserialize, Serialize};

/// Records per batch file when not configured.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Where batch files are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root location, e.g. `file:///var/lib/tap/batches`
    pub root: String,
    /// Prepended to every file name
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Batch mode configuration: encoding, storage and chunk size.
///
/// # Example
/// ```rust
/// use tap_mssql_core::config::BatchConfig;
///
/// let config = BatchConfig::new("file:///tmp/batches")
///     .with_prefix("test-batch-")
///     .with_batch_size(1000);
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.prefix(), "test-batch-");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// File format and compression
    #[serde(default)]
    pub encoding: BatchEncoding,
    /// Where files go
    pub storage: StorageConfig,
    /// Records per file
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl BatchConfig {
    /// Creates a gzip JSONL configuration rooted at `root`.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            encoding: BatchEncoding::default(),
            storage: StorageConfig {
                root: root.into(),
                prefix: None,
            },
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Builder method to set the file name prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.storage.prefix = Some(prefix.into());
        self
    }

    /// Builder method to set the records per file.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Builder method to set the compression.
    pub fn with_compression(mut self, compression: BatchCompression) -> Self {
        self.encoding.compression = compression;
        self
    }

    /// File name prefix, empty when unset.
    pub fn prefix(&self) -> &str {
        self.storage.prefix.as_deref().unwrap_or_default()
    }

    /// Validates batch settings.
    ///
    /// # Errors
    /// Returns error for a zero batch size, an empty storage root or a
    /// compression this build cannot produce.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TapError::configuration("batch_size must be greater than 0"));
        }
        if self.storage.root.trim().is_empty() {
            return Err(TapError::configuration("batch_config.storage.root cannot be empty"));
        }
        if !self.encoding.compression.is_available() {
            return Err(TapError::configuration(format!(
                "{} compression requires the 'compression' feature",
                self.encoding.compression
            )));
        }
        Ok(())
    }
}
