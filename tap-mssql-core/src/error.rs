//! Error types for extraction, discovery and batching.
//!
//! Errors fall into three groups that callers treat differently:
//! configuration errors (fatal, never retried), the abort-threshold capacity
//! signal (fatal to the current sync, resumable from the last bookmark), and
//! I/O failures (propagated unchanged). Credentials never appear in any
//! message produced here.

use thiserror::Error;

/// Main error type for tap-mssql operations.
#[derive(Debug, Error)]
pub enum TapError {
    /// Database connection failed (credentials sanitized)
    #[error("Database connection failed: {context}")]
    Connection {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Catalog discovery failed while introspecting a table
    #[error("Discovery failed: {context}")]
    Discovery {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Configuration or validation error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Native type could not be mapped to a schema type
    #[error("Cannot map column '{column}' of native type '{native_type}': {reason}")]
    TypeMapping {
        column: String,
        native_type: String,
        reason: String,
    },

    /// A projected or replication-key column is not part of the stream schema
    #[error("Unknown column '{column}' for stream '{stream}'")]
    UnknownColumn { stream: String, column: String },

    /// Bookmark value does not belong to the replication key's comparison domain
    #[error(
        "Bookmark for replication key '{replication_key}' must be a {expected} value, got {actual}"
    )]
    BookmarkDomain {
        replication_key: String,
        expected: String,
        actual: String,
    },

    /// A partition or context was passed to a stream that cannot be partitioned
    #[error("Stream '{stream}' does not support partitioned extraction")]
    PartitionUnsupported { stream: String },

    /// More rows are available than the configured abort threshold allows
    #[error("Stream '{stream}' returned more than {threshold} rows; resume from the last bookmark")]
    AbortThresholdExceeded { stream: String, threshold: u64 },

    /// Query execution or row fetch failed
    #[error("Query execution failed: {context}")]
    QueryExecution {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O operation failed
    #[error("I/O operation failed: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Serialization or deserialization failed
    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Convenience type alias for Results with TapError
pub type Result<T> = std::result::Result<T, TapError>;

impl TapError {
    /// Creates a connection error with sanitized context
    pub fn connection_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a discovery error for a table
    pub fn discovery_failed<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Discovery {
            context: context.into(),
            source: Box::new(error),
        }
    }

    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a type mapping error naming the column and its native type
    pub fn type_mapping(
        column: impl Into<String>,
        native_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::TypeMapping {
            column: column.into(),
            native_type: native_type.into(),
            reason: reason.into(),
        }
    }

    /// Creates an unknown column error
    pub fn unknown_column(stream: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            stream: stream.into(),
            column: column.into(),
        }
    }

    /// Creates a query execution error without an underlying source
    pub fn query_failed(context: impl Into<String>) -> Self {
        Self::QueryExecution {
            context: context.into(),
            source: None,
        }
    }

    /// Creates a query execution error wrapping a driver error
    pub fn query_error<E>(context: impl Into<String>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::QueryExecution {
            context: context.into(),
            source: Some(Box::new(error)),
        }
    }

    /// Creates an I/O error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates a serialization error with context
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Returns true for errors caused by invalid input or configuration.
    ///
    /// These are never retried; the input has to be fixed first.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::TypeMapping { .. }
                | Self::UnknownColumn { .. }
                | Self::BookmarkDomain { .. }
                | Self::PartitionUnsupported { .. }
        )
    }

    /// Returns true when the sync stopped because the abort threshold was hit.
    pub fn is_capacity_signal(&self) -> bool {
        matches!(self, Self::AbortThresholdExceeded { .. })
    }
}
