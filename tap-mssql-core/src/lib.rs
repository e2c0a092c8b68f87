//! Core library of tap-mssql, a Singer tap for SQL Server.
//!
//! This crate turns a SQL Server database into typed record streams:
//! discovery maps native column types to JSON Schema and builds the catalog,
//! the planner turns a catalog entry plus replication state into a bounded,
//! ordered query, and the encoder and batch writer turn the resulting rows
//! into RECORD or BATCH messages.
//!
//! # Security Guarantees
//! - Passwords are zeroed on drop and never logged or shown in errors
//! - All database operations are read-only
//! - Identifiers are always quoted; bookmark values are bound as parameters
//!
//! # Architecture
//! - Database access goes through the [`adapters::SchemaIntrospector`] and
//!   [`adapters::QueryExecutor`] traits; the SQL Server driver lives behind
//!   the `mssql` feature
//! - Type mapping, planning and encoding are pure and driver-independent
//! - [`sync::StreamSync`] drives one stream at a time, pulling rows lazily

pub mod adapters;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod messages;
pub mod models;
pub mod planner;
pub mod state;
pub mod sync;
pub mod typemap;

// Re-export commonly used types
pub use adapters::{QueryExecutor, SchemaIntrospector};
pub use batch::{BatchCompression, BatchManifest, BatchNaming, BatchWriter, LocalStorage};
pub use catalog::{Catalog, CatalogBuilder, CatalogEntry, ReplicationMethod};
pub use config::{BatchConfig, ConnectionConfig, Password, TapConfig};
pub use encoder::RecordEncoder;
pub use error::{Result, TapError};
pub use messages::{Message, MessageWriter};
pub use models::{BookmarkValue, ColumnDescriptor, KeyConstraint, NativeValue, RawRow, Record, TableRef};
pub use planner::{ExtractionPlanner, ExtractionQuery, SqlDialect};
pub use state::TapState;
pub use sync::{StreamSummary, StreamSync, SyncOptions};
pub use typemap::{SchemaType, TypeMappingPolicy};
