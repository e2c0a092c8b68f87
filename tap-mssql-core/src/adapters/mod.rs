//! Database capability traits consumed by discovery and extraction.
//!
//! The core never talks to a driver directly. Catalog discovery goes
//! through [`SchemaIntrospector`] and row extraction through
//! [`QueryExecutor`]; a concrete SQL Server implementation of both lives in
//! [`mssql`] behind the `mssql` feature.
//!
//! Both traits take `&mut self`: a single connection serves one request at
//! a time, and the pipeline is sequential anyway.

use crate::{
    models::{ColumnDescriptor, KeyConstraint, RawRow, TableRef},
    planner::ExtractionQuery,
    Result,
};
use async_trait::async_trait;
use futures::stream::BoxStream;

#[cfg(feature = "mssql")]
pub mod mssql;

/// Lists tables, columns and key constraints.
#[async_trait]
pub trait SchemaIntrospector: Send {
    /// Lists every table and view visible to the connection, in a stable order.
    async fn list_tables(&mut self) -> Result<Vec<TableRef>>;

    /// Lists a table's columns in ordinal order.
    async fn list_columns(&mut self, table: &TableRef) -> Result<Vec<ColumnDescriptor>>;

    /// Lists primary key and unique index constraints in the order the
    /// database reports them, each with its columns in key order.
    async fn list_key_constraints(&mut self, table: &TableRef) -> Result<Vec<KeyConstraint>>;
}

/// Runs extraction queries and streams their rows.
#[async_trait]
pub trait QueryExecutor: Send {
    /// Executes `query` and returns a cursor over its rows.
    ///
    /// Rows are pulled one at a time; dropping the stream cancels the fetch
    /// at the next row boundary.
    ///
    /// # Errors
    /// Returns an error if the query cannot be started. Fetch failures are
    /// reported as `Err` items of the stream.
    async fn execute<'a>(
        &'a mut self,
        query: &'a ExtractionQuery,
    ) -> Result<BoxStream<'a, Result<RawRow>>>;
}
