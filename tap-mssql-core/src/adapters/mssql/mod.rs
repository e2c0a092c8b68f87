//! SQL Server source built on the tiberius TDS driver.
//!
//! # Module Structure
//! - `connection`: TDS session setup and TLS settings
//! - `schema_collection`: Table, column and key constraint introspection
//! - `values`: Driver value to [`NativeValue`](crate::models::NativeValue) conversion
//!
//! # Security Guarantees
//! - All operations are read-only (SELECT only)
//! - Bookmark values are bound as parameters, never interpolated
//! - Connection errors name the server, never the credentials

mod connection;
mod schema_collection;
mod values;

use super::{QueryExecutor, SchemaIntrospector};
use crate::{
    config::{ConnectionConfig, Password},
    error::TapError,
    models::{ColumnDescriptor, KeyConstraint, RawRow, TableRef},
    planner::{ExtractionQuery, SqlDialect},
    Result,
};
use async_trait::async_trait;
use connection::SqlClient;
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use tiberius::Query;

/// A single SQL Server session serving discovery and extraction.
pub struct SqlServerSource {
    client: SqlClient,
    config: ConnectionConfig,
}

impl std::fmt::Debug for SqlServerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlServerSource")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SqlServerSource {
    /// Connects to the server described by `config`.
    ///
    /// # Errors
    /// Returns a configuration error for invalid settings and a connection
    /// error if the session cannot be established in time.
    pub async fn connect(config: ConnectionConfig, password: &Password) -> Result<Self> {
        let client = connection::connect(&config, password).await?;
        Ok(Self { client, config })
    }

    /// Connection settings the session was opened with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait]
impl SchemaIntrospector for SqlServerSource {
    async fn list_tables(&mut self) -> Result<Vec<TableRef>> {
        schema_collection::collect_tables(&mut self.client).await
    }

    async fn list_columns(&mut self, table: &TableRef) -> Result<Vec<ColumnDescriptor>> {
        schema_collection::collect_columns(&mut self.client, table).await
    }

    async fn list_key_constraints(&mut self, table: &TableRef) -> Result<Vec<KeyConstraint>> {
        schema_collection::collect_key_constraints(&mut self.client, table).await
    }
}

#[async_trait]
impl QueryExecutor for SqlServerSource {
    async fn execute<'a>(
        &'a mut self,
        query: &'a ExtractionQuery,
    ) -> Result<BoxStream<'a, Result<RawRow>>> {
        if query.dialect != SqlDialect::SqlServer {
            return Err(TapError::configuration(format!(
                "SQL Server cannot run a {:?} query",
                query.dialect
            )));
        }

        let sql = query.to_sql();
        let context = format!("extracting {}", query.stream);
        let mut statement = Query::new(sql);
        for parameter in query.parameters() {
            values::bind_bookmark(&mut statement, parameter);
        }

        let stream = statement
            .query(&mut self.client)
            .await
            .map_err(|e| TapError::query_error(context.clone(), e))?;

        Ok(stream
            .into_row_stream()
            .map_err(move |e| TapError::query_error(context.clone(), e))
            .and_then(|row| futures::future::ready(values::raw_row(row)))
            .boxed())
    }
}
