//! Table, column and key collection from the SQL Server catalog views.

use super::connection::SqlClient;
use crate::{
    error::TapError,
    models::{ColumnDescriptor, KeyConstraint, KeyKind, TableRef},
    planner::SqlDialect,
    Result,
};
use tiberius::{Query, Row};

const TABLES_QUERY: &str = r"
    SELECT TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE
    FROM INFORMATION_SCHEMA.TABLES
    ORDER BY TABLE_SCHEMA, TABLE_NAME
";

const COLUMNS_QUERY: &str = r"
    SELECT
        COLUMN_NAME,
        DATA_TYPE,
        CASE WHEN IS_NULLABLE = 'YES' THEN 1 ELSE 0 END,
        CAST(CHARACTER_MAXIMUM_LENGTH AS INT),
        CAST(NUMERIC_PRECISION AS INT),
        CAST(NUMERIC_SCALE AS INT)
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
    ORDER BY ORDINAL_POSITION
";

const KEYS_QUERY: &str = r"
    SELECT i.name, CAST(i.is_primary_key AS INT), c.name
    FROM sys.indexes i
    JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
    JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
    WHERE i.object_id = OBJECT_ID(@P1)
      AND (i.is_primary_key = 1 OR i.is_unique = 1)
      AND ic.is_included_column = 0
    ORDER BY i.index_id, ic.key_ordinal
";

fn text(row: &Row, index: usize, context: &str) -> Result<String> {
    row.try_get::<&str, usize>(index)
        .map_err(|e| TapError::discovery_failed(context, e))?
        .map(str::to_string)
        .ok_or_else(|| TapError::discovery_failed(context, missing(index)))
}

fn int(row: &Row, index: usize, context: &str) -> Result<Option<i32>> {
    row.try_get::<i32, usize>(index)
        .map_err(|e| TapError::discovery_failed(context, e))
}

fn missing(index: usize) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("unexpected NULL in catalog column {}", index),
    )
}

async fn fetch(client: &mut SqlClient, query: Query<'_>, context: &str) -> Result<Vec<Row>> {
    query
        .query(client)
        .await
        .map_err(|e| TapError::discovery_failed(context, e))?
        .into_first_result()
        .await
        .map_err(|e| TapError::discovery_failed(context, e))
}

pub(super) async fn collect_tables(client: &mut SqlClient) -> Result<Vec<TableRef>> {
    let context = "listing tables";
    let rows = fetch(client, Query::new(TABLES_QUERY), context).await?;

    rows.iter()
        .map(|row| {
            let schema = text(row, 0, context)?;
            let name = text(row, 1, context)?;
            let is_view = text(row, 2, context)? == "VIEW";
            Ok(if is_view {
                TableRef::view(schema, name)
            } else {
                TableRef::table(schema, name)
            })
        })
        .collect()
}

/// Length only applies to character and binary types and precision only
/// to exact decimals; the catalog views report both for others too.
fn column_descriptor(row: &Row, context: &str) -> Result<ColumnDescriptor> {
    let name = text(row, 0, context)?;
    let native_type = text(row, 1, context)?;
    let nullable = int(row, 2, context)? == Some(1);
    let mut column = ColumnDescriptor::new(name, native_type.as_str(), nullable);

    if let Some(length) = int(row, 3, context)? {
        column = column.with_length(i64::from(length));
    }
    if matches!(native_type.to_ascii_lowercase().as_str(), "decimal" | "numeric")
        && let (Some(precision), Some(scale)) = (int(row, 4, context)?, int(row, 5, context)?)
    {
        let precision = u32::try_from(precision).map_err(|e| TapError::discovery_failed(context, e))?;
        let scale = u32::try_from(scale).map_err(|e| TapError::discovery_failed(context, e))?;
        column = column.with_precision(precision, scale);
    }
    Ok(column)
}

pub(super) async fn collect_columns(client: &mut SqlClient, table: &TableRef) -> Result<Vec<ColumnDescriptor>> {
    let context = format!("listing columns of {}", table.stream_id());
    let mut query = Query::new(COLUMNS_QUERY);
    query.bind(table.schema.as_str());
    query.bind(table.name.as_str());

    let rows = fetch(client, query, &context).await?;
    let columns = rows
        .iter()
        .map(|row| column_descriptor(row, &context))
        .collect::<Result<Vec<_>>>()?;

    tracing::debug!("Collected {} columns for {}", columns.len(), table.stream_id());
    Ok(columns)
}

/// Groups `(index, is_primary_key, column)` rows, already ordered by index
/// and key ordinal, into constraints.
fn group_constraints(rows: impl IntoIterator<Item = (String, bool, String)>) -> Vec<KeyConstraint> {
    let mut constraints: Vec<KeyConstraint> = Vec::new();
    for (index_name, is_primary, column) in rows {
        match constraints.last_mut() {
            Some(current) if current.name == index_name => current.columns.push(column),
            _ => constraints.push(KeyConstraint {
                name: index_name,
                kind: if is_primary {
                    KeyKind::PrimaryKey
                } else {
                    KeyKind::UniqueIndex
                },
                columns: vec![column],
            }),
        }
    }
    constraints
}

pub(super) async fn collect_key_constraints(
    client: &mut SqlClient,
    table: &TableRef,
) -> Result<Vec<KeyConstraint>> {
    let context = format!("listing keys of {}", table.stream_id());
    let dialect = SqlDialect::SqlServer;
    let qualified = format!(
        "{}.{}",
        dialect.quote_identifier(&table.schema),
        dialect.quote_identifier(&table.name)
    );
    let mut query = Query::new(KEYS_QUERY);
    query.bind(qualified);

    let rows = fetch(client, query, &context).await?;
    let triples = rows
        .iter()
        .map(|row| {
            Ok((
                text(row, 0, &context)?,
                int(row, 1, &context)? == Some(1),
                text(row, 2, &context)?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(group_constraints(triples))
}
