//! In-memory database shared by the integration tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use futures::{stream::BoxStream, StreamExt};
use std::cmp::Ordering;
use tap_mssql_core::{
    adapters::{QueryExecutor, SchemaIntrospector},
    models::{ColumnDescriptor, KeyConstraint, NativeValue, RawRow, TableRef},
    planner::ExtractionQuery,
    BookmarkValue, Result, TapError,
};

/// One table with its rows.
#[derive(Debug, Clone)]
pub struct MemoryTable {
    pub table: TableRef,
    pub columns: Vec<ColumnDescriptor>,
    pub keys: Vec<KeyConstraint>,
    pub rows: Vec<RawRow>,
}

impl MemoryTable {
    pub fn new(table: TableRef, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            table,
            columns,
            keys: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: KeyConstraint) -> Self {
        self.keys.push(key);
        self
    }

    pub fn with_rows(mut self, rows: impl IntoIterator<Item = RawRow>) -> Self {
        self.rows.extend(rows);
        self
    }
}

/// A database that answers introspection and extraction from memory,
/// honoring the planned filter, order and limit.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    pub tables: Vec<MemoryTable>,
    pub executed: Vec<String>,
}

impl MemoryDatabase {
    pub fn new(tables: Vec<MemoryTable>) -> Self {
        Self {
            tables,
            executed: Vec::new(),
        }
    }

    fn find(&self, schema: &str, name: &str) -> Result<&MemoryTable> {
        self.tables
            .iter()
            .find(|t| t.table.schema == schema && t.table.name == name)
            .ok_or_else(|| TapError::query_failed(format!("no table {}.{}", schema, name)))
    }
}

fn compare(a: Option<&BookmarkValue>, b: Option<&BookmarkValue>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) if a.is_after(b) => Ordering::Greater,
        (Some(a), Some(b)) if b.is_after(a) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn bookmark_of(row: &RawRow, column: &str) -> Option<BookmarkValue> {
    row.get(column).and_then(NativeValue::to_bookmark)
}

#[async_trait]
impl SchemaIntrospector for MemoryDatabase {
    async fn list_tables(&mut self) -> Result<Vec<TableRef>> {
        Ok(self.tables.iter().map(|t| t.table.clone()).collect())
    }

    async fn list_columns(&mut self, table: &TableRef) -> Result<Vec<ColumnDescriptor>> {
        Ok(self.find(&table.schema, &table.name)?.columns.clone())
    }

    async fn list_key_constraints(&mut self, table: &TableRef) -> Result<Vec<KeyConstraint>> {
        Ok(self.find(&table.schema, &table.name)?.keys.clone())
    }
}

#[async_trait]
impl QueryExecutor for MemoryDatabase {
    async fn execute<'a>(
        &'a mut self,
        query: &'a ExtractionQuery,
    ) -> Result<BoxStream<'a, Result<RawRow>>> {
        self.executed.push(query.to_sql());
        let table = self.find(&query.schema_name, &query.table_name)?;

        let mut rows: Vec<RawRow> = table
            .rows
            .iter()
            .filter(|row| match &query.filter {
                Some(filter) => {
                    compare(bookmark_of(row, &filter.column).as_ref(), Some(&filter.value))
                        != Ordering::Less
                }
                None => true,
            })
            .cloned()
            .collect();

        if let Some(order) = &query.order_by {
            rows.sort_by(|a, b| {
                compare(
                    bookmark_of(a, &order.column).as_ref(),
                    bookmark_of(b, &order.column).as_ref(),
                )
            });
        }

        let limit = query
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);
        let projected: Vec<Result<RawRow>> = rows
            .into_iter()
            .take(limit)
            .map(|row| {
                let mut out = RawRow::with_capacity(query.columns.len());
                for column in &query.columns {
                    let value = row.get(column).cloned().unwrap_or(NativeValue::Null);
                    out.push(column.clone(), value);
                }
                Ok(out)
            })
            .collect();

        Ok(futures::stream::iter(projected).boxed())
    }
}

/// `dbo.events`: integer key, a timestamp and a payload.
pub fn events_table(count: i64) -> MemoryTable {
    let columns = vec![
        ColumnDescriptor::new("id", "int", false),
        ColumnDescriptor::new("updated_at", "datetime2", true),
        ColumnDescriptor::new("payload", "nvarchar", true).with_length(200),
    ];
    let base = chrono::NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap();
    let rows = (1..=count).map(|id| {
        RawRow::new()
            .with("id", NativeValue::Int(id))
            .with("updated_at", NativeValue::DateTime(base + chrono::Duration::minutes(id)))
            .with("payload", NativeValue::String(format!("event {}", id)))
    });

    MemoryTable::new(TableRef::table("dbo", "events"), columns)
        .with_key(KeyConstraint::primary_key("PK_events", &["id"]))
        .with_rows(rows)
}

/// Parses every line a `MessageWriter` produced.
pub fn parse_messages(output: &[u8]) -> Vec<serde_json::Value> {
    String::from_utf8(output.to_vec())
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// The `type` of every message, in order.
pub fn message_types(messages: &[serde_json::Value]) -> Vec<String> {
    messages
        .iter()
        .map(|m| m["type"].as_str().unwrap().to_string())
        .collect()
}
