//! Extraction query planning.
//!
//! [`ExtractionPlanner::plan`] turns a catalog entry, a column selection and
//! optional replication settings into an [`ExtractionQuery`]: a projection,
//! an ascending order on the replication key, an inclusive `>=` bookmark
//! filter and a row limit one past the abort threshold. Rendering to SQL is
//! separate so the same plan can be shown, logged or executed.
//!
//! Only single-table, unpartitioned reads are planned.

use crate::{
    catalog::CatalogEntry,
    error::TapError,
    models::BookmarkValue,
    typemap::{JsonType, SchemaType},
    Result,
};
use chrono::{FixedOffset, NaiveDateTime, TimeZone};

/// SQL flavor used when rendering a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    /// `[ident]` quoting, `TOP (n)`, `@P1` parameters
    #[default]
    SqlServer,
    /// `"ident"` quoting, `LIMIT n`, `$1` parameters
    Ansi,
}

impl SqlDialect {
    /// Quotes an identifier, escaping the closing quote character.
    pub fn quote_identifier(self, identifier: &str) -> String {
        match self {
            Self::SqlServer => format!("[{}]", identifier.replace(']', "]]")),
            Self::Ansi => format!("\"{}\"", identifier.replace('"', "\"\"")),
        }
    }

    /// Whether `NULLS FIRST` can be requested explicitly.
    ///
    /// SQL Server has no such clause, but ascending order already sorts
    /// NULLs first there.
    pub fn supports_nulls_first(self) -> bool {
        matches!(self, Self::Ansi)
    }

    fn placeholder(self, index: usize) -> String {
        match self {
            Self::SqlServer => format!("@P{}", index),
            Self::Ansi => format!("${}", index),
        }
    }
}

/// Comparison domain of a replication key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookmarkDomain {
    /// Dates and timestamps
    Timestamp,
    /// Exact integers
    Integer,
    /// Any number
    Number,
    /// Text
    String,
}

impl BookmarkDomain {
    /// Derives the domain from the key's mapped schema type.
    fn for_schema(stream: &str, key: &str, schema: &SchemaType) -> Result<Self> {
        if schema.is_temporal() {
            return Ok(Self::Timestamp);
        }
        match schema.primary() {
            JsonType::Integer => Ok(Self::Integer),
            JsonType::Number => Ok(Self::Number),
            JsonType::String => Ok(Self::String),
            JsonType::Boolean => Err(TapError::configuration(format!(
                "Replication key '{}' of stream '{}' is boolean and cannot order rows",
                key, stream
            ))),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::String => "string",
        }
    }

    /// Checks a bookmark against the domain, parsing timestamp strings.
    ///
    /// An integral `Number`, as older state files hold for decimal keys,
    /// is accepted for the integer domain and narrowed exactly.
    #[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
    fn normalize(self, key: &str, bookmark: &BookmarkValue) -> Result<BookmarkValue> {
        let mismatch = || TapError::BookmarkDomain {
            replication_key: key.to_string(),
            expected: self.name().to_string(),
            actual: bookmark.kind().to_string(),
        };

        match (self, bookmark) {
            (Self::Timestamp, BookmarkValue::Timestamp(_))
            | (Self::Integer, BookmarkValue::Integer(_) | BookmarkValue::BigInteger(_))
            | (
                Self::Number,
                BookmarkValue::Integer(_) | BookmarkValue::BigInteger(_) | BookmarkValue::Number(_),
            )
            | (Self::String, BookmarkValue::String(_)) => Ok(bookmark.clone()),
            (Self::Integer, BookmarkValue::Number(v))
                if v.is_finite() && v.trunc() == *v && v.abs() < I128_LIMIT =>
            {
                Ok(BookmarkValue::integer(*v as i128))
            }
            (Self::Timestamp, BookmarkValue::String(text)) => {
                parse_timestamp(text).ok_or_else(|| TapError::BookmarkDomain {
                    replication_key: key.to_string(),
                    expected: "RFC 3339 timestamp".to_string(),
                    actual: format!("'{}'", text),
                })
            }
            _ => Err(mismatch()),
        }
    }
}

/// `2^127`: integral floats below it convert to `i128` without saturating.
const I128_LIMIT: f64 = 1.701_411_834_604_692_3e38;

/// Parses RFC 3339, or an offset-less timestamp taken as UTC.
fn parse_timestamp(text: &str) -> Option<BookmarkValue> {
    BookmarkValue::parse_timestamp(text).or_else(|| {
        let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        let utc = FixedOffset::east_opt(0)?;
        Some(BookmarkValue::Timestamp(utc.from_utc_datetime(&naive)))
    })
}

/// Ascending order on the replication key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// Replication key column
    pub column: String,
    /// Request NULLs first explicitly
    pub nulls_first: bool,
}

/// Inclusive lower bound on the replication key.
#[derive(Debug, Clone, PartialEq)]
pub struct BookmarkFilter {
    /// Replication key column
    pub column: String,
    /// Lowest key value read, bound as a parameter
    pub value: BookmarkValue,
}

/// A planned single-table read.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionQuery {
    /// SQL flavor to render
    pub dialect: SqlDialect,
    /// Stream id
    pub stream: String,
    /// Database schema
    pub schema_name: String,
    /// Table or view name
    pub table_name: String,
    /// Projected columns, in order
    pub columns: Vec<String>,
    /// Ascending order, when incremental
    pub order_by: Option<OrderBy>,
    /// Bookmark filter, when resuming
    pub filter: Option<BookmarkFilter>,
    /// Maximum rows to fetch, already one past the abort threshold
    pub limit: Option<u64>,
}

impl ExtractionQuery {
    /// Renders the query text for its dialect.
    ///
    /// The bookmark, if any, is the only bound parameter.
    pub fn to_sql(&self) -> String {
        let d = self.dialect;
        let projection = self
            .columns
            .iter()
            .map(|c| d.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = String::from("SELECT ");
        if let (SqlDialect::SqlServer, Some(limit)) = (d, self.limit) {
            sql.push_str(&format!("TOP ({}) ", limit));
        }
        sql.push_str(&projection);
        sql.push_str(&format!(
            " FROM {}.{}",
            d.quote_identifier(&self.schema_name),
            d.quote_identifier(&self.table_name)
        ));

        if let Some(filter) = &self.filter {
            sql.push_str(&format!(
                " WHERE {} >= {}",
                d.quote_identifier(&filter.column),
                d.placeholder(1)
            ));
        }

        if let Some(order) = &self.order_by {
            sql.push_str(&format!(" ORDER BY {} ASC", d.quote_identifier(&order.column)));
            if order.nulls_first {
                sql.push_str(" NULLS FIRST");
            }
        }

        if let (SqlDialect::Ansi, Some(limit)) = (d, self.limit) {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }

    /// Bound parameters, in placeholder order.
    pub fn parameters(&self) -> Vec<&BookmarkValue> {
        self.filter.iter().map(|f| &f.value).collect()
    }
}

/// Plans extraction queries for one SQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractionPlanner {
    dialect: SqlDialect,
}

impl ExtractionPlanner {
    /// Creates a planner for `dialect`.
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    /// SQL flavor queries are rendered in.
    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Plans the read of one stream.
    ///
    /// # Arguments
    /// * `entry` - Catalog entry of the stream
    /// * `selected_columns` - Columns to project, all from the entry's schema
    /// * `replication_key` - Column to order and bound by, if incremental
    /// * `bookmark` - Last-seen key value; rows `>=` it are read
    /// * `abort_threshold` - Row count above which the caller aborts
    ///
    /// # Errors
    /// Configuration errors for an empty or unknown projection, an unknown
    /// replication key, a bookmark without a key, or a bookmark outside the
    /// key's comparison domain.
    ///
    /// # Example
    /// ```rust,ignore
    /// let planner = ExtractionPlanner::new(SqlDialect::SqlServer);
    /// let query = planner.plan(&entry, &entry.selected_columns(), Some("id"), None, Some(100))?;
    /// assert!(query.to_sql().starts_with("SELECT TOP (101)"));
    /// ```
    pub fn plan(
        &self,
        entry: &CatalogEntry,
        selected_columns: &[String],
        replication_key: Option<&str>,
        bookmark: Option<&BookmarkValue>,
        abort_threshold: Option<u64>,
    ) -> Result<ExtractionQuery> {
        let stream = &entry.tap_stream_id;

        if selected_columns.is_empty() {
            return Err(TapError::configuration(format!(
                "No columns selected for stream '{}'",
                stream
            )));
        }
        for column in selected_columns {
            if !entry.schema.properties.contains(column) {
                return Err(TapError::unknown_column(stream, column));
            }
        }

        let mut order_by = None;
        let mut filter = None;

        match replication_key {
            Some(key) => {
                let key_schema = entry
                    .column_schema(key)
                    .ok_or_else(|| TapError::unknown_column(stream, key))?;

                order_by = Some(OrderBy {
                    column: key.to_string(),
                    nulls_first: self.dialect.supports_nulls_first() && key_schema.json_type.nullable,
                });

                if let Some(bookmark) = bookmark {
                    let domain = BookmarkDomain::for_schema(stream, key, key_schema)?;
                    filter = Some(BookmarkFilter {
                        column: key.to_string(),
                        value: domain.normalize(key, bookmark)?,
                    });
                }
            }
            None if bookmark.is_some() => {
                return Err(TapError::configuration(format!(
                    "Stream '{}' has a bookmark but no replication key",
                    stream
                )));
            }
            None => {}
        }

        let query = ExtractionQuery {
            dialect: self.dialect,
            stream: stream.clone(),
            schema_name: entry.schema_name.clone(),
            table_name: entry.table_name.clone(),
            columns: selected_columns.to_vec(),
            order_by,
            filter,
            limit: abort_threshold.map(|t| t.saturating_add(1)),
        };

        tracing::debug!("Planned query for {}: {}", stream, query.to_sql());
        Ok(query)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{
        catalog::CatalogBuilder,
        models::{ColumnDescriptor, TableRef},
        typemap::TypeMappingPolicy,
    };

    fn entry() -> CatalogEntry {
        let columns = vec![
            ColumnDescriptor::new("id", "int", false),
            ColumnDescriptor::new("name", "nvarchar", true).with_length(50),
            ColumnDescriptor::new("score", "float", true),
            ColumnDescriptor::new("updated_at", "datetime2", true),
            ColumnDescriptor::new("active", "bit", false),
        ];
        CatalogBuilder::new(TypeMappingPolicy::Precise)
            .build_entry(&TableRef::table("dbo", "users"), &columns, &[])
            .unwrap()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_full_table_query() {
        let planner = ExtractionPlanner::new(SqlDialect::SqlServer);
        let query = planner.plan(&entry(), &cols(&["id", "name"]), None, None, None).unwrap();
        assert_eq!(query.to_sql(), "SELECT [id], [name] FROM [dbo].[users]");
        assert!(query.parameters().is_empty());
    }

    #[test]
    fn test_incremental_query_sql_server() {
        let planner = ExtractionPlanner::new(SqlDialect::SqlServer);
        let bookmark = BookmarkValue::String("2024-01-01T00:00:00Z".to_string());
        let query = planner
            .plan(&entry(), &cols(&["id", "updated_at"]), Some("updated_at"), Some(&bookmark), Some(100))
            .unwrap();

        assert_eq!(
            query.to_sql(),
            "SELECT TOP (101) [id], [updated_at] FROM [dbo].[users] WHERE [updated_at] >= @P1 ORDER BY [updated_at] ASC"
        );
        assert_eq!(query.limit, Some(101));
        assert!(matches!(query.parameters()[0], BookmarkValue::Timestamp(_)));
    }

    #[test]
    fn test_incremental_query_ansi_nulls_first() {
        let planner = ExtractionPlanner::new(SqlDialect::Ansi);
        let query = planner
            .plan(&entry(), &cols(&["id", "updated_at"]), Some("updated_at"), None, Some(10))
            .unwrap();
        assert_eq!(
            query.to_sql(),
            "SELECT \"id\", \"updated_at\" FROM \"dbo\".\"users\" ORDER BY \"updated_at\" ASC NULLS FIRST LIMIT 11"
        );

        // non-nullable keys never request null ordering
        let query = planner.plan(&entry(), &cols(&["id"]), Some("id"), None, None).unwrap();
        assert!(!query.order_by.unwrap().nulls_first);
    }

    #[test]
    fn test_numeric_bookmark() {
        let planner = ExtractionPlanner::default();
        let query = planner
            .plan(&entry(), &cols(&["id"]), Some("id"), Some(&BookmarkValue::Integer(42)), None)
            .unwrap();
        assert_eq!(query.filter.unwrap().value, BookmarkValue::Integer(42));

        let query = planner
            .plan(&entry(), &cols(&["score"]), Some("score"), Some(&BookmarkValue::Integer(3)), None)
            .unwrap();
        assert!(query.filter.is_some());
    }

    #[test]
    fn test_integral_number_bookmark_for_integer_key() {
        let planner = ExtractionPlanner::default();
        let query = planner
            .plan(&entry(), &cols(&["id"]), Some("id"), Some(&BookmarkValue::Number(5.0)), None)
            .unwrap();
        assert_eq!(query.filter.unwrap().value, BookmarkValue::Integer(5));

        let error = planner
            .plan(&entry(), &cols(&["id"]), Some("id"), Some(&BookmarkValue::Number(5.5)), None)
            .unwrap_err();
        assert!(matches!(error, TapError::BookmarkDomain { .. }));

        let wide = BookmarkValue::BigInteger(10_000_000_000_000_000_001);
        let query = planner.plan(&entry(), &cols(&["id"]), Some("id"), Some(&wide), None).unwrap();
        assert_eq!(query.filter.unwrap().value, wide);
    }

    #[test]
    fn test_wrong_domain_bookmark() {
        let planner = ExtractionPlanner::default();

        let error = planner
            .plan(&entry(), &cols(&["id"]), Some("updated_at"), Some(&BookmarkValue::Integer(5)), None)
            .unwrap_err();
        assert!(matches!(error, TapError::BookmarkDomain { .. }));
        assert!(error.is_configuration());

        let error = planner
            .plan(
                &entry(),
                &cols(&["id"]),
                Some("updated_at"),
                Some(&BookmarkValue::String("yesterday".to_string())),
                None,
            )
            .unwrap_err();
        assert!(error.is_configuration());

        let error = planner
            .plan(&entry(), &cols(&["id"]), Some("id"), Some(&BookmarkValue::String("7".into())), None)
            .unwrap_err();
        assert!(matches!(error, TapError::BookmarkDomain { .. }));

        let error = planner
            .plan(&entry(), &cols(&["id"]), Some("active"), Some(&BookmarkValue::Integer(1)), None)
            .unwrap_err();
        assert!(error.is_configuration());
    }

    #[test]
    fn test_naive_timestamp_bookmark() {
        let planner = ExtractionPlanner::default();
        let bookmark = BookmarkValue::String("2024-05-01T08:30:00.250".to_string());
        let query = planner
            .plan(&entry(), &cols(&["id"]), Some("updated_at"), Some(&bookmark), None)
            .unwrap();
        assert_eq!(
            query.filter.unwrap().value.to_string(),
            "2024-05-01T08:30:00.250Z"
        );
    }

    #[test]
    fn test_unknown_columns() {
        let planner = ExtractionPlanner::default();
        let error = planner.plan(&entry(), &cols(&["id", "ghost"]), None, None, None).unwrap_err();
        assert!(matches!(error, TapError::UnknownColumn { ref column, .. } if column == "ghost"));

        let error = planner.plan(&entry(), &cols(&["id"]), Some("ghost"), None, None).unwrap_err();
        assert!(matches!(error, TapError::UnknownColumn { .. }));

        assert!(planner.plan(&entry(), &[], None, None, None).is_err());
    }

    #[test]
    fn test_bookmark_without_key() {
        let planner = ExtractionPlanner::default();
        let error = planner
            .plan(&entry(), &cols(&["id"]), None, Some(&BookmarkValue::Integer(1)), None)
            .unwrap_err();
        assert!(error.is_configuration());
    }

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(SqlDialect::SqlServer.quote_identifier("odd]name"), "[odd]]name]");
        assert_eq!(SqlDialect::Ansi.quote_identifier("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(SqlDialect::SqlServer.quote_identifier("user-id"), "[user-id]");
    }
}
