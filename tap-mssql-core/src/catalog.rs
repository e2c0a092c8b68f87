//! Catalog discovery.
//!
//! [`CatalogBuilder`] turns introspection results into [`CatalogEntry`]
//! values: one per table or view, holding the mapped schema, the key
//! properties and the per-field metadata. Entries are built bottom-up and
//! never patched; selection and replication settings produce new entries.

use crate::{
    adapters::SchemaIntrospector,
    error::TapError,
    models::{ColumnDescriptor, KeyConstraint, KeyKind, TableRef},
    typemap::{NativeType, SchemaType, TypeMappingPolicy},
    Result,
};
use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Deserializer, Serialize, Serializer,
};

/// How a stream is replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMethod {
    /// Read the whole table on every sync
    #[default]
    FullTable,
    /// Read rows from the replication key bookmark on
    Incremental,
}

/// Whether a field is always emitted or opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Inclusion {
    /// Always emitted, e.g. key columns
    Automatic,
    /// Emitted unless deselected
    Available,
    /// Never emitted
    Unsupported,
}

/// Ordered column schemas, serialized as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties(Vec<(String, SchemaType)>);

impl Properties {
    /// Schema of one column.
    pub fn get(&self, name: &str) -> Option<&SchemaType> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// Whether the column exists.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Column names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    /// Column names with their schemas, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SchemaType)> {
        self.0.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no columns.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, SchemaType)> for Properties {
    fn from_iter<T: IntoIterator<Item = (String, SchemaType)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for Properties {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, schema) in &self.0 {
            map.serialize_entry(name, schema)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Properties {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PropertiesVisitor;

        impl<'de> Visitor<'de> for PropertiesVisitor {
            type Value = Properties;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of column schemas")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut properties = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, schema)) = access.next_entry::<String, SchemaType>()? {
                    properties.push((name, schema));
                }
                Ok(Properties(properties))
            }
        }

        deserializer.deserialize_map(PropertiesVisitor)
    }
}

fn object_type() -> String {
    "object".to_string()
}

/// JSON Schema of a stream's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSchema {
    /// Always `"object"`
    #[serde(rename = "type", default = "object_type")]
    pub schema_type: String,
    /// Column schemas, in declaration order
    pub properties: Properties,
    /// Non-nullable columns
    #[serde(default)]
    pub required: Vec<String>,
}

/// Singer metadata for a stream (empty breadcrumb) or one of its fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Metadata {
    /// Whether the field is emitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusion: Option<Inclusion>,
    /// Explicit selection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<bool>,
    /// Selection when none is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_by_default: Option<bool>,
    /// Native type as declared, e.g. `DECIMAL(10, 2)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_datatype: Option<String>,
    /// Key columns of the stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_key_properties: Option<Vec<String>>,
    /// Columns that may serve as replication key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_replication_keys: Option<Vec<String>>,
    /// Database schema of the table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_name: Option<String>,
    /// True for views
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_view: Option<bool>,
    /// Replication method chosen for the stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_method: Option<ReplicationMethod>,
    /// Replication key chosen for the stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
}

/// Metadata attached to a breadcrumb path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    /// Empty for the stream, `["properties", column]` for a field
    pub breadcrumb: Vec<String>,
    /// Metadata at that path
    pub metadata: Metadata,
}

impl MetadataEntry {
    fn field_name(&self) -> Option<&str> {
        match self.breadcrumb.as_slice() {
            [properties, name] if properties == "properties" => Some(name.as_str()),
            _ => None,
        }
    }
}

/// Everything needed to plan extraction of one table or view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// `{schema}-{table}`
    pub tap_stream_id: String,
    /// Stream name, the table name
    pub stream: String,
    /// Table or view name
    pub table_name: String,
    /// Database schema
    pub schema_name: String,
    /// True for views
    #[serde(default)]
    pub is_view: bool,
    /// Primary key, or first unique index
    #[serde(default)]
    pub key_properties: Vec<String>,
    /// JSON Schema of the records
    pub schema: StreamSchema,
    /// Stream and field metadata
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
    /// How the stream is replicated
    #[serde(default)]
    pub replication_method: ReplicationMethod,
    /// Column ordering incremental reads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
}

impl CatalogEntry {
    /// Stream-level metadata, if present.
    pub fn stream_metadata(&self) -> Option<&Metadata> {
        self.metadata
            .iter()
            .find(|m| m.breadcrumb.is_empty())
            .map(|m| &m.metadata)
    }

    /// Metadata for one field, if present.
    pub fn field_metadata(&self, column: &str) -> Option<&Metadata> {
        self.metadata
            .iter()
            .find(|m| m.field_name() == Some(column))
            .map(|m| &m.metadata)
    }

    /// Mapped schema type of a column.
    pub fn column_schema(&self, column: &str) -> Option<&SchemaType> {
        self.schema.properties.get(column)
    }

    /// Whether the stream is selected for sync.
    pub fn is_selected(&self) -> bool {
        self.stream_metadata()
            .and_then(|m| m.selected.or(m.selected_by_default))
            .unwrap_or(false)
    }

    /// Columns to emit: automatic fields plus available fields that were
    /// not explicitly deselected, in schema order.
    pub fn selected_columns(&self) -> Vec<String> {
        self.schema
            .properties
            .names()
            .filter(|name| match self.field_metadata(name) {
                Some(meta) => match meta.inclusion {
                    Some(Inclusion::Automatic) => true,
                    Some(Inclusion::Unsupported) => false,
                    _ => meta.selected.or(meta.selected_by_default).unwrap_or(true),
                },
                None => true,
            })
            .map(str::to_string)
            .collect()
    }

    fn stream_metadata_mut(&mut self) -> &mut Metadata {
        let index = match self.metadata.iter().position(|m| m.breadcrumb.is_empty()) {
            Some(index) => index,
            None => {
                self.metadata.insert(
                    0,
                    MetadataEntry {
                        breadcrumb: Vec::new(),
                        metadata: Metadata::default(),
                    },
                );
                0
            }
        };
        &mut self.metadata[index].metadata
    }

    fn field_metadata_mut(&mut self, column: &str) -> Option<&mut Metadata> {
        self.metadata
            .iter_mut()
            .find(|m| m.field_name() == Some(column))
            .map(|m| &mut m.metadata)
    }

    /// Returns a copy with the stream (de)selected.
    pub fn with_selected(&self, selected: bool) -> Self {
        let mut entry = self.clone();
        entry.stream_metadata_mut().selected = Some(selected);
        entry
    }

    /// Returns a copy with one available column (de)selected.
    ///
    /// # Errors
    /// The column is not part of the stream schema.
    pub fn with_column_selected(&self, column: &str, selected: bool) -> Result<Self> {
        let mut entry = self.clone();
        let meta = entry
            .field_metadata_mut(column)
            .ok_or_else(|| TapError::unknown_column(&self.tap_stream_id, column))?;
        meta.selected = Some(selected);
        Ok(entry)
    }

    /// Replication key of the stream, from the entry or its stream metadata.
    ///
    /// Catalogs edited the Singer way only set `replication-method` and
    /// `replication-key` in the stream metadata; the top-level fields are
    /// optional. Metadata with `FULL_TABLE` names no key.
    ///
    /// # Errors
    /// The entry and its metadata name different keys or methods, or the
    /// stream is incremental without a key.
    pub fn resolved_replication_key(&self) -> Result<Option<&str>> {
        let stream = &self.tap_stream_id;
        let metadata = self.stream_metadata();
        let metadata_method = metadata.and_then(|m| m.replication_method);
        let metadata_key = metadata.and_then(|m| m.replication_key.as_deref());
        let conflict = |ours: &str, theirs: &str| {
            TapError::configuration(format!(
                "Stream '{}' is replicated by {} but its metadata says {}",
                stream, ours, theirs
            ))
        };

        let key = match (self.replication_key.as_deref(), metadata_method, metadata_key) {
            (Some(key), Some(ReplicationMethod::FullTable), _) => {
                return Err(conflict(&format!("key '{}'", key), "FULL_TABLE"));
            }
            (Some(key), _, Some(other)) if key != other => {
                return Err(conflict(&format!("key '{}'", key), &format!("key '{}'", other)));
            }
            (Some(key), _, _) => Some(key),
            (None, Some(ReplicationMethod::FullTable), _) => None,
            (None, _, key) => key,
        };

        let incremental = self.replication_method == ReplicationMethod::Incremental
            || metadata_method == Some(ReplicationMethod::Incremental);
        if key.is_none() && incremental {
            return Err(TapError::configuration(format!(
                "Stream '{}' is INCREMENTAL but names no replication key",
                stream
            )));
        }
        Ok(key)
    }

    /// Returns a copy whose top-level replication fields carry the
    /// [resolved](Self::resolved_replication_key) key and method.
    ///
    /// # Errors
    /// Same as [`resolved_replication_key`](Self::resolved_replication_key).
    pub fn with_resolved_replication(&self) -> Result<Self> {
        let key = self.resolved_replication_key()?.map(str::to_string);
        let mut entry = self.clone();
        entry.replication_method = if key.is_some() {
            ReplicationMethod::Incremental
        } else {
            ReplicationMethod::FullTable
        };
        entry.replication_key = key;
        Ok(entry)
    }

    /// Returns a copy replicated incrementally on `replication_key`.
    ///
    /// The key becomes a valid replication key and is always emitted.
    ///
    /// # Errors
    /// The column is not part of the stream schema.
    pub fn with_replication_key(&self, replication_key: &str) -> Result<Self> {
        if !self.schema.properties.contains(replication_key) {
            return Err(TapError::unknown_column(&self.tap_stream_id, replication_key));
        }

        let mut entry = self.clone();
        entry.replication_method = ReplicationMethod::Incremental;
        entry.replication_key = Some(replication_key.to_string());

        let stream = entry.stream_metadata_mut();
        stream.replication_method = Some(ReplicationMethod::Incremental);
        stream.replication_key = Some(replication_key.to_string());
        stream.valid_replication_keys = Some(vec![replication_key.to_string()]);

        if let Some(field) = entry.field_metadata_mut(replication_key) {
            field.inclusion = Some(Inclusion::Automatic);
        }
        Ok(entry)
    }
}

/// Ordered list of discovered streams.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Streams in discovery order
    pub streams: Vec<CatalogEntry>,
}

impl Catalog {
    /// Looks up an entry by stream id.
    pub fn stream(&self, tap_stream_id: &str) -> Option<&CatalogEntry> {
        self.streams.iter().find(|s| s.tap_stream_id == tap_stream_id)
    }

    /// Entries selected for sync, in catalog order.
    pub fn selected_streams(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.streams.iter().filter(|s| s.is_selected())
    }

    /// Parses a catalog from JSON.
    ///
    /// Replication settings given only in stream metadata are lifted onto
    /// the entries.
    ///
    /// # Errors
    /// Malformed JSON, or an entry whose replication settings conflict.
    pub fn from_json(json: &str) -> Result<Self> {
        let catalog: Self =
            serde_json::from_str(json).map_err(|e| TapError::serialization("parsing catalog", e))?;
        let streams = catalog
            .streams
            .iter()
            .map(CatalogEntry::with_resolved_replication)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { streams })
    }

    /// Renders the catalog as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TapError::serialization("serializing catalog", e))
    }
}

/// Picks key properties: the primary key, else the first unique index as
/// reported, else nothing.
fn select_key_properties(constraints: &[KeyConstraint]) -> Vec<String> {
    constraints
        .iter()
        .find(|c| c.kind == KeyKind::PrimaryKey)
        .or_else(|| constraints.iter().find(|c| c.kind == KeyKind::UniqueIndex))
        .map(|c| c.columns.clone())
        .unwrap_or_default()
}

/// Builds catalog entries with a fixed type mapping policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogBuilder {
    policy: TypeMappingPolicy,
    strict: bool,
}

impl CatalogBuilder {
    /// Creates a builder mapping types with `policy`.
    pub fn new(policy: TypeMappingPolicy) -> Self {
        Self {
            policy,
            strict: false,
        }
    }

    /// Refuse unrecognized native types instead of mapping them generically.
    pub fn with_strict_types(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Type mapping policy in use.
    pub fn policy(&self) -> TypeMappingPolicy {
        self.policy
    }

    fn map_column(&self, column: &ColumnDescriptor) -> Result<SchemaType> {
        if self.strict {
            self.policy.map_strict(column)
        } else {
            self.policy.map(column)
        }
    }

    /// Assembles an entry from introspection results.
    ///
    /// # Errors
    /// A column cannot be mapped, or a key column is missing from the column list.
    pub fn build_entry(
        &self,
        table: &TableRef,
        columns: &[ColumnDescriptor],
        constraints: &[KeyConstraint],
    ) -> Result<CatalogEntry> {
        let tap_stream_id = table.stream_id();
        let key_properties = select_key_properties(constraints);

        for key in &key_properties {
            if !columns.iter().any(|c| &c.name == key) {
                return Err(TapError::unknown_column(&tap_stream_id, key));
            }
        }

        let mut properties = Vec::with_capacity(columns.len());
        let mut required = Vec::new();
        let mut field_metadata = Vec::with_capacity(columns.len());

        for column in columns {
            let schema = self.map_column(column)?;
            let diagnostic = NativeType::from_descriptor(column)?.diagnostic();
            let inclusion = if key_properties.contains(&column.name) {
                Inclusion::Automatic
            } else {
                Inclusion::Available
            };

            if !column.nullable {
                required.push(column.name.clone());
            }
            field_metadata.push(MetadataEntry {
                breadcrumb: vec!["properties".to_string(), column.name.clone()],
                metadata: Metadata {
                    inclusion: Some(inclusion),
                    selected_by_default: Some(true),
                    sql_datatype: Some(diagnostic),
                    ..Metadata::default()
                },
            });
            properties.push((column.name.clone(), schema));
        }

        let mut metadata = Vec::with_capacity(field_metadata.len().saturating_add(1));
        metadata.push(MetadataEntry {
            breadcrumb: Vec::new(),
            metadata: Metadata {
                table_key_properties: Some(key_properties.clone()),
                schema_name: Some(table.schema.clone()),
                is_view: Some(table.is_view),
                ..Metadata::default()
            },
        });
        metadata.extend(field_metadata);

        Ok(CatalogEntry {
            tap_stream_id,
            stream: table.name.clone(),
            table_name: table.name.clone(),
            schema_name: table.schema.clone(),
            is_view: table.is_view,
            key_properties,
            schema: StreamSchema {
                schema_type: object_type(),
                properties: properties.into_iter().collect(),
                required,
            },
            metadata,
            replication_method: ReplicationMethod::FullTable,
            replication_key: None,
        })
    }

    /// Discovers one table or view.
    pub async fn discover_table<I>(&self, introspector: &mut I, table: &TableRef) -> Result<CatalogEntry>
    where
        I: SchemaIntrospector + ?Sized,
    {
        let columns = introspector.list_columns(table).await?;
        let constraints = introspector.list_key_constraints(table).await?;
        tracing::debug!(
            "Discovered {} columns and {} key constraints for {}",
            columns.len(),
            constraints.len(),
            table.stream_id()
        );
        self.build_entry(table, &columns, &constraints)
    }

    /// Discovers every table and view the introspector lists.
    pub async fn discover<I>(&self, introspector: &mut I) -> Result<Catalog>
    where
        I: SchemaIntrospector + ?Sized,
    {
        let tables = introspector.list_tables().await?;
        tracing::info!("Discovering {} tables and views", tables.len());

        let mut streams = Vec::with_capacity(tables.len());
        for table in &tables {
            streams.push(self.discover_table(introspector, table).await?);
        }
        Ok(Catalog { streams })
    }
}
