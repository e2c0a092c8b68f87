//! Stream synchronization.
//!
//! [`StreamSync`] runs one stream end to end: SCHEMA, then the rows as
//! RECORD messages (or BATCH messages in batch mode), then STATE with the
//! highest replication key value seen. Streams run one after another and
//! rows are pulled one at a time.

use crate::{
    adapters::QueryExecutor,
    batch::{BatchNaming, BatchWriter},
    catalog::{Catalog, CatalogEntry},
    config::{BatchConfig, TapConfig, TAP_NAME},
    encoder::RecordEncoder,
    error::TapError,
    messages::{Message, MessageWriter},
    models::{BookmarkValue, NativeValue, RawRow, Record},
    planner::{ExtractionPlanner, SqlDialect},
    state::TapState,
    Result,
};
use chrono::{DateTime, FixedOffset, Utc};
use futures::StreamExt;
use std::io::Write;

/// Partition or context passed by an orchestrator.
pub type SyncContext = serde_json::Map<String, serde_json::Value>;

/// Settings that shape every stream sync.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Tap name used in batch file names
    pub tap_name: String,
    /// SQL flavor of the source
    pub dialect: SqlDialect,
    /// Initial bookmark for temporal replication keys
    pub start_date: Option<DateTime<FixedOffset>>,
    /// Maximum rows per stream before the sync aborts
    pub abort_threshold: Option<u64>,
    /// Batch mode when set
    pub batch: Option<BatchConfig>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            tap_name: TAP_NAME.to_string(),
            dialect: SqlDialect::SqlServer,
            start_date: None,
            abort_threshold: None,
            batch: None,
        }
    }
}

impl SyncOptions {
    /// Takes start date, abort threshold and batch settings from the config.
    pub fn from_config(config: &TapConfig) -> Self {
        Self {
            start_date: config.start_date,
            abort_threshold: config.abort_at_record_count,
            batch: config.batch_config.clone(),
            ..Self::default()
        }
    }

    /// Builder method to set the SQL flavor.
    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Builder method to set the abort threshold.
    pub fn with_abort_threshold(mut self, threshold: u64) -> Self {
        self.abort_threshold = Some(threshold);
        self
    }

    /// Builder method to set the start date.
    pub fn with_start_date(mut self, start_date: DateTime<FixedOffset>) -> Self {
        self.start_date = Some(start_date);
        self
    }

    /// Builder method to switch on batch mode.
    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = Some(batch);
        self
    }
}

/// Outcome of one stream sync.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    /// Stream id
    pub stream: String,
    /// Rows emitted
    pub rows: u64,
    /// BATCH messages emitted
    pub batches: usize,
    /// Bookmark recorded in state
    pub bookmark: Option<BookmarkValue>,
}

/// Counts, encodes and bookmarks rows as they are pulled.
struct RowTracker<'e> {
    entry: &'e CatalogEntry,
    encoder: RecordEncoder,
    replication_key: Option<&'e str>,
    threshold: Option<u64>,
    rows: u64,
    exceeded: bool,
    bookmark: Option<BookmarkValue>,
}

impl<'e> RowTracker<'e> {
    fn new(entry: &'e CatalogEntry, threshold: Option<u64>, bookmark: Option<BookmarkValue>) -> Self {
        Self {
            entry,
            encoder: RecordEncoder::new(),
            replication_key: entry.replication_key.as_deref(),
            threshold,
            rows: 0,
            exceeded: false,
            bookmark,
        }
    }

    /// Encodes the next row, or returns `None` once the threshold is passed.
    fn admit(&mut self, row: Result<RawRow>) -> Option<Result<Record>> {
        let row = match row {
            Ok(row) => row,
            Err(e) => return Some(Err(e)),
        };
        if self.threshold.is_some_and(|t| self.rows >= t) {
            self.exceeded = true;
            return None;
        }
        self.rows = self.rows.saturating_add(1);

        if let Some(value) = self
            .replication_key
            .and_then(|key| row.get(key))
            .and_then(NativeValue::to_bookmark)
            && self.bookmark.as_ref().is_none_or(|current| value.is_after(current))
        {
            self.bookmark = Some(value);
        }

        Some(Ok(self.encoder.encode(&row, self.entry)))
    }
}

/// Runs stream syncs with fixed options.
#[derive(Debug)]
pub struct StreamSync {
    options: SyncOptions,
    planner: ExtractionPlanner,
    batch_writer: Option<BatchWriter>,
}

impl StreamSync {
    /// Creates a runner; batch mode writes to local storage under the
    /// configured root.
    ///
    /// # Errors
    /// The batch storage root cannot be resolved.
    pub fn new(options: SyncOptions) -> Result<Self> {
        let batch_writer = options.batch.clone().map(BatchWriter::local).transpose()?;
        Ok(Self {
            planner: ExtractionPlanner::new(options.dialect),
            options,
            batch_writer,
        })
    }

    /// Replaces the batch writer, switching on batch mode.
    pub fn with_batch_writer(mut self, writer: BatchWriter) -> Self {
        self.batch_writer = Some(writer);
        self
    }

    /// Resolves the starting bookmark from state or `start_date`.
    fn initial_bookmark(&self, entry: &CatalogEntry, state: &TapState) -> Option<BookmarkValue> {
        let key = entry.replication_key.as_deref()?;
        let stream = &entry.tap_stream_id;

        if let Some(value) = state.bookmark(stream) {
            match state.replication_key(stream) {
                Some(recorded) if recorded != key => {
                    tracing::warn!(
                        "Ignoring bookmark of {} recorded for replication key '{}', now '{}'",
                        stream,
                        recorded,
                        key
                    );
                }
                _ => return Some(value.clone()),
            }
        }

        let start_date = self.options.start_date?;
        entry
            .column_schema(key)
            .filter(|schema| schema.is_temporal())
            .map(|_| BookmarkValue::Timestamp(start_date))
    }

    /// Syncs one stream, writing its messages to `writer`.
    ///
    /// Emits SCHEMA, the records, then STATE. When the stream holds more
    /// rows than the abort threshold, the first `threshold` rows and a STATE
    /// with their bookmark are emitted before the error is returned, so the
    /// next run resumes from there.
    ///
    /// # Errors
    /// - `PartitionUnsupported` when a context is given
    /// - Configuration errors from conflicting replication settings or planning
    /// - `AbortThresholdExceeded` when the threshold is passed
    /// - Query, storage and I/O errors, unchanged
    pub async fn sync_stream<E, W>(
        &self,
        executor: &mut E,
        entry: &CatalogEntry,
        state: &mut TapState,
        context: Option<&SyncContext>,
        writer: &mut MessageWriter<W>,
    ) -> Result<StreamSummary>
    where
        E: QueryExecutor + ?Sized,
        W: Write,
    {
        let stream = entry.tap_stream_id.clone();
        if context.is_some() {
            return Err(TapError::PartitionUnsupported { stream });
        }
        let entry = &entry.with_resolved_replication()?;

        writer.write(&Message::schema(entry))?;

        let replication_key = entry.replication_key.as_deref();
        let mut columns = entry.selected_columns();
        if let Some(key) = replication_key
            && !columns.iter().any(|c| c == key)
        {
            columns.push(key.to_string());
        }

        let bookmark = self.initial_bookmark(entry, state);
        let query = self.planner.plan(
            entry,
            &columns,
            replication_key,
            bookmark.as_ref(),
            self.options.abort_threshold,
        )?;
        tracing::info!(
            "Syncing {} ({:?}) from bookmark {}",
            stream,
            entry.replication_method,
            query
                .filter
                .as_ref()
                .map_or_else(|| "none".to_string(), |f| f.value.to_string())
        );

        let start_bookmark = query.filter.as_ref().map(|f| f.value.clone());
        let mut tracker = RowTracker::new(entry, self.options.abort_threshold, start_bookmark);
        let mut batches: usize = 0;

        {
            let rows = executor.execute(&query).await?;
            match &self.batch_writer {
                None => {
                    let mut rows = rows;
                    while let Some(row) = rows.next().await {
                        match tracker.admit(row) {
                            Some(record) => {
                                writer.write(&Message::record(&stream, record?, Utc::now()))?;
                            }
                            None => break,
                        }
                    }
                }
                Some(batch_writer) => {
                    let records = rows.scan(&mut tracker, |tracker, row| {
                        futures::future::ready(tracker.admit(row))
                    });
                    let naming = BatchNaming::new(&self.options.tap_name, &stream);
                    let mut manifests = batch_writer.write_batches(records, naming);
                    while let Some(manifest) = manifests.next().await {
                        writer.write(&Message::batch(&stream, &manifest?))?;
                        batches = batches.saturating_add(1);
                    }
                }
            }
        }

        if let (Some(key), Some(value)) = (replication_key, &tracker.bookmark) {
            state.set_bookmark(&stream, key, value.clone());
        }
        writer.write(&Message::state(state))?;

        if tracker.exceeded {
            let threshold = tracker.threshold.unwrap_or(tracker.rows);
            tracing::warn!(
                "Stream {} has more than {} rows; stopped at bookmark {}",
                stream,
                threshold,
                tracker
                    .bookmark
                    .as_ref()
                    .map_or_else(|| "none".to_string(), ToString::to_string)
            );
            return Err(TapError::AbortThresholdExceeded { stream, threshold });
        }

        tracing::info!("Synced {} rows from {}", tracker.rows, stream);
        Ok(StreamSummary {
            stream,
            rows: tracker.rows,
            batches,
            bookmark: tracker.bookmark,
        })
    }

    /// Syncs every selected stream of the catalog in order.
    ///
    /// Stops at the first failing stream.
    pub async fn sync_all<E, W>(
        &self,
        executor: &mut E,
        catalog: &Catalog,
        state: &mut TapState,
        writer: &mut MessageWriter<W>,
    ) -> Result<Vec<StreamSummary>>
    where
        E: QueryExecutor + ?Sized,
        W: Write,
    {
        let mut summaries = Vec::new();
        for entry in catalog.selected_streams() {
            summaries.push(self.sync_stream(executor, entry, state, None, writer).await?);
        }
        if summaries.is_empty() {
            tracing::warn!("No streams selected in catalog");
        }
        Ok(summaries)
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
            ColumnDescriptor::new("updated_at", "datetime2", true),
        ];
        CatalogBuilder::new(TypeMappingPolicy::Basic)
            .build_entry(&TableRef::table("dbo", "events"), &columns, &[])
            .unwrap()
    }

    #[test]
    fn test_tracker_threshold_and_bookmark() {
        let entry = entry().with_replication_key("id").unwrap();
        let mut tracker = RowTracker::new(&entry, Some(2), None);

        for id in [3, 5] {
            let record = tracker.admit(Ok(RawRow::new().with("id", NativeValue::Int(id))));
            assert!(matches!(record, Some(Ok(_))));
        }
        assert!(tracker.admit(Ok(RawRow::new().with("id", NativeValue::Int(9)))).is_none());
        assert!(tracker.exceeded);
        assert_eq!(tracker.rows, 2);
        assert_eq!(tracker.bookmark, Some(BookmarkValue::Integer(5)));
    }

    #[test]
    fn test_tracker_passes_errors_through() {
        let entry = entry();
        let mut tracker = RowTracker::new(&entry, None, None);
        let result = tracker.admit(Err(TapError::query_failed("fetch failed")));
        assert!(matches!(result, Some(Err(_))));
        assert_eq!(tracker.rows, 0);
    }

    #[test]
    fn test_initial_bookmark_from_start_date() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap();
        let sync = StreamSync::new(SyncOptions::default().with_start_date(start)).unwrap();

        let temporal = entry().with_replication_key("updated_at").unwrap();
        assert_eq!(
            sync.initial_bookmark(&temporal, &TapState::default()),
            Some(BookmarkValue::Timestamp(start))
        );

        // start_date only applies to temporal keys
        let numeric = entry().with_replication_key("id").unwrap();
        assert_eq!(sync.initial_bookmark(&numeric, &TapState::default()), None);

        // state wins over start_date
        let mut state = TapState::default();
        state.set_bookmark("dbo-events", "updated_at", BookmarkValue::String("2024-06-01T00:00:00Z".into()));
        assert_eq!(
            sync.initial_bookmark(&temporal, &state),
            Some(BookmarkValue::String("2024-06-01T00:00:00Z".into()))
        );

        // a bookmark for another key is ignored
        let mut state = TapState::default();
        state.set_bookmark("dbo-events", "id", BookmarkValue::Integer(4));
        assert_eq!(
            sync.initial_bookmark(&temporal, &state),
            Some(BookmarkValue::Timestamp(start))
        );
    }
}
