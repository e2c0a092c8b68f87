//! Singer message stream.
//!
//! Every message is one JSON object on its own line, tagged by `type`.

use crate::{
    batch::{BatchEncoding, BatchManifest},
    catalog::{CatalogEntry, StreamSchema},
    error::TapError,
    models::Record,
    state::TapState,
    Result,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

/// A message of the Singer protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Announces a stream and its record schema
    Schema {
        stream: String,
        schema: StreamSchema,
        key_properties: Vec<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        bookmark_properties: Vec<String>,
    },
    /// One encoded row
    Record {
        stream: String,
        record: Record,
        #[serde(skip_serializing_if = "Option::is_none")]
        time_extracted: Option<DateTime<Utc>>,
    },
    /// Bookmarks to resume from
    State {
        value: TapState,
    },
    /// Files holding a chunk of records
    Batch {
        stream: String,
        encoding: BatchEncoding,
        manifest: Vec<String>,
    },
}

impl Message {
    /// SCHEMA message announcing a stream.
    pub fn schema(entry: &CatalogEntry) -> Self {
        Self::Schema {
            stream: entry.tap_stream_id.clone(),
            schema: entry.schema.clone(),
            key_properties: entry.key_properties.clone(),
            bookmark_properties: entry.replication_key.iter().cloned().collect(),
        }
    }

    /// RECORD message stamped with the extraction time.
    pub fn record(stream: impl Into<String>, record: Record, time_extracted: DateTime<Utc>) -> Self {
        Self::Record {
            stream: stream.into(),
            record,
            time_extracted: Some(time_extracted),
        }
    }

    /// STATE message carrying a snapshot of the bookmarks.
    pub fn state(state: &TapState) -> Self {
        Self::State {
            value: state.clone(),
        }
    }

    /// BATCH message for one written manifest.
    pub fn batch(stream: impl Into<String>, manifest: &BatchManifest) -> Self {
        Self::Batch {
            stream: stream.into(),
            encoding: manifest.encoding,
            manifest: manifest.files.clone(),
        }
    }
}

/// Writes messages as JSON lines, flushing after each one.
#[derive(Debug)]
pub struct MessageWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> MessageWriter<W> {
    /// Wraps a writer; nothing is written until [`write`](Self::write).
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Serializes one message, terminates it with `\n` and flushes.
    ///
    /// # Errors
    /// Serialization or I/O failure of the underlying writer.
    pub fn write(&mut self, message: &Message) -> Result<()> {
        serde_json::to_writer(&mut self.inner, message)
            .map_err(|e| TapError::serialization("writing message", e))?;
        self.inner
            .write_all(b"\n")
            .and_then(|()| self.inner.flush())
            .map_err(|e| TapError::io("writing message", e))?;
        self.written = self.written.saturating_add(1);
        Ok(())
    }

    /// Number of messages written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::batch::BatchCompression;
    use crate::models::BookmarkValue;
    use serde_json::{json, Value};

    fn lines(buffer: &[u8]) -> Vec<Value> {
        std::str::from_utf8(buffer)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_record_and_state_lines() {
        let mut writer = MessageWriter::new(Vec::new());

        let mut record = Record::new();
        record.insert("id".to_string(), json!(1));
        let extracted = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        writer.write(&Message::record("dbo-users", record, extracted)).unwrap();

        let mut state = TapState::default();
        state.set_bookmark("dbo-users", "id", BookmarkValue::Integer(1));
        writer.write(&Message::state(&state)).unwrap();
        assert_eq!(writer.written(), 2);

        let buffer = writer.into_inner();
        assert!(buffer.ends_with(b"\n"));

        let messages = lines(&buffer);
        assert_eq!(messages[0]["type"], "RECORD");
        assert_eq!(messages[0]["stream"], "dbo-users");
        assert_eq!(messages[0]["record"], json!({"id": 1}));
        assert_eq!(messages[0]["time_extracted"], "2024-01-01T00:00:00Z");
        assert_eq!(
            messages[1],
            json!({
                "type": "STATE",
                "value": {"bookmarks": {"dbo-users": {"replication_key": "id", "replication_key_value": 1}}}
            })
        );
    }

    #[test]
    fn test_batch_line() {
        let manifest = BatchManifest {
            encoding: BatchEncoding::jsonl(BatchCompression::Gzip),
            files: vec!["file:///tmp/a.json.gz".to_string()],
        };
        let mut writer = MessageWriter::new(Vec::new());
        writer.write(&Message::batch("dbo-users", &manifest)).unwrap();

        let messages = lines(&writer.into_inner());
        assert_eq!(
            messages[0],
            json!({
                "type": "BATCH",
                "stream": "dbo-users",
                "encoding": {"format": "jsonl", "compression": "gzip"},
                "manifest": ["file:///tmp/a.json.gz"]
            })
        );
    }
}
