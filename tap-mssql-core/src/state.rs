//! Replication state.
//!
//! State is read once at the start of a sync, advanced in memory as rows
//! are emitted and handed back through STATE messages. Persisting it is the
//! caller's job.

use crate::{error::TapError, models::BookmarkValue, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bookmark of one stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamBookmark {
    /// Column the bookmark belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key: Option<String>,
    /// Highest value emitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication_key_value: Option<BookmarkValue>,
}

/// Bookmarks of all streams, keyed by stream id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TapState {
    /// Bookmarks by stream id
    #[serde(default)]
    pub bookmarks: BTreeMap<String, StreamBookmark>,
}

impl TapState {
    /// Parses state JSON; an empty document yields empty state.
    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json).map_err(|e| TapError::serialization("parsing state", e))
    }

    /// Last-seen replication key value of a stream.
    pub fn bookmark(&self, stream: &str) -> Option<&BookmarkValue> {
        self.bookmarks
            .get(stream)
            .and_then(|b| b.replication_key_value.as_ref())
    }

    /// Replication key the stream's bookmark was recorded for.
    pub fn replication_key(&self, stream: &str) -> Option<&str> {
        self.bookmarks
            .get(stream)
            .and_then(|b| b.replication_key.as_deref())
    }

    /// Records the last-seen value of a stream's replication key.
    pub fn set_bookmark(&mut self, stream: &str, replication_key: &str, value: BookmarkValue) {
        self.bookmarks.insert(
            stream.to_string(),
            StreamBookmark {
                replication_key: Some(replication_key.to_string()),
                replication_key_value: Some(value),
            },
        );
    }
}
