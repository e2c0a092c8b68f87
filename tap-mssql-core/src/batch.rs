//! Batch file output.
//!
//! Instead of one RECORD message per row, batch mode groups records into
//! chunks of `batch_size`, writes each chunk as a compressed JSON Lines file
//! and reports the files in a [`BatchManifest`]. Chunks are written as the
//! record stream is pulled, so at most one chunk is held in memory.
//!
//! File names follow `{prefix}{tap}--{stream}-{uuid}-{index}.json.gz`, with
//! the index starting at 1.

use crate::{config::BatchConfig, error::TapError, models::Record, Result};
use async_trait::async_trait;
use flate2::{write::GzEncoder, Compression};
use futures::{stream::BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Record layout inside a batch file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchFormat {
    /// One JSON object per line
    #[default]
    Jsonl,
}

/// Compression applied to a batch file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchCompression {
    /// gzip, readable everywhere
    #[default]
    Gzip,
    /// zstd, behind the `compression` feature
    Zstd,
}

impl BatchCompression {
    /// File extension including the format, e.g. `.json.gz`.
    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Gzip => ".json.gz",
            Self::Zstd => ".json.zst",
        }
    }

    /// Whether this build can produce the compression.
    pub fn is_available(self) -> bool {
        match self {
            Self::Gzip => true,
            Self::Zstd => cfg!(feature = "compression"),
        }
    }

    /// Compresses a complete file body.
    ///
    /// # Errors
    /// Compressor failure, or zstd without the `compression` feature.
    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(data)
                    .map_err(|e| TapError::io("gzip compression", e))?;
                encoder.finish().map_err(|e| TapError::io("gzip compression", e))
            }
            #[cfg(feature = "compression")]
            Self::Zstd => {
                zstd::bulk::compress(data, 3).map_err(|e| TapError::io("zstd compression", e))
            }
            #[cfg(not(feature = "compression"))]
            Self::Zstd => Err(TapError::configuration(
                "zstd compression requires the 'compression' feature",
            )),
        }
    }
}

impl std::fmt::Display for BatchCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gzip => write!(f, "gzip"),
            Self::Zstd => write!(f, "zstd"),
        }
    }
}

/// Format and compression of batch files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchEncoding {
    /// Record layout
    #[serde(default)]
    pub format: BatchFormat,
    /// Compression of each file
    #[serde(default)]
    pub compression: BatchCompression,
}

impl BatchEncoding {
    /// JSONL with the given compression.
    pub fn jsonl(compression: BatchCompression) -> Self {
        Self {
            format: BatchFormat::Jsonl,
            compression,
        }
    }
}

/// Files written for one chunk, with their encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchManifest {
    /// Encoding shared by every file
    pub encoding: BatchEncoding,
    /// File URLs, in write order
    pub files: Vec<String>,
}

/// Destination for batch files.
#[async_trait]
pub trait BatchStorage: Send + Sync {
    /// Writes `bytes` to `location`, relative to the storage root.
    async fn put(&self, location: &str, bytes: Vec<u8>) -> Result<()>;

    /// Retrievable URL of a written location.
    fn url(&self, location: &str) -> Result<String>;
}

/// Batch storage on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Uses `root` as the directory files are written under.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves a storage root such as `file:///var/batches`,
    /// `file://relative/dir` or a plain path.
    ///
    /// # Errors
    /// Roots with a scheme other than `file`.
    pub fn from_root(root: &str) -> Result<Self> {
        if let Some(path) = root.strip_prefix("file://") {
            return Ok(Self::new(path));
        }
        if let Ok(parsed) = url::Url::parse(root) {
            // single-letter schemes are Windows drive letters
            if parsed.scheme().len() > 1 {
                return Err(TapError::configuration(format!(
                    "Unsupported batch storage scheme '{}'",
                    parsed.scheme()
                )));
            }
        }
        Ok(Self::new(root))
    }

    /// Directory files are written to.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, location: &str) -> PathBuf {
        self.root.join(location)
    }
}

#[async_trait]
impl BatchStorage for LocalStorage {
    async fn put(&self, location: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(location);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TapError::io(format!("creating {}", parent.display()), e))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| TapError::io(format!("writing {}", path.display()), e))
    }

    fn url(&self, location: &str) -> Result<String> {
        let path = self.path_for(location);
        let absolute = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()
                .map_err(|e| TapError::io("resolving working directory", e))?
                .join(path)
        };
        url::Url::from_file_path(&absolute)
            .map(|u| u.to_string())
            .map_err(|()| {
                TapError::configuration(format!("Cannot build a URL for {}", absolute.display()))
            })
    }
}

/// Identifies the files of one batch sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchNaming {
    sync_id: String,
}

impl BatchNaming {
    /// Names files `{tap_name}--{stream}-{uuid}`, with a fresh uuid.
    pub fn new(tap_name: &str, stream: &str) -> Self {
        Self {
            sync_id: format!("{}--{}-{}", tap_name, stream, uuid::Uuid::new_v4()),
        }
    }

    /// Stem shared by every file of the sync.
    pub fn sync_id(&self) -> &str {
        &self.sync_id
    }

    fn file_name(&self, prefix: &str, index: usize, compression: BatchCompression) -> String {
        format!("{}{}-{}{}", prefix, self.sync_id, index, compression.file_extension())
    }
}

/// Serializes records as JSON Lines.
fn encode_jsonl(records: &[Record]) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buffer, record)
            .map_err(|e| TapError::serialization("encoding batch record", e))?;
        buffer.push(b'\n');
    }
    Ok(buffer)
}

type RecordStream<'a> = BoxStream<'a, Result<Record>>;

/// Pulls up to `batch_size` records; an empty chunk means the stream ended.
async fn next_chunk(records: &mut RecordStream<'_>, batch_size: usize) -> Result<Vec<Record>> {
    let mut chunk = Vec::with_capacity(batch_size);
    while chunk.len() < batch_size {
        match records.next().await {
            Some(record) => chunk.push(record?),
            None => break,
        }
    }
    Ok(chunk)
}

/// Everything needed to write one chunk.
#[derive(Clone)]
struct ChunkSink {
    storage: Arc<dyn BatchStorage>,
    naming: BatchNaming,
    prefix: String,
    encoding: BatchEncoding,
    batch_size: usize,
}

impl ChunkSink {
    async fn write(&self, index: usize, chunk: &[Record]) -> Result<BatchManifest> {
        let location = self.naming.file_name(&self.prefix, index, self.encoding.compression);
        let body = self.encoding.compression.compress(&encode_jsonl(chunk)?)?;
        self.storage.put(&location, body).await?;
        let url = self.storage.url(&location)?;
        tracing::info!("Wrote batch {} with {} records to {}", index, chunk.len(), url);

        Ok(BatchManifest {
            encoding: self.encoding,
            files: vec![url],
        })
    }

    /// Writes the next chunk, handing the stream back for the one after.
    async fn advance<'a>(
        self,
        mut records: RecordStream<'a>,
        index: usize,
    ) -> Result<Option<(BatchManifest, (RecordStream<'a>, usize))>> {
        let chunk = next_chunk(&mut records, self.batch_size).await?;
        if chunk.is_empty() {
            return Ok(None);
        }
        let manifest = self.write(index, &chunk).await?;
        Ok(Some((manifest, (records, index.saturating_add(1)))))
    }
}

/// Writes record streams as compressed batch files.
#[derive(Clone)]
pub struct BatchWriter {
    storage: Arc<dyn BatchStorage>,
    config: BatchConfig,
}

impl std::fmt::Debug for BatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWriter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BatchWriter {
    /// Creates a writer over any storage.
    pub fn new(storage: Arc<dyn BatchStorage>, config: BatchConfig) -> Self {
        Self { storage, config }
    }

    /// Creates a writer over local storage resolved from the config root.
    pub fn local(config: BatchConfig) -> Result<Self> {
        let storage = LocalStorage::from_root(&config.storage.root)?;
        Ok(Self::new(Arc::new(storage), config))
    }

    /// Batch settings in effect.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Lazily chunks `records` and writes one file per chunk.
    ///
    /// Each item of the returned stream is the manifest of one written
    /// file. The stream ends after the first error, whether it comes from
    /// the record stream or from writing.
    pub fn write_batches<'a, S>(
        &self,
        records: S,
        naming: BatchNaming,
    ) -> BoxStream<'a, Result<BatchManifest>>
    where
        S: Stream<Item = Result<Record>> + Send + 'a,
    {
        let sink = ChunkSink {
            storage: Arc::clone(&self.storage),
            naming,
            prefix: self.config.prefix().to_string(),
            encoding: self.config.encoding,
            batch_size: self.config.batch_size.max(1),
        };

        futures::stream::try_unfold((records.boxed(), 1_usize), move |(records, index)| {
            sink.clone().advance(records, index)
        })
        .boxed()
    }
}
