//! Shared types for bferry
//!
//! This crate contains the data structures shared between the transfer
//! core and the CLI: object handles and metadata, pass-through option bags,
//! per-operation configuration, settings and transfer events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default number of transfers allowed in flight at once
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 2;

/// Default chunk size for large-object downloads (10 MiB)
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Objects smaller than this are always fetched in a single request (256 MiB)
pub const LARGE_OBJECT_THRESHOLD: u64 = 256 * 1024 * 1024;

// ============================================================================
// Object Types
// ============================================================================

/// Reference to a remote object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectHandle {
    pub bucket: String,
    pub name: String,
    /// Pin a specific generation; `None` addresses the live object
    #[serde(default)]
    pub generation: Option<i64>,
}

impl ObjectHandle {
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
            generation: None,
        }
    }

    pub fn with_generation(mut self, generation: i64) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Last `/`-separated segment of the object name
    pub fn base_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.name)
    }
}

/// Server-side description of an object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub bucket: String,
    pub name: String,
    pub size: u64,
    pub generation: i64,
    pub metageneration: i64,
    pub content_type: Option<String>,
    pub md5_hash: Option<String>,
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ObjectMetadata {
    /// Handle addressing exactly this generation
    pub fn handle(&self) -> ObjectHandle {
        ObjectHandle::new(self.bucket.clone(), self.name.clone()).with_generation(self.generation)
    }
}

/// Conditional-request constraints attached to a write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preconditions {
    /// `Some(0)` means "only if no live generation exists"
    pub if_generation_match: Option<i64>,
    pub if_generation_not_match: Option<i64>,
    pub if_metageneration_match: Option<i64>,
    pub if_metageneration_not_match: Option<i64>,
}

impl Preconditions {
    pub fn is_empty(&self) -> bool {
        self.if_generation_match.is_none()
            && self.if_generation_not_match.is_none()
            && self.if_metageneration_match.is_none()
            && self.if_metageneration_not_match.is_none()
    }
}

/// Inclusive byte range within an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered by this range
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl std::fmt::Display for ByteRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

// ============================================================================
// Pass-through Options
// ============================================================================

/// Options forwarded to a single upload call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadOptions {
    /// Destination object name (defaults to the source file name)
    pub destination: Option<String>,
    pub content_type: Option<String>,
    pub preconditions: Option<Preconditions>,
    /// Custom object metadata
    pub metadata: BTreeMap<String, String>,
}

/// Options forwarded to a single download call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    /// Local file to write the content to; contents are always returned as well
    pub destination: Option<PathBuf>,
    pub range: Option<ByteRange>,
}

// ============================================================================
// Operation Configuration
// ============================================================================

fn default_concurrency_limit() -> usize {
    DEFAULT_CONCURRENCY_LIMIT
}

fn default_chunk_size_bytes() -> u64 {
    DEFAULT_CHUNK_SIZE_BYTES
}

/// Configuration for uploading many files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadManyOptions {
    pub concurrency_limit: usize,
    /// Prepended to each source file's base name
    pub prefix: Option<String>,
    /// Upload only if the destination has no live generation
    pub skip_if_exists: bool,
    pub pass_through: UploadOptions,
    pub timeout_secs: Option<u64>,
}

impl Default for UploadManyOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            prefix: None,
            skip_if_exists: false,
            pass_through: UploadOptions::default(),
            timeout_secs: None,
        }
    }
}

/// Configuration for downloading many objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadManyOptions {
    pub concurrency_limit: usize,
    /// Local directory the object names are joined onto
    pub prefix: Option<PathBuf>,
    /// Literal text removed from the start of each object name
    pub strip_prefix: Option<String>,
    pub pass_through: DownloadOptions,
    pub timeout_secs: Option<u64>,
}

impl Default for DownloadManyOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            prefix: None,
            strip_prefix: None,
            pass_through: DownloadOptions::default(),
            timeout_secs: None,
        }
    }
}

/// Configuration for a chunked large-object download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadLargeOptions {
    pub concurrency_limit: usize,
    pub chunk_size_bytes: u64,
    /// Directory the output file is created in (current directory if unset)
    pub destination_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

impl Default for DownloadLargeOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            destination_dir: None,
            timeout_secs: None,
        }
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// Which backend the CLI talks to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreSettings {
    /// A local directory acting as a bucket
    Fs { bucket: String, root: PathBuf },
    /// A JSON-API compatible storage endpoint
    Http {
        endpoint: String,
        bucket: String,
        #[serde(default)]
        token: Option<String>,
    },
}

impl Default for StoreSettings {
    fn default() -> Self {
        let root = dirs::data_local_dir()
            .map(|d| d.join("bferry").join("buckets").join("default"))
            .unwrap_or_else(|| PathBuf::from(".bferry/default"));
        StoreSettings::Fs {
            bucket: "default".to_string(),
            root,
        }
    }
}

/// Application settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: u64,
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// Per-call deadline applied to every transfer (seconds)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .map(|p| p.join("bferry"))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            download_dir: default_download_dir(),
            timeout_secs: None,
        }
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Which orchestration operation an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    UploadMany,
    DownloadMany,
    DownloadLarge,
}

impl std::fmt::Display for TransferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransferKind::UploadMany => "upload_many",
            TransferKind::DownloadMany => "download_many",
            TransferKind::DownloadLarge => "download_large",
        };
        f.write_str(s)
    }
}

/// Events emitted by the transfer manager while an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TransferEvent {
    OperationStarted {
        kind: TransferKind,
        items: usize,
        /// Total bytes, when known up front (large downloads only)
        total_bytes: Option<u64>,
    },
    ItemStarted {
        kind: TransferKind,
        index: usize,
        name: String,
    },
    ItemCompleted {
        kind: TransferKind,
        index: usize,
        bytes: u64,
    },
    ItemFailed {
        kind: TransferKind,
        index: usize,
        error: String,
    },
    ChunkWritten {
        index: usize,
        start: u64,
        end: u64,
    },
    OperationFinished {
        kind: TransferKind,
        succeeded: usize,
        failed: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_name() {
        assert_eq!(ObjectHandle::new("b", "x/y/report.csv").base_name(), "report.csv");
        assert_eq!(ObjectHandle::new("b", "flat.bin").base_name(), "flat.bin");
        assert_eq!(ObjectHandle::new("b", "dir/").base_name(), "");
    }

    #[test]
    fn test_byte_range_size_is_inclusive() {
        assert_eq!(ByteRange::new(0, 0).size(), 1);
        assert_eq!(ByteRange::new(100, 199).size(), 100);
        assert_eq!(ByteRange::new(5, 9).to_string(), "bytes=5-9");
    }

    #[test]
    fn test_preconditions_is_empty() {
        assert!(Preconditions::default().is_empty());
        let create_only = Preconditions {
            if_generation_match: Some(0),
            ..Default::default()
        };
        assert!(!create_only.is_empty());
    }

    #[test]
    fn test_options_defaults() {
        let upload = UploadManyOptions::default();
        assert_eq!(upload.concurrency_limit, 2);
        assert!(!upload.skip_if_exists);

        let large: DownloadLargeOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(large.concurrency_limit, 2);
        assert_eq!(large.chunk_size_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_settings_roundtrip_with_partial_file() {
        let json = r#"{"store":{"kind":"http","endpoint":"http://localhost:4443","bucket":"media"},"concurrency_limit":8}"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.concurrency_limit, 8);
        assert_eq!(settings.chunk_size_bytes, DEFAULT_CHUNK_SIZE_BYTES);
        assert_eq!(
            settings.store,
            StoreSettings::Http {
                endpoint: "http://localhost:4443".to_string(),
                bucket: "media".to_string(),
                token: None,
            }
        );
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = TransferEvent::ChunkWritten {
            index: 1,
            start: 10,
            end: 19,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "ChunkWritten");
        assert_eq!(value["payload"]["start"], 10);
    }
}
