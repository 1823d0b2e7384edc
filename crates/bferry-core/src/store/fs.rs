//! Directory-backed object store
//!
//! Treats a local directory as a bucket. Object names map to relative paths
//! under the root; the generation of an object is its modification time in
//! microseconds. Content type and custom metadata are not persisted.
//!
//! Generations are only as fine as the filesystem's timestamps. Two writes
//! of the same object within one timestamp tick share a generation, so
//! generation preconditions cannot tell them apart on coarse-mtime
//! filesystems.

use super::{default_object_name, write_destination, ObjectStore};
use crate::error::TransferError;
use async_trait::async_trait;
use bferry_types::{DownloadOptions, ObjectHandle, ObjectMetadata, Preconditions, UploadOptions};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tracing::debug;
use uuid::Uuid;

/// Object store rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsStore {
    bucket: String,
    root: PathBuf,
    /// Serializes precondition checks with the commit that follows them
    commit_lock: Arc<Mutex<()>>,
}

impl FsStore {
    /// Create a store, creating the root directory if needed
    pub async fn new(
        bucket: impl Into<String>,
        root: impl Into<PathBuf>,
    ) -> Result<Self, TransferError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        Ok(Self {
            bucket: bucket.into(),
            root,
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an object name to its path, rejecting names that escape the root
    fn object_path(&self, name: &str) -> Result<PathBuf, TransferError> {
        if name.is_empty() || name.ends_with('/') {
            return Err(TransferError::InvalidPath(name.to_string()));
        }
        let relative = Path::new(name);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(TransferError::InvalidPath(name.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn describe(&self, name: &str, meta: &std::fs::Metadata) -> ObjectMetadata {
        let modified = meta.modified().ok();
        let generation = modified
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_micros() as i64)
            .unwrap_or(1);

        ObjectMetadata {
            bucket: self.bucket.clone(),
            name: name.to_string(),
            size: meta.len(),
            generation,
            metageneration: 1,
            content_type: None,
            md5_hash: None,
            updated: modified.map(DateTime::<Utc>::from),
            metadata: Default::default(),
        }
    }

    /// Look up an object, honouring a pinned generation
    async fn stat(
        &self,
        object: &ObjectHandle,
    ) -> Result<(PathBuf, ObjectMetadata), TransferError> {
        if object.bucket != self.bucket {
            return Err(TransferError::InvalidConfig(format!(
                "{} is not in bucket {}",
                object, self.bucket
            )));
        }
        let path = self.object_path(&object.name)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(TransferError::NotFound(object.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(TransferError::NotFound(object.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let described = self.describe(&object.name, &meta);
        if let Some(generation) = object.generation {
            if generation != described.generation {
                return Err(TransferError::NotFound(format!(
                    "{}#{}",
                    object, generation
                )));
            }
        }
        Ok((path, described))
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn upload(
        &self,
        local_path: &Path,
        options: UploadOptions,
    ) -> Result<(ObjectHandle, ObjectMetadata), TransferError> {
        let name = match options.destination {
            Some(ref destination) => destination.clone(),
            None => default_object_name(local_path)?,
        };
        let target = self.object_path(&name)?;
        let source = local_path.to_path_buf();
        let preconditions = options.preconditions.unwrap_or_default();
        let store = self.clone();
        let object_name = name.clone();

        debug!("Uploading {:?} to {}/{}", source, self.bucket, name);

        let meta = tokio::task::spawn_blocking(move || {
            commit_upload(&store, &object_name, &source, &target, &preconditions)
        })
        .await
        .map_err(|e| TransferError::TaskFailed(e.to_string()))??;

        Ok((meta.handle(), meta))
    }

    async fn download(
        &self,
        object: &ObjectHandle,
        options: DownloadOptions,
    ) -> Result<Vec<u8>, TransferError> {
        let (path, meta) = self.stat(object).await?;

        let contents = match options.range {
            Some(range) => {
                if range.end < range.start || range.start >= meta.size {
                    return Err(TransferError::InvalidRange {
                        start: range.start,
                        end: range.end,
                        size: meta.size,
                    });
                }
                let end = range.end.min(meta.size - 1);
                let len = (end - range.start + 1) as usize;
                let start = range.start;
                tokio::task::spawn_blocking(move || -> Result<Vec<u8>, TransferError> {
                    let mut file = File::open(&path)?;
                    file.seek(SeekFrom::Start(start))?;
                    let mut buf = vec![0u8; len];
                    file.read_exact(&mut buf)?;
                    Ok(buf)
                })
                .await
                .map_err(|e| TransferError::TaskFailed(e.to_string()))??
            }
            None => tokio::fs::read(&path).await?,
        };

        if let Some(destination) = options.destination {
            write_destination(&destination, &contents).await?;
        }

        Ok(contents)
    }

    async fn get_metadata(&self, object: &ObjectHandle) -> Result<ObjectMetadata, TransferError> {
        self.stat(object).await.map(|(_, meta)| meta)
    }
}

/// Current (generation, metageneration) of the object at `target`, if any
fn current_state(
    store: &FsStore,
    name: &str,
    target: &Path,
) -> Result<Option<(i64, i64)>, TransferError> {
    match std::fs::metadata(target) {
        Ok(meta) => {
            let described = store.describe(name, &meta);
            Ok(Some((described.generation, described.metageneration)))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn check_preconditions(
    name: &str,
    current: Option<(i64, i64)>,
    preconditions: &Preconditions,
) -> Result<(), TransferError> {
    let generation = current.map(|(g, _)| g);
    let metageneration = current.map(|(_, m)| m);

    if let Some(expected) = preconditions.if_generation_match {
        if generation.unwrap_or(0) != expected {
            return Err(TransferError::PreconditionFailed(format!(
                "{}: ifGenerationMatch={} but generation is {}",
                name,
                expected,
                generation.unwrap_or(0)
            )));
        }
    }
    if let Some(rejected) = preconditions.if_generation_not_match {
        if generation.unwrap_or(0) == rejected {
            return Err(TransferError::PreconditionFailed(format!(
                "{}: ifGenerationNotMatch={}",
                name, rejected
            )));
        }
    }
    if let Some(expected) = preconditions.if_metageneration_match {
        if metageneration != Some(expected) {
            return Err(TransferError::PreconditionFailed(format!(
                "{}: ifMetagenerationMatch={}",
                name, expected
            )));
        }
    }
    if let Some(rejected) = preconditions.if_metageneration_not_match {
        if metageneration == Some(rejected) {
            return Err(TransferError::PreconditionFailed(format!(
                "{}: ifMetagenerationNotMatch={}",
                name, rejected
            )));
        }
    }
    Ok(())
}

fn stage_file(source: &Path, temp: &Path) -> std::io::Result<()> {
    let mut input = File::open(source)?;
    let mut output = File::create(temp)?;
    std::io::copy(&mut input, &mut output)?;
    output.sync_all()
}

/// Move a fully staged file under its object name.
///
/// A create-only commit links instead of renaming, so an object that
/// appeared since the precondition check is never replaced.
fn publish(name: &str, temp: &Path, target: &Path, create_only: bool) -> Result<(), TransferError> {
    if !create_only {
        return std::fs::rename(temp, target).map_err(Into::into);
    }
    match std::fs::hard_link(temp, target) {
        Ok(()) => {
            let _ = std::fs::remove_file(temp);
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(TransferError::PreconditionFailed(
            format!("{}: object already exists", name),
        )),
        Err(e) => Err(e.into()),
    }
}

fn commit_upload(
    store: &FsStore,
    name: &str,
    source: &Path,
    target: &Path,
    preconditions: &Preconditions,
) -> Result<ObjectMetadata, TransferError> {
    let parent = target
        .parent()
        .ok_or_else(|| TransferError::InvalidPath(name.to_string()))?;
    std::fs::create_dir_all(parent)?;

    // Content is staged without the lock; only the check and the publish hold it
    let temp = parent.join(format!(".bferry-{}.tmp", Uuid::new_v4()));
    if let Err(e) = stage_file(source, &temp) {
        let _ = std::fs::remove_file(&temp);
        return Err(e.into());
    }

    let committed = {
        let _guard = store.commit_lock.lock();
        current_state(store, name, target)
            .and_then(|current| check_preconditions(name, current, preconditions))
            .and_then(|_| {
                publish(
                    name,
                    &temp,
                    target,
                    preconditions.if_generation_match == Some(0),
                )
            })
    };
    if let Err(e) = committed {
        let _ = std::fs::remove_file(&temp);
        return Err(e);
    }

    let meta = std::fs::metadata(target)?;
    Ok(store.describe(name, &meta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bferry_types::ByteRange;
    use tempfile::TempDir;

    async fn store_with_source(contents: &[u8]) -> (TempDir, FsStore, PathBuf) {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new("local", dir.path().join("bucket")).await.unwrap();
        let source = dir.path().join("source.bin");
        std::fs::write(&source, contents).unwrap();
        (dir, store, source)
    }

    #[tokio::test]
    async fn test_upload_uses_file_name_by_default() {
        let (_dir, store, source) = store_with_source(b"hello").await;

        let (handle, meta) = store.upload(&source, UploadOptions::default()).await.unwrap();
        assert_eq!(handle.name, "source.bin");
        assert_eq!(handle.bucket, "local");
        assert_eq!(handle.generation, Some(meta.generation));
        assert_eq!(meta.size, 5);
        assert_eq!(std::fs::read(store.root().join("source.bin")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_upload_to_nested_destination() {
        let (_dir, store, source) = store_with_source(b"nested").await;
        let options = UploadOptions {
            destination: Some("a/b/c.txt".to_string()),
            ..Default::default()
        };

        let (handle, _) = store.upload(&source, options).await.unwrap();
        assert_eq!(handle.name, "a/b/c.txt");
        assert_eq!(std::fs::read(store.root().join("a/b/c.txt")).unwrap(), b"nested");
    }

    #[tokio::test]
    async fn test_generation_zero_rejects_existing_object() {
        let (_dir, store, source) = store_with_source(b"v1").await;
        let options = UploadOptions {
            preconditions: Some(Preconditions {
                if_generation_match: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };

        store.upload(&source, options.clone()).await.unwrap();
        std::fs::write(&source, b"v2").unwrap();
        let err = store.upload(&source, options).await.unwrap_err();

        assert!(matches!(err, TransferError::PreconditionFailed(_)));
        assert_eq!(std::fs::read(store.root().join("source.bin")).unwrap(), b"v1");
    }

    #[tokio::test]
    async fn test_overwrite_without_preconditions() {
        let (_dir, store, source) = store_with_source(b"v1").await;
        store.upload(&source, UploadOptions::default()).await.unwrap();
        std::fs::write(&source, b"version two").unwrap();

        let (_, meta) = store.upload(&source, UploadOptions::default()).await.unwrap();
        assert_eq!(meta.size, 11);
        let leftovers: Vec<_> = std::fs::read_dir(store.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_metageneration_match_on_missing_object_fails() {
        let (_dir, store, source) = store_with_source(b"x").await;
        let options = UploadOptions {
            preconditions: Some(Preconditions {
                if_metageneration_match: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = store.upload(&source, options).await.unwrap_err();
        assert!(matches!(err, TransferError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn test_range_download_clamps_end() {
        let (_dir, store, source) = store_with_source(b"0123456789").await;
        let (handle, _) = store.upload(&source, UploadOptions::default()).await.unwrap();

        let options = DownloadOptions {
            range: Some(ByteRange::new(6, 100)),
            ..Default::default()
        };
        let bytes = store.download(&handle, options).await.unwrap();
        assert_eq!(bytes, b"6789");
    }

    #[tokio::test]
    async fn test_range_past_end_is_rejected() {
        let (_dir, store, source) = store_with_source(b"abc").await;
        let (handle, _) = store.upload(&source, UploadOptions::default()).await.unwrap();

        let options = DownloadOptions {
            range: Some(ByteRange::new(3, 10)),
            ..Default::default()
        };
        let err = store.download(&handle, options).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidRange { size: 3, .. }));
    }

    #[tokio::test]
    async fn test_download_writes_destination() {
        let (dir, store, source) = store_with_source(b"payload").await;
        let (handle, _) = store.upload(&source, UploadOptions::default()).await.unwrap();
        let destination = dir.path().join("out/nested/copy.bin");

        let options = DownloadOptions {
            destination: Some(destination.clone()),
            ..Default::default()
        };
        let bytes = store.download(&handle, options).await.unwrap();
        assert_eq!(bytes, b"payload");
        assert_eq!(std::fs::read(destination).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_missing_object_and_stale_generation() {
        let (_dir, store, source) = store_with_source(b"abc").await;

        let missing = ObjectHandle::new("local", "nope.bin");
        let err = store.get_metadata(&missing).await.unwrap_err();
        assert!(matches!(err, TransferError::NotFound(_)));

        let (handle, meta) = store.upload(&source, UploadOptions::default()).await.unwrap();
        let stale = handle.with_generation(meta.generation + 1);
        let err = store.get_metadata(&stale).await.unwrap_err();
        assert!(matches!(err, TransferError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_names_cannot_escape_root() {
        let (_dir, store, source) = store_with_source(b"evil").await;
        for name in ["../escape.txt", "/abs.txt", "a/../../b", ""] {
            let options = UploadOptions {
                destination: Some(name.to_string()),
                ..Default::default()
            };
            let err = store.upload(&source, options).await.unwrap_err();
            assert!(matches!(err, TransferError::InvalidPath(_)), "{name}");
        }
    }

    fn create_only() -> UploadOptions {
        UploadOptions {
            preconditions: Some(Preconditions {
                if_generation_match: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn temp_files(root: &Path) -> usize {
        std::fs::read_dir(root)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count()
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_create_only_upload_is_published_whole() {
        use std::io::Write;
        use std::sync::mpsc;
        use std::time::Duration;

        let (dir, store, _) = store_with_source(b"").await;
        let fifo = dir.path().join("slow.pipe");
        let status = std::process::Command::new("mkfifo")
            .arg(&fifo)
            .status()
            .unwrap();
        assert!(status.success());

        // Feed one byte, then hold the rest back until told to continue
        let (wrote_tx, wrote_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let writer_path = fifo.clone();
        let writer = std::thread::spawn(move || {
            let mut pipe = std::fs::OpenOptions::new()
                .write(true)
                .open(writer_path)
                .unwrap();
            pipe.write_all(b"s").unwrap();
            pipe.flush().unwrap();
            wrote_tx.send(()).unwrap();
            resume_rx.recv().unwrap();
            pipe.write_all(b"lowpipe").unwrap();
        });

        let uploading = {
            let store = store.clone();
            let fifo = fifo.clone();
            tokio::spawn(async move { store.upload(&fifo, create_only()).await })
        };
        tokio::task::spawn_blocking(move || wrote_rx.recv().unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let pending = store.get_metadata(&ObjectHandle::new("local", "slow.pipe")).await;
        assert!(matches!(pending, Err(TransferError::NotFound(_))));

        // An unrelated create-only upload does not wait for the stalled one
        let other = dir.path().join("other.txt");
        std::fs::write(&other, b"other").unwrap();
        let (handle, _) =
            tokio::time::timeout(Duration::from_secs(1), store.upload(&other, create_only()))
                .await
                .unwrap()
                .unwrap();
        assert_eq!(handle.name, "other.txt");

        resume_tx.send(()).unwrap();
        writer.join().unwrap();
        let (_, meta) = uploading.await.unwrap().unwrap();
        assert_eq!(meta.size, 8);
        assert_eq!(std::fs::read(store.root().join("slow.pipe")).unwrap(), b"slowpipe");
        assert_eq!(temp_files(store.root()), 0);
    }

    #[tokio::test]
    async fn test_rejected_create_only_upload_leaves_no_staging_file() {
        let (_dir, store, source) = store_with_source(b"first").await;
        store.upload(&source, create_only()).await.unwrap();

        std::fs::write(&source, b"second").unwrap();
        let err = store.upload(&source, create_only()).await.unwrap_err();

        assert!(matches!(err, TransferError::PreconditionFailed(_)));
        assert_eq!(std::fs::read(store.root().join("source.bin")).unwrap(), b"first");
        assert_eq!(temp_files(store.root()), 0);
    }

    #[tokio::test]
    async fn test_handle_for_other_bucket_is_rejected() {
        let (_dir, store, source) = store_with_source(b"abc").await;
        store.upload(&source, UploadOptions::default()).await.unwrap();

        let foreign = ObjectHandle::new("elsewhere", "source.bin");
        let err = store.get_metadata(&foreign).await.unwrap_err();
        assert!(matches!(err, TransferError::InvalidConfig(_)));
    }
}
