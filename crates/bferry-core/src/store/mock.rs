//! In-memory store for exercising the transfer manager in tests

use super::{default_object_name, write_destination, ObjectStore};
use crate::error::TransferError;
use async_trait::async_trait;
use bferry_types::{DownloadOptions, ObjectHandle, ObjectMetadata, UploadOptions};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    Precondition,
    Server,
}

/// Records every call and tracks how many were in flight at once.
///
/// Delays and failures are keyed by object name, or by `name@start` for
/// ranged downloads.
#[derive(Default)]
pub(crate) struct MockStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    generation: AtomicI64,
    delays: Mutex<HashMap<String, Duration>>,
    failures: Mutex<HashMap<String, Failure>>,
    reported_sizes: Mutex<HashMap<String, u64>>,
    skip_writes: AtomicBool,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    pub(crate) uploads: Mutex<Vec<(PathBuf, UploadOptions)>>,
    pub(crate) downloads: Mutex<Vec<(String, DownloadOptions)>>,
    pub(crate) metadata_calls: AtomicUsize,
    pub(crate) completed: Mutex<Vec<String>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn insert(&self, name: &str, contents: Vec<u8>) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().insert(name.to_string(), contents);
    }

    pub(crate) fn object(&self, name: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(name).cloned()
    }

    pub(crate) fn delay(&self, key: &str, delay: Duration) {
        self.delays.lock().insert(key.to_string(), delay);
    }

    pub(crate) fn fail(&self, key: &str, failure: Failure) {
        self.failures.lock().insert(key.to_string(), failure);
    }

    /// Report `size` from `get_metadata` regardless of the stored content
    pub(crate) fn misreport_size(&self, name: &str, size: u64) {
        self.reported_sizes.lock().insert(name.to_string(), size);
    }

    /// Record download destinations without writing them
    pub(crate) fn record_only(&self) {
        self.skip_writes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    async fn simulate(&self, keys: &[String]) -> Result<(), TransferError> {
        let delay = {
            let delays = self.delays.lock();
            keys.iter().find_map(|k| delays.get(k).copied())
        };
        // Always yield so sibling tasks get a chance to overlap
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        let failure = {
            let failures = self.failures.lock();
            keys.iter().find_map(|k| failures.get(k).copied())
        };
        match failure {
            Some(Failure::Precondition) => Err(TransferError::PreconditionFailed(keys[0].clone())),
            Some(Failure::Server) => Err(TransferError::ServerError {
                status: 503,
                message: keys[0].clone(),
            }),
            None => Ok(()),
        }
    }

    fn metadata_for(&self, name: &str, size: u64) -> ObjectMetadata {
        ObjectMetadata {
            bucket: "mock".to_string(),
            name: name.to_string(),
            size,
            generation: self.generation.load(Ordering::SeqCst),
            metageneration: 1,
            content_type: None,
            md5_hash: None,
            updated: None,
            metadata: Default::default(),
        }
    }
}

#[async_trait]
impl ObjectStore for MockStore {
    fn bucket(&self) -> &str {
        "mock"
    }

    async fn upload(
        &self,
        local_path: &Path,
        options: UploadOptions,
    ) -> Result<(ObjectHandle, ObjectMetadata), TransferError> {
        let _guard = self.enter();
        self.uploads
            .lock()
            .push((local_path.to_path_buf(), options.clone()));

        let name = match options.destination {
            Some(ref destination) => destination.clone(),
            None => default_object_name(local_path)?,
        };
        self.simulate(&[name.clone()]).await?;

        let contents = tokio::fs::read(local_path).await?;
        let create_only = options
            .preconditions
            .as_ref()
            .and_then(|p| p.if_generation_match)
            == Some(0);
        {
            let mut objects = self.objects.lock();
            if create_only && objects.contains_key(&name) {
                return Err(TransferError::PreconditionFailed(name));
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
            objects.insert(name.clone(), contents.clone());
        }
        self.completed.lock().push(name.clone());

        let meta = self.metadata_for(&name, contents.len() as u64);
        Ok((meta.handle(), meta))
    }

    async fn download(
        &self,
        object: &ObjectHandle,
        options: DownloadOptions,
    ) -> Result<Vec<u8>, TransferError> {
        let _guard = self.enter();
        self.downloads
            .lock()
            .push((object.name.clone(), options.clone()));

        let mut keys = vec![object.name.clone()];
        if let Some(range) = options.range {
            keys.insert(0, format!("{}@{}", object.name, range.start));
        }
        self.simulate(&keys).await?;

        let contents = self
            .object(&object.name)
            .ok_or_else(|| TransferError::NotFound(object.to_string()))?;
        let contents = match options.range {
            Some(range) => {
                let size = contents.len() as u64;
                if range.start >= size {
                    return Err(TransferError::InvalidRange {
                        start: range.start,
                        end: range.end,
                        size,
                    });
                }
                let end = range.end.min(size - 1);
                contents[range.start as usize..=end as usize].to_vec()
            }
            None => contents,
        };

        if let Some(destination) = options.destination {
            if !self.skip_writes.load(Ordering::SeqCst) {
                write_destination(&destination, &contents).await?;
            }
        }
        self.completed.lock().push(keys[0].clone());
        Ok(contents)
    }

    async fn get_metadata(&self, object: &ObjectHandle) -> Result<ObjectMetadata, TransferError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let size = self
            .object(&object.name)
            .map(|c| c.len() as u64)
            .ok_or_else(|| TransferError::NotFound(object.to_string()))?;
        let size = self
            .reported_sizes
            .lock()
            .get(&object.name)
            .copied()
            .unwrap_or(size);
        Ok(self.metadata_for(&object.name, size))
    }
}
