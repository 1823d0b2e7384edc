//! Transfer manager - bulk and chunked transfers over an object store

use crate::engine::{
    plan_chunks, validate_chunking, AdmissionGate, CallScope, FanOut, OutputFile, TransferBatch,
};
use crate::error::TransferError;
use crate::options::merge_skip_if_exists;
use crate::paths::{download_destination, strip_literal_prefix, upload_destination};
use crate::store::ObjectStore;
use bferry_types::{
    ByteRange, DownloadLargeOptions, DownloadManyOptions, DownloadOptions, ObjectHandle,
    ObjectMetadata, TransferEvent, TransferKind, UploadManyOptions, LARGE_OBJECT_THRESHOLD,
};
use futures::FutureExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Orchestrates many uploads, many downloads, or one chunked download
/// against a shared [`ObjectStore`].
///
/// The manager keeps no per-call state. Cancelling [`cancel_token`] aborts
/// every running call and makes later calls fail immediately.
///
/// [`cancel_token`]: TransferManager::cancel_token
pub struct TransferManager {
    store: Arc<dyn ObjectStore>,
    event_tx: broadcast::Sender<TransferEvent>,
    cancel: CancellationToken,
    large_object_threshold: u64,
}

impl TransferManager {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        Self {
            store,
            event_tx,
            cancel: CancellationToken::new(),
            large_object_threshold: LARGE_OBJECT_THRESHOLD,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_large_object_threshold(mut self, threshold: u64) -> Self {
        self.large_object_threshold = threshold;
        self
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Subscribe to transfer events
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.event_tx.subscribe()
    }

    /// Root token every call runs under
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&self, event: TransferEvent) {
        let _ = self.event_tx.send(event);
    }

    fn scope(&self, timeout_secs: Option<u64>) -> CallScope {
        CallScope::new(&self.cancel, timeout_secs.map(Duration::from_secs))
    }

    fn fan_out<'a>(
        &'a self,
        kind: TransferKind,
        gate: &'a AdmissionGate,
        scope: &'a CallScope,
    ) -> FanOut<'a> {
        FanOut {
            kind,
            gate,
            interrupt: scope.interrupt(),
            events: &self.event_tx,
        }
    }

    fn finish<T>(&self, kind: TransferKind, batch: &TransferBatch<T>) {
        let succeeded = batch.succeeded();
        let failed = batch.failed();
        if failed == 0 {
            info!("{} finished: {} succeeded", kind, succeeded);
        } else {
            warn!("{} finished: {} succeeded, {} failed", kind, succeeded, failed);
        }
        self.emit(TransferEvent::OperationFinished {
            kind,
            succeeded,
            failed,
        });
    }

    // ========================================================================
    // Upload Operations
    // ========================================================================

    /// Upload every path, returning results in input order.
    ///
    /// On failure the first error to settle is returned, after every other
    /// upload has finished. Successful siblings are not rolled back.
    pub async fn upload_many(
        &self,
        paths: Vec<PathBuf>,
        options: UploadManyOptions,
    ) -> Result<Vec<(ObjectHandle, ObjectMetadata)>, TransferError> {
        self.upload_many_settled(paths, options).await?.into_result()
    }

    /// Like [`upload_many`](Self::upload_many) but keeps every per-item result
    pub async fn upload_many_settled(
        &self,
        paths: Vec<PathBuf>,
        options: UploadManyOptions,
    ) -> Result<TransferBatch<(ObjectHandle, ObjectMetadata)>, TransferError> {
        let kind = TransferKind::UploadMany;
        let gate = AdmissionGate::new(options.concurrency_limit)?;
        let scope = self.scope(options.timeout_secs);
        let base = merge_skip_if_exists(&options.pass_through, options.skip_if_exists);
        let prefix = options.prefix;

        info!(
            "Uploading {} files to bucket {} with concurrency {}",
            paths.len(),
            self.store.bucket(),
            gate.limit()
        );
        self.emit(TransferEvent::OperationStarted {
            kind,
            items: paths.len(),
            total_bytes: None,
        });

        let batch = self
            .fan_out(kind, &gate, &scope)
            .run(
                paths,
                |path| path.display().to_string(),
                |_, path| {
                    let store = self.store.clone();
                    let interrupt = scope.interrupt().clone();
                    let mut item_options = base.clone();
                    let destination = prefix
                        .as_deref()
                        .map(|prefix| upload_destination(prefix, &path));
                    async move {
                        if let Some(destination) = destination {
                            item_options.destination = Some(destination?);
                        }
                        interrupt.guard(store.upload(&path, item_options)).await
                    }
                    .boxed()
                },
            )
            .await;

        self.finish(kind, &batch);
        Ok(batch)
    }

    /// Upload every path and hand the outcome to `callback` as two parallel
    /// sequences of handles and metadata
    pub async fn upload_many_with_callback<C>(
        &self,
        paths: Vec<PathBuf>,
        options: UploadManyOptions,
        callback: C,
    ) where
        C: FnOnce(Result<(Vec<ObjectHandle>, Vec<ObjectMetadata>), TransferError>),
    {
        let result = self
            .upload_many(paths, options)
            .await
            .map(|uploaded| uploaded.into_iter().unzip());
        callback(result);
    }

    // ========================================================================
    // Download Operations
    // ========================================================================

    /// Download every object, returning contents in input order.
    ///
    /// Failure semantics match [`upload_many`](Self::upload_many).
    pub async fn download_many(
        &self,
        objects: Vec<ObjectHandle>,
        options: DownloadManyOptions,
    ) -> Result<Vec<Vec<u8>>, TransferError> {
        self.download_many_settled(objects, options).await?.into_result()
    }

    /// Like [`download_many`](Self::download_many) but keeps every per-item result
    pub async fn download_many_settled(
        &self,
        objects: Vec<ObjectHandle>,
        options: DownloadManyOptions,
    ) -> Result<TransferBatch<Vec<u8>>, TransferError> {
        let kind = TransferKind::DownloadMany;
        let gate = AdmissionGate::new(options.concurrency_limit)?;
        let scope = self.scope(options.timeout_secs);

        info!(
            "Downloading {} objects from bucket {} with concurrency {}",
            objects.len(),
            self.store.bucket(),
            gate.limit()
        );
        self.emit(TransferEvent::OperationStarted {
            kind,
            items: objects.len(),
            total_bytes: None,
        });

        let batch = self
            .fan_out(kind, &gate, &scope)
            .run(
                objects,
                |object| object.name.clone(),
                |_, object| {
                    let store = self.store.clone();
                    let interrupt = scope.interrupt().clone();
                    let mut item_options = options.pass_through.clone();
                    if let Some(ref prefix) = options.prefix {
                        item_options.destination = Some(download_destination(
                            prefix,
                            item_options.destination.as_deref(),
                            &object.name,
                        ));
                    }
                    // Applied last, so it wins over the prefix
                    if let Some(ref strip) = options.strip_prefix {
                        item_options.destination =
                            Some(PathBuf::from(strip_literal_prefix(&object.name, strip)));
                    }
                    async move { interrupt.guard(store.download(&object, item_options)).await }
                        .boxed()
                },
            )
            .await;

        self.finish(kind, &batch);
        Ok(batch)
    }

    /// Download every object and hand the outcome to `callback`
    pub async fn download_many_with_callback<C>(
        &self,
        objects: Vec<ObjectHandle>,
        options: DownloadManyOptions,
        callback: C,
    ) where
        C: FnOnce(Result<Vec<Vec<u8>>, TransferError>),
    {
        callback(self.download_many(objects, options).await);
    }

    /// Download one object in parallel byte ranges.
    ///
    /// The content is written to `destination_dir/<base name>` and also
    /// returned. Objects below the large-object threshold are fetched in a
    /// single request. On failure, bytes already written stay on disk.
    pub async fn download_large(
        &self,
        object: &ObjectHandle,
        options: DownloadLargeOptions,
    ) -> Result<Vec<u8>, TransferError> {
        let kind = TransferKind::DownloadLarge;
        validate_chunking(options.chunk_size_bytes, options.concurrency_limit)?;

        let file_name = object.base_name();
        if file_name.is_empty() {
            return Err(TransferError::InvalidPath(object.name.clone()));
        }

        let scope = self.scope(options.timeout_secs);
        let meta = scope
            .interrupt()
            .guard(self.store.get_metadata(object))
            .await?;

        let plan = plan_chunks(
            meta.size,
            options.chunk_size_bytes,
            options.concurrency_limit,
            self.large_object_threshold,
        )?;
        let gate = AdmissionGate::new(plan.concurrency_limit)?;

        let directory = options
            .destination_dir
            .unwrap_or_else(|| PathBuf::from("."));
        let file = OutputFile::create(&directory.join(file_name)).await?;

        info!(
            "Downloading {} ({} bytes) to {:?} in {} chunks with concurrency {}",
            object,
            meta.size,
            file.path(),
            plan.ranges.len(),
            gate.limit()
        );
        self.emit(TransferEvent::OperationStarted {
            kind,
            items: plan.ranges.len(),
            total_bytes: Some(meta.size),
        });

        // Every range reads the generation the size came from
        let source = ObjectHandle {
            generation: object.generation.or(Some(meta.generation)),
            ..object.clone()
        };
        let writer = file.writer();

        let batch = self
            .fan_out(kind, &gate, &scope)
            .run(
                plan.ranges,
                |range| range.to_string(),
                |index, range: ByteRange| {
                    let store = self.store.clone();
                    let interrupt = scope.interrupt().clone();
                    let events = self.event_tx.clone();
                    let writer = writer.clone();
                    let source = source.clone();
                    async move {
                        let request = DownloadOptions {
                            destination: None,
                            range: Some(range),
                        };
                        let bytes = interrupt.guard(store.download(&source, request)).await?;
                        if bytes.len() as u64 != range.size() {
                            return Err(TransferError::UnexpectedLength {
                                expected: range.size(),
                                actual: bytes.len() as u64,
                            });
                        }

                        // Not interruptible: the file is closed only after this settles
                        let bytes = writer.write_at(range.start, bytes).await?;
                        debug!("Chunk {} ({}) written", index, range);
                        let _ = events.send(TransferEvent::ChunkWritten {
                            index,
                            start: range.start,
                            end: range.end,
                        });
                        Ok(bytes)
                    }
                    .boxed()
                },
            )
            .await;

        drop(writer);
        let closed = file.close().await;
        self.finish(kind, &batch);

        let chunks = batch.into_result()?;
        closed?;
        Ok(chunks.concat())
    }

    /// Download one object in chunks and hand the outcome to `callback`
    pub async fn download_large_with_callback<C>(
        &self,
        object: &ObjectHandle,
        options: DownloadLargeOptions,
        callback: C,
    ) where
        C: FnOnce(Result<Vec<u8>, TransferError>),
    {
        callback(self.download_large(object, options).await);
    }
}
