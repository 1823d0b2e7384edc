//! Object store collaborators
//!
//! The transfer manager never speaks a wire protocol itself. It drives an
//! [`ObjectStore`], which performs exactly one upload, download or metadata
//! lookup per call.

mod fs;
mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use fs::FsStore;
pub use http::HttpStore;

use crate::error::TransferError;
use async_trait::async_trait;
use bferry_types::{DownloadOptions, ObjectHandle, ObjectMetadata, UploadOptions};
use std::path::Path;

/// Per-object operations the transfer manager builds on
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the bucket this store addresses
    fn bucket(&self) -> &str;

    /// Upload one local file.
    ///
    /// The destination name defaults to the file name of `local_path`.
    /// Preconditions in `options` are enforced by the store and surface as
    /// [`TransferError::PreconditionFailed`].
    async fn upload(
        &self,
        local_path: &Path,
        options: UploadOptions,
    ) -> Result<(ObjectHandle, ObjectMetadata), TransferError>;

    /// Download an object, or the inclusive `options.range` of it.
    ///
    /// When `options.destination` is set the content is also written to
    /// that path.
    async fn download(
        &self,
        object: &ObjectHandle,
        options: DownloadOptions,
    ) -> Result<Vec<u8>, TransferError>;

    /// Fetch the object's metadata
    async fn get_metadata(&self, object: &ObjectHandle) -> Result<ObjectMetadata, TransferError>;
}

/// Name an upload lands under when no destination is given
pub(crate) fn default_object_name(local_path: &Path) -> Result<String, TransferError> {
    local_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| TransferError::InvalidPath(local_path.display().to_string()))
}

/// Write downloaded content to its local destination
pub(crate) async fn write_destination(path: &Path, contents: &[u8]) -> Result<(), TransferError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}
