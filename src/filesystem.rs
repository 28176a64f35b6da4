//! Filesystem-shaped capability over blob storage.
//!
//! [`BlobFileSystem`] is the operation set callers program against;
//! [`crate::service::AzureBlobService`] is the backend that implements it.
//! Entities are immutable snapshots, not live handles.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::errors::FsResult;

/// Readable byte stream handed in to, or out of, file operations.
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Snapshot of a blob presented as a file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntity {
    /// Logical path, joined with the configured separator.
    pub path: String,
    /// Last path segment.
    pub name: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    /// Backend blob type, e.g. `BlockBlob`.
    pub blob_type: String,
}

/// A virtual directory: a container, or a blob-key prefix inside one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntity {
    pub path: String,
    pub name: String,
}

/// A container as returned by List Containers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerHandle {
    pub name: String,
    /// Every `<Properties>` child of the listing entry, keyed by element
    /// name (`Last-Modified`, `Etag`, ...).
    pub properties: BTreeMap<String, String>,
}

impl From<&ContainerHandle> for DirectoryEntity {
    fn from(container: &ContainerHandle) -> Self {
        DirectoryEntity {
            path: container.name.clone(),
            name: container.name.clone(),
        }
    }
}

/// Filesystem operations over a blob store.
///
/// Paths are logical: the first segment names a container, the rest a
/// blob key. Every operation takes a cancellation token that is observed
/// before each network request and while one is in flight.
pub trait BlobFileSystem: Send + Sync {
    /// Ensure the container owning `path` exists. Nothing below the
    /// container is materialised.
    fn create_directory<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<()>>;

    /// Delete a container, or every blob under a prefix. An empty prefix
    /// is `NotFound`.
    fn delete_directory<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<()>>;

    /// Root always exists; anything else exists when its container does.
    fn directory_exists<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<bool>>;

    fn file_exists<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<bool>>;

    /// Metadata probe; the body is not fetched.
    fn get_file<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<FileEntity>>;

    /// Files directly inside `path`, excluding nested subdirectories.
    fn get_files<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<Vec<FileEntity>>>;

    /// Containers at the root; common prefixes below it.
    fn get_directories<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<Vec<DirectoryEntity>>>;

    /// Stream the file's content from the response body.
    fn read_file<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<ByteReader>>;

    /// Replace the file with everything `source` yields.
    fn save_file<'a>(
        &'a self,
        path: &'a str,
        source: ByteReader,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<()>>;

    fn delete_file<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<()>>;

    /// Append `buffer[offset..offset + count]` as one new block.
    fn append_file<'a>(
        &'a self,
        path: &'a str,
        buffer: &'a [u8],
        offset: usize,
        count: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<()>>;
}
