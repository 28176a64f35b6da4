//! Azure Blob Storage presented as a filesystem.
//!
//! Logical paths map onto the backend as `container[/blob/key]`:
//!   directory at root level -> container
//!   directory below that    -> blob-key prefix (no backend record)
//!   file                    -> block blob
//!
//! Directory existence below container level is never probed; a prefix
//! exists only in the sense that listing it returns something.

use futures::future::{join_all, BoxFuture};
use futures::StreamExt;
use http::header::{CONTENT_LENGTH, LAST_MODIFIED};
use http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{BlobClient, HEADER_BLOB_TYPE};
use crate::config::StorageEndpointConfig;
use crate::crypto::{HmacProvider, RustCryptoHmac};
use crate::errors::{FsError, FsResult};
use crate::filesystem::{BlobFileSystem, ByteReader, ContainerHandle, DirectoryEntity, FileEntity};
use crate::listing::BlobItem;
use crate::path::{self, ResolvedPath, BLOB_DELIMITER, BLOB_DELIMITER_STR};
use crate::transport::remote::ReqwestTransport;
use crate::transport::Transport;
use crate::upload::check_block_size;
use crate::xml::{parse_http_date, BlockEntry};

/// Filesystem facade over one storage account.
pub struct AzureBlobService {
    client: BlobClient,
    separator: char,
}

impl AzureBlobService {
    /// Build a service over `transport`, signing with the default HMAC
    /// implementation. The settings are validated first.
    pub fn new(config: &StorageEndpointConfig, transport: Arc<dyn Transport>) -> FsResult<Self> {
        Self::with_hmac(config, transport, Arc::new(RustCryptoHmac))
    }

    /// Build a service with a caller-chosen HMAC implementation.
    pub fn with_hmac(
        config: &StorageEndpointConfig,
        transport: Arc<dyn Transport>,
        hmac: Arc<dyn HmacProvider>,
    ) -> FsResult<Self> {
        let client = BlobClient::new(config, transport, hmac)?;
        info!(
            "Azure blob service initialized: account={} endpoint={}",
            client.account(),
            client.endpoint()
        );
        Ok(Self {
            client,
            separator: config.separator,
        })
    }

    /// Build a service that talks HTTP to the configured endpoint.
    pub fn connect(config: &StorageEndpointConfig) -> FsResult<Self> {
        let transport = ReqwestTransport::new(Duration::from_secs(config.timeout_seconds))?;
        Self::new(config, Arc::new(transport))
    }

    pub fn client(&self) -> &BlobClient {
        &self.client
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    fn resolve(&self, path: &str) -> ResolvedPath {
        path::resolve(path, self.separator)
    }

    /// Resolve a path that must name a blob.
    fn resolve_file(&self, path: &str) -> FsResult<ResolvedPath> {
        let resolved = self.resolve(path);
        if resolved.blob_key.is_empty() {
            return Err(FsError::argument(format!(
                "'{path}' names a directory, not a file"
            )));
        }
        Ok(resolved)
    }

    fn file_entity(&self, container: &str, item: BlobItem) -> FileEntity {
        let resolved = ResolvedPath {
            container: container.to_string(),
            blob_key: item.name,
            is_root: false,
        };
        FileEntity {
            path: resolved.join(self.separator),
            name: resolved.name().to_string(),
            size: item.size,
            last_modified: item.last_modified,
            blob_type: item.blob_type,
        }
    }

    fn directory_entity(&self, container: &str, prefix: &str) -> DirectoryEntity {
        let resolved = ResolvedPath {
            container: container.to_string(),
            blob_key: prefix.trim_end_matches(BLOB_DELIMITER).to_string(),
            is_root: false,
        };
        DirectoryEntity {
            path: resolved.join(self.separator),
            name: resolved.name().to_string(),
        }
    }

    // -- Directories ----------------------------------------------------------

    pub async fn create_directory(&self, path: &str, cancel: &CancellationToken) -> FsResult<()> {
        let resolved = self.resolve(path);
        if resolved.is_root {
            return Ok(());
        }
        if self
            .client
            .container_exists(&resolved.container, cancel)
            .await?
        {
            debug!("create_directory: container {} exists", resolved.container);
            return Ok(());
        }
        self.client
            .create_container(&resolved.container, cancel)
            .await?;
        debug!("create_directory: created container {}", resolved.container);
        Ok(())
    }

    pub async fn delete_directory(&self, path: &str, cancel: &CancellationToken) -> FsResult<()> {
        let resolved = self.resolve(path);
        if resolved.is_root {
            return Err(FsError::argument("the root directory cannot be deleted"));
        }
        if resolved.is_container() {
            debug!("delete_directory: deleting container {}", resolved.container);
            return self
                .client
                .delete_container(&resolved.container, cancel)
                .await;
        }

        let blobs = self
            .client
            .list_blobs(&resolved.container, &resolved.child_prefix(), None, cancel)
            .await?;
        if blobs.is_empty() {
            return Err(FsError::NotFound {
                resource: resolved.join(self.separator),
            });
        }

        debug!(
            "delete_directory: deleting {} blobs under {}",
            blobs.len(),
            resolved.join(self.separator)
        );
        let results = join_all(
            blobs
                .iter()
                .map(|blob| self.client.delete_blob(&resolved.container, &blob.name, cancel)),
        )
        .await;

        let mut first_error = None;
        for (blob, result) in blobs.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    "Failed to delete {}/{}: {}",
                    resolved.container, blob.name, e
                );
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn directory_exists(&self, path: &str, cancel: &CancellationToken) -> FsResult<bool> {
        let resolved = self.resolve(path);
        if resolved.is_root {
            return Ok(true);
        }
        self.client
            .container_exists(&resolved.container, cancel)
            .await
    }

    pub async fn get_directories(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> FsResult<Vec<DirectoryEntity>> {
        let resolved = self.resolve(path);
        if resolved.is_root {
            let containers = self.client.list_containers(cancel).await?;
            return Ok(containers.iter().map(DirectoryEntity::from).collect());
        }
        let prefixes = self
            .client
            .list_blob_prefixes(
                &resolved.container,
                &resolved.child_prefix(),
                BLOB_DELIMITER_STR,
                cancel,
            )
            .await?;
        Ok(prefixes
            .iter()
            .map(|prefix| self.directory_entity(&resolved.container, prefix))
            .collect())
    }

    // -- Files ----------------------------------------------------------------

    pub async fn file_exists(&self, path: &str, cancel: &CancellationToken) -> FsResult<bool> {
        let resolved = self.resolve(path);
        if resolved.blob_key.is_empty() {
            return Ok(false);
        }
        match self
            .client
            .get_blob_properties(&resolved.container, &resolved.blob_key, cancel)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn get_file(&self, path: &str, cancel: &CancellationToken) -> FsResult<FileEntity> {
        let resolved = self.resolve_file(path)?;
        let headers = self
            .client
            .get_blob_properties(&resolved.container, &resolved.blob_key, cancel)
            .await?;
        let item = blob_item_from_headers(resolved.blob_key, &headers);
        Ok(self.file_entity(&resolved.container, item))
    }

    pub async fn get_files(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> FsResult<Vec<FileEntity>> {
        let resolved = self.resolve(path);
        if resolved.is_root {
            return Ok(Vec::new());
        }
        let blobs = self
            .client
            .list_blobs(
                &resolved.container,
                &resolved.child_prefix(),
                Some(BLOB_DELIMITER_STR),
                cancel,
            )
            .await?;
        Ok(blobs
            .into_iter()
            .map(|item| self.file_entity(&resolved.container, item))
            .collect())
    }

    /// Stream the blob's content. Cancelling `cancel` fails the pending or
    /// next read, even while the body is stalled.
    pub async fn read_file(&self, path: &str, cancel: &CancellationToken) -> FsResult<ByteReader> {
        let resolved = self.resolve_file(path)?;
        let response = self
            .client
            .get_blob(&resolved.container, &resolved.blob_key, cancel)
            .await?;

        let body = futures::stream::unfold(
            (response.body, cancel.clone()),
            |(mut body, token)| async move {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => Some(Err(std::io::Error::new(
                        std::io::ErrorKind::Interrupted,
                        FsError::Cancelled,
                    ))),
                    chunk = body.next() => chunk,
                };
                next.map(|chunk| (chunk, (body, token)))
            },
        );
        Ok(Box::new(StreamReader::new(Box::pin(body))))
    }

    pub async fn save_file(
        &self,
        path: &str,
        mut source: ByteReader,
        cancel: &CancellationToken,
    ) -> FsResult<()> {
        let resolved = self.resolve_file(path)?;
        self.client
            .save_blob(&resolved.container, &resolved.blob_key, &mut source, cancel)
            .await
    }

    pub async fn delete_file(&self, path: &str, cancel: &CancellationToken) -> FsResult<()> {
        let resolved = self.resolve_file(path)?;
        self.client
            .delete_blob(&resolved.container, &resolved.blob_key, cancel)
            .await
    }

    /// Append `buffer[offset..offset + count]`. `count` above the block
    /// limit fails before anything is sent.
    pub async fn append_file(
        &self,
        path: &str,
        buffer: &[u8],
        offset: usize,
        count: usize,
        cancel: &CancellationToken,
    ) -> FsResult<()> {
        check_block_size(count)?;
        let end = offset
            .checked_add(count)
            .filter(|end| *end <= buffer.len())
            .ok_or_else(|| {
                FsError::argument(format!(
                    "range {offset}+{count} is outside a buffer of {} bytes",
                    buffer.len()
                ))
            })?;
        let resolved = self.resolve_file(path)?;
        self.client
            .append_blob(
                &resolved.container,
                &resolved.blob_key,
                &buffer[offset..end],
                cancel,
            )
            .await
    }

    // -- Containers and manifests ---------------------------------------------

    pub async fn list_containers(
        &self,
        cancel: &CancellationToken,
    ) -> FsResult<Vec<ContainerHandle>> {
        self.client.list_containers(cancel).await
    }

    pub async fn create_container(&self, name: &str, cancel: &CancellationToken) -> FsResult<()> {
        self.client.create_container(name, cancel).await
    }

    pub async fn delete_container(&self, name: &str, cancel: &CancellationToken) -> FsResult<()> {
        self.client.delete_container(name, cancel).await
    }

    /// The committed block manifest of a file, in order.
    pub async fn committed_blocks(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> FsResult<Vec<BlockEntry>> {
        let resolved = self.resolve_file(path)?;
        self.client
            .get_committed_blocks(&resolved.container, &resolved.blob_key, cancel)
            .await
    }
}

fn blob_item_from_headers(name: String, headers: &HeaderMap) -> BlobItem {
    let header = |key: &str| headers.get(key).and_then(|v| v.to_str().ok());
    BlobItem {
        name,
        size: header(CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        last_modified: header(LAST_MODIFIED.as_str()).and_then(parse_http_date),
        blob_type: header(HEADER_BLOB_TYPE).unwrap_or_default().to_string(),
    }
}

impl BlobFileSystem for AzureBlobService {
    fn create_directory<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<()>> {
        Box::pin(AzureBlobService::create_directory(self, path, cancel))
    }

    fn delete_directory<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<()>> {
        Box::pin(AzureBlobService::delete_directory(self, path, cancel))
    }

    fn directory_exists<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<bool>> {
        Box::pin(AzureBlobService::directory_exists(self, path, cancel))
    }

    fn file_exists<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<bool>> {
        Box::pin(AzureBlobService::file_exists(self, path, cancel))
    }

    fn get_file<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<FileEntity>> {
        Box::pin(AzureBlobService::get_file(self, path, cancel))
    }

    fn get_files<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<Vec<FileEntity>>> {
        Box::pin(AzureBlobService::get_files(self, path, cancel))
    }

    fn get_directories<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<Vec<DirectoryEntity>>> {
        Box::pin(AzureBlobService::get_directories(self, path, cancel))
    }

    fn read_file<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<ByteReader>> {
        Box::pin(AzureBlobService::read_file(self, path, cancel))
    }

    fn save_file<'a>(
        &'a self,
        path: &'a str,
        source: ByteReader,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<()>> {
        Box::pin(AzureBlobService::save_file(self, path, source, cancel))
    }

    fn delete_file<'a>(
        &'a self,
        path: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<()>> {
        Box::pin(AzureBlobService::delete_file(self, path, cancel))
    }

    fn append_file<'a>(
        &'a self,
        path: &'a str,
        buffer: &'a [u8],
        offset: usize,
        count: usize,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, FsResult<()>> {
        Box::pin(AzureBlobService::append_file(
            self, path, buffer, offset, count, cancel,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use crate::upload::MAX_BLOCK_SIZE;
    use tokio::io::AsyncReadExt;

    fn service_over(transport: &Arc<MemoryTransport>) -> AzureBlobService {
        AzureBlobService::new(&transport.endpoint_config(), transport.clone()).unwrap()
    }

    async fn setup() -> (Arc<MemoryTransport>, AzureBlobService, CancellationToken) {
        let transport = Arc::new(MemoryTransport::new());
        let service = service_over(&transport);
        let cancel = CancellationToken::new();
        service.create_directory("docs", &cancel).await.unwrap();
        (transport, service, cancel)
    }

    fn source(data: &[u8]) -> ByteReader {
        Box::new(std::io::Cursor::new(data.to_vec()))
    }

    async fn read_all(service: &AzureBlobService, path: &str, cancel: &CancellationToken) -> Vec<u8> {
        let mut reader = service.read_file(path, cancel).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_round_trip_across_block_boundaries() {
        let (_transport, service, cancel) = setup().await;
        for size in [0, 1, MAX_BLOCK_SIZE, MAX_BLOCK_SIZE + 1, 2 * MAX_BLOCK_SIZE + 1] {
            let data = pattern(size);
            let path = format!("docs/sizes/{size}.bin");
            service.save_file(&path, source(&data), &cancel).await.unwrap();

            let read = read_all(&service, &path, &cancel).await;
            assert_eq!(read.len(), size);
            assert!(read == data, "content mismatch for size {size}");

            let blocks = service.committed_blocks(&path, &cancel).await.unwrap();
            assert_eq!(blocks.len(), size.div_ceil(MAX_BLOCK_SIZE));
        }
    }

    #[tokio::test]
    async fn test_append_after_save() {
        let (_transport, service, cancel) = setup().await;
        service
            .save_file("docs/log.txt", source(b"first line\n"), &cancel)
            .await
            .unwrap();
        let buffer = b"xxsecond line\nyy";
        service
            .append_file("docs/log.txt", buffer, 2, 12, &cancel)
            .await
            .unwrap();
        assert_eq!(
            read_all(&service, "docs/log.txt", &cancel).await,
            b"first line\nsecond line\n"
        );
    }

    #[tokio::test]
    async fn test_append_to_missing_file_creates_it() {
        let (_transport, service, cancel) = setup().await;
        service
            .append_file("docs/new.txt", b"hello", 0, 5, &cancel)
            .await
            .unwrap();
        assert_eq!(read_all(&service, "docs/new.txt", &cancel).await, b"hello");
    }

    #[tokio::test]
    async fn test_oversized_append_sends_nothing() {
        let transport = Arc::new(MemoryTransport::new());
        let service = service_over(&transport);
        let buffer = vec![0u8; MAX_BLOCK_SIZE + 1];
        let err = service
            .append_file("docs/big", &buffer, 0, buffer.len(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::Adapter { status: 413, .. }));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_append_range_outside_buffer() {
        let transport = Arc::new(MemoryTransport::new());
        let service = service_over(&transport);
        let err = service
            .append_file("docs/f", b"abc", 2, 5, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::Argument { .. }));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_container_directory() {
        let (_transport, service, cancel) = setup().await;
        service
            .save_file("docs/a.txt", source(b"a"), &cancel)
            .await
            .unwrap();
        service.delete_directory("docs", &cancel).await.unwrap();
        assert!(!service.directory_exists("docs", &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_empty_prefix_is_not_found() {
        let (_transport, service, cancel) = setup().await;
        let err = service
            .delete_directory("docs/emptyprefix", &cancel)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_prefix_removes_subtree_only() {
        let (_transport, service, cancel) = setup().await;
        for path in ["docs/tmp/a", "docs/tmp/b/c", "docs/tmpfile", "docs/keep/d"] {
            service.save_file(path, source(b"x"), &cancel).await.unwrap();
        }
        service.delete_directory("docs/tmp", &cancel).await.unwrap();

        assert!(!service.file_exists("docs/tmp/a", &cancel).await.unwrap());
        assert!(!service.file_exists("docs/tmp/b/c", &cancel).await.unwrap());
        assert!(service.file_exists("docs/tmpfile", &cancel).await.unwrap());
        assert!(service.file_exists("docs/keep/d", &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_prefix_keeps_going_past_a_failure() {
        let (transport, service, cancel) = setup().await;
        for path in ["docs/tmp/a", "docs/tmp/b", "docs/tmp/c"] {
            service.save_file(path, source(b"x"), &cancel).await.unwrap();
        }
        transport.fail_delete("docs", "tmp/b").await;

        let err = service.delete_directory("docs/tmp", &cancel).await.unwrap_err();
        assert!(matches!(err, FsError::Adapter { status: 500, .. }));
        assert!(!service.file_exists("docs/tmp/a", &cancel).await.unwrap());
        assert!(service.file_exists("docs/tmp/b", &cancel).await.unwrap());
        assert!(!service.file_exists("docs/tmp/c", &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_names_with_trailing_space_survive_listing() {
        let (_transport, service, cancel) = setup().await;
        service
            .save_file("docs/tmp/a ", source(b"x"), &cancel)
            .await
            .unwrap();

        let names: Vec<String> = service
            .get_files("docs/tmp", &cancel)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a ".to_string()]);

        service.delete_directory("docs/tmp", &cancel).await.unwrap();
        assert!(!service.file_exists("docs/tmp/a ", &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_directory_exists() {
        let (_transport, service, cancel) = setup().await;
        assert!(service.directory_exists("", &cancel).await.unwrap());
        assert!(service.directory_exists("docs", &cancel).await.unwrap());
        assert!(service.directory_exists("docs/never/written", &cancel).await.unwrap());
        assert!(!service.directory_exists("other", &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_directory_only_materialises_container() {
        let transport = Arc::new(MemoryTransport::new());
        let service = service_over(&transport);
        let cancel = CancellationToken::new();

        service.create_directory("", &cancel).await.unwrap();
        assert_eq!(transport.request_count(), 0);

        service.create_directory("media/2024/june", &cancel).await.unwrap();
        service.create_directory("media", &cancel).await.unwrap();
        assert!(service.directory_exists("media", &cancel).await.unwrap());
        assert!(service
            .get_directories("media", &cancel)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_file_exists() {
        let (_transport, service, cancel) = setup().await;
        assert!(!service.file_exists("docs/missing", &cancel).await.unwrap());
        assert!(!service.file_exists("docs", &cancel).await.unwrap());
        assert!(!service.file_exists("", &cancel).await.unwrap());
        service.save_file("docs/here", source(b"1"), &cancel).await.unwrap();
        assert!(service.file_exists("docs/here", &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_file() {
        let (_transport, service, cancel) = setup().await;
        service
            .save_file("docs/reports/q1.csv", source(b"a,b,c\n"), &cancel)
            .await
            .unwrap();

        let file = service.get_file("docs/reports/q1.csv", &cancel).await.unwrap();
        assert_eq!(file.path, "docs/reports/q1.csv");
        assert_eq!(file.name, "q1.csv");
        assert_eq!(file.size, 6);
        assert_eq!(file.blob_type, "BlockBlob");
        assert!(file.last_modified.is_some());

        let err = service.get_file("docs/reports/q2.csv", &cancel).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_file_operations_reject_directory_paths() {
        let (_transport, service, cancel) = setup().await;
        assert!(matches!(
            service.get_file("docs", &cancel).await,
            Err(FsError::Argument { .. })
        ));
        assert!(matches!(
            service.delete_file("", &cancel).await,
            Err(FsError::Argument { .. })
        ));
        assert!(matches!(
            service.save_file("docs/", source(b"x"), &cancel).await,
            Err(FsError::Argument { .. })
        ));
    }

    #[tokio::test]
    async fn test_delete_file() {
        let (_transport, service, cancel) = setup().await;
        service.save_file("docs/gone", source(b"1"), &cancel).await.unwrap();
        service.delete_file("docs/gone", &cancel).await.unwrap();
        let err = service.delete_file("docs/gone", &cancel).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_get_files_excludes_nested() {
        let (_transport, service, cancel) = setup().await;
        for path in ["docs/a.txt", "docs/b.txt", "docs/sub/c.txt", "docs/sub/deeper/d.txt"] {
            service.save_file(path, source(b"x"), &cancel).await.unwrap();
        }

        let top: Vec<String> = service
            .get_files("docs", &cancel)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(top, vec!["docs/a.txt", "docs/b.txt"]);

        let sub: Vec<String> = service
            .get_files("docs/sub", &cancel)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(sub, vec!["c.txt"]);

        assert!(service.get_files("", &cancel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_directories() {
        let (_transport, service, cancel) = setup().await;
        service.create_directory("archive", &cancel).await.unwrap();
        for path in ["docs/2023/a", "docs/2024/q1/b", "docs/2024/q2/c", "docs/top"] {
            service.save_file(path, source(b"x"), &cancel).await.unwrap();
        }

        let root = service.get_directories("", &cancel).await.unwrap();
        let names: Vec<&str> = root.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["archive", "docs"]);

        let years = service.get_directories("docs", &cancel).await.unwrap();
        assert_eq!(
            years,
            vec![
                DirectoryEntity {
                    path: "docs/2023".to_string(),
                    name: "2023".to_string()
                },
                DirectoryEntity {
                    path: "docs/2024".to_string(),
                    name: "2024".to_string()
                },
            ]
        );

        let quarters = service.get_directories("docs/2024", &cancel).await.unwrap();
        let names: Vec<&str> = quarters.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["q1", "q2"]);
    }

    #[tokio::test]
    async fn test_listing_missing_container_is_not_found() {
        let (_transport, service, cancel) = setup().await;
        let err = service.get_files("nowhere/sub", &cancel).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_custom_separator() {
        let transport = Arc::new(MemoryTransport::new());
        let mut config = transport.endpoint_config();
        config.separator = '\\';
        let service = AzureBlobService::new(&config, transport.clone()).unwrap();
        let cancel = CancellationToken::new();

        service.create_directory("docs", &cancel).await.unwrap();
        service
            .save_file("docs\\a\\b.txt", source(b"x"), &cancel)
            .await
            .unwrap();

        let files = service.get_files("docs\\a", &cancel).await.unwrap();
        assert_eq!(files[0].path, "docs\\a\\b.txt");
        let dirs = service.get_directories("docs", &cancel).await.unwrap();
        assert_eq!(dirs[0].path, "docs\\a");
        assert!(service
            .client()
            .list_blobs("docs", "a/", None, &cancel)
            .await
            .unwrap()
            .iter()
            .any(|b| b.name == "a/b.txt"));
    }

    #[tokio::test]
    async fn test_wrong_key_is_unauthorized() {
        let transport = Arc::new(MemoryTransport::new());
        let mut config = transport.endpoint_config();
        config.account_key = "c29tZSBvdGhlciBrZXk=".to_string();
        let service = AzureBlobService::new(&config, transport).unwrap();

        let err = service
            .directory_exists("docs", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::Unauthorized { .. }));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let transport = Arc::new(MemoryTransport::new());
        let mut config = transport.endpoint_config();
        config.account = String::new();
        assert!(matches!(
            AzureBlobService::new(&config, transport),
            Err(FsError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_dispatch() {
        let (transport, service, _) = setup().await;
        let before = transport.request_count();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = service.get_files("docs", &cancel).await.unwrap_err();
        assert!(matches!(err, FsError::Cancelled));
        let err = service
            .save_file("docs/x", source(b"x"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::Cancelled));
        assert_eq!(transport.request_count(), before);
    }

    /// Answers every request with a body that sends one chunk and then
    /// never finishes.
    struct StalledBody;

    impl Transport for StalledBody {
        fn send(
            &self,
            _request: crate::transport::BlobRequest,
        ) -> BoxFuture<'_, FsResult<crate::transport::BlobResponse>> {
            Box::pin(async {
                let body = futures::stream::once(async { Ok(bytes::Bytes::from_static(b"abc")) })
                    .chain(futures::stream::pending())
                    .boxed();
                Ok(crate::transport::BlobResponse {
                    status: http::StatusCode::OK,
                    headers: HeaderMap::new(),
                    body,
                })
            })
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_stalled_read() {
        let config = MemoryTransport::new().endpoint_config();
        let service = AzureBlobService::new(&config, Arc::new(StalledBody)).unwrap();
        let cancel = CancellationToken::new();

        let mut reader = service.read_file("docs/slow", &cancel).await.unwrap();
        let mut head = [0u8; 3];
        reader.read_exact(&mut head).await.unwrap();
        assert_eq!(&head, b"abc");

        cancel.cancel();
        let mut rest = [0u8; 16];
        let err = tokio::time::timeout(Duration::from_secs(5), reader.read(&mut rest))
            .await
            .expect("read should observe the cancelled token")
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Interrupted);
    }

    #[tokio::test]
    async fn test_usable_as_trait_object() {
        let (_transport, service, cancel) = setup().await;
        let fs: Arc<dyn BlobFileSystem> = Arc::new(service);

        fs.save_file("docs/t.txt", source(b"abc"), &cancel).await.unwrap();
        fs.append_file("docs/t.txt", b"def", 0, 3, &cancel).await.unwrap();
        assert_eq!(fs.get_file("docs/t.txt", &cancel).await.unwrap().size, 6);
        assert_eq!(fs.get_files("docs", &cancel).await.unwrap().len(), 1);

        let mut out = String::new();
        fs.read_file("docs/t.txt", &cancel)
            .await
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert_eq!(out, "abcdef");

        fs.delete_file("docs/t.txt", &cancel).await.unwrap();
        assert!(!fs.file_exists("docs/t.txt", &cancel).await.unwrap());
    }
}
