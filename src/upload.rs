//! Chunked block-blob uploads.
//!
//! Content is written as a sequence of Put Block calls followed by one
//! Put Block List that commits the manifest:
//!   `save_blob()`   -> delete, Put Blob (empty), Put Block per chunk, commit
//!   `append_blob()` -> Get Block List (committed), Put Block, commit old + new
//!
//! Block IDs are base64 of 16 random bytes, so every ID has the same
//! length. Uniqueness is probabilistic; there is no collision check.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::Method;
use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{header_value, BlobClient};
use crate::errors::{FsError, FsResult};
use crate::metrics;
use crate::xml::{self, BlockEntry};

/// Largest block this crate uploads, in bytes.
pub const MAX_BLOCK_SIZE: usize = 4_000_000;

/// Fresh random block identifier.
pub fn generate_block_id() -> String {
    BASE64_STANDARD.encode(rand::random::<[u8; 16]>())
}

/// Reject a single write larger than one block. No request is issued.
pub fn check_block_size(count: usize) -> FsResult<()> {
    if count > MAX_BLOCK_SIZE {
        return Err(FsError::Adapter {
            status: 413,
            reason: format!("append of {count} bytes exceeds the {MAX_BLOCK_SIZE} byte block limit"),
        });
    }
    Ok(())
}

/// Base64 MD5 digest, the `Content-MD5` header format.
fn content_md5(data: &[u8]) -> String {
    BASE64_STANDARD.encode(Md5::digest(data))
}

/// Read up to [`MAX_BLOCK_SIZE`] bytes. An empty result means the source
/// is exhausted.
async fn read_chunk<R>(source: &mut R, cancel: &CancellationToken) -> FsResult<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut chunk = Vec::new();
    let mut limited = (&mut *source).take(MAX_BLOCK_SIZE as u64);
    let read = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = limited.read_to_end(&mut chunk) => Some(result),
    };
    match read {
        None => Err(FsError::Cancelled),
        Some(result) => {
            result?;
            Ok(Bytes::from(chunk))
        }
    }
}

impl BlobClient {
    /// Put Block: stage `data` under a new ID and return the ID.
    pub async fn put_block(
        &self,
        container: &str,
        blob_key: &str,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> FsResult<String> {
        let block_id = generate_block_id();
        let mut request = self.request(
            Method::PUT,
            container,
            blob_key,
            &[("comp", "block"), ("blockid", &block_id)],
        )?;
        request
            .headers
            .insert("content-md5", header_value(&content_md5(&data))?);
        let size = data.len();
        request.body = data;

        self.send(request, cancel).await?;
        metrics::record_block_upload(size);
        debug!("Staged block {} ({} bytes) on {}/{}", block_id, size, container, blob_key);
        Ok(block_id)
    }

    /// Put Block List: commit `block_ids` in order, each as `<Latest>`.
    pub async fn put_block_list(
        &self,
        container: &str,
        blob_key: &str,
        block_ids: &[String],
        cancel: &CancellationToken,
    ) -> FsResult<()> {
        let mut request =
            self.request(Method::PUT, container, blob_key, &[("comp", "blocklist")])?;
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
        request.body = Bytes::from(xml::render_block_list(block_ids));

        self.send(request, cancel).await?;
        debug!(
            "Committed {} blocks on {}/{}",
            block_ids.len(),
            container,
            blob_key
        );
        Ok(())
    }

    /// Get Block List, committed blocks only.
    pub async fn get_committed_blocks(
        &self,
        container: &str,
        blob_key: &str,
        cancel: &CancellationToken,
    ) -> FsResult<Vec<BlockEntry>> {
        let request = self.request(
            Method::GET,
            container,
            blob_key,
            &[("comp", "blocklist"), ("blocklisttype", "committed")],
        )?;
        let body = self.send(request, cancel).await?.bytes().await?;
        xml::parse_committed_blocks(&body)
    }

    /// Replace the blob with everything `source` yields.
    ///
    /// The old blob is deleted and an empty one created first, so an empty
    /// source still leaves a zero-length blob behind. Blocks are committed
    /// in read order.
    pub async fn save_blob<R>(
        &self,
        container: &str,
        blob_key: &str,
        source: &mut R,
        cancel: &CancellationToken,
    ) -> FsResult<()>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        match self.delete_blob(container, blob_key, cancel).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.put_empty_blob(container, blob_key, cancel).await?;

        let mut block_ids = Vec::new();
        let mut total = 0usize;
        loop {
            let chunk = read_chunk(source, cancel).await?;
            if chunk.is_empty() {
                break;
            }
            total += chunk.len();
            block_ids.push(self.put_block(container, blob_key, chunk, cancel).await?);
        }

        self.put_block_list(container, blob_key, &block_ids, cancel)
            .await?;
        debug!(
            "Saved {}/{}: {} bytes in {} blocks",
            container,
            blob_key,
            total,
            block_ids.len()
        );
        Ok(())
    }

    /// Append `data` to the blob as one new block.
    ///
    /// The committed manifest is extended, never rewritten: existing
    /// blocks keep their IDs and order. A missing blob is created with
    /// `data` as its entire content.
    pub async fn append_blob(
        &self,
        container: &str,
        blob_key: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> FsResult<()> {
        check_block_size(data.len())?;

        let committed = match self.get_committed_blocks(container, blob_key, cancel).await {
            Ok(blocks) => blocks,
            Err(e) if e.is_not_found() => {
                debug!("{}/{} does not exist, saving instead of appending", container, blob_key);
                let mut source = data;
                return self.save_blob(container, blob_key, &mut source, cancel).await;
            }
            Err(e) => return Err(e),
        };
        if data.is_empty() {
            return Ok(());
        }

        let block_id = self
            .put_block(container, blob_key, Bytes::copy_from_slice(data), cancel)
            .await?;
        let mut block_ids: Vec<String> = committed.into_iter().map(|b| b.id).collect();
        block_ids.push(block_id);
        self.put_block_list(container, blob_key, &block_ids, cancel)
            .await
    }
}
