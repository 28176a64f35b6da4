//! Marker-driven pagination over the List Containers and List Blobs
//! operations.
//!
//! Every listing follows the same loop: request a page with the current
//! marker, accumulate its entries, repeat with the returned marker until
//! the service hands back an empty one.

use chrono::{DateTime, Utc};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::BlobClient;
use crate::errors::{FsError, FsResult};
use crate::filesystem::ContainerHandle;
use crate::xml;

/// Upper bound on pages fetched by one listing. A service that keeps
/// returning markers past this is treated as misbehaving.
pub const MAX_PAGES: usize = 10_000;

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Continuation marker; empty on the last page.
    pub next_marker: String,
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            next_marker: String::new(),
        }
    }
}

/// A blob as reported by List Blobs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlobItem {
    /// Full blob key.
    pub name: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub blob_type: String,
}

/// One page of List Blobs output: blob entries and, under a delimiter,
/// the common prefixes.
#[derive(Debug, Clone, Default)]
pub struct BlobListPage {
    pub blobs: Vec<BlobItem>,
    pub prefixes: Vec<String>,
    pub next_marker: String,
}

/// Drain a paged listing, starting from an empty marker.
///
/// Items come back in page order. Stops when a page carries an empty
/// marker; fails after [`MAX_PAGES`] pages.
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> FsResult<Vec<T>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = FsResult<Page<T>>>,
{
    let mut items = Vec::new();
    let mut marker = String::new();
    for _ in 0..MAX_PAGES {
        let page = fetch(marker).await?;
        items.extend(page.items);
        if page.next_marker.is_empty() {
            return Ok(items);
        }
        marker = page.next_marker;
    }
    Err(FsError::malformed(format!(
        "listing still returned a continuation marker after {MAX_PAGES} pages"
    )))
}

impl BlobClient {
    /// Fetch one List Containers page.
    pub async fn list_container_page(
        &self,
        marker: &str,
        cancel: &CancellationToken,
    ) -> FsResult<Page<ContainerHandle>> {
        let mut query = vec![("comp", "list")];
        if !marker.is_empty() {
            query.push(("marker", marker));
        }
        let request = self.request(http::Method::GET, "", "", &query)?;
        let body = self.send(request, cancel).await?.bytes().await?;
        xml::parse_container_list(&body)
    }

    /// Every container in the account.
    pub async fn list_containers(
        &self,
        cancel: &CancellationToken,
    ) -> FsResult<Vec<ContainerHandle>> {
        let containers =
            collect_pages(move |marker| async move { self.list_container_page(&marker, cancel).await })
                .await?;
        debug!("Listed {} containers", containers.len());
        Ok(containers)
    }

    /// Fetch one List Blobs page.
    pub async fn list_blob_page(
        &self,
        container: &str,
        prefix: &str,
        delimiter: Option<&str>,
        marker: &str,
        cancel: &CancellationToken,
    ) -> FsResult<BlobListPage> {
        let mut query = vec![("restype", "container"), ("comp", "list")];
        if !prefix.is_empty() {
            query.push(("prefix", prefix));
        }
        if let Some(delimiter) = delimiter {
            query.push(("delimiter", delimiter));
        }
        if !marker.is_empty() {
            query.push(("marker", marker));
        }
        let request = self.request(http::Method::GET, container, "", &query)?;
        let body = self.send(request, cancel).await?.bytes().await?;
        xml::parse_blob_list(&body)
    }

    /// Every blob under `prefix`. With a delimiter only the blobs directly
    /// at that level are returned; without one, the whole subtree.
    pub async fn list_blobs(
        &self,
        container: &str,
        prefix: &str,
        delimiter: Option<&str>,
        cancel: &CancellationToken,
    ) -> FsResult<Vec<BlobItem>> {
        let blobs = collect_pages(move |marker| async move {
            let page = self
                .list_blob_page(container, prefix, delimiter, &marker, cancel)
                .await?;
            Ok(Page {
                items: page.blobs,
                next_marker: page.next_marker,
            })
        })
        .await?;
        debug!(
            "Listed {} blobs in {} under '{}'",
            blobs.len(),
            container,
            prefix
        );
        Ok(blobs)
    }

    /// Every common prefix one level below `prefix`, each ending in
    /// `delimiter`.
    pub async fn list_blob_prefixes(
        &self,
        container: &str,
        prefix: &str,
        delimiter: &str,
        cancel: &CancellationToken,
    ) -> FsResult<Vec<String>> {
        collect_pages(move |marker| async move {
            let page = self
                .list_blob_page(container, prefix, Some(delimiter), &marker, cancel)
                .await?;
            Ok(Page {
                items: page.prefixes,
                next_marker: page.next_marker,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::RustCryptoHmac;
    use crate::transport::memory::MemoryTransport;
    use std::sync::Arc;

    fn page(items: &[u32], next_marker: &str) -> Page<u32> {
        Page {
            items: items.to_vec(),
            next_marker: next_marker.to_string(),
        }
    }

    #[tokio::test]
    async fn test_collect_pages_follows_markers() {
        let mut seen = Vec::new();
        let items = collect_pages(|marker| {
            seen.push(marker.clone());
            async move {
                Ok(match marker.as_str() {
                    "" => page(&[1, 2], "m1"),
                    "m1" => page(&[], "m2"),
                    "m2" => page(&[3], ""),
                    other => panic!("unexpected marker {other}"),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(seen, vec!["", "m1", "m2"]);
    }

    #[tokio::test]
    async fn test_collect_pages_single_page() {
        let items = collect_pages(|_| async { Ok(page(&[7], "")) }).await.unwrap();
        assert_eq!(items, vec![7]);
    }

    #[tokio::test]
    async fn test_collect_pages_propagates_errors() {
        let err = collect_pages(|marker| async move {
            if marker.is_empty() {
                Ok(page(&[1], "next"))
            } else {
                Err(FsError::Transport("connection reset".into()))
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, FsError::Transport(_)));
    }

    #[tokio::test]
    async fn test_collect_pages_bounded() {
        let mut calls = 0usize;
        let err = collect_pages(|_| {
            calls += 1;
            async { Ok(page(&[], "again")) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, FsError::MalformedResponse { .. }));
        assert_eq!(calls, MAX_PAGES);
    }

    #[tokio::test]
    async fn test_list_blobs_across_pages() {
        let transport = Arc::new(MemoryTransport::new());
        transport.set_page_size(2);
        let client =
            BlobClient::new(&transport.endpoint_config(), transport.clone(), Arc::new(RustCryptoHmac))
                .unwrap();
        let cancel = CancellationToken::new();

        client.create_container("docs", &cancel).await.unwrap();
        for key in ["a/1", "a/2", "a/3", "a/sub/4", "a/sub/5", "a/deep/x/6", "b"] {
            client.put_empty_blob("docs", key, &cancel).await.unwrap();
        }

        let all = client.list_blobs("docs", "a/", None, &cancel).await.unwrap();
        let names: Vec<&str> = all.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["a/1", "a/2", "a/3", "a/deep/x/6", "a/sub/4", "a/sub/5"]
        );

        let files = client
            .list_blobs("docs", "a/", Some("/"), &cancel)
            .await
            .unwrap();
        assert_eq!(files.len(), 3);

        let prefixes = client
            .list_blob_prefixes("docs", "a/", "/", &cancel)
            .await
            .unwrap();
        assert_eq!(prefixes, vec!["a/deep/", "a/sub/"]);
    }

    #[tokio::test]
    async fn test_list_containers_across_pages() {
        let transport = Arc::new(MemoryTransport::new());
        transport.set_page_size(1);
        let client =
            BlobClient::new(&transport.endpoint_config(), transport.clone(), Arc::new(RustCryptoHmac))
                .unwrap();
        let cancel = CancellationToken::new();

        for name in ["gamma", "alpha", "beta"] {
            client.create_container(name, &cancel).await.unwrap();
        }
        let names: Vec<String> = client
            .list_containers(&cancel)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }
}
