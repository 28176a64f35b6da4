//! In-process blob service emulator.
//!
//! Speaks the subset of the Blob REST API this crate produces: container
//! create/properties/delete/list, blob put/get/head/delete/list, and the
//! Put Block / Put Block List / Get Block List trio. Every request is
//! checked against the SharedKey signature the real service would expect.
//!
//! State lives in `tokio::sync::RwLock<BTreeMap<...>>` maps. A blob that
//! has only uncommitted blocks is invisible until its list is committed.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use http::{HeaderMap, StatusCode};
use md5::{Digest, Md5};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{BlobRequest, BlobResponse, Transport};
use crate::config::StorageEndpointConfig;
use crate::crypto::RustCryptoHmac;
use crate::errors::{FsError, FsResult};
use crate::filesystem::ContainerHandle;
use crate::listing::BlobItem;
use crate::signing::SharedKeySigner;
use crate::xml::{self, BlobListEntry, BlockEntry, BlockRef};

/// Well-known development storage account.
pub const DEV_ACCOUNT: &str = "devstoreaccount1";

/// Well-known development storage account key.
pub const DEV_ACCOUNT_KEY: &str =
    "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

const DEFAULT_PAGE_SIZE: usize = 5000;

struct CommittedBlob {
    content: Bytes,
    /// Manifest in commit order. Empty for blobs written by Put Blob.
    blocks: Vec<(String, Bytes)>,
    last_modified: DateTime<Utc>,
}

#[derive(Default)]
struct StoredBlob {
    committed: Option<CommittedBlob>,
    uncommitted: HashMap<String, Bytes>,
}

struct StoredContainer {
    blobs: BTreeMap<String, StoredBlob>,
    last_modified: DateTime<Utc>,
}

/// [`Transport`] backed by an in-memory blob service.
pub struct MemoryTransport {
    account: String,
    account_key: String,
    signer: SharedKeySigner,
    containers: tokio::sync::RwLock<BTreeMap<String, StoredContainer>>,
    requests: AtomicUsize,
    page_size: AtomicUsize,
    last_request: tokio::sync::Mutex<Option<BlobRequest>>,
    failing_deletes: tokio::sync::RwLock<HashSet<(String, String)>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// Emulator for the development account.
    pub fn new() -> Self {
        Self::with_credentials(DEV_ACCOUNT, DEV_ACCOUNT_KEY)
            .expect("development account key is valid base64")
    }

    /// Emulator accepting requests signed with `account_key` (base64).
    pub fn with_credentials(account: &str, account_key: &str) -> FsResult<Self> {
        let key = BASE64_STANDARD
            .decode(account_key)
            .map_err(|e| FsError::configuration(format!("account key is not valid base64: {e}")))?;
        Ok(Self {
            account: account.to_string(),
            account_key: account_key.to_string(),
            signer: SharedKeySigner::new(account, key, Arc::new(RustCryptoHmac)),
            containers: tokio::sync::RwLock::new(BTreeMap::new()),
            requests: AtomicUsize::new(0),
            page_size: AtomicUsize::new(DEFAULT_PAGE_SIZE),
            last_request: tokio::sync::Mutex::new(None),
            failing_deletes: tokio::sync::RwLock::new(HashSet::new()),
        })
    }

    /// Settings that point a client at this emulator.
    pub fn endpoint_config(&self) -> StorageEndpointConfig {
        StorageEndpointConfig {
            endpoint: "{protocol}://{account}.blob.memory.test".to_string(),
            use_https: false,
            ..StorageEndpointConfig::new(self.account.clone(), self.account_key.clone())
        }
    }

    /// Requests received so far, including rejected ones.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Maximum entries per listing page.
    pub fn set_page_size(&self, page_size: usize) {
        self.page_size.store(page_size.max(1), Ordering::SeqCst);
    }

    /// The most recent request, as received.
    pub async fn last_request(&self) -> Option<BlobRequest> {
        self.last_request.lock().await.clone()
    }

    /// Make Delete Blob on `container/blob_key` answer 500 from now on.
    pub async fn fail_delete(&self, container: &str, blob_key: &str) {
        self.failing_deletes
            .write()
            .await
            .insert((container.to_string(), blob_key.to_string()));
    }

    async fn handle(&self, request: BlobRequest) -> BlobResponse {
        self.requests.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().await = Some(request.clone());

        if request.header_str("authorization") != self.signer.authorization(&request) {
            debug!("Signature mismatch for {} {}", request.method, request.url);
            return error_response(StatusCode::UNAUTHORIZED, "AuthenticationFailed");
        }

        let (container, blob_key) = split_path(request.url.path());
        let query: HashMap<String, String> = request.url.query_pairs().into_owned().collect();
        let comp = query.get("comp").map(String::as_str).unwrap_or("");
        let restype = query.get("restype").map(String::as_str).unwrap_or("");
        let method = request.method.as_str();

        if container.is_empty() {
            return match (method, comp) {
                ("GET", "list") => self.list_containers(&query).await,
                _ => error_response(StatusCode::BAD_REQUEST, "UnsupportedHttpVerb"),
            };
        }

        if blob_key.is_empty() {
            if restype != "container" {
                return error_response(StatusCode::BAD_REQUEST, "InvalidQueryParameterValue");
            }
            return match (method, comp) {
                ("PUT", "") => self.create_container(&container).await,
                ("GET", "") | ("HEAD", "") => self.container_properties(&container).await,
                ("DELETE", "") => self.delete_container(&container).await,
                ("GET", "list") => self.list_blobs(&container, &query).await,
                _ => error_response(StatusCode::BAD_REQUEST, "UnsupportedHttpVerb"),
            };
        }

        match (method, comp) {
            ("PUT", "") => self.put_blob(&container, &blob_key, &request).await,
            ("PUT", "block") => {
                let block_id = query.get("blockid").cloned().unwrap_or_default();
                self.put_block(&container, &blob_key, block_id, &request)
                    .await
            }
            ("PUT", "blocklist") => {
                self.put_block_list(&container, &blob_key, &request.body)
                    .await
            }
            ("GET", "blocklist") => self.get_block_list(&container, &blob_key).await,
            ("GET", "") => self.get_blob(&container, &blob_key, true).await,
            ("HEAD", "") => self.get_blob(&container, &blob_key, false).await,
            ("DELETE", "") => self.delete_blob(&container, &blob_key).await,
            _ => error_response(StatusCode::BAD_REQUEST, "UnsupportedHttpVerb"),
        }
    }

    // ── Containers ──────────────────────────────────────────────────

    async fn create_container(&self, name: &str) -> BlobResponse {
        let mut containers = self.containers.write().await;
        if containers.contains_key(name) {
            return error_response(StatusCode::CONFLICT, "ContainerAlreadyExists");
        }
        containers.insert(
            name.to_string(),
            StoredContainer {
                blobs: BTreeMap::new(),
                last_modified: Utc::now(),
            },
        );
        empty_response(StatusCode::CREATED)
    }

    async fn container_properties(&self, name: &str) -> BlobResponse {
        let containers = self.containers.read().await;
        match containers.get(name) {
            Some(container) => {
                let mut headers = HeaderMap::new();
                headers.insert(LAST_MODIFIED, text_header(&http_date(container.last_modified)));
                headers.insert(ETAG, text_header(&etag(container.last_modified)));
                BlobResponse::from_bytes(StatusCode::OK, headers, Bytes::new())
            }
            None => error_response(StatusCode::NOT_FOUND, "ContainerNotFound"),
        }
    }

    async fn delete_container(&self, name: &str) -> BlobResponse {
        match self.containers.write().await.remove(name) {
            Some(_) => empty_response(StatusCode::ACCEPTED),
            None => error_response(StatusCode::NOT_FOUND, "ContainerNotFound"),
        }
    }

    async fn list_containers(&self, query: &HashMap<String, String>) -> BlobResponse {
        let containers = self.containers.read().await;
        let marker = query.get("marker").map(String::as_str).unwrap_or("");
        let prefix = query.get("prefix").map(String::as_str).unwrap_or("");
        let handles: Vec<ContainerHandle> = containers
            .iter()
            .filter(|(name, _)| name.starts_with(prefix) && name.as_str() >= marker)
            .map(|(name, container)| ContainerHandle {
                name: name.clone(),
                properties: xml::properties_map(&[
                    ("Last-Modified", http_date(container.last_modified).as_str()),
                    ("Etag", etag(container.last_modified).as_str()),
                ]),
            })
            .collect();

        let page_size = self.page_len(query);
        let next_marker = handles
            .get(page_size)
            .map(|c| c.name.clone())
            .unwrap_or_default();
        let page = &handles[..handles.len().min(page_size)];

        let body = xml::render_container_list(&self.service_endpoint(), page, &next_marker);
        xml_response(body)
    }

    // ── Blobs ───────────────────────────────────────────────────────

    async fn list_blobs(&self, container: &str, query: &HashMap<String, String>) -> BlobResponse {
        let containers = self.containers.read().await;
        let Some(stored) = containers.get(container) else {
            return error_response(StatusCode::NOT_FOUND, "ContainerNotFound");
        };
        let prefix = query.get("prefix").map(String::as_str).unwrap_or("");
        let delimiter = query.get("delimiter").map(String::as_str).unwrap_or("");
        let marker = query.get("marker").map(String::as_str).unwrap_or("");

        // Keys sharing a prefix are contiguous in key order, so collapsing
        // into common prefixes only needs to look at the previous entry.
        let mut items: Vec<BlobItem> = Vec::new();
        let mut entries: Vec<(String, Option<usize>)> = Vec::new();
        for (key, blob) in stored.blobs.range(prefix.to_string()..) {
            if !key.starts_with(prefix) {
                break;
            }
            let Some(committed) = &blob.committed else {
                continue;
            };
            let rest = &key[prefix.len()..];
            match rest.find(delimiter).filter(|_| !delimiter.is_empty()) {
                Some(at) => {
                    let common = format!("{}{}", prefix, &rest[..at + delimiter.len()]);
                    if entries.last().map(|(name, _)| name) != Some(&common) {
                        entries.push((common, None));
                    }
                }
                None => {
                    items.push(BlobItem {
                        name: key.clone(),
                        size: committed.content.len() as u64,
                        last_modified: Some(committed.last_modified),
                        blob_type: "BlockBlob".to_string(),
                    });
                    entries.push((key.clone(), Some(items.len() - 1)));
                }
            }
        }

        let entries: Vec<&(String, Option<usize>)> = entries
            .iter()
            .filter(|(name, _)| name.as_str() >= marker)
            .collect();
        let page_size = self.page_len(query);
        let next_marker = entries
            .get(page_size)
            .map(|(name, _)| name.clone())
            .unwrap_or_default();
        let page: Vec<BlobListEntry<'_>> = entries
            .iter()
            .take(page_size)
            .map(|(name, item)| match item {
                Some(index) => BlobListEntry::Blob(&items[*index]),
                None => BlobListEntry::Prefix(name.as_str()),
            })
            .collect();

        let body = xml::render_blob_list(
            &self.service_endpoint(),
            container,
            prefix,
            delimiter,
            &page,
            &next_marker,
        );
        xml_response(body)
    }

    async fn put_blob(&self, container: &str, key: &str, request: &BlobRequest) -> BlobResponse {
        if request.header_str("x-ms-blob-type") != "BlockBlob" {
            return error_response(StatusCode::BAD_REQUEST, "InvalidBlobType");
        }
        let mut containers = self.containers.write().await;
        let Some(stored) = containers.get_mut(container) else {
            return error_response(StatusCode::NOT_FOUND, "ContainerNotFound");
        };
        stored.blobs.insert(
            key.to_string(),
            StoredBlob {
                committed: Some(CommittedBlob {
                    content: request.body.clone(),
                    blocks: Vec::new(),
                    last_modified: Utc::now(),
                }),
                uncommitted: HashMap::new(),
            },
        );
        empty_response(StatusCode::CREATED)
    }

    async fn put_block(
        &self,
        container: &str,
        key: &str,
        block_id: String,
        request: &BlobRequest,
    ) -> BlobResponse {
        if block_id.is_empty() || BASE64_STANDARD.decode(&block_id).is_err() {
            return error_response(StatusCode::BAD_REQUEST, "InvalidQueryParameterValue");
        }
        let md5 = request.header_str("content-md5");
        if !md5.is_empty() && md5 != BASE64_STANDARD.encode(Md5::digest(&request.body)) {
            return error_response(StatusCode::BAD_REQUEST, "Md5Mismatch");
        }
        let mut containers = self.containers.write().await;
        let Some(stored) = containers.get_mut(container) else {
            return error_response(StatusCode::NOT_FOUND, "ContainerNotFound");
        };
        stored
            .blobs
            .entry(key.to_string())
            .or_default()
            .uncommitted
            .insert(block_id, request.body.clone());
        empty_response(StatusCode::CREATED)
    }

    async fn put_block_list(&self, container: &str, key: &str, body: &[u8]) -> BlobResponse {
        let Ok(refs) = xml::parse_block_list_request(body) else {
            return error_response(StatusCode::BAD_REQUEST, "InvalidXmlDocument");
        };
        let mut containers = self.containers.write().await;
        let Some(stored) = containers.get_mut(container) else {
            return error_response(StatusCode::NOT_FOUND, "ContainerNotFound");
        };
        let blob = stored.blobs.entry(key.to_string()).or_default();

        let mut blocks = Vec::with_capacity(refs.len());
        for (kind, id) in refs {
            let committed = || {
                blob.committed
                    .as_ref()
                    .and_then(|c| c.blocks.iter().find(|(bid, _)| *bid == id))
                    .map(|(_, data)| data.clone())
            };
            let data = match kind {
                BlockRef::Uncommitted => blob.uncommitted.get(&id).cloned(),
                BlockRef::Committed => committed(),
                BlockRef::Latest => blob.uncommitted.get(&id).cloned().or_else(committed),
            };
            match data {
                Some(data) => blocks.push((id, data)),
                None => return error_response(StatusCode::BAD_REQUEST, "InvalidBlockList"),
            }
        }

        let mut content = BytesMut::new();
        for (_, data) in &blocks {
            content.extend_from_slice(data);
        }
        blob.committed = Some(CommittedBlob {
            content: content.freeze(),
            blocks,
            last_modified: Utc::now(),
        });
        blob.uncommitted.clear();
        empty_response(StatusCode::CREATED)
    }

    async fn get_block_list(&self, container: &str, key: &str) -> BlobResponse {
        let containers = self.containers.read().await;
        let Some(committed) = committed_blob(&containers, container, key) else {
            return error_response(StatusCode::NOT_FOUND, "BlobNotFound");
        };
        let entries: Vec<BlockEntry> = committed
            .blocks
            .iter()
            .map(|(id, data)| BlockEntry {
                id: id.clone(),
                size: data.len() as u64,
            })
            .collect();
        xml_response(xml::render_committed_block_list(&entries))
    }

    async fn get_blob(&self, container: &str, key: &str, with_body: bool) -> BlobResponse {
        let containers = self.containers.read().await;
        let Some(committed) = committed_blob(&containers, container, key) else {
            return error_response(StatusCode::NOT_FOUND, "BlobNotFound");
        };
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(committed.content.len()));
        headers.insert(LAST_MODIFIED, text_header(&http_date(committed.last_modified)));
        headers.insert(ETAG, text_header(&etag(committed.last_modified)));
        headers.insert("x-ms-blob-type", HeaderValue::from_static("BlockBlob"));
        let body = if with_body {
            committed.content.clone()
        } else {
            Bytes::new()
        };
        BlobResponse::from_bytes(StatusCode::OK, headers, body)
    }

    async fn delete_blob(&self, container: &str, key: &str) -> BlobResponse {
        let target = (container.to_string(), key.to_string());
        if self.failing_deletes.read().await.contains(&target) {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "InternalError");
        }
        let mut containers = self.containers.write().await;
        let Some(stored) = containers.get_mut(container) else {
            return error_response(StatusCode::NOT_FOUND, "ContainerNotFound");
        };
        match stored.blobs.get(key) {
            Some(blob) if blob.committed.is_some() => {
                stored.blobs.remove(key);
                empty_response(StatusCode::ACCEPTED)
            }
            _ => error_response(StatusCode::NOT_FOUND, "BlobNotFound"),
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn page_len(&self, query: &HashMap<String, String>) -> usize {
        let page_size = self.page_size.load(Ordering::SeqCst);
        query
            .get("maxresults")
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .map_or(page_size, |n| n.min(page_size))
    }

    fn service_endpoint(&self) -> String {
        format!("http://{}.blob.memory.test/", self.account)
    }
}

impl Transport for MemoryTransport {
    fn send(&self, request: BlobRequest) -> BoxFuture<'_, FsResult<BlobResponse>> {
        Box::pin(async move { Ok(self.handle(request).await) })
    }
}

fn committed_blob<'a>(
    containers: &'a BTreeMap<String, StoredContainer>,
    container: &str,
    key: &str,
) -> Option<&'a CommittedBlob> {
    containers
        .get(container)?
        .blobs
        .get(key)?
        .committed
        .as_ref()
}

/// Split `/container/blob/key` into decoded container and blob key.
fn split_path(path: &str) -> (String, String) {
    let decode = |s: &str| percent_encoding::percent_decode_str(s).decode_utf8_lossy().into_owned();
    let path = path.strip_prefix('/').unwrap_or(path);
    match path.split_once('/') {
        Some((container, key)) => (decode(container), decode(key)),
        None => (decode(path), String::new()),
    }
}

fn http_date(dt: DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn etag(dt: DateTime<Utc>) -> String {
    format!("\"0x{:X}\"", dt.timestamp_nanos_opt().unwrap_or_default())
}

fn text_header(value: &str) -> HeaderValue {
    HeaderValue::from_str(value).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn empty_response(status: StatusCode) -> BlobResponse {
    BlobResponse::from_bytes(status, HeaderMap::new(), Bytes::new())
}

fn xml_response(body: String) -> BlobResponse {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
    BlobResponse::from_bytes(StatusCode::OK, headers, body)
}

fn error_response(status: StatusCode, code: &'static str) -> BlobResponse {
    let mut headers = HeaderMap::new();
    headers.insert("x-ms-error-code", HeaderValue::from_static(code));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/xml"));
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><Error><Code>{code}</Code></Error>"
    );
    BlobResponse::from_bytes(status, headers, body)
}
