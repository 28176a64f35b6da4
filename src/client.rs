//! Signed request dispatch against the Blob REST API.
//!
//! [`BlobClient`] owns the endpoint, the signer and the transport. Every
//! request goes through [`BlobClient::send`], which stamps `x-ms-date`,
//! fills in client-wide default headers, signs the final header set,
//! dispatches under a cancellation token and classifies the status.
//!
//! URL shape: `{endpoint}/{container}[/{blob}][?query]`.

use bytes::Bytes;
use http::header::HeaderValue;
use http::{HeaderMap, Method};
use reqwest::Url;
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{ContainerAccess, StorageEndpointConfig};
use crate::crypto::HmacProvider;
use crate::errors::{FsError, FsResult};
use crate::metrics;
use crate::signing::SharedKeySigner;
use crate::transport::{BlobRequest, BlobResponse, Transport};

/// Percent-encoding set for container and blob names: encode everything
/// except unreserved characters and '/'.
const BLOB_PATH_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Percent-encoding set for query values: unreserved characters only.
const QUERY_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

pub const HEADER_DATE: &str = "x-ms-date";
pub const HEADER_VERSION: &str = "x-ms-version";
pub const HEADER_CLIENT_REQUEST_ID: &str = "x-ms-client-request-id";
pub const HEADER_BLOB_TYPE: &str = "x-ms-blob-type";
pub const HEADER_PUBLIC_ACCESS: &str = "x-ms-blob-public-access";

/// Signed HTTP access to one storage account.
pub struct BlobClient {
    endpoint: String,
    default_headers: HeaderMap,
    send_client_request_id: bool,
    container_access: ContainerAccess,
    signer: SharedKeySigner,
    transport: Arc<dyn Transport>,
}

impl BlobClient {
    /// Build a client from validated settings.
    pub fn new(
        config: &StorageEndpointConfig,
        transport: Arc<dyn Transport>,
        hmac: Arc<dyn HmacProvider>,
    ) -> FsResult<Self> {
        config.validate()?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(HEADER_VERSION, header_value(&config.api_version)?);

        Ok(Self {
            endpoint: config.endpoint_url(),
            default_headers,
            send_client_request_id: config.send_client_request_id,
            container_access: config.container_access,
            signer: SharedKeySigner::new(config.account.clone(), config.key_bytes()?, hmac),
            transport,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn account(&self) -> &str {
        self.signer.account()
    }

    /// Build the URL for a container/blob pair. An empty container
    /// addresses the service root.
    pub fn url(&self, container: &str, blob_key: &str, query: &[(&str, &str)]) -> FsResult<Url> {
        let mut url = if container.is_empty() {
            format!("{}/", self.endpoint)
        } else {
            format!("{}/{}", self.endpoint, encode_path(container))
        };
        if !blob_key.is_empty() {
            url.push('/');
            url.push_str(&encode_path(blob_key));
        }
        if !query.is_empty() {
            let query = query
                .iter()
                .map(|(k, v)| {
                    format!(
                        "{}={}",
                        k,
                        percent_encoding::utf8_percent_encode(v, &QUERY_ENCODE_SET)
                    )
                })
                .collect::<Vec<_>>()
                .join("&");
            url.push('?');
            url.push_str(&query);
        }
        Url::parse(&url).map_err(|e| FsError::argument(format!("invalid resource URL {url}: {e}")))
    }

    /// Start a request for a container/blob pair.
    pub fn request(
        &self,
        method: Method,
        container: &str,
        blob_key: &str,
        query: &[(&str, &str)],
    ) -> FsResult<BlobRequest> {
        Ok(BlobRequest::new(method, self.url(container, blob_key, query)?))
    }

    /// Timestamp, sign and dispatch `request`.
    ///
    /// Cancellation is checked before dispatch and raced against the
    /// in-flight request. Non-success statuses are mapped with
    /// [`FsError::from_status`]; there are no retries.
    pub async fn send(
        &self,
        mut request: BlobRequest,
        cancel: &CancellationToken,
    ) -> FsResult<BlobResponse> {
        if cancel.is_cancelled() {
            return Err(FsError::Cancelled);
        }

        let date = httpdate::fmt_http_date(SystemTime::now());
        request.headers.insert(HEADER_DATE, header_value(&date)?);
        for (name, value) in self.default_headers.iter() {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }
        if self.send_client_request_id {
            let id = uuid::Uuid::new_v4().to_string();
            request
                .headers
                .insert(HEADER_CLIENT_REQUEST_ID, header_value(&id)?);
        }

        self.signer.sign(&mut request)?;

        let method = request.method.clone();
        let resource = request.url.path().to_string();
        let url = request.url.to_string();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Cancelled {} {}", method, url);
                return Err(FsError::Cancelled);
            }
            response = self.transport.send(request) => response?,
        };

        debug!("{} {} -> {}", method, url, response.status);
        metrics::record_request(method.as_str(), response.status.as_u16());

        if !response.status.is_success() {
            return Err(FsError::from_status(response.status, &resource));
        }
        Ok(response)
    }

    // -- Blob REST API operations ---------------------------------------------

    /// Get Container Properties.
    pub async fn get_container_properties(
        &self,
        container: &str,
        cancel: &CancellationToken,
    ) -> FsResult<HeaderMap> {
        let request = self.request(Method::GET, container, "", &[("restype", "container")])?;
        Ok(self.send(request, cancel).await?.headers)
    }

    /// Whether `container` exists. A 404 becomes `false`.
    pub async fn container_exists(
        &self,
        container: &str,
        cancel: &CancellationToken,
    ) -> FsResult<bool> {
        match self.get_container_properties(container, cancel).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create Container, applying the configured public access level.
    pub async fn create_container(
        &self,
        container: &str,
        cancel: &CancellationToken,
    ) -> FsResult<()> {
        let mut request = self.request(Method::PUT, container, "", &[("restype", "container")])?;
        if let Some(access) = self.container_access.header_value() {
            request
                .headers
                .insert(HEADER_PUBLIC_ACCESS, HeaderValue::from_static(access));
        }
        self.send(request, cancel).await?;
        Ok(())
    }

    /// Delete Container. Every blob inside goes with it.
    pub async fn delete_container(
        &self,
        container: &str,
        cancel: &CancellationToken,
    ) -> FsResult<()> {
        let request = self.request(Method::DELETE, container, "", &[("restype", "container")])?;
        self.send(request, cancel).await?;
        Ok(())
    }

    /// Get Blob Properties (HEAD). The response carries headers only.
    pub async fn get_blob_properties(
        &self,
        container: &str,
        blob_key: &str,
        cancel: &CancellationToken,
    ) -> FsResult<HeaderMap> {
        let request = self.request(Method::HEAD, container, blob_key, &[])?;
        Ok(self.send(request, cancel).await?.headers)
    }

    /// Get Blob. The body is left unread for the caller to stream.
    pub async fn get_blob(
        &self,
        container: &str,
        blob_key: &str,
        cancel: &CancellationToken,
    ) -> FsResult<BlobResponse> {
        let request = self.request(Method::GET, container, blob_key, &[])?;
        self.send(request, cancel).await
    }

    /// Delete Blob.
    pub async fn delete_blob(
        &self,
        container: &str,
        blob_key: &str,
        cancel: &CancellationToken,
    ) -> FsResult<()> {
        let request = self.request(Method::DELETE, container, blob_key, &[])?;
        self.send(request, cancel).await?;
        Ok(())
    }

    /// Put Blob with an empty body, creating or truncating a block blob.
    pub async fn put_empty_blob(
        &self,
        container: &str,
        blob_key: &str,
        cancel: &CancellationToken,
    ) -> FsResult<()> {
        let mut request = self.request(Method::PUT, container, blob_key, &[])?;
        request
            .headers
            .insert(HEADER_BLOB_TYPE, HeaderValue::from_static("BlockBlob"));
        request.body = Bytes::new();
        self.send(request, cancel).await?;
        Ok(())
    }
}

/// Build a header value from a runtime string.
pub(crate) fn header_value(value: &str) -> FsResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| FsError::argument(format!("invalid header value {value:?}: {e}")))
}

fn encode_path(path: &str) -> String {
    percent_encoding::utf8_percent_encode(path, &BLOB_PATH_ENCODE_SET).to_string()
}
