//! [`Transport`] over a shared `reqwest` client.

use futures::future::BoxFuture;
use futures::TryStreamExt;
use std::time::Duration;
use tracing::info;

use super::{BlobRequest, BlobResponse, Transport};
use crate::errors::{FsError, FsResult};

/// Sends requests to a real blob endpoint. The connection pool is shared
/// by every call.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> FsResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FsError::configuration(format!("failed to create HTTP client: {e}")))?;
        info!("HTTP transport initialized: timeout={}s", timeout.as_secs());
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: BlobRequest) -> BoxFuture<'_, FsResult<BlobResponse>> {
        Box::pin(async move {
            let response = self
                .client
                .request(request.method, request.url)
                .headers(request.headers)
                .body(request.body)
                .send()
                .await?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes_stream().map_err(std::io::Error::other);
            Ok(BlobResponse {
                status,
                headers,
                body: Box::pin(body),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_with_timeout() {
        ReqwestTransport::new(Duration::from_secs(5)).unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
        let url = reqwest::Url::parse("http://127.0.0.1:1/container?restype=container").unwrap();
        let err = transport
            .send(BlobRequest::new(http::Method::GET, url))
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::Transport(_)));
    }
}
