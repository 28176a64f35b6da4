//! Send-request-get-response primitive.
//!
//! The [`Transport`] trait is the only thing the adapter needs from an
//! HTTP stack. [`remote::ReqwestTransport`] talks to a real endpoint;
//! [`memory::MemoryTransport`] emulates the blob service in-process.

pub mod memory;
pub mod remote;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Url;

use crate::errors::{FsError, FsResult};

/// Streaming response body.
pub type BodyStream = BoxStream<'static, std::io::Result<Bytes>>;

/// An outgoing request. Headers are final once the client has signed it.
#[derive(Debug, Clone)]
pub struct BlobRequest {
    pub method: http::Method,
    pub url: Url,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl BlobRequest {
    /// Build a request with no headers and an empty body.
    pub fn new(method: http::Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: http::HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Value of header `name` as a string, or empty when absent.
    pub fn header_str(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }
}

/// A backend response with a lazily-read body.
pub struct BlobResponse {
    pub status: http::StatusCode,
    pub headers: http::HeaderMap,
    pub body: BodyStream,
}

impl std::fmt::Debug for BlobResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl BlobResponse {
    /// Response whose body is already in memory.
    pub fn from_bytes(
        status: http::StatusCode,
        headers: http::HeaderMap,
        body: impl Into<Bytes>,
    ) -> Self {
        let body: Bytes = body.into();
        Self {
            status,
            headers,
            body: stream::once(async move { Ok(body) }).boxed(),
        }
    }

    /// Value of header `name` as a string, if present and ASCII.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Drain the body into memory.
    pub async fn bytes(mut self) -> FsResult<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk.map_err(|e| FsError::Transport(e.to_string()))?);
        }
        Ok(buf.freeze())
    }
}

/// Dispatches one request and returns the backend's response, whatever
/// its status. Status classification happens above this layer.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: BlobRequest) -> BoxFuture<'_, FsResult<BlobResponse>>;
}
