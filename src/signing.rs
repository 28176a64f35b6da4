//! Azure Shared Key request signing.
//!
//! Implements the Shared Key authorization scheme:
//! `Authorization: SharedKey {account}:{signature}`
//!
//! The string-to-sign format:
//! ```text
//! VERB\n
//! Content-Encoding\n
//! Content-Language\n
//! Content-Length\n
//! Content-MD5\n
//! Content-Type\n
//! Date\n
//! If-Modified-Since\n
//! If-Match\n
//! If-None-Match\n
//! If-Unmodified-Since\n
//! Range\n
//! CanonicalizedHeaders\n
//! CanonicalizedResource
//! ```
//!
//! Signing is a pure function of the request, the account name and the
//! key. It must run last, once every header is attached.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use http::header::{self, HeaderValue};
use http::HeaderMap;
use reqwest::Url;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::crypto::HmacProvider;
use crate::errors::{FsError, FsResult};
use crate::transport::BlobRequest;

/// Headers with this (lower-cased) prefix take part in canonicalization.
pub const CUSTOM_HEADER_PREFIX: &str = "x-ms-";

/// Computes Shared Key signatures for one storage account.
#[derive(Clone)]
pub struct SharedKeySigner {
    account: String,
    key: Vec<u8>,
    hmac: Arc<dyn HmacProvider>,
}

impl fmt::Debug for SharedKeySigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeySigner")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

impl SharedKeySigner {
    /// `key` is the decoded account key.
    pub fn new(account: impl Into<String>, key: Vec<u8>, hmac: Arc<dyn HmacProvider>) -> Self {
        Self {
            account: account.into().trim().to_string(),
            key,
            hmac,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Build the canonical string for `request`.
    pub fn string_to_sign(&self, request: &BlobRequest) -> String {
        let content_length = if request.body.is_empty() {
            String::new()
        } else {
            request.body.len().to_string()
        };

        let method = request.method.as_str().to_uppercase();
        let standard = [
            method.as_str(),
            request.header_str(header::CONTENT_ENCODING.as_str()),
            request.header_str(header::CONTENT_LANGUAGE.as_str()),
            content_length.as_str(),
            request.header_str("content-md5"),
            request.header_str(header::CONTENT_TYPE.as_str()),
            request.header_str(header::DATE.as_str()),
            request.header_str(header::IF_MODIFIED_SINCE.as_str()),
            request.header_str(header::IF_MATCH.as_str()),
            request.header_str(header::IF_NONE_MATCH.as_str()),
            request.header_str(header::IF_UNMODIFIED_SINCE.as_str()),
            request.header_str(header::RANGE.as_str()),
        ];

        format!(
            "{}\n{}\n{}",
            standard.join("\n"),
            canonicalized_headers(&request.headers),
            canonicalized_resource(&self.account, &request.url)
        )
    }

    /// Base64 HMAC-SHA256 of the string-to-sign.
    pub fn signature(&self, request: &BlobRequest) -> String {
        let string_to_sign = self.string_to_sign(request);
        let digest = self.hmac.hmac_sha256(&self.key, string_to_sign.as_bytes());
        BASE64_STANDARD.encode(digest)
    }

    /// Full `Authorization` header value for `request`.
    pub fn authorization(&self, request: &BlobRequest) -> String {
        format!("SharedKey {}:{}", self.account, self.signature(request))
    }

    /// Attach the `Authorization` header. Any existing one is replaced.
    pub fn sign(&self, request: &mut BlobRequest) -> FsResult<()> {
        let value = HeaderValue::from_str(&self.authorization(request)).map_err(|e| {
            FsError::configuration(format!("account name is not a valid header value: {e}"))
        })?;
        request.headers.insert(header::AUTHORIZATION, value);
        Ok(())
    }
}

/// Build the canonicalized headers block.
///
/// Only `x-ms-*` headers count. The first value seen for a name wins,
/// names are sorted ascending, and values have newlines folded to a
/// space and surrounding whitespace trimmed.
pub fn canonicalized_headers(headers: &HeaderMap) -> String {
    let mut selected: BTreeMap<&str, String> = BTreeMap::new();
    for (name, value) in headers.iter() {
        let name = name.as_str();
        if !name.starts_with(CUSTOM_HEADER_PREFIX) {
            continue;
        }
        selected.entry(name).or_insert_with(|| {
            String::from_utf8_lossy(value.as_bytes())
                .replace("\r\n", " ")
                .replace('\n', " ")
                .trim()
                .to_string()
        });
    }

    selected
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the canonicalized resource block.
///
/// `/{account}{path}`, then one `key:v1,v2` line per query key. Query
/// pairs are unescaped and sorted as whole `key=value` strings before
/// they are grouped by lower-cased key, so duplicate keys list their
/// values in that sorted order.
pub fn canonicalized_resource(account: &str, url: &Url) -> String {
    let mut resource = format!("/{}{}", account.trim(), url.path());

    let mut pairs: Vec<String> = url
        .query_pairs()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    if pairs.is_empty() {
        return resource;
    }
    pairs.sort();

    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for pair in &pairs {
        let (key, value) = pair.split_once('=').unwrap_or((pair.as_str(), ""));
        let key = key.to_lowercase();
        match groups.iter_mut().find(|(name, _)| *name == key) {
            Some((_, values)) => values.push(value.to_string()),
            None => groups.push((key, vec![value.to_string()])),
        }
    }

    for (key, values) in &groups {
        resource.push('\n');
        resource.push_str(key);
        resource.push(':');
        resource.push_str(&values.join(","));
    }
    resource
}
