//! Configuration loading and types for blobfs.
//!
//! Settings are read from a YAML file and deserialized into [`Config`].
//! The `storage` section is the immutable endpoint description every
//! service instance is built from; `logging` only matters to binaries.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::Deserialize;
use std::path::Path;

use crate::errors::{FsError, FsResult};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Blob storage endpoint and credentials.
    #[serde(default)]
    pub storage: StorageEndpointConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Public access level applied to newly created containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerAccess {
    /// No anonymous access.
    #[default]
    Private,
    /// Anonymous read access to blobs only.
    Blob,
    /// Anonymous read access to blobs and container listings.
    Container,
}

impl ContainerAccess {
    /// Value for the `x-ms-blob-public-access` header, if one is sent.
    pub fn header_value(self) -> Option<&'static str> {
        match self {
            ContainerAccess::Private => None,
            ContainerAccess::Blob => Some("blob"),
            ContainerAccess::Container => Some("container"),
        }
    }
}

/// Endpoint, credentials and protocol settings for one storage account.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageEndpointConfig {
    /// Storage account name.
    #[serde(default)]
    pub account: String,

    /// Base64-encoded account key.
    #[serde(default, alias = "key")]
    pub account_key: String,

    /// Endpoint template; `{protocol}` and `{account}` are substituted.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Value of the `x-ms-version` header.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Use `https` instead of `http`.
    #[serde(default = "default_true")]
    pub use_https: bool,

    /// Separator used in logical paths.
    #[serde(default = "default_separator")]
    pub separator: char,

    /// Access level for containers this adapter creates.
    #[serde(default)]
    pub container_access: ContainerAccess,

    /// Attach an `x-ms-client-request-id` to every request.
    #[serde(default = "default_true")]
    pub send_client_request_id: bool,

    /// Whole-request timeout for the HTTP transport, in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for StorageEndpointConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            account_key: String::new(),
            endpoint: default_endpoint(),
            api_version: default_api_version(),
            use_https: default_true(),
            separator: default_separator(),
            container_access: ContainerAccess::default(),
            send_client_request_id: default_true(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl StorageEndpointConfig {
    /// Settings for `account` with the default public endpoint.
    pub fn new(account: impl Into<String>, account_key: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            account_key: account_key.into(),
            ..Self::default()
        }
    }

    /// Parse an Azure connection string.
    ///
    /// Recognises `AccountName`, `AccountKey`, `DefaultEndpointsProtocol`
    /// and `BlobEndpoint`. Unknown keys are ignored.
    pub fn from_connection_string(conn_str: &str) -> FsResult<Self> {
        let mut config = Self::default();
        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                return Err(FsError::configuration(format!(
                    "malformed connection string segment: {part}"
                )));
            };
            match key {
                "AccountName" => config.account = value.to_string(),
                "AccountKey" => config.account_key = value.to_string(),
                "DefaultEndpointsProtocol" => config.use_https = value != "http",
                "BlobEndpoint" => {
                    config.use_https = value.starts_with("https://");
                    config.endpoint = value
                        .replacen("https://", "{protocol}://", 1)
                        .replacen("http://", "{protocol}://", 1)
                        .trim_end_matches('/')
                        .to_string();
                }
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Override credentials from the environment.
    ///
    /// `AZURE_STORAGE_CONNECTION_STRING` replaces account, key and endpoint;
    /// `AZURE_STORAGE_ACCOUNT` and `AZURE_STORAGE_KEY` replace single fields.
    pub fn apply_env_overrides(&mut self) -> FsResult<()> {
        if let Ok(conn_str) = std::env::var("AZURE_STORAGE_CONNECTION_STRING") {
            let parsed = Self::from_connection_string(&conn_str)?;
            self.account = parsed.account;
            self.account_key = parsed.account_key;
            self.endpoint = parsed.endpoint;
            self.use_https = parsed.use_https;
        }
        if let Ok(account) = std::env::var("AZURE_STORAGE_ACCOUNT") {
            self.account = account;
        }
        if let Ok(key) = std::env::var("AZURE_STORAGE_KEY") {
            self.account_key = key;
        }
        Ok(())
    }

    /// Check that the settings can drive a service.
    pub fn validate(&self) -> FsResult<()> {
        if self.account.trim().is_empty() {
            return Err(FsError::configuration("storage account name is empty"));
        }
        self.key_bytes()?;
        if self.api_version.trim().is_empty() {
            return Err(FsError::configuration("API version is empty"));
        }
        if self.separator.is_control() {
            return Err(FsError::configuration(
                "directory separator must be a printable character",
            ));
        }
        reqwest::Url::parse(&self.endpoint_url()).map_err(|e| {
            FsError::configuration(format!("invalid endpoint {}: {}", self.endpoint_url(), e))
        })?;
        Ok(())
    }

    /// Decoded account key, the HMAC secret.
    pub fn key_bytes(&self) -> FsResult<Vec<u8>> {
        if self.account_key.is_empty() {
            return Err(FsError::configuration("storage account key is empty"));
        }
        BASE64_STANDARD
            .decode(self.account_key.trim())
            .map_err(|e| FsError::configuration(format!("account key is not valid base64: {e}")))
    }

    /// Endpoint with the template placeholders filled in, without a
    /// trailing slash.
    pub fn endpoint_url(&self) -> String {
        let protocol = if self.use_https { "https" } else { "http" };
        self.endpoint
            .replace("{protocol}", protocol)
            .replace("{account}", self.account.trim())
            .trim_end_matches('/')
            .to_string()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_endpoint() -> String {
    "{protocol}://{account}.blob.core.windows.net".to_string()
}

fn default_api_version() -> String {
    "2019-12-12".to_string()
}

fn default_separator() -> char {
    '/'
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const KEY: &str = "Eby8vdM02xNOcqFlqUwJPLlmEtlCDXJ1OUzFT50uSRZ6IFsuFq2UVErCz4I6tq/K1SZFPTOtr/KBHBeksoGMGw==";

    #[test]
    fn test_defaults() {
        let config = StorageEndpointConfig::default();
        assert_eq!(config.separator, '/');
        assert!(config.use_https);
        assert_eq!(config.container_access, ContainerAccess::Private);
        assert_eq!(config.api_version, "2019-12-12");
    }

    #[test]
    fn test_endpoint_template_substitution() {
        let mut config = StorageEndpointConfig::new("acct", KEY);
        assert_eq!(config.endpoint_url(), "https://acct.blob.core.windows.net");
        config.use_https = false;
        config.endpoint = "{protocol}://127.0.0.1:10000/{account}/".to_string();
        assert_eq!(config.endpoint_url(), "http://127.0.0.1:10000/acct");
    }

    #[test]
    fn test_validate_rejects_empty_account() {
        let config = StorageEndpointConfig::new("", KEY);
        assert!(matches!(
            config.validate(),
            Err(FsError::Configuration { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_key() {
        let config = StorageEndpointConfig::new("acct", "not base64!!");
        assert!(matches!(
            config.validate(),
            Err(FsError::Configuration { .. })
        ));
    }

    #[test]
    fn test_validate_accepts_good_config() {
        StorageEndpointConfig::new("acct", KEY).validate().unwrap();
    }

    #[test]
    fn test_connection_string() {
        let conn = format!(
            "DefaultEndpointsProtocol=http;AccountName=devstoreaccount1;AccountKey={KEY};BlobEndpoint=http://127.0.0.1:10000/devstoreaccount1;"
        );
        let config = StorageEndpointConfig::from_connection_string(&conn).unwrap();
        assert_eq!(config.account, "devstoreaccount1");
        assert_eq!(config.account_key, KEY);
        assert!(!config.use_https);
        assert_eq!(
            config.endpoint_url(),
            "http://127.0.0.1:10000/devstoreaccount1"
        );
    }

    #[test]
    fn test_connection_string_missing_key() {
        let err = StorageEndpointConfig::from_connection_string("AccountName=a").unwrap_err();
        assert!(matches!(err, FsError::Configuration { .. }));
    }

    #[test]
    fn test_container_access_header() {
        assert_eq!(ContainerAccess::Private.header_value(), None);
        assert_eq!(ContainerAccess::Blob.header_value(), Some("blob"));
        assert_eq!(ContainerAccess::Container.header_value(), Some("container"));
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "storage:\n  account: acct\n  account_key: \"{KEY}\"\n  separator: \"\\\\\"\n  container_access: blob\nlogging:\n  level: debug\n"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.storage.account, "acct");
        assert_eq!(config.storage.separator, '\\');
        assert_eq!(config.storage.container_access, ContainerAccess::Blob);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "text");
        config.storage.validate().unwrap();
    }
}
