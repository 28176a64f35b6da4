//! blobfs library: a virtual filesystem over the Azure Blob Storage REST
//! API.
//!
//! Logical paths (`container/dir/file`) are resolved onto containers and
//! blob keys, requests are signed with the account's Shared Key, listings
//! are paginated to completion and content is written as block blobs.
//! [`service::AzureBlobService`] is the entry point; it implements the
//! [`filesystem::BlobFileSystem`] capability.

pub mod client;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod filesystem;
pub mod listing;
pub mod metrics;
pub mod path;
pub mod service;
pub mod signing;
pub mod transport;
pub mod upload;
pub mod xml;

pub use errors::{FsError, FsResult};
pub use filesystem::{BlobFileSystem, ByteReader, ContainerHandle, DirectoryEntity, FileEntity};
pub use service::AzureBlobService;
