//! Object storage abstraction.
//!
//! The [`ObjectStore`] trait is the cloud-provider SDK seam: the native
//! package engine, the credential-only backend, and the cloud client handle
//! all go through it. Implementations:
//!
//! - [`s3::S3Store`]: S3 REST API with SigV4 signing.
//! - [`memory::MemoryStore`]: in-process store for tests and dry runs.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod credentials;
pub mod memory;
pub mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;

use crate::models::RawBucket;

/// Errors raised by an [`ObjectStore`]. Backends translate these into
/// [`OpsError`](crate::error::OpsError); they never cross the `Ops` boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no object at s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("access denied to s3://{bucket}/{key}")]
    AccessDenied { bucket: String, key: String },

    #[error("S3 {operation} failed (HTTP {status}): {body}")]
    Http {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("S3 request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed S3 response: {0}")]
    Malformed(String),

    #[error("invalid object location '{0}'")]
    InvalidLocation(String),
}

/// `s3://bucket/key[?versionId=...]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
    pub version_id: Option<String>,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            version_id: None,
        }
    }

    /// Parse an `s3://` URI. The key may be empty (bucket root) or end in
    /// `/` (a prefix).
    pub fn parse(uri: &str) -> Result<Self, StoreError> {
        let rest = uri
            .trim()
            .strip_prefix("s3://")
            .ok_or_else(|| StoreError::InvalidLocation(uri.to_string()))?;
        let (path, version_id) = match rest.split_once("?versionId=") {
            Some((p, v)) if !v.is_empty() => (p, Some(v.to_string())),
            Some((p, _)) => (p, None),
            None => (rest, None),
        };
        let (bucket, key) = path.split_once('/').unwrap_or((path, ""));
        if bucket.is_empty() {
            return Err(StoreError::InvalidLocation(uri.to_string()));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id,
        })
    }

    /// Whether this location names a prefix rather than a single object.
    pub fn is_prefix(&self) -> bool {
        self.key.is_empty() || self.key.ends_with('/')
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)?;
        if let Some(ref v) = self.version_id {
            write!(f, "?versionId={}", v)?;
        }
        Ok(())
    }
}

/// Metadata for one stored object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectInfo {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

/// One page-merged listing result.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub objects: Vec<ObjectInfo>,
    /// Prefixes rolled up by the delimiter, each ending in the delimiter.
    pub common_prefixes: Vec<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read an object's bytes.
    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>, StoreError>;

    /// Read an object's metadata.
    async fn head(&self, location: &ObjectLocation) -> Result<ObjectInfo, StoreError>;

    /// Write an object. Never retried.
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError>;

    /// Server-side copy. Returns the destination location, carrying the new
    /// version id when the bucket is versioned. Never retried.
    async fn copy(
        &self,
        source: &ObjectLocation,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectLocation, StoreError>;

    /// List everything under `prefix`, following pagination. With a
    /// delimiter, keys below the next delimiter roll up into
    /// [`Listing::common_prefixes`].
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<Listing, StoreError>;

    /// List buckets visible to the credentials, as raw records.
    async fn list_buckets(&self) -> Result<Vec<RawBucket>, StoreError>;
}
