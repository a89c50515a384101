//! Domain value objects returned by every backend.
//!
//! These are immutable once constructed and hold no reference back to the
//! backend that produced them. Identity-bearing types validate their parts
//! at construction so that a descriptor with an empty name, registry, or
//! hash can never escape a backend.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::{OpsError, OpsResult};

/// Free-form user metadata attached to a package revision.
pub type UserMeta = Map<String, Value>;

/// The sentinel used when the remote source omits optional metadata.
pub const UNKNOWN: &str = "unknown";

// ═══════════════════════════════════════════════════════════════════════
// Backend / auth descriptors
// ═══════════════════════════════════════════════════════════════════════

/// The closed set of backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Native client library + local session.
    Library,
    /// Remote GraphQL endpoint + bearer token.
    PlatformApi,
    /// Bare cloud credentials, read-path only.
    CredentialOnly,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Library => "library",
            BackendKind::PlatformApi => "platform-api",
            BackendKind::CredentialOnly => "credential-only",
        })
    }
}

/// Authentication modality tag carried by an [`AuthSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Modality {
    LibrarySession,
    BearerToken,
    CredentialOnly,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::LibrarySession => "library-session",
            Modality::BearerToken => "bearer-token",
            Modality::CredentialOnly => "credential-only",
        }
    }
}

/// AWS access key material.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Opaque credential handle. Secrets never appear in `Debug` output.
#[derive(Clone)]
pub enum CredentialHandle {
    Bearer(String),
    Session(String),
    Aws(AwsCredentials),
}

impl CredentialHandle {
    /// The token to send as `Authorization: Bearer`, if this handle has one.
    pub fn bearer(&self) -> Option<&str> {
        match self {
            CredentialHandle::Bearer(t) | CredentialHandle::Session(t) => Some(t),
            CredentialHandle::Aws(_) => None,
        }
    }
}

impl fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialHandle::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            CredentialHandle::Session(_) => f.write_str("Session(<redacted>)"),
            CredentialHandle::Aws(c) => f.debug_tuple("Aws").field(c).finish(),
        }
    }
}

/// Authentication descriptor for one logical request.
///
/// Built by the resolver, owned by the backend it resolved, never cached
/// beyond that backend's lifetime.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub modality: Modality,
    /// Registry or catalog endpoint this session talks to.
    pub endpoint: String,
    pub credential: CredentialHandle,
    /// JWT subject, when the bearer token decoded as a JWT.
    pub subject: Option<String>,
    /// JWT expiry, when the bearer token decoded as a JWT.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn new(modality: Modality, endpoint: impl Into<String>, credential: CredentialHandle) -> Self {
        Self {
            modality,
            endpoint: endpoint.into(),
            credential,
            subject: None,
            expires_at: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry URIs and package names
// ═══════════════════════════════════════════════════════════════════════

/// An object-storage location backing a set of package revisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Registry {
    bucket: String,
}

impl Registry {
    /// Parse `s3://bucket` or a bare bucket name.
    pub fn parse(raw: &str) -> OpsResult<Self> {
        let trimmed = raw.trim();
        let rest = match trimmed.split_once("://") {
            Some(("s3", rest)) => rest,
            Some((scheme, _)) => {
                return Err(OpsError::validation(
                    "registry",
                    format!("unsupported scheme '{}' in '{}'", scheme, raw),
                ))
            }
            None => trimmed,
        };
        let bucket = rest.trim_end_matches('/');
        if bucket.is_empty() {
            return Err(OpsError::validation("registry", format!("empty bucket in '{}'", raw)));
        }
        if bucket.contains('/') {
            return Err(OpsError::validation(
                "registry",
                format!("registry must be a bucket, not a path: '{}'", raw),
            ));
        }
        if !bucket
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        {
            return Err(OpsError::validation(
                "registry",
                format!("'{}' is not a valid bucket name", bucket),
            ));
        }
        Ok(Self {
            bucket: bucket.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn uri(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}", self.bucket)
    }
}

/// A validated `namespace/name` package handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageName(String);

impl PackageName {
    pub fn parse(raw: &str) -> OpsResult<Self> {
        let segment_ok = |s: &str| {
            !s.is_empty()
                && s
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        match raw.split_once('/') {
            Some((ns, name)) if segment_ok(ns) && segment_ok(name) => Ok(Self(raw.to_string())),
            _ => Err(OpsError::validation(
                "package_name",
                format!("expected 'namespace/name', got '{}'", raw),
            )),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical URI of a package revision: `pkg+s3://bucket#package=ns/name@hash`.
pub fn package_uri(bucket: &str, name: &str, hash: &str) -> String {
    format!("pkg+s3://{}#package={}@{}", bucket, name, hash)
}

// ═══════════════════════════════════════════════════════════════════════
// Descriptors
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PackageDescriptor {
    pub name: String,
    pub registry: String,
    pub hash: String,
    pub size: u64,
    pub entry_count: u64,
    pub message: Option<String>,
    pub user_meta: UserMeta,
}

impl PackageDescriptor {
    /// Build a descriptor, refusing empty identity fields.
    pub fn new(name: &str, registry: &Registry, hash: &str) -> OpsResult<Self> {
        if hash.trim().is_empty() {
            return Err(OpsError::validation(
                "hash",
                format!("package '{}' has no revision hash", name),
            ));
        }
        let name = PackageName::parse(name)?;
        Ok(Self {
            name: name.0,
            registry: registry.uri(),
            hash: hash.to_string(),
            size: 0,
            entry_count: 0,
            message: None,
            user_meta: UserMeta::new(),
        })
    }

    pub fn uri(&self) -> String {
        package_uri(
            self.registry.trim_start_matches("s3://"),
            &self.name,
            &self.hash,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentDescriptor {
    pub logical_key: String,
    pub physical_key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Access a caller has to a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessLevel {
    ReadWrite,
    ReadOnly,
    Unknown,
}

impl AccessLevel {
    /// Parse loosely; anything unrecognised is [`AccessLevel::Unknown`].
    pub fn from_loose(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("read-write" | "readwrite" | "write" | "rw") => AccessLevel::ReadWrite,
            Some("read-only" | "readonly" | "read" | "ro") => AccessLevel::ReadOnly,
            _ => AccessLevel::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketDescriptor {
    pub name: String,
    pub region: String,
    pub access: AccessLevel,
}

/// A bucket record as reported by some remote source, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawBucket {
    pub name: Option<String>,
    pub region: Option<String>,
    pub access: Option<String>,
}

/// Normalize a remote bucket record.
///
/// Missing region or access level fall back to [`UNKNOWN`]; a missing
/// name is the only condition that rejects the record.
pub fn normalize_bucket(raw: RawBucket) -> OpsResult<BucketDescriptor> {
    let name = raw
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| OpsError::validation("bucket", "bucket record has no name"))?;
    let region = raw
        .region
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string());
    Ok(BucketDescriptor {
        name,
        region,
        access: AccessLevel::from_loose(raw.access.as_deref()),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreationResult {
    pub package_name: String,
    pub registry: String,
    pub hash: String,
    pub catalog_url: String,
    pub entries_added: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub modified: Vec<String>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }
}

/// How object bytes reach the registry on create/update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyMode {
    All,
    SameBucket,
    None,
}

impl CopyMode {
    pub fn parse(raw: &str) -> OpsResult<Self> {
        match raw {
            "all" => Ok(CopyMode::All),
            "same_bucket" => Ok(CopyMode::SameBucket),
            "none" => Ok(CopyMode::None),
            other => Err(OpsError::validation(
                "copy_mode",
                format!("'{}' is not one of all, same_bucket, none", other),
            )),
        }
    }

    /// Whether an object living in `source_bucket` is copied into `registry_bucket`.
    pub fn copies(&self, source_bucket: &str, registry_bucket: &str) -> bool {
        match self {
            CopyMode::All => true,
            CopyMode::SameBucket => source_bucket == registry_bucket,
            CopyMode::None => false,
        }
    }
}

/// Arguments shared by create and update.
#[derive(Debug, Clone)]
pub struct RevisionRequest {
    pub name: String,
    pub source_uris: Vec<String>,
    pub registry: Option<String>,
    pub metadata: Option<UserMeta>,
    pub message: String,
    pub auto_organize: bool,
    pub copy_mode: CopyMode,
}

/// Arguments for a diff between two revisions.
#[derive(Debug, Clone, Default)]
pub struct DiffRequest {
    pub name1: String,
    pub name2: String,
    pub registry: Option<String>,
    pub hash1: Option<String>,
    pub hash2: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Search hits
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HitKind {
    Package,
    Object,
    /// Aggregate counts only; never an individual result.
    Summary,
}

/// One normalized search result.
///
/// Only constructible through [`SearchHit::package`], [`SearchHit::object`],
/// and [`SearchHit::summary`], so package and object hits always carry a
/// canonical URI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub(crate) id: String,
    pub(crate) kind: HitKind,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) canonical_uri: Option<String>,
    pub(crate) logical_key: Option<String>,
    pub(crate) size: Option<u64>,
    pub(crate) last_modified: Option<DateTime<Utc>>,
    pub(crate) metadata: Map<String, Value>,
    pub(crate) score: f64,
    pub(crate) backend: String,
}

fn require<'a>(field: &'static str, value: &'a str) -> OpsResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(OpsError::validation(field, "missing from search hit"))
    } else {
        Ok(value)
    }
}

impl SearchHit {
    /// A package revision hit. Bucket, name, and hash must be non-empty.
    pub fn package(
        backend: &str,
        bucket: &str,
        name: &str,
        hash: &str,
        score: f64,
    ) -> OpsResult<Self> {
        let bucket = require("bucket", bucket)?;
        let name = require("name", name)?;
        let hash = require("hash", hash)?;
        let uri = package_uri(bucket, name, hash);
        Ok(Self {
            id: uri.clone(),
            kind: HitKind::Package,
            title: name.to_string(),
            description: None,
            canonical_uri: Some(uri),
            logical_key: None,
            size: None,
            last_modified: None,
            metadata: Map::new(),
            score,
            backend: backend.to_string(),
        })
    }

    /// An object hit. Bucket and key must be non-empty.
    pub fn object(
        backend: &str,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        score: f64,
    ) -> OpsResult<Self> {
        let bucket = require("bucket", bucket)?;
        let key = require("key", key)?;
        let uri = match version_id.filter(|v| !v.is_empty()) {
            Some(v) => format!("s3://{}/{}?versionId={}", bucket, key, v),
            None => format!("s3://{}/{}", bucket, key),
        };
        Ok(Self {
            id: uri.clone(),
            kind: HitKind::Object,
            title: key.rsplit('/').next().unwrap_or(key).to_string(),
            description: None,
            canonical_uri: Some(uri),
            logical_key: Some(key.to_string()),
            size: None,
            last_modified: None,
            metadata: Map::new(),
            score,
            backend: backend.to_string(),
        })
    }

    /// An aggregate-only result; flagged as such and never ranked as a hit.
    pub fn summary(backend: &str, query: &str, total: u64, stats: Map<String, Value>) -> Self {
        Self {
            id: format!("summary:{}:{}", backend, query),
            kind: HitKind::Summary,
            title: format!("{} matching results (aggregate only)", total),
            description: Some(format!(
                "{} reports totals for '{}' but no individual hits",
                backend, query
            )),
            canonical_uri: None,
            logical_key: None,
            size: None,
            last_modified: None,
            metadata: {
                let mut m = stats;
                m.insert("total".into(), Value::from(total));
                m
            },
            score: 0.0,
            backend: backend.to_string(),
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    pub fn with_last_modified(mut self, ts: Option<DateTime<Utc>>) -> Self {
        self.last_modified = ts;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> HitKind {
        self.kind
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Dedupe key; `None` only for summary hits.
    pub fn canonical_uri(&self) -> Option<&str> {
        self.canonical_uri.as_deref()
    }

    pub fn logical_key(&self) -> Option<&str> {
        self.logical_key.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Normalized into [0, 1] once the hit has been through the aggregator.
    pub fn score(&self) -> f64 {
        self.score
    }

    /// Tag of the search backend that produced the hit.
    pub fn backend(&self) -> &str {
        &self.backend
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Metadata merge
// ═══════════════════════════════════════════════════════════════════════

/// Merge caller-supplied metadata over existing metadata.
///
/// Precedence: the caller wins on every key conflict. The merge is shallow;
/// nested objects are replaced, not combined.
pub fn merge_user_meta(existing: &UserMeta, caller: Option<&UserMeta>) -> UserMeta {
    let mut merged = existing.clone();
    if let Some(caller) = caller {
        for (k, v) in caller {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

/// Parse an RFC 3339 timestamp, tolerating absence and junk.
pub fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(v: Value) -> UserMeta {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_merge_caller_wins() {
        let existing = meta(json!({"a": 1, "b": 2}));
        let caller = meta(json!({"b": 3, "c": 4}));
        let merged = merge_user_meta(&existing, Some(&caller));
        assert_eq!(Value::Object(merged), json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn test_merge_without_caller_keeps_existing() {
        let existing = meta(json!({"a": 1}));
        assert_eq!(merge_user_meta(&existing, None), existing);
    }

    #[test]
    fn test_merge_is_shallow() {
        let existing = meta(json!({"nested": {"x": 1, "y": 2}}));
        let caller = meta(json!({"nested": {"x": 9}}));
        let merged = merge_user_meta(&existing, Some(&caller));
        assert_eq!(merged["nested"], json!({"x": 9}));
    }

    #[test]
    fn test_registry_parse() {
        assert_eq!(Registry::parse("s3://team-data").unwrap().bucket(), "team-data");
        assert_eq!(Registry::parse("team-data/").unwrap().uri(), "s3://team-data");
        assert!(matches!(
            Registry::parse("gs://bucket"),
            Err(OpsError::Validation { field: "registry", .. })
        ));
        assert!(Registry::parse("s3://").is_err());
        assert!(Registry::parse("s3://bucket/prefix").is_err());
        assert!(Registry::parse("Bad_Bucket").is_err());
    }

    #[test]
    fn test_package_name_parse() {
        assert!(PackageName::parse("team/data-v2").is_ok());
        assert!(PackageName::parse("team").is_err());
        assert!(PackageName::parse("team/").is_err());
        assert!(PackageName::parse("a/b/c").is_err());
        assert!(PackageName::parse("/data").is_err());
    }

    #[test]
    fn test_bucket_missing_region_is_unknown() {
        let b = normalize_bucket(RawBucket {
            name: Some("raw-data".into()),
            region: None,
            access: None,
        })
        .unwrap();
        assert_eq!(b.region, UNKNOWN);
        assert_eq!(b.access, AccessLevel::Unknown);

        let b = normalize_bucket(RawBucket {
            name: Some("raw-data".into()),
            region: Some("  ".into()),
            access: Some("read-only".into()),
        })
        .unwrap();
        assert_eq!(b.region, UNKNOWN);
        assert_eq!(b.access, AccessLevel::ReadOnly);
    }

    #[test]
    fn test_bucket_without_name_is_rejected() {
        assert!(normalize_bucket(RawBucket::default()).is_err());
    }

    #[test]
    fn test_package_hit_requires_identity() {
        let hit = SearchHit::package("graph", "bkt", "team/data", "abc123", 1.0).unwrap();
        assert_eq!(
            hit.canonical_uri.as_deref(),
            Some("pkg+s3://bkt#package=team/data@abc123")
        );
        assert!(SearchHit::package("graph", "bkt", "team/data", "", 1.0).is_err());
        assert!(SearchHit::package("graph", "", "team/data", "abc", 1.0).is_err());
    }

    #[test]
    fn test_object_hit_uri_includes_version() {
        let hit = SearchHit::object("index", "bkt", "a/b.csv", Some("v1"), 0.5).unwrap();
        assert_eq!(hit.canonical_uri.as_deref(), Some("s3://bkt/a/b.csv?versionId=v1"));
        assert_eq!(hit.title, "b.csv");
    }

    #[test]
    fn test_hit_accessors_reflect_constructor() {
        let hit = SearchHit::object("index", "raw", "exp/a.csv", Some("v1"), 2.5)
            .unwrap()
            .with_description(Some("daily export".into()));
        assert_eq!(hit.kind(), HitKind::Object);
        assert_eq!(hit.title(), "a.csv");
        assert_eq!(hit.logical_key(), Some("exp/a.csv"));
        assert_eq!(hit.canonical_uri(), Some("s3://raw/exp/a.csv?versionId=v1"));
        assert_eq!(hit.description(), Some("daily export"));
        assert_eq!(hit.backend(), "index");
        assert_eq!(hit.score(), 2.5);
        assert!(hit.metadata().is_empty());
    }

    #[test]
    fn test_summary_hit_has_no_uri() {
        let hit = SearchHit::summary("graph", "csv", 42, Map::new());
        assert_eq!(hit.kind, HitKind::Summary);
        assert!(hit.canonical_uri.is_none());
        assert_eq!(hit.metadata["total"], 42);
    }

    #[test]
    fn test_copy_mode_selection() {
        assert!(CopyMode::All.copies("other", "reg"));
        assert!(CopyMode::SameBucket.copies("reg", "reg"));
        assert!(!CopyMode::SameBucket.copies("other", "reg"));
        assert!(!CopyMode::None.copies("reg", "reg"));
        assert!(CopyMode::parse("sometimes").is_err());
    }

    #[test]
    fn test_descriptor_rejects_empty_hash() {
        let reg = Registry::parse("s3://bkt").unwrap();
        assert!(PackageDescriptor::new("team/data", &reg, "").is_err());
        let d = PackageDescriptor::new("team/data", &reg, "h1").unwrap();
        assert_eq!(d.uri(), "pkg+s3://bkt#package=team/data@h1");
    }
}
