//! Concrete [`Ops`] implementations, one per authentication modality.
//!
//! [`Backend`] is the closed set the resolver produces. It implements
//! [`Ops`] by delegating to the variant, so callers never inspect which
//! backend they hold.
//!
//! This module is also the error boundary: [`store_error`],
//! [`package_error`], and [`graphql_error`] translate every internal error
//! type into [`OpsError`].

pub mod credential;
pub mod library;
pub mod native;
pub mod platform;

pub use credential::CredentialOnlyBackend;
pub use library::LibraryBackend;
pub use platform::PlatformBackend;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{OpsError, OpsResult, Remediation};
use crate::graphql::GraphqlError;
use crate::http::RetryPolicy;
use crate::models::{
    AuthSession, BackendKind, BucketDescriptor, ContentDescriptor, CreationResult, DiffRequest,
    DiffResult, Modality, PackageDescriptor, Registry, RevisionRequest,
};
use crate::ops::{CloudClient, Ops};
use crate::package_store::PackageError;
use crate::search::SearchBackend;
use crate::storage::{ObjectStore, StoreError};

/// Shared inputs every backend is built with.
#[derive(Debug, Clone)]
pub struct BackendEnv {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    pub retry: RetryPolicy,
    /// Request override, else the configured default.
    pub default_registry: Option<String>,
}

impl BackendEnv {
    /// The registry an operation targets: explicit, else the default.
    pub fn registry(&self, explicit: Option<&str>) -> OpsResult<Registry> {
        match explicit
            .filter(|r| !r.trim().is_empty())
            .or(self.default_registry.as_deref())
        {
            Some(raw) => Registry::parse(raw),
            None => Err(OpsError::validation(
                "registry",
                "no registry given and no default registry configured",
            )),
        }
    }

    pub fn default_registry(&self) -> Option<Registry> {
        self.default_registry
            .as_deref()
            .and_then(|r| Registry::parse(r).ok())
    }

    /// Catalog link for a revision, falling back to its canonical URI.
    pub fn catalog_link(&self, catalog: Option<&str>, registry: &Registry, name: &str, hash: &str) -> String {
        match catalog.map(|c| c.trim_end_matches('/')).filter(|c| !c.is_empty()) {
            Some(base) => format!(
                "{}/b/{}/packages/{}/tree/{}",
                base,
                registry.bucket(),
                name,
                hash
            ),
            None => crate::models::package_uri(registry.bucket(), name, hash),
        }
    }
}

/// Where a backend gets its object store from.
#[async_trait]
pub trait StoreSource: Send + Sync {
    async fn store(&self) -> OpsResult<Arc<dyn ObjectStore>>;
}

/// A store that is already built.
pub struct FixedStore(pub Arc<dyn ObjectStore>);

#[async_trait]
impl StoreSource for FixedStore {
    async fn store(&self) -> OpsResult<Arc<dyn ObjectStore>> {
        Ok(self.0.clone())
    }
}

pub fn store_error(backend: BackendKind, err: StoreError) -> OpsError {
    match err {
        StoreError::NotFound { bucket, key } => {
            OpsError::not_found("object", format!("s3://{}/{}", bucket, key))
        }
        StoreError::InvalidLocation(uri) => {
            OpsError::validation("source_uris", format!("'{}' is not an s3:// URI", uri))
        }
        other => OpsError::backend_caused_by(backend, "object store request failed", other),
    }
}

pub fn package_error(backend: BackendKind, err: PackageError) -> OpsError {
    match err {
        PackageError::Store(e) => store_error(backend, e),
        PackageError::NoSuchPackage(name) => OpsError::not_found("package", name),
        PackageError::NoSuchRevision { name, hash } => {
            OpsError::not_found("revision", format!("{}@{}", name, hash))
        }
        PackageError::NoSuchPath(path) => OpsError::not_found("path", path),
        PackageError::EmptySource(uri) => OpsError::not_found("source objects", uri),
        PackageError::AmbiguousHash(_) | PackageError::InvalidHash(_) => {
            OpsError::validation("hash", err.to_string())
        }
        PackageError::KeyCollision { .. } => OpsError::validation("source_uris", err.to_string()),
        PackageError::Manifest { name, hash, source } => OpsError::backend_caused_by(
            backend,
            format!("stored revision {} of package '{}' is unreadable", hash, name),
            source,
        ),
    }
}

pub fn graphql_error(backend: BackendKind, err: GraphqlError) -> OpsError {
    match err {
        GraphqlError::Unauthorized(status) => OpsError::Authentication {
            reasons: vec![format!("query endpoint rejected the credentials (HTTP {})", status)],
            remediation: vec![Remediation {
                modality: match backend {
                    BackendKind::Library => Modality::LibrarySession,
                    _ => Modality::BearerToken,
                }
                .as_str()
                .into(),
                hint: "Obtain a fresh token and retry.".into(),
            }],
        },
        other => OpsError::backend_caused_by(backend, "graph query failed", other),
    }
}

/// The closed set of backends.
pub enum Backend {
    Library(LibraryBackend),
    PlatformApi(PlatformBackend),
    CredentialOnly(CredentialOnlyBackend),
}

/// Credentials are never printed.
impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.session();
        f.debug_struct("Backend")
            .field("kind", &self.kind())
            .field("modality", &session.modality)
            .field("endpoint", &session.endpoint)
            .finish()
    }
}

impl Backend {
    fn inner(&self) -> &dyn Ops {
        match self {
            Backend::Library(b) => b,
            Backend::PlatformApi(b) => b,
            Backend::CredentialOnly(b) => b,
        }
    }
}

#[async_trait]
impl Ops for Backend {
    fn kind(&self) -> BackendKind {
        self.inner().kind()
    }

    fn session(&self) -> &AuthSession {
        self.inner().session()
    }

    async fn search_packages(
        &self,
        query: &str,
        registry: Option<&str>,
    ) -> OpsResult<Vec<PackageDescriptor>> {
        self.inner().search_packages(query, registry).await
    }

    async fn list_all_packages(&self, registry: Option<&str>) -> OpsResult<Vec<PackageDescriptor>> {
        self.inner().list_all_packages(registry).await
    }

    async fn browse_content(
        &self,
        package_name: &str,
        registry: Option<&str>,
        path: &str,
    ) -> OpsResult<Vec<ContentDescriptor>> {
        self.inner().browse_content(package_name, registry, path).await
    }

    async fn diff_packages(&self, request: &DiffRequest) -> OpsResult<DiffResult> {
        self.inner().diff_packages(request).await
    }

    async fn create_package_revision(&self, request: &RevisionRequest) -> OpsResult<CreationResult> {
        self.inner().create_package_revision(request).await
    }

    async fn update_package_revision(&self, request: &RevisionRequest) -> OpsResult<CreationResult> {
        self.inner().update_package_revision(request).await
    }

    async fn execute_graph_query(&self, query: &str, variables: Option<Value>) -> OpsResult<Value> {
        self.inner().execute_graph_query(query, variables).await
    }

    async fn get_cloud_client(&self, service: &str, region: Option<&str>) -> OpsResult<CloudClient> {
        self.inner().get_cloud_client(service, region).await
    }

    async fn list_buckets(&self) -> OpsResult<Vec<BucketDescriptor>> {
        self.inner().list_buckets().await
    }

    fn search_backends(&self) -> Vec<Arc<dyn SearchBackend>> {
        self.inner().search_backends()
    }
}
