//! The data access contract every backend satisfies.
//!
//! Callers obtain a [`Backend`](crate::backends::Backend) from the
//! [`Resolver`](crate::resolver::Resolver) and drive it exclusively through
//! [`Ops`]. Every method returns a fully-populated domain value or a typed
//! [`OpsError`]; backends never hand back descriptors with empty identity
//! fields.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SearchConfig;
use crate::error::{OpsError, OpsResult};
use crate::http::RetryPolicy;
use crate::models::{
    AuthSession, AwsCredentials, BackendKind, BucketDescriptor, ContentDescriptor, CreationResult,
    DiffRequest, DiffResult, PackageDescriptor, RevisionRequest,
};
use crate::search::{aggregate_search, AggregateOptions, SearchBackend, SearchOutcome, SearchRequest};
use crate::storage::s3::S3Store;

#[async_trait]
pub trait Ops: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// The authentication this backend was resolved with.
    fn session(&self) -> &AuthSession;

    /// Packages in `registry` whose name, message, or metadata match `query`.
    async fn search_packages(
        &self,
        query: &str,
        registry: Option<&str>,
    ) -> OpsResult<Vec<PackageDescriptor>>;

    async fn list_all_packages(&self, registry: Option<&str>) -> OpsResult<Vec<PackageDescriptor>>;

    /// Entries of the latest revision at or below `path` (`""` for all).
    async fn browse_content(
        &self,
        package_name: &str,
        registry: Option<&str>,
        path: &str,
    ) -> OpsResult<Vec<ContentDescriptor>>;

    async fn diff_packages(&self, request: &DiffRequest) -> OpsResult<DiffResult>;

    async fn create_package_revision(&self, request: &RevisionRequest) -> OpsResult<CreationResult>;

    /// Build a new revision on top of the latest one. The prior revision
    /// is left untouched.
    async fn update_package_revision(&self, request: &RevisionRequest) -> OpsResult<CreationResult>;

    async fn execute_graph_query(&self, query: &str, variables: Option<Value>) -> OpsResult<Value>;

    async fn get_cloud_client(&self, service: &str, region: Option<&str>) -> OpsResult<CloudClient>;

    async fn list_buckets(&self) -> OpsResult<Vec<BucketDescriptor>>;

    /// Query backends this backend can feed to the search aggregator, in
    /// tie-break order.
    fn search_backends(&self) -> Vec<Arc<dyn SearchBackend>>;
}

/// Aggregate search across every query backend `ops` exposes.
///
/// `deadline` bounds the whole call; on expiry every in-flight backend
/// query is cancelled.
pub async fn search(
    ops: &dyn Ops,
    request: SearchRequest,
    config: &SearchConfig,
    deadline: Option<Duration>,
) -> OpsResult<SearchOutcome> {
    let backends = ops.search_backends();
    let options = AggregateOptions {
        per_backend_timeout: Duration::from_secs(config.timeout_secs),
        deadline,
        default_limit: config.default_limit,
    };
    aggregate_search(&backends, request, &options).await
}

/// AWS services a cloud client handle can be issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudService {
    S3,
    Sts,
    Athena,
    Glue,
    Iam,
}

impl CloudService {
    pub fn parse(raw: &str) -> OpsResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(CloudService::S3),
            "sts" => Ok(CloudService::Sts),
            "athena" => Ok(CloudService::Athena),
            "glue" => Ok(CloudService::Glue),
            "iam" => Ok(CloudService::Iam),
            other => Err(OpsError::validation(
                "service",
                format!("unknown cloud service '{}' (s3, sts, athena, glue, iam)", other),
            )),
        }
    }
}

impl fmt::Display for CloudService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CloudService::S3 => "s3",
            CloudService::Sts => "sts",
            CloudService::Athena => "athena",
            CloudService::Glue => "glue",
            CloudService::Iam => "iam",
        })
    }
}

/// Opaque handle for calling a cloud service with the resolved credentials.
#[derive(Debug, Clone)]
pub struct CloudClient {
    pub service: CloudService,
    pub region: String,
    pub endpoint: Option<String>,
    credentials: AwsCredentials,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl CloudClient {
    pub fn new(
        service: CloudService,
        region: impl Into<String>,
        endpoint: Option<String>,
        credentials: AwsCredentials,
        http: reqwest::Client,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            region: region.into(),
            endpoint,
            credentials,
            http,
            retry,
        }
    }

    pub fn credentials(&self) -> &AwsCredentials {
        &self.credentials
    }

    /// An object-store client; only valid for the `s3` service.
    pub fn s3(&self) -> OpsResult<S3Store> {
        if self.service != CloudService::S3 {
            return Err(OpsError::validation(
                "service",
                format!("a {} client cannot be used as S3", self.service),
            ));
        }
        Ok(S3Store::new(
            self.http.clone(),
            self.credentials.clone(),
            self.region.clone(),
            self.endpoint.clone(),
            self.retry.clone(),
        ))
    }
}
