//! Credential-only backend: bare cloud credentials, no platform session.
//!
//! Every read that object storage alone can answer is served from the
//! registry's package store. Revision writes need the platform's native
//! semantics and graph queries need a platform endpoint, so both fail
//! closed.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{native, BackendEnv, FixedStore};
use crate::error::{OpsError, OpsResult};
use crate::models::{
    AuthSession, AwsCredentials, BackendKind, BucketDescriptor, ContentDescriptor, CreationResult,
    DiffRequest, DiffResult, PackageDescriptor, RevisionRequest,
};
use crate::ops::{CloudClient, CloudService, Ops};
use crate::search::registry_scan::RegistryScan;
use crate::search::SearchBackend;
use crate::storage::s3::S3Store;
use crate::storage::ObjectStore;

const KIND: BackendKind = BackendKind::CredentialOnly;

pub struct CredentialOnlyBackend {
    session: AuthSession,
    credentials: AwsCredentials,
    env: BackendEnv,
    store: Arc<dyn ObjectStore>,
}

impl CredentialOnlyBackend {
    pub fn new(session: AuthSession, credentials: AwsCredentials, env: BackendEnv) -> Self {
        let store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(
            env.http.clone(),
            credentials.clone(),
            env.config.auth.aws_region.clone(),
            env.config.auth.s3_endpoint.clone(),
            env.retry.clone(),
        ));
        Self {
            session,
            credentials,
            env,
            store,
        }
    }

    /// Serve reads from `store` instead of S3.
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = store;
        self
    }
}

#[async_trait]
impl Ops for CredentialOnlyBackend {
    fn kind(&self) -> BackendKind {
        KIND
    }

    fn session(&self) -> &AuthSession {
        &self.session
    }

    async fn search_packages(
        &self,
        query: &str,
        registry: Option<&str>,
    ) -> OpsResult<Vec<PackageDescriptor>> {
        let registry = self.env.registry(registry)?;
        native::search_packages(KIND, self.store.clone(), registry, query).await
    }

    async fn list_all_packages(&self, registry: Option<&str>) -> OpsResult<Vec<PackageDescriptor>> {
        let registry = self.env.registry(registry)?;
        native::list_packages(KIND, self.store.clone(), registry).await
    }

    async fn browse_content(
        &self,
        package_name: &str,
        registry: Option<&str>,
        path: &str,
    ) -> OpsResult<Vec<ContentDescriptor>> {
        let registry = self.env.registry(registry)?;
        native::browse(KIND, self.store.clone(), registry, package_name, path).await
    }

    async fn diff_packages(&self, request: &DiffRequest) -> OpsResult<DiffResult> {
        let registry = self.env.registry(request.registry.as_deref())?;
        native::diff(KIND, self.store.clone(), registry, request).await
    }

    async fn create_package_revision(&self, _request: &RevisionRequest) -> OpsResult<CreationResult> {
        Err(OpsError::unsupported(KIND, "create_package_revision"))
    }

    async fn update_package_revision(&self, _request: &RevisionRequest) -> OpsResult<CreationResult> {
        Err(OpsError::unsupported(KIND, "update_package_revision"))
    }

    async fn execute_graph_query(&self, _query: &str, _variables: Option<Value>) -> OpsResult<Value> {
        Err(OpsError::unsupported(KIND, "execute_graph_query"))
    }

    async fn get_cloud_client(&self, service: &str, region: Option<&str>) -> OpsResult<CloudClient> {
        let service = CloudService::parse(service)?;
        Ok(CloudClient::new(
            service,
            region.unwrap_or(&self.env.config.auth.aws_region),
            self.env.config.auth.s3_endpoint.clone(),
            self.credentials.clone(),
            self.env.http.clone(),
            self.env.retry.clone(),
        ))
    }

    async fn list_buckets(&self) -> OpsResult<Vec<BucketDescriptor>> {
        native::list_buckets(KIND, self.store.clone()).await
    }

    fn search_backends(&self) -> Vec<Arc<dyn SearchBackend>> {
        vec![Arc::new(RegistryScan::new(
            KIND,
            Arc::new(FixedStore(self.store.clone())),
            self.env.default_registry(),
        ))]
    }
}
