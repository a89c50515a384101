//! Library-backed backend: the native package engine driven by a local
//! platform session.
//!
//! Object-store credentials are exchanged from the registry the first time
//! an operation needs them and then reused for the life of this backend,
//! which is one request.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::{graphql_error, native, BackendEnv, StoreSource};
use crate::error::{OpsError, OpsResult};
use crate::graphql::GraphqlClient;
use crate::http::RetryPolicy;
use crate::models::{
    AuthSession, AwsCredentials, BackendKind, BucketDescriptor, ContentDescriptor, CreationResult,
    DiffRequest, DiffResult, PackageDescriptor, RevisionRequest,
};
use crate::ops::{CloudClient, CloudService, Ops};
use crate::search::graph::GraphSearch;
use crate::search::index::IndexSearch;
use crate::search::registry_scan::RegistryScan;
use crate::search::SearchBackend;
use crate::session::{exchange_credentials, SessionInfo};
use crate::storage::s3::S3Store;
use crate::storage::ObjectStore;

const KIND: BackendKind = BackendKind::Library;

/// Lazily exchanged credentials and the store built from them.
struct ExchangedStore {
    http: reqwest::Client,
    retry: RetryPolicy,
    info: SessionInfo,
    region: String,
    endpoint: Option<String>,
    credentials: OnceCell<AwsCredentials>,
    store: OnceCell<Arc<dyn ObjectStore>>,
}

impl ExchangedStore {
    async fn credentials(&self) -> OpsResult<AwsCredentials> {
        self.credentials
            .get_or_try_init(|| async {
                tracing::debug!(registry = %self.info.registry_url, "exchanging session for credentials");
                exchange_credentials(&self.http, &self.retry, &self.info)
                    .await
                    .map_err(|e| OpsError::backend_caused_by(KIND, "credential exchange failed", e))
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl StoreSource for ExchangedStore {
    async fn store(&self) -> OpsResult<Arc<dyn ObjectStore>> {
        self.store
            .get_or_try_init(|| async {
                let creds = self.credentials().await?;
                let store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(
                    self.http.clone(),
                    creds,
                    self.region.clone(),
                    self.endpoint.clone(),
                    self.retry.clone(),
                ));
                Ok::<_, OpsError>(store)
            })
            .await
            .cloned()
    }
}

pub struct LibraryBackend {
    session: AuthSession,
    env: BackendEnv,
    catalog_url: Option<String>,
    graph: GraphqlClient,
    stores: Arc<ExchangedStore>,
}

impl LibraryBackend {
    pub fn new(session: AuthSession, info: SessionInfo, env: BackendEnv) -> Self {
        let catalog_url = info.catalog_url.clone().or_else(|| env.config.catalog_url());
        let graph = GraphqlClient::new(
            env.http.clone(),
            format!("{}/graphql", info.registry_url),
            info.access_token.clone(),
            env.retry.clone(),
        );
        let stores = Arc::new(ExchangedStore {
            http: env.http.clone(),
            retry: env.retry.clone(),
            region: env.config.auth.aws_region.clone(),
            endpoint: env.config.auth.s3_endpoint.clone(),
            info,
            credentials: OnceCell::new(),
            store: OnceCell::new(),
        });
        Self {
            session,
            env,
            catalog_url,
            graph,
            stores,
        }
    }

    /// Use `store` instead of exchanging credentials for S3.
    pub fn with_store(self, store: Arc<dyn ObjectStore>) -> Self {
        // The cell is fresh, so this set cannot fail.
        let _ = self.stores.store.set(store);
        self
    }

    async fn store(&self) -> OpsResult<Arc<dyn ObjectStore>> {
        self.stores.store().await
    }

    fn token(&self) -> &str {
        self.session.credential.bearer().unwrap_or_default()
    }

    fn result(&self, request: &RevisionRequest, hash: String, added: usize) -> OpsResult<CreationResult> {
        let registry = self.env.registry(request.registry.as_deref())?;
        Ok(CreationResult {
            catalog_url: self
                .env
                .catalog_link(self.catalog_url.as_deref(), &registry, &request.name, &hash),
            package_name: request.name.clone(),
            registry: registry.uri(),
            hash,
            entries_added: added,
        })
    }
}

#[async_trait]
impl Ops for LibraryBackend {
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
        native::search_packages(KIND, self.store().await?, registry, query).await
    }

    async fn list_all_packages(&self, registry: Option<&str>) -> OpsResult<Vec<PackageDescriptor>> {
        let registry = self.env.registry(registry)?;
        native::list_packages(KIND, self.store().await?, registry).await
    }

    async fn browse_content(
        &self,
        package_name: &str,
        registry: Option<&str>,
        path: &str,
    ) -> OpsResult<Vec<ContentDescriptor>> {
        let registry = self.env.registry(registry)?;
        native::browse(KIND, self.store().await?, registry, package_name, path).await
    }

    async fn diff_packages(&self, request: &DiffRequest) -> OpsResult<DiffResult> {
        let registry = self.env.registry(request.registry.as_deref())?;
        native::diff(KIND, self.store().await?, registry, request).await
    }

    async fn create_package_revision(&self, request: &RevisionRequest) -> OpsResult<CreationResult> {
        let registry = self.env.registry(request.registry.as_deref())?;
        let (hash, added) = native::create(KIND, self.store().await?, registry, request).await?;
        self.result(request, hash, added)
    }

    async fn update_package_revision(&self, request: &RevisionRequest) -> OpsResult<CreationResult> {
        let registry = self.env.registry(request.registry.as_deref())?;
        let (hash, added) = native::update(KIND, self.store().await?, registry, request).await?;
        self.result(request, hash, added)
    }

    async fn execute_graph_query(&self, query: &str, variables: Option<Value>) -> OpsResult<Value> {
        self.graph
            .execute(query, variables)
            .await
            .map_err(|e| graphql_error(KIND, e))
    }

    async fn get_cloud_client(&self, service: &str, region: Option<&str>) -> OpsResult<CloudClient> {
        let service = CloudService::parse(service)?;
        let creds = self.stores.credentials().await?;
        Ok(CloudClient::new(
            service,
            region.unwrap_or(&self.env.config.auth.aws_region),
            self.env.config.auth.s3_endpoint.clone(),
            creds,
            self.env.http.clone(),
            self.env.retry.clone(),
        ))
    }

    async fn list_buckets(&self) -> OpsResult<Vec<BucketDescriptor>> {
        native::list_buckets(KIND, self.store().await?).await
    }

    fn search_backends(&self) -> Vec<Arc<dyn SearchBackend>> {
        let mut backends: Vec<Arc<dyn SearchBackend>> = Vec::new();
        if let Some(ref catalog) = self.catalog_url {
            backends.push(Arc::new(IndexSearch::new(
                KIND,
                self.env.http.clone(),
                catalog.clone(),
                self.token().to_string(),
                self.env.retry.clone(),
            )));
        }
        backends.push(Arc::new(GraphSearch::new(
            KIND,
            self.graph.clone(),
            GraphSearch::capability_from(&self.env.config.search.graph_hits),
        )));
        backends.push(Arc::new(RegistryScan::new(
            KIND,
            self.stores.clone(),
            self.env.default_registry(),
        )));
        backends
    }
}
