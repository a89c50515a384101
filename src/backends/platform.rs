//! Platform-API backend: everything goes through the catalog's GraphQL
//! endpoint with the request's bearer token.
//!
//! Revision writes, diffs, and raw cloud clients are not offered by the
//! endpoint and fail with `UnsupportedOperation`.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{graphql_error, BackendEnv};
use crate::error::{OpsError, OpsResult};
use crate::graphql::GraphqlClient;
use crate::models::{
    normalize_bucket, parse_timestamp, AuthSession, BackendKind, BucketDescriptor,
    ContentDescriptor, CreationResult, DiffRequest, DiffResult, PackageDescriptor, PackageName,
    RawBucket, Registry, RevisionRequest, UserMeta,
};
use crate::ops::{CloudClient, Ops};
use crate::search::graph::GraphSearch;
use crate::search::index::IndexSearch;
use crate::search::SearchBackend;

const KIND: BackendKind = BackendKind::PlatformApi;

/// Packages per `packages.page` request.
const PAGE_SIZE: u64 = 1000;

/// Largest flat content map requested; the endpoint returns null above it.
const MAX_FLAT_ENTRIES: u64 = 10_000;

const PACKAGES_QUERY: &str = r#"
query Packages($bucket: String!, $filter: String, $page: Int!, $perPage: Int!) {
  packages(bucket: $bucket, filter: $filter) {
    total
    page(number: $page, perPage: $perPage) {
      name
      modified
      revision(hashOrTag: "latest") {
        hash
        totalEntries
        totalBytes
        message
        userMeta
      }
    }
  }
}
"#;

const BROWSE_QUERY: &str = r#"
query Browse($bucket: String!, $name: String!, $max: Int!) {
  package(bucket: $bucket, name: $name) {
    revision(hashOrTag: "latest") {
      hash
      totalEntries
      contentsFlatMap(max: $max)
    }
  }
}
"#;

const BUCKETS_QUERY: &str = r#"
query Buckets {
  bucketConfigs {
    name
    region
    access
  }
}
"#;

pub struct PlatformBackend {
    session: AuthSession,
    env: BackendEnv,
    catalog_url: Option<String>,
    graph: GraphqlClient,
}

impl PlatformBackend {
    pub fn new(session: AuthSession, env: BackendEnv) -> Self {
        let token = session.credential.bearer().unwrap_or_default().to_string();
        let graph = GraphqlClient::new(
            env.http.clone(),
            session.endpoint.clone(),
            token,
            env.retry.clone(),
        );
        Self {
            catalog_url: env.config.catalog_url(),
            session,
            env,
            graph,
        }
    }

    async fn query(&self, query: &str, variables: Value) -> OpsResult<Value> {
        self.graph
            .execute(query, Some(variables))
            .await
            .map_err(|e| graphql_error(KIND, e))
    }

    /// Every package matching `filter`, following pages until `total`.
    /// A listing that ends short of `total` is an error.
    async fn packages(&self, registry: &Registry, filter: Option<&str>) -> OpsResult<Vec<PackageDescriptor>> {
        let mut out = Vec::new();
        let mut page = 1u64;
        loop {
            let data = self
                .query(
                    PACKAGES_QUERY,
                    json!({
                        "bucket": registry.bucket(),
                        "filter": filter,
                        "page": page,
                        "perPage": PAGE_SIZE,
                    }),
                )
                .await?;
            let packages = &data["packages"];
            if packages.is_null() {
                return Err(OpsError::not_found("registry", registry.uri()));
            }
            let total = packages["total"].as_u64().ok_or_else(|| {
                OpsError::backend(KIND, format!("package listing for {} has no total", registry))
            })?;
            let items = packages["page"].as_array().cloned().unwrap_or_default();
            for raw in &items {
                out.push(package_from_graph(registry, raw)?);
            }

            let collected = out.len() as u64;
            if collected >= total {
                break;
            }
            if items.is_empty() {
                return Err(OpsError::backend(
                    KIND,
                    format!(
                        "package listing for {} stopped at {} of {} packages",
                        registry, collected, total
                    ),
                ));
            }
            tracing::debug!(registry = %registry, page, collected, total, "fetching next package page");
            page += 1;
        }
        Ok(out)
    }
}

/// Normalize one `packages.page[]` entry. A package without a latest
/// revision hash is an error, never a descriptor with a blank hash.
pub fn package_from_graph(registry: &Registry, raw: &Value) -> OpsResult<PackageDescriptor> {
    let name = raw["name"].as_str().unwrap_or_default();
    if name.trim().is_empty() {
        return Err(OpsError::backend(
            KIND,
            format!("a package record in {} has no name", registry),
        ));
    }
    let revision = &raw["revision"];
    let hash = revision["hash"].as_str().unwrap_or_default();
    let mut d = PackageDescriptor::new(name, registry, hash).map_err(|e| {
        OpsError::backend(
            KIND,
            format!("package '{}' came back without a usable identity: {}", name, e),
        )
    })?;
    d.size = revision["totalBytes"].as_u64().unwrap_or(0);
    d.entry_count = revision["totalEntries"].as_u64().unwrap_or(0);
    d.message = revision["message"].as_str().map(String::from);
    d.user_meta = user_meta(&revision["userMeta"]);
    Ok(d)
}

/// `userMeta` arrives either as an object or as a JSON-encoded string.
fn user_meta(raw: &Value) -> UserMeta {
    match raw {
        Value::Object(m) => m.clone(),
        Value::String(s) => serde_json::from_str::<Value>(s)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        _ => UserMeta::new(),
    }
}

/// Flatten `contentsFlatMap` into descriptors at or below `path`.
pub fn contents_from_flat_map(flat: &Value, path: &str) -> OpsResult<Vec<ContentDescriptor>> {
    let Some(map) = flat.as_object() else {
        return Err(OpsError::backend(KIND, "package contents missing from response"));
    };
    let path = path.trim_matches('/');
    let dir = format!("{}/", path);

    let mut out: Vec<ContentDescriptor> = map
        .iter()
        .filter(|(key, _)| path.is_empty() || key.as_str() == path || key.starts_with(&dir))
        .map(|(key, entry)| ContentDescriptor {
            logical_key: key.clone(),
            physical_key: entry["physicalKey"].as_str().unwrap_or_default().to_string(),
            size: entry["size"].as_u64().unwrap_or(0),
            last_modified: parse_timestamp(
                entry["meta"]["last_modified"]
                    .as_str()
                    .or_else(|| entry["lastModified"].as_str()),
            ),
        })
        .collect();
    if let Some(bad) = out.iter().find(|c| c.physical_key.is_empty()) {
        return Err(OpsError::backend(
            KIND,
            format!("entry '{}' has no physical location", bad.logical_key),
        ));
    }
    if out.is_empty() && !path.is_empty() {
        return Err(OpsError::not_found("path", path));
    }
    out.sort_by(|a, b| a.logical_key.cmp(&b.logical_key));
    Ok(out)
}

#[async_trait]
impl Ops for PlatformBackend {
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
        let filter = Some(query.trim()).filter(|q| !q.is_empty());
        self.packages(&registry, filter).await
    }

    async fn list_all_packages(&self, registry: Option<&str>) -> OpsResult<Vec<PackageDescriptor>> {
        let registry = self.env.registry(registry)?;
        self.packages(&registry, None).await
    }

    async fn browse_content(
        &self,
        package_name: &str,
        registry: Option<&str>,
        path: &str,
    ) -> OpsResult<Vec<ContentDescriptor>> {
        let registry = self.env.registry(registry)?;
        let name = PackageName::parse(package_name)?;
        let data = self
            .query(
                BROWSE_QUERY,
                json!({
                    "bucket": registry.bucket(),
                    "name": name.as_str(),
                    "max": MAX_FLAT_ENTRIES,
                }),
            )
            .await?;
        let package = &data["package"];
        if package.is_null() {
            return Err(OpsError::not_found("package", name.as_str()));
        }
        let revision = &package["revision"];
        if revision.is_null() {
            return Err(OpsError::not_found("revision", format!("{}@latest", name)));
        }
        let total = revision["totalEntries"].as_u64();
        let flat = &revision["contentsFlatMap"];
        if flat.is_null() {
            if let Some(total) = total.filter(|t| *t > MAX_FLAT_ENTRIES) {
                return Err(OpsError::backend(
                    KIND,
                    format!(
                        "package '{}' has {} entries, more than the {} a flat listing returns",
                        name, total, MAX_FLAT_ENTRIES
                    ),
                ));
            }
        }
        if let (Some(total), Some(map)) = (total, flat.as_object()) {
            if (map.len() as u64) < total {
                return Err(OpsError::backend(
                    KIND,
                    format!(
                        "package '{}' listing returned {} of {} entries",
                        name,
                        map.len(),
                        total
                    ),
                ));
            }
        }
        contents_from_flat_map(flat, path)
    }

    async fn diff_packages(&self, _request: &DiffRequest) -> OpsResult<DiffResult> {
        Err(OpsError::unsupported(KIND, "diff_packages"))
    }

    async fn create_package_revision(&self, _request: &RevisionRequest) -> OpsResult<CreationResult> {
        Err(OpsError::unsupported(KIND, "create_package_revision"))
    }

    async fn update_package_revision(&self, _request: &RevisionRequest) -> OpsResult<CreationResult> {
        Err(OpsError::unsupported(KIND, "update_package_revision"))
    }

    async fn execute_graph_query(&self, query: &str, variables: Option<Value>) -> OpsResult<Value> {
        if query.trim().is_empty() {
            return Err(OpsError::validation("query", "graph query is empty"));
        }
        self.graph
            .execute(query, variables)
            .await
            .map_err(|e| graphql_error(KIND, e))
    }

    async fn get_cloud_client(&self, _service: &str, _region: Option<&str>) -> OpsResult<CloudClient> {
        Err(OpsError::unsupported(KIND, "get_cloud_client"))
    }

    async fn list_buckets(&self) -> OpsResult<Vec<BucketDescriptor>> {
        let data = self.query(BUCKETS_QUERY, json!({})).await?;
        let records = data["bucketConfigs"].as_array().cloned().unwrap_or_default();
        Ok(records
            .iter()
            .filter_map(|raw| {
                let record = RawBucket {
                    name: raw["name"].as_str().map(String::from),
                    region: raw["region"].as_str().map(String::from),
                    access: raw["access"].as_str().map(String::from),
                };
                match normalize_bucket(record) {
                    Ok(b) => Some(b),
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping bucket record");
                        None
                    }
                }
            })
            .collect())
    }

    fn search_backends(&self) -> Vec<Arc<dyn SearchBackend>> {
        let mut backends: Vec<Arc<dyn SearchBackend>> = Vec::new();
        if let Some(ref catalog) = self.catalog_url {
            backends.push(Arc::new(IndexSearch::new(
                KIND,
                self.env.http.clone(),
                catalog.clone(),
                self.session.credential.bearer().unwrap_or_default().to_string(),
                self.env.retry.clone(),
            )));
        }
        backends.push(Arc::new(GraphSearch::new(
            KIND,
            self.graph.clone(),
            GraphSearch::capability_from(&self.env.config.search.graph_hits),
        )));
        backends
    }
}
