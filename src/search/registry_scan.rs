//! Search by scanning a registry's package store directly.
//!
//! Needs only object-store access, so it is the one search source the
//! credential-only backend has. Package names, messages, and metadata are
//! matched token by token; within a package scope, logical keys are
//! matched instead and each hit is an object.

use async_trait::async_trait;
use std::sync::Arc;

use super::{HitCapability, SearchBackend, SearchRequest, SearchScope};
use crate::backends::native::{match_score, tokenize};
use crate::backends::{package_error, StoreSource};
use crate::error::{OpsError, OpsResult};
use crate::models::{parse_timestamp, BackendKind, PackageName, Registry, SearchHit};
use crate::package_store::PackageStore;
use crate::storage::ObjectLocation;

pub const NAME: &str = "registry-scan";

pub struct RegistryScan {
    kind: BackendKind,
    source: Arc<dyn StoreSource>,
    default_registry: Option<Registry>,
}

impl RegistryScan {
    pub fn new(kind: BackendKind, source: Arc<dyn StoreSource>, default_registry: Option<Registry>) -> Self {
        Self {
            kind,
            source,
            default_registry,
        }
    }

    fn registry(&self, scope: &SearchScope) -> OpsResult<Registry> {
        match scope.bucket() {
            Some(bucket) => Registry::parse(bucket),
            None => self.default_registry.clone().ok_or_else(|| {
                OpsError::validation("registry", "global scan needs a default registry")
            }),
        }
    }

    async fn scan_packages(&self, store: &PackageStore, tokens: &[String]) -> OpsResult<Vec<SearchHit>> {
        let bucket = store.registry().bucket().to_string();
        let listed = store
            .list_packages()
            .await
            .map_err(|e| package_error(self.kind, e))?;

        let mut scored = Vec::new();
        for (name, hash) in listed {
            let revision = store
                .read_revision(&name, hash)
                .await
                .map_err(|e| package_error(self.kind, e))?;
            let score = match_score(tokens, name.as_str(), &revision.manifest);
            if score == 0 {
                continue;
            }
            let hit = SearchHit::package(NAME, &bucket, name.as_str(), &revision.hash, score as f64)?
                .with_description(revision.manifest.message.clone())
                .with_size(Some(revision.manifest.total_size()))
                .with_metadata(revision.manifest.user_meta.clone());
            scored.push(hit);
        }
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(scored)
    }

    async fn scan_entries(
        &self,
        store: &PackageStore,
        package: &str,
        tokens: &[String],
    ) -> OpsResult<Vec<SearchHit>> {
        let name = PackageName::parse(package)?;
        let revision = store
            .load(&name, None)
            .await
            .map_err(|e| package_error(self.kind, e))?;

        let mut scored = Vec::new();
        for entry in revision.manifest.entries() {
            let key = entry.logical_key.to_lowercase();
            let score = tokens.iter().filter(|t| key.contains(t.as_str())).count();
            if score == 0 {
                continue;
            }
            let Ok(loc) = ObjectLocation::parse(entry.physical_key()) else {
                tracing::warn!(backend = NAME, key = %entry.logical_key, "rejected hit with unparseable location");
                continue;
            };
            let mut hit = SearchHit::object(NAME, &loc.bucket, &loc.key, loc.version_id.as_deref(), score as f64)?
                .with_size(Some(entry.size))
                .with_last_modified(parse_timestamp(
                    entry.meta.get("last_modified").and_then(|v| v.as_str()),
                ));
            hit.logical_key = Some(entry.logical_key.clone());
            scored.push(hit);
        }
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(scored)
    }
}

#[async_trait]
impl SearchBackend for RegistryScan {
    fn name(&self) -> &str {
        NAME
    }

    fn capability(&self) -> HitCapability {
        HitCapability::Individual
    }

    async fn search(&self, request: &SearchRequest) -> OpsResult<Vec<SearchHit>> {
        let registry = self.registry(&request.scope)?;
        let tokens = tokenize(&request.query);
        let store = PackageStore::new(self.source.store().await?, registry);

        let mut hits = match &request.scope {
            SearchScope::Package { name, .. } => self.scan_entries(&store, name, &tokens).await?,
            _ => self.scan_packages(&store, &tokens).await?,
        };
        hits.truncate(request.limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::FixedStore;
    use crate::manifest::Manifest;
    use crate::models::{CopyMode, HitKind};
    use crate::storage::memory::MemoryStore;

    async fn seeded() -> Arc<MemoryStore> {
        let mem = Arc::new(MemoryStore::new());
        mem.insert("reg", "src/reads.csv", "a,b");
        mem.insert("reg", "src/notes.md", "# notes");
        let store = PackageStore::new(mem.clone(), Registry::parse("s3://reg").unwrap());
        let staged = store
            .stage(&["s3://reg/src/".to_string()], false)
            .await
            .unwrap();
        let manifest = Manifest::new(Some("sequencing reads".into()), Default::default());
        store
            .push(&PackageName::parse("lab/seq").unwrap(), manifest, staged, CopyMode::None)
            .await
            .unwrap();
        mem
    }

    fn scan(mem: Arc<MemoryStore>) -> RegistryScan {
        RegistryScan::new(
            BackendKind::CredentialOnly,
            Arc::new(FixedStore(mem)),
            Registry::parse("s3://reg").ok(),
        )
    }

    #[tokio::test]
    async fn test_global_scan_matches_message() {
        let hits = scan(seeded().await)
            .search(&SearchRequest::new("reads", SearchScope::Global, 10))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, HitKind::Package);
        assert_eq!(hits[0].title, "lab/seq");
    }

    #[tokio::test]
    async fn test_package_scope_matches_logical_keys() {
        let hits = scan(seeded().await)
            .search(&SearchRequest::new(
                "csv",
                SearchScope::Package {
                    bucket: "reg".into(),
                    name: "lab/seq".into(),
                },
                10,
            ))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].logical_key.as_deref(), Some("reads.csv"));
        assert_eq!(hits[0].canonical_uri.as_deref(), Some("s3://reg/src/reads.csv"));
    }

    #[tokio::test]
    async fn test_global_scan_without_registry_fails() {
        let s = RegistryScan::new(
            BackendKind::CredentialOnly,
            Arc::new(FixedStore(Arc::new(MemoryStore::new()))),
            None,
        );
        let err = s
            .search(&SearchRequest::new("x", SearchScope::Global, 10))
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::Validation { field: "registry", .. }));
    }
}
