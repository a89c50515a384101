//! Read and write paths served straight from a registry's package store.
//!
//! Shared by the library-backed and credential-only backends; they differ
//! only in how they obtain the object store and which writes they allow.

use std::sync::Arc;

use super::{package_error, store_error};
use crate::error::{OpsError, OpsResult};
use crate::manifest::Manifest;
use crate::models::{
    merge_user_meta, normalize_bucket, parse_timestamp, BackendKind, BucketDescriptor,
    ContentDescriptor, DiffRequest, DiffResult, PackageDescriptor, PackageName, Registry,
    RevisionRequest,
};
use crate::package_store::{entries_under, PackageStore, Revision};
use crate::storage::ObjectStore;

/// How many query tokens occur in a package's name, message, or metadata.
pub fn match_score(tokens: &[String], name: &str, manifest: &Manifest) -> usize {
    let mut haystack = name.to_lowercase();
    if let Some(ref msg) = manifest.message {
        haystack.push(' ');
        haystack.push_str(&msg.to_lowercase());
    }
    if !manifest.user_meta.is_empty() {
        haystack.push(' ');
        haystack.push_str(&serde_json::Value::Object(manifest.user_meta.clone()).to_string().to_lowercase());
    }
    tokens.iter().filter(|t| haystack.contains(t.as_str())).count()
}

pub fn tokenize(query: &str) -> Vec<String> {
    query.split_whitespace().map(|t| t.to_lowercase()).collect()
}

pub fn descriptor(registry: &Registry, revision: &Revision) -> OpsResult<PackageDescriptor> {
    let mut d = PackageDescriptor::new(revision.name.as_str(), registry, &revision.hash)?;
    d.size = revision.manifest.total_size();
    d.entry_count = revision.manifest.len() as u64;
    d.message = revision.manifest.message.clone();
    d.user_meta = revision.manifest.user_meta.clone();
    Ok(d)
}

async fn revisions(
    kind: BackendKind,
    store: &PackageStore,
) -> OpsResult<Vec<Revision>> {
    let listed = store.list_packages().await.map_err(|e| package_error(kind, e))?;
    let mut out = Vec::with_capacity(listed.len());
    for (name, hash) in listed {
        out.push(
            store
                .read_revision(&name, hash)
                .await
                .map_err(|e| package_error(kind, e))?,
        );
    }
    Ok(out)
}

pub async fn list_packages(
    kind: BackendKind,
    store: Arc<dyn ObjectStore>,
    registry: Registry,
) -> OpsResult<Vec<PackageDescriptor>> {
    let pkgs = PackageStore::new(store, registry);
    revisions(kind, &pkgs)
        .await?
        .iter()
        .map(|r| descriptor(pkgs.registry(), r))
        .collect()
}

/// Packages matching every token of `query`; an empty query lists all.
pub async fn search_packages(
    kind: BackendKind,
    store: Arc<dyn ObjectStore>,
    registry: Registry,
    query: &str,
) -> OpsResult<Vec<PackageDescriptor>> {
    let tokens = tokenize(query);
    let pkgs = PackageStore::new(store, registry);
    revisions(kind, &pkgs)
        .await?
        .iter()
        .filter(|r| match_score(&tokens, r.name.as_str(), &r.manifest) == tokens.len())
        .map(|r| descriptor(pkgs.registry(), r))
        .collect()
}

pub async fn browse(
    kind: BackendKind,
    store: Arc<dyn ObjectStore>,
    registry: Registry,
    package_name: &str,
    path: &str,
) -> OpsResult<Vec<ContentDescriptor>> {
    let name = PackageName::parse(package_name)?;
    let pkgs = PackageStore::new(store, registry);
    let revision = pkgs.load(&name, None).await.map_err(|e| package_error(kind, e))?;
    let entries = entries_under(&revision.manifest, path).map_err(|e| package_error(kind, e))?;
    Ok(entries
        .into_iter()
        .map(|e| ContentDescriptor {
            logical_key: e.logical_key.clone(),
            physical_key: e.physical_key().to_string(),
            size: e.size,
            last_modified: parse_timestamp(e.meta.get("last_modified").and_then(|v| v.as_str())),
        })
        .collect())
}

pub async fn diff(
    kind: BackendKind,
    store: Arc<dyn ObjectStore>,
    registry: Registry,
    request: &DiffRequest,
) -> OpsResult<DiffResult> {
    let name1 = PackageName::parse(&request.name1)?;
    let name2 = PackageName::parse(&request.name2)?;
    let pkgs = PackageStore::new(store, registry);
    let old = pkgs
        .load(&name1, request.hash1.as_deref())
        .await
        .map_err(|e| package_error(kind, e))?;
    let new = pkgs
        .load(&name2, request.hash2.as_deref())
        .await
        .map_err(|e| package_error(kind, e))?;

    let (added, modified, deleted) = old.manifest.diff(&new.manifest);
    Ok(DiffResult {
        added,
        deleted,
        modified,
    })
}

/// Normalize every bucket the credentials can see. Records without a
/// name are dropped; missing region or access become `"unknown"`.
pub async fn list_buckets(
    kind: BackendKind,
    store: Arc<dyn ObjectStore>,
) -> OpsResult<Vec<BucketDescriptor>> {
    let raw = store.list_buckets().await.map_err(|e| store_error(kind, e))?;
    Ok(raw
        .into_iter()
        .filter_map(|b| match normalize_bucket(b) {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!(error = %e, "skipping bucket record");
                None
            }
        })
        .collect())
}

fn validate_revision_request(request: &RevisionRequest) -> OpsResult<PackageName> {
    let name = PackageName::parse(&request.name)?;
    if request.source_uris.iter().all(|u| u.trim().is_empty()) {
        return Err(OpsError::validation("source_uris", "at least one source URI is required"));
    }
    Ok(name)
}

fn non_empty(message: &str) -> Option<String> {
    Some(message.trim().to_string()).filter(|m| !m.is_empty())
}

/// Write a revision containing only the given sources. Returns
/// `(top hash, entries added)`.
pub async fn create(
    kind: BackendKind,
    store: Arc<dyn ObjectStore>,
    registry: Registry,
    request: &RevisionRequest,
) -> OpsResult<(String, usize)> {
    let name = validate_revision_request(request)?;
    let pkgs = PackageStore::new(store, registry);
    let staged = pkgs
        .stage(&request.source_uris, request.auto_organize)
        .await
        .map_err(|e| package_error(kind, e))?;
    let added = staged.len();
    let manifest = Manifest::new(
        non_empty(&request.message),
        request.metadata.clone().unwrap_or_default(),
    );
    let hash = pkgs
        .push(&name, manifest, staged, request.copy_mode)
        .await
        .map_err(|e| package_error(kind, e))?;
    Ok((hash, added))
}

/// Write a new revision on top of the latest one: caller metadata merged
/// over existing, new sources replacing entries at the same logical key.
pub async fn update(
    kind: BackendKind,
    store: Arc<dyn ObjectStore>,
    registry: Registry,
    request: &RevisionRequest,
) -> OpsResult<(String, usize)> {
    let name = validate_revision_request(request)?;
    let pkgs = PackageStore::new(store, registry);
    let existing = pkgs.load(&name, None).await.map_err(|e| package_error(kind, e))?;

    let mut manifest = existing.manifest.clone();
    manifest.user_meta = merge_user_meta(&existing.manifest.user_meta, request.metadata.as_ref());
    manifest.message = non_empty(&request.message).or(existing.manifest.message.clone());

    let staged = pkgs
        .stage(&request.source_uris, request.auto_organize)
        .await
        .map_err(|e| package_error(kind, e))?;
    let added = staged.len();
    let hash = pkgs
        .push(&name, manifest, staged, request.copy_mode)
        .await
        .map_err(|e| package_error(kind, e))?;
    tracing::info!(package = %name, from = %existing.hash, to = %hash, "updated package");
    Ok((hash, added))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CopyMode, UserMeta};
    use serde_json::json;

    #[test]
    fn test_match_score_counts_tokens() {
        let mut meta = UserMeta::new();
        meta.insert("team".into(), json!("Genomics"));
        let m = Manifest::new(Some("Nightly CSV export".into()), meta);
        let tokens = tokenize("csv genomics missing");
        assert_eq!(match_score(&tokens, "lab/exports", &m), 2);
        assert_eq!(match_score(&tokenize("lab"), "lab/exports", &m), 1);
    }

    #[tokio::test]
    async fn test_create_requires_sources() {
        let store: Arc<dyn ObjectStore> = Arc::new(crate::storage::memory::MemoryStore::new());
        let req = RevisionRequest {
            name: "team/data".into(),
            source_uris: vec![],
            registry: None,
            metadata: None,
            message: String::new(),
            auto_organize: true,
            copy_mode: CopyMode::None,
        };
        let err = create(
            BackendKind::Library,
            store,
            Registry::parse("s3://reg").unwrap(),
            &req,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OpsError::Validation { field: "source_uris", .. }));
    }
}
