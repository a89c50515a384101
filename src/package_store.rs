//! Native package engine: revisions stored as manifests inside a registry
//! bucket.
//!
//! # Layout
//!
//! ```text
//! s3://<registry>/
//!   .pkgstore/packages/<tophash>                     manifest (JSON lines)
//!   .pkgstore/named_packages/<ns>/<name>/latest      pointer → tophash
//!   .pkgstore/named_packages/<ns>/<name>/<unix-ts>   pointer → tophash
//!   <ns>/<name>/<logical key>                        copied object bytes
//! ```
//!
//! Manifests are never rewritten: a push always writes a new manifest and
//! moves `latest`, so every prior revision stays readable by hash.

use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::manifest::{EntryHash, Manifest, ManifestEntry, ManifestError};
use crate::models::{CopyMode, PackageName, Registry};
use crate::storage::{ObjectInfo, ObjectLocation, ObjectStore, StoreError};

pub const STORE_PREFIX: &str = ".pkgstore";
pub const MIN_SHORT_HASH: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("revision {hash} of '{name}' has an invalid manifest: {source}")]
    Manifest {
        name: String,
        hash: String,
        #[source]
        source: ManifestError,
    },

    #[error("package '{0}' has no revisions")]
    NoSuchPackage(String),

    #[error("no revision of '{name}' matches '{hash}'")]
    NoSuchRevision { name: String, hash: String },

    #[error("hash prefix '{0}' matches more than one revision")]
    AmbiguousHash(String),

    #[error("'{0}' is not a revision hash (need at least 6 hex characters)")]
    InvalidHash(String),

    #[error("no objects found under {0}")]
    EmptySource(String),

    #[error("logical key '{key}' is produced by both {first} and {second}")]
    KeyCollision {
        key: String,
        first: String,
        second: String,
    },

    #[error("path '{0}' does not exist in the package")]
    NoSuchPath(String),
}

/// A loaded revision.
#[derive(Debug, Clone)]
pub struct Revision {
    pub name: PackageName,
    pub hash: String,
    pub manifest: Manifest,
}

/// A source object chosen for inclusion, before its bytes are hashed.
#[derive(Debug, Clone)]
pub struct StagedObject {
    pub logical_key: String,
    pub source: ObjectLocation,
    pub info: ObjectInfo,
}

pub struct PackageStore {
    store: Arc<dyn ObjectStore>,
    registry: Registry,
}

impl PackageStore {
    pub fn new(store: Arc<dyn ObjectStore>, registry: Registry) -> Self {
        Self { store, registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn bucket(&self) -> &str {
        self.registry.bucket()
    }

    fn manifest_key(hash: &str) -> String {
        format!("{}/packages/{}", STORE_PREFIX, hash)
    }

    fn pointer_key(name: &PackageName, pointer: &str) -> String {
        format!("{}/named_packages/{}/{}", STORE_PREFIX, name, pointer)
    }

    async fn read_pointer(&self, name: &PackageName, pointer: &str) -> Result<String, PackageError> {
        let loc = ObjectLocation::new(self.bucket(), Self::pointer_key(name, pointer));
        match self.store.get(&loc).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).trim().to_string()),
            Err(StoreError::NotFound { .. }) => Err(PackageError::NoSuchPackage(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve `hash` (full, short, or absent for `latest`) to a full top hash.
    pub async fn resolve_hash(
        &self,
        name: &PackageName,
        hash: Option<&str>,
    ) -> Result<String, PackageError> {
        let Some(raw) = hash.map(str::trim).filter(|h| !h.is_empty()) else {
            return self.read_pointer(name, "latest").await;
        };
        let prefix = raw.to_ascii_lowercase();
        if prefix.len() < MIN_SHORT_HASH || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(PackageError::InvalidHash(raw.to_string()));
        }

        let listing = self
            .store
            .list(self.bucket(), &Self::manifest_key(&prefix), None)
            .await?;
        let mut matches = listing
            .objects
            .iter()
            .filter_map(|o| o.key.rsplit('/').next())
            .map(str::to_string);
        match (matches.next(), matches.next()) {
            (Some(full), None) => Ok(full),
            (Some(_), Some(_)) => Err(PackageError::AmbiguousHash(raw.to_string())),
            (None, _) => Err(PackageError::NoSuchRevision {
                name: name.to_string(),
                hash: raw.to_string(),
            }),
        }
    }

    /// Load a revision by name and optional (short) hash.
    pub async fn load(&self, name: &PackageName, hash: Option<&str>) -> Result<Revision, PackageError> {
        let hash = self.resolve_hash(name, hash).await?;
        self.read_revision(name, hash).await
    }

    /// Read the manifest for an already-resolved full hash.
    pub async fn read_revision(&self, name: &PackageName, hash: String) -> Result<Revision, PackageError> {
        let loc = ObjectLocation::new(self.bucket(), Self::manifest_key(&hash));
        let bytes = match self.store.get(&loc).await {
            Ok(b) => b,
            Err(StoreError::NotFound { .. }) => {
                return Err(PackageError::NoSuchRevision {
                    name: name.to_string(),
                    hash,
                })
            }
            Err(e) => return Err(e.into()),
        };
        let manifest = Manifest::from_jsonl(&String::from_utf8_lossy(&bytes)).map_err(|source| {
            PackageError::Manifest {
                name: name.to_string(),
                hash: hash.clone(),
                source,
            }
        })?;
        Ok(Revision {
            name: name.clone(),
            hash,
            manifest,
        })
    }

    /// Every named package in the registry with its `latest` hash, sorted by name.
    pub async fn list_packages(&self) -> Result<Vec<(PackageName, String)>, PackageError> {
        let prefix = format!("{}/named_packages/", STORE_PREFIX);
        let listing = self.store.list(self.bucket(), &prefix, None).await?;

        let mut names = Vec::new();
        for obj in &listing.objects {
            let Some(name) = obj
                .key
                .strip_prefix(&prefix)
                .and_then(|k| k.strip_suffix("/latest"))
            else {
                continue;
            };
            match PackageName::parse(name) {
                Ok(n) => names.push(n),
                Err(_) => tracing::warn!(key = %obj.key, "skipping malformed package pointer"),
            }
        }
        names.sort();

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let hash = self.read_pointer(&name, "latest").await?;
            if hash.is_empty() {
                tracing::warn!(package = %name, "skipping package with empty latest pointer");
                continue;
            }
            out.push((name, hash));
        }
        Ok(out)
    }

    /// Expand source URIs into objects with logical keys.
    ///
    /// With `auto_organize` the object key path becomes the logical key;
    /// otherwise only the base filename is kept. Two sources landing on one
    /// logical key is an error.
    pub async fn stage(
        &self,
        source_uris: &[String],
        auto_organize: bool,
    ) -> Result<Vec<StagedObject>, PackageError> {
        let mut staged = Vec::new();
        let mut seen: HashMap<String, String> = HashMap::new();

        for uri in source_uris {
            let loc = ObjectLocation::parse(uri)?;
            let objects = if loc.is_prefix() {
                let listing = self.store.list(&loc.bucket, &loc.key, None).await?;
                let objs: Vec<_> = listing
                    .objects
                    .into_iter()
                    .filter(|o| !o.key.ends_with('/'))
                    .map(|o| (ObjectLocation::new(&o.bucket, &o.key), o))
                    .collect();
                if objs.is_empty() {
                    return Err(PackageError::EmptySource(uri.clone()));
                }
                objs
            } else {
                let info = self.store.head(&loc).await?;
                vec![(loc.clone(), info)]
            };

            for (source, info) in objects {
                let logical_key = if auto_organize {
                    info.key.clone()
                } else {
                    info.key.rsplit('/').next().unwrap_or(&info.key).to_string()
                };
                let origin = source.to_string();
                if let Some(first) = seen.insert(logical_key.clone(), origin.clone()) {
                    return Err(PackageError::KeyCollision {
                        key: logical_key,
                        first,
                        second: origin,
                    });
                }
                staged.push(StagedObject {
                    logical_key,
                    source,
                    info,
                });
            }
        }
        Ok(staged)
    }

    /// Add staged objects to `manifest`, write it, and move `latest`.
    ///
    /// Objects selected by `copy_mode` are copied under `<ns>/<name>/` in the
    /// registry bucket; the rest are referenced in place. Returns the new
    /// top hash.
    pub async fn push(
        &self,
        name: &PackageName,
        mut manifest: Manifest,
        staged: Vec<StagedObject>,
        copy_mode: CopyMode,
    ) -> Result<String, PackageError> {
        for object in staged {
            let bytes = self.store.get(&object.source).await?;
            let physical = if copy_mode.copies(&object.source.bucket, self.bucket()) {
                let dest_key = format!("{}/{}", name, object.logical_key);
                self.store
                    .copy(&object.source, self.bucket(), &dest_key)
                    .await?
                    .to_string()
            } else {
                object.source.to_string()
            };

            let mut meta = Map::new();
            if let Some(ts) = object.info.last_modified {
                meta.insert("last_modified".into(), Value::String(ts.to_rfc3339()));
            }
            manifest.set(ManifestEntry {
                logical_key: object.logical_key,
                physical_keys: vec![physical],
                size: bytes.len() as u64,
                hash: EntryHash::sha256_of(&bytes),
                meta,
            });
        }

        let top_hash = manifest.top_hash();
        let body = manifest.to_jsonl().into_bytes();
        self.store
            .put(self.bucket(), &Self::manifest_key(&top_hash), body)
            .await?;
        let stamp = Utc::now().timestamp().to_string();
        self.store
            .put(
                self.bucket(),
                &Self::pointer_key(name, &stamp),
                top_hash.clone().into_bytes(),
            )
            .await?;
        self.store
            .put(
                self.bucket(),
                &Self::pointer_key(name, "latest"),
                top_hash.clone().into_bytes(),
            )
            .await?;
        tracing::info!(package = %name, hash = %top_hash, entries = manifest.len(), "pushed revision");
        Ok(top_hash)
    }
}

/// Entries at or below `path` (`""` means the whole package).
pub fn entries_under<'a>(
    manifest: &'a Manifest,
    path: &str,
) -> Result<Vec<&'a ManifestEntry>, PackageError> {
    let path = path.trim_matches('/');
    if path.is_empty() {
        return Ok(manifest.entries().collect());
    }
    let dir = format!("{}/", path);
    let found: Vec<_> = manifest
        .entries()
        .filter(|e| e.logical_key == path || e.logical_key.starts_with(&dir))
        .collect();
    if found.is_empty() {
        return Err(PackageError::NoSuchPath(path.to_string()));
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserMeta;
    use crate::storage::memory::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, PackageStore) {
        let mem = Arc::new(MemoryStore::new());
        mem.insert("raw", "exp/a.csv", "1,2,3");
        mem.insert("raw", "exp/sub/b.csv", "4,5,6");
        mem.insert("raw", "other/a.csv", "7,8,9");
        mem.insert("reg", "inbox/c.json", "{}");
        let store = PackageStore::new(mem.clone(), Registry::parse("s3://reg").unwrap());
        (mem, store)
    }

    fn name() -> PackageName {
        PackageName::parse("team/data").unwrap()
    }

    #[tokio::test]
    async fn test_stage_auto_organize_keeps_paths() {
        let (_, store) = setup();
        let staged = store
            .stage(&["s3://raw/exp/".to_string()], true)
            .await
            .unwrap();
        let keys: Vec<_> = staged.iter().map(|s| s.logical_key.as_str()).collect();
        assert_eq!(keys, vec!["exp/a.csv", "exp/sub/b.csv"]);
    }

    #[tokio::test]
    async fn test_stage_flatten_detects_collisions() {
        let (_, store) = setup();
        let err = store
            .stage(
                &["s3://raw/exp/a.csv".to_string(), "s3://raw/other/a.csv".to_string()],
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::KeyCollision { key, .. } if key == "a.csv"));
    }

    #[tokio::test]
    async fn test_stage_empty_prefix_fails() {
        let (_, store) = setup();
        let err = store
            .stage(&["s3://raw/missing/".to_string()], true)
            .await
            .unwrap_err();
        assert!(matches!(err, PackageError::EmptySource(_)));
    }

    #[tokio::test]
    async fn test_push_same_bucket_copies_only_registry_objects() {
        let (mem, store) = setup();
        let staged = store
            .stage(
                &["s3://raw/exp/a.csv".to_string(), "s3://reg/inbox/c.json".to_string()],
                false,
            )
            .await
            .unwrap();
        let hash = store
            .push(&name(), Manifest::default(), staged, CopyMode::SameBucket)
            .await
            .unwrap();

        let rev = store.load(&name(), None).await.unwrap();
        assert_eq!(rev.hash, hash);
        assert!(rev
            .manifest
            .get("a.csv")
            .unwrap()
            .physical_key()
            .starts_with("s3://raw/exp/a.csv"));
        assert!(rev
            .manifest
            .get("c.json")
            .unwrap()
            .physical_key()
            .starts_with("s3://reg/team/data/c.json"));
        assert!(mem.keys("reg").contains(&"team/data/c.json".to_string()));
        assert!(!mem.keys("reg").contains(&"team/data/a.csv".to_string()));
    }

    #[tokio::test]
    async fn test_short_hash_resolution() {
        let (_, store) = setup();
        let staged = store
            .stage(&["s3://raw/exp/a.csv".to_string()], true)
            .await
            .unwrap();
        let hash = store
            .push(&name(), Manifest::new(None, UserMeta::new()), staged, CopyMode::None)
            .await
            .unwrap();

        let resolved = store.resolve_hash(&name(), Some(&hash[..8])).await.unwrap();
        assert_eq!(resolved, hash);
        assert!(matches!(
            store.resolve_hash(&name(), Some("abc")).await,
            Err(PackageError::InvalidHash(_))
        ));
        assert!(matches!(
            store.resolve_hash(&name(), Some("ffffffffff")).await,
            Err(PackageError::NoSuchRevision { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_package_and_listing() {
        let (_, store) = setup();
        assert!(matches!(
            store.load(&name(), None).await,
            Err(PackageError::NoSuchPackage(_))
        ));
        assert!(store.list_packages().await.unwrap().is_empty());

        let staged = store
            .stage(&["s3://raw/exp/a.csv".to_string()], true)
            .await
            .unwrap();
        store
            .push(&name(), Manifest::default(), staged, CopyMode::None)
            .await
            .unwrap();
        let listed = store.list_packages().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0.as_str(), "team/data");
    }

    #[test]
    fn test_entries_under_path() {
        let mut m = Manifest::default();
        for key in ["a.csv", "dir/b.csv", "dir/c.csv", "dirt.csv"] {
            m.set(ManifestEntry {
                logical_key: key.into(),
                physical_keys: vec![format!("s3://b/{}", key)],
                size: 1,
                hash: EntryHash::sha256_of(key.as_bytes()),
                meta: Map::new(),
            });
        }
        assert_eq!(entries_under(&m, "").unwrap().len(), 4);
        assert_eq!(entries_under(&m, "dir/").unwrap().len(), 2);
        assert_eq!(entries_under(&m, "a.csv").unwrap().len(), 1);
        assert!(matches!(
            entries_under(&m, "nope"),
            Err(PackageError::NoSuchPath(_))
        ));
    }
}
