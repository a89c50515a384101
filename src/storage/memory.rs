//! In-memory [`ObjectStore`] implementation for tests and dry runs.
//!
//! Uses a `BTreeMap` behind `std::sync::RwLock` for thread safety. Every write
//! mints a new version id so copies and pointer updates behave like a
//! versioned bucket.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Listing, ObjectInfo, ObjectLocation, ObjectStore, StoreError};
use crate::models::RawBucket;

struct StoredObject {
    bytes: Vec<u8>,
    last_modified: DateTime<Utc>,
    version_id: String,
}

/// In-memory object store.
pub struct MemoryStore {
    objects: RwLock<BTreeMap<(String, String), StoredObject>>,
    buckets: RwLock<Vec<RawBucket>>,
    versions: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            buckets: RwLock::new(Vec::new()),
            versions: AtomicU64::new(0),
        }
    }

    /// Register a bucket record returned by [`ObjectStore::list_buckets`].
    pub fn add_bucket(&self, bucket: RawBucket) {
        self.buckets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(bucket);
    }

    /// Seed an object directly, bypassing the trait.
    pub fn insert(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        let version_id = self.next_version();
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                (bucket.to_string(), key.to_string()),
                StoredObject {
                    bytes: bytes.into(),
                    last_modified: Utc::now(),
                    version_id,
                },
            );
    }

    /// Every key currently stored in `bucket`.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    fn next_version(&self) -> String {
        format!("v{}", self.versions.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn info(bucket: &str, key: &str, obj: &StoredObject) -> ObjectInfo {
        ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size: obj.bytes.len() as u64,
            last_modified: Some(obj.last_modified),
            etag: None,
            version_id: Some(obj.version_id.clone()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(location: &ObjectLocation) -> StoreError {
    StoreError::NotFound {
        bucket: location.bucket.clone(),
        key: location.key.clone(),
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, location: &ObjectLocation) -> Result<Vec<u8>, StoreError> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .get(&(location.bucket.clone(), location.key.clone()))
            .map(|o| o.bytes.clone())
            .ok_or_else(|| not_found(location))
    }

    async fn head(&self, location: &ObjectLocation) -> Result<ObjectInfo, StoreError> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects
            .get(&(location.bucket.clone(), location.key.clone()))
            .map(|o| Self::info(&location.bucket, &location.key, o))
            .ok_or_else(|| not_found(location))
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.insert(bucket, key, body);
        Ok(())
    }

    async fn copy(
        &self,
        source: &ObjectLocation,
        bucket: &str,
        key: &str,
    ) -> Result<ObjectLocation, StoreError> {
        let bytes = self.get(source).await?;
        self.insert(bucket, key, bytes);
        let version_id = self
            .objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.version_id.clone());
        Ok(ObjectLocation {
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id,
        })
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
    ) -> Result<Listing, StoreError> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        let mut listing = Listing::default();
        let mut prefixes = BTreeSet::new();

        for ((b, key), obj) in objects.iter() {
            if b != bucket || !key.starts_with(prefix) {
                continue;
            }
            let rest = &key[prefix.len()..];
            match delimiter.and_then(|d| rest.find(d).map(|i| i + d.len())) {
                Some(cut) => {
                    prefixes.insert(format!("{}{}", prefix, &rest[..cut]));
                }
                None => listing.objects.push(Self::info(b, key, obj)),
            }
        }
        listing.common_prefixes = prefixes.into_iter().collect();
        Ok(listing)
    }

    async fn list_buckets(&self) -> Result<Vec<RawBucket>, StoreError> {
        Ok(self
            .buckets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_with_delimiter_rolls_up_prefixes() {
        let store = MemoryStore::new();
        store.insert("bkt", "raw/a.csv", "a");
        store.insert("bkt", "raw/nested/b.csv", "b");
        store.insert("bkt", "other/c.csv", "c");

        let listing = store.list("bkt", "raw/", Some("/")).await.unwrap();
        let keys: Vec<_> = listing.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["raw/a.csv"]);
        assert_eq!(listing.common_prefixes, vec!["raw/nested/".to_string()]);

        let all = store.list("bkt", "raw/", None).await.unwrap();
        assert_eq!(all.objects.len(), 2);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .get(&ObjectLocation::new("bkt", "nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_copy_mints_new_version() {
        let store = MemoryStore::new();
        store.insert("src", "a.csv", "data");
        let dest = store
            .copy(&ObjectLocation::new("src", "a.csv"), "dst", "pkg/a.csv")
            .await
            .unwrap();
        assert_eq!(dest.bucket, "dst");
        assert!(dest.version_id.is_some());
        assert_eq!(store.get(&dest).await.unwrap(), b"data".to_vec());
    }
}
