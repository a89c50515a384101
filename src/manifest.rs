//! Package manifests: the content-addressed description of one revision.
//!
//! A manifest is stored as JSON lines. The first line is the header; every
//! further line is one entry:
//!
//! ```text
//! {"version":"v0","message":"initial","user_meta":{"team":"ml"}}
//! {"logical_key":"data/a.csv","physical_keys":["s3://bkt/raw/a.csv"],"size":12,"hash":{"type":"SHA256","value":"…"},"meta":{}}
//! ```
//!
//! The top hash identifies the revision. It is the SHA-256 over the
//! canonical JSON of the header followed by each entry's
//! `{logical_key, hash, size, meta}` in logical-key order, so it changes
//! whenever content, layout, message, or metadata change, and does not
//! depend on where bytes physically live.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::models::UserMeta;

pub const MANIFEST_VERSION: &str = "v0";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is empty")]
    Empty,
    #[error("manifest line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported manifest version '{0}'")]
    Version(String),
    #[error("duplicate logical key '{0}'")]
    DuplicateKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryHash {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl EntryHash {
    pub fn sha256_of(bytes: &[u8]) -> Self {
        Self {
            kind: "SHA256".to_string(),
            value: hex::encode(Sha256::digest(bytes)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub logical_key: String,
    pub physical_keys: Vec<String>,
    pub size: u64,
    pub hash: EntryHash,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl ManifestEntry {
    pub fn physical_key(&self) -> &str {
        self.physical_keys.first().map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    version: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    user_meta: UserMeta,
}

/// One package revision's content listing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Manifest {
    pub message: Option<String>,
    pub user_meta: UserMeta,
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new(message: Option<String>, user_meta: UserMeta) -> Self {
        Self {
            message,
            user_meta,
            entries: BTreeMap::new(),
        }
    }

    /// Insert or replace the entry at its logical key.
    pub fn set(&mut self, entry: ManifestEntry) {
        self.entries.insert(entry.logical_key.clone(), entry);
    }

    pub fn get(&self, logical_key: &str) -> Option<&ManifestEntry> {
        self.entries.get(logical_key)
    }

    pub fn get_mut(&mut self, logical_key: &str) -> Option<&mut ManifestEntry> {
        self.entries.get_mut(logical_key)
    }

    /// Entries in logical-key order.
    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }

    pub fn top_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let header = json!({
            "version": MANIFEST_VERSION,
            "message": self.message,
            "user_meta": self.user_meta,
        });
        hasher.update(header.to_string().as_bytes());
        for entry in self.entries.values() {
            let line = json!({
                "logical_key": entry.logical_key,
                "hash": entry.hash,
                "size": entry.size,
                "meta": entry.meta,
            });
            hasher.update(line.to_string().as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Compare `self` (old) against `other` (new).
    ///
    /// Returns `(added, modified, deleted)` logical keys, each sorted.
    /// An entry counts as modified when its content hash differs.
    pub fn diff(&self, other: &Manifest) -> (Vec<String>, Vec<String>, Vec<String>) {
        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut deleted = Vec::new();

        for (key, entry) in &self.entries {
            match other.entries.get(key) {
                None => deleted.push(key.clone()),
                Some(o) if o.hash != entry.hash => modified.push(key.clone()),
                Some(_) => {}
            }
        }
        for key in other.entries.keys() {
            if !self.entries.contains_key(key) {
                added.push(key.clone());
            }
        }
        (added, modified, deleted)
    }

    pub fn to_jsonl(&self) -> String {
        let header = Header {
            version: MANIFEST_VERSION.to_string(),
            message: self.message.clone(),
            user_meta: self.user_meta.clone(),
        };
        let mut out = serde_json::to_string(&header).unwrap_or_default();
        out.push('\n');
        for entry in self.entries.values() {
            out.push_str(&serde_json::to_string(entry).unwrap_or_default());
            out.push('\n');
        }
        out
    }

    pub fn from_jsonl(text: &str) -> Result<Self, ManifestError> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty());
        let (_, first) = lines.next().ok_or(ManifestError::Empty)?;
        let header: Header = serde_json::from_str(first)
            .map_err(|source| ManifestError::Parse { line: 1, source })?;
        if header.version != MANIFEST_VERSION {
            return Err(ManifestError::Version(header.version));
        }

        let mut manifest = Manifest::new(header.message, header.user_meta);
        for (i, line) in lines {
            let entry: ManifestEntry = serde_json::from_str(line)
                .map_err(|source| ManifestError::Parse { line: i + 1, source })?;
            if manifest.entries.contains_key(&entry.logical_key) {
                return Err(ManifestError::DuplicateKey(entry.logical_key));
            }
            manifest.set(entry);
        }
        Ok(manifest)
    }
}
