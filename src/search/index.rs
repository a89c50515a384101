//! Full-text index search.
//!
//! `GET {catalog}/api/search?index=…&action=search&query=…&size=N` with the
//! bearer token. The response is Elasticsearch-shaped:
//!
//! ```json
//! {"hits": {"hits": [
//!   {"_index": "raw-data", "_score": 3.2,
//!    "_source": {"key": "exp/a.csv", "version_id": "v1", "size": 12,
//!                "last_modified": "2024-05-01T00:00:00Z"}},
//!   {"_index": "raw-data_packages", "_score": 1.1,
//!    "_source": {"handle": "team/data", "hash": "…", "comment": "…",
//!                "metadata": "{\"team\": \"ml\"}"}}
//! ]}}
//! ```
//!
//! Documents from a `<bucket>_packages` index are package revisions; all
//! others are objects in `<bucket>`.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{HitCapability, SearchBackend, SearchRequest, SearchScope};
use crate::error::{OpsError, OpsResult};
use crate::http::{send_idempotent, RetryPolicy};
use crate::models::{parse_timestamp, BackendKind, HitKind, SearchHit};

pub const NAME: &str = "index";
const PACKAGE_INDEX_SUFFIX: &str = "_packages";

pub struct IndexSearch {
    kind: BackendKind,
    client: reqwest::Client,
    base_url: String,
    token: String,
    retry: RetryPolicy,
}

impl IndexSearch {
    pub fn new(
        kind: BackendKind,
        client: reqwest::Client,
        base_url: String,
        token: String,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            kind,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            retry,
        }
    }
}

fn index_param(scope: &SearchScope) -> String {
    match scope {
        SearchScope::Global => "_all".to_string(),
        // Package documents live in a sibling index, so a package scope
        // needs both to surface the package itself.
        SearchScope::Bucket { bucket } | SearchScope::Package { bucket, .. } => {
            format!("{},{}{}", bucket, bucket, PACKAGE_INDEX_SUFFIX)
        }
    }
}

fn metadata(raw: &Value) -> Map<String, Value> {
    match raw {
        Value::Object(m) => m.clone(),
        Value::String(s) => serde_json::from_str::<Value>(s)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        _ => Map::new(),
    }
}

/// Normalize one raw index document. Documents missing identity fields
/// are rejected.
pub fn parse_index_hit(raw: &Value) -> OpsResult<SearchHit> {
    let index = raw["_index"].as_str().unwrap_or_default();
    let score = raw["_score"].as_f64().unwrap_or(0.0);
    let src = &raw["_source"];

    let hit = match index.strip_suffix(PACKAGE_INDEX_SUFFIX) {
        Some(bucket) => {
            let name = src["handle"]
                .as_str()
                .or_else(|| src["ptr_name"].as_str())
                .unwrap_or_default();
            let hash = src["hash"]
                .as_str()
                .or_else(|| src["top_hash"].as_str())
                .unwrap_or_default();
            SearchHit::package(NAME, bucket, name, hash, score)?
                .with_description(src["comment"].as_str().map(String::from))
                .with_metadata(metadata(&src["metadata"]))
        }
        None => SearchHit::object(
            NAME,
            index,
            src["key"].as_str().unwrap_or_default(),
            src["version_id"].as_str(),
            score,
        )?,
    };
    Ok(hit
        .with_size(src["size"].as_u64())
        .with_last_modified(parse_timestamp(src["last_modified"].as_str())))
}

fn in_package(hit: &SearchHit, name: &str) -> bool {
    match hit.kind {
        HitKind::Package => hit.title == name,
        HitKind::Object => hit
            .logical_key
            .as_deref()
            .is_some_and(|k| k.starts_with(&format!("{}/", name))),
        HitKind::Summary => false,
    }
}

#[async_trait]
impl SearchBackend for IndexSearch {
    fn name(&self) -> &str {
        NAME
    }

    fn capability(&self) -> HitCapability {
        HitCapability::Individual
    }

    async fn search(&self, request: &SearchRequest) -> OpsResult<Vec<SearchHit>> {
        let url = format!("{}/api/search", self.base_url);
        let size = request.limit.to_string();
        let index = index_param(&request.scope);
        let params = [
            ("index", index.as_str()),
            ("action", "search"),
            ("query", request.query.as_str()),
            ("size", size.as_str()),
        ];

        let resp = send_idempotent(&self.retry, "index_search", || {
            self.client
                .get(&url)
                .bearer_auth(&self.token)
                .query(&params)
        })
        .await
        .map_err(|e| OpsError::backend_caused_by(self.kind, "index search request failed", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OpsError::backend(
                self.kind,
                format!("index search returned HTTP {}: {}", status.as_u16(), body),
            ));
        }
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| OpsError::backend_caused_by(self.kind, "index search response unreadable", e))?;

        let raw_hits = payload["hits"]["hits"].as_array().cloned().unwrap_or_default();
        let mut hits = Vec::with_capacity(raw_hits.len());
        for raw in &raw_hits {
            match parse_index_hit(raw) {
                Ok(hit) => hits.push(hit),
                Err(e) => tracing::warn!(
                    backend = NAME,
                    id = raw["_id"].as_str().unwrap_or("-"),
                    error = %e,
                    "rejected hit"
                ),
            }
        }
        if let SearchScope::Package { name, .. } = &request.scope {
            hits.retain(|h| in_package(h, name));
        }
        Ok(hits)
    }
}
