//! Package search through the catalog's GraphQL `searchPackages` field.
//!
//! The field returns a union: `PackagesSearchResultSet` carries `total`,
//! `stats`, and (when the server can produce it) `firstPage.hits`;
//! `EmptySearchResultSet` means no matches; `InvalidInput` carries errors.
//!
//! The server has been seen to report totals while failing to produce the
//! first page, so whether this source yields individual hits is declared
//! up front ([`HitCapability`]) from configuration. When configured for
//! individual hits and the page is still missing, the totals come back as a
//! single summary hit rather than being dropped.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{HitCapability, SearchBackend, SearchRequest, SearchScope};
use crate::backends::graphql_error;
use crate::error::{OpsError, OpsResult};
use crate::graphql::GraphqlClient;
use crate::models::{parse_timestamp, BackendKind, SearchHit};

pub const NAME: &str = "graph";

const SEARCH_QUERY: &str = r#"
query SearchPackages($buckets: [String!], $searchString: String!, $size: Int!) {
  searchPackages(buckets: $buckets, searchString: $searchString) {
    __typename
    ... on PackagesSearchResultSet {
      total
      stats { modified { min max } size { min max } }
      firstPage(size: $size) {
        hits { id score bucket name hash size modified comment }
      }
    }
    ... on InvalidInput { errors { message } }
  }
}
"#;

const TOTALS_QUERY: &str = r#"
query SearchPackageTotals($buckets: [String!], $searchString: String!) {
  searchPackages(buckets: $buckets, searchString: $searchString) {
    __typename
    ... on PackagesSearchResultSet {
      total
      stats { modified { min max } size { min max } }
    }
    ... on InvalidInput { errors { message } }
  }
}
"#;

pub struct GraphSearch {
    kind: BackendKind,
    client: GraphqlClient,
    capability: HitCapability,
}

impl GraphSearch {
    pub fn new(kind: BackendKind, client: GraphqlClient, capability: HitCapability) -> Self {
        Self {
            kind,
            client,
            capability,
        }
    }

    /// `search.graph_hits`: `"aggregate"` → totals only, anything else → individual.
    pub fn capability_from(setting: &str) -> HitCapability {
        if setting == "aggregate" {
            HitCapability::AggregateOnly
        } else {
            HitCapability::Individual
        }
    }
}

/// Normalize a `searchPackages` result for `query`.
pub fn parse_search_result(
    kind: BackendKind,
    result: &Value,
    query: &str,
    capability: HitCapability,
) -> OpsResult<Vec<SearchHit>> {
    match result["__typename"].as_str() {
        Some("EmptySearchResultSet") => Ok(Vec::new()),
        Some("InvalidInput") => {
            let messages: Vec<String> = result["errors"]
                .as_array()
                .map(|errs| {
                    errs.iter()
                        .filter_map(|e| e["message"].as_str().map(String::from))
                        .collect()
                })
                .unwrap_or_default();
            Err(OpsError::validation("query", messages.join("; ")))
        }
        Some("PackagesSearchResultSet") => {
            let total = result["total"].as_u64().unwrap_or(0);
            let summary = || {
                let mut stats = Map::new();
                if let Some(s) = result["stats"].as_object() {
                    stats.insert("stats".into(), Value::Object(s.clone()));
                }
                SearchHit::summary(NAME, query, total, stats)
            };

            if capability == HitCapability::AggregateOnly {
                return Ok(if total > 0 { vec![summary()] } else { Vec::new() });
            }
            let Some(raw_hits) = result["firstPage"]["hits"].as_array() else {
                if total > 0 {
                    tracing::warn!(total, "graph search reported totals without a first page");
                    return Ok(vec![summary()]);
                }
                return Ok(Vec::new());
            };

            let mut hits = Vec::with_capacity(raw_hits.len());
            for raw in raw_hits {
                let hit = SearchHit::package(
                    NAME,
                    raw["bucket"].as_str().unwrap_or_default(),
                    raw["name"].as_str().unwrap_or_default(),
                    raw["hash"].as_str().unwrap_or_default(),
                    raw["score"].as_f64().unwrap_or(0.0),
                );
                match hit {
                    Ok(hit) => hits.push(
                        hit.with_description(raw["comment"].as_str().map(String::from))
                            .with_size(raw["size"].as_u64())
                            .with_last_modified(parse_timestamp(raw["modified"].as_str())),
                    ),
                    Err(e) => tracing::warn!(
                        backend = NAME,
                        id = raw["id"].as_str().unwrap_or("-"),
                        error = %e,
                        "rejected hit"
                    ),
                }
            }
            Ok(hits)
        }
        other => Err(OpsError::backend(
            kind,
            format!("searchPackages returned unexpected type {:?}", other),
        )),
    }
}

#[async_trait]
impl SearchBackend for GraphSearch {
    fn name(&self) -> &str {
        NAME
    }

    fn capability(&self) -> HitCapability {
        self.capability
    }

    async fn search(&self, request: &SearchRequest) -> OpsResult<Vec<SearchHit>> {
        let buckets = request.scope.bucket().map(|b| vec![b.to_string()]);
        let (query, variables) = match self.capability {
            HitCapability::Individual => (
                SEARCH_QUERY,
                json!({
                    "buckets": buckets,
                    "searchString": request.query,
                    "size": request.limit,
                }),
            ),
            HitCapability::AggregateOnly => (
                TOTALS_QUERY,
                json!({ "buckets": buckets, "searchString": request.query }),
            ),
        };
        let data = self
            .client
            .execute(query, Some(variables))
            .await
            .map_err(|e| graphql_error(self.kind, e))?;

        let result = &data["searchPackages"];
        if result.is_null() {
            return Err(OpsError::backend(self.kind, "searchPackages returned null"));
        }
        let mut hits = parse_search_result(self.kind, result, &request.query, self.capability)?;
        if let SearchScope::Package { name, .. } = &request.scope {
            hits.retain(|h| h.canonical_uri.is_none() || &h.title == name);
        }
        Ok(hits)
    }
}
