//! Multi-source search aggregation.
//!
//! The aggregator fans one [`SearchRequest`] out to every
//! [`SearchBackend`] concurrently and merges what comes back:
//!
//! ```text
//!   ┌────────┐  ┌────────┐  ┌───────────────┐
//!   │ index  │  │ graph  │  │ registry-scan │   (declaration order)
//!   └───┬────┘  └───┬────┘  └──────┬────────┘
//!       │ timeout   │ timeout      │ timeout
//!       ▼           ▼              ▼
//!   min-max normalize per backend → dedupe by canonical URI
//!       → sort (score desc, backend order, rank) → truncate(limit)
//!       → append summary hits
//! ```
//!
//! A backend that errors or times out is excluded and recorded in
//! [`SearchOutcome::failures`]. Only when every backend fails does the
//! aggregator return [`OpsError::SearchUnavailable`].

pub mod graph;
pub mod index;
pub mod registry_scan;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::error::{BackendFailure, OpsError, OpsResult};
use crate::models::{HitKind, SearchHit};

/// What kind of results a backend can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HitCapability {
    /// Individual package/object hits.
    Individual,
    /// Totals only; every result is a `kind = summary` hit.
    AggregateOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchScope {
    Global,
    Bucket { bucket: String },
    Package { bucket: String, name: String },
}

impl SearchScope {
    pub fn bucket(&self) -> Option<&str> {
        match self {
            SearchScope::Global => None,
            SearchScope::Bucket { bucket } | SearchScope::Package { bucket, .. } => Some(bucket),
        }
    }

    /// Build a scope from loose transport parameters.
    pub fn from_parts(scope: &str, bucket: Option<&str>, package: Option<&str>) -> OpsResult<Self> {
        let bucket = bucket
            .map(|b| b.trim().trim_start_matches("s3://").trim_end_matches('/'))
            .filter(|b| !b.is_empty());
        match scope {
            "global" => Ok(SearchScope::Global),
            "bucket" => Ok(SearchScope::Bucket {
                bucket: bucket
                    .ok_or_else(|| OpsError::validation("bucket", "bucket scope needs a bucket"))?
                    .to_string(),
            }),
            "package" => Ok(SearchScope::Package {
                bucket: bucket
                    .ok_or_else(|| OpsError::validation("bucket", "package scope needs a bucket"))?
                    .to_string(),
                name: package
                    .filter(|p| !p.trim().is_empty())
                    .ok_or_else(|| {
                        OpsError::validation("package_name", "package scope needs a package name")
                    })?
                    .to_string(),
            }),
            other => Err(OpsError::validation(
                "scope",
                format!("'{}' is not one of global, bucket, package", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest {
    pub query: String,
    pub scope: SearchScope,
    /// Maximum individual hits; `0` means the configured default.
    pub limit: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, scope: SearchScope, limit: usize) -> Self {
        Self {
            query: query.into(),
            scope,
            limit,
        }
    }
}

/// One query-capable source feeding the aggregator.
///
/// Implementations return hits in their own rank order with raw scores;
/// the aggregator normalizes.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Tag recorded on hits and failures (`"index"`, `"graph"`, …).
    fn name(&self) -> &str;

    fn capability(&self) -> HitCapability;

    async fn search(&self, request: &SearchRequest) -> OpsResult<Vec<SearchHit>>;
}

#[derive(Debug, Clone)]
pub struct AggregateOptions {
    pub per_backend_timeout: Duration,
    /// Overall bound; in-flight queries are aborted when it elapses.
    pub deadline: Option<Duration>,
    pub default_limit: usize,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            per_backend_timeout: Duration::from_secs(10),
            deadline: None,
            default_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    /// Individual hits, then summary hits.
    pub hits: Vec<SearchHit>,
    pub failures: Vec<BackendFailure>,
    /// Backends that contributed, in declaration order.
    pub backends: Vec<String>,
}

/// Min-max normalize raw scores into [0, 1]. Equal scores all become 1.0.
pub fn normalize_scores(hits: &mut [SearchHit]) {
    if hits.is_empty() {
        return;
    }
    let s_min = hits.iter().map(|h| h.score).fold(f64::INFINITY, f64::min);
    let s_max = hits.iter().map(|h| h.score).fold(f64::NEG_INFINITY, f64::max);
    for hit in hits.iter_mut() {
        hit.score = if (s_max - s_min).abs() < f64::EPSILON {
            1.0
        } else {
            (hit.score - s_min) / (s_max - s_min)
        };
    }
}

struct Ranked {
    hit: SearchHit,
    order: usize,
    rank: usize,
}

pub async fn aggregate_search(
    backends: &[Arc<dyn SearchBackend>],
    mut request: SearchRequest,
    options: &AggregateOptions,
) -> OpsResult<SearchOutcome> {
    if request.query.trim().is_empty() {
        return Err(OpsError::validation("query", "search query is empty"));
    }
    if backends.is_empty() {
        return Err(OpsError::SearchUnavailable {
            failures: vec![BackendFailure {
                backend: "none".into(),
                reason: "no search backends available for this authentication".into(),
            }],
        });
    }
    if request.limit == 0 {
        request.limit = options.default_limit.max(1);
    }
    let request = Arc::new(request);

    let mut set = JoinSet::new();
    for (order, backend) in backends.iter().enumerate() {
        let backend = backend.clone();
        let request = request.clone();
        let timeout = options.per_backend_timeout;
        set.spawn(async move {
            let result = match tokio::time::timeout(timeout, backend.search(&request)).await {
                Ok(Ok(hits)) => Ok(hits),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {}s", timeout.as_secs_f64())),
            };
            (order, result)
        });
    }

    let mut results: Vec<Option<Result<Vec<SearchHit>, String>>> =
        (0..backends.len()).map(|_| None).collect();
    let deadline = options.deadline.map(|d| tokio::time::Instant::now() + d);
    let mut deadline_hit = false;

    loop {
        let next = match deadline {
            Some(at) => match tokio::time::timeout_at(at, set.join_next()).await {
                Ok(next) => next,
                Err(_) => {
                    set.abort_all();
                    deadline_hit = true;
                    break;
                }
            },
            None => set.join_next().await,
        };
        match next {
            Some(Ok((order, result))) => results[order] = Some(result),
            Some(Err(e)) => tracing::warn!(error = %e, "search task did not complete"),
            None => break,
        }
    }

    let mut failures = Vec::new();
    let mut contributed = Vec::new();
    let mut individual: Vec<Ranked> = Vec::new();
    let mut summaries = Vec::new();

    for (order, backend) in backends.iter().enumerate() {
        let name = backend.name().to_string();
        let hits = match results[order].take() {
            Some(Ok(hits)) => hits,
            Some(Err(reason)) => {
                tracing::warn!(backend = %name, %reason, "search backend excluded");
                failures.push(BackendFailure {
                    backend: name,
                    reason,
                });
                continue;
            }
            None => {
                let reason = if deadline_hit {
                    "cancelled: aggregate search deadline elapsed".to_string()
                } else {
                    "search task did not complete".to_string()
                };
                tracing::warn!(backend = %name, %reason, "search backend excluded");
                failures.push(BackendFailure {
                    backend: name,
                    reason,
                });
                continue;
            }
        };
        contributed.push(name.clone());

        let (mut own, summary): (Vec<_>, Vec<_>) =
            hits.into_iter().partition(|h| h.kind != HitKind::Summary);
        if backend.capability() == HitCapability::AggregateOnly && !own.is_empty() {
            tracing::warn!(
                backend = %name,
                dropped = own.len(),
                "aggregate-only backend returned individual hits; dropping them"
            );
            own.clear();
        }
        own.retain(|h| {
            let ok = h.canonical_uri.as_deref().is_some_and(|u| !u.is_empty());
            if !ok {
                tracing::warn!(backend = %name, id = %h.id, "rejected hit without canonical URI");
            }
            ok
        });
        normalize_scores(&mut own);
        individual.extend(
            own.into_iter()
                .enumerate()
                .map(|(rank, hit)| Ranked { hit, order, rank }),
        );
        summaries.extend(summary);
    }

    if contributed.is_empty() {
        return Err(OpsError::SearchUnavailable { failures });
    }

    let mut hits = merge(individual);
    hits.truncate(request.limit);
    hits.extend(summaries);

    Ok(SearchOutcome {
        hits,
        failures,
        backends: contributed,
    })
}

/// Dedupe by canonical URI keeping the higher score, then order.
fn merge(candidates: Vec<Ranked>) -> Vec<SearchHit> {
    let mut by_uri: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<Ranked> = Vec::new();

    for cand in candidates {
        let uri = cand.hit.canonical_uri.clone().unwrap_or_default();
        match by_uri.get(&uri) {
            Some(&idx) => {
                let existing = &merged[idx];
                if cand.hit.score > existing.hit.score
                    || (cand.hit.score == existing.hit.score && cand.order < existing.order)
                {
                    merged[idx] = cand;
                }
            }
            None => {
                by_uri.insert(uri, merged.len());
                merged.push(cand);
            }
        }
    }

    merged.sort_by(|a, b| {
        b.hit
            .score
            .total_cmp(&a.hit.score)
            .then(a.order.cmp(&b.order))
            .then(a.rank.cmp(&b.rank))
    });
    merged.into_iter().map(|r| r.hit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixed {
        name: &'static str,
        capability: HitCapability,
        result: Result<Vec<SearchHit>, &'static str>,
        delay: Duration,
    }

    impl Fixed {
        fn ok(name: &'static str, hits: Vec<SearchHit>) -> Arc<dyn SearchBackend> {
            Arc::new(Self {
                name,
                capability: HitCapability::Individual,
                result: Ok(hits),
                delay: Duration::ZERO,
            })
        }

        fn failing(name: &'static str) -> Arc<dyn SearchBackend> {
            Arc::new(Self {
                name,
                capability: HitCapability::Individual,
                result: Err("HTTP 500"),
                delay: Duration::ZERO,
            })
        }

        fn slow(name: &'static str, delay: Duration) -> Arc<dyn SearchBackend> {
            Arc::new(Self {
                name,
                capability: HitCapability::Individual,
                result: Ok(vec![pkg(name, "team/slow", 1.0)]),
                delay,
            })
        }
    }

    #[async_trait]
    impl SearchBackend for Fixed {
        fn name(&self) -> &str {
            self.name
        }
        fn capability(&self) -> HitCapability {
            self.capability
        }
        async fn search(&self, _request: &SearchRequest) -> OpsResult<Vec<SearchHit>> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match &self.result {
                Ok(hits) => Ok(hits.clone()),
                Err(msg) => Err(OpsError::backend(
                    crate::models::BackendKind::PlatformApi,
                    *msg,
                )),
            }
        }
    }

    /// Records whether its query ran to completion.
    struct Flagging {
        finished: Arc<AtomicBool>,
        delay: Duration,
    }

    #[async_trait]
    impl SearchBackend for Flagging {
        fn name(&self) -> &str {
            "flagging"
        }
        fn capability(&self) -> HitCapability {
            HitCapability::Individual
        }
        async fn search(&self, _request: &SearchRequest) -> OpsResult<Vec<SearchHit>> {
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    fn pkg(backend: &str, name: &str, score: f64) -> SearchHit {
        SearchHit::package(backend, "bkt", name, "h1", score).unwrap()
    }

    fn request() -> SearchRequest {
        SearchRequest::new("csv", SearchScope::Global, 10)
    }

    fn options() -> AggregateOptions {
        AggregateOptions {
            per_backend_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_duplicate_uri_keeps_higher_score() {
        let a = Fixed::ok("index", vec![pkg("index", "team/a", 10.0), pkg("index", "team/b", 0.0)]);
        let b = Fixed::ok("graph", vec![pkg("graph", "team/b", 5.0), pkg("graph", "team/c", 1.0)]);
        let out = aggregate_search(&[a, b], request(), &options()).await.unwrap();

        let b_hits: Vec<_> = out.hits.iter().filter(|h| h.title == "team/b").collect();
        assert_eq!(b_hits.len(), 1);
        assert_eq!(b_hits[0].backend, "graph");
        assert_eq!(b_hits[0].score, 1.0);
        assert_eq!(out.hits.len(), 3);
    }

    #[tokio::test]
    async fn test_ties_break_by_backend_order() {
        let a = Fixed::ok("first", vec![pkg("first", "team/x", 3.0)]);
        let b = Fixed::ok("second", vec![pkg("second", "team/y", 7.0)]);
        let out = aggregate_search(&[a, b], request(), &options()).await.unwrap();
        let titles: Vec<_> = out.hits.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, vec!["team/x", "team/y"]);
    }

    #[tokio::test]
    async fn test_partial_failure_is_recorded_not_raised() {
        let ok = Fixed::ok("index", vec![pkg("index", "team/a", 1.0)]);
        let bad = Fixed::failing("graph");
        let out = aggregate_search(&[ok, bad], request(), &options()).await.unwrap();
        assert_eq!(out.hits.len(), 1);
        assert_eq!(out.backends, vec!["index"]);
        assert_eq!(out.failures.len(), 1);
        assert_eq!(out.failures[0].backend, "graph");
    }

    #[tokio::test]
    async fn test_all_failures_raise_search_unavailable() {
        let err = aggregate_search(
            &[Fixed::failing("index"), Fixed::failing("graph")],
            request(),
            &options(),
        )
        .await
        .unwrap_err();
        match err {
            OpsError::SearchUnavailable { failures } => assert_eq!(failures.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_slow_backend_times_out_without_blocking_others() {
        let fast = Fixed::ok("index", vec![pkg("index", "team/a", 1.0)]);
        let slow = Fixed::slow("graph", Duration::from_secs(5));
        let started = std::time::Instant::now();
        let out = aggregate_search(&[fast, slow], request(), &options()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(out.hits.len(), 1);
        assert!(out.failures[0].reason.contains("timed out"));
    }

    #[tokio::test]
    async fn test_deadline_cancels_in_flight_backends() {
        let slow = Fixed::slow("graph", Duration::from_secs(5));
        let fast = Fixed::ok("index", vec![pkg("index", "team/a", 1.0)]);
        let opts = AggregateOptions {
            per_backend_timeout: Duration::from_secs(30),
            deadline: Some(Duration::from_millis(100)),
            default_limit: 20,
        };
        let out = aggregate_search(&[fast, slow], request(), &opts).await.unwrap();
        assert_eq!(out.backends, vec!["index"]);
        assert!(out.failures[0].reason.contains("deadline"));
    }

    #[tokio::test]
    async fn test_summary_hits_follow_and_do_not_count() {
        let a = Fixed::ok(
            "index",
            vec![pkg("index", "team/a", 2.0), pkg("index", "team/b", 1.0)],
        );
        let b: Arc<dyn SearchBackend> = Arc::new(Fixed {
            name: "graph",
            capability: HitCapability::AggregateOnly,
            result: Ok(vec![
                SearchHit::summary("graph", "csv", 40, Map::new()),
                pkg("graph", "team/z", 9.0),
            ]),
            delay: Duration::ZERO,
        });
        let out = aggregate_search(&[a, b], SearchRequest::new("csv", SearchScope::Global, 1), &options())
            .await
            .unwrap();
        assert_eq!(out.hits.len(), 2);
        assert_eq!(out.hits[0].title, "team/a");
        assert_eq!(out.hits[1].kind, HitKind::Summary);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let err = aggregate_search(
            &[Fixed::ok("index", vec![])],
            SearchRequest::new("  ", SearchScope::Global, 5),
            &options(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OpsError::Validation { field: "query", .. }));
    }

    #[test]
    fn test_normalize_equal_scores() {
        let mut hits = vec![pkg("i", "team/a", 3.0), pkg("i", "team/b", 3.0)];
        normalize_scores(&mut hits);
        assert!(hits.iter().all(|h| h.score == 1.0));
    }

    #[test]
    fn test_scope_from_parts() {
        assert_eq!(SearchScope::from_parts("global", None, None).unwrap(), SearchScope::Global);
        assert_eq!(
            SearchScope::from_parts("bucket", Some("s3://raw/"), None).unwrap(),
            SearchScope::Bucket { bucket: "raw".into() }
        );
        assert!(SearchScope::from_parts("package", Some("raw"), None).is_err());
        assert!(SearchScope::from_parts("planet", None, None).is_err());
    }

    #[tokio::test]
    async fn test_dropping_the_search_aborts_backend_queries() {
        let finished = Arc::new(AtomicBool::new(false));
        let backend: Arc<dyn SearchBackend> = Arc::new(Flagging {
            finished: finished.clone(),
            delay: Duration::from_millis(150),
        });
        let options = AggregateOptions {
            per_backend_timeout: Duration::from_secs(5),
            ..Default::default()
        };

        let backends = [backend];
        let dropped = tokio::time::timeout(
            Duration::from_millis(30),
            aggregate_search(&backends, request(), &options),
        )
        .await;
        assert!(dropped.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
