//! Platform-API backend and tool server against a loopback catalog.
//!
//! A small axum app stands in for the catalog: `POST /graphql` answers the
//! documents the backend sends, `GET /api/search` answers index queries.
//! Only requests carrying `Bearer good-token` are accepted.

use axum::{
    extract::Query,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use registry_harness::backends::Backend;
use registry_harness::config::Config;
use registry_harness::error::OpsError;
use registry_harness::graphql::{GraphqlClient, GraphqlError};
use registry_harness::http::RetryPolicy;
use registry_harness::models::{AccessLevel, BackendKind, DiffRequest, HitKind};
use registry_harness::ops::{self, Ops};
use registry_harness::resolver::{RequestContext, Resolver};
use registry_harness::search::{SearchRequest, SearchScope};
use registry_harness::server::run_server;
use registry_harness::session::StaticSession;
use registry_harness::storage::credentials::StaticCredentials;

const TOKEN: &str = "good-token";

// ─── Mock catalog ───────────────────────────────────────────────────

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {}", TOKEN))
}

async fn graphql(headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"errors": [{"message": "unauthorized"}]})));
    }
    let query = body["query"].as_str().unwrap_or_default();
    let data = if query.contains("searchPackages") {
        json!({"searchPackages": {
            "__typename": "PackagesSearchResultSet",
            "total": 2,
            "firstPage": {"hits": [
                {"id": "g1", "score": 5.0, "bucket": "team-data", "name": "team/raw", "hash": "h1",
                 "size": 30, "modified": "2024-03-01T00:00:00Z", "comment": "initial import"},
                {"id": "g2", "score": 1.0, "bucket": "team-data", "name": "team/other", "hash": "h2"}
            ]}
        }})
    } else if query.contains("bucketConfigs") {
        json!({"bucketConfigs": [
            {"name": "team-data", "region": null, "access": "read-only"},
            {"name": "lab", "region": "us-west-2", "access": "read-write"},
            {"name": null, "region": "us-east-1"}
        ]})
    } else if query.contains("packages(") {
        let vars = &body["variables"];
        packages_page(
            vars["bucket"].as_str().unwrap_or_default(),
            vars["page"].as_u64().unwrap_or(1),
            vars["perPage"].as_u64().unwrap_or(1000),
        )
    } else if query.contains("package(") {
        match body["variables"]["name"].as_str() {
            // Too large for a flat listing: the endpoint answers null.
            Some("team/huge") => json!({"package": {"revision": {
                "hash": "h9", "totalEntries": 20000, "contentsFlatMap": null
            }}}),
            Some("team/partial") => json!({"package": {"revision": {
                "hash": "h8", "totalEntries": 5, "contentsFlatMap": {
                    "a.csv": {"physicalKey": "s3://team-data/p/a.csv", "size": 1}
                }
            }}}),
            _ => json!({"package": {"revision": {"hash": "h1", "totalEntries": 3, "contentsFlatMap": {
                "a.csv": {"physicalKey": "s3://team-data/raw/a.csv?versionId=v1", "size": 10},
                "b.csv": {"physicalKey": "s3://team-data/raw/b.csv?versionId=v1", "size": 10},
                "notes/readme.md": {"physicalKey": "s3://team-data/raw/notes/readme.md", "size": 10,
                                    "meta": {"last_modified": "2024-03-01T00:00:00Z"}}
            }}}}),
        }
    } else {
        json!({"echo": body["variables"]})
    };
    (StatusCode::OK, Json(json!({ "data": data })))
}

/// `big-data` holds 1500 packages; `short-data` claims 1500 but stops
/// after the first page; anything else holds two.
fn packages_page(bucket: &str, page: u64, per_page: u64) -> Value {
    let generated = |total: u64, served: u64| {
        let start = (page - 1) * per_page;
        let end = (page * per_page).min(served);
        let items: Vec<Value> = (start..end)
            .map(|i| json!({"name": format!("bulk/p{:04}", i), "revision": {"hash": format!("h{}", i)}}))
            .collect();
        json!({"packages": {"total": total, "page": items}})
    };
    match bucket {
        "big-data" => generated(1500, 1500),
        "short-data" => generated(1500, per_page),
        _ if page > 1 => json!({"packages": {"total": 2, "page": []}}),
        _ => json!({"packages": {"total": 2, "page": [
            {"name": "team/raw", "revision": {"hash": "h1", "totalEntries": 3, "totalBytes": 30,
                                              "message": "initial import", "userMeta": {"a": 1}}},
            {"name": "team/other", "revision": {"hash": "h2", "totalEntries": 1, "totalBytes": 4,
                                                "message": null, "userMeta": "{\"b\": 2}"}}
        ]}}),
    }
}

async fn index_search(
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    if params.get("query").map(String::as_str) == Some("broken") {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": "index down"})));
    }
    (
        StatusCode::OK,
        Json(json!({"hits": {"hits": [
            {"_index": "team-data_packages", "_score": 9.0,
             "_source": {"handle": "team/raw", "hash": "h1", "comment": "initial import"}},
            {"_index": "team-data", "_score": 3.0,
             "_source": {"key": "raw/a.csv", "version_id": "v1", "size": 10}},
            {"_index": "team-data_packages", "_score": 2.0,
             "_source": {"handle": "team/nohash"}}
        ]}})),
    )
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn start_catalog() -> (u16, tokio::task::JoinHandle<()>) {
    let port = find_free_port();
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/graphql", post(graphql))
        .route("/api/search", get(index_search));
    let handle = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        axum::serve(listener, app).await.ok();
    });
    wait_for_server(port).await;
    (port, handle)
}

fn config(catalog_port: u16) -> Config {
    let mut config = Config::default();
    config.registry.catalog_url = Some(format!("http://127.0.0.1:{}", catalog_port));
    config.registry.default = Some("s3://team-data".into());
    config.http.max_retries = 0;
    config
}

fn resolver(config: Config) -> Resolver {
    Resolver::new(Arc::new(config))
        .with_native_session(Arc::new(StaticSession(None)))
        .with_credential_provider(Arc::new(StaticCredentials(None)))
}

fn platform(catalog_port: u16, token: &str) -> Backend {
    let backend = resolver(config(catalog_port))
        .resolve(&RequestContext::default().with_bearer(token))
        .unwrap();
    assert_eq!(backend.kind(), BackendKind::PlatformApi);
    backend
}

// ─── Backend tests ──────────────────────────────────────────────────

#[tokio::test]
async fn test_platform_reads() {
    let (port, catalog) = start_catalog().await;
    let backend = platform(port, TOKEN);

    let packages = backend.list_all_packages(None).await.unwrap();
    assert_eq!(packages.len(), 2);
    assert_eq!(packages[0].hash, "h1");
    assert_eq!(packages[1].user_meta["b"], 2);

    let entries = backend.browse_content("team/raw", None, "").await.unwrap();
    assert_eq!(entries.len(), 3);
    let notes = backend.browse_content("team/raw", None, "notes").await.unwrap();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].last_modified.is_some());

    let buckets = backend.list_buckets().await.unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].region, "unknown");
    assert_eq!(buckets[0].access, AccessLevel::ReadOnly);

    let data = backend
        .execute_graph_query("query Echo($x: Int) { echo }", Some(json!({"x": 7})))
        .await
        .unwrap();
    assert_eq!(data["echo"]["x"], 7);

    catalog.abort();
}

#[tokio::test]
async fn test_platform_listing_follows_pages_to_total() {
    let (port, catalog) = start_catalog().await;
    let backend = platform(port, TOKEN);

    let packages = backend.list_all_packages(Some("s3://big-data")).await.unwrap();
    assert_eq!(packages.len(), 1500);
    assert_eq!(packages[1499].name, "bulk/p1499");

    let found = backend.search_packages("bulk", Some("s3://big-data")).await.unwrap();
    assert_eq!(found.len(), 1500);

    catalog.abort();
}

#[tokio::test]
async fn test_platform_short_listing_is_an_error() {
    let (port, catalog) = start_catalog().await;
    let backend = platform(port, TOKEN);

    let err = backend
        .list_all_packages(Some("s3://short-data"))
        .await
        .unwrap_err();
    assert!(matches!(err, OpsError::Backend { .. }));
    assert!(err.to_string().contains("1000 of 1500"));

    catalog.abort();
}

#[tokio::test]
async fn test_platform_browse_never_truncates_silently() {
    let (port, catalog) = start_catalog().await;
    let backend = platform(port, TOKEN);

    let err = backend.browse_content("team/huge", None, "").await.unwrap_err();
    assert!(matches!(err, OpsError::Backend { .. }));
    assert!(err.to_string().contains("20000"));

    let err = backend
        .browse_content("team/partial", None, "")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("1 of 5"));

    catalog.abort();
}

#[tokio::test]
async fn test_platform_unsupported_writes() {
    let (port, catalog) = start_catalog().await;
    let backend = platform(port, TOKEN);
    assert!(matches!(
        backend.diff_packages(&DiffRequest::default()).await,
        Err(OpsError::UnsupportedOperation { operation: "diff_packages", .. })
    ));
    assert!(matches!(
        backend.get_cloud_client("s3", None).await,
        Err(OpsError::UnsupportedOperation { .. })
    ));
    catalog.abort();
}

#[tokio::test]
async fn test_rejected_token_is_authentication_error() {
    let (port, catalog) = start_catalog().await;
    let backend = platform(port, "stale-token");
    assert!(matches!(
        backend.list_buckets().await,
        Err(OpsError::Authentication { .. })
    ));
    catalog.abort();
}

#[tokio::test]
async fn test_federated_search_dedupes_across_sources() {
    let (port, catalog) = start_catalog().await;
    let cfg = config(port);
    let backend = platform(port, TOKEN);

    let outcome = ops::search(
        &backend,
        SearchRequest::new("raw", SearchScope::Global, 10),
        &cfg.search,
        None,
    )
    .await
    .unwrap();

    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.backends, vec!["index".to_string(), "graph".to_string()]);

    let uris: Vec<&str> = outcome
        .hits
        .iter()
        .filter_map(|h| h.canonical_uri())
        .collect();
    let raw = "pkg+s3://team-data#package=team/raw@h1";
    assert_eq!(uris.iter().filter(|u| **u == raw).count(), 1);
    assert_eq!(outcome.hits.len(), 3);
    assert_eq!(outcome.hits[0].canonical_uri(), Some(raw));
    assert_eq!(outcome.hits[0].backend(), "index");
    assert!(outcome.hits.iter().all(|h| h.kind() != HitKind::Summary));
    assert!(outcome.hits.windows(2).all(|w| w[0].score() >= w[1].score()));

    catalog.abort();
}

#[tokio::test]
async fn test_federated_search_survives_index_failure() {
    let (port, catalog) = start_catalog().await;
    let cfg = config(port);
    let backend = platform(port, TOKEN);

    let outcome = ops::search(
        &backend,
        SearchRequest::new("broken", SearchScope::Global, 10),
        &cfg.search,
        None,
    )
    .await
    .unwrap();

    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].backend, "index");
    assert_eq!(outcome.backends, vec!["graph".to_string()]);
    assert_eq!(outcome.hits.len(), 2);

    catalog.abort();
}

// ─── Retry policy ───────────────────────────────────────────────────

/// A GraphQL endpoint that always answers 503 and counts requests.
async fn start_unavailable_endpoint() -> (u16, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
    let port = find_free_port();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/graphql",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::SERVICE_UNAVAILABLE, "try again later")
                }
            }),
        );
    let handle = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        axum::serve(listener, app).await.ok();
    });
    wait_for_server(port).await;
    (port, hits, handle)
}

#[tokio::test]
async fn test_queries_are_retried_and_mutations_sent_once() {
    let (port, hits, server) = start_unavailable_endpoint().await;
    let client = GraphqlClient::new(
        reqwest::Client::new(),
        format!("http://127.0.0.1:{}/graphql", port),
        TOKEN,
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(5),
        },
    );

    let err = client
        .execute("query { bucketConfigs { name } }", None)
        .await
        .unwrap_err();
    assert!(matches!(err, GraphqlError::Http { status: 503, .. }));
    assert_eq!(hits.swap(0, Ordering::SeqCst), 3);

    client
        .execute("mutation { packageConstruct { hash } }", None)
        .await
        .unwrap_err();
    assert_eq!(hits.swap(0, Ordering::SeqCst), 1);

    client
        .execute(
            "fragment Rev on Revision { hash }\nmutation Push { packageConstruct { ...Rev } }",
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(hits.swap(0, Ordering::SeqCst), 1);

    server.abort();
}

// ─── Tool server ────────────────────────────────────────────────────

#[tokio::test]
async fn test_tool_server_resolves_per_request() {
    let (catalog_port, catalog) = start_catalog().await;
    let port = find_free_port();
    let mut cfg = config(catalog_port);
    cfg.server.bind = format!("127.0.0.1:{}", port);

    let resolver = Arc::new(resolver(cfg));
    let server_handle = tokio::spawn(async move {
        run_server(resolver).await.ok();
    });
    wait_for_server(port).await;

    let client = reqwest::Client::new();

    let resp = client
        .get(format!("http://127.0.0.1:{}/tools/list", port))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let names: Vec<&str> = body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"search_catalog"));
    assert!(names.contains(&"create_package"));

    // No credentials at all → 401 with remediation.
    let resp = client
        .post(format!("http://127.0.0.1:{}/tools/list_buckets", port))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "authentication_error");
    assert_eq!(body["error"]["remediation"].as_array().unwrap().len(), 3);

    // The same route with a bearer token resolves the platform backend.
    let resp = client
        .post(format!("http://127.0.0.1:{}/tools/list_buckets", port))
        .bearer_auth(TOKEN)
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["result"]["buckets"].as_array().unwrap().len(), 2);

    // Platform backend cannot write → 501.
    let resp = client
        .post(format!("http://127.0.0.1:{}/tools/create_package", port))
        .bearer_auth(TOKEN)
        .json(&json!({"package_name": "team/new", "s3_uris": ["s3://team-data/raw/a.csv"]}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 501);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unsupported_operation");

    // Schema violations → 400; unknown tools → 404.
    let resp = client
        .post(format!("http://127.0.0.1:{}/tools/search_catalog", port))
        .bearer_auth(TOKEN)
        .json(&json!({"query": "raw", "scope": "galaxy"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let resp = client
        .post(format!("http://127.0.0.1:{}/tools/nonexistent", port))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    server_handle.abort();
    catalog.abort();
}
