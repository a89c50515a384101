//! Agent-callable tools over the [`Ops`] contract.
//!
//! Every tool is a thin adapter: it validates its JSON parameters, resolves
//! a backend from the caller's own [`RequestContext`], and calls one
//! operation. Nothing about the resolved backend outlives the call.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 ToolRegistry                 │
//! │  auth_status   search_packages  list_packages│
//! │  browse_package  diff_packages  list_buckets │
//! │  create_package  update_package              │
//! │  graphql_query   search_catalog              │
//! └──────────────────┬───────────────────────────┘
//!                    ▼
//!     Resolver::resolve(ctx) → Backend → Ops
//! ```
//!
//! Tools return `anyhow::Result`. Operation and argument failures are
//! [`OpsError`]s carried inside the `anyhow::Error`, so the server can
//! recover the error code with `downcast_ref`.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::backends::Backend;
use crate::error::{OpsError, OpsResult};
use crate::models::{CopyMode, DiffRequest, RevisionRequest, UserMeta};
use crate::ops::{self, Ops};
use crate::resolver::{RequestContext, Resolver};
use crate::search::{SearchRequest, SearchScope};

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// A tool agents can discover via `GET /tools/list` and call via
/// `POST /tools/{name}`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route name; lowercase with underscores.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the parameters (`type: "object"`).
    fn parameters_schema(&self) -> Value;

    /// Run with parameters already passed through [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Discovery record for one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

// ═══════════════════════════════════════════════════════════════════════
// ToolContext
// ═══════════════════════════════════════════════════════════════════════

/// Per-call bridge: the shared resolver plus this caller's auth context.
pub struct ToolContext {
    resolver: Arc<Resolver>,
    request: RequestContext,
}

impl ToolContext {
    pub fn new(resolver: Arc<Resolver>, request: RequestContext) -> Self {
        Self { resolver, request }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    /// Resolve the backend for this call.
    pub fn ops(&self) -> Result<Backend> {
        Ok(self.resolver.resolve(&self.request)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter helpers
// ═══════════════════════════════════════════════════════════════════════

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params[key].as_str().map(str::trim).filter(|s| !s.is_empty())
}

fn required_str<'a>(params: &'a Value, key: &'static str) -> OpsResult<&'a str> {
    str_param(params, key).ok_or_else(|| OpsError::validation(key, "must not be empty"))
}

fn metadata_param(params: &Value) -> Option<UserMeta> {
    params["metadata"].as_object().cloned()
}

fn string_list(params: &Value, key: &str) -> Vec<String> {
    params[key]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn revision_request(params: &Value) -> OpsResult<RevisionRequest> {
    let source_uris = string_list(params, "s3_uris");
    if source_uris.is_empty() {
        return Err(OpsError::validation("s3_uris", "must not be empty"));
    }
    Ok(RevisionRequest {
        name: required_str(params, "package_name")?.to_string(),
        source_uris,
        registry: str_param(params, "registry").map(String::from),
        metadata: metadata_param(params),
        message: params["message"].as_str().unwrap_or_default().to_string(),
        auto_organize: params["auto_organize"].as_bool().unwrap_or(true),
        copy_mode: CopyMode::parse(params["copy_mode"].as_str().unwrap_or("all"))?,
    })
}

fn revision_schema(verb: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "package_name": { "type": "string", "description": "namespace/name" },
            "s3_uris": {
                "type": "array",
                "items": { "type": "string" },
                "description": format!("Objects or prefixes to {}", verb)
            },
            "registry": { "type": "string", "description": "Target registry (s3://bucket)" },
            "metadata": { "type": "object", "description": "User metadata" },
            "message": { "type": "string", "default": "" },
            "auto_organize": { "type": "boolean", "default": true },
            "copy_mode": { "type": "string", "enum": ["all", "same_bucket", "none"], "default": "all" }
        },
        "required": ["package_name", "s3_uris"]
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in Tools
// ═══════════════════════════════════════════════════════════════════════

/// Which backend a request resolves to, or why none does.
pub struct AuthStatusTool;

#[async_trait]
impl Tool for AuthStatusTool {
    fn name(&self) -> &str {
        "auth_status"
    }

    fn description(&self) -> &str {
        "Report which authentication modality this request resolves to"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        match ctx.resolver.resolve(&ctx.request) {
            Ok(backend) => {
                let session = backend.session();
                Ok(json!({
                    "authenticated": true,
                    "backend": backend.kind(),
                    "modality": session.modality,
                    "endpoint": session.endpoint,
                    "subject": session.subject,
                    "expires_at": session.expires_at,
                }))
            }
            Err(err) => Ok(json!({ "authenticated": false, "error": err.to_json() })),
        }
    }
}

pub struct SearchPackagesTool;

#[async_trait]
impl Tool for SearchPackagesTool {
    fn name(&self) -> &str {
        "search_packages"
    }

    fn description(&self) -> &str {
        "Find packages in a registry by name, message, or metadata"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "registry": { "type": "string" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or_default();
        let packages = ctx
            .ops()?
            .search_packages(query, str_param(&params, "registry"))
            .await?;
        Ok(json!({ "packages": packages }))
    }
}

pub struct ListPackagesTool;

#[async_trait]
impl Tool for ListPackagesTool {
    fn name(&self) -> &str {
        "list_packages"
    }

    fn description(&self) -> &str {
        "List every package in a registry"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "registry": { "type": "string" } }
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let packages = ctx
            .ops()?
            .list_all_packages(str_param(&params, "registry"))
            .await?;
        Ok(json!({ "packages": packages }))
    }
}

pub struct BrowsePackageTool;

#[async_trait]
impl Tool for BrowsePackageTool {
    fn name(&self) -> &str {
        "browse_package"
    }

    fn description(&self) -> &str {
        "List entries of a package's latest revision"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "package_name": { "type": "string" },
                "registry": { "type": "string" },
                "path": { "type": "string", "default": "" }
            },
            "required": ["package_name"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let name = required_str(&params, "package_name")?;
        let path = params["path"].as_str().unwrap_or_default();
        let entries = ctx
            .ops()?
            .browse_content(name, str_param(&params, "registry"), path)
            .await?;
        Ok(json!({ "entries": entries }))
    }
}

pub struct DiffPackagesTool;

#[async_trait]
impl Tool for DiffPackagesTool {
    fn name(&self) -> &str {
        "diff_packages"
    }

    fn description(&self) -> &str {
        "Compare two package revisions by logical key"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "package1_name": { "type": "string" },
                "package2_name": { "type": "string" },
                "registry": { "type": "string" },
                "package1_hash": { "type": "string" },
                "package2_hash": { "type": "string" }
            },
            "required": ["package1_name", "package2_name"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let request = DiffRequest {
            name1: required_str(&params, "package1_name")?.to_string(),
            name2: required_str(&params, "package2_name")?.to_string(),
            registry: str_param(&params, "registry").map(String::from),
            hash1: str_param(&params, "package1_hash").map(String::from),
            hash2: str_param(&params, "package2_hash").map(String::from),
        };
        let diff = ctx.ops()?.diff_packages(&request).await?;
        Ok(serde_json::to_value(diff)?)
    }
}

pub struct CreatePackageTool;

#[async_trait]
impl Tool for CreatePackageTool {
    fn name(&self) -> &str {
        "create_package"
    }

    fn description(&self) -> &str {
        "Create a package revision from S3 objects"
    }

    fn parameters_schema(&self) -> Value {
        revision_schema("package")
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let request = revision_request(&params)?;
        let result = ctx.ops()?.create_package_revision(&request).await?;
        Ok(serde_json::to_value(result)?)
    }
}

pub struct UpdatePackageTool;

#[async_trait]
impl Tool for UpdatePackageTool {
    fn name(&self) -> &str {
        "update_package"
    }

    fn description(&self) -> &str {
        "Add S3 objects to a package as a new revision"
    }

    fn parameters_schema(&self) -> Value {
        revision_schema("add")
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let request = revision_request(&params)?;
        let result = ctx.ops()?.update_package_revision(&request).await?;
        Ok(serde_json::to_value(result)?)
    }
}

pub struct GraphqlQueryTool;

#[async_trait]
impl Tool for GraphqlQueryTool {
    fn name(&self) -> &str {
        "graphql_query"
    }

    fn description(&self) -> &str {
        "Run a GraphQL document against the catalog"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "variables": { "type": "object" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let variables = params.get("variables").filter(|v| v.is_object()).cloned();
        let data = ctx.ops()?.execute_graph_query(query, variables).await?;
        Ok(json!({ "data": data }))
    }
}

pub struct ListBucketsTool;

#[async_trait]
impl Tool for ListBucketsTool {
    fn name(&self) -> &str {
        "list_buckets"
    }

    fn description(&self) -> &str {
        "List buckets visible to the resolved credentials"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let buckets = ctx.ops()?.list_buckets().await?;
        Ok(json!({ "buckets": buckets }))
    }
}

/// Federated search across every source the resolved backend offers.
pub struct SearchCatalogTool;

#[async_trait]
impl Tool for SearchCatalogTool {
    fn name(&self) -> &str {
        "search_catalog"
    }

    fn description(&self) -> &str {
        "Search packages and objects across all available search sources"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "scope": { "type": "string", "enum": ["global", "bucket", "package"], "default": "global" },
                "bucket": { "type": "string" },
                "package_name": { "type": "string" },
                "limit": { "type": "integer", "description": "0 uses the configured default", "default": 0 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let scope = SearchScope::from_parts(
            params["scope"].as_str().unwrap_or("global"),
            str_param(&params, "bucket"),
            str_param(&params, "package_name"),
        )?;
        let limit = params["limit"].as_u64().unwrap_or(0) as usize;
        let request = SearchRequest::new(params["query"].as_str().unwrap_or_default(), scope, limit);

        let backend = ctx.ops()?;
        let outcome = ops::search(&backend, request, &ctx.resolver.config().search, None).await?;
        Ok(serde_json::to_value(outcome)?)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// A registry holding every built-in tool.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(AuthStatusTool));
        registry.register(Box::new(SearchPackagesTool));
        registry.register(Box::new(ListPackagesTool));
        registry.register(Box::new(BrowsePackageTool));
        registry.register(Box::new(DiffPackagesTool));
        registry.register(Box::new(CreatePackageTool));
        registry.register(Box::new(UpdatePackageTool));
        registry.register(Box::new(GraphqlQueryTool));
        registry.register(Box::new(ListBucketsTool));
        registry.register(Box::new(SearchCatalogTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn info(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter Validation
// ═══════════════════════════════════════════════════════════════════════

/// Check `params` against a tool schema and fill in defaults.
///
/// Enforces required fields, JSON types, and enum membership. Missing
/// optional fields with a `default` are injected.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let given = match params {
        Value::Object(m) => m.clone(),
        Value::Null => Map::new(),
        other => bail!("parameters must be an object, got {}", json_type_name(other)),
    };
    let properties = schema["properties"].as_object().cloned().unwrap_or_default();

    if let Some(required) = schema["required"].as_array() {
        for field in required.iter().filter_map(|v| v.as_str()) {
            if !given.contains_key(field) {
                bail!("missing required parameter: {}", field);
            }
        }
    }

    let mut result = given.clone();
    for (name, prop) in &properties {
        let Some(value) = given.get(name) else {
            if let Some(default) = prop.get("default") {
                result.insert(name.clone(), default.clone());
            }
            continue;
        };
        if let Some(expected) = prop["type"].as_str() {
            let ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !ok {
                bail!(
                    "parameter '{}' must be of type '{}', got {}",
                    name,
                    expected,
                    json_type_name(value)
                );
            }
        }
        if let Some(allowed) = prop["enum"].as_array() {
            if !allowed.contains(value) {
                let names: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
                bail!(
                    "parameter '{}' must be one of [{}], got {}",
                    name,
                    names.join(", "),
                    value
                );
            }
        }
    }
    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::StaticSession;
    use crate::storage::credentials::StaticCredentials;

    fn unauthenticated() -> ToolContext {
        let resolver = Resolver::new(Arc::new(Config::default()))
            .with_native_session(Arc::new(StaticSession(None)))
            .with_credential_provider(Arc::new(StaticCredentials(None)));
        ToolContext::new(Arc::new(resolver), RequestContext::default())
    }

    #[test]
    fn test_builtins_have_unique_names() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(registry.len(), 10);
        let mut names: Vec<&str> = registry.tools().iter().map(|t| t.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 10);
        assert!(registry.find("search_catalog").is_some());
        assert!(registry.find("nope").is_none());
    }

    #[test]
    fn test_validate_injects_defaults() {
        let schema = SearchCatalogTool.parameters_schema();
        let out = validate_params(&schema, &json!({"query": "csv"})).unwrap();
        assert_eq!(out["scope"], "global");
        assert_eq!(out["limit"], 0);
    }

    #[test]
    fn test_validate_rejects_missing_wrong_type_and_enum() {
        let schema = SearchCatalogTool.parameters_schema();
        assert!(validate_params(&schema, &json!({})).is_err());
        assert!(validate_params(&schema, &json!({"query": 3})).is_err());
        let err = validate_params(&schema, &json!({"query": "q", "scope": "galaxy"})).unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }

    #[test]
    fn test_revision_request_defaults() {
        let params = validate_params(
            &revision_schema("package"),
            &json!({"package_name": "team/data", "s3_uris": ["s3://b/k"]}),
        )
        .unwrap();
        let request = revision_request(&params).unwrap();
        assert!(request.auto_organize);
        assert_eq!(request.copy_mode, CopyMode::All);
        assert!(request.metadata.is_none());
    }

    #[tokio::test]
    async fn test_auth_status_reports_failure_without_erroring() {
        let out = AuthStatusTool
            .execute(json!({}), &unauthenticated())
            .await
            .unwrap();
        assert_eq!(out["authenticated"], false);
        assert_eq!(out["error"]["code"], "authentication_error");
    }

    #[tokio::test]
    async fn test_ops_error_survives_anyhow() {
        let err = ListBucketsTool
            .execute(json!({}), &unauthenticated())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<OpsError>(),
            Some(OpsError::Authentication { .. })
        ));
    }
}
