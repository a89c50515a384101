//! TOML configuration with environment overrides.
//!
//! Every section is optional; `Config::default()` is a valid configuration
//! for an environment-only deployment. After parsing, [`apply_env`] layers
//! the `REGCTX_*` variables on top:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `REGCTX_DEFAULT_REGISTRY` | `registry.default` |
//! | `REGCTX_CATALOG_URL` | `registry.catalog_url` |
//! | `REGCTX_DISABLE_NATIVE_SESSION` | `auth.disable_native_session` |
//! | `REGCTX_SESSION_DIR` | `auth.session_dir` |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::Registry;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RegistryConfig {
    /// Registry used when a call names none (`s3://bucket`).
    pub default: Option<String>,
    /// Catalog base URL; hosts `/graphql` and `/api/search`.
    pub catalog_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Skip native-session detection entirely.
    #[serde(default)]
    pub disable_native_session: bool,
    /// Directory holding `session.json`.
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
    #[serde(default)]
    pub aws_profile: Option<String>,
    #[serde(default = "default_region")]
    pub aws_region: String,
    /// S3-compatible endpoint (MinIO, LocalStack).
    #[serde(default)]
    pub s3_endpoint: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            disable_native_session: false,
            session_dir: None,
            aws_profile: None,
            aws_region: default_region(),
            s3_endpoint: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// Per-backend timeout.
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// `"individual"` or `"aggregate"`.
    #[serde(default = "default_graph_hits")]
    pub graph_hits: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_search_timeout(),
            default_limit: default_limit(),
            graph_hits: default_graph_hits(),
        }
    }
}

fn default_search_timeout() -> u64 {
    10
}
fn default_limit() -> usize {
    20
}
fn default_graph_hits() -> String {
    "individual".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
        }
    }
}

fn default_http_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    /// The session directory, falling back to the platform data dir.
    pub fn session_dir(&self) -> Option<PathBuf> {
        self.auth
            .session_dir
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join("regctx")))
    }

    /// Catalog base URL without a trailing slash.
    pub fn catalog_url(&self) -> Option<String> {
        self.registry
            .catalog_url
            .as_ref()
            .map(|u| u.trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
    }
}

/// Load a config file, apply environment overrides, and validate.
///
/// A missing file is not an error when `required` is false; defaults plus
/// environment are used instead.
pub fn load_config(path: &Path, required: bool) -> Result<Config> {
    let mut config = if path.exists() || required {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };
    apply_env(&mut config, |k| std::env::var(k).ok());
    validate(&config)?;
    Ok(config)
}

/// Layer `REGCTX_*` variables over the parsed file.
pub fn apply_env(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("REGCTX_DEFAULT_REGISTRY").filter(|v| !v.is_empty()) {
        config.registry.default = Some(v);
    }
    if let Some(v) = var("REGCTX_CATALOG_URL").filter(|v| !v.is_empty()) {
        config.registry.catalog_url = Some(v);
    }
    if let Some(v) = var("REGCTX_DISABLE_NATIVE_SESSION") {
        config.auth.disable_native_session = is_truthy(&v);
    }
    if let Some(v) = var("REGCTX_SESSION_DIR").filter(|v| !v.is_empty()) {
        config.auth.session_dir = Some(PathBuf::from(v));
    }
}

fn is_truthy(v: &str) -> bool {
    matches!(
        v.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn validate(config: &Config) -> Result<()> {
    if config.search.default_limit < 1 {
        bail!("search.default_limit must be >= 1");
    }
    if config.search.timeout_secs < 1 {
        bail!("search.timeout_secs must be >= 1");
    }
    match config.search.graph_hits.as_str() {
        "individual" | "aggregate" => {}
        other => bail!(
            "Unknown search.graph_hits: '{}'. Must be individual or aggregate.",
            other
        ),
    }
    if let Some(ref default) = config.registry.default {
        Registry::parse(default)
            .map_err(|e| anyhow::anyhow!("registry.default: {}", e))?;
    }
    Ok(())
}
