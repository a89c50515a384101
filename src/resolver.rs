//! Backend selection from ambient authentication signals.
//!
//! ```text
//!  RequestContext
//!       │
//!       ▼
//!  1. bearer token ──Found──▶ Backend::PlatformApi
//!       │ NotFound
//!       ▼
//!  (override set? ──yes──▶ skip 2)
//!  2. native session ─Found─▶ Backend::Library
//!       │ NotFound
//!       ▼
//!  3. cloud creds ───Found──▶ Backend::CredentialOnly
//!       │ NotFound
//!       ▼
//!  OpsError::Authentication { reasons, remediation }
//! ```
//!
//! Probes never fail; absence is [`Probe::NotFound`] with a reason that is
//! carried into the authentication error. Nothing is cached between calls:
//! every request resolves afresh from its own context.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::sync::Arc;

use crate::backends::{Backend, BackendEnv, CredentialOnlyBackend, LibraryBackend, PlatformBackend};
use crate::config::Config;
use crate::error::{OpsError, OpsResult, Remediation};
use crate::http::{build_client, RetryPolicy};
use crate::models::{AuthSession, AwsCredentials, CredentialHandle, Modality};
use crate::session::{NativeSession, SessionFile, SessionInfo};
use crate::storage::credentials::{CredentialProvider, DefaultCredentialChain};

/// Outcome of one authentication probe.
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    Found(T),
    /// Why the source was not usable.
    NotFound(String),
}

impl<T> Probe<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Probe::Found(_))
    }
}

/// Per-request authentication inputs supplied by the transport.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub bearer_token: Option<String>,
    /// Registry used when an operation names none.
    pub registry_override: Option<String>,
    /// Explicit cloud credentials, consulted before the provider chain.
    pub credentials: Option<AwsCredentials>,
    pub aws_profile: Option<String>,
}

impl RequestContext {
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry_override = Some(registry.into());
        self
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct JwtClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

impl JwtClaims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|e| Utc.timestamp_opt(e, 0).single())
    }
}

/// Decode a JWT payload without verifying it. The remote endpoint verifies.
pub fn inspect_jwt(token: &str) -> Option<JwtClaims> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub struct Resolver {
    config: Arc<Config>,
    http: reqwest::Client,
    session: Arc<dyn NativeSession>,
    credentials: Arc<dyn CredentialProvider>,
}

impl Resolver {
    /// A resolver wired to the session file and the default AWS chain.
    pub fn new(config: Arc<Config>) -> Self {
        let session = Arc::new(SessionFile::new(config.session_dir()));
        Self {
            http: build_client(&config.http),
            config,
            session,
            credentials: Arc::new(DefaultCredentialChain::default()),
        }
    }

    pub fn with_native_session(mut self, session: Arc<dyn NativeSession>) -> Self {
        self.session = session;
        self
    }

    pub fn with_credential_provider(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = provider;
        self
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    fn env(&self, ctx: &RequestContext) -> BackendEnv {
        BackendEnv {
            config: self.config.clone(),
            http: self.http.clone(),
            retry: RetryPolicy::from_config(&self.config.http),
            default_registry: ctx
                .registry_override
                .clone()
                .filter(|r| !r.trim().is_empty())
                .or_else(|| self.config.registry.default.clone()),
        }
    }

    /// Pick the backend for one request.
    pub fn resolve(&self, ctx: &RequestContext) -> OpsResult<Backend> {
        let mut reasons = Vec::new();

        match self.probe_bearer(ctx) {
            Probe::Found(session) => {
                tracing::info!(
                    backend = "platform-api",
                    subject = session.subject.as_deref().unwrap_or("-"),
                    "resolved backend"
                );
                return Ok(Backend::PlatformApi(PlatformBackend::new(session, self.env(ctx))));
            }
            Probe::NotFound(reason) => {
                tracing::debug!(%reason, "bearer probe");
                reasons.push(format!("bearer token: {}", reason));
            }
        }

        match self.probe_native() {
            Probe::Found(info) => {
                tracing::info!(backend = "library", registry = %info.registry_url, "resolved backend");
                let session = AuthSession::new(
                    Modality::LibrarySession,
                    info.registry_url.clone(),
                    CredentialHandle::Session(info.access_token.clone()),
                );
                return Ok(Backend::Library(LibraryBackend::new(session, info, self.env(ctx))));
            }
            Probe::NotFound(reason) => {
                tracing::debug!(%reason, "native session probe");
                reasons.push(format!("native session: {}", reason));
            }
        }

        match self.probe_credentials(ctx) {
            Probe::Found(creds) => {
                let env = self.env(ctx);
                tracing::info!(
                    backend = "credential-only",
                    registry = env.default_registry.as_deref().unwrap_or("-"),
                    "resolved backend"
                );
                let endpoint = env.default_registry.clone().unwrap_or_default();
                let session = AuthSession::new(
                    Modality::CredentialOnly,
                    endpoint,
                    CredentialHandle::Aws(creds.clone()),
                );
                return Ok(Backend::CredentialOnly(CredentialOnlyBackend::new(
                    session, creds, env,
                )));
            }
            Probe::NotFound(reason) => {
                tracing::debug!(%reason, "cloud credential probe");
                reasons.push(format!("cloud credentials: {}", reason));
            }
        }

        tracing::warn!(?reasons, "no usable authentication");
        Err(OpsError::Authentication {
            reasons,
            remediation: self.remediation(),
        })
    }

    fn probe_bearer(&self, ctx: &RequestContext) -> Probe<AuthSession> {
        let Some(token) = ctx
            .bearer_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        else {
            return Probe::NotFound("no bearer token in request".into());
        };
        let Some(catalog) = self.config.catalog_url() else {
            return Probe::NotFound("bearer token present but no catalog URL configured".into());
        };

        let mut session = AuthSession::new(
            Modality::BearerToken,
            format!("{}/graphql", catalog),
            CredentialHandle::Bearer(token.to_string()),
        );
        if let Some(claims) = inspect_jwt(token) {
            session.expires_at = claims.expires_at();
            session.subject = claims.sub;
            if session.expires_at.is_some_and(|exp| exp <= Utc::now()) {
                tracing::warn!("bearer token is past its exp claim; the endpoint will decide");
            }
        }
        Probe::Found(session)
    }

    fn probe_native(&self) -> Probe<SessionInfo> {
        if self.config.auth.disable_native_session {
            return Probe::NotFound("disabled by override".into());
        }
        self.session.logged_in()
    }

    fn probe_credentials(&self, ctx: &RequestContext) -> Probe<AwsCredentials> {
        if let Some(creds) = &ctx.credentials {
            return Probe::Found(creds.clone());
        }
        let profile = ctx
            .aws_profile
            .as_deref()
            .or(self.config.auth.aws_profile.as_deref());
        self.credentials.resolve(profile)
    }

    fn remediation(&self) -> Vec<Remediation> {
        let session_path = self
            .config
            .session_dir()
            .map(|d| d.join(crate::session::SESSION_FILE).display().to_string())
            .unwrap_or_else(|| "session.json".to_string());
        vec![
            Remediation {
                modality: Modality::BearerToken.as_str().into(),
                hint: "Send 'Authorization: Bearer <token>' issued by the catalog and set \
                       registry.catalog_url or REGCTX_CATALOG_URL."
                    .into(),
            },
            Remediation {
                modality: Modality::LibrarySession.as_str().into(),
                hint: format!(
                    "Log in with the platform client so that {} exists, and leave \
                     REGCTX_DISABLE_NATIVE_SESSION unset.",
                    session_path
                ),
            },
            Remediation {
                modality: Modality::CredentialOnly.as_str().into(),
                hint: "Provide AWS credentials via AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY, \
                       AWS_PROFILE, or ~/.aws/credentials, and set REGCTX_DEFAULT_REGISTRY."
                    .into(),
            },
        ]
    }
}
