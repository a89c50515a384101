//! Native platform session.
//!
//! An interactive login leaves a session file behind:
//!
//! ```json
//! {
//!   "registry_url": "https://registry.example.com",
//!   "catalog_url": "https://catalog.example.com",
//!   "access_token": "…",
//!   "expires_at": 1767225600
//! }
//! ```
//!
//! [`NativeSession::logged_in`] is the only way the resolver asks whether
//! such a session exists. Object-store credentials are not stored in the
//! file; they are exchanged from the registry on demand with
//! [`exchange_credentials`].

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::path::PathBuf;

use crate::http::{send_idempotent, RetryPolicy};
use crate::models::AwsCredentials;
use crate::resolver::Probe;

pub const SESSION_FILE: &str = "session.json";

/// A live native session.
#[derive(Clone, PartialEq)]
pub struct SessionInfo {
    pub registry_url: String,
    pub catalog_url: Option<String>,
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for SessionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInfo")
            .field("registry_url", &self.registry_url)
            .field("catalog_url", &self.catalog_url)
            .field("access_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The "am I logged in" primitive consulted by the resolver.
pub trait NativeSession: Send + Sync {
    fn logged_in(&self) -> Probe<SessionInfo>;
}

#[derive(Deserialize)]
struct SessionRecord {
    registry_url: String,
    #[serde(default)]
    catalog_url: Option<String>,
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

/// Session backed by `<dir>/session.json`.
#[derive(Debug, Clone)]
pub struct SessionFile {
    dir: Option<PathBuf>,
}

impl SessionFile {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(SESSION_FILE))
    }

    fn read(&self, now: DateTime<Utc>) -> Result<SessionInfo, String> {
        let path = self.path().ok_or("no session directory available")?;
        let content = std::fs::read_to_string(&path)
            .map_err(|_| format!("no native session at {}", path.display()))?;
        let record: SessionRecord = serde_json::from_str(&content)
            .map_err(|e| format!("unreadable session file {}: {}", path.display(), e))?;

        if record.access_token.trim().is_empty() {
            return Err("native session has no access token".into());
        }
        if record.registry_url.trim().is_empty() {
            return Err("native session has no registry URL".into());
        }
        let expires_at = record
            .expires_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single());
        if let Some(exp) = expires_at {
            if exp <= now {
                return Err(format!("native session expired at {}", exp.to_rfc3339()));
            }
        }

        Ok(SessionInfo {
            registry_url: record.registry_url.trim_end_matches('/').to_string(),
            catalog_url: record
                .catalog_url
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            access_token: record.access_token,
            expires_at,
        })
    }
}

impl NativeSession for SessionFile {
    fn logged_in(&self) -> Probe<SessionInfo> {
        match self.read(Utc::now()) {
            Ok(info) => Probe::Found(info),
            Err(reason) => {
                tracing::debug!(%reason, "native session probe");
                Probe::NotFound(reason)
            }
        }
    }
}

/// A fixed answer. Used by tests and by callers that already hold a session.
#[derive(Debug, Clone, Default)]
pub struct StaticSession(pub Option<SessionInfo>);

impl NativeSession for StaticSession {
    fn logged_in(&self) -> Probe<SessionInfo> {
        match &self.0 {
            Some(info) => Probe::Found(info.clone()),
            None => Probe::NotFound("not logged in".into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("credential exchange failed (HTTP {status}): {body}")]
    Http { status: u16, body: String },
    #[error("credential exchange request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExchangedCredentials {
    access_key_id: String,
    secret_access_key: String,
    #[serde(default)]
    session_token: Option<String>,
}

/// Trade the session token for temporary object-store credentials.
///
/// `GET {registry_url}/api/auth/get_credentials`; idempotent, so retried.
pub async fn exchange_credentials(
    client: &reqwest::Client,
    retry: &RetryPolicy,
    session: &SessionInfo,
) -> Result<AwsCredentials, ExchangeError> {
    let url = format!("{}/api/auth/get_credentials", session.registry_url);
    let resp = send_idempotent(retry, "get_credentials", || {
        client.get(&url).bearer_auth(&session.access_token)
    })
    .await?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ExchangeError::Http {
            status: status.as_u16(),
            body,
        });
    }
    let creds: ExchangedCredentials = resp.json().await?;
    Ok(AwsCredentials {
        access_key_id: creds.access_key_id,
        secret_access_key: creds.secret_access_key,
        session_token: creds.session_token.filter(|t| !t.is_empty()),
    })
}
