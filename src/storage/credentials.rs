//! AWS credential discovery.
//!
//! The default chain, in order:
//!
//! 1. `AWS_ACCESS_KEY_ID` + `AWS_SECRET_ACCESS_KEY` (+ `AWS_SESSION_TOKEN`)
//! 2. The shared credentials file (`AWS_SHARED_CREDENTIALS_FILE`, else
//!    `~/.aws/credentials`), section chosen by the requested profile,
//!    then `AWS_PROFILE`, then `default`.
//!
//! Absence is reported as [`Probe::NotFound`] with a reason, never as an
//! error.

use std::path::PathBuf;

use crate::models::AwsCredentials;
use crate::resolver::Probe;

/// Source of bare cloud credentials consulted by the resolver.
pub trait CredentialProvider: Send + Sync {
    fn resolve(&self, profile: Option<&str>) -> Probe<AwsCredentials>;
}

/// Environment variables, then the shared credentials file.
#[derive(Debug, Clone, Default)]
pub struct DefaultCredentialChain {
    /// Overrides `AWS_SHARED_CREDENTIALS_FILE` / `~/.aws/credentials`.
    pub credentials_file: Option<PathBuf>,
}

impl DefaultCredentialChain {
    fn from_env() -> Option<AwsCredentials> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").ok()?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok()?;
        if access_key_id.is_empty() || secret_access_key.is_empty() {
            return None;
        }
        Some(AwsCredentials {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
        })
    }

    fn credentials_path(&self) -> Option<PathBuf> {
        self.credentials_file
            .clone()
            .or_else(|| std::env::var_os("AWS_SHARED_CREDENTIALS_FILE").map(PathBuf::from))
            .or_else(|| dirs::home_dir().map(|h| h.join(".aws").join("credentials")))
    }
}

impl CredentialProvider for DefaultCredentialChain {
    fn resolve(&self, profile: Option<&str>) -> Probe<AwsCredentials> {
        if let Some(creds) = Self::from_env() {
            return Probe::Found(creds);
        }

        let profile = profile
            .map(|p| p.to_string())
            .or_else(|| std::env::var("AWS_PROFILE").ok())
            .unwrap_or_else(|| "default".to_string());

        let Some(path) = self.credentials_path() else {
            return Probe::NotFound("no AWS environment credentials and no home directory".into());
        };
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => {
                return Probe::NotFound(format!(
                    "no AWS environment credentials and no credentials file at {}",
                    path.display()
                ))
            }
        };
        match parse_credentials_file(&content, &profile) {
            Some(creds) => Probe::Found(creds),
            None => Probe::NotFound(format!(
                "profile '{}' not found or incomplete in {}",
                profile,
                path.display()
            )),
        }
    }
}

/// Fixed credentials (or none). Used for explicit per-request credentials
/// and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(pub Option<AwsCredentials>);

impl CredentialProvider for StaticCredentials {
    fn resolve(&self, _profile: Option<&str>) -> Probe<AwsCredentials> {
        match &self.0 {
            Some(c) => Probe::Found(c.clone()),
            None => Probe::NotFound("no static credentials configured".into()),
        }
    }
}

/// Extract one profile from an INI-style shared credentials file.
pub fn parse_credentials_file(content: &str, profile: &str) -> Option<AwsCredentials> {
    let mut in_section = false;
    let mut access_key_id = None;
    let mut secret_access_key = None;
    let mut session_token = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let section = section.trim();
            let name = section.strip_prefix("profile ").unwrap_or(section).trim();
            in_section = name == profile;
            continue;
        }
        if !in_section {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            let v = v.trim().to_string();
            match k.trim() {
                "aws_access_key_id" => access_key_id = Some(v),
                "aws_secret_access_key" => secret_access_key = Some(v),
                "aws_session_token" => session_token = Some(v),
                _ => {}
            }
        }
    }

    Some(AwsCredentials {
        access_key_id: access_key_id.filter(|v| !v.is_empty())?,
        secret_access_key: secret_access_key.filter(|v| !v.is_empty())?,
        session_token: session_token.filter(|v| !v.is_empty()),
    })
}
