//! Typed error taxonomy shared by every backend, the resolver, and the
//! search aggregator.
//!
//! Nothing below the [`Ops`](crate::ops::Ops) boundary is allowed to leak
//! its own error type: storage, GraphQL, and manifest errors are translated
//! into [`OpsError`] by the backend that observed them.
//!
//! # Error Codes
//!
//! | Variant | `code()` | HTTP status (server) |
//! |---------|----------|----------------------|
//! | [`OpsError::Authentication`] | `authentication_error` | 401 |
//! | [`OpsError::UnsupportedOperation`] | `unsupported_operation` | 501 |
//! | [`OpsError::NotFound`] | `not_found` | 404 |
//! | [`OpsError::Validation`] | `validation_error` | 400 |
//! | [`OpsError::Backend`] | `backend_error` | 502 |
//! | [`OpsError::SearchUnavailable`] | `search_unavailable` | 502 |

use serde::Serialize;
use serde_json::{json, Value};

use crate::models::BackendKind;

/// Convenience alias used throughout the core.
pub type OpsResult<T> = std::result::Result<T, OpsError>;

/// How to obtain one authentication modality.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Remediation {
    /// Modality tag (`"bearer-token"`, `"library-session"`, `"credential-only"`).
    pub modality: String,
    /// Human-readable instructions.
    pub hint: String,
}

/// One search backend that did not contribute to an aggregate result.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BackendFailure {
    /// Search backend tag (e.g. `"index"`, `"graph"`).
    pub backend: String,
    /// Why it was excluded.
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OpsError {
    /// No backend could be resolved for the request.
    #[error("no usable authentication found ({})", reasons.join("; "))]
    Authentication {
        reasons: Vec<String>,
        remediation: Vec<Remediation>,
    },

    /// The resolved backend does not implement the requested capability.
    #[error("operation '{operation}' is not supported by the {backend} backend")]
    UnsupportedOperation {
        backend: BackendKind,
        operation: &'static str,
    },

    /// A package, revision, object, or path does not exist.
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// Caller-supplied arguments are malformed.
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// A remote call failed for any other reason.
    #[error("{backend} backend error: {message}")]
    Backend {
        backend: BackendKind,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Every search backend failed.
    #[error("all search backends failed: {}", describe_failures(failures))]
    SearchUnavailable { failures: Vec<BackendFailure> },
}

fn describe_failures(failures: &[BackendFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.backend, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl OpsError {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn unsupported(backend: BackendKind, operation: &'static str) -> Self {
        Self::UnsupportedOperation { backend, operation }
    }

    /// A backend failure with no underlying error value.
    pub fn backend(backend: BackendKind, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
            source: None,
        }
    }

    /// A backend failure wrapping the error that caused it.
    pub fn backend_caused_by<E>(backend: BackendKind, message: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend {
            backend,
            message: message.into(),
            source: Some(Box::new(err)),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "authentication_error",
            Self::UnsupportedOperation { .. } => "unsupported_operation",
            Self::NotFound { .. } => "not_found",
            Self::Validation { .. } => "validation_error",
            Self::Backend { .. } => "backend_error",
            Self::SearchUnavailable { .. } => "search_unavailable",
        }
    }

    /// Structured detail for the transport layer.
    ///
    /// Always contains `code` and `message`; the remaining keys depend on
    /// the variant (offending identifier, remediation, failures).
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        let detail = match self {
            Self::Authentication {
                reasons,
                remediation,
            } => json!({ "reasons": reasons, "remediation": remediation }),
            Self::UnsupportedOperation { backend, operation } => {
                json!({ "backend": backend, "operation": operation })
            }
            Self::NotFound { resource, id } => json!({ "resource": resource, "id": id }),
            Self::Validation { field, .. } => json!({ "field": field }),
            Self::Backend { backend, .. } => json!({ "backend": backend }),
            Self::SearchUnavailable { failures } => json!({ "failures": failures }),
        };
        if let (Some(body), Some(detail)) = (body.as_object_mut(), detail.as_object()) {
            body.extend(detail.clone());
        }
        body
    }
}
