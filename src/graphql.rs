//! Minimal GraphQL-over-HTTP client.
//!
//! Queries are idempotent and retried through [`send_idempotent`];
//! documents whose first operation is a `mutation` are sent exactly once.

use serde_json::{json, Value};

use crate::http::{send_idempotent, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum GraphqlError {
    #[error("GraphQL endpoint rejected the token (HTTP {0})")]
    Unauthorized(u16),
    #[error("GraphQL endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("GraphQL request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("GraphQL errors: {}", .0.join("; "))]
    Errors(Vec<String>),
    #[error("malformed GraphQL response: {0}")]
    Malformed(String),
}

#[derive(Clone)]
pub struct GraphqlClient {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    retry: RetryPolicy,
}

impl GraphqlClient {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        token: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token: token.into(),
            retry,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run a document and return its `data` member.
    ///
    /// A response carrying a non-empty `errors` array fails, even when
    /// partial data is present.
    pub async fn execute(&self, query: &str, variables: Option<Value>) -> Result<Value, GraphqlError> {
        let body = json!({
            "query": query,
            "variables": variables.unwrap_or_else(|| json!({})),
        });
        let request = || {
            self.client
                .post(&self.endpoint)
                .bearer_auth(&self.token)
                .json(&body)
        };
        let resp = if is_mutation(query) {
            request().send().await?
        } else {
            send_idempotent(&self.retry, "graphql", request).await?
        };

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(GraphqlError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GraphqlError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = resp.json().await?;
        if let Some(errors) = payload.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                return Err(GraphqlError::Errors(
                    errors
                        .iter()
                        .map(|e| {
                            e.get("message")
                                .and_then(|m| m.as_str())
                                .unwrap_or("unknown error")
                                .to_string()
                        })
                        .collect(),
                ));
            }
        }
        match payload.get("data") {
            Some(data) if !data.is_null() => Ok(data.clone()),
            _ => Err(GraphqlError::Malformed("response has no data".into())),
        }
    }
}

/// Whether a document's first operation definition is a mutation.
///
/// Fragment definitions are skipped, and comments, string literals and
/// selection sets are never read as keywords. A bare `{ ... }` is a query.
pub fn is_mutation(query: &str) -> bool {
    let mut depth = 0usize;
    let mut in_fragment = false;
    let mut in_comment = false;
    let mut in_string = false;
    let mut escaped = false;
    let mut word = String::new();

    for c in query.chars() {
        if in_comment {
            in_comment = c != '\n';
            continue;
        }
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c.is_alphanumeric() || c == '_' {
            word.push(c);
            continue;
        }
        if depth == 0 && !in_fragment {
            match word.as_str() {
                "mutation" => return true,
                "query" | "subscription" => return false,
                "fragment" => in_fragment = true,
                _ => {}
            }
        }
        word.clear();
        match c {
            '#' => in_comment = true,
            '"' => in_string = true,
            '{' => {
                if depth == 0 && !in_fragment {
                    return false;
                }
                depth += 1;
            }
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    in_fragment = false;
                }
            }
            _ => {}
        }
    }
    depth == 0 && !in_fragment && word == "mutation"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_detection() {
        assert!(is_mutation("mutation { packageConstruct { hash } }"));
        assert!(is_mutation("# comment\n  mutation Push($x: Int) { a }"));
        assert!(!is_mutation("query { bucketConfigs { name } }"));
        assert!(!is_mutation("{ me { name } }"));
        assert!(!is_mutation(""));
    }

    #[test]
    fn test_mutation_after_fragment() {
        let doc = "fragment Rev on Revision { hash message }\n\
                   mutation Push { packageConstruct { ...Rev } }";
        assert!(is_mutation(doc));
        let doc = "fragment mutation on Revision { hash }\nquery { a { ...mutation } }";
        assert!(!is_mutation(doc));
        assert!(!is_mutation("# mutation in a comment\nquery { a }"));
        assert!(!is_mutation("{ search(q: \"mutation\") { hits } }"));
    }
}
