//! Mercurial revision resolver
//!
//! Resolves a `(branch, revision)` pair against hg.mozilla.org's
//! `json-rev` endpoint and maps the response into the minimized
//! [`RepoInfo`] shape the normalized document carries.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::error::{ClientError, Result};
use crate::traits::RevisionResolver;
use crate::{RetryPolicy, retry};
use tasknorm_core::domain::{Branch, Changeset, Push, RepoInfo};

/// HTTP resolver for revision metadata
#[derive(Debug, Clone)]
pub struct HgResolver {
    base_url: String,
    client: Client,
    retry: RetryPolicy,
}

impl HgResolver {
    /// Create a resolver rooted at e.g. "https://hg.mozilla.org"
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        retry(&self.retry, url, || async {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if status.as_u16() == 404 {
                return Err(ClientError::NotFound(url.to_string()));
            }
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(ClientError::api_error(status.as_u16(), message));
            }
            response
                .json()
                .await
                .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {e}")))
        })
        .await
    }
}

#[async_trait]
impl RevisionResolver for HgResolver {
    async fn resolve(&self, branch: &str, revision: &str) -> Result<Option<RepoInfo>> {
        let url = format!("{}/{}/json-rev/{}", self.base_url, branch, revision);
        let body = match self.get_json(&url).await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(Some(repo_from_json(branch, &body)))
    }
}

fn repo_from_json(branch: &str, body: &Value) -> RepoInfo {
    let node = body.get("node").and_then(Value::as_str);
    RepoInfo {
        branch: Some(Branch {
            name: Some(branch.to_string()),
        }),
        changeset: Some(Changeset {
            id: node.map(str::to_string),
            id12: node.map(|n| n.chars().take(12).collect()),
            author: body.get("user").and_then(Value::as_str).map(str::to_string),
            description: body.get("desc").and_then(Value::as_str).map(str::to_string),
            date: hg_date(body.get("date")),
            files: body
                .get("files")
                .and_then(Value::as_array)
                .map(|files| {
                    files
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }),
        push: Some(Push {
            id: body.get("pushid").and_then(Value::as_i64),
            user: body
                .get("pushuser")
                .and_then(Value::as_str)
                .map(str::to_string),
            date: hg_date(body.get("pushdate")),
        }),
    }
}

/// hg encodes dates as `[epoch seconds, tz offset]`, sometimes as a bare
/// number
fn hg_date(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Array(parts) => parts.first().and_then(Value::as_i64),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}
