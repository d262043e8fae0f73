//! Tasknorm HTTP clients
//!
//! Type-safe HTTP clients for the services the normalization pipeline
//! depends on: the TaskCluster queue, the normalized-record index, the
//! mercurial revision resolver and the destination sink. All of them
//! implement the collaborator traits in [`traits`], so the pipeline can
//! swap them for mocks in tests.
//!
//! # Example
//!
//! ```no_run
//! use tasknorm_client::QueueClient;
//! use tasknorm_client::traits::TaskQueue;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let queue = QueueClient::new("https://queue.taskcluster.net/v1");
//!     if let Some(task) = queue.task("e6TfNRfiR3W7ZbGS6SRGWg").await? {
//!         println!("provisioner: {}", task["provisionerId"]);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod hg;
mod index;
pub mod traits;

pub use error::{ClientError, Result};
pub use hg::HgResolver;
pub use index::{HttpSink, IndexClient};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::traits::TaskQueue;

/// Fixed retry policy applied to every upstream call
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub times: u32,
    /// Sleep between attempts
    pub sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            times: 3,
            sleep: Duration::from_secs(5),
        }
    }
}

/// HTTP client for the TaskCluster queue API
#[derive(Debug, Clone)]
pub struct QueueClient {
    /// Base URL of the queue (e.g., "https://queue.taskcluster.net/v1")
    base_url: String,
    /// HTTP client instance
    client: Client,
    retry: RetryPolicy,
}

impl QueueClient {
    /// Create a new queue client with the default retry policy
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new(), RetryPolicy::default())
    }

    /// Create a queue client with a custom retry policy
    pub fn with_retry(base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self::with_client(base_url, Client::new(), retry)
    }

    /// Create a queue client with a custom HTTP client and retry policy
    ///
    /// This allows configuring timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client, retry: RetryPolicy) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            retry,
        }
    }

    /// Get the base URL of the queue
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        retry(&self.retry, url, || async {
            let response = self.client.get(url).send().await?;
            let status = response.status();

            if status.as_u16() == 404 {
                // The queue reports missing tasks with a structured error body
                let body: Value = response.json().await.unwrap_or(Value::Null);
                if body.get("code").and_then(Value::as_str) == Some("ResourceNotFound") {
                    return Err(ClientError::NotFound(url.to_string()));
                }
                return Err(ClientError::api_error(404, body.to_string()));
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

    async fn get_text(&self, url: &str) -> Result<String> {
        retry(&self.retry, url, || async {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(ClientError::api_error(status.as_u16(), message));
            }
            Ok(response.text().await?)
        })
        .await
    }
}

#[async_trait]
impl TaskQueue for QueueClient {
    async fn task(&self, task_id: &str) -> Result<Option<Value>> {
        let url = format!("{}/task/{}", self.base_url, task_id);
        match self.get_json(&url).await {
            Ok(task) => Ok(Some(task)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn status(&self, task_id: &str) -> Result<Value> {
        let url = format!("{}/task/{}/status", self.base_url, task_id);
        self.get_json(&url).await
    }

    async fn artifact_listing(&self, task_id: &str) -> Result<Vec<Value>> {
        let url = format!("{}/task/{}/artifacts", self.base_url, task_id);
        let body = self.get_json(&url).await?;
        match body.get("artifacts") {
            Some(Value::Array(artifacts)) => Ok(artifacts.clone()),
            _ => Err(ClientError::ParseError(format!(
                "artifact listing for {task_id} has no artifacts array"
            ))),
        }
    }

    async fn log_lines(&self, url: &str) -> Result<Vec<String>> {
        let body = self.get_text(url).await?;
        Ok(body.lines().map(str::to_string).collect())
    }

    fn artifact_url(&self, task_id: &str, path: &str) -> String {
        format!("{}/task/{}/artifacts/{}", self.base_url, task_id, path)
    }
}

/// Runs `attempt` up to `policy.times` times, sleeping between retryable
/// failures. Non-retryable errors (404s, 4xx) fail immediately.
pub(crate) async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, attempt: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if tries < policy.times && e.is_retryable() => {
                warn!(
                    "request to {} failed (attempt {}/{}): {}, retrying in {:?}",
                    what, tries, policy.times, e, policy.sleep
                );
                tokio::time::sleep(policy.sleep).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_trims_trailing_slash() {
        let queue = QueueClient::new("https://queue.taskcluster.net/v1/");
        assert_eq!(queue.base_url(), "https://queue.taskcluster.net/v1");
    }

    #[test]
    fn test_artifact_url_shape() {
        let queue = QueueClient::new("https://queue.taskcluster.net/v1");
        assert_eq!(
            queue.artifact_url("abc", "public/logs/live.log"),
            "https://queue.taskcluster.net/v1/task/abc/artifacts/public/logs/live.log"
        );
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_non_retryable() {
        let policy = RetryPolicy {
            times: 3,
            sleep: Duration::from_millis(1),
        };
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<()> = retry(&policy, "test", || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(ClientError::NotFound("x".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts_on_server_errors() {
        let policy = RetryPolicy {
            times: 3,
            sleep: Duration::from_millis(1),
        };
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<()> = retry(&policy, "test", || {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async { Err(ClientError::api_error(503, "busy")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
