//! Normalized-record index client and destination sink
//!
//! Both talk to the same search cluster: the index side runs the
//! build-task cross-reference query, the sink side bulk-writes finished
//! records with overwrite-on-conflict semantics.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::traits::{EmitRecord, RecordIndex, RecordSink};
use crate::{RetryPolicy, retry};

/// Upper bound on cross-reference candidates fetched per query
const QUERY_PAGE_SIZE: usize = 10;

/// HTTP client for the normalized-record search index
#[derive(Debug, Clone)]
pub struct IndexClient {
    base_url: String,
    client: Client,
    retry: RetryPolicy,
}

impl IndexClient {
    /// Create an index client; cross-reference lookups use a slower retry
    /// cadence than the queue
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            retry: RetryPolicy {
                times: 3,
                sleep: Duration::from_secs(15),
            },
        }
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        retry(&self.retry, url, || async {
            let response = self.client.post(url).json(body).send().await?;
            let status = response.status();
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
impl RecordIndex for IndexClient {
    async fn find_by_task_ids(&self, task_ids: &[String]) -> Result<Vec<Value>> {
        let url = format!("{}/task/task/_search", self.base_url);
        let query = json!({
            "query": {"filtered": {"filter": {"terms": {"task.id": task_ids}}}},
            "from": 0,
            "size": QUERY_PAGE_SIZE,
        });
        let response = self.post_json(&url, &query).await?;

        let hits = response
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(hits
            .into_iter()
            .filter_map(|hit| hit.get("_source").cloned())
            .collect())
    }
}

/// Bulk-writing sink over the same search cluster
#[derive(Debug, Clone)]
pub struct HttpSink {
    base_url: String,
    client: Client,
    retry: RetryPolicy,
}

impl HttpSink {
    /// Create a sink writing into `base_url`'s `task` index
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            retry: RetryPolicy::default(),
        }
    }
}

#[async_trait]
impl RecordSink for HttpSink {
    async fn emit(&self, records: Vec<EmitRecord>) -> Result<Vec<String>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut body = String::new();
        for record in &records {
            body.push_str(&json!({"index": {"_id": record.id}}).to_string());
            body.push('\n');
            body.push_str(&record.value.to_string());
            body.push('\n');
        }

        let url = format!("{}/task/task/_bulk", self.base_url);
        retry(&self.retry, &url, || async {
            let response = self
                .client
                .post(&url)
                .header("Content-Type", "application/x-ndjson")
                .body(body.clone())
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(ClientError::api_error(status.as_u16(), message));
            }
            Ok(())
        })
        .await?;

        Ok(records.into_iter().map(|r| r.id).collect())
    }
}
