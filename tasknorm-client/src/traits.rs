//! Collaborator interfaces
//!
//! The pipeline core never talks to the outside world directly; every
//! external dependency is behind one of these traits to enable testing
//! and dependency injection. The HTTP implementations live in this
//! crate; tests supply in-memory mocks.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use tasknorm_core::domain::{NormalizedTask, RepoInfo};

/// The task-execution service: definitions, statuses, artifacts, logs
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Fetch a task definition; `None` when the queue has no such task
    async fn task(&self, task_id: &str) -> Result<Option<Value>>;

    /// Fetch the live status record for a task
    async fn status(&self, task_id: &str) -> Result<Value>;

    /// Fetch the artifact listing for a task
    async fn artifact_listing(&self, task_id: &str) -> Result<Vec<Value>>;

    /// Fetch the lines of a live log by URL
    async fn log_lines(&self, url: &str) -> Result<Vec<String>>;

    /// The public URL of a named artifact
    fn artifact_url(&self, task_id: &str, path: &str) -> String;
}

/// The store of already-normalized records, queried for build tasks
#[async_trait]
pub trait RecordIndex: Send + Sync {
    /// Records whose task id is among `task_ids`, up to a bounded page
    async fn find_by_task_ids(&self, task_ids: &[String]) -> Result<Vec<Value>>;
}

/// Version-control history lookup for a build revision
#[async_trait]
pub trait RevisionResolver: Send + Sync {
    /// Repo metadata for `revision` on `branch`; `None` when unknown
    async fn resolve(&self, branch: &str, revision: &str) -> Result<Option<RepoInfo>>;
}

/// One record handed to the sink
#[derive(Debug, Clone)]
pub struct EmitRecord {
    pub id: String,
    pub value: Value,
}

/// The destination store, with at-least-once overwrite-on-conflict writes
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Write all records, returning the keys actually written
    async fn emit(&self, records: Vec<EmitRecord>) -> Result<Vec<String>>;
}

/// Turns raw live-log lines into a structured action summary
pub trait LiveLogParser: Send + Sync {
    fn parse(&self, lines: &[String], url: &str, task: &NormalizedTask) -> Result<Value>;
}

/// Fetches and parses a resource-usage artifact
#[async_trait]
pub trait ResourceUsageParser: Send + Sync {
    async fn parse(&self, url: &str) -> Result<Value>;
}
