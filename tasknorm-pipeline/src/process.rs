//! Batch processing
//!
//! Drives one batch of pulse lines end to end: parse, fetch the task
//! definition and live status, normalize, attach artifacts, deduplicate,
//! and emit everything to the sink in one call. Per-line defects are
//! logged and skipped; a deferral or a stop request aborts the batch so
//! the scheduler retries it wholesale.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::normalize::normalize_task;
use crate::resources::Resources;
use crate::state::{PipelineState, SeenTask};
use tasknorm_client::traits::EmitRecord;
use tasknorm_core::bag::{FieldBag, merge_missing_value, non_null};
use tasknorm_core::coalesce::Coalescer;
use tasknorm_core::domain::{EtlEnvelope, NormalizedTask};

/// The batch-processing state machine
pub struct Pipeline {
    resources: Resources,
    state: PipelineState,
    source_key: String,
}

impl Pipeline {
    /// Creates a pipeline with fresh process-wide state
    pub fn new(resources: Resources, source_key: impl Into<String>) -> Self {
        Self {
            resources,
            state: PipelineState::new(),
            source_key: source_key.into(),
        }
    }

    /// Processes one batch of pulse lines and emits the results.
    ///
    /// Returns the destination keys written. [`PipelineError::TryAgainLater`]
    /// and [`PipelineError::Stopped`] mean nothing was emitted and the whole
    /// batch must be re-run; every other per-line failure is logged and the
    /// line skipped.
    pub async fn process_batch(
        &mut self,
        lines: &[String],
        please_stop: &AtomicBool,
    ) -> Result<Vec<String>> {
        let mut documents = Vec::new();
        // One provenance chain per batch, taken from the first chained line
        let mut canonical_source: Option<Value> = None;
        for (line_number, line) in lines.iter().enumerate() {
            if please_stop.load(Ordering::Relaxed) {
                return Err(PipelineError::Stopped);
            }
            if line.trim().is_empty() {
                continue;
            }
            match self
                .process_line(line_number as u64, line, &mut canonical_source)
                .await
            {
                Ok(Some(doc)) => documents.push(doc),
                Ok(None) => {}
                Err(e) if e.is_batch_fatal() => return Err(e),
                Err(e) => warn!(
                    "skipping line {} of {}: {}",
                    line_number, self.source_key, e
                ),
            }
        }

        let mut records = Vec::with_capacity(documents.len());
        for doc in documents {
            let id = doc.etl.as_ref().map(EtlEnvelope::key).unwrap_or_default();
            records.push(EmitRecord {
                id,
                value: serde_json::to_value(&doc)?,
            });
        }
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let keys = self.resources.sink.emit(records).await?;
        info!("emitted {} records for {}", keys.len(), self.source_key);
        Ok(keys)
    }

    async fn process_line(
        &mut self,
        line_number: u64,
        line: &str,
        canonical_source: &mut Option<Value>,
    ) -> Result<Option<NormalizedTask>> {
        let mut message = FieldBag::new(serde_json::from_str(line)?);
        let task_id = message
            .get_str("status.taskId")
            .map(str::to_string)
            .ok_or(PipelineError::MissingTaskId)?;

        let line_source = source_etl(message.take("etl"), &self.source_key);
        let source = match canonical_source {
            Some(canonical) => Some(canonical.clone()),
            None => {
                *canonical_source = line_source.clone();
                line_source
            }
        };
        let mut envelope = EtlEnvelope::join(line_number, source);
        message.take("_meta");

        let Some(definition) = self.resources.queue.task(&task_id).await? else {
            warn!("task {} not known to the queue, emitting placeholder", task_id);
            envelope.error = Some("not found".to_string());
            return Ok(Some(NormalizedTask::not_found(task_id, envelope)));
        };
        let mut task = FieldBag::new(definition);

        self.merge_live_status(&task_id, &mut message).await?;

        // An unresolved final run means the document would be incomplete
        let resolved = message
            .get("status.runs")
            .and_then(Value::as_array)
            .and_then(|runs| runs.last())
            .and_then(|run| run.get("resolved"))
            .filter(|v| !v.is_null());
        if resolved.is_none() {
            return Err(PipelineError::try_again(
                "task still running (not \"resolved\")",
            ));
        }

        let mut coalescer =
            Coalescer::new(format!("{}.{}:{}", self.source_key, line_number, task_id));
        let mut doc = normalize_task(
            &mut coalescer,
            &task_id,
            &mut message,
            &mut task,
            &self.resources,
            &mut self.state,
        )
        .await?;
        doc.etl = Some(envelope);

        self.attach_artifacts(&task_id, &mut doc).await?;

        // Duplicate deliveries are expected; diverging ones are not
        let sighting = self.project_sighting(message, task, &doc);
        if let Some(previous) = self.state.seen_tasks.get(&task_id) {
            if previous.message == sighting.message
                && previous.task == sighting.task
                && previous.artifacts == sighting.artifacts
            {
                debug!("task {} already processed identically, skipping", task_id);
                return Ok(None);
            }
            return Err(PipelineError::DuplicateMismatch { task_id });
        }
        self.state.seen_tasks.insert(task_id, sighting);
        Ok(Some(doc))
    }

    /// Overlays the queue's current status onto the pulse message: fresh
    /// run entries win element-wise, the message wins at the top level
    async fn merge_live_status(&self, task_id: &str, message: &mut FieldBag) -> Result<()> {
        let response = self.resources.queue.status(task_id).await?;
        let mut fresh = FieldBag::new(
            non_null(FieldBag::new(response).take("status")).unwrap_or_else(|| json!({})),
        );
        fresh.take("taskId");

        let stale_runs = match message.take("status.runs") {
            Value::Array(runs) => runs,
            _ => Vec::new(),
        };
        let mut runs = match fresh.take("runs") {
            Value::Array(runs) => runs,
            _ => Vec::new(),
        };
        for (i, stale) in stale_runs.into_iter().enumerate() {
            match runs.get_mut(i) {
                Some(slot) => merge_missing_value(slot, stale),
                None => runs.push(stale),
            }
        }
        fresh.set("runs", Value::Array(runs));

        message.merge_missing(json!({ "status": fresh.into_value() }));
        Ok(())
    }

    /// Replaces the declared artifacts with the live listing, reading the
    /// well-known ones along the way
    async fn attach_artifacts(&self, task_id: &str, doc: &mut NormalizedTask) -> Result<()> {
        let mut listing = match self.resources.queue.artifact_listing(task_id).await {
            Ok(listing) => listing,
            Err(e) => {
                return Err(PipelineError::try_again(format!(
                    "artifact listing unavailable: {e}"
                )));
            }
        };

        for artifact in &mut listing {
            let Some(name) = artifact
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                continue;
            };
            let url = self.resources.queue.artifact_url(task_id, &name);
            if let Some(obj) = artifact.as_object_mut() {
                obj.insert("url".to_string(), Value::String(url.clone()));
                // Canonicalize the expiry to UTC so equal listings compare equal
                if let Some(parsed) = obj
                    .get("expires")
                    .and_then(Value::as_str)
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                {
                    obj.insert(
                        "expires".to_string(),
                        Value::String(
                            parsed
                                .with_timezone(&Utc)
                                .to_rfc3339_opts(SecondsFormat::Millis, true),
                        ),
                    );
                }
            }

            if name.ends_with("live.log") {
                self.read_log_actions(&url, doc).await?;
            } else if name.ends_with("resource-usage.json") {
                if let Some(parser) = &self.resources.usage_parser {
                    match parser.parse(&url).await {
                        Ok(usage) => doc.resource_usage = Some(usage),
                        Err(e) => debug!("could not parse resource usage for {}: {}", task_id, e),
                    }
                }
            }
        }
        doc.task.artifacts = Some(Value::Array(listing));
        Ok(())
    }

    async fn read_log_actions(&self, url: &str, doc: &mut NormalizedTask) -> Result<()> {
        let Some(parser) = &self.resources.log_parser else {
            return Ok(());
        };
        let lines = match self.resources.queue.log_lines(url).await {
            Ok(lines) => lines,
            Err(e) if e.is_timeout() => {
                return Err(PipelineError::try_again("live log read timed out"));
            }
            Err(e) if e.is_connect() => {
                // A run that never completed may have no log to serve
                let run_state = doc.task.run.as_ref().and_then(|r| r.state.as_deref());
                if run_state != Some("completed") {
                    debug!("ignoring unreachable live log of unfinished run: {}", url);
                    return Ok(());
                }
                return Err(PipelineError::try_again("could not connect to live log"));
            }
            Err(e) => {
                warn!("could not fetch live log {}: {}", url, e);
                return Ok(());
            }
        };
        match parser.parse(&lines, url, doc) {
            Ok(action) => doc.action = Some(action),
            Err(e) => warn!("could not parse live log {}: {}", url, e),
        }
        Ok(())
    }

    fn project_sighting(&self, message: FieldBag, task: FieldBag, doc: &NormalizedTask) -> SeenTask {
        let mut message = message.into_value();
        self.state.projection.apply(&mut message);
        let mut task = task.into_value();
        self.state.projection.apply(&mut task);
        let mut artifacts = doc.task.artifacts.clone().unwrap_or(Value::Null);
        self.state.projection.apply(&mut artifacts);
        SeenTask {
            message,
            task,
            artifacts,
        }
    }
}

/// Prepares the raw envelope of a pulse line for use as our `source`:
/// lines straight off the wire carry no provenance chain yet, so one is
/// started for them
fn source_etl(raw: Value, source_key: &str) -> Option<Value> {
    let mut etl = non_null(raw)?;
    if let Some(map) = etl.as_object_mut() {
        if !map.get("source").is_some_and(Value::is_object) {
            map.insert("source".to_string(), json!({ "id": source_key }));
            map.entry("type".to_string())
                .or_insert_with(|| Value::String("join".to_string()));
        }
    }
    Some(etl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tasknorm_client::ClientError;
    use tasknorm_client::traits::{RecordIndex, RecordSink, RevisionResolver, TaskQueue};
    use tasknorm_core::domain::RepoInfo;

    struct MockQueue {
        task: Option<Value>,
        status: Value,
        artifacts: Vec<Value>,
        fail_artifacts: bool,
    }

    #[async_trait]
    impl TaskQueue for MockQueue {
        async fn task(&self, _task_id: &str) -> tasknorm_client::Result<Option<Value>> {
            Ok(self.task.clone())
        }

        async fn status(&self, _task_id: &str) -> tasknorm_client::Result<Value> {
            Ok(self.status.clone())
        }

        async fn artifact_listing(&self, _task_id: &str) -> tasknorm_client::Result<Vec<Value>> {
            if self.fail_artifacts {
                return Err(ClientError::api_error(503, "busy"));
            }
            Ok(self.artifacts.clone())
        }

        async fn log_lines(&self, _url: &str) -> tasknorm_client::Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn artifact_url(&self, task_id: &str, path: &str) -> String {
            format!("http://queue/task/{task_id}/artifacts/{path}")
        }
    }

    struct MockIndex;

    #[async_trait]
    impl RecordIndex for MockIndex {
        async fn find_by_task_ids(&self, _task_ids: &[String]) -> tasknorm_client::Result<Vec<Value>> {
            Ok(Vec::new())
        }
    }

    struct MockHg;

    #[async_trait]
    impl RevisionResolver for MockHg {
        async fn resolve(
            &self,
            _branch: &str,
            _revision: &str,
        ) -> tasknorm_client::Result<Option<RepoInfo>> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct MockSink {
        emitted: Mutex<Vec<EmitRecord>>,
    }

    #[async_trait]
    impl RecordSink for MockSink {
        async fn emit(&self, records: Vec<EmitRecord>) -> tasknorm_client::Result<Vec<String>> {
            let keys = records.iter().map(|r| r.id.clone()).collect();
            self.emitted.lock().unwrap().extend(records);
            Ok(keys)
        }
    }

    fn resources(queue: MockQueue) -> (Resources, Arc<MockSink>) {
        let sink = Arc::new(MockSink::default());
        (
            Resources {
                queue: Arc::new(queue),
                index: Arc::new(MockIndex),
                hg: Arc::new(MockHg),
                sink: sink.clone(),
                log_parser: None,
                usage_parser: None,
            },
            sink,
        )
    }

    fn completed_run() -> Value {
        json!({
            "runId": 0,
            "state": "completed",
            "reasonResolved": "completed",
            "scheduled": "2017-01-12T15:59:00.000Z",
            "started": "2017-01-12T16:00:00.000Z",
            "resolved": "2017-01-12T16:30:00.000Z"
        })
    }

    fn pulse_line() -> String {
        json!({
            "status": {
                "taskId": "abc123",
                "state": "completed",
                "runs": [completed_run()]
            },
            "runId": 0,
            "etl": {"id": 7, "source": {"id": "tc"}}
        })
        .to_string()
    }

    fn task_definition() -> Value {
        json!({
            "created": "2017-01-12T15:00:00.000Z",
            "provisionerId": "aws-provisioner-v1",
            "workerType": "desktop-test",
            "metadata": {"name": "mochitest-3", "owner": "dev@example.com"},
            "extra": {"suite": {"name": "mochitest"}, "chunks": {"current": 3}},
            "payload": {"env": {"MOZ_LOG": "5"}, "maxRunTime": 3600}
        })
    }

    fn live_status() -> Value {
        json!({
            "status": {
                "taskId": "abc123",
                "state": "completed",
                "runs": [completed_run()]
            }
        })
    }

    fn queue() -> MockQueue {
        MockQueue {
            task: Some(task_definition()),
            status: live_status(),
            artifacts: vec![json!({"name": "public/build/target.zip"})],
            fail_artifacts: false,
        }
    }

    #[tokio::test]
    async fn test_batch_emits_normalized_record() {
        let (resources, sink) = resources(queue());
        let mut pipeline = Pipeline::new(resources, "tc");
        let keys = pipeline
            .process_batch(&[pulse_line()], &AtomicBool::new(false))
            .await
            .unwrap();
        assert_eq!(keys, vec!["tc.7.0".to_string()]);

        let emitted = sink.emitted.lock().unwrap();
        let doc = &emitted[0].value;
        assert_eq!(doc["task"]["id"], json!("abc123"));
        assert_eq!(doc["run"]["suite"]["name"], json!("mochitest"));
        assert_eq!(doc["run"]["chunk"], json!(3));
        assert_eq!(doc["task"]["run"]["duration"], json!(1800.0));
        assert_eq!(
            doc["task"]["artifacts"][0]["url"],
            json!("http://queue/task/abc123/artifacts/public/build/target.zip")
        );
    }

    #[tokio::test]
    async fn test_release_fields_recovered() {
        let mut queue = queue();
        queue.task = Some(json!({
            "created": "2017-01-12T15:00:00.000Z",
            "provisionerId": "aws-provisioner-v1",
            "workerType": "desktop-test",
            "metadata": {"name": "beetmover-repackage", "owner": "dev@example.com"},
            "tags": {"build_props": {"revision": "deadbeef1234deadbeef", "branch": "try"}},
            "payload": {
                "maxRunTime": 3600,
                "parent_task_artifacts_url": "http://queue/task/par3nt/artifacts",
                "taskid_of_manifest": "man1fest",
                "update_manifest": true,
                "taskid_to_beetmove": "beetm0ve",
                "signing_cert": [null, "nightly-signing"]
            }
        }));
        let (resources, sink) = resources(queue);
        let mut pipeline = Pipeline::new(resources, "tc");
        pipeline
            .process_batch(&[pulse_line()], &AtomicBool::new(false))
            .await
            .unwrap();

        let emitted = sink.emitted.lock().unwrap();
        let doc = &emitted[0].value;
        assert_eq!(
            doc["task"]["parent"]["artifacts_url"],
            json!("http://queue/task/par3nt/artifacts")
        );
        assert_eq!(doc["task"]["manifest"]["task_id"], json!("man1fest"));
        assert_eq!(doc["task"]["manifest"]["update"], json!(true));
        assert_eq!(doc["task"]["beetmove"]["task_id"], json!("beetm0ve"));
        assert_eq!(doc["task"]["signing"]["cert"], json!("nightly-signing"));

        // The build_props duplicates feed the build section and must not
        // resurface as tags
        assert_eq!(doc["build"]["revision"], json!("deadbeef1234deadbeef"));
        assert_eq!(doc["build"]["branch"], json!("try"));
        let tag_names: Vec<&str> = doc["task"]["tags"]
            .as_array()
            .map(|tags| {
                tags.iter()
                    .filter_map(|t| t["name"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        assert!(!tag_names.iter().any(|name| name.starts_with("build_props")));
    }

    #[tokio::test]
    async fn test_unknown_task_emits_placeholder() {
        let mut queue = queue();
        queue.task = None;
        let (resources, sink) = resources(queue);
        let mut pipeline = Pipeline::new(resources, "tc");
        let keys = pipeline
            .process_batch(&[pulse_line()], &AtomicBool::new(false))
            .await
            .unwrap();
        assert_eq!(keys.len(), 1);

        let emitted = sink.emitted.lock().unwrap();
        let doc = &emitted[0].value;
        assert_eq!(doc["task"]["id"], json!("abc123"));
        assert_eq!(doc["etl"]["error"], json!("not found"));
    }

    #[tokio::test]
    async fn test_unresolved_run_defers_batch() {
        let mut queue = queue();
        queue.status = json!({
            "status": {
                "taskId": "abc123",
                "state": "running",
                "runs": [{"runId": 0, "state": "running", "started": "2017-01-12T16:00:00.000Z"}]
            }
        });
        let line = json!({
            "status": {"taskId": "abc123", "state": "running",
                       "runs": [{"runId": 0, "state": "running"}]},
            "runId": 0,
            "etl": {"id": 7, "source": {"id": "tc"}}
        })
        .to_string();
        let (resources, _) = resources(queue);
        let mut pipeline = Pipeline::new(resources, "tc");
        let result = pipeline.process_batch(&[line], &AtomicBool::new(false)).await;
        assert!(matches!(result, Err(PipelineError::TryAgainLater { .. })));
    }

    #[tokio::test]
    async fn test_artifact_listing_failure_defers_batch() {
        let mut queue = queue();
        queue.fail_artifacts = true;
        let (resources, _) = resources(queue);
        let mut pipeline = Pipeline::new(resources, "tc");
        let result = pipeline
            .process_batch(&[pulse_line()], &AtomicBool::new(false))
            .await;
        assert!(matches!(result, Err(PipelineError::TryAgainLater { .. })));
    }

    #[tokio::test]
    async fn test_stop_signal_aborts_batch() {
        let (resources, sink) = resources(queue());
        let mut pipeline = Pipeline::new(resources, "tc");
        let result = pipeline
            .process_batch(&[pulse_line()], &AtomicBool::new(true))
            .await;
        assert!(matches!(result, Err(PipelineError::Stopped)));
        assert!(sink.emitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_identical_duplicate_emitted_once() {
        let (resources, sink) = resources(queue());
        let mut pipeline = Pipeline::new(resources, "tc");
        let keys = pipeline
            .process_batch(&[pulse_line(), pulse_line()], &AtomicBool::new(false))
            .await
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(sink.emitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_diverging_duplicate_skips_line_but_not_batch() {
        let mut diverging: Value = serde_json::from_str(&pulse_line()).unwrap();
        diverging["display"] = json!(true);
        let (resources, sink) = resources(queue());
        let mut pipeline = Pipeline::new(resources, "tc");
        let keys = pipeline
            .process_batch(
                &[pulse_line(), diverging.to_string()],
                &AtomicBool::new(false),
            )
            .await
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(sink.emitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_json_line_skipped() {
        let (resources, sink) = resources(queue());
        let mut pipeline = Pipeline::new(resources, "tc");
        let keys = pipeline
            .process_batch(
                &["{not json".to_string(), pulse_line()],
                &AtomicBool::new(false),
            )
            .await
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(sink.emitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_started_etl_chain_for_unchained_lines() {
        let line = json!({
            "status": {"taskId": "abc123", "state": "completed", "runs": [completed_run()]},
            "runId": 0,
            "etl": {"id": 4}
        })
        .to_string();
        let (resources, _) = resources(queue());
        let mut pipeline = Pipeline::new(resources, "tc");
        let keys = pipeline
            .process_batch(&[line], &AtomicBool::new(false))
            .await
            .unwrap();
        assert_eq!(keys, vec!["tc.4.0".to_string()]);
    }
}
