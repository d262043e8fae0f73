//! Test-to-build cross-referencing
//!
//! A test task's document only becomes useful once it names the build it
//! tested. The build task is found either through the build URL or the
//! dependency list, fetched from the index of already-normalized records,
//! and its build and repo sections are merged into the gaps of ours.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::resources::Resources;
use crate::state::PipelineState;
use tasknorm_core::domain::{BuildInfo, NormalizedTask, RepoInfo};

/// Fills the build and repo gaps of a test task from its build task.
///
/// Inability to find or trust the build record is never an error; the
/// document simply stays as derived, with a once-per-task alert.
pub async fn link_build_task(
    task_id: &str,
    doc: &mut NormalizedTask,
    resources: &Resources,
    state: &mut PipelineState,
) -> Result<()> {
    let candidate_ids = doc
        .build
        .as_ref()
        .and_then(|b| b.url.as_deref())
        .and_then(task_id_from_url)
        .map(|id| vec![id])
        .unwrap_or_else(|| doc.task.dependencies.clone());
    if candidate_ids.is_empty() {
        warn!("test task {} names no build task candidates", task_id);
        return Ok(());
    }

    let records = resources.index.find_by_task_ids(&candidate_ids).await?;
    let Some(candidate) = select_candidate(&records) else {
        let mut unseen = false;
        for candidate_id in &candidate_ids {
            unseen |= state.missing_builds.insert(candidate_id.clone());
        }
        if unseen {
            warn!(
                "no build task found for test task {} among {:?}",
                task_id, candidate_ids
            );
        }
        return Ok(());
    };

    let candidate_build: BuildInfo = match candidate.get("build") {
        Some(value) => match serde_json::from_value(value.clone()) {
            Ok(build) => build,
            Err(e) => {
                warn!("build task record for {} has a bad build section: {}", task_id, e);
                return Ok(());
            }
        },
        None => BuildInfo::default(),
    };

    // A revision disagreement means we matched the wrong build; leave the
    // document untouched rather than blend two pushes
    let ours = doc.build.as_ref().and_then(|b| b.revision12.as_deref());
    if let (Some(ours), Some(theirs)) = (ours, candidate_build.revision12.as_deref()) {
        if ours != theirs {
            warn!(
                "build task revision {} does not match test task {} revision {}",
                theirs, task_id, ours
            );
            return Ok(());
        }
    }

    doc.build
        .get_or_insert_with(BuildInfo::default)
        .fill_missing_from(&candidate_build);
    if doc.repo.is_none() {
        if let Some(repo_value) = candidate.get("repo") {
            match serde_json::from_value::<RepoInfo>(repo_value.clone()) {
                Ok(mut repo) => {
                    repo.minimize();
                    doc.repo = Some(repo);
                }
                Err(e) => debug!("build task record for {} has a bad repo section: {}", task_id, e),
            }
        }
    }
    Ok(())
}

/// The task id embedded in an artifact URL, between `task/` and the next `/`
fn task_id_from_url(url: &str) -> Option<String> {
    let start = url.find("task/")? + "task/".len();
    let rest = &url[start..];
    let end = rest.find('/')?;
    if end == 0 {
        return None;
    }
    Some(rest[..end].to_string())
}

/// The most recently started build record among the candidates
pub(crate) fn select_candidate(records: &[Value]) -> Option<&Value> {
    records
        .iter()
        .filter(|record| {
            record.pointer("/treeherder/jobKind").and_then(Value::as_str) == Some("build")
        })
        .max_by_key(|record| {
            record
                .pointer("/task/run/start_time")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use tasknorm_client::traits::{
        EmitRecord, RecordIndex, RecordSink, RevisionResolver, TaskQueue,
    };

    struct StubQueue;

    #[async_trait]
    impl TaskQueue for StubQueue {
        async fn task(&self, _task_id: &str) -> tasknorm_client::Result<Option<Value>> {
            Ok(None)
        }

        async fn status(&self, _task_id: &str) -> tasknorm_client::Result<Value> {
            Ok(Value::Null)
        }

        async fn artifact_listing(&self, _task_id: &str) -> tasknorm_client::Result<Vec<Value>> {
            Ok(Vec::new())
        }

        async fn log_lines(&self, _url: &str) -> tasknorm_client::Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn artifact_url(&self, _task_id: &str, _path: &str) -> String {
            String::new()
        }
    }

    struct StubHg;

    #[async_trait]
    impl RevisionResolver for StubHg {
        async fn resolve(
            &self,
            _branch: &str,
            _revision: &str,
        ) -> tasknorm_client::Result<Option<RepoInfo>> {
            Ok(None)
        }
    }

    struct StubSink;

    #[async_trait]
    impl RecordSink for StubSink {
        async fn emit(&self, _records: Vec<EmitRecord>) -> tasknorm_client::Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct FixedIndex(Vec<Value>);

    #[async_trait]
    impl RecordIndex for FixedIndex {
        async fn find_by_task_ids(
            &self,
            _task_ids: &[String],
        ) -> tasknorm_client::Result<Vec<Value>> {
            Ok(self.0.clone())
        }
    }

    fn resources(records: Vec<Value>) -> crate::resources::Resources {
        crate::resources::Resources {
            queue: Arc::new(StubQueue),
            index: Arc::new(FixedIndex(records)),
            hg: Arc::new(StubHg),
            sink: Arc::new(StubSink),
            log_parser: None,
            usage_parser: None,
        }
    }

    fn build_record(revision12: &str) -> Value {
        json!({
            "treeherder": {"jobKind": "build"},
            "task": {"id": "bld", "run": {"start_time": "2017-01-12T10:00:00Z"}},
            "build": {
                "revision12": revision12,
                "branch": "try",
                "platform": "linux64",
                "type": ["opt"]
            },
            "repo": {"changeset": {"id12": revision12}}
        })
    }

    fn test_task_doc(revision12: &str) -> NormalizedTask {
        let mut doc = NormalizedTask::default();
        doc.task.dependencies = vec!["bld".to_string()];
        doc.build = Some(BuildInfo {
            revision12: Some(revision12.to_string()),
            ..Default::default()
        });
        doc
    }

    #[tokio::test]
    async fn test_revision_mismatch_rejects_candidate() {
        let resources = resources(vec![build_record("bbbbbbbbbbbb")]);
        let mut state = crate::state::PipelineState::new();
        let mut doc = test_task_doc("aaaaaaaaaaaa");

        link_build_task("tst", &mut doc, &resources, &mut state)
            .await
            .unwrap();

        let build = doc.build.unwrap();
        assert_eq!(build.branch, None);
        assert!(build.build_type.is_empty());
        assert!(doc.repo.is_none());
    }

    #[tokio::test]
    async fn test_matching_build_fills_gaps() {
        let resources = resources(vec![build_record("aaaaaaaaaaaa")]);
        let mut state = crate::state::PipelineState::new();
        let mut doc = test_task_doc("aaaaaaaaaaaa");

        link_build_task("tst", &mut doc, &resources, &mut state)
            .await
            .unwrap();

        let build = doc.build.unwrap();
        assert_eq!(build.branch.as_deref(), Some("try"));
        assert_eq!(build.platform.as_deref(), Some("linux64"));
        assert_eq!(build.build_type, vec!["opt".to_string()]);
        assert_eq!(
            doc.repo.unwrap().changeset.unwrap().id12.as_deref(),
            Some("aaaaaaaaaaaa")
        );
    }

    #[tokio::test]
    async fn test_missing_build_alerts_once_and_leaves_doc() {
        let resources = resources(Vec::new());
        let mut state = crate::state::PipelineState::new();
        let mut doc = test_task_doc("aaaaaaaaaaaa");

        link_build_task("tst", &mut doc, &resources, &mut state)
            .await
            .unwrap();
        // The absent build task is recorded, not the test task asking for it
        assert!(state.missing_builds.contains("bld"));
        assert!(!state.missing_builds.contains("tst"));
        assert!(doc.repo.is_none());
    }

    #[test]
    fn test_task_id_from_url() {
        assert_eq!(
            task_id_from_url(
                "https://queue.taskcluster.net/v1/task/e6TfNRfiR3W7ZbGS6SRGWg/artifacts/target.zip"
            )
            .as_deref(),
            Some("e6TfNRfiR3W7ZbGS6SRGWg")
        );
        assert_eq!(task_id_from_url("https://example.com/nothing"), None);
    }

    #[test]
    fn test_select_candidate_prefers_latest_build() {
        let records = vec![
            json!({
                "task": {"id": "a", "run": {"start_time": "2017-01-12T10:00:00Z"}},
                "treeherder": {"jobKind": "build"}
            }),
            json!({
                "task": {"id": "b", "run": {"start_time": "2017-01-12T12:00:00Z"}},
                "treeherder": {"jobKind": "test"}
            }),
            json!({
                "task": {"id": "c", "run": {"start_time": "2017-01-12T11:00:00Z"}},
                "treeherder": {"jobKind": "build"}
            }),
        ];
        let selected = select_candidate(&records).unwrap();
        assert_eq!(selected["task"]["id"], json!("c"));
    }

    #[test]
    fn test_select_candidate_ignores_non_builds() {
        let records = vec![json!({"treeherder": {"jobKind": "test"}})];
        assert!(select_candidate(&records).is_none());
    }
}
