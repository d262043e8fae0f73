//! Build descriptor derivation
//!
//! Collects the build facts (product, platform, revision, branch, type
//! flags) scattered across the task definition, the worker environment
//! and the treeherder annotations, resolves the revision against version
//! control, and flattens the treeherder block onto the document. Test
//! tasks are then cross-referenced against their build task.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::crossref::link_build_task;
use crate::error::Result;
use crate::resources::Resources;
use crate::state::PipelineState;
use tasknorm_core::bag::{FieldBag, leaves};
use tasknorm_core::coalesce::Coalescer;
use tasknorm_core::domain::{BuildInfo, NormalizedTask};

/// Route prefix that marks a try push of the firefox product
const FIREFOX_TRY_ROUTE: &str = "index.gecko.v2.try.latest.firefox.";

/// Derives the build section of `doc` and resolves its repository.
///
/// Consumes the build-related fields of `task`, the `tags.build_props`
/// duplicates included, so they do not resurface as tags; only the
/// treeherder annotations and the suite name are peeked, since those are
/// flattened or parsed later.
pub async fn set_build_info(
    coalescer: &mut Coalescer,
    task_id: &str,
    task: &mut FieldBag,
    env: &Value,
    resources: &Resources,
    state: &mut PipelineState,
    doc: &mut NormalizedTask,
) -> Result<()> {
    let mut build = BuildInfo::default();
    let mut build_type: BTreeSet<String> = BTreeSet::new();

    if let Some(raw) = task.take_str("extra.build_type") {
        // buildbot-era abbreviation
        build_type.insert(if raw == "dbg" { "debug".to_string() } else { raw });
    }

    let firefox_by_suite = task
        .get_str("extra.suite.name")
        .filter(|name| name.starts_with("firefox"))
        .map(|_| "firefox".to_string());
    let firefox_by_route = doc
        .task
        .routes
        .iter()
        .any(|route| route.starts_with(FIREFOX_TRY_ROUTE))
        .then(|| "firefox".to_string());
    build.product = coalescer
        .pick(
            "build.product",
            vec![
                task.take_str("payload.properties.product"),
                task.take_str("tags.build_props.product"),
                task.get_str("extra.treeherder.productName").map(str::to_string),
                task.take_str("extra.build_product"),
                firefox_by_suite,
                firefox_by_route,
            ],
        )?
        .map(|p| p.to_lowercase());

    let platform = coalescer.pick(
        "build.platform",
        vec![
            task.get_str("extra.treeherder.build.platform").map(str::to_string),
            task.get_str("extra.treeherder.machine.platform").map(str::to_string),
        ],
    )?;
    build.platform = platform.map(|p| split_platform_flags(p, &mut build_type));
    build.url = env_str(env, "MOZILLA_BUILD_URL");

    let revision = coalescer.pick(
        "build.revision",
        vec![
            task.take_str("tags.build_props.revision"),
            task.take_str("payload.sourcestamp.revision"),
            task.take_str("payload.properties.revision"),
            env_str(env, "GECKO_HEAD_REV"),
        ],
    )?;
    build.version = coalescer.pick(
        "build.version",
        vec![
            task.take_str("tags.build_props.version"),
            task.take_str("payload.properties.version"),
        ],
    )?;
    build.channel = task.take_str("payload.properties.channels");

    build.branch = coalescer.pick(
        "build.branch",
        vec![
            task.take_str("tags.build_props.branch"),
            task.take_str("payload.sourcestamp.branch")
                .as_deref()
                .and_then(last_path_segment),
            env_str(env, "GECKO_HEAD_REPOSITORY")
                .as_deref()
                .and_then(last_path_segment),
            task.take_str("payload.properties.repo_path")
                .as_deref()
                .and_then(last_path_segment),
            env_str(env, "MH_BRANCH"),
        ],
    )?;
    build.set_revision(revision);

    if let (Some(branch), Some(revision)) = (build.branch.clone(), build.revision.clone()) {
        match resources.hg.resolve(&branch, &revision).await {
            Ok(Some(mut repo)) => {
                repo.minimize();
                build.date = repo.push.as_ref().and_then(|p| p.date);
                doc.repo = Some(repo);
            }
            Ok(None) => {
                debug!("revision {} not found on {}", revision, branch);
            }
            Err(e) => {
                warn!(
                    "could not resolve revision {} on {} for task {}: {}",
                    revision, branch, task_id, e
                );
            }
        }
    }

    // Treeherder collection keys are build-type flags in disguise
    if let Value::Object(collection) = task.take("extra.treeherder.collection") {
        for (key, enabled) in collection {
            if !truthy(&enabled) {
                continue;
            }
            match state.build_types.get(&key) {
                Some(flags) => build_type.extend(flags.iter().cloned()),
                None => {
                    warn!(
                        "unknown treeherder collection key {:?} in task {}",
                        key, task_id
                    );
                    build_type.insert(key);
                }
            }
        }
    }

    let treeherder: BTreeMap<String, Value> =
        leaves(&task.take("extra.treeherder")).into_iter().collect();
    if !treeherder.is_empty() {
        doc.treeherder = Some(treeherder);
    }

    doc.task.kind = task.take_str("tags.kind");
    build.build_type = build_type.into_iter().collect();
    doc.build = Some(build);

    let is_test = doc
        .treeherder
        .as_ref()
        .and_then(|th| th.get("jobKind"))
        .and_then(Value::as_str)
        == Some("test");
    if is_test {
        link_build_task(task_id, doc, resources, state).await?;
    }
    Ok(())
}

/// Coverage builds encode their instrumentation as a platform suffix
fn split_platform_flags(platform: String, build_type: &mut BTreeSet<String>) -> String {
    for (suffix, flag) in [("-ccov", "ccov"), ("-jsdcov", "jsdcov")] {
        if let Some(stripped) = platform.strip_suffix(suffix) {
            build_type.insert(flag.to_string());
            return stripped.to_string();
        }
    }
    platform
}

/// Branch name from a repository path or URL
fn last_path_segment(path: &str) -> Option<String> {
    let segment = path.trim_end_matches('/').rsplit('/').next()?;
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

fn env_str(env: &Value, name: &str) -> Option<String> {
    env.get(name).and_then(Value::as_str).map(str::to_string)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_platform_suffix_becomes_build_type_flag() {
        let mut flags = BTreeSet::new();
        assert_eq!(
            split_platform_flags("linux64-ccov".to_string(), &mut flags),
            "linux64"
        );
        assert!(flags.contains("ccov"));

        assert_eq!(
            split_platform_flags("win32".to_string(), &mut flags),
            "win32"
        );
    }

    #[test]
    fn test_last_path_segment() {
        assert_eq!(
            last_path_segment("https://hg.mozilla.org/try/").as_deref(),
            Some("try")
        );
        assert_eq!(
            last_path_segment("projects/graphics").as_deref(),
            Some("graphics")
        );
        assert_eq!(last_path_segment("/"), None);
    }

    #[test]
    fn test_truthy_mirrors_loose_semantics() {
        assert!(truthy(&json!(true)));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!("opt")));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&Value::Null));
    }
}
