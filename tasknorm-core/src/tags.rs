//! Tag extraction
//!
//! Raw tasks scatter descriptive key/value pairs across `tags`,
//! `metadata`, `extra` and `payload.properties`, in a handful of JSON
//! shapes. This module flattens them into one ordered `{name, value}`
//! list with string values, validating names against a growable
//! vocabulary: unknown names warn once and are learned for the rest of
//! the process lifetime.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::warn;

use crate::bag::{FieldBag, leaves};
use crate::domain::Tag;

/// Payload fields that are really tags, consumed straight off `payload`
pub const PAYLOAD_PROPERTIES: &[&str] = &[
    "apks.armv7_v15",
    "apks.x86",
    "artifactsTaskId",
    "balrog_api_root",
    "build_number",
    "chain",
    "CHANNEL",
    "contact",
    "context",
    "created",
    "deadline",
    "description",
    "desiredResolution",
    "encryptedEnv",
    "en_us_binary_url",
    "google_play_track",
    "graphs",
    "locales",
    "locale",
    "mar_tools_url",
    "next_version",
    "NO_BBCONFIG",
    "onExitStatus",
    "osGroups",
    "purpose",
    "release_promotion",
    "repack_manifests_url",
    "script_repo_revision",
    "signingManifest",
    "sourcestamp.repository",
    "stage-product",
    "summary",
    "supersederUrl",
    "template_key",
    "THIS_CHUNK",
    "TOTAL_CHUNKS",
    "tuxedo_server_url",
    "unsignedArtifacts",
    "upload_date",
    "VERIFY_CONFIG",
    "version",
];

const KNOWN_TAGS: &[&str] = &[
    "buildid",
    "build_name",
    "build_type",
    "build_product",
    "build_props.branch",
    "build_props.build_number",
    "build_props.release_eta",
    "build_props.locales",
    "build_props.mozharness_changeset",
    "build_props.partials",
    "build_props.platform",
    "build_props.product",
    "build_props.revision",
    "build_props.version",
    "chainOfTrust.inputs.docker-image",
    "chunks.current",
    "chunks.total",
    "createdForUser",
    "data.base.sha",
    "data.base.user.login",
    "data.head.sha",
    "data.head.user.email",
    "description",
    "en_us_installer_binary_url",
    "funsize.partials",
    "funsize.partials.branch",
    "funsize.partials.from_mar",
    "funsize.partials.locale",
    "funsize.partials.platform",
    "funsize.partials.previousBuildNumber",
    "funsize.partials.previousVersion",
    "funsize.partials.to_mar",
    "funsize.partials.toBuildNumber",
    "funsize.partials.toVersion",
    "funsize.partials.update_number",
    "github.branches",
    "github.events",
    "github.env",
    "github.headBranch",
    "github.headRepo",
    "github.headRevision",
    "github.headUser",
    "github.baseBranch",
    "github.baseRepo",
    "github.baseRevision",
    "github.baseUser",
    "githubPullRequest",
    "imageMeta.contextHash",
    "imageMeta.imageName",
    "imageMeta.level",
    "index.expires",
    "index.rank",
    "installer_path",
    "l10n_changesets",
    "link",
    "locations.mozharness",
    "locations.test_packages",
    "locations.build",
    "locations.img",
    "locations.mar",
    "locations.sources",
    "locations.symbols",
    "locations.tests",
    "name",
    "notification.task-defined.irc.notify_nicks",
    "notification.task-defined.irc.message",
    "notification.task-defined.log_collect",
    "notification.task-defined.ses.body",
    "notification.task-defined.ses.recipients",
    "notification.task-defined.ses.subject",
    "notification.task-defined.smtp.body",
    "notification.task-defined.smtp.recipients",
    "notification.task-defined.smtp.subject",
    "notification.task-defined.sns.message",
    "notification.task-defined.sns.arn",
    "notifications.task-completed.message",
    "notifications.task-completed.ids",
    "notifications.task-completed.subject",
    "notifications.task-failed.message",
    "notifications.task-failed.ids",
    "notifications.task-failed.subject",
    "notifications.task-exception.message",
    "notifications.task-exception.ids",
    "notifications.task-exception.subject",
    "npmCache.url",
    "npmCache.expires",
    "objective",
    "owner",
    "partial_versions",
    "platforms",
    "signing.signature",
    "source",
    "suite.flavor",
    "suite.name",
    "treeherderEnv",
    "upload_to_task_id",
    "url.busybox",
    "useCloudMirror",
    "who",
];

/// Seed vocabulary of tag names that do not warrant a warning
pub fn default_known_tags() -> HashSet<String> {
    KNOWN_TAGS
        .iter()
        .chain(PAYLOAD_PROPERTIES.iter())
        .map(|name| name.to_string())
        .collect()
}

/// The JSON shapes a tag value can take, each with its own flattening rule
#[derive(Debug)]
pub enum TagValue {
    /// Null or absent; produces no tag
    Missing,
    /// Already a string; kept verbatim
    Text(String),
    /// Non-string scalar; JSON-encoded
    Scalar(Value),
    /// One-element list; unwrapped, then re-classified
    Singleton(Value),
    /// Any other list; JSON-encoded whole
    List(Vec<Value>),
    /// A nested mapping; recursed with a dotted name prefix
    Nested(Map<String, Value>),
}

impl TagValue {
    /// Classifies a raw JSON value into its flattening rule
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Null => Self::Missing,
            Value::String(s) => Self::Text(s),
            Value::Array(mut values) if values.len() == 1 => {
                Self::Singleton(values.pop().expect("length checked"))
            }
            Value::Array(values) => Self::List(values),
            Value::Object(map) => Self::Nested(map),
            scalar => Self::Scalar(scalar),
        }
    }
}

/// Flattens the scattered property bags of a raw task into tags.
///
/// Consumes `tags`, `metadata`, `extra`, `payload.properties` and the
/// known payload property fields. Unknown tag names warn once per process
/// and extend `known`.
pub fn extract_tags(
    source_key: &str,
    task_id: &str,
    task: &mut FieldBag,
    known: &mut HashSet<String>,
) -> Vec<Tag> {
    let mut pairs: Vec<(String, Value)> = Vec::new();

    // Special cases first
    if let Some(platforms) = task.take_str("payload.properties.platforms") {
        let list: Vec<Value> = platforms
            .split(',')
            .map(|p| Value::String(p.trim().to_string()))
            .collect();
        pairs.push(("platforms".to_string(), Value::Array(list)));
    }
    if let Some(link) = task.take_str("payload.link") {
        pairs.push(("link".to_string(), Value::String(link)));
    }

    for bag_path in ["tags", "metadata", "extra", "payload.properties"] {
        pairs.extend(leaves(&task.take(bag_path)));
    }
    for name in PAYLOAD_PROPERTIES {
        let value = task.take(&format!("payload.{name}"));
        if !value.is_null() {
            pairs.push((name.to_string(), value));
        }
    }

    let mut tags = Vec::new();
    for (name, value) in pairs {
        flatten_tag(source_key, task_id, &name, value, known, &mut tags);
    }
    tags
}

fn flatten_tag(
    source_key: &str,
    task_id: &str,
    name: &str,
    value: Value,
    known: &mut HashSet<String>,
    out: &mut Vec<Tag>,
) {
    match TagValue::classify(value) {
        TagValue::Missing => {}
        TagValue::Text(text) => push_tag(source_key, task_id, name, text, known, out),
        TagValue::Scalar(scalar) => {
            push_tag(source_key, task_id, name, scalar.to_string(), known, out)
        }
        TagValue::Singleton(inner) => match inner {
            Value::Object(map) => {
                for (leaf, leaf_value) in leaves(&Value::Object(map)) {
                    let child = format!("{name}.{leaf}");
                    flatten_tag(source_key, task_id, &child, leaf_value, known, out);
                }
            }
            Value::String(text) => push_tag(source_key, task_id, name, text, known, out),
            other => push_tag(source_key, task_id, name, other.to_string(), known, out),
        },
        TagValue::List(values) => push_tag(
            source_key,
            task_id,
            name,
            Value::Array(values).to_string(),
            known,
            out,
        ),
        TagValue::Nested(map) => {
            for (leaf, leaf_value) in leaves(&Value::Object(map)) {
                let child = format!("{name}.{leaf}");
                flatten_tag(source_key, task_id, &child, leaf_value, known, out);
            }
        }
    }
}

fn push_tag(
    source_key: &str,
    task_id: &str,
    name: &str,
    value: String,
    known: &mut HashSet<String>,
    out: &mut Vec<Tag>,
) {
    if !known.contains(name) {
        warn!(
            "unknown task tag {:?} while processing {} in {}",
            name, task_id, source_key
        );
        known.insert(name.to_string());
    }
    out.push(Tag {
        name: name.to_string(),
        value,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tags_of(raw: Value) -> (Vec<Tag>, HashSet<String>) {
        let mut bag = FieldBag::new(raw);
        let mut known = default_known_tags();
        let tags = extract_tags("tc.0:1", "abc123", &mut bag, &mut known);
        (tags, known)
    }

    #[test]
    fn test_text_leaves_kept_verbatim() {
        let (tags, _) = tags_of(json!({"tags": {"build_props": {"branch": "try"}}}));
        assert_eq!(
            tags,
            vec![Tag {
                name: "build_props.branch".to_string(),
                value: "try".to_string()
            }]
        );
    }

    #[test]
    fn test_scalar_and_list_values_json_encoded() {
        let (tags, _) = tags_of(json!({
            "extra": {"chunks": {"current": 2}},
            "metadata": {"owner": ["a@x", "b@x"]}
        }));
        let by_name = |n: &str| tags.iter().find(|t| t.name == n).unwrap().value.clone();
        assert_eq!(by_name("chunks.current"), "2");
        assert_eq!(by_name("owner"), r#"["a@x","b@x"]"#);
    }

    #[test]
    fn test_singleton_mapping_recursed_with_prefix() {
        let (tags, _) = tags_of(json!({
            "extra": {"funsize": {"partials": [{"branch": "mozilla-central"}]}}
        }));
        assert_eq!(
            tags,
            vec![Tag {
                name: "funsize.partials.branch".to_string(),
                value: "mozilla-central".to_string()
            }]
        );
    }

    #[test]
    fn test_platforms_comma_split() {
        let (tags, _) = tags_of(json!({
            "payload": {"properties": {"platforms": "linux64, win32"}}
        }));
        assert_eq!(tags[0].name, "platforms");
        assert_eq!(tags[0].value, r#"["linux64","win32"]"#);
    }

    #[test]
    fn test_unknown_tag_extends_vocabulary() {
        let (tags, known) = tags_of(json!({"tags": {"brand-new-tag": "v"}}));
        assert_eq!(tags.len(), 1);
        assert!(known.contains("brand-new-tag"));
    }

    #[test]
    fn test_payload_properties_consumed_as_tags() {
        let (tags, _) = tags_of(json!({"payload": {"build_number": 7}}));
        assert_eq!(
            tags,
            vec![Tag {
                name: "build_number".to_string(),
                value: "7".to_string()
            }]
        );
    }
}
