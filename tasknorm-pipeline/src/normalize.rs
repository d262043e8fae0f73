//! Raw task normalization
//!
//! Turns the merged pulse message and task definition into the typed
//! document sections, consuming every field it understands out of the
//! bags. Whatever neither this module nor the build/tag passes consumed
//! is reported once per process as an unhandled property.

use std::collections::HashSet;

use serde_json::{Map, Value, json};
use tracing::warn;

use crate::build::set_build_info;
use crate::error::Result;
use crate::resources::Resources;
use crate::state::PipelineState;
use tasknorm_core::bag::{FieldBag, non_null};
use tasknorm_core::coalesce::Coalescer;
use tasknorm_core::domain::{
    Beetmove, Group, Manifest, NormalizedTask, Provisioner, Retries, RunInfo, Scheduler, Signing,
    TaskRun, TaskSection, Worker,
};
use tasknorm_core::error::NormalizeError;
use tasknorm_core::suite::{SuiteInput, parse_suite};
use tasknorm_core::tags::extract_tags;

/// Derives a normalized document from one pulse message and its task
/// definition.
///
/// Both bags are consumed destructively; the caller keeps them for the
/// duplicate comparison and should expect only unhandled residue inside
/// afterwards.
pub async fn normalize_task(
    coalescer: &mut Coalescer,
    task_id: &str,
    message: &mut FieldBag,
    task: &mut FieldBag,
    resources: &Resources,
    state: &mut PipelineState,
) -> Result<NormalizedTask> {
    // The status record fills whatever the definition is missing; the
    // definition always wins where both speak.
    task.merge_missing(message.take("status"));
    task.take("taskId");

    let mut section = TaskSection {
        id: task_id.to_string(),
        created: task.take_date("created"),
        deadline: task.take_date("deadline"),
        expires: task.take_date("expires"),
        dependencies: task.take_string_list("dependencies"),
        max_run_time: task.take_i64("payload.maxRunTime"),
        ..Default::default()
    };

    // Raw worker environment, read by the build pass before conversion
    let env = task.take("payload.env");
    section.routes = task.take_string_list("routes");

    section.features = parse_features(task.take("payload.features"))?;
    section.capabilities = non_null(task.take("payload.capabilities"));
    section.image = match task.take("payload.image") {
        Value::Null => None,
        Value::String(path) => Some(json!({ "path": path })),
        other => Some(other),
    };
    section.cache = object_to_pairs(task.take("payload.cache"), "path");
    section.requires = task.take_str("requires");
    section.priority = task.take_str("priority");
    section.provisioner = task.take_str("provisionerId").map(|id| Provisioner { id: Some(id) });
    let retries_remaining = task.take_i64("retriesLeft");
    let retries_total = task.take_i64("retries");
    if retries_remaining.is_some() || retries_total.is_some() {
        section.retries = Some(Retries {
            remaining: retries_remaining,
            total: retries_total,
        });
    }

    section.runs = match task.take("runs") {
        Value::Array(runs) => runs.into_iter().map(parse_run).collect(),
        _ => Vec::new(),
    };
    let run_id = message
        .take_u32("runId")
        .or_else(|| section.runs.len().checked_sub(1).map(|n| n as u32));
    section.run = run_id.and_then(|id| {
        section
            .runs
            .iter()
            .find(|r| r.id == Some(id))
            .or_else(|| section.runs.last())
            .cloned()
    });

    section.reboot = non_null(task.take("payload.reboot"));
    section.scheduler = task.take_str("schedulerId").map(|id| Scheduler { id: Some(id) });
    section.scopes = task.take_string_list("scopes");
    section.state = task.take_str("state");
    section.group = task.take_str("taskGroupId").map(|id| Group { id: Some(id) });
    section.version = non_null(message.take("version"));

    let worker_group = message.take_str("workerGroup");
    let worker_id = message.take_str("workerId");
    // Load-generator tasks carry unique per-task worker types; collapse
    // them so they aggregate
    let worker_kind = task.take_str("workerType").map(|w| {
        if w.starts_with("dummy-type") {
            "dummy-type".to_string()
        } else {
            w
        }
    });
    if worker_group.is_some() || worker_id.is_some() || worker_kind.is_some() {
        section.worker = Some(Worker {
            group: worker_group,
            id: worker_id,
            kind: worker_kind,
        });
    }

    let parent_id = coalescer.pick(
        "task.parent.id",
        vec![
            task.take_str("parent_task_id"),
            task.take_str("payload.properties.parent_task_id"),
        ],
    )?;
    let parent_url = task.take_str("payload.parent_task_artifacts_url");
    if parent_id.is_some() || parent_url.is_some() {
        section.parent = Some(tasknorm_core::domain::Parent {
            id: parent_id,
            artifacts_url: parent_url,
        });
    }

    let manifest_task_id = task.take_str("payload.taskid_of_manifest");
    let manifest_update = non_null(task.take("payload.update_manifest"));
    if manifest_task_id.is_some() || manifest_update.is_some() {
        section.manifest = Some(Manifest {
            task_id: manifest_task_id,
            update: manifest_update,
        });
    }
    let beetmove_task_id = coalescer.pick(
        "task.beetmove.task_id",
        vec![
            task.take_str("payload.taskid_to_beetmove"),
            task.take_str("payload.properties.taskid_to_beetmove"),
        ],
    )?;
    if beetmove_task_id.is_some() {
        section.beetmove = Some(Beetmove {
            task_id: beetmove_task_id,
        });
    }
    section.signing = signing_cert(task.take("payload.signing_cert")).map(|cert| Signing {
        cert: Some(cert),
    });
    section.mounts = non_null(task.take("payload.mounts"));

    // Consumed without a destination: routing junk nothing downstream reads
    task.take("payload.routes");
    task.take("payload.log");
    task.take("payload.upstreamArtifacts");

    section.artifacts = parse_artifact_declarations(task.take("payload.artifacts"))?;
    section.command = parse_command(non_null(task.take("payload.command")).unwrap_or_else(|| task.take("payload.cmd")));

    let mut doc = NormalizedTask {
        task: section,
        ..Default::default()
    };

    set_build_info(coalescer, task_id, task, &env, resources, state, &mut doc).await?;

    // Run identity: the composite metadata name reconciled against its
    // side-channel encodings
    let (suite_name, flavor) = match task.take("extra.suite") {
        Value::String(name) => (Some(name), None),
        Value::Object(mut map) => (
            map.remove("name").and_then(|v| v.as_str().map(str::to_string)),
            map.remove("flavor").and_then(|v| v.as_str().map(str::to_string)),
        ),
        _ => (None, None),
    };
    let parsed = parse_suite(
        coalescer,
        SuiteInput {
            metadata_name: task.take_str("metadata.name"),
            suite_name,
            flavor,
            explicit_chunk: task.take_u32("extra.chunks.current"),
            legacy_chunk: task.take_u32("payload.properties.THIS_CHUNK"),
            test_type_tag: task.take_str("tags.test-type"),
        },
    )?;
    doc.run = Some(RunInfo {
        key: task.take_str("payload.buildername"),
        name: parsed.name,
        machine: take_treeherder_machine(&mut doc),
        suite: parsed.suite,
        chunk: parsed.chunk,
        run_type: parsed.run_type,
        timestamp: doc.task.run.as_ref().and_then(|r| r.start_time),
    });

    doc.task.env = object_to_pairs(env, "value");
    doc.task.tags = extract_tags(coalescer.source_key(), task_id, task, &mut state.known_tags);

    report_leftovers(coalescer.source_key(), task_id, &[message, task], &mut state.seen_properties);
    Ok(doc)
}

/// One entry of the queue's run history
fn parse_run(value: Value) -> TaskRun {
    let mut bag = FieldBag::new(value);
    let start_time = bag.take_date("started");
    let end_time = bag.take_date("resolved");
    let duration = match (start_time, end_time) {
        (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
        _ => None,
    };

    let group = bag.take_str("workerGroup");
    let id = bag.take_str("workerId");
    let worker = if group.is_some() || id.is_some() {
        Some(tasknorm_core::domain::RunWorker { group, id })
    } else {
        None
    };

    TaskRun {
        id: bag.take_u32("runId"),
        reason_created: bag.take_str("reasonCreated"),
        scheduled: bag.take_date("scheduled"),
        start_time,
        end_time,
        duration,
        status: bag.take_str("reasonResolved"),
        state: bag.take_str("state"),
        worker,
    }
}

/// Feature switches arrive as a `{name: bool}` map
fn parse_features(value: Value) -> Result<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => map
            .into_iter()
            .map(|(name, enabled)| match enabled {
                Value::Bool(true) => Ok(name),
                Value::Bool(false) => Ok(format!("!{name}")),
                other => Err(NormalizeError::UnexpectedFormat(format!(
                    "feature {name} has non-boolean value {other}"
                ))
                .into()),
            })
            .collect(),
        other => Err(NormalizeError::UnexpectedFormat(format!(
            "payload.features is not a mapping: {other}"
        ))
        .into()),
    }
}

/// Converts a `{name: value}` mapping into an ordered `{name, <key>}` array
fn object_to_pairs(value: Value, value_key: &str) -> Option<Value> {
    match value {
        Value::Object(map) if !map.is_empty() => Some(Value::Array(
            map.into_iter()
                .map(|(name, v)| {
                    let mut pair = Map::new();
                    pair.insert("name".to_string(), Value::String(name));
                    pair.insert(value_key.to_string(), v);
                    Value::Object(pair)
                })
                .collect(),
        )),
        _ => None,
    }
}

/// Declared artifacts come as either a list or a `{name: spec}` mapping;
/// either way every entry ends up with a `name`
fn parse_artifact_declarations(value: Value) -> Result<Option<Value>> {
    match value {
        Value::Null => Ok(None),
        Value::Array(mut items) => {
            for item in &mut items {
                ensure_artifact_name(item)?;
            }
            Ok(Some(Value::Array(items)))
        }
        Value::Object(map) => {
            let items = map
                .into_iter()
                .map(|(name, mut spec)| {
                    match spec.as_object_mut() {
                        Some(obj) => {
                            obj.insert("name".to_string(), Value::String(name));
                        }
                        None => spec = json!({ "name": name, "value": spec }),
                    }
                    spec
                })
                .collect();
            Ok(Some(Value::Array(items)))
        }
        other => Err(NormalizeError::UnexpectedFormat(format!(
            "payload.artifacts has unexpected shape: {other}"
        ))
        .into()),
    }
}

fn ensure_artifact_name(item: &mut Value) -> Result<()> {
    let Some(obj) = item.as_object_mut() else {
        return Err(NormalizeError::UnexpectedFormat(format!(
            "artifact declaration is not an object: {item}"
        ))
        .into());
    };
    if obj.get("name").and_then(Value::as_str).is_some() {
        return Ok(());
    }
    match obj.get("path").and_then(Value::as_str).map(str::to_string) {
        Some(path) => {
            obj.insert("name".to_string(), Value::String(path));
            Ok(())
        }
        None => Err(NormalizeError::UnnamedArtifact.into()),
    }
}

/// Signing certificates arrive as a scalar or as a list padded with nulls;
/// the first non-null entry is the certificate
fn signing_cert(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Array(entries) => entries.into_iter().find(|v| !v.is_null()),
        other => Some(other),
    }
}

/// Flattens `payload.command` (or `cmd`) into one quoted command line
fn parse_command(value: Value) -> Option<String> {
    fn collect(value: Value, out: &mut Vec<String>) {
        match value {
            Value::Null => {}
            Value::String(s) => out.push(s),
            Value::Array(items) => {
                for item in items {
                    collect(item, out);
                }
            }
            other => out.push(other.to_string()),
        }
    }

    let mut tokens = Vec::new();
    collect(value, &mut tokens);
    if tokens.is_empty() {
        return None;
    }
    Some(
        tokens
            .iter()
            .map(|t| Value::String(t.clone()).to_string())
            .collect::<Vec<_>>()
            .join(" "),
    )
}

/// Moves the `machine.`-prefixed treeherder annotations into their own
/// object for the run section
fn take_treeherder_machine(doc: &mut NormalizedTask) -> Option<Value> {
    let treeherder = doc.treeherder.as_mut()?;
    let keys: Vec<String> = treeherder
        .keys()
        .filter(|k| k.starts_with("machine."))
        .cloned()
        .collect();
    let mut machine = Map::new();
    for key in keys {
        if let Some(value) = treeherder.remove(&key) {
            machine.insert(key["machine.".len()..].to_string(), value);
        }
    }
    if treeherder.is_empty() {
        doc.treeherder = None;
    }
    if machine.is_empty() {
        None
    } else {
        Some(Value::Object(machine))
    }
}

/// Warns once per process about every leaf nobody consumed
fn report_leftovers(
    source_key: &str,
    task_id: &str,
    bags: &[&FieldBag],
    seen: &mut HashSet<String>,
) {
    for bag in bags {
        for path in bag.remaining_leaves() {
            if seen.insert(path.clone()) {
                warn!(
                    "unhandled property {:?} in task {} while processing {}",
                    path, task_id, source_key
                );
            }
        }
    }
}
