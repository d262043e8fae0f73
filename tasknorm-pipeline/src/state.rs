//! Process-wide pipeline state
//!
//! All the learning caches the batch loop accumulates over its lifetime:
//! raw tasks already seen (for duplicate detection), tag and property
//! vocabularies, missing-build alerts already raised, and the
//! collection-key table for build-type flags.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use tasknorm_core::domain::default_build_types;
use tasknorm_core::tags::default_known_tags;

/// The raw material of one processed line, kept for duplicate comparison
#[derive(Debug, Clone)]
pub struct SeenTask {
    /// Leftover pulse message after normalization, projected
    pub message: Value,
    /// Leftover task definition after normalization, projected
    pub task: Value,
    /// The artifact listing, projected
    pub artifacts: Value,
}

/// Paths cleared before comparing two sightings of the same task.
///
/// Runs, run ids and artifact bodies legitimately differ between pulse
/// deliveries of the same task; everything else must match.
#[derive(Debug, Clone)]
pub struct EqualityProjection {
    cleared: Vec<String>,
}

impl Default for EqualityProjection {
    fn default() -> Self {
        Self {
            cleared: ["_meta", "runs", "runId", "artifact"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl EqualityProjection {
    /// Removes the volatile paths from `value`, recursively
    pub fn apply(&self, value: &mut Value) {
        self.apply_inner(value);
    }

    fn apply_inner(&self, value: &mut Value) {
        match value {
            Value::Object(map) => {
                for path in &self.cleared {
                    map.remove(path);
                }
                for child in map.values_mut() {
                    self.apply_inner(child);
                }
            }
            Value::Array(values) => {
                for child in values {
                    self.apply_inner(child);
                }
            }
            _ => {}
        }
    }
}

/// Mutable caches shared across every line of every batch in the process
#[derive(Debug)]
pub struct PipelineState {
    /// Raw sightings by task id, for exact-duplicate detection
    pub seen_tasks: HashMap<String, SeenTask>,
    /// Leftover property paths already reported
    pub seen_properties: HashSet<String>,
    /// Tag-name vocabulary, extended whenever an unknown name warns
    pub known_tags: HashSet<String>,
    /// Test tasks whose build record was already reported missing
    pub missing_builds: HashSet<String>,
    /// Treeherder collection key to build-type flags
    pub build_types: HashMap<String, Vec<String>>,
    /// Volatile-path projection used for duplicate comparison
    pub projection: EqualityProjection,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            seen_tasks: HashMap::new(),
            seen_properties: HashSet::new(),
            known_tags: default_known_tags(),
            missing_builds: HashSet::new(),
            build_types: default_build_types(),
            projection: EqualityProjection::default(),
        }
    }
}

impl PipelineState {
    pub fn new() -> Self {
        Self::default()
    }
}
