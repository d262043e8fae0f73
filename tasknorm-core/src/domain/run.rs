//! Test-run descriptor types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decomposed test suite identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,
    /// `name`, or `name-flavor` when a flavor is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
}

impl SuiteInfo {
    /// Composes the fullname from name and flavor
    pub fn with_fullname(name: Option<String>, flavor: Option<String>) -> Self {
        let fullname = match (&name, &flavor) {
            (None, _) => None,
            (Some(n), None) => Some(n.clone()),
            (Some(n), Some(f)) => Some(format!("{n}-{f}")),
        };
        Self {
            name,
            flavor,
            fullname,
        }
    }
}

/// Derived test-execution descriptor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunInfo {
    /// Legacy buildbot builder name, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Cleaned task metadata name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Treeherder machine descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<Value>,
    pub suite: SuiteInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<u32>,
    /// Run-type flags (`e10s`, `chunked`, ...), deduplicated and sorted
    #[serde(rename = "type", default, skip_serializing_if = "Vec::is_empty")]
    pub run_type: Vec<String>,
    /// Start time of the run this record describes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}
