//! Build descriptor types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Derived build descriptor.
///
/// For a test task most of these fields start out empty and are filled in
/// by the build-task cross-reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// First 12 characters of `revision`, maintained by [`BuildInfo::set_revision`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision12: Option<String>,
    /// Build-type flags (`opt`, `debug`, `ccov`, ...), deduplicated and sorted
    #[serde(rename = "type", default, skip_serializing_if = "Vec::is_empty")]
    pub build_type: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Push date of the build revision, epoch seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
}

impl BuildInfo {
    /// Sets the revision and keeps `revision12` in sync
    pub fn set_revision(&mut self, revision: Option<String>) {
        self.revision12 = revision
            .as_ref()
            .map(|r| r.chars().take(12).collect());
        self.revision = revision;
    }

    /// Fills gaps from another build descriptor.
    ///
    /// Fields already set on `self` are preserved; the other record only
    /// contributes where this one has nothing.
    pub fn fill_missing_from(&mut self, other: &BuildInfo) {
        fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
            if slot.is_none() {
                *slot = value.clone();
            }
        }
        fill(&mut self.name, &other.name);
        fill(&mut self.product, &other.product);
        fill(&mut self.platform, &other.platform);
        fill(&mut self.url, &other.url);
        fill(&mut self.revision, &other.revision);
        fill(&mut self.revision12, &other.revision12);
        fill(&mut self.branch, &other.branch);
        fill(&mut self.channel, &other.channel);
        fill(&mut self.version, &other.version);
        fill(&mut self.date, &other.date);
        if self.build_type.is_empty() {
            self.build_type = other.build_type.clone();
        }
    }
}

/// Default mapping from treeherder collection keys to build-type flags.
///
/// Deliberately a runtime map, not an enum: new collection keys show up in
/// the wild and are handled with a warning, never a failure.
pub fn default_build_types() -> HashMap<String, Vec<String>> {
    let table: &[(&str, &[&str])] = &[
        ("arm-debug", &["debug", "arm"]),
        ("arm-opt", &["opt", "arm"]),
        ("asan", &["asan"]),
        ("ccov", &["ccov"]),
        ("debug", &["debug"]),
        ("fuzz", &["fuzz"]),
        ("gyp", &["gyp"]),
        ("gyp-asan", &["gyp", "asan"]),
        ("jsdcov", &["jsdcov"]),
        ("lsan", &["lsan"]),
        ("make", &["make"]),
        ("memleak", &["memleak"]),
        ("opt", &["opt"]),
        ("pgo", &["pgo"]),
        ("nostylo", &["nostylo"]),
        ("ubsan", &["ubsan"]),
    ];
    table
        .iter()
        .map(|(key, flags)| {
            (
                key.to_string(),
                flags.iter().map(|f| f.to_string()).collect(),
            )
        })
        .collect()
}
