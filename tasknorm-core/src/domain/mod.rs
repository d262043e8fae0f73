//! Domain types
//!
//! The canonical normalized-task document model: one `NormalizedTask` per
//! inbound pulse line, assembled from fixed sections (task, run, build,
//! repo, treeherder, etl) plus optional enrichments.

pub mod build;
pub mod etl;
pub mod repo;
pub mod run;
pub mod task;

pub use build::{BuildInfo, default_build_types};
pub use etl::{EtlEnvelope, MachineMetadata};
pub use repo::{Branch, Changeset, Push, RepoInfo};
pub use run::{RunInfo, SuiteInfo};
pub use task::{
    Beetmove, Group, Manifest, NormalizedTask, Parent, Provisioner, Retries, RunWorker, Scheduler,
    Signing, Tag, TaskRun, TaskSection, Worker,
};
