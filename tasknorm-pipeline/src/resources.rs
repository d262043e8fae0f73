//! Injected collaborators
//!
//! The batch loop only ever sees trait objects; production wiring and
//! test mocks both come through this struct.

use std::sync::Arc;

use tasknorm_client::traits::{
    LiveLogParser, RecordIndex, RecordSink, ResourceUsageParser, RevisionResolver, TaskQueue,
};

/// Everything external the pipeline needs, behind trait objects
#[derive(Clone)]
pub struct Resources {
    pub queue: Arc<dyn TaskQueue>,
    pub index: Arc<dyn RecordIndex>,
    pub hg: Arc<dyn RevisionResolver>,
    pub sink: Arc<dyn RecordSink>,
    /// Optional live-log structuring; `None` leaves `action` unset
    pub log_parser: Option<Arc<dyn LiveLogParser>>,
    /// Optional resource-usage parsing, always best effort
    pub usage_parser: Option<Arc<dyn ResourceUsageParser>>,
}
