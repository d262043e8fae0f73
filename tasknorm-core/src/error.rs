//! Error types for normalization

use thiserror::Error;

/// Errors raised while deriving a normalized document from raw task data
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// Coalescing was attempted over an empty candidate list (caller bug)
    #[error("coalesce over `{field}` needs at least one candidate")]
    EmptyCoalesce {
        /// The logical field being coalesced
        field: String,
    },

    /// Raw data encoded a task feature in a shape we do not understand
    #[error("unexpected task format: {0}")]
    UnexpectedFormat(String),

    /// An artifact declaration carried neither a name nor a path
    #[error("expecting name, or path of artifact")]
    UnnamedArtifact,
}
