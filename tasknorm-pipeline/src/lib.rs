//! Tasknorm Pipeline
//!
//! The normalization orchestrator: takes one batch of inbound pulse
//! lines and turns each into a canonical normalized-task document.
//!
//! Architecture:
//! - Configuration: environment-driven settings for the upstream services
//! - State: process-wide learning caches (seen tasks, known tags,
//!   missing builds, seen property paths)
//! - Normalize: raw task definition to typed document sections
//! - Build: build-descriptor derivation and repo enrichment
//! - Crossref: test-to-build record cross-referencing via the index
//! - Process: the per-line state machine and batch loop
//!
//! Each line moves through fetch, status check, normalization,
//! enrichment and emission; a `TryAgainLater` outcome aborts the whole
//! batch so the external scheduler can retry it wholesale.

pub mod build;
pub mod config;
pub mod crossref;
pub mod error;
pub mod normalize;
pub mod process;
pub mod resources;
pub mod state;
