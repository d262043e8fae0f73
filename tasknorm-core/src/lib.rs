//! Tasknorm Core
//!
//! Core types and transforms for the task telemetry normalization pipeline.
//!
//! This crate contains:
//! - Domain types: the canonical normalized-task document model
//! - Field bag: destructive dotted-path extraction over raw JSON
//! - Coalescer: first-non-null selection with conflict detection
//! - Tag extraction: flattening of scattered property bags into tags
//! - Suite parsing: decomposition of composite test identifier strings
//!
//! Everything here is pure; all I/O lives in `tasknorm-client` and
//! `tasknorm-pipeline`.

pub mod bag;
pub mod coalesce;
pub mod domain;
pub mod error;
pub mod suite;
pub mod tags;
