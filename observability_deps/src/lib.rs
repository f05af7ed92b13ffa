//! This crate exists as a single point of control over the version of
//! `tracing` (and eventually its related crates) used across the workspace,
//! so all crates log through the same subscriber machinery.
//!
//! Library crates should depend on this crate and
//! `use observability_deps::tracing::{info, warn, ...}` rather than taking a
//! direct `tracing` dependency.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(missing_docs)]

pub use tracing;
