//! Durable state owned by one worker: the per-partition flat files holding
//! account and client rows, and the append-only journal of attempted
//! operations.
//!
//! Nothing here is cached in memory. Every read streams the current file and
//! every mutation rewrites it through a temp-file-then-rename cycle, so a
//! concurrent reader observes either the pre- or post-state of a write and
//! never a torn line.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]

pub mod store;
pub mod txn_log;

pub use store::PartitionStore;
pub use txn_log::{LogRecord, Outcome, TransactionLog};
