//! Core data types for the partitioned ledger worker, shared between the
//! worker node itself and anything that speaks its wire protocol.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

pub mod accounts;
pub mod operation;
pub mod partition;
pub mod worker_id;
