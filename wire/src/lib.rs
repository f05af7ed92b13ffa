//! The wire protocol spoken on every socket of the system: a 4-byte
//! big-endian length header followed by a UTF-8 JSON document.
//!
//! [`frame`] implements the framing itself; [`message`] the structured
//! messages exchanged during worker registration and task dispatch.
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]

pub mod frame;
pub mod message;

pub use frame::{read_message, write_message, Error};
