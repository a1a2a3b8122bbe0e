//! # DocSync Protocol
//!
//! Sync protocol types and JSON wire codecs for DocSync.
//!
//! This crate provides:
//! - `Mutation` for queued local writes
//! - Push and pull messages (`PushRequest`, `PushResponse`,
//!   `PullResponse`)
//! - `Conflict` for concurrent-edit records
//!
//! This is a pure protocol crate with no I/O operations. The wire
//! format is JSON: optional fields are omitted when absent, unknown
//! fields are ignored on decode.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod messages;
mod mutation;

pub use conflict::Conflict;
pub use messages::{ChangeItem, PullResponse, PushRequest, PushResponse, Receipt};
pub use mutation::{Mutation, MutationOp};
