//! # DocSync Core
//!
//! Local document database layer for DocSync.
//!
//! This crate provides:
//! - Schema-declared tables of JSON documents over a pluggable store
//! - CouchDB-style revision stamping with a pluggable content hasher
//! - Typed observers over table mutations
//! - Optimistic write overlay with RAII transactions
//! - Query builder with native, narrowed, and in-memory execution
//!
//! ## Key Invariants
//!
//! - A table's version counter increments exactly once per successful
//!   mutating operation
//! - Validation runs before any write; failure leaves no partial state
//! - Revisions are deterministic over non-underscore document fields
//! - Observers fire after the physical write, never for silent writes
//! - Temp keys never leave the process

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod db;
mod document;
mod error;
mod key;
mod overlay;
mod query;
mod revision;
mod schema;
mod store;
mod table;

pub use db::Database;
pub use document::{
    cmp_values, last_modified_of, now_millis, revision_of, Document, LAST_MODIFIED_FIELD,
    REV_FIELD,
};
pub use error::{CoreError, CoreResult};
pub use key::Key;
pub use overlay::{OverlayOp, OverlayOpKind};
pub use query::{Query, WhereClause};
pub use revision::{
    compute_revision, generation_of, stamp_revision, ContentHasher, Sha256Hasher,
};
pub use schema::{IndexSpec, TableSchema};
pub use store::{Direction, DocumentStore, MemoryStore, ScanRange, TxnHandle};
pub use table::{
    AddEvent, DeleteEvent, Table, TableObserver, Transaction, UpdateEvent, Validator, WriteMode,
};
