//! Queued local-write records.

use docsync_core::{now_millis, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The kind of local write a mutation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOp {
    /// Insert of a new document.
    Add,
    /// Full overwrite of a document.
    Put,
    /// Deletion of a document.
    Delete,
}

/// One pending local write, as it travels to the server.
///
/// `base_rev` and `base_doc` are the revision and snapshot of the
/// document as it stood before the *first* queued write to this key;
/// coalescing later writes must preserve them, they are the common
/// ancestor a 3-way merge resolves from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Unique mutation id (UUID v4).
    pub id: String,
    /// Table the write targets.
    pub table: String,
    /// Write kind.
    pub op: MutationOp,
    /// Primary key as a JSON value.
    pub key: Value,
    /// New document content; absent for deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Document>,
    /// Revision of the document before the first queued write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_rev: Option<String>,
    /// Snapshot of the document before the first queued write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_doc: Option<Document>,
    /// Epoch milliseconds when the write happened.
    pub timestamp: f64,
}

impl Mutation {
    /// Creates a mutation with a fresh id and the current timestamp.
    pub fn new(table: impl Into<String>, op: MutationOp, key: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            table: table.into(),
            op,
            key,
            value: None,
            base_rev: None,
            base_doc: None,
            timestamp: now_millis(),
        }
    }

    /// Sets the document content.
    pub fn with_value(mut self, value: Document) -> Self {
        self.value = Some(value);
        self
    }

    /// Sets the pre-write base revision and snapshot.
    pub fn with_base(mut self, base_rev: Option<String>, base_doc: Option<Document>) -> Self {
        self.base_rev = base_rev;
        self.base_doc = base_doc;
        self
    }
}
