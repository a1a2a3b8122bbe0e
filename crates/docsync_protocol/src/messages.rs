//! Push and pull wire messages.

use crate::mutation::Mutation;
use docsync_core::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST <upstream>/push`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    /// Pending mutations, oldest first.
    pub mutations: Vec<Mutation>,
    /// Identifies the pushing replica.
    pub client_id: String,
}

/// Server acknowledgement of one accepted mutation.
///
/// Keys without a receipt stay queued for the next push; delivery is
/// at-least-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Primary key the server accepted a write for.
    pub key: Value,
}

/// Body of the push response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    /// Acknowledged keys.
    pub sync_receipts: Vec<Receipt>,
}

/// One remote change in a pull batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeItem {
    /// Table the change targets.
    pub table: String,
    /// Primary key as a JSON value.
    pub key: Value,
    /// New document content; absent for deletions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Document>,
    /// True when the document was deleted remotely.
    #[serde(default)]
    pub deleted: bool,
    /// Remote revision; when absent the applier stamps one.
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
}

/// Body of `GET <upstream>/pull?checkpoint=<cursor>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    /// Remote changes since the requested checkpoint.
    pub documents: Vec<ChangeItem>,
    /// Opaque cursor to persist once the whole batch applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
}
