//! Concurrent-edit records.

use docsync_core::{now_millis, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A remote change colliding with an unpushed local write.
///
/// Created only when a pulled change targets a key with a pending
/// queue entry. Recorded to history before any resolution runs, so
/// the audit trail survives a resolution failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique conflict id (UUID v4).
    pub id: String,
    /// Table where the collision happened.
    pub table: String,
    /// Primary key as a JSON value.
    pub key: Value,
    /// The local document; absent when deleted locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_doc: Option<Document>,
    /// The remote document; absent when deleted remotely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_doc: Option<Document>,
    /// Local revision, if the local document carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_rev: Option<String>,
    /// Remote revision, if the server supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_rev: Option<String>,
    /// Epoch milliseconds when the conflict was detected.
    pub timestamp: f64,
}

impl Conflict {
    /// Creates a conflict record with a fresh id and the current
    /// timestamp.
    pub fn new(
        table: impl Into<String>,
        key: Value,
        local_doc: Option<Document>,
        remote_doc: Option<Document>,
        local_rev: Option<String>,
        remote_rev: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            table: table.into(),
            key,
            local_doc,
            remote_doc,
            local_rev,
            remote_rev,
            timestamp: now_millis(),
        }
    }

    /// True when the remote side deleted the document.
    pub fn remote_is_delete(&self) -> bool {
        self.remote_doc.is_none()
    }
}
