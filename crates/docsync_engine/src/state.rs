//! Replication checkpoint and conflict audit log.
//!
//! Both live in system tables on the same store as user data, written
//! through the store directly (no revisions, no observers).

use crate::error::SyncResult;
use docsync_core::{Direction, Document, DocumentStore, Key, ScanRange, TableSchema};
use docsync_protocol::Conflict;
use serde_json::Value;
use std::sync::Arc;

/// System table holding the pull checkpoint.
pub const STATE_TABLE: &str = "_sys_sync_state";

/// System table holding the conflict audit log.
pub const CONFLICT_TABLE: &str = "_sys_conflict_log";

const CHECKPOINT_ROW: &str = "replication";

/// Persisted pull-side replication state.
///
/// The checkpoint is an opaque server cursor. It only ever advances
/// after a pull batch was applied in full, so a crash mid-batch
/// re-pulls the same changes (applies are idempotent).
pub struct ReplicationState {
    store: Arc<dyn DocumentStore>,
}

impl ReplicationState {
    /// Opens (and registers) the state table on a store.
    pub fn new(store: Arc<dyn DocumentStore>) -> SyncResult<Self> {
        store.register_table(STATE_TABLE, &TableSchema::parse("&id")?)?;
        Ok(Self { store })
    }

    /// The last fully applied checkpoint, if any.
    pub fn checkpoint(&self) -> SyncResult<Option<String>> {
        let row = self
            .store
            .get(STATE_TABLE, &Key::from(CHECKPOINT_ROW), None)?;
        Ok(row
            .and_then(|doc| doc.get("checkpoint").cloned())
            .and_then(|value| match value {
                Value::String(s) => Some(s),
                _ => None,
            }))
    }

    /// Persists a new checkpoint.
    pub fn set_checkpoint(&self, checkpoint: &str) -> SyncResult<()> {
        let mut doc = Document::new();
        doc.insert("id".into(), CHECKPOINT_ROW.into());
        doc.insert("checkpoint".into(), checkpoint.into());
        self.store
            .put(STATE_TABLE, Some(&Key::from(CHECKPOINT_ROW)), doc, None)?;
        Ok(())
    }
}

/// Append-only log of detected conflicts.
///
/// Every conflict is recorded before resolution runs, so the audit
/// trail survives a resolution failure.
pub struct ConflictHistory {
    store: Arc<dyn DocumentStore>,
}

impl ConflictHistory {
    /// Opens (and registers) the log table on a store.
    pub fn new(store: Arc<dyn DocumentStore>) -> SyncResult<Self> {
        store.register_table(CONFLICT_TABLE, &TableSchema::parse("++seq")?)?;
        Ok(Self { store })
    }

    /// Appends a conflict record.
    pub fn record(&self, conflict: &Conflict) -> SyncResult<()> {
        let doc = match serde_json::to_value(conflict)? {
            Value::Object(map) => map,
            _ => unreachable!("a struct serializes to an object"),
        };
        self.store.put(CONFLICT_TABLE, None, doc, None)?;
        Ok(())
    }

    /// The most recent conflicts, newest first.
    pub fn recent(&self, limit: usize) -> SyncResult<Vec<Conflict>> {
        let rows = self.store.scan(
            CONFLICT_TABLE,
            None,
            &ScanRange::All,
            Direction::Reverse,
            0,
            Some(limit),
            None,
        )?;
        rows.into_iter()
            .map(|row| Ok(serde_json::from_value(Value::Object(row))?))
            .collect()
    }

    /// Number of recorded conflicts.
    pub fn count(&self) -> SyncResult<usize> {
        Ok(self.store.count(CONFLICT_TABLE, None)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_core::MemoryStore;
    use serde_json::json;

    #[test]
    fn checkpoint_roundtrip() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let state = ReplicationState::new(store).unwrap();
        assert_eq!(state.checkpoint().unwrap(), None);

        state.set_checkpoint("cursor-17").unwrap();
        assert_eq!(state.checkpoint().unwrap().as_deref(), Some("cursor-17"));

        state.set_checkpoint("cursor-18").unwrap();
        assert_eq!(state.checkpoint().unwrap().as_deref(), Some("cursor-18"));
    }

    #[test]
    fn history_is_append_only_and_newest_first() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let history = ConflictHistory::new(store).unwrap();

        for i in 0..3 {
            let conflict = Conflict::new("users", json!(i), None, None, None, None);
            history.record(&conflict).unwrap();
        }

        assert_eq!(history.count().unwrap(), 3);
        let recent = history.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].key, json!(2));
        assert_eq!(recent[1].key, json!(1));
    }
}
