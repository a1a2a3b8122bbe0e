//! Durable, coalescing queue of pending local writes.
//!
//! The queue is itself a system table (`_sys_sync_queue`) on the same
//! store as user data, so pending writes survive restarts and inherit
//! the store's single-writer-per-operation semantics. Entries are
//! written through the store directly, never through a [`Table`], so
//! they carry no revisions and trigger no observers.
//!
//! # Coalescing
//!
//! One entry per (table, key). A later write to the same key
//! overwrites the entry's op, value, and timestamp but preserves the
//! original `base_rev`/`base_doc`: those describe the document as it
//! stood before the first unpushed write, the ancestor a 3-way merge
//! resolves from.

use crate::error::SyncResult;
use docsync_core::{Document, DocumentStore, Key, ScanRange, TableSchema};
use docsync_protocol::{Mutation, MutationOp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// System table holding queued mutations.
pub const QUEUE_TABLE: &str = "_sys_sync_queue";

/// How an entry carries its document content.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueValue {
    /// The content captured at write time.
    Inline(Document),
    /// Resolved lazily from the live table at push time, so a burst of
    /// edits pushes only the final document.
    Deferred,
    /// No content; deletes carry none.
    Absent,
}

/// One queued mutation, as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// Store key of the queue row.
    pub entry_id: Key,
    /// The wire mutation (value absent when deferred).
    pub mutation: Mutation,
    /// Whether the value must be hydrated at push time.
    pub deferred: bool,
}

#[derive(Serialize, Deserialize)]
struct QueueRecord {
    mutation: Mutation,
    deferred: bool,
}

/// The offline queue.
pub struct OfflineQueue {
    store: Arc<dyn DocumentStore>,
    // Serializes enqueue's read-modify-write coalescing.
    write_lock: Mutex<()>,
}

impl OfflineQueue {
    /// Opens (and registers) the queue table on a store.
    pub fn new(store: Arc<dyn DocumentStore>) -> SyncResult<Self> {
        store.register_table(QUEUE_TABLE, &TableSchema::parse("++qid")?)?;
        Ok(Self {
            store,
            write_lock: Mutex::new(()),
        })
    }

    /// Records a local write, coalescing with any pending entry for
    /// the same (table, key).
    pub fn enqueue(
        &self,
        table: &str,
        key: &Key,
        op: MutationOp,
        value: QueueValue,
        base_rev: Option<String>,
        base_doc: Option<Document>,
    ) -> SyncResult<()> {
        let _guard = self.write_lock.lock();

        let key_value = key.to_value()?;
        let (deferred, value) = match value {
            QueueValue::Inline(doc) => (false, Some(doc)),
            QueueValue::Deferred => (true, None),
            QueueValue::Absent => (false, None),
        };

        let existing = self.find(table, &key_value)?;
        let record = match existing {
            Some((entry_id, mut entry)) => {
                entry.mutation.op = op;
                entry.mutation.value = value;
                entry.mutation.timestamp = docsync_core::now_millis();
                entry.deferred = deferred;
                // base_rev/base_doc deliberately untouched.
                (Some(entry_id), entry)
            }
            None => {
                let mut mutation = Mutation::new(table, op, key_value);
                mutation.value = value;
                mutation.base_rev = base_rev;
                mutation.base_doc = base_doc;
                (
                    None,
                    QueueEntry {
                        entry_id: Key::Int(0), // assigned by the store
                        mutation,
                        deferred,
                    },
                )
            }
        };

        let (entry_id, entry) = record;
        let doc = encode(&entry)?;
        self.store
            .put(QUEUE_TABLE, entry_id.as_ref(), doc, None)?;
        Ok(())
    }

    /// Oldest pending entries, up to `limit`.
    ///
    /// Coalesced entries keep their original queue position.
    pub fn peek(&self, limit: usize) -> SyncResult<Vec<QueueEntry>> {
        let rows = self.store.scan(
            QUEUE_TABLE,
            None,
            &ScanRange::All,
            docsync_core::Direction::Forward,
            0,
            Some(limit),
            None,
        )?;
        rows.iter().map(decode).collect()
    }

    /// Removes entries by queue row key.
    pub fn remove(&self, entry_ids: &[Key]) -> SyncResult<()> {
        for entry_id in entry_ids {
            self.store.delete(QUEUE_TABLE, entry_id, None)?;
        }
        Ok(())
    }

    /// Number of pending entries.
    pub fn count(&self) -> SyncResult<usize> {
        Ok(self.store.count(QUEUE_TABLE, None)?)
    }

    /// Snapshot of the (table, key) pairs with pending writes.
    pub fn dirty_set(&self) -> SyncResult<HashSet<(String, Key)>> {
        let rows = self.store.scan(
            QUEUE_TABLE,
            None,
            &ScanRange::All,
            docsync_core::Direction::Forward,
            0,
            None,
            None,
        )?;
        let mut dirty = HashSet::new();
        for row in &rows {
            let entry = decode(row)?;
            if let Some(key) = Key::from_value(&entry.mutation.key) {
                dirty.insert((entry.mutation.table.clone(), key));
            }
        }
        Ok(dirty)
    }

    /// The queued base snapshot for a key, if a pending entry exists.
    pub fn base_for(&self, table: &str, key: &Key) -> SyncResult<Option<Document>> {
        let key_value = key.to_value()?;
        Ok(self
            .find(table, &key_value)?
            .and_then(|(_, entry)| entry.mutation.base_doc))
    }

    fn find(&self, table: &str, key_value: &Value) -> SyncResult<Option<(Key, QueueEntry)>> {
        let rows = self.store.scan(
            QUEUE_TABLE,
            None,
            &ScanRange::All,
            docsync_core::Direction::Forward,
            0,
            None,
            None,
        )?;
        for row in &rows {
            let entry = decode(row)?;
            if entry.mutation.table == table && entry.mutation.key == *key_value {
                return Ok(Some((entry.entry_id.clone(), entry)));
            }
        }
        Ok(None)
    }
}

fn encode(entry: &QueueEntry) -> SyncResult<Document> {
    let record = QueueRecord {
        mutation: entry.mutation.clone(),
        deferred: entry.deferred,
    };
    match serde_json::to_value(&record)? {
        Value::Object(map) => Ok(map),
        _ => unreachable!("a struct serializes to an object"),
    }
}

fn decode(row: &Document) -> SyncResult<QueueEntry> {
    let entry_id = row
        .get("qid")
        .and_then(Key::from_value)
        .unwrap_or(Key::Int(0));
    let record: QueueRecord = serde_json::from_value(Value::Object(row.clone()))?;
    Ok(QueueEntry {
        entry_id,
        mutation: record.mutation,
        deferred: record.deferred,
    })
}
