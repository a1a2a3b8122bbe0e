//! In-memory overlay for optimistic and buffered transactions.
//!
//! While a transaction is open on a table, writes land in the overlay
//! instead of the store. A *visible* overlay is merged into reads and
//! query results before commit (optimistic UI); a *hidden* overlay
//! buffers strictly until commit. The buffer lives only for the
//! duration of one transaction and is never persisted.

use crate::document::Document;
use crate::key::Key;

/// Kind of buffered mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayOpKind {
    /// Insert of a possibly un-keyed document.
    Add,
    /// Upsert of a keyed document.
    Put,
    /// Deletion by key.
    Delete,
}

/// A buffered mutation: one per key, latest wins.
#[derive(Debug, Clone)]
pub struct OverlayOp {
    /// What happened to the key.
    pub kind: OverlayOpKind,
    /// The buffered document (absent for deletes).
    pub value: Option<Document>,
}

/// Per-table overlay state.
///
/// Entries keep insertion order; a second mutation of the same key
/// replaces the entry in place so commit replay preserves the order
/// in which keys were first touched.
#[derive(Debug, Default)]
pub(crate) struct Overlay {
    entries: Vec<(Key, OverlayOp)>,
    pub(crate) active: bool,
    pub(crate) visible: bool,
    next_temp: u64,
}

impl Overlay {
    /// Activates the overlay for a new transaction.
    pub(crate) fn activate(&mut self, visible: bool) {
        self.active = true;
        self.visible = visible;
        self.entries.clear();
    }

    /// Allocates a fresh temporary key for an un-keyed add.
    pub(crate) fn fresh_temp_key(&mut self) -> Key {
        self.next_temp += 1;
        Key::Temp(self.next_temp)
    }

    /// Records a mutation, replacing any earlier entry for the key.
    pub(crate) fn record(&mut self, key: Key, op: OverlayOp) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = op;
        } else {
            self.entries.push((key, op));
        }
    }

    /// Looks up the buffered mutation for a key.
    pub(crate) fn entry(&self, key: &Key) -> Option<&OverlayOp> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, op)| op)
    }

    /// Clones the buffer for commit replay.
    pub(crate) fn snapshot(&self) -> Vec<(Key, OverlayOp)> {
        self.entries.clone()
    }

    /// Discards the buffer and deactivates.
    ///
    /// Returns whether the overlay was visible, so the caller can bump
    /// the table version once to clear optimistic state from readers.
    pub(crate) fn discard(&mut self) -> bool {
        let was_visible = self.visible;
        self.entries.clear();
        self.active = false;
        self.visible = false;
        was_visible
    }
}
