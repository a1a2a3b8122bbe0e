//! Tables: validated CRUD over one store table, with observers, a
//! version counter, and an optimistic overlay.
//!
//! # Write path
//!
//! Every mutating call runs the same state machine: validate → (overlay
//! active? buffer in overlay : write to store) → bump the version
//! counter → (silent? skip : notify observers). Observer notification
//! happens after the physical write, so an observer always sees a
//! mutation consistent with what is locally readable.
//!
//! The version counter is the only invalidation signal external
//! reactive readers observe; it increments exactly once per successful
//! mutating operation.

use crate::document::{revision_of, Document};
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::overlay::{Overlay, OverlayOp, OverlayOpKind};
use crate::revision::{stamp_revision, ContentHasher, Sha256Hasher};
use crate::schema::TableSchema;
use crate::store::{DocumentStore, TxnHandle};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// How a single write call behaves.
///
/// Replaces threading separate `silent`/`optimistic` booleans through
/// every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Persist, stamp a revision, notify observers.
    #[default]
    Normal,
    /// Persist without stamping or notifying — used when applying
    /// remote changes so the sync layer does not re-queue an echo.
    Silent,
    /// Commit replay of a visible (optimistic) transaction.
    OptimisticVisible,
    /// Commit replay of a hidden (buffered) transaction.
    OptimisticHidden,
}

impl WriteMode {
    /// Whether observer notification is suppressed.
    pub fn is_silent(&self) -> bool {
        matches!(self, WriteMode::Silent)
    }

    /// Whether this write replays an optimistic transaction.
    pub fn is_optimistic(&self) -> bool {
        matches!(self, WriteMode::OptimisticVisible | WriteMode::OptimisticHidden)
    }
}

/// Payload for [`TableObserver::on_add`].
#[derive(Debug, Clone)]
pub struct AddEvent {
    /// The stored document, including its assigned key and revision.
    pub doc: Document,
    /// Key the document was stored under.
    pub key: Key,
    /// Whether the write replayed an optimistic transaction.
    pub optimistic: bool,
}

/// Payload for [`TableObserver::on_update`].
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    /// The stored document.
    pub doc: Document,
    /// Key the document was stored under.
    pub key: Key,
    /// Revision of the previously stored document, if any.
    pub base_rev: Option<String>,
    /// Snapshot of the previously stored document, if any.
    pub base_doc: Option<Document>,
    /// Whether the write replayed an optimistic transaction.
    pub optimistic: bool,
}

/// Payload for [`TableObserver::on_delete`].
#[derive(Debug, Clone)]
pub struct DeleteEvent {
    /// Deleted key; `None` for a whole-table clear.
    pub key: Option<Key>,
    /// True when the whole table was cleared.
    pub all: bool,
    /// Revision of the deleted document, if it existed.
    pub base_rev: Option<String>,
    /// Snapshot of the deleted document, if it existed.
    pub base_doc: Option<Document>,
    /// Whether the write replayed an optimistic transaction.
    pub optimistic: bool,
}

/// Typed observer over a table's committed, non-silent mutations.
///
/// The closed event set replaces string-keyed hook lists. Observers
/// run synchronously after the physical write.
pub trait TableObserver: Send + Sync {
    /// A document was added.
    fn on_add(&self, event: &AddEvent);
    /// A document was put or updated.
    fn on_update(&self, event: &UpdateEvent);
    /// A document (or the whole table) was deleted.
    fn on_delete(&self, event: &DeleteEvent);
}

/// Document validator (the schema system is an external collaborator).
///
/// Validation runs before any store or overlay write; failure aborts
/// the operation with no partial state.
pub trait Validator: Send + Sync {
    /// Checks a document, returning a message on rejection.
    fn validate(&self, doc: &Document) -> Result<(), String>;
}

/// A local table of documents.
pub struct Table {
    name: String,
    schema: TableSchema,
    store: Arc<dyn DocumentStore>,
    hasher: Arc<dyn ContentHasher>,
    validator: RwLock<Option<Arc<dyn Validator>>>,
    observers: RwLock<Vec<Arc<dyn TableObserver>>>,
    overlay: Mutex<Overlay>,
    version: AtomicU64,
}

impl Table {
    /// Creates a table and registers its schema with the store.
    pub fn new(
        name: impl Into<String>,
        schema_str: &str,
        store: Arc<dyn DocumentStore>,
    ) -> CoreResult<Self> {
        let name = name.into();
        let schema = TableSchema::parse(schema_str)?;
        store.register_table(&name, &schema)?;
        Ok(Self {
            name,
            schema,
            store,
            hasher: Arc::new(Sha256Hasher),
            validator: RwLock::new(None),
            observers: RwLock::new(Vec::new()),
            overlay: Mutex::new(Overlay::default()),
            version: AtomicU64::new(0),
        })
    }

    /// Replaces the revision content hasher.
    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Table name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parsed schema.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Current version token. Incremented exactly once per successful
    /// mutating operation; reading it is the reactive contract.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Attaches a validation schema.
    pub fn set_validator(&self, validator: Arc<dyn Validator>) {
        *self.validator.write() = Some(validator);
    }

    /// Registers an observer for non-silent mutations.
    pub fn observe(&self, observer: Arc<dyn TableObserver>) {
        self.observers.write().push(observer);
    }

    fn validate(&self, doc: &Document) -> CoreResult<()> {
        if let Some(validator) = self.validator.read().as_ref() {
            validator
                .validate(doc)
                .map_err(|message| CoreError::validation(&self.name, message))?;
        }
        Ok(())
    }

    fn key_from_doc(&self, doc: &Document) -> Option<Key> {
        doc.get(&self.schema.primary_key).and_then(Key::from_value)
    }

    /// Adds a document.
    pub fn add(
        &self,
        mut doc: Document,
        key: Option<Key>,
        mode: WriteMode,
        txn: Option<&TxnHandle>,
    ) -> CoreResult<Key> {
        self.validate(&doc)?;

        {
            let mut overlay = self.overlay.lock();
            if overlay.active {
                let key = key
                    .or_else(|| self.key_from_doc(&doc))
                    .unwrap_or_else(|| overlay.fresh_temp_key());
                overlay.record(
                    key.clone(),
                    OverlayOp {
                        kind: OverlayOpKind::Add,
                        value: Some(doc),
                    },
                );
                let visible = overlay.visible;
                drop(overlay);
                if visible {
                    self.bump_version();
                }
                return Ok(key);
            }
        }

        if !mode.is_silent() {
            stamp_revision(&mut doc, None, self.hasher.as_ref());
        }
        let key = self.store.put(&self.name, key.as_ref(), doc.clone(), txn)?;
        doc.insert(self.schema.primary_key.clone(), key.to_value()?);
        self.bump_version();

        if !mode.is_silent() {
            let event = AddEvent {
                doc,
                key: key.clone(),
                optimistic: mode.is_optimistic(),
            };
            for observer in self.observers.read().iter() {
                observer.on_add(&event);
            }
        }
        Ok(key)
    }

    /// Puts (upserts) a document.
    ///
    /// Captures `base_rev`/`base_doc` from the document currently
    /// stored under the key before overwriting; unless silent, the new
    /// document is stamped with a revision chained from that base.
    pub fn put(
        &self,
        mut doc: Document,
        key: Option<Key>,
        mode: WriteMode,
        txn: Option<&TxnHandle>,
    ) -> CoreResult<Key> {
        self.validate(&doc)?;

        {
            let mut overlay = self.overlay.lock();
            if overlay.active {
                let key = key
                    .or_else(|| self.key_from_doc(&doc))
                    .unwrap_or_else(|| overlay.fresh_temp_key());
                overlay.record(
                    key.clone(),
                    OverlayOp {
                        kind: OverlayOpKind::Put,
                        value: Some(doc),
                    },
                );
                let visible = overlay.visible;
                drop(overlay);
                if visible {
                    self.bump_version();
                }
                return Ok(key);
            }
        }

        let target = key.clone().or_else(|| self.key_from_doc(&doc));
        let base_doc = match &target {
            Some(k) => self.store.get(&self.name, k, txn)?,
            None => None,
        };
        let base_rev = base_doc
            .as_ref()
            .and_then(|d| revision_of(d).map(str::to_string));

        if !mode.is_silent() {
            stamp_revision(&mut doc, base_rev.as_deref(), self.hasher.as_ref());
        }

        let stored_key = self.store.put(&self.name, key.as_ref(), doc.clone(), txn)?;
        doc.insert(self.schema.primary_key.clone(), stored_key.to_value()?);
        self.bump_version();

        if !mode.is_silent() {
            let event = UpdateEvent {
                doc,
                key: stored_key.clone(),
                base_rev,
                base_doc,
                optimistic: mode.is_optimistic(),
            };
            for observer in self.observers.read().iter() {
                observer.on_update(&event);
            }
        }
        Ok(stored_key)
    }

    /// Reads a document, reflecting a visible overlay.
    pub fn get(&self, key: &Key, txn: Option<&TxnHandle>) -> CoreResult<Option<Document>> {
        {
            let overlay = self.overlay.lock();
            if overlay.active && overlay.visible {
                if let Some(op) = overlay.entry(key) {
                    return Ok(match op.kind {
                        OverlayOpKind::Delete => None,
                        OverlayOpKind::Add | OverlayOpKind::Put => op.value.clone(),
                    });
                }
            }
        }
        if key.is_temp() {
            return Ok(None);
        }
        self.store.get(&self.name, key, txn)
    }

    /// Deletes a document by key.
    pub fn delete(
        &self,
        key: &Key,
        mode: WriteMode,
        txn: Option<&TxnHandle>,
    ) -> CoreResult<()> {
        {
            let mut overlay = self.overlay.lock();
            if overlay.active {
                overlay.record(
                    key.clone(),
                    OverlayOp {
                        kind: OverlayOpKind::Delete,
                        value: None,
                    },
                );
                let visible = overlay.visible;
                drop(overlay);
                if visible {
                    self.bump_version();
                }
                return Ok(());
            }
        }

        let base_doc = self.store.get(&self.name, key, txn)?;
        let base_rev = base_doc
            .as_ref()
            .and_then(|d| revision_of(d).map(str::to_string));

        self.store.delete(&self.name, key, txn)?;
        self.bump_version();

        if !mode.is_silent() {
            let event = DeleteEvent {
                key: Some(key.clone()),
                all: false,
                base_rev,
                base_doc,
                optimistic: mode.is_optimistic(),
            };
            for observer in self.observers.read().iter() {
                observer.on_delete(&event);
            }
        }
        Ok(())
    }

    /// Merges `changes` into the document under `key`, upserting when
    /// the key is absent.
    pub fn update(
        &self,
        key: &Key,
        changes: Document,
        mode: WriteMode,
        txn: Option<&TxnHandle>,
    ) -> CoreResult<Key> {
        let merged = match self.get(key, txn)? {
            Some(mut existing) => {
                for (field, value) in changes {
                    existing.insert(field, value);
                }
                existing
            }
            None => changes,
        };
        self.put(merged, Some(key.clone()), mode, txn)
    }

    /// Applies a closure to the document under `key` and writes it
    /// back. Fails when the key is absent.
    pub fn update_with(
        &self,
        key: &Key,
        f: impl FnOnce(&mut Document),
        mode: WriteMode,
        txn: Option<&TxnHandle>,
    ) -> CoreResult<Key> {
        let mut doc = self
            .get(key, txn)?
            .ok_or_else(|| CoreError::KeyNotFound(self.name.clone()))?;
        f(&mut doc);
        self.put(doc, Some(key.clone()), mode, txn)
    }

    /// Removes every document in the table.
    pub fn clear(&self, mode: WriteMode, txn: Option<&TxnHandle>) -> CoreResult<()> {
        self.store.clear(&self.name, txn)?;
        self.bump_version();
        if !mode.is_silent() {
            let event = DeleteEvent {
                key: None,
                all: true,
                base_rev: None,
                base_doc: None,
                optimistic: mode.is_optimistic(),
            };
            for observer in self.observers.read().iter() {
                observer.on_delete(&event);
            }
        }
        Ok(())
    }

    /// Number of stored documents (overlay excluded).
    pub fn count(&self, txn: Option<&TxnHandle>) -> CoreResult<usize> {
        self.store.count(&self.name, txn)
    }

    /// Starts a transaction on this table.
    ///
    /// `visible: true` merges the buffer into reads before commit
    /// (optimistic UI); `false` hides it until commit. The returned
    /// guard rolls back on drop unless [`Transaction::commit`] ran.
    /// One transaction per table at a time.
    pub fn begin(&self, visible: bool) -> CoreResult<Transaction<'_>> {
        let mut overlay = self.overlay.lock();
        if overlay.active {
            return Err(CoreError::TransactionActive(self.name.clone()));
        }
        overlay.activate(visible);
        Ok(Transaction {
            table: self,
            visible,
            done: false,
        })
    }

    /// Snapshot of the overlay buffer, if a transaction is active.
    pub(crate) fn overlay_snapshot(&self) -> Option<(Vec<(Key, OverlayOp)>, bool)> {
        let overlay = self.overlay.lock();
        if overlay.active {
            Some((overlay.snapshot(), overlay.visible))
        } else {
            None
        }
    }

    fn commit_overlay(&self, visible: bool) -> CoreResult<()> {
        let entries = {
            let mut overlay = self.overlay.lock();
            // Deactivate before replay so the writes below reach the
            // store instead of re-entering the buffer.
            overlay.active = false;
            overlay.snapshot()
        };

        let mode = if visible {
            WriteMode::OptimisticVisible
        } else {
            WriteMode::OptimisticHidden
        };

        let pk = self.schema.primary_key.clone();
        for (key, op) in &entries {
            let result = match op.kind {
                OverlayOpKind::Add | OverlayOpKind::Put => {
                    let mut value = op.value.clone().unwrap_or_default();
                    let replay_key = if key.is_temp() {
                        // Strip the temp key so the store assigns the
                        // real one.
                        value.remove(&pk);
                        None
                    } else {
                        Some(key.clone())
                    };
                    let outcome = if op.kind == OverlayOpKind::Add {
                        self.add(value, replay_key, mode, None)
                    } else {
                        self.put(value, replay_key, mode, None)
                    };
                    outcome.map(|_| ())
                }
                OverlayOpKind::Delete if key.is_temp() => Ok(()),
                OverlayOpKind::Delete => self.delete(key, mode, None),
            };

            if let Err(e) = result {
                // Re-enable the overlay so optimistic state stays
                // visible and the caller can react to the failure.
                self.overlay.lock().active = true;
                return Err(e);
            }
        }

        self.overlay.lock().discard();
        Ok(())
    }

    fn rollback_overlay(&self) {
        let was_visible = self.overlay.lock().discard();
        if was_visible {
            self.bump_version();
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}

/// RAII transaction guard for a table.
pub struct Transaction<'a> {
    table: &'a Table,
    visible: bool,
    done: bool,
}

impl Transaction<'_> {
    /// Buffers an add.
    pub fn add(&self, doc: Document, key: Option<Key>) -> CoreResult<Key> {
        self.table.add(doc, key, WriteMode::Normal, None)
    }

    /// Buffers a put.
    pub fn put(&self, doc: Document, key: Option<Key>) -> CoreResult<Key> {
        self.table.put(doc, key, WriteMode::Normal, None)
    }

    /// Buffers a delete.
    pub fn delete(&self, key: &Key) -> CoreResult<()> {
        self.table.delete(key, WriteMode::Normal, None)
    }

    /// Replays the buffer as real writes in insertion order.
    ///
    /// On a mid-replay failure the overlay is re-enabled (optimistic
    /// state stays visible) and the error propagates.
    pub fn commit(mut self) -> CoreResult<()> {
        self.done = true;
        self.table.commit_overlay(self.visible)
    }

    /// Discards the buffer.
    pub fn rollback(mut self) {
        self.done = true;
        self.table.rollback_overlay();
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.table.rollback_overlay();
        }
    }
}
