//! The sync manager: queue observers, debounced push, interval pull.
//!
//! One cooperative task drives everything. Local writes land in the
//! offline queue via table observers and schedule a debounced push
//! (any new write resets the quiet window). An interval timer runs a
//! full push + pull cycle. The loop sleeps until whichever deadline is
//! nearer and is woken early when a new deadline appears.
//!
//! Cycle errors never escape the loop. Gateway-class failures flip the
//! server-reachable flag; while online-but-unreachable the loop probes
//! with a single ping per cycle instead of pushing.

use crate::config::{StrategyFallback, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::queue::{OfflineQueue, QueueValue};
use crate::reachability::Reachability;
use crate::resolve::{resolve, ResolutionOutcome};
use crate::state::{ConflictHistory, ReplicationState};
use crate::transport::SyncTransport;
use docsync_core::{
    revision_of, stamp_revision, AddEvent, ContentHasher, DeleteEvent, Document, DocumentStore,
    Key, Sha256Hasher, Table, TableObserver, UpdateEvent, WriteMode, REV_FIELD,
};
use docsync_protocol::{ChangeItem, Conflict, Mutation, MutationOp, PushRequest};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Wake-up plumbing shared between observers and the loop.
pub(crate) struct SyncSignal {
    wake: Notify,
    debounce_deadline: Mutex<Option<Instant>>,
    debounce: Duration,
}

impl SyncSignal {
    fn new(debounce: Duration) -> Self {
        Self {
            wake: Notify::new(),
            debounce_deadline: Mutex::new(None),
            debounce,
        }
    }

    /// (Re)arms the debounce window and wakes the loop.
    pub(crate) fn schedule_push(&self) {
        *self.debounce_deadline.lock() = Some(Instant::now() + self.debounce);
        self.wake.notify_one();
    }

    /// Arms an immediate push.
    fn schedule_push_now(&self) {
        *self.debounce_deadline.lock() = Some(Instant::now());
        self.wake.notify_one();
    }

    fn deadline(&self) -> Option<Instant> {
        *self.debounce_deadline.lock()
    }

    /// Clears and reports the deadline if it has passed.
    fn take_due(&self, now: Instant) -> bool {
        let mut deadline = self.debounce_deadline.lock();
        match *deadline {
            Some(d) if d <= now => {
                *deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Translates table events into coalesced queue entries.
struct QueueObserver {
    table: String,
    queue: Arc<OfflineQueue>,
    signal: Arc<SyncSignal>,
}

impl QueueObserver {
    fn enqueue(
        &self,
        key: &Key,
        op: MutationOp,
        value: QueueValue,
        base_rev: Option<String>,
        base_doc: Option<Document>,
    ) {
        match self.queue.enqueue(&self.table, key, op, value, base_rev, base_doc) {
            Ok(()) => self.signal.schedule_push(),
            Err(e) => {
                tracing::error!(table = %self.table, key = %key, error = %e, "failed to queue local write");
            }
        }
    }
}

impl TableObserver for QueueObserver {
    fn on_add(&self, event: &AddEvent) {
        self.enqueue(
            &event.key,
            MutationOp::Add,
            QueueValue::Inline(event.doc.clone()),
            None,
            None,
        );
    }

    fn on_update(&self, event: &UpdateEvent) {
        // Deferred: the push hydrates the latest document, so a burst
        // of edits travels once.
        self.enqueue(
            &event.key,
            MutationOp::Put,
            QueueValue::Deferred,
            event.base_rev.clone(),
            event.base_doc.clone(),
        );
    }

    fn on_delete(&self, event: &DeleteEvent) {
        let Some(key) = &event.key else {
            // A whole-table clear has no per-key entries to queue.
            tracing::debug!(table = %self.table, "table clear not replicated");
            return;
        };
        self.enqueue(
            key,
            MutationOp::Delete,
            QueueValue::Absent,
            event.base_rev.clone(),
            event.base_doc.clone(),
        );
    }
}

/// Orchestrates replication for a set of attached tables.
pub struct SyncManager<T: SyncTransport> {
    config: SyncConfig,
    transport: T,
    queue: Arc<OfflineQueue>,
    state: ReplicationState,
    history: ConflictHistory,
    reachability: Reachability,
    tables: RwLock<HashMap<String, Arc<Table>>>,
    hasher: Arc<dyn ContentHasher>,
    signal: Arc<SyncSignal>,
    stopped: AtomicBool,
}

impl<T: SyncTransport> SyncManager<T> {
    /// Creates a manager, registering the system tables on the store.
    pub fn new(
        config: SyncConfig,
        transport: T,
        store: Arc<dyn DocumentStore>,
    ) -> SyncResult<Arc<Self>> {
        let queue = Arc::new(OfflineQueue::new(store.clone())?);
        let state = ReplicationState::new(store.clone())?;
        let history = ConflictHistory::new(store)?;
        let signal = Arc::new(SyncSignal::new(config.push_debounce));
        Ok(Arc::new(Self {
            config,
            transport,
            queue,
            state,
            history,
            reachability: Reachability::new(),
            tables: RwLock::new(HashMap::new()),
            hasher: Arc::new(Sha256Hasher),
            signal,
            stopped: AtomicBool::new(false),
        }))
    }

    /// Starts replicating a table: local writes queue and schedule a
    /// debounced push, pulled changes apply to it.
    pub fn attach(&self, table: Arc<Table>) {
        table.observe(Arc::new(QueueObserver {
            table: table.name().to_string(),
            queue: self.queue.clone(),
            signal: self.signal.clone(),
        }));
        self.tables.write().insert(table.name().to_string(), table);
    }

    /// The offline queue.
    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    /// The conflict audit log.
    pub fn history(&self) -> &ConflictHistory {
        &self.history
    }

    /// Pull-side replication state.
    pub fn replication(&self) -> &ReplicationState {
        &self.state
    }

    /// Current reachability flags.
    pub fn reachability(&self) -> &Reachability {
        &self.reachability
    }

    /// Feeds the host's online/offline signal. Coming back online
    /// schedules an immediate push.
    pub fn set_os_online(&self, online: bool) {
        self.reachability.set_os_online(online);
        if online {
            self.signal.schedule_push_now();
        }
    }

    /// Stops the loop after the current cycle.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.signal.wake.notify_one();
    }

    /// Runs one full push + pull cycle immediately.
    pub async fn sync_now(&self) {
        self.cycle(true, self.config.pull_enabled).await;
    }

    /// The sync loop. Runs until [`SyncManager::stop`].
    pub async fn run(self: Arc<Self>) {
        let mut next_interval = Instant::now() + self.config.sync_interval;
        loop {
            if self.stopped.load(Ordering::Acquire) {
                break;
            }

            let deadline = self
                .signal
                .deadline()
                .map_or(next_interval, |d| d.min(next_interval));
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                // A new deadline appeared (or stop was requested);
                // recompute.
                _ = self.signal.wake.notified() => continue,
            }

            let now = Instant::now();
            let push_due = self.signal.take_due(now);
            let interval_due = now >= next_interval;
            if interval_due {
                next_interval = now + self.config.sync_interval;
            }
            if push_due || interval_due {
                self.cycle(true, interval_due && self.config.pull_enabled)
                    .await;
            }
        }
        tracing::debug!("sync loop stopped");
    }

    async fn cycle(&self, push: bool, pull: bool) {
        if !self.reachability.os_online() {
            tracing::debug!("offline, skipping sync cycle");
            return;
        }
        if !self.reachability.server_reachable() {
            // One probe per cycle while unreachable.
            match self.transport.ping().await {
                Ok(()) => {
                    self.reachability.mark_reachable();
                    tracing::debug!("server reachable again");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "ping failed, staying unreachable");
                    return;
                }
            }
        }

        if push {
            if let Err(e) = self.push_cycle().await {
                self.note_failure("push", &e);
            }
        }
        if pull {
            if let Err(e) = self.pull_cycle().await {
                self.note_failure("pull", &e);
            }
        }
    }

    fn note_failure(&self, phase: &str, error: &SyncError) {
        if error.is_gateway() {
            self.reachability.mark_unreachable();
            tracing::warn!(phase, error = %error, "gateway failure, marking server unreachable");
        } else {
            tracing::error!(phase, error = %error, "sync cycle failed");
        }
    }

    /// Pushes up to one batch of queued mutations.
    ///
    /// Entries stay queued until the server returns a receipt for
    /// their key; delivery is at-least-once. Deferred entries whose
    /// document disappeared are resolved by skipping.
    async fn push_cycle(&self) -> SyncResult<()> {
        let entries = self.queue.peek(self.config.push_batch_size)?;
        if entries.is_empty() {
            return Ok(());
        }

        let mut mutations: Vec<Mutation> = Vec::new();
        let mut sent: Vec<(String, Key)> = Vec::new();
        let mut skipped: Vec<Key> = Vec::new();
        for entry in entries {
            let mut mutation = entry.mutation;
            if entry.deferred {
                match self.hydrate(&mutation) {
                    Ok(Some(doc)) => mutation.value = Some(doc),
                    Ok(None) => {
                        // The referenced document is gone; nothing
                        // left to push.
                        skipped.push(entry.entry_id);
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "cannot hydrate queued mutation, dropping it");
                        skipped.push(entry.entry_id);
                        continue;
                    }
                }
            }
            sent.push((mutation.key.to_string(), entry.entry_id));
            mutations.push(mutation);
        }
        if !skipped.is_empty() {
            self.queue.remove(&skipped)?;
        }
        if mutations.is_empty() {
            return Ok(());
        }

        let count = mutations.len();
        let request = PushRequest {
            mutations,
            client_id: self.config.client_id.clone(),
        };
        let response = self.transport.push(&request).await?;
        self.reachability.mark_reachable();

        // Receipts carry only the key, so each one is allowed to
        // confirm a single sent entry. A batch spanning tables with a
        // colliding key leaves the extra entry queued for a retry
        // instead of dropping it on one ambiguous receipt.
        let mut receipts: HashMap<String, usize> = HashMap::new();
        for receipt in &response.sync_receipts {
            *receipts.entry(receipt.key.to_string()).or_insert(0) += 1;
        }
        let confirmed: Vec<Key> = sent
            .into_iter()
            .filter_map(|(key, entry_id)| {
                let remaining = receipts.get_mut(&key)?;
                if *remaining == 0 {
                    return None;
                }
                *remaining -= 1;
                Some(entry_id)
            })
            .collect();
        tracing::debug!(pushed = count, confirmed = confirmed.len(), "push cycle complete");
        self.queue.remove(&confirmed)?;
        Ok(())
    }

    fn hydrate(&self, mutation: &Mutation) -> SyncResult<Option<Document>> {
        let tables = self.tables.read();
        let table = tables
            .get(&mutation.table)
            .ok_or_else(|| SyncError::MissingTable(mutation.table.clone()))?;
        let key = Key::from_value(&mutation.key)
            .ok_or_else(|| SyncError::Protocol(format!("unusable key {}", mutation.key)))?;
        Ok(table.get(&key, None)?)
    }

    /// Pulls and applies one batch of remote changes.
    ///
    /// The dirty set is snapshotted once per batch. The checkpoint
    /// advances only when every item applied.
    async fn pull_cycle(&self) -> SyncResult<()> {
        let checkpoint = self.state.checkpoint()?;
        let response = self.transport.pull(checkpoint.as_deref()).await?;
        self.reachability.mark_reachable();

        let dirty = self.queue.dirty_set()?;
        let mut all_applied = true;
        for item in &response.documents {
            if let Err(e) = self.apply_change(item, &dirty) {
                all_applied = false;
                tracing::error!(table = %item.table, key = %item.key, error = %e, "failed to apply remote change");
            }
        }

        if all_applied {
            if let Some(cp) = &response.checkpoint {
                self.state.set_checkpoint(cp)?;
                tracing::debug!(checkpoint = %cp, applied = response.documents.len(), "pull cycle complete");
            }
        } else {
            tracing::warn!("pull batch partially applied, checkpoint not advanced");
        }
        Ok(())
    }

    fn apply_change(&self, item: &ChangeItem, dirty: &HashSet<(String, Key)>) -> SyncResult<()> {
        let table = self
            .tables
            .read()
            .get(&item.table)
            .cloned()
            .ok_or_else(|| SyncError::MissingTable(item.table.clone()))?;
        let key = Key::from_value(&item.key)
            .ok_or_else(|| SyncError::Protocol(format!("unusable key {}", item.key)))?;

        if dirty.contains(&(item.table.clone(), key.clone())) {
            self.resolve_conflict(&table, &key, item)
        } else {
            self.fast_forward(&table, &key, item)
        }
    }

    /// Applies a remote change to a clean key.
    fn fast_forward(&self, table: &Table, key: &Key, item: &ChangeItem) -> SyncResult<()> {
        if item.deleted {
            table.delete(key, WriteMode::Silent, None)?;
            return Ok(());
        }
        let Some(value) = &item.value else {
            return Err(SyncError::Protocol(
                "change item carries neither a value nor the deleted flag".into(),
            ));
        };

        let mut doc = value.clone();
        if let Some(rev) = &item.rev {
            doc.insert(REV_FIELD.into(), rev.as_str().into());
        }

        let existing = table.get(key, None)?;
        match revision_of(&doc).map(str::to_string) {
            Some(incoming) => {
                // Re-applying the same revision is a no-op, so a
                // re-pulled batch is idempotent.
                if existing.as_ref().and_then(|d| revision_of(d)) == Some(incoming.as_str()) {
                    return Ok(());
                }
            }
            None => {
                let parent = existing
                    .as_ref()
                    .and_then(|d| revision_of(d).map(str::to_string));
                stamp_revision(&mut doc, parent.as_deref(), self.hasher.as_ref());
            }
        }

        table.put(doc, Some(key.clone()), WriteMode::Silent, None)?;
        Ok(())
    }

    /// Handles a remote change targeting a dirty key.
    fn resolve_conflict(&self, table: &Table, key: &Key, item: &ChangeItem) -> SyncResult<()> {
        let local_doc = table.get(key, None)?;
        let local_rev = local_doc
            .as_ref()
            .and_then(|d| revision_of(d).map(str::to_string));
        let remote_doc = if item.deleted {
            None
        } else {
            item.value.clone().map(|mut doc| {
                if let Some(rev) = &item.rev {
                    doc.insert(REV_FIELD.into(), rev.as_str().into());
                }
                doc
            })
        };
        let remote_rev = item.rev.clone().or_else(|| {
            remote_doc
                .as_ref()
                .and_then(|d| revision_of(d).map(str::to_string))
        });

        let conflict = Conflict::new(
            item.table.clone(),
            item.key.clone(),
            local_doc,
            remote_doc,
            local_rev,
            remote_rev,
        );
        // History first: the audit record must exist even if
        // resolution fails below.
        self.history.record(&conflict)?;

        let base = self.queue.base_for(&item.table, key)?;
        let applied = resolve(
            &self.config.strategy,
            &conflict,
            base.as_ref(),
            self.config.merge_tie_break,
            self.hasher.as_ref(),
        )
        .and_then(|outcome| self.apply_outcome(table, key, outcome));

        if let Err(e) = applied {
            tracing::warn!(table = %item.table, key = %key, error = %e, "conflict resolution failed, applying fallback");
            match self.config.strategy_fallback {
                StrategyFallback::KeepLocal => {}
                StrategyFallback::AcceptRemote => {
                    if let Err(e) = self.fast_forward(table, key, item) {
                        tracing::error!(table = %item.table, key = %key, error = %e, "fallback apply failed, keeping local");
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_outcome(
        &self,
        table: &Table,
        key: &Key,
        outcome: ResolutionOutcome,
    ) -> SyncResult<()> {
        match outcome {
            ResolutionOutcome::KeepLocal => Ok(()),
            ResolutionOutcome::Apply(doc) => {
                table.put(doc, Some(key.clone()), WriteMode::Silent, None)?;
                Ok(())
            }
            ResolutionOutcome::Delete => {
                table.delete(key, WriteMode::Silent, None)?;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use docsync_core::MemoryStore;
    use serde_json::json;

    fn setup() -> (Arc<SyncManager<MockTransport>>, Arc<Table>) {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let manager = SyncManager::new(
            SyncConfig::new("").with_client_id("test"),
            MockTransport::new(),
            store.clone(),
        )
        .unwrap();
        let table = Arc::new(Table::new("users", "++id,name", store).unwrap());
        manager.attach(table.clone());
        (manager, table)
    }

    #[test]
    fn local_add_queues_an_inline_mutation() {
        let (manager, table) = setup();
        let mut doc = Document::new();
        doc.insert("name".into(), json!("ada"));
        table.add(doc, None, WriteMode::Normal, None).unwrap();

        let entries = manager.queue().peek(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mutation.op, MutationOp::Add);
        assert!(!entries[0].deferred);
        assert!(entries[0].mutation.value.is_some());
    }

    #[test]
    fn silent_writes_do_not_queue() {
        let (manager, table) = setup();
        table
            .put(Document::new(), None, WriteMode::Silent, None)
            .unwrap();
        assert_eq!(manager.queue().count().unwrap(), 0);
    }

    #[test]
    fn update_queues_a_deferred_put_with_base() {
        let (manager, table) = setup();
        let mut doc = Document::new();
        doc.insert("name".into(), json!("ada"));
        let key = table.add(doc, None, WriteMode::Normal, None).unwrap();
        let first_rev = revision_of(&table.get(&key, None).unwrap().unwrap())
            .unwrap()
            .to_string();

        let mut changes = Document::new();
        changes.insert("name".into(), json!("ada2"));
        table.update(&key, changes, WriteMode::Normal, None).unwrap();

        // Coalesced into one entry; the base is the add's base (none),
        // not the update's.
        let entries = manager.queue().peek(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mutation.op, MutationOp::Put);
        assert!(entries[0].mutation.base_rev.is_none());

        // A delete of an already-synced document (stored silently, as
        // a pull would) carries that document's revision as its base.
        let mut synced = Document::new();
        synced.insert("name".into(), json!("bob"));
        synced.insert("_rev".into(), json!("4-remote"));
        let other = table
            .put(synced, None, WriteMode::Silent, None)
            .unwrap();
        table.delete(&other, WriteMode::Normal, None).unwrap();

        let entries = manager.queue().peek(10).unwrap();
        let delete = entries
            .iter()
            .find(|e| e.mutation.op == MutationOp::Delete)
            .unwrap();
        assert_eq!(delete.mutation.base_rev.as_deref(), Some("4-remote"));
        assert!(!first_rev.is_empty());
    }
}
