//! End-to-end sync scenarios against a scripted transport.

use docsync_core::{
    generation_of, revision_of, Document, DocumentStore, Key, MemoryStore, Table, Validator,
    WriteMode, LAST_MODIFIED_FIELD,
};
use docsync_engine::{
    MockTransport, ResolutionStrategy, SyncConfig, SyncError, SyncManager,
};
use docsync_protocol::{ChangeItem, MutationOp, PullResponse, PushResponse, Receipt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

type Manager = Arc<SyncManager<Arc<MockTransport>>>;

fn base_config() -> SyncConfig {
    SyncConfig::new("https://sync.example.com").with_client_id("client-a")
}

fn setup(config: SyncConfig) -> (Arc<MockTransport>, Manager, Arc<Table>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::new());
    let manager = SyncManager::new(config, transport.clone(), store.clone()).unwrap();
    let table = Arc::new(Table::new("notes", "++id,title", store).unwrap());
    manager.attach(table.clone());
    (transport, manager, table)
}

fn doc(pairs: &[(&str, Value)]) -> Document {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn change(key: i64, value: Option<Document>, rev: &str) -> ChangeItem {
    ChangeItem {
        table: "notes".into(),
        key: json!(key),
        value,
        deleted: false,
        rev: Some(rev.into()),
    }
}

struct RejectWrites;
impl Validator for RejectWrites {
    fn validate(&self, _doc: &Document) -> Result<(), String> {
        Err("closed for writing".into())
    }
}

#[tokio::test]
async fn queued_writes_push_and_drain() {
    let (transport, manager, table) = setup(base_config());

    table
        .add(doc(&[("title", json!("one"))]), None, WriteMode::Normal, None)
        .unwrap();
    table
        .add(doc(&[("title", json!("two"))]), None, WriteMode::Normal, None)
        .unwrap();
    assert_eq!(manager.queue().count().unwrap(), 2);

    manager.sync_now().await;

    assert_eq!(manager.queue().count().unwrap(), 0);
    let pushes = transport.pushes();
    assert_eq!(pushes.len(), 1);
    assert_eq!(pushes[0].client_id, "client-a");
    assert_eq!(pushes[0].mutations.len(), 2);
    assert_eq!(pushes[0].mutations[0].op, MutationOp::Add);
}

#[tokio::test]
async fn coalesced_burst_pushes_the_final_document() {
    let (transport, manager, table) = setup(base_config());

    let key = table
        .add(doc(&[("title", json!("v1"))]), None, WriteMode::Normal, None)
        .unwrap();
    table
        .update(&key, doc(&[("title", json!("v2"))]), WriteMode::Normal, None)
        .unwrap();
    table
        .update(&key, doc(&[("title", json!("v3"))]), WriteMode::Normal, None)
        .unwrap();

    // The burst coalesced into one entry, hydrated at push time.
    assert_eq!(manager.queue().count().unwrap(), 1);
    manager.sync_now().await;

    let pushes = transport.pushes();
    assert_eq!(pushes.len(), 1);
    let mutation = &pushes[0].mutations[0];
    assert_eq!(mutation.op, MutationOp::Put);
    assert_eq!(mutation.value.as_ref().unwrap()["title"], json!("v3"));
    assert_eq!(manager.queue().count().unwrap(), 0);
}

#[tokio::test]
async fn unacknowledged_mutations_stay_queued() {
    let (transport, manager, table) = setup(base_config());

    table
        .add(doc(&[("title", json!("one"))]), None, WriteMode::Normal, None)
        .unwrap();

    // The server accepts the request but issues no receipt.
    transport.enqueue_push(Ok(PushResponse {
        sync_receipts: vec![],
    }));
    manager.sync_now().await;
    assert_eq!(manager.queue().count().unwrap(), 1);

    // Next cycle, the default mock acknowledges it.
    manager.sync_now().await;
    assert_eq!(manager.queue().count().unwrap(), 0);
    assert_eq!(transport.pushes().len(), 2);
}

#[tokio::test]
async fn pull_fast_forwards_clean_keys_and_advances_checkpoint() {
    let (transport, manager, table) = setup(base_config());

    transport.enqueue_pull(Ok(PullResponse {
        documents: vec![change(
            1,
            Some(doc(&[("title", json!("from the server"))])),
            "3-abc",
        )],
        checkpoint: Some("cp-1".into()),
    }));
    manager.sync_now().await;

    let stored = table.get(&Key::Int(1), None).unwrap().unwrap();
    assert_eq!(stored["title"], json!("from the server"));
    assert_eq!(revision_of(&stored), Some("3-abc"));
    assert_eq!(
        manager.replication().checkpoint().unwrap().as_deref(),
        Some("cp-1")
    );
    // No conflict: the key had no pending write.
    assert_eq!(manager.history().count().unwrap(), 0);

    // The next pull resumes from the stored checkpoint.
    manager.sync_now().await;
    assert_eq!(transport.pulls(), vec![None, Some("cp-1".to_string())]);
}

#[tokio::test]
async fn re_pulled_revision_is_a_no_op() {
    let (transport, manager, table) = setup(base_config());

    table
        .put(
            doc(&[("title", json!("t")), ("_rev", json!("3-abc"))]),
            Some(Key::Int(1)),
            WriteMode::Silent,
            None,
        )
        .unwrap();
    let before = table.version();

    transport.enqueue_pull(Ok(PullResponse {
        documents: vec![change(1, Some(doc(&[("title", json!("t"))])), "3-abc")],
        checkpoint: Some("cp-2".into()),
    }));
    manager.sync_now().await;

    // Same revision: the table was not touched, the checkpoint still
    // advanced.
    assert_eq!(table.version(), before);
    assert_eq!(
        manager.replication().checkpoint().unwrap().as_deref(),
        Some("cp-2")
    );
}

#[tokio::test]
async fn conflicting_pull_applies_last_write_wins_and_records_history() {
    let (transport, manager, table) = setup(base_config());

    table
        .add(doc(&[("title", json!("local"))]), None, WriteMode::Normal, None)
        .unwrap();

    // Keep the key dirty through the push, then deliver a newer remote
    // edit for it.
    transport.enqueue_push(Ok(PushResponse {
        sync_receipts: vec![],
    }));
    transport.enqueue_pull(Ok(PullResponse {
        documents: vec![change(
            1,
            Some(doc(&[
                ("title", json!("remote")),
                (LAST_MODIFIED_FIELD, json!(9.0e15)),
            ])),
            "5-abc",
        )],
        checkpoint: Some("cp-3".into()),
    }));
    manager.sync_now().await;

    let stored = table.get(&Key::Int(1), None).unwrap().unwrap();
    assert_eq!(stored["title"], json!("remote"));
    assert_eq!(revision_of(&stored), Some("5-abc"));

    let recent = manager.history().recent(1).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].table, "notes");
    assert_eq!(recent[0].key, json!(1));
    assert_eq!(recent[0].remote_rev.as_deref(), Some("5-abc"));
}

#[tokio::test]
async fn last_write_wins_keeps_a_newer_local_edit() {
    let (transport, manager, table) = setup(base_config());

    table
        .add(doc(&[("title", json!("local"))]), None, WriteMode::Normal, None)
        .unwrap();

    transport.enqueue_push(Ok(PushResponse {
        sync_receipts: vec![],
    }));
    transport.enqueue_pull(Ok(PullResponse {
        documents: vec![change(
            1,
            Some(doc(&[
                ("title", json!("stale remote")),
                (LAST_MODIFIED_FIELD, json!(1.0)),
            ])),
            "5-abc",
        )],
        checkpoint: None,
    }));
    manager.sync_now().await;

    let stored = table.get(&Key::Int(1), None).unwrap().unwrap();
    assert_eq!(stored["title"], json!("local"));
    // Losing conflicts are still audited.
    assert_eq!(manager.history().count().unwrap(), 1);
}

#[tokio::test]
async fn merge_combines_disjoint_edits_from_the_queued_base() {
    let (transport, manager, table) =
        setup(base_config().with_strategy(ResolutionStrategy::Merge));

    // A previously synced document (stored silently, as a pull would).
    let key = table
        .put(
            doc(&[
                ("title", json!("t")),
                ("body", json!("b")),
                ("_rev", json!("2-r")),
            ]),
            None,
            WriteMode::Silent,
            None,
        )
        .unwrap();
    // Local edit touches the title; the queue captures the pre-edit
    // snapshot as the merge base.
    table
        .update(&key, doc(&[("title", json!("local title"))]), WriteMode::Normal, None)
        .unwrap();

    transport.enqueue_push(Ok(PushResponse {
        sync_receipts: vec![],
    }));
    transport.enqueue_pull(Ok(PullResponse {
        documents: vec![change(
            1,
            Some(doc(&[("title", json!("t")), ("body", json!("remote body"))])),
            "3-r",
        )],
        checkpoint: None,
    }));
    manager.sync_now().await;

    let stored = table.get(&key, None).unwrap().unwrap();
    assert_eq!(stored["title"], json!("local title"));
    assert_eq!(stored["body"], json!("remote body"));
    // The merged document succeeds the remote revision.
    assert_eq!(generation_of(revision_of(&stored).unwrap()), 4);
    // The pending put will push the merged result next cycle.
    assert_eq!(manager.queue().count().unwrap(), 1);
}

#[tokio::test]
async fn resolution_apply_failure_falls_back_to_keeping_local() {
    let (transport, manager, table) =
        setup(base_config().with_strategy(ResolutionStrategy::RemoteWins));

    table
        .add(doc(&[("title", json!("local"))]), None, WriteMode::Normal, None)
        .unwrap();
    // Applying the winner will now fail validation.
    table.set_validator(Arc::new(RejectWrites));

    transport.enqueue_push(Ok(PushResponse {
        sync_receipts: vec![],
    }));
    transport.enqueue_pull(Ok(PullResponse {
        documents: vec![change(1, Some(doc(&[("title", json!("remote"))])), "5-abc")],
        checkpoint: Some("cp-4".into()),
    }));
    manager.sync_now().await;

    // Fallback kept the local document; the conflict is still on
    // record and the batch still counts as applied.
    let stored = table.get(&Key::Int(1), None).unwrap().unwrap();
    assert_eq!(stored["title"], json!("local"));
    assert_eq!(manager.history().count().unwrap(), 1);
    assert_eq!(
        manager.replication().checkpoint().unwrap().as_deref(),
        Some("cp-4")
    );
}

#[tokio::test]
async fn remote_delete_removes_a_clean_document() {
    let (transport, manager, table) = setup(base_config());

    table
        .put(
            doc(&[("title", json!("t")), ("_rev", json!("2-r"))]),
            Some(Key::Int(1)),
            WriteMode::Silent,
            None,
        )
        .unwrap();

    transport.enqueue_pull(Ok(PullResponse {
        documents: vec![ChangeItem {
            table: "notes".into(),
            key: json!(1),
            value: None,
            deleted: true,
            rev: Some("3-r".into()),
        }],
        checkpoint: None,
    }));
    manager.sync_now().await;

    assert!(table.get(&Key::Int(1), None).unwrap().is_none());
    // A silent delete does not re-enter the queue.
    assert_eq!(manager.queue().count().unwrap(), 0);
}

#[tokio::test]
async fn partial_pull_does_not_advance_the_checkpoint() {
    let (transport, manager, table) = setup(base_config());

    transport.enqueue_pull(Ok(PullResponse {
        documents: vec![
            change(1, Some(doc(&[("title", json!("good"))])), "1-a"),
            ChangeItem {
                table: "ghosts".into(),
                key: json!(1),
                value: Some(Document::new()),
                deleted: false,
                rev: Some("1-b".into()),
            },
        ],
        checkpoint: Some("cp-5".into()),
    }));
    manager.sync_now().await;

    // The good item applied, but the unknown table poisoned the batch.
    assert!(table.get(&Key::Int(1), None).unwrap().is_some());
    assert_eq!(manager.replication().checkpoint().unwrap(), None);

    // The same batch re-pulls from the old checkpoint next time.
    manager.sync_now().await;
    assert_eq!(transport.pulls(), vec![None, None]);
}

#[tokio::test]
async fn gateway_failure_flips_unreachable_until_a_ping_succeeds() {
    let (transport, manager, table) = setup(base_config().with_pull_enabled(false));

    table
        .add(doc(&[("title", json!("one"))]), None, WriteMode::Normal, None)
        .unwrap();

    transport.enqueue_push(Err(SyncError::transport_gateway("503 from the proxy")));
    manager.sync_now().await;
    assert!(!manager.reachability().is_online());
    assert_eq!(manager.queue().count().unwrap(), 1);

    // Unreachable cycles probe instead of pushing.
    transport.enqueue_ping(Err(SyncError::transport_gateway("still down")));
    manager.sync_now().await;
    assert_eq!(transport.pushes().len(), 1);
    assert_eq!(manager.queue().count().unwrap(), 1);

    // A successful ping restores the push path in the same cycle.
    manager.sync_now().await;
    assert_eq!(transport.ping_count(), 2);
    assert!(manager.reachability().is_online());
    assert_eq!(manager.queue().count().unwrap(), 0);
}

#[tokio::test]
async fn an_ambiguous_receipt_confirms_only_one_entry() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::new());
    let manager = SyncManager::new(base_config(), transport.clone(), store.clone()).unwrap();
    let notes = Arc::new(Table::new("notes", "++id,title", store.clone()).unwrap());
    let tags = Arc::new(Table::new("tags", "++id,label", store).unwrap());
    manager.attach(notes.clone());
    manager.attach(tags.clone());

    // Both tables auto-assign key 1, so the batch carries two
    // mutations with the same wire key.
    notes
        .add(doc(&[("title", json!("n"))]), None, WriteMode::Normal, None)
        .unwrap();
    tags.add(doc(&[("label", json!("t"))]), None, WriteMode::Normal, None)
        .unwrap();
    assert_eq!(manager.queue().count().unwrap(), 2);

    transport.enqueue_push(Ok(PushResponse {
        sync_receipts: vec![Receipt { key: json!(1) }],
    }));
    manager.sync_now().await;

    // One receipt drains one entry; the other stays queued and is
    // confirmed on the next, fully acknowledged push.
    assert_eq!(manager.queue().count().unwrap(), 1);
    manager.sync_now().await;
    assert_eq!(manager.queue().count().unwrap(), 0);
}

#[tokio::test]
async fn os_offline_skips_cycles_entirely() {
    let (transport, manager, table) = setup(base_config());

    manager.set_os_online(false);
    table
        .add(doc(&[("title", json!("one"))]), None, WriteMode::Normal, None)
        .unwrap();
    manager.sync_now().await;
    assert!(transport.pushes().is_empty());
    assert!(!manager.reachability().is_online());

    manager.set_os_online(true);
    manager.sync_now().await;
    assert_eq!(transport.pushes().len(), 1);
    assert_eq!(manager.queue().count().unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn debounced_push_fires_after_the_quiet_window() {
    let config = base_config()
        .with_push_debounce(Duration::from_millis(100))
        .with_sync_interval(Duration::from_secs(3600))
        .with_pull_enabled(false);
    let (transport, manager, table) = setup(config);
    let runner = tokio::spawn(manager.clone().run());

    table
        .add(doc(&[("title", json!("draft"))]), None, WriteMode::Normal, None)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(transport.pushes().len(), 1);
    assert_eq!(manager.queue().count().unwrap(), 0);

    manager.stop();
    runner.await.unwrap();
}
