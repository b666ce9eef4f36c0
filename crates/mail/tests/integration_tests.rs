//! Integration tests for the mailhook crate
//!
//! These tests drive complete sync cycles through the engine with scripted
//! collaborators, and end to end against a SQLite database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use base64::prelude::*;
use chrono::Utc;
use mailhook::models::outcome::reasons;
use mailhook::models::task::DEFAULT_QUEUE;
use mailhook::{
    CancelFlag, CredentialRecord, CredentialResolver, CredentialStore, DispatchSink, DispatchTask,
    FilterSet, InMemoryCredentialStore, InMemoryTaskQueue, IncomingNotification, MailGateway,
    Message, MessageId, OutcomeStatus, OwnerAddress, OwnerGate, OwnerId, PlatformId,
    RefreshedToken, Secret, SqliteStore, SyncEngine, SyncError, TaskHandle, TokenRefresher,
    Watermark,
};
use serde_json::json;
use tempfile::TempDir;

/// Gateway answering from fixed tables
#[derive(Default)]
struct ScriptedGateway {
    /// since -> ids added after it
    changes: HashMap<String, Vec<String>>,
    /// id -> labels; ids absent here fail to fetch
    messages: HashMap<String, Vec<String>>,
    recent: Vec<String>,
    change_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    tokens_seen: Mutex<Vec<String>>,
    /// Raised after the first message fetch
    cancel_on_fetch: Option<CancelFlag>,
    /// Slows down change fetches and tracks overlap
    change_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedGateway {
    fn new() -> Self {
        Self::default()
    }

    fn with_changes(mut self, since: &str, ids: &[&str]) -> Self {
        self.changes
            .insert(since.to_string(), ids.iter().map(|s| s.to_string()).collect());
        self
    }

    fn with_message(mut self, id: &str, labels: &[&str]) -> Self {
        self.messages
            .insert(id.to_string(), labels.iter().map(|s| s.to_string()).collect());
        self
    }

    fn with_recent(mut self, ids: &[&str]) -> Self {
        self.recent = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    fn record_token(&self, token: &Secret) {
        self.tokens_seen
            .lock()
            .unwrap()
            .push(token.expose().to_string());
    }
}

impl MailGateway for ScriptedGateway {
    fn fetch_message(&self, token: &Secret, id: &MessageId) -> Option<Message> {
        self.record_token(token);
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(flag) = &self.cancel_on_fetch {
            flag.cancel();
        }
        let labels = self.messages.get(id.as_str())?;
        Some(Message::new(
            id.clone(),
            labels.clone(),
            json!({ "id": id.as_str(), "labelIds": labels }),
        ))
    }

    fn fetch_changes(&self, token: &Secret, since: &Watermark, _max: usize) -> Vec<MessageId> {
        self.record_token(token);
        self.change_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.change_delay {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            thread::sleep(delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        self.changes
            .get(since.as_str())
            .map(|ids| ids.iter().map(|id| MessageId::new(id.as_str())).collect())
            .unwrap_or_default()
    }

    fn list_recent(&self, token: &Secret, max_results: usize) -> Vec<MessageId> {
        self.record_token(token);
        self.recent
            .iter()
            .take(max_results)
            .map(|id| MessageId::new(id.as_str()))
            .collect()
    }
}

struct StaticRefresher(Option<&'static str>);

impl TokenRefresher for StaticRefresher {
    fn refresh(&self, _refresh_token: &Secret) -> Result<RefreshedToken> {
        match self.0 {
            Some(token) => Ok(RefreshedToken {
                access_token: Secret::new(token),
                expires_in: Some(3600),
            }),
            None => bail!("token endpoint returned HTTP 401"),
        }
    }
}

/// Sink rejecting selected message ids
struct SelectiveSink {
    inner: InMemoryTaskQueue,
    reject: HashSet<String>,
}

impl DispatchSink for SelectiveSink {
    fn submit(&self, task: DispatchTask) -> Result<TaskHandle> {
        let id = task.message["id"].as_str().unwrap_or_default().to_string();
        if self.reject.contains(&id) {
            return Err(anyhow!("broker unavailable"));
        }
        self.inner.submit(task)
    }
}

/// Store whose watermark commits fail
struct CommitFailingStore(InMemoryCredentialStore);

impl CredentialStore for CommitFailingStore {
    fn lookup(
        &self,
        address: &OwnerAddress,
        platform: &PlatformId,
    ) -> Result<Option<CredentialRecord>> {
        self.0.lookup(address, platform)
    }

    fn get_credential(
        &self,
        owner: &OwnerId,
        platform: &PlatformId,
    ) -> Result<Option<CredentialRecord>> {
        self.0.get_credential(owner, platform)
    }

    fn persist_token(&self, record: &CredentialRecord) -> Result<()> {
        self.0.persist_token(record)
    }

    fn commit_watermark(&self, _: &OwnerId, _: &PlatformId, _: &Watermark) -> Result<()> {
        Err(anyhow!("database is locked"))
    }
}

fn record(owner: &str, watermark: Option<&str>) -> CredentialRecord {
    let record = CredentialRecord::new(
        OwnerId::new(owner),
        PlatformId::gmail(),
        "access-token",
        "refresh-token",
        Utc::now() + chrono::Duration::hours(1),
    );
    match watermark {
        Some(w) => record.with_watermark(w),
        None => record,
    }
}

fn store_with(address: &str, record: CredentialRecord) -> Arc<InMemoryCredentialStore> {
    Arc::new(
        InMemoryCredentialStore::new()
            .with_owner(address, record)
            .unwrap(),
    )
}

fn engine(
    store: Arc<dyn CredentialStore>,
    gateway: Arc<dyn MailGateway>,
    sink: Arc<dyn DispatchSink>,
) -> SyncEngine {
    let resolver = CredentialResolver::new(store, Arc::new(StaticRefresher(Some("fresh-token"))));
    SyncEngine::new(resolver, gateway, sink)
}

fn stored_watermark(store: &dyn CredentialStore, owner: &str) -> Option<Watermark> {
    store
        .get_credential(&OwnerId::new(owner), &PlatformId::gmail())
        .unwrap()
        .unwrap()
        .watermark
}

fn push_body(email: &str, history_id: u64) -> Vec<u8> {
    let data = BASE64_STANDARD.encode(
        json!({ "emailAddress": email, "historyId": history_id }).to_string(),
    );
    json!({
        "message": {
            "data": data,
            "messageId": "2070443601311540",
            "publishTime": "2026-10-16T09:00:00.000Z"
        },
        "subscription": "projects/demo/subscriptions/gmail-push"
    })
    .to_string()
    .into_bytes()
}

#[test]
fn test_incremental_cycle_filters_and_dispatches() {
    let store = store_with("a@x.com", record("p1", Some("100")));
    let gateway = Arc::new(
        ScriptedGateway::new()
            .with_changes("100", &["m1", "m2"])
            .with_message("m1", &["INBOX", "IMPORTANT"])
            .with_message("m2", &["INBOX", "CATEGORY_PROMOTIONS"]),
    );
    let queue = Arc::new(InMemoryTaskQueue::new());
    let engine = engine(store.clone(), gateway.clone(), queue.clone());

    let outcome = engine
        .process(&IncomingNotification::new("a@x.com", "150"))
        .unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Ok);
    assert_eq!(outcome.messages_found, 2);
    assert_eq!(outcome.tasks_sent, 1);
    assert_eq!(outcome.filtered, 1);
    assert_eq!(outcome.owner_id, Some(OwnerId::new("p1")));
    assert_eq!(outcome.watermark, Some(Watermark::new("150")));
    assert_eq!(stored_watermark(&*store, "p1"), Some(Watermark::new("150")));

    let tasks = queue.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task.owner_id, OwnerId::new("p1"));
    assert_eq!(tasks[0].task.platform_id, PlatformId::gmail());
    assert_eq!(tasks[0].task.message["id"], "m1");
    assert_eq!(tasks[0].queue, DEFAULT_QUEUE);
}

#[test]
fn test_first_notification_only_stores_watermark() {
    let store = store_with("a@x.com", record("p1", None));
    let gateway = Arc::new(ScriptedGateway::new());
    let queue = Arc::new(InMemoryTaskQueue::new());
    let engine = engine(store.clone(), gateway.clone(), queue.clone());

    let outcome = engine
        .process(&IncomingNotification::new("a@x.com", "42"))
        .unwrap();

    assert!(outcome.is_ok());
    assert_eq!(outcome.reason.as_deref(), Some(reasons::FIRST_NOTIFICATION));
    assert_eq!(
        (outcome.messages_found, outcome.tasks_sent, outcome.filtered),
        (0, 0, 0)
    );
    assert_eq!(stored_watermark(&*store, "p1"), Some(Watermark::new("42")));
    assert_eq!(gateway.change_calls.load(Ordering::SeqCst), 0);
    assert_eq!(gateway.fetch_calls.load(Ordering::SeqCst), 0);
    assert!(queue.is_empty());
}

#[test]
fn test_empty_change_list_still_advances() {
    let store = store_with("a@x.com", record("p1", Some("100")));
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = engine(store.clone(), gateway.clone(), Arc::new(InMemoryTaskQueue::new()));

    let outcome = engine
        .process(&IncomingNotification::new("a@x.com", "120"))
        .unwrap();

    assert!(outcome.is_ok());
    assert_eq!(outcome.reason.as_deref(), Some(reasons::NO_NEW_MESSAGES));
    assert_eq!(outcome.messages_found, 0);
    assert_eq!(gateway.change_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stored_watermark(&*store, "p1"), Some(Watermark::new("120")));
}

#[test]
fn test_fetch_failure_does_not_block_later_messages() {
    let store = store_with("a@x.com", record("p1", Some("100")));
    let gateway = Arc::new(
        ScriptedGateway::new()
            .with_changes("100", &["gone", "m2", "m3"])
            .with_message("m2", &["STARRED"])
            .with_message("m3", &["CATEGORY_UPDATES"]),
    );
    let queue = Arc::new(InMemoryTaskQueue::new());
    let engine = engine(store.clone(), gateway.clone(), queue.clone());

    let outcome = engine
        .process(&IncomingNotification::new("a@x.com", "150"))
        .unwrap();

    assert_eq!(outcome.messages_found, 3);
    assert_eq!(outcome.tasks_sent, 2);
    assert_eq!(outcome.filtered, 0);
    assert_eq!(gateway.fetch_calls.load(Ordering::SeqCst), 3);

    let sent: Vec<_> = queue
        .tasks()
        .iter()
        .map(|t| t.task.message["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(sent, vec!["m2", "m3"]);
    assert_eq!(stored_watermark(&*store, "p1"), Some(Watermark::new("150")));
}

#[test]
fn test_dispatch_failure_does_not_abort_batch() {
    let store = store_with("a@x.com", record("p1", Some("100")));
    let gateway = Arc::new(
        ScriptedGateway::new()
            .with_changes("100", &["m1", "m2"])
            .with_message("m1", &["IMPORTANT"])
            .with_message("m2", &["IMPORTANT"]),
    );
    let sink = Arc::new(SelectiveSink {
        inner: InMemoryTaskQueue::new(),
        reject: HashSet::from(["m1".to_string()]),
    });
    let engine = engine(store.clone(), gateway, sink.clone());

    let outcome = engine
        .process(&IncomingNotification::new("a@x.com", "150"))
        .unwrap();

    assert_eq!(outcome.messages_found, 2);
    assert_eq!(outcome.tasks_sent, 1);
    assert_eq!(outcome.filtered, 0);
    assert_eq!(sink.inner.tasks()[0].task.message["id"], "m2");
    assert_eq!(stored_watermark(&*store, "p1"), Some(Watermark::new("150")));
}

#[test]
fn test_replay_is_idempotent() {
    let store = store_with("a@x.com", record("p1", Some("100")));
    let gateway = Arc::new(
        ScriptedGateway::new()
            .with_changes("100", &["m1"])
            .with_message("m1", &["IMPORTANT"]),
    );
    let queue = Arc::new(InMemoryTaskQueue::new());
    let engine = engine(store.clone(), gateway, queue.clone());
    let notification = IncomingNotification::new("a@x.com", "150");

    let first = engine.process(&notification).unwrap();
    assert_eq!(first.tasks_sent, 1);

    let replay = engine.process(&notification).unwrap();
    assert!(replay.is_ok());
    assert_eq!(replay.messages_found, 0);
    assert_eq!(replay.tasks_sent, 0);
    assert_eq!(queue.len(), 1);
    assert_eq!(stored_watermark(&*store, "p1"), Some(Watermark::new("150")));
}

#[test]
fn test_older_notification_does_not_regress_watermark() {
    let store = store_with("a@x.com", record("p1", Some("200")));
    let engine = engine(
        store.clone(),
        Arc::new(ScriptedGateway::new()),
        Arc::new(InMemoryTaskQueue::new()),
    );

    let outcome = engine
        .process(&IncomingNotification::new("a@x.com", "150"))
        .unwrap();

    assert_eq!(outcome.watermark, Some(Watermark::new("200")));
    assert_eq!(stored_watermark(&*store, "p1"), Some(Watermark::new("200")));
}

#[test]
fn test_validation_rejections() {
    let store = store_with("a@x.com", record("p1", Some("100")));
    let gateway = Arc::new(ScriptedGateway::new());
    let engine = engine(store, gateway.clone(), Arc::new(InMemoryTaskQueue::new()));

    let missing_address = IncomingNotification {
        owner_address: Some("   ".to_string()),
        watermark: Some("150".to_string()),
    };
    let outcome = engine.handle(&missing_address);
    assert_eq!(outcome.status, OutcomeStatus::Rejected);
    assert_eq!(outcome.reason.as_deref(), Some("no_email_address"));

    let missing_watermark = IncomingNotification {
        owner_address: Some("a@x.com".to_string()),
        watermark: None,
    };
    let outcome = engine.handle(&missing_watermark);
    assert_eq!(outcome.status, OutcomeStatus::Rejected);
    assert_eq!(outcome.reason.as_deref(), Some("no_history_id"));

    assert_eq!(gateway.change_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unknown_owner_is_rejected() {
    let store = store_with("a@x.com", record("p1", Some("100")));
    let engine = engine(
        store,
        Arc::new(ScriptedGateway::new()),
        Arc::new(InMemoryTaskQueue::new()),
    );

    let err = engine
        .process(&IncomingNotification::new("nobody@x.com", "150"))
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownOwner { .. }));

    let outcome = engine.handle(&IncomingNotification::new("nobody@x.com", "150"));
    assert_eq!(outcome.status, OutcomeStatus::Rejected);
    assert_eq!(outcome.reason.as_deref(), Some(reasons::NOT_REGISTERED));
}

#[test]
fn test_address_lookup_ignores_case_and_whitespace() {
    let store = store_with("a@x.com", record("p1", None));
    let engine = engine(
        store.clone(),
        Arc::new(ScriptedGateway::new()),
        Arc::new(InMemoryTaskQueue::new()),
    );

    let outcome = engine
        .process(&IncomingNotification::new("  A@X.COM ", "7"))
        .unwrap();
    assert_eq!(outcome.owner_id, Some(OwnerId::new("p1")));
}

#[test]
fn test_commit_failure_is_failed_outcome() {
    let inner = InMemoryCredentialStore::new()
        .with_owner("a@x.com", record("p1", Some("100")))
        .unwrap();
    let store = Arc::new(CommitFailingStore(inner));
    let gateway = Arc::new(
        ScriptedGateway::new()
            .with_changes("100", &["m1"])
            .with_message("m1", &["IMPORTANT"]),
    );
    let queue = Arc::new(InMemoryTaskQueue::new());
    let engine = engine(store.clone(), gateway, queue.clone());

    let outcome = engine.handle(&IncomingNotification::new("a@x.com", "150"));
    assert_eq!(outcome.status, OutcomeStatus::Failed);
    assert_eq!(outcome.reason.as_deref(), Some(reasons::PERSISTENCE_FAILURE));

    // Dispatched before the commit; redelivery will send it again
    assert_eq!(queue.len(), 1);
    assert_eq!(stored_watermark(&*store, "p1"), Some(Watermark::new("100")));
}

#[test]
fn test_cancelled_cycle_commits_nothing() {
    let store = store_with("a@x.com", record("p1", Some("100")));
    let cancel = CancelFlag::new();
    let gateway = Arc::new(ScriptedGateway {
        cancel_on_fetch: Some(cancel.clone()),
        ..ScriptedGateway::new()
            .with_changes("100", &["m1", "m2"])
            .with_message("m1", &["IMPORTANT"])
            .with_message("m2", &["IMPORTANT"])
    });
    let queue = Arc::new(InMemoryTaskQueue::new());
    let engine = engine(store.clone(), gateway.clone(), queue.clone());

    let err = engine
        .process_cancellable(&IncomingNotification::new("a@x.com", "150"), &cancel)
        .unwrap_err();

    assert!(matches!(err, SyncError::Interrupted));
    assert!(err.is_retryable());
    assert_eq!(gateway.fetch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(queue.len(), 1);
    assert_eq!(stored_watermark(&*store, "p1"), Some(Watermark::new("100")));
}

#[test]
fn test_expired_token_refresh_failure_uses_stale_token() {
    let expired = CredentialRecord::new(
        OwnerId::new("p1"),
        PlatformId::gmail(),
        "stale-token",
        "refresh-token",
        Utc::now() + chrono::Duration::minutes(2),
    )
    .with_watermark("100");
    let store = store_with("a@x.com", expired);
    let gateway = Arc::new(ScriptedGateway::new());
    let resolver = CredentialResolver::new(store.clone(), Arc::new(StaticRefresher(None)));
    let engine = SyncEngine::new(resolver, gateway.clone(), Arc::new(InMemoryTaskQueue::new()));

    let outcome = engine
        .process(&IncomingNotification::new("a@x.com", "150"))
        .unwrap();

    assert!(outcome.is_ok());
    assert_eq!(*gateway.tokens_seen.lock().unwrap(), vec!["stale-token"]);
}

#[test]
fn test_expired_token_is_refreshed_before_fetching() {
    let expired = CredentialRecord::new(
        OwnerId::new("p1"),
        PlatformId::gmail(),
        "stale-token",
        "refresh-token",
        Utc::now() - chrono::Duration::minutes(1),
    )
    .with_watermark("100");
    let store = store_with("a@x.com", expired);
    let gateway = Arc::new(
        ScriptedGateway::new()
            .with_changes("100", &["m1"])
            .with_message("m1", &["IMPORTANT"]),
    );
    let engine = engine(store.clone(), gateway.clone(), Arc::new(InMemoryTaskQueue::new()));

    engine
        .process(&IncomingNotification::new("a@x.com", "150"))
        .unwrap();

    assert_eq!(
        *gateway.tokens_seen.lock().unwrap(),
        vec!["fresh-token", "fresh-token"]
    );
    let stored = store
        .get_credential(&OwnerId::new("p1"), &PlatformId::gmail())
        .unwrap()
        .unwrap();
    assert_eq!(stored.access_token.expose(), "fresh-token");
}

#[test]
fn test_custom_filters() {
    let store = store_with("a@x.com", record("p1", Some("100")));
    let gateway = Arc::new(
        ScriptedGateway::new()
            .with_changes("100", &["m1", "m2"])
            .with_message("m1", &["IMPORTANT"])
            .with_message("m2", &["Receipts"]),
    );
    let queue = Arc::new(InMemoryTaskQueue::new());
    let filters = FilterSet::from_queries(&["label:Receipts"][..]).unwrap();
    let engine = engine(store, gateway, queue.clone()).with_filters(filters);

    let outcome = engine
        .process(&IncomingNotification::new("a@x.com", "150"))
        .unwrap();

    assert_eq!((outcome.tasks_sent, outcome.filtered), (1, 1));
    assert_eq!(queue.tasks()[0].task.message["id"], "m2");
}

#[test]
fn test_handle_envelope() {
    let store = store_with("a@x.com", record("p1", None));
    let engine = engine(
        store.clone(),
        Arc::new(ScriptedGateway::new()),
        Arc::new(InMemoryTaskQueue::new()),
    );

    let outcome = engine.handle_envelope(&push_body("a@x.com", 4242));
    assert!(outcome.is_ok());
    assert_eq!(stored_watermark(&*store, "p1"), Some(Watermark::new("4242")));

    let outcome = engine.handle_envelope(br#"{"message": {"messageId": "1"}}"#);
    assert_eq!(outcome.status, OutcomeStatus::Ignored);
    assert_eq!(outcome.reason.as_deref(), Some(reasons::NO_DATA));

    let outcome = engine.handle_envelope(br#"{"message": {"data": "!!not base64!!"}}"#);
    assert_eq!(outcome.status, OutcomeStatus::Rejected);
    assert_eq!(outcome.reason.as_deref(), Some(reasons::INVALID_FORMAT));
}

#[test]
fn test_manual_trigger_latest_message() {
    let store = store_with("a@x.com", record("p1", Some("100")));
    let gateway = Arc::new(
        ScriptedGateway::new()
            .with_recent(&["m9", "m8"])
            .with_message("m9", &["IMPORTANT"]),
    );
    let queue = Arc::new(InMemoryTaskQueue::new());
    let engine = engine(store.clone(), gateway.clone(), queue.clone());

    let outcome = engine
        .process_manual(&OwnerAddress::new("a@x.com"), None)
        .unwrap();

    assert!(outcome.is_ok());
    assert_eq!(outcome.messages_found, 1);
    assert_eq!(outcome.tasks_sent, 1);
    assert!(outcome.watermark.is_none());
    assert_eq!(queue.tasks()[0].task.message["id"], "m9");
    assert_eq!(gateway.change_calls.load(Ordering::SeqCst), 0);
    assert_eq!(stored_watermark(&*store, "p1"), Some(Watermark::new("100")));
}

#[test]
fn test_manual_trigger_explicit_message() {
    let store = store_with("a@x.com", record("p1", None));
    let gateway = Arc::new(ScriptedGateway::new().with_message("m5", &["INBOX"]));
    let queue = Arc::new(InMemoryTaskQueue::new());
    let engine = engine(store.clone(), gateway, queue.clone());

    let outcome = engine
        .process_manual(&OwnerAddress::new("a@x.com"), Some(&MessageId::new("m5")))
        .unwrap();

    assert_eq!(outcome.messages_found, 1);
    assert_eq!(outcome.filtered, 1);
    assert!(queue.is_empty());
    assert_eq!(stored_watermark(&*store, "p1"), None);
}

#[test]
fn test_manual_trigger_unknown_message() {
    let store = store_with("a@x.com", record("p1", Some("100")));
    let gateway = Arc::new(ScriptedGateway::new().with_message("m5", &["IMPORTANT"]));
    let queue = Arc::new(InMemoryTaskQueue::new());
    let engine = engine(store.clone(), gateway.clone(), queue.clone());

    let outcome = engine
        .process_manual(&OwnerAddress::new("a@x.com"), Some(&MessageId::new("gone")))
        .unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Ignored);
    assert_eq!(outcome.reason.as_deref(), Some(reasons::NO_MESSAGES_FOUND));
    assert_eq!(outcome.messages_found, 0);
    assert!(queue.is_empty());
    assert_eq!(gateway.fetch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stored_watermark(&*store, "p1"), Some(Watermark::new("100")));
}

#[test]
fn test_manual_trigger_empty_mailbox() {
    let store = store_with("a@x.com", record("p1", None));
    let engine = engine(
        store,
        Arc::new(ScriptedGateway::new()),
        Arc::new(InMemoryTaskQueue::new()),
    );

    let outcome = engine
        .process_manual(&OwnerAddress::new("a@x.com"), None)
        .unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Ignored);
    assert_eq!(outcome.reason.as_deref(), Some(reasons::NO_MESSAGES_FOUND));

    let err = engine
        .process_manual(&OwnerAddress::new(""), None)
        .unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
}

#[test]
fn test_owner_gate_serializes_same_owner() {
    let store = store_with("a@x.com", record("p1", Some("100")));
    let gateway = Arc::new(ScriptedGateway {
        change_delay: Some(Duration::from_millis(30)),
        ..ScriptedGateway::new()
    });
    let engine = Arc::new(
        engine(store, gateway.clone(), Arc::new(InMemoryTaskQueue::new()))
            .with_owner_gate(Arc::new(OwnerGate::new())),
    );

    let handles: Vec<_> = (0..4u64)
        .map(|i| {
            let engine = engine.clone();
            thread::spawn(move || {
                let watermark = (101 + i).to_string();
                engine
                    .process(&IncomingNotification::new("a@x.com", watermark))
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }
    assert_eq!(gateway.change_calls.load(Ordering::SeqCst), 4);
    assert_eq!(gateway.max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn test_sqlite_end_to_end() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path().join("mailhook.test.sqlite")).unwrap());
    store
        .register_owner(&OwnerId::new("person-0001"), "A@X.com", None)
        .unwrap();
    store
        .upsert_credential(&record("person-0001", Some("100")))
        .unwrap();

    let gateway = Arc::new(
        ScriptedGateway::new()
            .with_changes("100", &["m1", "m2"])
            .with_message("m1", &["INBOX", "IMPORTANT"])
            .with_message("m2", &["INBOX"]),
    );
    let engine = engine(store.clone(), gateway, store.clone());

    let outcome = engine.handle_envelope(&push_body("a@x.com", 150));
    assert_eq!(outcome.status, OutcomeStatus::Ok);
    assert_eq!(
        (outcome.messages_found, outcome.tasks_sent, outcome.filtered),
        (2, 1, 1)
    );

    let pending = store.pending_tasks(DEFAULT_QUEUE, 10).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].task.owner_id, OwnerId::new("person-0001"));
    assert_eq!(pending[0].task.message["labelIds"], json!(["INBOX", "IMPORTANT"]));
    assert_eq!(
        stored_watermark(&*store, "person-0001"),
        Some(Watermark::new("150"))
    );

    // Reopening sees the committed state
    drop(engine);
    let reopened = SqliteStore::new(dir.path().join("mailhook.test.sqlite")).unwrap();
    assert_eq!(
        stored_watermark(&reopened, "person-0001"),
        Some(Watermark::new("150"))
    );
    assert_eq!(reopened.count_tasks().unwrap(), 1);
}
