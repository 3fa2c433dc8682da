use std::sync::Arc;

use chrono::{DateTime, Utc};
use checklet_core::auth::{AuthError, FederatedCredential, LocalAuthenticator};
use checklet_core::session::SessionContext;
use checklet_core::storage::{FileStore, KeyValueStore, MemoryStore};
use checklet_core::task::{Priority, Task, decode_tasks};
use checklet_core::view::FilterMode;
use checklet_core::workspace::Workspace;
use checklet_core::writer::WriteQueue;
use tempfile::tempdir;

fn at(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).expect("valid timestamp")
}

struct Harness {
    kv: Arc<dyn KeyValueStore>,
    auth: LocalAuthenticator,
    session: SessionContext,
    workspace: Workspace,
}

impl Harness {
    fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        let writer = WriteQueue::spawn(kv.clone()).expect("writer");
        let auth = LocalAuthenticator::new(kv.clone()).expect("auth");
        let mut session = SessionContext::restore(kv.clone());
        let workspace = Workspace::attach(&mut session, kv.clone(), writer, at(0));
        Self {
            kv,
            auth,
            session,
            workspace,
        }
    }

    fn register(&mut self, email: &str) {
        self.session
            .register(&self.auth, email, "hunter22")
            .expect("register");
        self.workspace.sync(at(0));
    }

    fn texts(&self, mode: FilterMode, query: &str) -> Vec<String> {
        self.workspace
            .view(mode, query)
            .iter()
            .map(|t| t.text.clone())
            .collect()
    }
}

#[test]
fn buy_milk_call_mom_scenario() {
    let mut h = Harness::new(Arc::new(MemoryStore::new()));
    h.register("ada@example.com");

    let milk = h
        .workspace
        .add_task("Buy milk", Priority::Medium, Some("inbox"), at(1_000))
        .expect("added");
    h.workspace
        .add_task("Call mom", Priority::High, Some("inbox"), at(2_000))
        .expect("added");

    assert_eq!(h.texts(FilterMode::Active, ""), ["Call mom", "Buy milk"]);

    let store = h.workspace.tasks_mut().expect("ready");
    assert!(store.toggle(&milk.id));
    assert_eq!(h.texts(FilterMode::Active, ""), ["Call mom"]);
    assert_eq!(h.texts(FilterMode::All, ""), ["Call mom", "Buy milk"]);
    assert_eq!(h.texts(FilterMode::Completed, "MILK"), ["Buy milk"]);
}

#[test]
fn signed_out_workspace_does_nothing() {
    let mut h = Harness::new(Arc::new(MemoryStore::new()));
    assert!(!h.workspace.is_ready());
    assert!(h.workspace.tasks_mut().is_none());
    assert!(
        h.workspace
            .add_task("ignored", Priority::Medium, None, at(1))
            .is_none()
    );
    assert!(h.workspace.view(FilterMode::All, "").is_empty());
}

#[test]
fn fresh_user_gets_inbox_and_unknown_selection_is_empty() {
    let mut h = Harness::new(Arc::new(MemoryStore::new()));
    h.register("ada@example.com");

    let lists = h.workspace.lists();
    assert_eq!(lists.lists().len(), 1);
    assert_eq!(lists.lists()[0].id, "inbox");

    h.workspace
        .add_task("visible elsewhere", Priority::Low, None, at(1))
        .expect("added");
    h.workspace.lists_mut().expect("ready").select("missing");
    for mode in [FilterMode::All, FilterMode::Active, FilterMode::Completed] {
        assert!(h.workspace.view(mode, "").is_empty());
    }
    assert!(
        h.workspace
            .add_task("nowhere to go", Priority::Low, None, at(2))
            .is_none(),
        "tasks need an existing list"
    );
}

#[test]
fn collections_are_scoped_per_user_and_survive_logout() {
    let mut h = Harness::new(Arc::new(MemoryStore::new()));
    h.register("ada@example.com");
    h.workspace
        .add_task("ada's task", Priority::Medium, None, at(1))
        .expect("added");

    h.session.logout(&h.auth).expect("logout");
    h.workspace.sync(at(0));
    assert!(!h.workspace.is_ready());
    assert!(h.workspace.tasks().tasks().is_empty());

    h.register("bob@example.com");
    assert!(h.workspace.tasks().tasks().is_empty());

    h.session.logout(&h.auth).expect("logout");
    h.session
        .login(&h.auth, "ada@example.com", "hunter22")
        .expect("login");
    h.workspace.sync(at(0));
    assert_eq!(h.texts(FilterMode::All, ""), ["ada's task"]);
}

#[test]
fn failed_login_keeps_current_session_and_data() {
    let mut h = Harness::new(Arc::new(MemoryStore::new()));
    h.register("ada@example.com");
    h.workspace
        .add_task("keep me", Priority::Medium, None, at(1))
        .expect("added");

    let err = h
        .session
        .login(&h.auth, "ada@example.com", "wrong-password")
        .expect_err("bad password");
    assert!(matches!(err, AuthError::WrongPassword));
    assert_eq!(err.user_message(), "Incorrect password. Please try again.");

    h.workspace.sync(at(0));
    assert!(h.workspace.is_ready());
    assert_eq!(h.texts(FilterMode::All, ""), ["keep me"]);
}

#[test]
fn loading_suspends_until_resolved() {
    let mut h = Harness::new(Arc::new(MemoryStore::new()));
    h.register("ada@example.com");

    // The workspace only sees snapshots on sync; a second watch exposes the
    // loading bracket itself.
    let watch = h.session.subscribe();
    h.session
        .federated_sign_in(
            &h.auth,
            &FederatedCredential {
                provider: "google".to_string(),
                subject: "42".to_string(),
                email: "ada@example.com".to_string(),
                name: None,
                photo_url: None,
            },
        )
        .expect("sign in");
    let seen = watch.pending();
    assert!(seen.iter().any(|s| s.loading));
    assert!(seen.last().is_some_and(|s| !s.loading));

    h.workspace.sync(at(0));
    assert_eq!(
        h.workspace.key().map(|k| k.user_id().to_string()),
        Some("google:42".to_string())
    );
}

#[test]
fn persisted_records_round_trip_through_disk() {
    let temp = tempdir().expect("tempdir");
    let user_id;
    {
        let kv: Arc<dyn KeyValueStore> =
            Arc::new(FileStore::open(temp.path()).expect("open store"));
        let mut h = Harness::new(kv);
        h.register("ada@example.com");
        user_id = h.session.user().map(|u| u.id.clone()).expect("user");
        h.workspace
            .add_task("first", Priority::Low, None, at(10))
            .expect("added");
        let second = h
            .workspace
            .add_task("second", Priority::High, None, at(20))
            .expect("added");
        h.workspace
            .tasks_mut()
            .expect("ready")
            .toggle(&second.id);
        h.workspace.flush();
    }

    // A new process restores the session and reloads the same records.
    let kv: Arc<dyn KeyValueStore> =
        Arc::new(FileStore::open(temp.path()).expect("reopen store"));
    let h = Harness::new(kv);
    assert!(h.workspace.is_ready());

    let raw = h
        .kv
        .get(&format!("todos:{user_id}"))
        .expect("get")
        .expect("persisted");
    let decoded: Vec<Task> = decode_tasks(&raw, at(0)).expect("decode");
    assert_eq!(decoded, h.workspace.tasks().tasks());
    assert_eq!(decoded[0].text, "second");
    assert!(decoded[0].done);
    assert_eq!(decoded[1].priority, Priority::Low);
    assert_eq!(decoded[1].created_at, at(10));
}

#[test]
fn legacy_records_are_migrated_on_load() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let mut h = Harness::new(kv.clone());
    h.register("ada@example.com");
    let user_id = h.session.user().map(|u| u.id.clone()).expect("user");
    h.session.logout(&h.auth).expect("logout");
    h.workspace.sync(at(0));

    kv.set(
        &format!("todos:{user_id}"),
        r#"[{"id":1700000000000,"text":"old one"},{"id":"2","text":"odd","priority":"urgent","createdAt":5,"done":true,"listId":"inbox"}]"#,
    )
    .expect("seed");

    h.session
        .login(&h.auth, "ada@example.com", "hunter22")
        .expect("login");
    h.workspace.sync(at(99));

    let tasks = h.workspace.tasks().tasks();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].id, "1700000000000");
    assert_eq!(tasks[0].priority, Priority::Medium);
    assert_eq!(tasks[0].created_at, at(99));
    assert_eq!(tasks[0].list_id, "inbox");
    assert!(!tasks[0].done);
    assert_eq!(tasks[1].priority, Priority::Medium);
    assert_eq!(tasks[1].created_at, at(5));
    assert!(tasks[1].done);
}
