use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use core_orchestrator::{Backends, Dashboard, DashboardOptions, FlowSource, SessionState};
use core_types::{
    ActiveFlow, AuthBackend, AuthStatus, ChatBackend, ChatReply, ClientError, FileArtifact,
    FileRecord, FileStore, Flow, FlowDefinition, FlowId, FlowPatch, FlowStore, Sender,
    ServerStatus, SessionStorage, TokenPair, UserIdentity,
};
use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
struct MemoryStorage(Mutex<BTreeMap<String, String>>);

impl MemoryStorage {
    fn keys(&self) -> Vec<String> {
        self.0.lock().keys().cloned().collect()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.0.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.0.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.0.lock().remove(key);
        Ok(())
    }
}

/// In-memory backend recording every call it receives.
#[derive(Default)]
struct FakeServer {
    valid_token: Mutex<Option<String>>,
    flows: Mutex<Vec<Flow>>,
    files: Mutex<HashMap<FlowId, Vec<FileRecord>>>,
    failing_uploads: Mutex<HashSet<String>>,
    fail_list_flows: AtomicBool,
    calls: Mutex<Vec<String>>,
    validate_gate: Mutex<Option<Arc<Notify>>>,
    chat_gate: Mutex<Option<Arc<Notify>>>,
    list_files_gates: Mutex<HashMap<FlowId, Arc<Notify>>>,
    next_id: AtomicU64,
}

impl FakeServer {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn add_flow(&self, id: &str, name: &str) -> Flow {
        let flow = Flow::new(id, name);
        self.flows.lock().push(flow.clone());
        flow
    }

    fn add_file(&self, flow: &str, name: &str) {
        self.files
            .lock()
            .entry(FlowId::new(flow))
            .or_default()
            .push(record(name));
    }

    fn gate_list_files(&self, flow: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.list_files_gates
            .lock()
            .insert(FlowId::new(flow), Arc::clone(&gate));
        gate
    }
}

fn record(name: &str) -> FileRecord {
    FileRecord {
        file_id: name.to_string(),
        file_path: format!("./uploads/{name}"),
        file_name: name.to_string(),
        file_size: 1,
        file_type: "txt".to_string(),
    }
}

#[async_trait]
impl AuthBackend for FakeServer {
    async fn login(&self, username: &str, password: &str) -> Result<TokenPair> {
        self.record("login");
        if password != "secret" {
            bail!("Incorrect username or password");
        }
        let token = format!("token-{username}");
        *self.valid_token.lock() = Some(token.clone());
        Ok(TokenPair {
            access_token: token,
            refresh_token: Some("refresh".to_string()),
            token_type: "bearer".to_string(),
        })
    }

    async fn validate(&self, access_token: &str) -> Result<UserIdentity> {
        self.record("validate");
        let gate = self.validate_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.valid_token.lock().as_deref() != Some(access_token) {
            bail!("Could not validate credentials");
        }
        Ok(UserIdentity {
            id: "1".to_string(),
            username: "alice".to_string(),
        })
    }
}

#[async_trait]
impl FlowStore for FakeServer {
    async fn list_flows(&self, exclude_examples: bool) -> Result<Vec<Flow>> {
        self.record(format!("list_flows:{exclude_examples}"));
        if self.fail_list_flows.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(self.flows.lock().clone())
    }

    async fn upload_flow(&self, file_name: &str, definition: &FlowDefinition) -> Result<Flow> {
        self.record(format!("upload_flow:{file_name}"));
        let id = format!("uploaded-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let mut flow = Flow::new(id, definition.name.clone());
        flow.description = Some(definition.description.clone());
        self.flows.lock().push(flow.clone());
        Ok(flow)
    }

    async fn update_flow(&self, flow_id: &FlowId, patch: &FlowPatch) -> Result<Flow> {
        self.record(format!("update_flow:{flow_id}"));
        let mut flows = self.flows.lock();
        let Some(flow) = flows.iter_mut().find(|flow| &flow.id == flow_id) else {
            bail!("Flow not found");
        };
        if let Some(name) = &patch.name {
            flow.name = name.clone();
        }
        if let Some(description) = &patch.description {
            flow.description = Some(description.clone());
        }
        Ok(flow.clone())
    }

    async fn delete_flow(&self, flow_id: &FlowId) -> Result<()> {
        self.record(format!("delete_flow:{flow_id}"));
        self.flows.lock().retain(|flow| &flow.id != flow_id);
        Ok(())
    }
}

#[async_trait]
impl FileStore for FakeServer {
    async fn server_status(&self, flow_id: &FlowId) -> Result<ServerStatus> {
        self.record(format!("status:{flow_id}"));
        Ok(ServerStatus {
            ollama_connected: true,
            qdrant_connected: true,
        })
    }

    async fn embedding_models(&self) -> Result<Vec<String>> {
        self.record("models");
        Ok(vec!["nomic-embed-text".to_string()])
    }

    async fn list_files(&self, flow_id: &FlowId) -> Result<Vec<FileRecord>> {
        self.record(format!("list_files:{flow_id}"));
        let snapshot = self.files.lock().get(flow_id).cloned().unwrap_or_default();
        let gate = self.list_files_gates.lock().remove(flow_id);
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(snapshot)
    }

    async fn upload_file(&self, flow_id: &FlowId, file: &FileArtifact) -> Result<FileRecord> {
        self.record(format!("upload_file:{}", file.file_name));
        if self.failing_uploads.lock().contains(&file.file_name) {
            bail!("file too large");
        }
        let stored = record(&file.file_name);
        self.files
            .lock()
            .entry(flow_id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn delete_file(&self, flow_id: &FlowId, file_path: &str) -> Result<()> {
        self.record(format!("delete_file:{file_path}"));
        if let Some(files) = self.files.lock().get_mut(flow_id) {
            files.retain(|file| file.file_path != file_path);
        }
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for FakeServer {
    async fn send_message(
        &self,
        flow_id: &FlowId,
        session_id: Option<&str>,
        message: &str,
    ) -> Result<ChatReply> {
        self.record(format!("send_message:{flow_id}"));
        let gate = self.chat_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(ChatReply {
            response: format!("echo: {message}"),
            session_id: session_id.unwrap_or("session-1").to_string(),
        })
    }
}

struct Harness {
    server: Arc<FakeServer>,
    storage: Arc<MemoryStorage>,
    dashboard: Dashboard,
}

impl Harness {
    fn new() -> Self {
        Self::with(Arc::new(FakeServer::default()), Arc::new(MemoryStorage::default()))
    }

    fn with(server: Arc<FakeServer>, storage: Arc<MemoryStorage>) -> Self {
        let backends = Backends {
            auth: server.clone(),
            flows: server.clone(),
            files: server.clone(),
            chat: server.clone(),
        };
        let session = Arc::new(SessionState::new(storage.clone()));
        let dashboard = Dashboard::new(backends, session, DashboardOptions::default());
        Self {
            server,
            storage,
            dashboard,
        }
    }

    /// Same server and storage, fresh client state, as after a page reload.
    fn reload(self) -> Self {
        Self::with(self.server, self.storage)
    }

    async fn select(&self, flow: &Flow) {
        self.dashboard.select_flow(flow);
        self.dashboard.refresh_scope().await;
    }

    fn file_names(&self) -> Vec<String> {
        self.dashboard
            .files()
            .files()
            .into_iter()
            .map(|file| file.file_name)
            .collect()
    }

    fn entries(&self, sender: Sender) -> Vec<String> {
        self.dashboard
            .log()
            .entries()
            .into_iter()
            .filter(|entry| entry.sender == sender)
            .map(|entry| entry.text)
            .collect()
    }
}

#[tokio::test]
async fn missing_credential_is_unauthenticated_without_network() {
    let h = Harness::new();
    assert_eq!(h.dashboard.guard().status(), AuthStatus::Unknown);
    assert_eq!(h.dashboard.enter().await, AuthStatus::Unauthenticated);
    assert_eq!(h.server.count("validate"), 0);
}

#[tokio::test]
async fn status_stays_unknown_until_validation_answers() {
    let h = Harness::new();
    h.dashboard.login("alice", "secret").await.expect("login");

    let gate = Arc::new(Notify::new());
    *h.server.validate_gate.lock() = Some(Arc::clone(&gate));
    let (status, _) = tokio::join!(h.dashboard.enter(), async {
        tokio::task::yield_now().await;
        assert_eq!(h.dashboard.guard().status(), AuthStatus::Unknown);
        gate.notify_one();
    });
    assert_eq!(status, AuthStatus::Authenticated);
    assert_eq!(h.dashboard.guard().status(), AuthStatus::Authenticated);
}

#[tokio::test]
async fn rejected_credential_is_unauthenticated() {
    let h = Harness::new();
    h.storage.put("auth:access_token", "expired").expect("seed");
    assert_eq!(h.dashboard.enter().await, AuthStatus::Unauthenticated);
    assert_eq!(h.server.count("validate"), 1);
}

#[tokio::test]
async fn wrong_password_reports_error() {
    let h = Harness::new();
    let err = h
        .dashboard
        .login("alice", "nope")
        .await
        .expect_err("must fail");
    assert_eq!(err.to_string(), "Incorrect username or password");
    assert!(h.storage.keys().is_empty());
}

#[tokio::test]
async fn logout_during_check_wins() {
    let h = Harness::new();
    h.dashboard.login("alice", "secret").await.expect("login");

    let gate = Arc::new(Notify::new());
    *h.server.validate_gate.lock() = Some(Arc::clone(&gate));
    let (status, _) = tokio::join!(h.dashboard.enter(), async {
        tokio::task::yield_now().await;
        h.dashboard.logout();
        gate.notify_one();
    });

    assert_eq!(status, AuthStatus::Unauthenticated);
    assert_eq!(h.dashboard.guard().status(), AuthStatus::Unauthenticated);
}

#[tokio::test]
async fn status_watchers_see_logout() {
    let h = Harness::new();
    h.dashboard.login("alice", "secret").await.expect("login");
    let mut status = h.dashboard.guard().subscribe();
    assert_eq!(*status.borrow_and_update(), AuthStatus::Authenticated);

    h.dashboard.logout();

    assert!(status.has_changed().expect("sender alive"));
    assert_eq!(*status.borrow_and_update(), AuthStatus::Unauthenticated);
}

#[tokio::test]
async fn logout_removes_every_persisted_key() {
    let h = Harness::new();
    let flow = h.server.add_flow("f1", "Support");
    h.dashboard.login("alice", "secret").await.expect("login");
    h.select(&flow).await;
    h.dashboard.send_message("hello").await.expect("chat");
    assert!(!h.storage.keys().is_empty());

    h.dashboard.logout();

    assert!(h.storage.keys().is_empty(), "left: {:?}", h.storage.keys());
    assert_eq!(h.dashboard.active_flow(), ActiveFlow::NoFlow);
    assert!(h.dashboard.log().is_empty());
    assert!(h.dashboard.files().files().is_empty());
    assert_eq!(h.dashboard.guard().status(), AuthStatus::Unauthenticated);
}

#[tokio::test]
async fn flow_dependent_actions_require_a_flow() {
    let h = Harness::new();

    let err = h
        .dashboard
        .upload_files(vec![FileArtifact::new("a.txt", b"a".to_vec())])
        .await
        .expect_err("must fail");
    assert!(matches!(err, ClientError::NoActiveFlow { .. }));
    assert!(h.dashboard.send_message("hi").await.is_err());
    assert!(h.dashboard.delete_file("./uploads/a.txt").await.is_err());

    assert!(h.server.calls().is_empty());
    assert_eq!(
        h.entries(Sender::Error),
        vec![
            "Please select a flow first to upload files.",
            "Please select a flow first to send messages.",
            "Please select a flow first to delete files.",
        ]
    );
    assert_eq!(
        h.dashboard.files().panel().operation_error.as_deref(),
        Some("Please select a flow first to delete files.")
    );
}

#[tokio::test]
async fn selection_persists_and_restores_after_reload() {
    let h = Harness::new();
    let flow = h.server.add_flow("f1", "Support");
    h.server.add_file("f1", "report.pdf");
    h.storage.put("scope:chat_session_id", "old").expect("seed");

    h.select(&flow).await;
    assert_eq!(h.file_names(), vec!["report.pdf"]);
    assert_eq!(h.storage.get("scope:active_flow_id").expect("get").as_deref(), Some("f1"));
    assert_eq!(h.storage.get("scope:chat_session_id").expect("get"), None);
    assert_eq!(h.entries(Sender::System).len(), 1);
    assert!(!h.dashboard.flows().panel().selector_open);

    let h = h.reload();
    assert!(h.dashboard.active_flow().is_flow(&FlowId::new("f1")));
    assert!(h.file_names().is_empty());
    h.dashboard.refresh_scope().await;
    assert_eq!(h.file_names(), vec!["report.pdf"]);
}

#[tokio::test]
async fn listing_for_a_previous_flow_is_discarded() {
    let h = Harness::new();
    let a = h.server.add_flow("a", "Alpha");
    let b = h.server.add_flow("b", "Beta");
    h.server.add_file("a", "alpha.txt");
    h.server.add_file("b", "beta.txt");

    h.dashboard.select_flow(&a);
    let gate = h.server.gate_list_files("a");
    let (slow, _) = tokio::join!(h.dashboard.files().list_files(&a.id), async {
        h.select(&b).await;
        gate.notify_one();
    });

    assert_eq!(slow.expect("listing").len(), 1);
    assert_eq!(h.file_names(), vec!["beta.txt"]);
}

#[tokio::test]
async fn older_listing_for_same_flow_does_not_overwrite_newer() {
    let h = Harness::new();
    let a = h.server.add_flow("a", "Alpha");
    let b = h.server.add_flow("b", "Beta");
    h.server.add_file("a", "first.txt");

    h.dashboard.select_flow(&a);
    let gate = h.server.gate_list_files("a");
    let (_, _) = tokio::join!(h.dashboard.files().list_files(&a.id), async {
        h.select(&b).await;
        h.server.add_file("a", "second.txt");
        h.select(&a).await;
        gate.notify_one();
    });

    assert_eq!(h.file_names(), vec!["first.txt", "second.txt"]);
}

#[tokio::test]
async fn flow_list_failure_shows_banner_and_retry_keeps_filter() {
    let h = Harness::new();
    h.server.add_flow("f1", "Support");
    h.server.fail_list_flows.store(true, Ordering::SeqCst);

    assert!(h.dashboard.open_flow_selector().await.is_err());
    let panel = h.dashboard.flows().panel();
    assert!(panel.selector_open);
    assert_eq!(
        panel.banner().as_deref(),
        Some("Error loading flows: connection refused")
    );

    h.server.fail_list_flows.store(false, Ordering::SeqCst);
    let flows = h.dashboard.retry_flows().await.expect("retry");
    assert_eq!(flows.len(), 1);
    assert_eq!(h.dashboard.flows().panel().banner(), None);
    assert_eq!(h.server.count("list_flows:true"), 2);
}

#[tokio::test]
async fn empty_flow_list_says_so() {
    let h = Harness::new();
    h.dashboard.open_flow_selector().await.expect("list");
    assert_eq!(
        h.dashboard.flows().panel().banner().as_deref(),
        Some("No flows found")
    );
}

#[tokio::test]
async fn deleting_active_flow_clears_scope() {
    let h = Harness::new();
    let flow = h.server.add_flow("f1", "Support");
    h.server.add_flow("f2", "Other");
    h.server.add_file("f1", "report.pdf");
    h.dashboard.open_flow_selector().await.expect("list");
    h.select(&flow).await;
    let before = h.entries(Sender::System).len();

    let request = h.dashboard.request_flow_deletion(flow.clone());
    assert!(request.prompt().contains("Support"));
    h.dashboard
        .confirm_flow_deletion(request)
        .await
        .expect("delete");

    assert_eq!(h.dashboard.active_flow(), ActiveFlow::NoFlow);
    assert!(h.file_names().is_empty());
    assert_eq!(h.storage.get("scope:active_flow_id").expect("get"), None);
    let system = h.entries(Sender::System);
    assert_eq!(system.len(), before + 1);
    assert!(system[before].contains("Please select another flow"));
    assert_eq!(h.dashboard.flows().flows().len(), 1);
}

#[tokio::test]
async fn deleting_other_flow_keeps_scope() {
    let h = Harness::new();
    let active = h.server.add_flow("f1", "Support");
    let other = h.server.add_flow("f2", "Other");
    h.select(&active).await;

    let request = h.dashboard.request_flow_deletion(other);
    h.dashboard
        .confirm_flow_deletion(request)
        .await
        .expect("delete");

    assert!(h.dashboard.active_flow().is_flow(&active.id));
    assert_eq!(h.entries(Sender::System).last().map(String::as_str), Some("Flow \"Other\" deleted."));
}

#[tokio::test]
async fn dropped_deletion_request_deletes_nothing() {
    let h = Harness::new();
    let flow = h.server.add_flow("f1", "Support");
    drop(h.dashboard.request_flow_deletion(flow));
    assert_eq!(h.server.count("delete_flow"), 0);
    assert_eq!(h.server.flows.lock().len(), 1);
}

#[tokio::test]
async fn flow_upload_applies_overrides_and_updates_cache() {
    let h = Harness::new();
    h.dashboard.open_flow_selector().await.expect("list");

    let artifact = FileArtifact::new(
        "flow.json",
        br#"{"name":"From file","data":{"nodes":[]}}"#.to_vec(),
    );
    let flow = h
        .dashboard
        .upload_flow(FlowSource::File(artifact), Some("Foo"), Some(""))
        .await
        .expect("upload");

    assert_eq!(flow.name, "Foo");
    assert_eq!(flow.description.as_deref(), Some(""));
    assert_eq!(h.dashboard.flows().flows(), vec![flow]);
    assert_eq!(h.dashboard.flows().panel().upload_error, None);
}

#[tokio::test]
async fn rejected_flow_source_makes_no_request() {
    let h = Harness::new();
    let err = h
        .dashboard
        .upload_flow(FlowSource::Invalid("Only .json, .yaml or .yml files".to_string()), None, None)
        .await
        .expect_err("must fail");

    assert!(matches!(err, ClientError::Validation(_)));
    assert!(h.server.calls().is_empty());
    assert_eq!(
        h.dashboard.flows().panel().upload_error.as_deref(),
        Some("Only .json, .yaml or .yml files")
    );
}

#[tokio::test]
async fn dropped_flow_file_is_uploaded_and_activated() {
    let h = Harness::new();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("Intake.yaml");
    std::fs::write(&path, "name: ignored\ndata:\n  nodes: []\n").expect("write");

    let flow = h.dashboard.upload_flow_file(&path).await.expect("upload");

    assert_eq!(flow.name, "Intake");
    assert!(h.dashboard.active_flow().is_flow(&flow.id));
    assert_eq!(h.server.count("list_flows"), 1);
    assert_eq!(h.dashboard.active_flow_record(), Some(flow));
}

#[tokio::test]
async fn updated_flow_replaces_cached_entry() {
    let h = Harness::new();
    let flow = h.server.add_flow("f1", "Support");
    h.dashboard.open_flow_selector().await.expect("list");

    let patch = FlowPatch {
        name: Some("Helpdesk".to_string()),
        description: None,
    };
    h.dashboard.update_flow(&flow.id, &patch).await.expect("update");

    assert_eq!(h.dashboard.flows().flows()[0].name, "Helpdesk");
}

#[tokio::test]
async fn partial_batch_failure_resets_upload_state() {
    let h = Harness::new();
    let flow = h.server.add_flow("f1", "Support");
    h.select(&flow).await;
    h.server
        .failing_uploads
        .lock()
        .insert("big.bin".to_string());
    h.dashboard.stage_files(vec![
        FileArtifact::new("a.txt", b"a".to_vec()),
        FileArtifact::new("big.bin", b"b".to_vec()),
        FileArtifact::new("c.txt", b"c".to_vec()),
    ]);
    let listings = h.server.count("list_files");

    let err = h
        .dashboard
        .upload_staged_files()
        .await
        .expect_err("must fail");

    assert!(matches!(err, ClientError::Backend { .. }));
    let panel = h.dashboard.files().panel();
    assert!(!panel.uploading);
    assert!(panel.staged.is_empty());
    assert_eq!(
        panel.operation_error.as_deref(),
        Some("Failed to upload big.bin: file too large")
    );
    assert_eq!(h.server.count("upload_file:c.txt"), 0);
    assert_eq!(h.server.count("list_files"), listings);
    assert_eq!(h.entries(Sender::Error).len(), 1);
}

#[tokio::test]
async fn upload_refreshes_listing_and_reports() {
    let h = Harness::new();
    let flow = h.server.add_flow("F1", "Support");
    h.select(&flow).await;

    h.dashboard
        .upload_files(vec![FileArtifact::new("report.pdf", b"%PDF".to_vec())])
        .await
        .expect("upload");

    assert_eq!(h.file_names(), vec!["report.pdf"]);
    assert_eq!(h.server.count("list_files:F1"), 2);
    let last = h.entries(Sender::System).pop().expect("system entry");
    assert!(last.contains("report.pdf") && last.contains("F1"), "{last}");
}

#[tokio::test]
async fn deleting_file_refreshes_listing() {
    let h = Harness::new();
    let flow = h.server.add_flow("f1", "Support");
    h.server.add_file("f1", "a.txt");
    h.server.add_file("f1", "b.txt");
    h.select(&flow).await;

    h.dashboard
        .delete_file("./uploads/a.txt")
        .await
        .expect("delete");

    assert_eq!(h.file_names(), vec!["b.txt"]);
    assert_eq!(
        h.entries(Sender::System).last().map(String::as_str),
        Some("Deleted a.txt from flow f1.")
    );
}

#[tokio::test]
async fn chat_session_id_is_scoped_to_flow() {
    let h = Harness::new();
    let flow = h.server.add_flow("f1", "Support");
    h.select(&flow).await;

    let reply = h.dashboard.send_message("hello").await.expect("chat");
    assert_eq!(reply.response, "echo: hello");
    assert_eq!(
        h.dashboard.session().chat_session_id().as_deref(),
        Some("session-1")
    );
    assert_eq!(h.entries(Sender::Assistant), vec!["echo: hello"]);
}

#[tokio::test]
async fn late_reply_after_flow_switch_keeps_no_session() {
    let h = Harness::new();
    let a = h.server.add_flow("a", "Alpha");
    let b = h.server.add_flow("b", "Beta");
    h.select(&a).await;

    let gate = Arc::new(Notify::new());
    *h.server.chat_gate.lock() = Some(Arc::clone(&gate));
    let (reply, _) = tokio::join!(h.dashboard.send_message("hello"), async {
        tokio::task::yield_now().await;
        h.dashboard.select_flow(&b);
        gate.notify_one();
    });

    assert!(reply.is_ok());
    assert_eq!(h.dashboard.session().chat_session_id(), None);
}

#[tokio::test]
async fn vanished_active_flow_falls_back_to_no_flow() {
    let h = Harness::new();
    h.server.add_flow("f2", "Other");
    h.storage.put("scope:active_flow_id", "gone").expect("seed");
    let h = h.reload();
    assert!(h.dashboard.active_flow().is_flow(&FlowId::new("gone")));

    h.dashboard.open_flow_selector().await.expect("list");

    assert_eq!(h.dashboard.active_flow(), ActiveFlow::NoFlow);
    assert_eq!(h.dashboard.active_flow_record(), None);
}

#[tokio::test]
async fn scope_reaction_loads_status_and_models() {
    let h = Harness::new();
    let flow = h.server.add_flow("f1", "Support");
    h.select(&flow).await;
    let models = h.dashboard.list_embedding_models().await;

    let panel = h.dashboard.files().panel();
    assert_eq!(
        panel.server_status,
        Some(ServerStatus {
            ollama_connected: true,
            qdrant_connected: true,
        })
    );
    assert_eq!(models, vec!["nomic-embed-text"]);
    assert_eq!(panel.embedding_models, models);
}
