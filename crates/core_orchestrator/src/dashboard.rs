use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use core_types::{
    ActiveFlow, AuthBackend, AuthStatus, ChatBackend, ChatReply, ClientError, ErrorCategory,
    FileArtifact, FileRecord, FileStore, Flow, FlowId, FlowPatch, FlowStore,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::conversation::ConversationLog;
use crate::files::FileCollectionClient;
use crate::flows::{DeletionRequest, FlowRegistry, FlowSource};
use crate::guard::SessionGuard;
use crate::scope::{self, ScopeCoordinator};
use crate::session::SessionState;

#[derive(Clone)]
pub struct Backends {
    pub auth: Arc<dyn AuthBackend>,
    pub flows: Arc<dyn FlowStore>,
    pub files: Arc<dyn FileStore>,
    pub chat: Arc<dyn ChatBackend>,
}

#[derive(Debug, Clone)]
pub struct DashboardOptions {
    pub exclude_example_flows: bool,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self {
            exclude_example_flows: true,
        }
    }
}

/// The protected view: owns the active flow and wires every component to it.
///
/// All flow-dependent actions pass through [`Dashboard::require_flow`], which
/// is the only place a missing scope is reported.
pub struct Dashboard {
    session: Arc<SessionState>,
    guard: SessionGuard,
    flows: FlowRegistry,
    files: Arc<FileCollectionClient>,
    log: ConversationLog,
    chat: Arc<dyn ChatBackend>,
    scope: watch::Sender<ActiveFlow>,
    /// Bumped on logout; work started before it must not persist anything.
    generation: AtomicU64,
}

impl Dashboard {
    pub fn new(backends: Backends, session: Arc<SessionState>, options: DashboardOptions) -> Self {
        let log = ConversationLog::new();
        let (scope, scope_rx) = watch::channel(session.active_flow());
        Self {
            guard: SessionGuard::new(backends.auth, Arc::clone(&session)),
            flows: FlowRegistry::new(backends.flows, log.clone(), options.exclude_example_flows),
            files: Arc::new(FileCollectionClient::new(backends.files, log.clone(), scope_rx)),
            chat: backends.chat,
            session,
            log,
            scope,
            generation: AtomicU64::new(0),
        }
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    pub fn flows(&self) -> &FlowRegistry {
        &self.flows
    }

    pub fn files(&self) -> &FileCollectionClient {
        &self.files
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn active_flow(&self) -> ActiveFlow {
        self.scope.borrow().clone()
    }

    /// The active flow's record, if it is present in the loaded list.
    pub fn active_flow_record(&self) -> Option<Flow> {
        self.active_flow()
            .flow_id()
            .and_then(|id| self.flows.find(id))
    }

    pub fn coordinator(&self) -> ScopeCoordinator {
        ScopeCoordinator::new(Arc::clone(&self.files), self.scope.subscribe())
    }

    /// Runs the scope reaction inline for the current scope.
    pub async fn refresh_scope(&self) {
        let scope = self.active_flow();
        scope::react(&self.files, &scope).await;
    }

    /// Entry into the protected view always re-validates the credential.
    pub async fn enter(&self) -> AuthStatus {
        self.guard.check_authenticated().await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthStatus, ClientError> {
        self.guard.login(username, password).await
    }

    /// Clears credentials, scope and every component's state in one step.
    pub fn logout(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.guard.invalidate();
        if let Err(err) = self.session.reset() {
            error!(error = %err, "failed to clear persisted session");
        }
        self.scope.send_replace(ActiveFlow::NoFlow);
        self.files.reset();
        self.flows.reset();
        self.log.reset();
        info!("logged out");
    }

    /// Resolves the active flow for `action`, or records that one is needed.
    pub fn require_flow(&self, action: &str) -> Result<FlowId, ClientError> {
        if let ActiveFlow::Flow(id) = self.active_flow() {
            return Ok(id);
        }
        let err = ClientError::NoActiveFlow {
            action: action.to_string(),
        };
        self.log.error(err.to_string());
        self.files.set_operation_error(err.to_string());
        Err(err)
    }

    pub async fn open_flow_selector(&self) -> Result<Vec<Flow>, ClientError> {
        let flows = self.flows.open_selector().await?;
        self.reconcile_active_flow(&flows);
        Ok(flows)
    }

    pub async fn retry_flows(&self) -> Result<Vec<Flow>, ClientError> {
        let flows = self.flows.retry_list_flows().await?;
        self.reconcile_active_flow(&flows);
        Ok(flows)
    }

    pub fn select_flow(&self, flow: &Flow) {
        self.set_active_flow(ActiveFlow::Flow(flow.id.clone()));
        self.flows.close_selector();
        self.log.system(format!(
            "Selected flow \"{}\". Files and chat now use this flow.",
            flow.name
        ));
    }

    pub fn request_flow_deletion(&self, flow: Flow) -> DeletionRequest {
        self.flows.request_deletion(flow)
    }

    pub async fn confirm_flow_deletion(&self, request: DeletionRequest) -> Result<(), ClientError> {
        let generation = self.generation();
        self.flows.delete(&request).await?;
        if !self.is_current(generation) {
            return Ok(());
        }

        let flow = request.flow();
        if self.active_flow().is_flow(&flow.id) {
            self.set_active_flow(ActiveFlow::NoFlow);
            self.log.system(format!(
                "Flow \"{}\" was deleted. Please select another flow to continue.",
                flow.name
            ));
        } else {
            self.log.system(format!("Flow \"{}\" deleted.", flow.name));
        }
        // A failed refetch shows in the flow list banner.
        self.flows.retry_list_flows().await.ok();
        Ok(())
    }

    pub async fn upload_flow(
        &self,
        source: FlowSource,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Flow, ClientError> {
        self.flows.upload_flow(source, name, description).await
    }

    /// File-drop upload: name from the file stem, then refresh and activate.
    pub async fn upload_flow_file(&self, path: &Path) -> Result<Flow, ClientError> {
        let generation = self.generation();
        let source = match tokio::fs::read(path).await {
            Ok(bytes) => {
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                FlowSource::File(FileArtifact::new(file_name, bytes))
            }
            Err(err) => {
                FlowSource::Invalid(format!("Could not read {}: {err}", path.display()))
            }
        };
        let stem = match &source {
            FlowSource::File(artifact) => Some(artifact.stem().to_string()),
            FlowSource::Invalid(_) => None,
        };

        let flow = self
            .flows
            .upload_flow(source, stem.as_deref(), None)
            .await?;
        if !self.is_current(generation) {
            return Ok(flow);
        }
        self.flows.retry_list_flows().await.ok();
        let flow = self.flows.find(&flow.id).unwrap_or(flow);
        self.select_flow(&flow);
        Ok(flow)
    }

    pub async fn update_flow(&self, id: &FlowId, patch: &FlowPatch) -> Result<Flow, ClientError> {
        self.flows.update_flow(id, patch).await
    }

    pub async fn refresh_files(&self) -> Result<Vec<FileRecord>, ClientError> {
        let flow = self.require_flow("view files")?;
        self.files.list_files(&flow).await
    }

    pub async fn list_embedding_models(&self) -> Vec<String> {
        self.files.list_embedding_models().await
    }

    pub fn stage_files(&self, files: Vec<FileArtifact>) {
        self.files.stage_files(files);
    }

    pub async fn upload_files(&self, files: Vec<FileArtifact>) -> Result<Vec<FileRecord>, ClientError> {
        let flow = self.require_flow("upload files")?;
        self.files.upload_files(&flow, files).await
    }

    pub async fn upload_staged_files(&self) -> Result<Vec<FileRecord>, ClientError> {
        let flow = self.require_flow("upload files")?;
        let staged = self.files.staged();
        self.files.upload_files(&flow, staged).await
    }

    pub async fn delete_file(&self, file_path: &str) -> Result<(), ClientError> {
        let flow = self.require_flow("delete files")?;
        self.files.delete_file(&flow, file_path).await
    }

    /// Sends a chat message in the active flow's conversation.
    ///
    /// The returned session id is kept only if the flow is still active when
    /// the reply arrives.
    pub async fn send_message(&self, text: &str) -> Result<ChatReply, ClientError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::Validation(
                "Message cannot be empty".to_string(),
            ));
        }
        let flow = self.require_flow("send messages")?;
        let generation = self.generation();
        self.log.user(text);

        let session_id = self.session.chat_session_id();
        let reply = match self
            .chat
            .send_message(&flow, session_id.as_deref(), text)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                warn!(flow_id = %flow, error = %err, "chat request failed");
                self.log.error(format!("Error: {err}"));
                return Err(ClientError::backend(ErrorCategory::Operation, &err));
            }
        };

        self.log.assistant(reply.response.clone());
        if self.is_current(generation) && self.active_flow().is_flow(&flow) {
            if let Err(err) = self.session.set_chat_session_id(Some(&reply.session_id)) {
                warn!(error = %err, "failed to persist chat session id");
            }
        }
        Ok(reply)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    fn set_active_flow(&self, next: ActiveFlow) {
        let changed = self.scope.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next.clone();
            true
        });
        if !changed {
            return;
        }

        self.files.clear();
        if let Err(err) = self.session.set_active_flow(&next) {
            warn!(error = %err, "failed to persist active flow");
        }
        if let Err(err) = self.session.set_chat_session_id(None) {
            warn!(error = %err, "failed to clear chat session id");
        }
        info!(active_flow = ?next, "active flow changed");
    }

    /// A persisted flow that the server no longer lists is dropped back to
    /// no flow.
    fn reconcile_active_flow(&self, flows: &[Flow]) {
        let ActiveFlow::Flow(id) = self.active_flow() else {
            return;
        };
        if flows.iter().any(|flow| flow.id == id) {
            return;
        }
        warn!(flow_id = %id, "active flow is no longer available");
        self.set_active_flow(ActiveFlow::NoFlow);
        self.log.system(
            "The previously selected flow is no longer available. Please select a flow.",
        );
    }
}
