use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use core_types::{
    ActiveFlow, ClientError, ErrorCategory, FileArtifact, FileRecord, FileStore, FlowId,
    ServerStatus, display_name_from_path,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::conversation::ConversationLog;

/// Visible state of the file panel for the current scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilePanel {
    pub files: Vec<FileRecord>,
    pub loading: bool,
    pub list_error: Option<String>,
    pub operation_error: Option<String>,
    pub uploading: bool,
    pub deleting: Option<String>,
    pub staged: Vec<String>,
    pub server_status: Option<ServerStatus>,
    pub embedding_models: Vec<String>,
}

impl FilePanel {
    pub fn banner(&self) -> Option<String> {
        self.list_error
            .as_ref()
            .map(|message| format!("Error loading files: {message}"))
    }
}

#[derive(Debug, Default)]
struct FileState {
    /// Flow the cached records belong to.
    owner: Option<FlowId>,
    records: Vec<FileRecord>,
    applied_seq: u64,
    loading: bool,
    list_error: Option<String>,
    operation_error: Option<String>,
    uploading: bool,
    deleting: Option<String>,
    staged: Vec<FileArtifact>,
    server_status: Option<ServerStatus>,
    embedding_models: Vec<String>,
}

/// Files, upload and delete for the active flow.
///
/// Every listing is tagged with the flow it was issued for and a sequence
/// number; a result is applied only if that flow is still active and no newer
/// listing has been applied.
pub struct FileCollectionClient {
    store: Arc<dyn FileStore>,
    log: ConversationLog,
    scope: watch::Receiver<ActiveFlow>,
    state: Mutex<FileState>,
    next_seq: AtomicU64,
}

impl FileCollectionClient {
    pub fn new(
        store: Arc<dyn FileStore>,
        log: ConversationLog,
        scope: watch::Receiver<ActiveFlow>,
    ) -> Self {
        Self {
            store,
            log,
            scope,
            state: Mutex::new(FileState::default()),
            next_seq: AtomicU64::new(0),
        }
    }

    fn in_scope(&self, flow: &FlowId) -> bool {
        self.scope.borrow().is_flow(flow)
    }

    pub fn panel(&self) -> FilePanel {
        let state = self.state.lock();
        let current = self.scope.borrow().flow_id().cloned();
        let owned = current.is_some() && state.owner == current;
        FilePanel {
            files: if owned {
                state.records.clone()
            } else {
                Vec::new()
            },
            loading: state.loading,
            list_error: if owned {
                state.list_error.clone()
            } else {
                None
            },
            operation_error: state.operation_error.clone(),
            uploading: state.uploading,
            deleting: state.deleting.clone(),
            staged: state
                .staged
                .iter()
                .map(|file| file.file_name.clone())
                .collect(),
            server_status: state.server_status,
            embedding_models: state.embedding_models.clone(),
        }
    }

    pub fn files(&self) -> Vec<FileRecord> {
        self.panel().files
    }

    /// Drops everything tied to the previous scope.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.owner = None;
        state.records.clear();
        state.loading = false;
        state.list_error = None;
        state.operation_error = None;
        state.server_status = None;
    }

    pub async fn check_server_status(&self, flow: &FlowId) -> Option<ServerStatus> {
        match self.store.server_status(flow).await {
            Ok(status) => {
                if self.in_scope(flow) {
                    self.state.lock().server_status = Some(status);
                }
                Some(status)
            }
            Err(err) => {
                warn!(flow_id = %flow, error = %err, "server status check failed");
                None
            }
        }
    }

    pub async fn list_embedding_models(&self) -> Vec<String> {
        match self.store.embedding_models().await {
            Ok(models) => {
                self.state.lock().embedding_models = models.clone();
                models
            }
            Err(err) => {
                warn!(error = %err, "failed to list embedding models");
                Vec::new()
            }
        }
    }

    pub async fn list_files(&self, flow: &FlowId) -> Result<Vec<FileRecord>, ClientError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        if self.in_scope(flow) {
            self.state.lock().loading = true;
        }

        let result = self.store.list_files(flow).await;

        {
            let mut state = self.state.lock();
            if !self.in_scope(flow) || seq <= state.applied_seq {
                debug!(flow_id = %flow, seq, "discarding stale file listing");
            } else {
                state.applied_seq = seq;
                if state.owner.as_ref() != Some(flow) {
                    state.owner = Some(flow.clone());
                    state.records.clear();
                }
                if seq == self.next_seq.load(Ordering::SeqCst) {
                    state.loading = false;
                }
                match &result {
                    Ok(records) => {
                        state.records = records.clone();
                        state.list_error = None;
                    }
                    Err(err) => state.list_error = Some(err.to_string()),
                }
            }
        }

        result.map_err(|err| {
            warn!(flow_id = %flow, error = %err, "failed to list files");
            ClientError::backend(ErrorCategory::ScopedRetryable, &err)
        })
    }

    /// Replaces the pending selection of the file-input control.
    pub fn stage_files(&self, files: Vec<FileArtifact>) {
        self.state.lock().staged = files;
    }

    pub fn staged(&self) -> Vec<FileArtifact> {
        self.state.lock().staged.clone()
    }

    /// Uploads a batch sequentially, stopping at the first failure.
    ///
    /// The uploading flag and the staged selection are reset however the
    /// batch ends, including cancellation.
    pub async fn upload_files(
        &self,
        flow: &FlowId,
        files: Vec<FileArtifact>,
    ) -> Result<Vec<FileRecord>, ClientError> {
        if files.is_empty() {
            return Err(ClientError::Validation(
                "Select at least one file to upload".to_string(),
            ));
        }

        let cleanup = UploadCleanup::begin(&self.state);
        let mut uploaded = Vec::with_capacity(files.len());
        for file in &files {
            match self.store.upload_file(flow, file).await {
                Ok(record) => uploaded.push(record),
                Err(err) => {
                    warn!(flow_id = %flow, file_name = %file.file_name, error = %err, "upload failed");
                    let message = format!("Failed to upload {}: {err}", file.file_name);
                    self.state.lock().operation_error = Some(message.clone());
                    self.log.error(message);
                    return Err(ClientError::backend(ErrorCategory::Operation, &err));
                }
            }
        }
        drop(cleanup);

        let names: Vec<&str> = files.iter().map(|file| file.file_name.as_str()).collect();
        info!(flow_id = %flow, count = files.len(), "files uploaded");
        self.log.system(format!(
            "Uploaded {} to flow {flow}.",
            names.join(", ")
        ));
        // The listing error, if any, already lands in the panel banner.
        self.list_files(flow).await.ok();
        Ok(uploaded)
    }

    pub async fn delete_file(&self, flow: &FlowId, file_path: &str) -> Result<(), ClientError> {
        let name = display_name_from_path(file_path);
        {
            let mut state = self.state.lock();
            state.deleting = Some(file_path.to_string());
            state.operation_error = None;
        }
        let result = self.store.delete_file(flow, file_path).await;
        self.state.lock().deleting = None;

        if let Err(err) = result {
            warn!(flow_id = %flow, file_path, error = %err, "delete failed");
            let message = format!("Failed to delete {name}: {err}");
            self.state.lock().operation_error = Some(message.clone());
            self.log.error(message);
            return Err(ClientError::backend(ErrorCategory::Operation, &err));
        }

        info!(flow_id = %flow, file_path, "file deleted");
        self.log.system(format!("Deleted {name} from flow {flow}."));
        self.list_files(flow).await.ok();
        Ok(())
    }

    pub(crate) fn set_operation_error(&self, message: String) {
        self.state.lock().operation_error = Some(message);
    }

    pub(crate) fn reset(&self) {
        let mut state = self.state.lock();
        let applied_seq = self.next_seq.load(Ordering::SeqCst);
        *state = FileState {
            applied_seq,
            ..FileState::default()
        };
    }
}

struct UploadCleanup<'a> {
    state: &'a Mutex<FileState>,
}

impl<'a> UploadCleanup<'a> {
    fn begin(state: &'a Mutex<FileState>) -> Self {
        {
            let mut state = state.lock();
            state.uploading = true;
            state.operation_error = None;
        }
        Self { state }
    }
}

impl Drop for UploadCleanup<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.uploading = false;
        state.staged.clear();
    }
}
