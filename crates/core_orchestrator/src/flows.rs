use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use core_types::{
    ClientError, ErrorCategory, FileArtifact, Flow, FlowDefinition, FlowId, FlowPatch, FlowStore,
    ListState,
};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::conversation::ConversationLog;

pub const ACCEPTED_FLOW_EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

/// What the flow upload control produced.
#[derive(Debug, Clone)]
pub enum FlowSource {
    File(FileArtifact),
    /// The picker rejected the input before it was read.
    Invalid(String),
}

/// A pending, unconfirmed flow deletion. Dropping it cancels the deletion.
#[must_use = "dropping a deletion request cancels it"]
#[derive(Debug)]
pub struct DeletionRequest {
    flow: Flow,
}

impl DeletionRequest {
    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn prompt(&self) -> String {
        format!(
            "Delete flow \"{}\"? This cannot be undone.",
            self.flow.name
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowPanel {
    pub list: ListState<Vec<Flow>>,
    pub selector_open: bool,
    pub uploading: bool,
    pub upload_error: Option<String>,
    pub deleting: Option<FlowId>,
}

impl FlowPanel {
    /// Banner shown in place of the list, if any.
    pub fn banner(&self) -> Option<String> {
        match &self.list {
            ListState::Failed(message) => Some(format!("Error loading flows: {message}")),
            ListState::Loaded(flows) if flows.is_empty() => Some("No flows found".to_string()),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct FlowState {
    panel: FlowPanel,
    exclude_examples: bool,
    applied_seq: u64,
}

/// Lists, selects, uploads, updates and deletes flows.
pub struct FlowRegistry {
    store: Arc<dyn FlowStore>,
    log: ConversationLog,
    state: Mutex<FlowState>,
    next_seq: AtomicU64,
}

impl FlowRegistry {
    pub fn new(store: Arc<dyn FlowStore>, log: ConversationLog, exclude_examples: bool) -> Self {
        Self {
            store,
            log,
            state: Mutex::new(FlowState {
                panel: FlowPanel::default(),
                exclude_examples,
                applied_seq: 0,
            }),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn panel(&self) -> FlowPanel {
        self.state.lock().panel.clone()
    }

    pub fn flows(&self) -> Vec<Flow> {
        self.state
            .lock()
            .panel
            .list
            .loaded()
            .cloned()
            .unwrap_or_default()
    }

    pub fn find(&self, id: &FlowId) -> Option<Flow> {
        self.state
            .lock()
            .panel
            .list
            .loaded()
            .and_then(|flows| flows.iter().find(|flow| &flow.id == id).cloned())
    }

    /// Opens the selector; every open refetches so the list is never stale.
    pub async fn open_selector(&self) -> Result<Vec<Flow>, ClientError> {
        let exclude = {
            let mut state = self.state.lock();
            state.panel.selector_open = true;
            state.exclude_examples
        };
        self.list_flows(exclude).await
    }

    pub fn close_selector(&self) {
        self.state.lock().panel.selector_open = false;
    }

    pub async fn list_flows(&self, exclude_examples: bool) -> Result<Vec<Flow>, ClientError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.state.lock();
            state.exclude_examples = exclude_examples;
            state.panel.list = ListState::Loading;
        }

        let result = self.store.list_flows(exclude_examples).await;

        let mut state = self.state.lock();
        let current = seq > state.applied_seq;
        if current {
            state.applied_seq = seq;
        } else {
            debug!(seq, "discarding superseded flow listing");
        }
        match result {
            Ok(flows) => {
                debug!(count = flows.len(), "flows listed");
                if current {
                    state.panel.list = ListState::Loaded(flows.clone());
                }
                Ok(flows)
            }
            Err(err) => {
                warn!(error = %err, "failed to list flows");
                if current {
                    state.panel.list = ListState::Failed(err.to_string());
                }
                Err(ClientError::backend(ErrorCategory::ScopedRetryable, &err))
            }
        }
    }

    /// Retries with the filter of the last attempt.
    pub async fn retry_list_flows(&self) -> Result<Vec<Flow>, ClientError> {
        let exclude = self.state.lock().exclude_examples;
        self.list_flows(exclude).await
    }

    pub fn request_deletion(&self, flow: Flow) -> DeletionRequest {
        DeletionRequest { flow }
    }

    /// Deletes the flow remotely. The list refetch is left to the caller so it
    /// can first settle the active scope.
    pub(crate) async fn delete(&self, request: &DeletionRequest) -> Result<(), ClientError> {
        let flow = &request.flow;
        self.state.lock().panel.deleting = Some(flow.id.clone());
        let result = self.store.delete_flow(&flow.id).await;
        self.state.lock().panel.deleting = None;

        result.map_err(|err| {
            warn!(flow_id = %flow.id, error = %err, "failed to delete flow");
            self.log
                .error(format!("Failed to delete flow \"{}\": {err}", flow.name));
            ClientError::backend(ErrorCategory::Operation, &err)
        })?;
        info!(flow_id = %flow.id, "flow deleted");
        Ok(())
    }

    pub async fn upload_flow(
        &self,
        source: FlowSource,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Flow, ClientError> {
        self.state.lock().panel.upload_error = None;

        let artifact = match source {
            FlowSource::File(artifact) => artifact,
            FlowSource::Invalid(message) => {
                return Err(self.upload_failed(ClientError::Validation(message)));
            }
        };
        let definition = parse_flow_definition(&artifact, name, description)
            .map_err(|err| self.upload_failed(err))?;

        self.state.lock().panel.uploading = true;
        let result = self
            .store
            .upload_flow(&artifact.file_name, &definition)
            .await;
        self.state.lock().panel.uploading = false;

        let flow = result.map_err(|err| {
            warn!(file_name = %artifact.file_name, error = %err, "flow upload failed");
            self.upload_failed(ClientError::backend(ErrorCategory::Operation, &err))
        })?;

        self.upsert(flow.clone());
        info!(flow_id = %flow.id, name = %flow.name, "flow uploaded");
        self.log
            .system(format!("Flow \"{}\" uploaded successfully.", flow.name));
        Ok(flow)
    }

    pub async fn update_flow(&self, id: &FlowId, patch: &FlowPatch) -> Result<Flow, ClientError> {
        if patch.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(ClientError::Validation(
                "Flow name cannot be empty".to_string(),
            ));
        }

        let flow = self.store.update_flow(id, patch).await.map_err(|err| {
            warn!(flow_id = %id, error = %err, "flow update failed");
            self.log.error(format!("Failed to update flow: {err}"));
            ClientError::backend(ErrorCategory::Operation, &err)
        })?;

        self.upsert(flow.clone());
        self.log.system(format!("Flow \"{}\" updated.", flow.name));
        Ok(flow)
    }

    pub(crate) fn reset(&self) {
        let mut state = self.state.lock();
        state.panel = FlowPanel::default();
        state.applied_seq = self.next_seq.load(Ordering::SeqCst);
    }

    fn upsert(&self, flow: Flow) {
        let mut state = self.state.lock();
        if let ListState::Loaded(flows) = &mut state.panel.list {
            match flows.iter_mut().find(|existing| existing.id == flow.id) {
                Some(existing) => *existing = flow,
                None => flows.push(flow),
            }
        }
    }

    fn upload_failed(&self, error: ClientError) -> ClientError {
        let message = error.to_string();
        self.state.lock().panel.upload_error = Some(message.clone());
        self.log.error(format!("Flow upload failed: {message}"));
        error
    }
}

/// Parses a picked `.json`/`.yaml`/`.yml` file into the document to upload.
///
/// Non-empty `name`/`description` override the document's own values; the
/// description falls back to an empty string.
pub fn parse_flow_definition(
    artifact: &FileArtifact,
    name: Option<&str>,
    description: Option<&str>,
) -> Result<FlowDefinition, ClientError> {
    let extension = artifact.extension().unwrap_or_default();
    let mut document: Value = match extension.as_str() {
        "json" => serde_json::from_slice(&artifact.bytes).map_err(|err| {
            ClientError::Validation(format!("Invalid JSON in {}: {err}", artifact.file_name))
        })?,
        "yaml" | "yml" => serde_yaml::from_slice(&artifact.bytes).map_err(|err| {
            ClientError::Validation(format!("Invalid YAML in {}: {err}", artifact.file_name))
        })?,
        _ => {
            return Err(ClientError::Validation(format!(
                "Unsupported flow file \"{}\". Use one of: {}",
                artifact.file_name,
                ACCEPTED_FLOW_EXTENSIONS.map(|ext| format!(".{ext}")).join(", ")
            )));
        }
    };

    let Some(fields) = document.as_object_mut() else {
        return Err(ClientError::Validation(
            "Flow definition must be an object".to_string(),
        ));
    };

    let name = non_empty(name)
        .or_else(|| non_empty(fields.get("name").and_then(Value::as_str)))
        .unwrap_or_else(|| artifact.stem().to_string());
    let description = non_empty(description)
        .or_else(|| non_empty(fields.get("description").and_then(Value::as_str)))
        .unwrap_or_default();

    fields.insert("name".to_string(), Value::String(name.clone()));
    fields.insert(
        "description".to_string(),
        Value::String(description.clone()),
    );

    Ok(FlowDefinition {
        name,
        description,
        data: document,
    })
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
