use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub type MessageId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct FlowId(String);

impl FlowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlowId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The scope every flow-dependent operation is checked against.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ActiveFlow {
    #[default]
    NoFlow,
    Flow(FlowId),
}

impl ActiveFlow {
    pub fn flow_id(&self) -> Option<&FlowId> {
        match self {
            ActiveFlow::NoFlow => None,
            ActiveFlow::Flow(id) => Some(id),
        }
    }

    pub fn is_flow(&self, id: &FlowId) -> bool {
        self.flow_id() == Some(id)
    }
}

impl From<Option<FlowId>> for ActiveFlow {
    fn from(value: Option<FlowId>) -> Self {
        value.map_or(ActiveFlow::NoFlow, ActiveFlow::Flow)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    Unknown,
    Authenticated,
    Unauthenticated,
}

impl AuthStatus {
    pub fn is_resolved(self) -> bool {
        !matches!(self, AuthStatus::Unknown)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub is_component: bool,
}

impl Flow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: FlowId::new(id),
            name: name.into(),
            description: None,
            updated_at: None,
            folder_id: None,
            is_component: false,
        }
    }
}

/// Structural flow document sent to the flow store on upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowDefinition {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct FlowPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A file picked by the user before it is parsed or uploaded.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FileArtifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl FileArtifact {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
    }

    pub fn stem(&self) -> &str {
        std::path::Path::new(&self.file_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.file_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FileRecord {
    #[serde(default)]
    pub file_id: String,
    pub file_path: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub file_type: String,
}

impl FileRecord {
    pub fn display_name(&self) -> String {
        if self.file_name.is_empty() {
            display_name_from_path(&self.file_path)
        } else {
            self.file_name.clone()
        }
    }
}

/// Human readable name for a stored file path: the last path segment with the
/// server's `<uuid>-` or `<uuid>_` storage prefix removed.
pub fn display_name_from_path(path: &str) -> String {
    let segment = path
        .rsplit(|c: char| c == '/' || c == '\\')
        .find(|part| !part.is_empty())
        .unwrap_or(path);
    if let Some((prefix, rest)) = segment.get(..36).zip(segment.get(37..)) {
        let separator = segment.as_bytes().get(36).copied();
        if matches!(separator, Some(b'-') | Some(b'_'))
            && Uuid::parse_str(prefix).is_ok()
            && !rest.is_empty()
        {
            return rest.to_string();
        }
    }
    segment.to_string()
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct ServerStatus {
    #[serde(default)]
    pub ollama_connected: bool,
    #[serde(default)]
    pub qdrant_connected: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
    System,
    Error,
}

impl Sender {
    pub fn as_str(self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
            Sender::System => "system",
            Sender::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MessageEntry {
    pub id: MessageId,
    pub seq: u64,
    pub sender: Sender,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UserIdentity {
    #[serde(default)]
    pub id: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
}

/// Loading state of a list that is fetched on demand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ListState<T> {
    #[default]
    Idle,
    Loading,
    Loaded(T),
    Failed(String),
}

impl<T> ListState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, ListState::Loading)
    }

    pub fn loaded(&self) -> Option<&T> {
        match self {
            ListState::Loaded(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ListState::Failed(message) => Some(message),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorCategory {
    Critical,
    ScopedRetryable,
    Operation,
    BestEffort,
}

#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum ClientError {
    #[error("not authenticated")]
    Unauthenticated,
    #[error("Please select a flow first to {action}.")]
    NoActiveFlow { action: String },
    #[error("{0}")]
    Validation(String),
    #[error("{message}")]
    Backend {
        category: ErrorCategory,
        message: String,
    },
}

impl ClientError {
    pub fn backend(category: ErrorCategory, error: &anyhow::Error) -> Self {
        Self::Backend {
            category,
            message: error.to_string(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ClientError::Unauthenticated => ErrorCategory::Critical,
            ClientError::NoActiveFlow { .. } | ClientError::Validation(_) => {
                ErrorCategory::Operation
            }
            ClientError::Backend { category, .. } => *category,
        }
    }
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<TokenPair>;
    async fn validate(&self, access_token: &str) -> Result<UserIdentity>;
}

#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn list_flows(&self, exclude_examples: bool) -> Result<Vec<Flow>>;
    async fn upload_flow(&self, file_name: &str, definition: &FlowDefinition) -> Result<Flow>;
    async fn update_flow(&self, flow_id: &FlowId, patch: &FlowPatch) -> Result<Flow>;
    async fn delete_flow(&self, flow_id: &FlowId) -> Result<()>;
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn server_status(&self, flow_id: &FlowId) -> Result<ServerStatus>;
    async fn embedding_models(&self) -> Result<Vec<String>>;
    async fn list_files(&self, flow_id: &FlowId) -> Result<Vec<FileRecord>>;
    async fn upload_file(&self, flow_id: &FlowId, file: &FileArtifact) -> Result<FileRecord>;
    async fn delete_file(&self, flow_id: &FlowId, file_path: &str) -> Result<()>;
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send_message(
        &self,
        flow_id: &FlowId,
        session_id: Option<&str>,
        message: &str,
    ) -> Result<ChatReply>;
}

/// Durable key/value storage for client state that must survive a reload.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn put(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        for key in keys {
            self.remove(key)?;
        }
        Ok(())
    }
}

pub trait CredentialSource: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}
