use std::sync::Arc;

use anyhow::Result;
use core_types::{ActiveFlow, CredentialSource, FlowId, SessionStorage, TokenPair, UserIdentity};
use tracing::{info, warn};

/// Every durable key the client owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKey {
    AccessToken,
    RefreshToken,
    User,
    ActiveFlowId,
    ChatSessionId,
}

impl SessionKey {
    pub const ALL: [SessionKey; 5] = [
        SessionKey::AccessToken,
        SessionKey::RefreshToken,
        SessionKey::User,
        SessionKey::ActiveFlowId,
        SessionKey::ChatSessionId,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SessionKey::AccessToken => "auth:access_token",
            SessionKey::RefreshToken => "auth:refresh_token",
            SessionKey::User => "auth:user",
            SessionKey::ActiveFlowId => "scope:active_flow_id",
            SessionKey::ChatSessionId => "scope:chat_session_id",
        }
    }
}

/// Process-wide persisted client state.
///
/// Components never touch the storage directly; `reset` enumerates every key
/// so logout cannot leave a credential or scope behind.
pub struct SessionState {
    storage: Arc<dyn SessionStorage>,
}

impl SessionState {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self { storage }
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(SessionKey::AccessToken)
            .filter(|token| !token.trim().is_empty())
    }

    pub fn store_tokens(&self, tokens: &TokenPair) -> Result<()> {
        self.write(SessionKey::AccessToken, Some(&tokens.access_token))?;
        self.write(SessionKey::RefreshToken, tokens.refresh_token.as_deref())
    }

    pub fn user(&self) -> Option<UserIdentity> {
        let raw = self.read(SessionKey::User)?;
        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(err) => {
                warn!(error = %err, "discarding malformed cached user");
                None
            }
        }
    }

    pub fn store_user(&self, user: &UserIdentity) -> Result<()> {
        let raw = serde_json::to_string(user)?;
        self.write(SessionKey::User, Some(&raw))
    }

    pub fn active_flow(&self) -> ActiveFlow {
        self.read(SessionKey::ActiveFlowId)
            .filter(|id| !id.is_empty())
            .map(FlowId::new)
            .into()
    }

    pub fn set_active_flow(&self, active: &ActiveFlow) -> Result<()> {
        self.write(
            SessionKey::ActiveFlowId,
            active.flow_id().map(FlowId::as_str),
        )
    }

    pub fn chat_session_id(&self) -> Option<String> {
        self.read(SessionKey::ChatSessionId)
    }

    pub fn set_chat_session_id(&self, session_id: Option<&str>) -> Result<()> {
        self.write(SessionKey::ChatSessionId, session_id)
    }

    /// Removes every owned key in one storage write.
    pub fn reset(&self) -> Result<()> {
        let keys: Vec<&str> = SessionKey::ALL.iter().map(|key| key.as_str()).collect();
        self.storage.remove_all(&keys)?;
        info!("session state cleared");
        Ok(())
    }

    fn read(&self, key: SessionKey) -> Option<String> {
        match self.storage.get(key.as_str()) {
            Ok(value) => value,
            Err(err) => {
                warn!(key = key.as_str(), error = %err, "failed to read session state");
                None
            }
        }
    }

    fn write(&self, key: SessionKey, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) => self.storage.put(key.as_str(), value),
            None => self.storage.remove(key.as_str()),
        }
    }
}

impl CredentialSource for SessionState {
    fn bearer_token(&self) -> Option<String> {
        self.access_token()
    }
}
