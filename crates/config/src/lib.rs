use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub local_encryption_enabled: bool,
}

/// Request paths on the backend, relative to `base_url`.
///
/// `{flow_id}` in a path is replaced with the flow identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointConfig {
    pub login: String,
    pub validate: String,
    pub flows: String,
    pub flow_upload: String,
    pub flow_item: String,
    pub files: String,
    pub file_upload: String,
    pub status: String,
    pub models: String,
    pub send_message: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            login: "/api/auth/login".to_string(),
            validate: "/api/auth/me".to_string(),
            flows: "/api/flows".to_string(),
            flow_upload: "/api/flows/upload".to_string(),
            flow_item: "/api/flows/{flow_id}".to_string(),
            files: "/api/files".to_string(),
            file_upload: "/api/upload".to_string(),
            status: "/api/status".to_string(),
            models: "/api/models".to_string(),
            send_message: "/api/messages/send".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub endpoints: EndpointConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: default_timeout_secs(),
            endpoints: EndpointConfig::default(),
        }
    }
}

const fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_true")]
    pub exclude_example_flows: bool,
    #[serde(default = "default_true")]
    pub archive_transcript: bool,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            exclude_example_flows: true,
            archive_transcript: true,
        }
    }
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub schema_version: u32,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            backend: BackendConfig::default(),
            dashboard: DashboardConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("config.json"),
        }
    }

    pub fn from_default_location() -> Result<Self> {
        let mut dir = dirs::config_dir().context("failed to resolve config_dir")?;
        dir.push("flowdeck");
        Ok(Self::from_dir(dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        if !self.path.exists() {
            let config = AppConfig::default();
            self.save(&config)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let mut config: AppConfig =
            serde_json::from_str(&raw).context("failed to parse app config json")?;
        if normalize(&mut config) {
            self.save(&config)?;
        }
        Ok(config)
    }

    pub fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let text = serde_json::to_string_pretty(config).context("failed to serialize config")?;
        fs::write(&self.path, text)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

/// Repairs values a hand-edited config may carry. Returns whether anything
/// changed.
fn normalize(config: &mut AppConfig) -> bool {
    let mut changed = false;

    if config.schema_version < CURRENT_SCHEMA_VERSION {
        warn!(
            from = config.schema_version,
            to = CURRENT_SCHEMA_VERSION,
            "migrating app config schema"
        );
        config.schema_version = CURRENT_SCHEMA_VERSION;
        changed = true;
    }

    let trimmed = config.backend.base_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        warn!("backend base_url is empty, using default");
        config.backend.base_url = DEFAULT_BASE_URL.to_string();
        changed = true;
    } else if trimmed != config.backend.base_url {
        config.backend.base_url = trimmed.to_string();
        changed = true;
    }

    if config.backend.request_timeout_secs == 0 {
        config.backend.request_timeout_secs = default_timeout_secs();
        changed = true;
    }

    changed
}
