use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use config::{BackendConfig, EndpointConfig};
use core_types::{
    AuthBackend, ChatBackend, ChatReply, CredentialSource, FileArtifact, FileRecord, FileStore,
    Flow, FlowDefinition, FlowId, FlowPatch, FlowStore, ServerStatus, TokenPair, UserIdentity,
};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

/// Non-success answer from the backend, carrying its `detail` message.
#[derive(Debug, Error)]
#[error("{detail} ({status})")]
pub struct RequestFailed {
    pub status: StatusCode,
    pub detail: String,
}

/// Dashboard backend over HTTP. Every request after login carries the
/// bearer token read from `credentials` at send time.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    endpoints: EndpointConfig,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpBackend {
    pub fn new(config: &BackendConfig, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            endpoints: config.endpoints.clone(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn flow_url(&self, flow_id: &FlowId) -> String {
        self.url(&self.endpoints.flow_item.replace("{flow_id}", flow_id.as_str()))
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = self.credentials.bearer_token() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                    .context("invalid authorization header")?,
            );
        }
        Ok(headers)
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<String> {
        self.execute(request.headers(self.auth_headers()?), action)
            .await
    }

    async fn send_json(&self, request: RequestBuilder, action: &str) -> Result<Value> {
        decode(&self.send(request, action).await?, action)
    }

    async fn execute(&self, request: RequestBuilder, action: &str) -> Result<String> {
        let response = request
            .send()
            .await
            .with_context(|| format!("{action} request failed"))?;

        let status = response.status();
        let text = response.text().await?;
        debug!(action, %status, "backend responded");
        if !status.is_success() {
            return Err(RequestFailed {
                status,
                detail: error_detail(status, &text),
            }
            .into());
        }
        Ok(text)
    }
}

fn decode(text: &str, action: &str) -> Result<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).with_context(|| format!("invalid {action} response"))
}

#[async_trait]
impl AuthBackend for HttpBackend {
    async fn login(&self, username: &str, password: &str) -> Result<TokenPair> {
        let request = self
            .client
            .post(self.url(&self.endpoints.login))
            .form(&[("username", username), ("password", password)]);
        let value = decode(&self.execute(request, "login").await?, "login")?;
        serde_json::from_value(value).context("login response has no access token")
    }

    async fn validate(&self, access_token: &str) -> Result<UserIdentity> {
        let request = self
            .client
            .get(self.url(&self.endpoints.validate))
            .bearer_auth(access_token);
        let value = decode(&self.execute(request, "validate").await?, "validate")?;
        parse_user(value)
    }
}

#[async_trait]
impl FlowStore for HttpBackend {
    async fn list_flows(&self, exclude_examples: bool) -> Result<Vec<Flow>> {
        let request = self
            .client
            .get(self.url(&self.endpoints.flows))
            .query(&[("remove_example_flows", exclude_examples)]);
        parse_flows(self.send_json(request, "list flows").await?)
    }

    async fn upload_flow(&self, file_name: &str, definition: &FlowDefinition) -> Result<Flow> {
        let body = serde_json::to_vec(&definition.data)?;
        let part = Part::bytes(body)
            .file_name(json_file_name(file_name))
            .mime_str("application/json")?;
        let request = self
            .client
            .post(self.url(&self.endpoints.flow_upload))
            .multipart(Form::new().part("file", part));
        parse_uploaded_flow(self.send_json(request, "upload flow").await?)
    }

    async fn update_flow(&self, flow_id: &FlowId, patch: &FlowPatch) -> Result<Flow> {
        let request = self.client.patch(self.flow_url(flow_id)).json(patch);
        let value = self.send_json(request, "update flow").await?;
        serde_json::from_value(value).context("invalid flow in update response")
    }

    async fn delete_flow(&self, flow_id: &FlowId) -> Result<()> {
        let request = self.client.delete(self.flow_url(flow_id));
        self.send(request, "delete flow").await?;
        Ok(())
    }
}

#[async_trait]
impl FileStore for HttpBackend {
    async fn server_status(&self, flow_id: &FlowId) -> Result<ServerStatus> {
        let request = self
            .client
            .get(self.url(&self.endpoints.status))
            .query(&[("flow_id", flow_id.as_str())]);
        let value = self.send_json(request, "server status").await?;
        serde_json::from_value(value).context("invalid server status response")
    }

    async fn embedding_models(&self) -> Result<Vec<String>> {
        let request = self.client.get(self.url(&self.endpoints.models));
        Ok(parse_models(&self.send_json(request, "list models").await?))
    }

    async fn list_files(&self, flow_id: &FlowId) -> Result<Vec<FileRecord>> {
        let request = self
            .client
            .get(self.url(&self.endpoints.files))
            .query(&[("flow_id", flow_id.as_str())]);
        parse_files(self.send_json(request, "list files").await?)
    }

    async fn upload_file(&self, flow_id: &FlowId, file: &FileArtifact) -> Result<FileRecord> {
        let mime = mime_guess::from_path(&file.file_name).first_or_octet_stream();
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(mime.essence_str())?;
        let request = self
            .client
            .post(self.url(&self.endpoints.file_upload))
            .query(&[("flow_id", flow_id.as_str())])
            .multipart(Form::new().part("file", part));
        let value = self.send_json(request, "upload file").await?;
        Ok(parse_uploaded_file(value, file))
    }

    async fn delete_file(&self, flow_id: &FlowId, file_path: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.url(&self.endpoints.files))
            .json(&json!({ "file_path": file_path, "flow_id": flow_id }));
        self.send(request, "delete file").await?;
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn send_message(
        &self,
        flow_id: &FlowId,
        session_id: Option<&str>,
        message: &str,
    ) -> Result<ChatReply> {
        let request = self
            .client
            .post(self.url(&self.endpoints.send_message))
            .json(&json!({
                "message": message,
                "flow_id": flow_id,
                "session_id": session_id,
            }));
        let value = self.send_json(request, "send message").await?;
        if value.get("success").and_then(Value::as_bool) == Some(false) {
            let error = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("chat request failed");
            bail!("{error}");
        }
        serde_json::from_value(value).context("invalid chat response")
    }
}

/// Human readable error text: the `detail` field when present, else the body.
fn error_detail(status: StatusCode, text: &str) -> String {
    let detail = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(body)) => match body.get("detail") {
            Some(Value::String(detail)) => Some(detail.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        },
        _ => None,
    };
    detail
        .or_else(|| {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        })
}

fn json_file_name(file_name: &str) -> String {
    let stem = std::path::Path::new(file_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("flow");
    format!("{stem}.json")
}

fn parse_user(value: Value) -> Result<UserIdentity> {
    let body = value.get("user").cloned().unwrap_or(value);
    let username = body
        .get("username")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("user response has no username"))?;
    let id = match body.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => String::new(),
    };
    Ok(UserIdentity {
        id,
        username: username.to_string(),
    })
}

fn parse_flows(value: Value) -> Result<Vec<Flow>> {
    let list = match value {
        Value::Array(_) => value,
        Value::Object(mut body) => body
            .remove("flows")
            .ok_or_else(|| anyhow!("flow list response has no flows"))?,
        Value::Null => return Ok(Vec::new()),
        other => return Err(anyhow!("unexpected flow list response: {other}")),
    };
    serde_json::from_value(list).context("invalid flow in list response")
}

fn parse_uploaded_flow(value: Value) -> Result<Flow> {
    let flow = match value {
        Value::Array(items) => items
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("upload response contains no flow"))?,
        other => other,
    };
    serde_json::from_value(flow).context("invalid flow in upload response")
}

fn parse_files(value: Value) -> Result<Vec<FileRecord>> {
    match value.get("files") {
        Some(files) => {
            serde_json::from_value(files.clone()).context("invalid file in list response")
        }
        None => Ok(Vec::new()),
    }
}

fn parse_models(value: &Value) -> Vec<String> {
    value
        .get("models")
        .and_then(Value::as_array)
        .map(|models| {
            models
                .iter()
                .filter_map(|model| match model {
                    Value::String(name) => Some(name.clone()),
                    other => other.get("name").and_then(Value::as_str).map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_uploaded_file(value: Value, file: &FileArtifact) -> FileRecord {
    let body = value.get("file").cloned().unwrap_or(value);
    serde_json::from_value(body).unwrap_or_else(|_| FileRecord {
        file_id: String::new(),
        file_path: file.file_name.clone(),
        file_name: file.file_name.clone(),
        file_size: file.bytes.len() as u64,
        file_type: file.extension().unwrap_or_default(),
    })
}
