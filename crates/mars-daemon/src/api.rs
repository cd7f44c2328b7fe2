//! One-shot JSON calls against the server's REST API

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

use mars_core::prelude::*;
use mars_core::ServerConfig;

use crate::probe::loopback_client;

/// Characters escaped when an ID is used as a single path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// One part of a prompt; only text parts are sent from the shell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptPart {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl PromptPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text",
            text: text.into(),
        }
    }
}

/// Body of `POST /session/{id}/message` and `/prompt_async`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptRequest {
    pub parts: Vec<PromptPart>,
    /// Either `"provider/model"` or `{"providerID": .., "modelID": ..}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

impl PromptRequest {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            parts: vec![PromptPart::text(content)],
            model: None,
            agent: None,
        }
    }

    pub fn with_model(mut self, model: Option<Value>) -> Self {
        self.model = model.filter(|m| !m.is_null() && m.as_str() != Some(""));
        self
    }

    pub fn with_agent(mut self, agent: Option<String>) -> Self {
        self.agent = agent.filter(|a| !a.is_empty());
        self
    }
}

/// Body of `POST /session`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "parentID", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Body of `POST /session/{id}/command`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandRequest {
    pub command: String,
    /// Free-form text or a structured argument object
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, arguments: Value) -> Self {
        Self {
            command: command.into(),
            arguments,
            agent: None,
            model: None,
        }
    }
}

/// Thin REST client for one server.
///
/// Response bodies are returned as JSON: an empty body becomes `true` and a
/// body that is not JSON comes back as a JSON string.
#[derive(Debug, Clone)]
pub struct RequestGateway {
    config: ServerConfig,
    client: reqwest::Client,
}

impl RequestGateway {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            client: loopback_client(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<Value> {
        let url = format!("{}{}", self.config.base_url(), path);
        let mut request = self.client.request(method.clone(), &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::api(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::api(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            warn!("{} {} failed ({}): {}", method, path, status, truncate(&text, 500));
            return Err(Error::api_status(status.as_u16(), text));
        }
        trace!("{} {} -> {}", method, path, truncate(&text, 500));
        Ok(decode_body(&text))
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.request::<Value>(Method::GET, path, &[], None).await
    }

    async fn get_with_query(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        self.request::<Value>(Method::GET, path, query, None).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: Option<&B>) -> Result<Value> {
        self.request(Method::POST, path, &[], body).await
    }

    // ─────────────────────────────────────────────────────────
    // Config & project
    // ─────────────────────────────────────────────────────────

    pub async fn get_config(&self) -> Result<Value> {
        self.get("/config").await
    }

    /// Providers (all, connected, default)
    pub async fn get_providers(&self) -> Result<Value> {
        self.get("/provider").await
    }

    pub async fn get_current_project(&self) -> Result<Value> {
        self.get("/project/current").await
    }

    pub async fn list_projects(&self) -> Result<Value> {
        self.get("/project").await
    }

    // ─────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────

    pub async fn list_sessions(&self) -> Result<Value> {
        self.get("/session").await
    }

    pub async fn create_session(&self, request: &CreateSessionRequest) -> Result<Value> {
        self.post("/session", Some(request)).await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Value> {
        self.get(&session_path(session_id, "")).await
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<Value> {
        self.request::<Value>(Method::DELETE, &session_path(session_id, ""), &[], None)
            .await
    }

    pub async fn abort_session(&self, session_id: &str) -> Result<Value> {
        self.post::<Value>(&session_path(session_id, "/abort"), None)
            .await
    }

    // ─────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────

    pub async fn list_messages(&self, session_id: &str, limit: Option<u32>) -> Result<Value> {
        let query: Vec<(&str, String)> = limit
            .filter(|l| *l > 0)
            .map(|l| vec![("limit", l.to_string())])
            .unwrap_or_default();
        self.get_with_query(&session_path(session_id, "/message"), &query)
            .await
    }

    /// Send a prompt and wait for the assistant's reply
    pub async fn send_message(&self, session_id: &str, prompt: &PromptRequest) -> Result<Value> {
        debug!("send_message to {}: {:?}", session_id, prompt);
        self.post(&session_path(session_id, "/message"), Some(prompt))
            .await
    }

    /// Send a prompt without waiting; progress arrives on the event stream
    pub async fn send_message_async(&self, session_id: &str, prompt: &PromptRequest) -> Result<()> {
        self.post(&session_path(session_id, "/prompt_async"), Some(prompt))
            .await
            .map(|_| ())
    }

    // ─────────────────────────────────────────────────────────
    // Agents, files, commands, todos
    // ─────────────────────────────────────────────────────────

    pub async fn list_agents(&self) -> Result<Value> {
        self.get("/agent").await
    }

    /// Find files by name
    pub async fn search_files(&self, query: &str) -> Result<Value> {
        self.get_with_query("/find/file", &[("query", query.to_string())])
            .await
    }

    pub async fn get_file_content(&self, path: &str) -> Result<Value> {
        self.get_with_query("/file/content", &[("path", path.to_string())])
            .await
    }

    pub async fn list_commands(&self) -> Result<Value> {
        self.get("/command").await
    }

    pub async fn list_todos(&self, session_id: &str) -> Result<Value> {
        self.get(&session_path(session_id, "/todo")).await
    }

    /// Run a slash command in a session
    pub async fn execute_command(&self, session_id: &str, request: &CommandRequest) -> Result<Value> {
        self.post(&session_path(session_id, "/command"), Some(request))
            .await
    }
}

/// `/session/{id}{suffix}` with the ID escaped as one segment
fn session_path(session_id: &str, suffix: &str) -> String {
    format!(
        "/session/{}{}",
        utf8_percent_encode(session_id, PATH_SEGMENT),
        suffix
    )
}

fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Bool(true);
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
