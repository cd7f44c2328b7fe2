//! GUI-facing API surface
//!
//! Every call returns `{"success": bool, <field>: <data>, "error": string|null}`
//! so the frontend can treat failures uniformly. Backend and filesystem errors
//! never escape as `Err`; they become `success: false` with the error text and
//! an empty value for the data field.

use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Mutex};

use mars_core::prelude::*;
use mars_core::ServerEvent;
use mars_daemon::{
    CommandRequest, CreateSessionRequest, EventStreamClient, EventSubscription, LaunchEnv,
    PromptRequest, RequestGateway, ServerSupervisor,
};

use crate::config::Settings;
use crate::editor::{self, EditorLauncher};
use crate::files::{list_directory, read_text_file};
use crate::settings_store::SettingsStore;

/// `{"success": true, <field>: data, "error": null}`
fn ok_with(field: &str, data: Value) -> Value {
    let mut map = Map::new();
    map.insert("success".to_string(), Value::Bool(true));
    map.insert(field.to_string(), data);
    map.insert("error".to_string(), Value::Null);
    Value::Object(map)
}

/// `{"success": false, <field>: empty, "error": message}`
fn fail_with(field: &str, empty: Value, error: impl std::fmt::Display) -> Value {
    let mut map = Map::new();
    map.insert("success".to_string(), Value::Bool(false));
    map.insert(field.to_string(), empty);
    map.insert("error".to_string(), Value::String(error.to_string()));
    Value::Object(map)
}

fn status(success: bool) -> Value {
    json!({ "success": success, "error": null })
}

fn failure(error: impl std::fmt::Display) -> Value {
    json!({ "success": false, "error": error.to_string() })
}

fn reply(field: &str, empty: Value, result: Result<Value>) -> Value {
    match result {
        Ok(data) => ok_with(field, data),
        Err(e) => {
            warn!("Request for '{}' failed: {}", field, e);
            fail_with(field, empty, e)
        }
    }
}

/// `false` only when the server explicitly answered `false`
fn acknowledged(value: &Value) -> bool {
    value.as_bool().unwrap_or(true)
}

/// The directory a `/project/current` answer points at
fn project_dir(project: &Value) -> Option<&str> {
    project
        .get("path")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .or_else(|| project.get("worktree").and_then(Value::as_str))
        .filter(|p| !p.is_empty())
}

/// Facade the GUI calls into.
///
/// Holds the one supervisor for the configured server plus the clients that
/// talk to it. The "current session" is the session that message calls fall
/// back to when the GUI does not name one.
pub struct MarsApi {
    supervisor: Mutex<ServerSupervisor>,
    gateway: RequestGateway,
    events: EventStreamClient,
    current_session: std::sync::Mutex<Option<String>>,
    settings: SettingsStore,
    editor: EditorLauncher,
    env: LaunchEnv,
}

impl MarsApi {
    /// Build from loaded configuration and the captured launch environment
    pub fn new(settings: &Settings, env: LaunchEnv, store: SettingsStore) -> Self {
        let supervisor = ServerSupervisor::new(
            settings.server_config(),
            env,
            settings.supervisor_options(),
        );
        Self::with_supervisor(supervisor, store)
    }

    /// Wrap an already-configured supervisor
    pub fn with_supervisor(supervisor: ServerSupervisor, store: SettingsStore) -> Self {
        let config = supervisor.config().clone();
        let env = supervisor.env().clone();
        Self {
            supervisor: Mutex::new(supervisor),
            gateway: RequestGateway::new(config.clone()),
            events: EventStreamClient::new(config),
            current_session: std::sync::Mutex::new(None),
            settings: store,
            editor: EditorLauncher::default(),
            env,
        }
    }

    pub fn with_editor(mut self, editor: EditorLauncher) -> Self {
        self.editor = editor;
        self
    }

    pub fn env(&self) -> &LaunchEnv {
        &self.env
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    // ─────────────────────────────────────────────────────────
    // Server lifecycle
    // ─────────────────────────────────────────────────────────

    pub async fn start_server(&self) -> Value {
        match self.supervisor.lock().await.start().await {
            Ok(()) => status(true),
            Err(e) if e.is_recoverable() => {
                warn!("Server not started: {}", e);
                failure(e)
            }
            Err(e) => {
                error!("Failed to start server: {}", e);
                failure(e)
            }
        }
    }

    pub async fn stop_server(&self) -> Value {
        match self.supervisor.lock().await.stop().await {
            Ok(()) => status(true),
            Err(e) => failure(e),
        }
    }

    /// Live check; `running` is `false` rather than an error when unreachable
    pub async fn is_server_running(&self) -> Value {
        let running = self.supervisor.lock().await.is_running().await;
        ok_with("running", Value::Bool(running))
    }

    // ─────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────

    pub fn current_session_id(&self) -> Option<String> {
        self.current_session
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn set_current_session(&self, session_id: Option<String>) {
        let mut guard = self
            .current_session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = session_id.filter(|id| !id.is_empty());
    }

    /// The explicitly named session, else the current one
    fn session_or_current(&self, session_id: Option<&str>) -> Option<String> {
        session_id
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| self.current_session_id())
    }

    /// Create a session and make it current
    pub async fn create_session(&self, title: Option<String>, parent_id: Option<String>) -> Value {
        let request = CreateSessionRequest { title, parent_id };
        let result = self.gateway.create_session(&request).await;
        if let Ok(session) = &result {
            if let Some(id) = session.get("id").and_then(Value::as_str) {
                info!("Created session {}", id);
                self.set_current_session(Some(id.to_string()));
            }
        }
        reply("session", Value::Null, result)
    }

    pub async fn list_sessions(&self) -> Value {
        reply("sessions", json!([]), self.gateway.list_sessions().await)
    }

    pub async fn get_session(&self, session_id: &str) -> Value {
        reply("session", Value::Null, self.gateway.get_session(session_id).await)
    }

    pub async fn delete_session(&self, session_id: &str) -> Value {
        match self.gateway.delete_session(session_id).await {
            Ok(answer) => {
                if self.current_session_id().as_deref() == Some(session_id) {
                    self.set_current_session(None);
                }
                status(acknowledged(&answer))
            }
            Err(e) => failure(e),
        }
    }

    pub async fn abort_session(&self, session_id: Option<&str>) -> Value {
        let Some(sid) = self.session_or_current(session_id) else {
            return failure(Error::NoActiveSession);
        };
        match self.gateway.abort_session(&sid).await {
            Ok(answer) => status(acknowledged(&answer)),
            Err(e) => failure(e),
        }
    }

    // ─────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────

    /// Send a prompt and wait for the reply; creates a session when none is active
    pub async fn send_message(
        &self,
        content: &str,
        session_id: Option<&str>,
        model: Option<Value>,
        agent: Option<String>,
    ) -> Value {
        let sid = match self.session_or_current(session_id) {
            Some(sid) => sid,
            None => match self.create_current_session().await {
                Ok(sid) => sid,
                Err(e) => return Self::message_failure(e),
            },
        };

        let prompt = PromptRequest::text(content)
            .with_model(model)
            .with_agent(agent);
        debug!("Sending message to session {}", sid);
        match self.gateway.send_message(&sid, &prompt).await {
            Ok(response) => json!({
                "success": true,
                "response": response,
                "sessionId": sid,
                "error": null,
            }),
            Err(e) => Self::message_failure(e),
        }
    }

    fn message_failure(error: impl std::fmt::Display) -> Value {
        json!({
            "success": false,
            "response": null,
            "sessionId": null,
            "error": error.to_string(),
        })
    }

    async fn create_current_session(&self) -> Result<String> {
        info!("No active session, creating one");
        let session = self
            .gateway
            .create_session(&CreateSessionRequest::default())
            .await?;
        let sid = session
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::api("Failed to resolve session id"))?;
        self.set_current_session(Some(sid.clone()));
        Ok(sid)
    }

    /// Fire-and-forget prompt; the reply arrives on the event stream
    pub async fn stream_message(
        &self,
        session_id: &str,
        content: &str,
        model: Option<Value>,
        agent: Option<String>,
    ) -> Value {
        let prompt = PromptRequest::text(content)
            .with_model(model)
            .with_agent(agent);
        match self.gateway.send_message_async(session_id, &prompt).await {
            Ok(()) => status(true),
            Err(e) => failure(e),
        }
    }

    /// Messages of the named or current session; empty without a session
    pub async fn list_messages(&self, session_id: Option<&str>, limit: Option<u32>) -> Value {
        let Some(sid) = self.session_or_current(session_id) else {
            return ok_with("messages", json!([]));
        };
        reply(
            "messages",
            json!([]),
            self.gateway.list_messages(&sid, limit).await,
        )
    }

    // ─────────────────────────────────────────────────────────
    // Config & info
    // ─────────────────────────────────────────────────────────

    pub async fn get_config(&self) -> Value {
        reply("config", Value::Null, self.gateway.get_config().await)
    }

    pub async fn get_providers(&self) -> Value {
        reply("providers", Value::Null, self.gateway.get_providers().await)
    }

    pub async fn list_agents(&self) -> Value {
        reply("agents", json!([]), self.gateway.list_agents().await)
    }

    pub async fn get_current_project(&self) -> Value {
        reply(
            "project",
            Value::Null,
            self.gateway.get_current_project().await,
        )
    }

    pub async fn list_projects(&self) -> Value {
        reply("projects", json!([]), self.gateway.list_projects().await)
    }

    // ─────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────

    /// Server-side fuzzy file search
    pub async fn search_files(&self, query: &str) -> Value {
        reply("files", json!([]), self.gateway.search_files(query).await)
    }

    /// List a local directory; `"."` means the CLI workdir (or our cwd)
    pub fn list_files(&self, path: &str) -> Value {
        let root = self.listing_root(path);
        match list_directory(&root) {
            Ok(entries) => {
                let mut result = ok_with("files", json!(entries));
                result["root"] = Value::String(root.display().to_string());
                result
            }
            Err(e) => {
                debug!("Listing {:?} failed: {}", root, e);
                fail_with("files", json!([]), e)
            }
        }
    }

    fn listing_root(&self, path: &str) -> PathBuf {
        if path.is_empty() || path == "." {
            return self
                .env
                .cli_workdir
                .clone()
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_else(|| PathBuf::from("."));
        }
        PathBuf::from(path)
    }

    /// Read a local text file
    pub fn read_file(&self, path: &str) -> Value {
        match read_text_file(Path::new(path)) {
            Ok(content) => ok_with("content", Value::String(content)),
            Err(e) => fail_with("content", Value::Null, e),
        }
    }

    // ─────────────────────────────────────────────────────────
    // Commands & todos
    // ─────────────────────────────────────────────────────────

    pub async fn list_commands(&self) -> Value {
        reply("commands", json!([]), self.gateway.list_commands().await)
    }

    pub async fn execute_command(
        &self,
        command: &str,
        arguments: Value,
        session_id: Option<&str>,
        agent: Option<String>,
        model: Option<String>,
    ) -> Value {
        let Some(sid) = self.session_or_current(session_id) else {
            return failure(Error::NoActiveSession);
        };
        let mut request = CommandRequest::new(command, arguments);
        request.agent = agent.filter(|a| !a.is_empty());
        request.model = model.filter(|m| !m.is_empty());
        reply(
            "result",
            Value::Null,
            self.gateway.execute_command(&sid, &request).await,
        )
    }

    /// Todos of the named or current session; empty without a session
    pub async fn list_todos(&self, session_id: Option<&str>) -> Value {
        let Some(sid) = self.session_or_current(session_id) else {
            return ok_with("todos", json!([]));
        };
        reply("todos", json!([]), self.gateway.list_todos(&sid).await)
    }

    // ─────────────────────────────────────────────────────────
    // Events
    // ─────────────────────────────────────────────────────────

    /// Forward live server events into `tx` until cancelled or `tx` closes
    pub fn subscribe_events(&self, tx: mpsc::Sender<ServerEvent>) -> EventSubscription {
        self.events.subscribe(tx)
    }

    // ─────────────────────────────────────────────────────────
    // Settings
    // ─────────────────────────────────────────────────────────

    pub fn save_settings(&self, settings: &Value) -> Value {
        match self.settings.save(settings) {
            Ok(()) => status(true),
            Err(e) => {
                error!("Failed to save settings: {}", e);
                failure(e)
            }
        }
    }

    pub fn load_settings(&self) -> Value {
        reply("settings", json!({}), self.settings.load())
    }

    // ─────────────────────────────────────────────────────────
    // Editor
    // ─────────────────────────────────────────────────────────

    /// Open `path` (or the project) in VS Code
    pub async fn open_in_editor(&self, path: Option<&str>) -> Value {
        let project = if editor::needs_project_lookup(path, &self.env) {
            match self.gateway.get_current_project().await {
                Ok(project) => project_dir(&project).map(str::to_string),
                Err(e) => {
                    debug!("No live project for editor target: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let target = editor::resolve_target(path, &self.env, project.as_deref());
        let launcher = self.editor.clone();
        match tokio::task::spawn_blocking(move || launcher.open(&target)).await {
            Ok(Ok(())) => status(true),
            Ok(Err(e)) => failure(e),
            Err(e) => failure(e),
        }
    }
}

impl std::fmt::Debug for MarsApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarsApi")
            .field("server", self.gateway.config())
            .field("current_session", &self.current_session_id())
            .field("settings", &self.settings.path())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mars_daemon::test_utils::{unused_port, MockServer};
    use mars_daemon::SupervisorOptions;
    use mars_core::ServerConfig;
    use tempfile::tempdir;

    fn api_for(config: ServerConfig, env: LaunchEnv, settings_dir: &Path) -> MarsApi {
        let supervisor = ServerSupervisor::new(config, env, SupervisorOptions::default());
        MarsApi::with_supervisor(supervisor, SettingsStore::new(settings_dir.join("settings.json")))
    }

    #[test]
    fn test_result_shape_helpers() {
        assert_eq!(
            ok_with("todos", json!([1])),
            json!({"success": true, "todos": [1], "error": null})
        );
        assert_eq!(
            fail_with("config", Value::Null, "boom"),
            json!({"success": false, "config": null, "error": "boom"})
        );
        assert_eq!(project_dir(&json!({"path": "", "worktree": "/w"})), Some("/w"));
        assert_eq!(project_dir(&json!({})), None);
    }

    #[test]
    fn test_debug_shows_server_session_and_settings_path() {
        let temp = tempdir().unwrap();
        let api = api_for(ServerConfig::new("127.0.0.1", 4173), LaunchEnv::default(), temp.path());
        api.set_current_session(Some("ses_dbg".to_string()));

        let debug = format!("{:?}", api);
        assert!(debug.starts_with("MarsApi"));
        assert!(debug.contains("4173"));
        assert!(debug.contains("ses_dbg"));
        assert!(debug.contains("settings.json"));
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_uniform_shape() {
        let temp = tempdir().unwrap();
        let api = api_for(
            ServerConfig::new("127.0.0.1", unused_port()),
            LaunchEnv::default(),
            temp.path(),
        );

        let config = api.get_config().await;
        assert_eq!(config["success"], json!(false));
        assert_eq!(config["config"], Value::Null);
        assert!(config["error"].as_str().is_some_and(|e| !e.is_empty()));

        let sessions = api.list_sessions().await;
        assert_eq!(sessions["success"], json!(false));
        assert_eq!(sessions["sessions"], json!([]));

        let sent = api.send_message("hi", None, None, None).await;
        assert_eq!(sent["success"], json!(false));
        assert_eq!(sent["sessionId"], Value::Null);
        assert_eq!(sent["response"], Value::Null);

        assert_eq!(
            api.is_server_running().await,
            json!({"success": true, "running": false, "error": null})
        );
    }

    #[tokio::test]
    async fn test_no_session_defaults() {
        let temp = tempdir().unwrap();
        let api = api_for(
            ServerConfig::new("127.0.0.1", unused_port()),
            LaunchEnv::default(),
            temp.path(),
        );

        assert_eq!(
            api.list_messages(None, None).await,
            json!({"success": true, "messages": [], "error": null})
        );
        assert_eq!(
            api.list_todos(None).await,
            json!({"success": true, "todos": [], "error": null})
        );
        assert_eq!(
            api.abort_session(None).await,
            json!({"success": false, "error": "No active session"})
        );
        assert_eq!(
            api.execute_command("init", json!(""), None, None, None).await,
            json!({"success": false, "error": "No active session"})
        );
    }

    #[tokio::test]
    async fn test_send_message_creates_and_reuses_session() {
        let server = MockServer::start().await;
        server.respond("POST", "/session", 200, r#"{"id":"ses_1"}"#);
        server.respond("POST", "/session/ses_1/message", 200, r#"{"info":{"id":"msg_1"}}"#);
        let temp = tempdir().unwrap();
        let api = api_for(server.config(), LaunchEnv::default(), temp.path());

        let first = api.send_message("hello", None, None, None).await;
        assert_eq!(first["success"], json!(true));
        assert_eq!(first["sessionId"], json!("ses_1"));
        assert_eq!(first["response"]["info"]["id"], json!("msg_1"));
        assert_eq!(api.current_session_id().as_deref(), Some("ses_1"));

        api.send_message("again", None, None, None).await;
        let creates = server
            .api_requests()
            .into_iter()
            .filter(|r| r.method == "POST" && r.target == "/session")
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_create_session_sets_current_and_delete_clears_it() {
        let server = MockServer::start().await;
        server.respond("POST", "/session", 200, r#"{"id":"ses_9","title":"t"}"#);
        server.respond("DELETE", "/session/ses_9", 200, "true");
        let temp = tempdir().unwrap();
        let api = api_for(server.config(), LaunchEnv::default(), temp.path());

        let created = api.create_session(Some("t".to_string()), None).await;
        assert_eq!(created["session"]["id"], json!("ses_9"));
        assert_eq!(api.current_session_id().as_deref(), Some("ses_9"));

        assert_eq!(
            api.delete_session("ses_9").await,
            json!({"success": true, "error": null})
        );
        assert_eq!(api.current_session_id(), None);
    }

    #[tokio::test]
    async fn test_start_adopts_running_server() {
        let server = MockServer::start().await;
        let temp = tempdir().unwrap();
        let api = api_for(server.config(), LaunchEnv::default(), temp.path());

        assert_eq!(
            api.start_server().await,
            json!({"success": true, "error": null})
        );
        assert_eq!(api.is_server_running().await["running"], json!(true));
        assert_eq!(api.supervisor.lock().await.spawn_count(), 0);
    }

    #[test]
    fn test_list_files_dot_uses_cli_workdir() {
        let temp = tempdir().unwrap();
        std::fs::create_dir(temp.path().join("src")).unwrap();
        std::fs::write(temp.path().join("README.md"), "# hi").unwrap();
        let env = LaunchEnv {
            cli_workdir: Some(temp.path().to_path_buf()),
            ..Default::default()
        };
        let api = api_for(ServerConfig::default(), env, temp.path());

        let listing = api.list_files(".");
        assert_eq!(listing["success"], json!(true));
        assert_eq!(listing["root"], json!(temp.path().display().to_string()));
        assert_eq!(listing["files"][0]["name"], json!("src"));
        assert_eq!(listing["files"][0]["isDirectory"], json!(true));
        assert_eq!(listing["files"][1]["name"], json!("README.md"));

        let content = api.read_file(&temp.path().join("README.md").display().to_string());
        assert_eq!(content["content"], json!("# hi"));
        assert_eq!(
            api.read_file("/no/such/file"),
            json!({"success": false, "content": null, "error": "File not found"})
        );

        let missing = api.list_files("/no/such/dir");
        assert_eq!(missing["success"], json!(false));
        assert_eq!(missing["error"], json!("Path not found: /no/such/dir"));
    }

    #[test]
    fn test_settings_round_trip() {
        let temp = tempdir().unwrap();
        let api = api_for(ServerConfig::default(), LaunchEnv::default(), temp.path());

        assert_eq!(
            api.load_settings(),
            json!({"success": true, "settings": {}, "error": null})
        );
        assert_eq!(api.save_settings(&json!({"theme": "dark"}))["success"], json!(true));
        assert_eq!(api.load_settings()["settings"], json!({"theme": "dark"}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_open_in_editor_reports_missing_command() {
        let temp = tempdir().unwrap();
        let env = LaunchEnv {
            cli_workdir: Some(temp.path().to_path_buf()),
            ..Default::default()
        };
        let api = api_for(ServerConfig::default(), env, temp.path()).with_editor(EditorLauncher {
            command: "mars-test-no-such-editor".to_string(),
            macos_fallback: false,
        });

        assert_eq!(
            api.open_in_editor(None).await,
            json!({
                "success": false,
                "error": "VS Code 'code' command not found. Please install it from VS Code command palette."
            })
        );
    }
}
