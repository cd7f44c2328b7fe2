//! Test utilities for server supervision and streaming
//!
//! [`MockServer`] is a minimal in-process HTTP server standing in for
//! `opencode serve`. It answers one request per connection and records every
//! request it sees.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use mars_core::ServerConfig;

/// A request the mock server received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    /// Request target including any query string
    pub target: String,
    pub body: String,
}

#[derive(Debug)]
struct MockState {
    config_status: u16,
    project_path: Option<String>,
    event_status: u16,
    event_lines: Vec<String>,
    event_chunked: bool,
    hold_event_stream: bool,
    routes: HashMap<(String, String), (u16, String)>,
    requests: Vec<RecordedRequest>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            config_status: 200,
            project_path: None,
            event_status: 200,
            event_lines: Vec::new(),
            event_chunked: false,
            hold_event_stream: false,
            routes: HashMap::new(),
            requests: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<MockState>,
    stream_closed: AtomicBool,
    stream_closed_notify: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-process stand-in for a running opencode server
pub struct MockServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl MockServer {
    /// Bind to an ephemeral loopback port and start serving
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock server address");
        let shared = Arc::new(Shared::default());

        let accept_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, Arc::clone(&accept_shared)));
            }
        });

        Self { addr, shared, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn config(&self) -> ServerConfig {
        ServerConfig::new("127.0.0.1", self.port())
    }

    /// Status returned by `GET /config` (200 by default)
    pub fn set_config_status(&self, status: u16) {
        self.shared.state().config_status = status;
    }

    /// Directory reported by `GET /project/current`; 404 while unset
    pub fn set_project_path(&self, path: impl Into<String>) {
        self.shared.state().project_path = Some(path.into());
    }

    pub fn project_path(&self) -> Option<String> {
        self.shared.state().project_path.clone()
    }

    /// Status line for `GET /global/event`
    pub fn set_event_status(&self, status: u16) {
        self.shared.state().event_status = status;
    }

    /// Raw lines written to the event stream, each followed by a blank line
    pub fn set_event_lines<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared.state().event_lines = lines.into_iter().map(Into::into).collect();
    }

    /// Frame the event stream with `Transfer-Encoding: chunked`, one chunk per line
    pub fn set_event_chunked(&self, chunked: bool) {
        self.shared.state().event_chunked = chunked;
    }

    /// Keep the event stream open after the lines until the client hangs up
    pub fn hold_event_stream(&self, hold: bool) {
        self.shared.state().hold_event_stream = hold;
    }

    /// Register a canned response for `method target`.
    ///
    /// `target` may include a query string; lookups try the full target first,
    /// then the path alone.
    pub fn respond(&self, method: &str, target: &str, status: u16, body: impl Into<String>) {
        self.shared.state().routes.insert(
            (method.to_string(), target.to_string()),
            (status, body.into()),
        );
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.state().requests.clone()
    }

    /// Requests other than liveness probes
    pub fn api_requests(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.target != "/config" && r.target != "/project/current")
            .collect()
    }

    /// Wait until a client closes a held event stream
    pub async fn wait_stream_closed(&self, timeout: Duration) -> bool {
        let notified = self.shared.stream_closed_notify.notified();
        if self.shared.stream_closed.load(Ordering::Acquire) {
            return true;
        }
        tokio::time::timeout(timeout, notified).await.is_ok()
            || self.shared.stream_closed.load(Ordering::Acquire)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>) {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await.unwrap_or(0) == 0 {
            break;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 && reader.read_exact(&mut body).await.is_err() {
        return;
    }

    shared.state().requests.push(RecordedRequest {
        method: method.clone(),
        target: target.clone(),
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    if method == "GET" && target == "/global/event" {
        serve_event_stream(reader, &shared).await;
        return;
    }

    let (status, body) = route(&shared, &method, &target);
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason_phrase(status),
        body.len(),
        body
    );
    let mut stream = reader.into_inner();
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

fn route(shared: &Shared, method: &str, target: &str) -> (u16, String) {
    let state = shared.state();
    let path = target.split('?').next().unwrap_or(target);

    if let Some(found) = state
        .routes
        .get(&(method.to_string(), target.to_string()))
        .or_else(|| state.routes.get(&(method.to_string(), path.to_string())))
    {
        return found.clone();
    }

    match (method, path) {
        ("GET", "/config") => (state.config_status, "{}".to_string()),
        ("GET", "/project/current") => match &state.project_path {
            Some(dir) => (
                200,
                serde_json::json!({ "id": "proj", "path": dir, "worktree": dir }).to_string(),
            ),
            None => (404, "not found".to_string()),
        },
        _ => (404, "not found".to_string()),
    }
}

async fn serve_event_stream(reader: BufReader<TcpStream>, shared: &Shared) {
    let (status, lines, chunked, hold) = {
        let state = shared.state();
        (
            state.event_status,
            state.event_lines.clone(),
            state.event_chunked,
            state.hold_event_stream,
        )
    };

    let mut stream = reader.into_inner();
    let framing = if chunked {
        "Transfer-Encoding: chunked\r\n"
    } else {
        ""
    };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\n{}\r\n",
        status,
        reason_phrase(status),
        framing
    );
    if stream.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for line in lines {
        let payload = format!("{}\n\n", line);
        let frame = if chunked {
            format!("{:x}\r\n{}\r\n", payload.len(), payload)
        } else {
            payload
        };
        if stream.write_all(frame.as_bytes()).await.is_err() {
            return;
        }
    }
    let _ = stream.flush().await;

    if hold {
        // Client hang-up shows up as EOF on our read half
        let mut buf = [0u8; 64];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        shared.stream_closed.store(true, Ordering::Release);
        shared.stream_closed_notify.notify_waiters();
    } else {
        if chunked {
            let _ = stream.write_all(b"0\r\n\r\n").await;
        }
        let _ = stream.shutdown().await;
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

/// Listener that accepts connections and never writes a byte.
///
/// Stands in for a wedged server: connects succeed, requests hang.
pub struct SilentListener {
    port: u16,
    task: JoinHandle<()>,
}

impl SilentListener {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind silent listener");
        let port = listener.local_addr().expect("silent listener address").port();
        let task = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        Self { port, task }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn config(&self) -> ServerConfig {
        ServerConfig::new("127.0.0.1", self.port)
    }
}

impl Drop for SilentListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A loopback port with nothing listening on it (at the time of the call)
pub fn unused_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("allocate ephemeral port")
}

/// Write an executable `#!/bin/sh` script named `name` into `dir`
#[cfg(unix)]
pub fn write_fake_binary(dir: &Path, name: &str, script: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).expect("write fake binary");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake binary");
    path
}
