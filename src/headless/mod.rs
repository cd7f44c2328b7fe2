//! Headless mode - NDJSON status and event output
//!
//! Without a window, the shell starts the server, prints one JSON object per
//! line to stdout for every lifecycle change and live server event, and
//! accepts simple commands on stdin.
//!
//! # Example Output
//!
//! ```json
//! {"event":"server_starting","url":"http://127.0.0.1:4096","workdir":"/home/me/app","timestamp":1704700001000}
//! {"event":"server_ready","url":"http://127.0.0.1:4096","timestamp":1704700002000}
//! {"event":"server_event","kind":"session.idle","session_id":"ses_1","payload":{},"timestamp":1704700003000}
//! ```

pub mod runner;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::io::{self, Write};
use tracing::{error, warn};

use mars_core::ServerEvent;

pub use runner::{run_headless, HeadlessOptions};

/// Events emitted in headless mode
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// About to adopt or launch the server
    ServerStarting {
        url: String,
        workdir: Option<String>,
        timestamp: i64,
    },

    /// The server answers on its port
    ServerReady { url: String, timestamp: i64 },

    /// The server was stopped and the port released
    ServerStopped { url: String, timestamp: i64 },

    /// One event from the live stream
    ServerEvent {
        kind: String,
        session_id: Option<String>,
        payload: Value,
        timestamp: i64,
    },

    /// The live stream is gone
    StreamEnded { reason: String, timestamp: i64 },

    /// Result of a stdin command, in the GUI result shape
    Reply {
        command: String,
        result: Value,
        timestamp: i64,
    },

    /// Error occurred
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl HeadlessEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        // NDJSON: one object per line, flushed immediately
        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write headless event to stdout: {}", e);
            return;
        }
        if let Err(e) = stdout.flush() {
            error!("Failed to flush headless stdout: {}", e);
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn server_starting(url: &str, workdir: Option<String>) -> Self {
        Self::ServerStarting {
            url: url.to_string(),
            workdir,
            timestamp: Self::now(),
        }
    }

    pub fn server_ready(url: &str) -> Self {
        Self::ServerReady {
            url: url.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn server_stopped(url: &str) -> Self {
        Self::ServerStopped {
            url: url.to_string(),
            timestamp: Self::now(),
        }
    }

    pub fn server_event(event: ServerEvent) -> Self {
        Self::ServerEvent {
            kind: event.kind().to_string(),
            session_id: event.session_id().map(str::to_string),
            payload: event.payload,
            timestamp: Self::now(),
        }
    }

    pub fn stream_ended(reason: String) -> Self {
        Self::StreamEnded {
            reason,
            timestamp: Self::now(),
        }
    }

    pub fn reply(command: &str, result: Value) -> Self {
        Self::Reply {
            command: command.to_string(),
            result,
            timestamp: Self::now(),
        }
    }

    pub fn error(message: String, fatal: bool) -> Self {
        Self::Error {
            message,
            fatal,
            timestamp: Self::now(),
        }
    }
}

/// Commands accepted on stdin, one per line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadlessCommand {
    /// `status`
    Status,
    /// `sessions`
    Sessions,
    /// `new [title]`
    NewSession(Option<String>),
    /// `use <session-id>`
    UseSession(String),
    /// `send <text>`: wait for the full reply
    Send(String),
    /// `prompt <text>`: reply arrives on the event stream
    Prompt(String),
    /// `abort`
    Abort,
    /// `messages`
    Messages,
    /// `todos`
    Todos,
    /// `project`
    Project,
    /// `files [path]`
    Files(String),
    /// `open [path]`
    Open(Option<String>),
    /// `q` / `quit`
    Quit,
}

impl HeadlessCommand {
    /// Parse one stdin line; `None` for blank or unknown input
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };
        let arg = (!rest.is_empty()).then(|| rest.to_string());

        let command = match verb {
            "" => return None,
            "status" => Self::Status,
            "sessions" => Self::Sessions,
            "new" => Self::NewSession(arg),
            "use" => Self::UseSession(arg?),
            "send" => Self::Send(arg?),
            "prompt" => Self::Prompt(arg?),
            "abort" => Self::Abort,
            "messages" => Self::Messages,
            "todos" => Self::Todos,
            "project" => Self::Project,
            "files" => Self::Files(arg.unwrap_or_else(|| ".".to_string())),
            "open" => Self::Open(arg),
            "q" | "quit" => Self::Quit,
            _ => {
                warn!("Unknown stdin command: {}", line);
                return None;
            }
        };
        Some(command)
    }

    /// Name used in the `reply` event
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Sessions => "sessions",
            Self::NewSession(_) => "new",
            Self::UseSession(_) => "use",
            Self::Send(_) => "send",
            Self::Prompt(_) => "prompt",
            Self::Abort => "abort",
            Self::Messages => "messages",
            Self::Todos => "todos",
            Self::Project => "project",
            Self::Files(_) => "files",
            Self::Open(_) => "open",
            Self::Quit => "quit",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_event_serialization() {
        let event = HeadlessEvent::server_event(ServerEvent::from_envelope(json!({
            "type": "session.idle",
            "properties": {"sessionID": "ses_1"}
        })));
        let json = serde_json::to_string(&event).expect("serialization failed");
        let value: Value = serde_json::from_str(&json).expect("invalid JSON");

        assert_eq!(value["event"], "server_event");
        assert_eq!(value["kind"], "session.idle");
        assert_eq!(value["session_id"], "ses_1");
        assert_eq!(value["payload"]["properties"]["sessionID"], "ses_1");
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_server_starting_serialization() {
        let event = HeadlessEvent::server_starting("http://127.0.0.1:4096", None);
        let value = serde_json::to_value(&event).expect("serialization failed");

        assert_eq!(value["event"], "server_starting");
        assert_eq!(value["url"], "http://127.0.0.1:4096");
        assert!(value["workdir"].is_null());
    }

    #[test]
    fn test_error_serialization() {
        let event = HeadlessEvent::error("Connection failed".to_string(), true);
        let value = serde_json::to_value(&event).expect("serialization failed");

        assert_eq!(value["event"], "error");
        assert_eq!(value["message"], "Connection failed");
        assert_eq!(value["fatal"], true);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(HeadlessCommand::parse("  status "), Some(HeadlessCommand::Status));
        assert_eq!(
            HeadlessCommand::parse("send hello there"),
            Some(HeadlessCommand::Send("hello there".to_string()))
        );
        assert_eq!(
            HeadlessCommand::parse("new"),
            Some(HeadlessCommand::NewSession(None))
        );
        assert_eq!(
            HeadlessCommand::parse("files"),
            Some(HeadlessCommand::Files(".".to_string()))
        );
        assert_eq!(HeadlessCommand::parse("q"), Some(HeadlessCommand::Quit));
    }

    #[test]
    fn test_parse_rejects_blank_unknown_and_missing_args() {
        assert_eq!(HeadlessCommand::parse(""), None);
        assert_eq!(HeadlessCommand::parse("reload"), None);
        assert_eq!(HeadlessCommand::parse("send"), None);
        assert_eq!(HeadlessCommand::parse("use   "), None);
    }
}
