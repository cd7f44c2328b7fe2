//! Application error types with rich context

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Server Process Errors
    // ─────────────────────────────────────────────────────────────
    #[error("'{binary}' command not found. Make sure opencode is installed and in PATH.")]
    BinaryNotFound { binary: String },

    #[error("Failed to spawn server process: {reason}")]
    ProcessSpawn { reason: String },

    #[error("Server did not become reachable after {attempts} attempts ({waited:?}){}", exit_suffix(.exit_code))]
    StartupTimeout {
        attempts: u32,
        waited: Duration,
        exit_code: Option<i32>,
    },

    #[error("Server connectivity error: {message}")]
    Connectivity { message: String },

    // ─────────────────────────────────────────────────────────────
    // Event Stream Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to decode event line ({reason}): {line}")]
    StreamDecode { line: String, reason: String },

    #[error("Event stream disconnected: {reason}")]
    StreamDisconnected { reason: String },

    // ─────────────────────────────────────────────────────────────
    // REST API Errors
    // ─────────────────────────────────────────────────────────────
    #[error("OpenCode API error{}: {message}", status_suffix(.status))]
    Api { status: Option<u16>, message: String },

    #[error("No active session")]
    NoActiveSession,

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    #[error("Settings error: {message}")]
    Settings { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(", process exited with code {}", code),
        None => String::new(),
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(status) => format!(" ({})", status),
        None => String::new(),
    }
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn binary_not_found(binary: impl Into<String>) -> Self {
        Self::BinaryNotFound {
            binary: binary.into(),
        }
    }

    pub fn process_spawn(reason: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            reason: reason.into(),
        }
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity {
            message: message.into(),
        }
    }

    pub fn stream_decode(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StreamDecode {
            line: line.into(),
            reason: reason.into(),
        }
    }

    pub fn stream_disconnected(reason: impl Into<String>) -> Self {
        Self::StreamDisconnected {
            reason: reason.into(),
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            status: None,
            message: message.into(),
        }
    }

    pub fn api_status(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn settings(message: impl Into<String>) -> Self {
        Self::Settings {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    ///
    /// Recoverable errors are surfaced to the user, who may retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::BinaryNotFound { .. }
                | Error::StartupTimeout { .. }
                | Error::Connectivity { .. }
                | Error::StreamDecode { .. }
                | Error::StreamDisconnected { .. }
                | Error::Api { .. }
                | Error::NoActiveSession
        )
    }

    /// Check if this error should abort the shell at startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::ConfigInvalid { .. } | Error::ChannelClosed)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
