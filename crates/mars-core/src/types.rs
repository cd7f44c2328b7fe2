//! Core domain types

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default loopback host the server binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default opencode server port
pub const DEFAULT_PORT: u16 = 4096;

/// Address of one logical server instance.
///
/// Every component touching the same server shares one `ServerConfig`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ServerConfig {
    host: String,
    port: u16,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `http://{host}:{port}`
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// `{host}:{port}`, suitable for `TcpStream::connect`
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Supervisor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerState::Stopped => write!(f, "stopped"),
            ServerState::Starting => write!(f, "starting"),
            ServerState::Running => write!(f, "running"),
            ServerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Bounded readiness polling used while a freshly spawned server initializes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl ReadinessPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

    /// Worst-case time spent polling
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            interval: Self::DEFAULT_INTERVAL,
        }
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into the parent.
///
/// Does not touch the filesystem, so it also works for paths reported by a
/// server whose filesystem view may differ from ours.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Normalize a path for comparison: lexical cleanup, then canonicalize if it exists.
///
/// `dunce` keeps Windows paths free of `\\?\` prefixes so they compare equal
/// to what the server reports.
pub fn normalize_for_compare(path: &Path) -> PathBuf {
    let lexical = normalize_lexically(path);
    dunce::canonicalize(&lexical).unwrap_or(lexical)
}

/// Compare two directories after normalization
pub fn same_directory(a: &Path, b: &Path) -> bool {
    normalize_for_compare(a) == normalize_for_compare(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_urls() {
        let config = ServerConfig::new("127.0.0.1", 4096);
        assert_eq!(config.base_url(), "http://127.0.0.1:4096");
        assert_eq!(config.socket_addr(), "127.0.0.1:4096");
        assert_eq!(config.to_string(), "127.0.0.1:4096");
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host(), DEFAULT_HOST);
        assert_eq!(config.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_readiness_budget() {
        let policy = ReadinessPolicy::default();
        assert_eq!(policy.budget(), Duration::from_secs(15));
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/../c/./d/")),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(normalize_lexically(Path::new("./")), PathBuf::from("."));
        assert_eq!(normalize_lexically(Path::new("../x")), PathBuf::from("../x"));
    }

    #[test]
    fn test_same_directory_trailing_slash() {
        assert!(same_directory(
            Path::new("/nonexistent/project/"),
            Path::new("/nonexistent/project")
        ));
        assert!(!same_directory(
            Path::new("/nonexistent/a"),
            Path::new("/nonexistent/b")
        ));
    }

    #[test]
    fn test_same_directory_resolves_existing_paths() {
        let temp = tempfile::tempdir().unwrap();
        let nested = temp.path().join("inner");
        std::fs::create_dir(&nested).unwrap();
        let roundabout = nested.join("..").join("inner");
        assert!(same_directory(&roundabout, &nested));
    }

    #[test]
    fn test_server_state_display() {
        assert_eq!(ServerState::default(), ServerState::Stopped);
        assert_eq!(ServerState::Running.to_string(), "running");
    }
}
