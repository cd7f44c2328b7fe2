//! Opening the project (or a file) in VS Code.
//!
//! The target is resolved the way a user launching from a terminal expects:
//! an explicit path relative to the launch directory, else the CLI workdir,
//! else the directory the live server serves, else the install location.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{info, warn};

use mars_core::normalize_lexically;
use mars_daemon::LaunchEnv;

/// Editor CLI launched with the target path
pub const EDITOR_COMMAND: &str = "code";

/// macOS application opened when the CLI fails
pub const MACOS_EDITOR_APP: &str = "Visual Studio Code";

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur when opening the editor.
#[derive(Debug, Error)]
pub enum EditorError {
    /// The editor CLI is not installed
    #[error("VS Code 'code' command not found. Please install it from VS Code command palette.")]
    CommandNotFound,

    /// The editor CLI ran and reported failure
    #[error("{0}")]
    Failed(String),

    /// Failed to execute the editor command
    #[error("Failed to execute editor: {0}")]
    ExecutionFailed(#[from] std::io::Error),
}

// ─────────────────────────────────────────────────────────────────────────────
// Target Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// `true` when [`resolve_target()`] would consult the live server's project path
pub fn needs_project_lookup(requested: Option<&str>, env: &LaunchEnv) -> bool {
    requested.map_or(true, str::is_empty) && env.cli_workdir.is_none()
}

/// Pick the path to open; always absolute
pub fn resolve_target(
    requested: Option<&str>,
    env: &LaunchEnv,
    project_path: Option<&str>,
) -> PathBuf {
    let target = requested
        .filter(|p| !p.is_empty())
        .map(|p| env.resolve_from_launch_dir(Path::new(p)))
        .or_else(|| env.cli_workdir.clone())
        .or_else(|| project_path.filter(|p| !p.is_empty()).map(PathBuf::from))
        .or_else(|| env.install_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    if target.is_absolute() {
        normalize_lexically(&target)
    } else {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        normalize_lexically(&cwd.join(target))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Launching
// ─────────────────────────────────────────────────────────────────────────────

/// How to launch the editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorLauncher {
    pub command: String,
    /// Retry with `open -a "Visual Studio Code"` when the CLI fails
    pub macos_fallback: bool,
}

impl Default for EditorLauncher {
    fn default() -> Self {
        Self {
            command: EDITOR_COMMAND.to_string(),
            macos_fallback: cfg!(target_os = "macos"),
        }
    }
}

impl EditorLauncher {
    /// Run the editor on `target` and wait for the CLI to return
    pub fn open(&self, target: &Path) -> Result<(), EditorError> {
        info!("Opening {} in {}", target.display(), self.command);

        let output = match Command::new(&self.command).arg(target).output() {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EditorError::CommandNotFound)
            }
            Err(e) => return Err(EditorError::ExecutionFailed(e)),
        };

        if output.status.success() {
            return Ok(());
        }

        if self.macos_fallback {
            warn!("'{}' failed, falling back to open -a", self.command);
            Command::new("open")
                .args(["-a", MACOS_EDITOR_APP])
                .arg(target)
                .output()?;
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(EditorError::Failed(if stderr.is_empty() {
            "Failed to open VS Code".to_string()
        } else {
            stderr
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> LaunchEnv {
        LaunchEnv {
            launch_cwd: Some(PathBuf::from("/home/user/projects")),
            install_dir: Some(PathBuf::from("/opt/mars")),
            ..Default::default()
        }
    }

    #[test]
    fn test_requested_path_relative_to_launch_dir() {
        assert_eq!(
            resolve_target(Some("mars"), &env(), Some("/server/project")),
            PathBuf::from("/home/user/projects/mars")
        );
    }

    #[test]
    fn test_cli_workdir_then_project_then_install() {
        let mut env = env();
        env.cli_workdir = Some(PathBuf::from("/cli/dir"));
        assert_eq!(
            resolve_target(None, &env, Some("/server/project")),
            PathBuf::from("/cli/dir")
        );
        assert!(!needs_project_lookup(None, &env));

        env.cli_workdir = None;
        assert!(needs_project_lookup(Some(""), &env));
        assert_eq!(
            resolve_target(Some(""), &env, Some("/server/project")),
            PathBuf::from("/server/project")
        );
        assert_eq!(resolve_target(None, &env, None), PathBuf::from("/opt/mars"));
    }

    #[cfg(unix)]
    #[test]
    fn test_launcher_success_and_failure() {
        let ok = EditorLauncher {
            command: "true".to_string(),
            macos_fallback: false,
        };
        assert!(ok.open(Path::new("/tmp")).is_ok());

        let failing = EditorLauncher {
            command: "false".to_string(),
            macos_fallback: false,
        };
        match failing.open(Path::new("/tmp")) {
            Err(EditorError::Failed(message)) => assert_eq!(message, "Failed to open VS Code"),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_command() {
        let launcher = EditorLauncher {
            command: "mars-test-no-such-editor".to_string(),
            macos_fallback: false,
        };
        assert!(matches!(
            launcher.open(Path::new(".")),
            Err(EditorError::CommandNotFound)
        ));
    }
}
