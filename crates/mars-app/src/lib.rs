//! mars-app - GUI-facing surface for the Mars desktop shell
//!
//! Wires configuration, the captured launch environment and the server
//! clients from [`mars_daemon`] into [`MarsApi`], the uniform-result facade a
//! window layer (or the headless runner) calls into.

pub mod api;
pub mod config;
pub mod editor;
pub mod files;
pub mod launch;
pub mod settings_store;

// Re-export primary types
pub use api::MarsApi;
pub use config::{load_settings, Settings};
pub use editor::{EditorError, EditorLauncher};
pub use files::{FileAccessError, FileEntry};
pub use launch::{capture_launch_env, resolve_cli_workdir, WorkdirArgs};
pub use settings_store::SettingsStore;

// Re-export daemon types the shell needs without depending on mars-daemon
pub use mars_daemon::{EventSubscription, LaunchEnv, StreamEnd};
