//! Configuration types for the Mars shell
//!
//! Defines:
//! - `Settings` - Contents of `config.toml`
//! - `ServerSettings`, `StartupSettings`, `BinarySettings` - Its sections

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mars_core::prelude::*;
use mars_core::{ReadinessPolicy, ServerConfig, DEFAULT_HOST, DEFAULT_PORT};
use mars_daemon::{SupervisorOptions, DEFAULT_BINARY_NAME};

/// Global shell settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,

    #[serde(default)]
    pub startup: StartupSettings,

    #[serde(default)]
    pub binary: BinarySettings,
}

/// `[server]` - where the backend listens
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Replace a live server that serves another directory
    #[serde(default = "default_true")]
    pub restart_on_workdir_mismatch: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            restart_on_workdir_mismatch: true,
        }
    }
}

/// `[startup]` - readiness polling and shutdown timing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StartupSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

/// `[binary]` - which executable to launch
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BinarySettings {
    #[serde(default = "default_binary_name")]
    pub name: String,

    /// Skip discovery and launch this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for BinarySettings {
    fn default() -> Self {
        Self {
            name: default_binary_name(),
            path: None,
        }
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    ReadinessPolicy::DEFAULT_MAX_ATTEMPTS
}

fn default_poll_interval_ms() -> u64 {
    ReadinessPolicy::DEFAULT_INTERVAL.as_millis() as u64
}

fn default_stop_grace_secs() -> u64 {
    mars_daemon::DEFAULT_STOP_GRACE.as_secs()
}

fn default_binary_name() -> String {
    DEFAULT_BINARY_NAME.to_string()
}

impl Settings {
    /// Reject values the supervisor cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(Error::config_invalid("server.host must not be empty"));
        }
        if self.server.port == 0 {
            return Err(Error::config_invalid("server.port must be between 1 and 65535"));
        }
        if self.startup.max_attempts == 0 {
            return Err(Error::config_invalid("startup.max_attempts must be at least 1"));
        }
        if self.startup.poll_interval_ms == 0 {
            return Err(Error::config_invalid(
                "startup.poll_interval_ms must be at least 1",
            ));
        }
        if self.binary.name.trim().is_empty() {
            return Err(Error::config_invalid("binary.name must not be empty"));
        }
        Ok(())
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.server.host = host;
        }
        if let Some(port) = port {
            self.server.port = port;
        }
        self
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new(self.server.host.clone(), self.server.port)
    }

    pub fn readiness(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            max_attempts: self.startup.max_attempts,
            interval: Duration::from_millis(self.startup.poll_interval_ms),
        }
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            binary_name: self.binary.name.clone(),
            binary_path: self.binary.path.clone(),
            readiness: self.readiness(),
            stop_grace: Duration::from_secs(self.startup.stop_grace_secs),
            restart_on_workdir_mismatch: self.server.restart_on_workdir_mismatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 4096);
        assert!(settings.server.restart_on_workdir_mismatch);
        assert_eq!(settings.startup.max_attempts, 30);
        assert_eq!(settings.startup.poll_interval_ms, 500);
        assert_eq!(settings.startup.stop_grace_secs, 5);
        assert_eq!(settings.binary.name, "opencode");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let settings: Settings = toml::from_str(
            r#"
[server]
port = 5000

[binary]
path = "/opt/opencode/bin/opencode"
"#,
        )
        .unwrap();

        assert_eq!(settings.server.port, 5000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.startup, StartupSettings::default());
        assert_eq!(settings.binary.name, "opencode");
        assert_eq!(
            settings.binary.path,
            Some(PathBuf::from("/opt/opencode/bin/opencode"))
        );
    }

    #[test]
    fn test_validation_rejects_port_zero() {
        let settings = Settings::default().with_overrides(None, Some(0));
        assert!(matches!(
            settings.validate(),
            Err(Error::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let mut settings = Settings::default();
        settings.startup.max_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_supervisor_options_mapping() {
        let mut settings = Settings::default();
        settings.startup.max_attempts = 10;
        settings.startup.poll_interval_ms = 250;
        settings.server.restart_on_workdir_mismatch = false;

        let options = settings.supervisor_options();
        assert_eq!(options.readiness.max_attempts, 10);
        assert_eq!(options.readiness.interval, Duration::from_millis(250));
        assert_eq!(options.stop_grace, Duration::from_secs(5));
        assert!(!options.restart_on_workdir_mismatch);
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::default().with_overrides(Some("0.0.0.0".to_string()), Some(8080));
        assert_eq!(settings.server_config().base_url(), "http://0.0.0.0:8080");
    }
}
