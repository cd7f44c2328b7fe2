//! Liveness checks against a running server

use std::time::Duration;

use mars_core::prelude::*;
use mars_core::ServerConfig;
use serde_json::Value;

/// Timeout for the `/config` liveness request
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(1);

/// Timeout for the `/project/current` request
pub const PROJECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Stateless "is something answering on host:port" check.
///
/// Never mutates anything and never retries; callers decide how often to ask.
#[derive(Debug, Clone)]
pub struct ConnectivityProbe {
    config: ServerConfig,
    client: reqwest::Client,
}

impl ConnectivityProbe {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            client: loopback_client(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// `true` only if `GET /config` answers with a 2xx status within the timeout
    pub async fn check(&self) -> bool {
        self.check_within(CHECK_TIMEOUT).await
    }

    /// Like [`check()`](Self::check), but gives up after `limit` if that is
    /// shorter than [`CHECK_TIMEOUT`]
    pub async fn check_within(&self, limit: Duration) -> bool {
        match self.try_check_within(limit).await {
            Ok(()) => true,
            Err(e) => {
                trace!("Liveness check of {} failed: {}", self.config, e);
                false
            }
        }
    }

    /// Same as [`check()`](Self::check) but keeps the failure reason
    pub async fn try_check(&self) -> Result<()> {
        self.try_check_within(CHECK_TIMEOUT).await
    }

    async fn try_check_within(&self, limit: Duration) -> Result<()> {
        let url = format!("{}/config", self.config.base_url());
        let response = self
            .client
            .get(&url)
            .timeout(limit.min(CHECK_TIMEOUT))
            .send()
            .await
            .map_err(|e| Error::connectivity(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::connectivity(format!("GET /config returned {}", status)))
        }
    }

    /// Project directory the live server reports, if it answers
    pub async fn current_project_dir(&self) -> Option<String> {
        let url = format!("{}/project/current", self.config.base_url());
        let response = self
            .client
            .get(&url)
            .timeout(PROJECT_TIMEOUT)
            .send()
            .await
            .inspect_err(|e| debug!("GET /project/current failed: {}", e))
            .ok()?;

        if !response.status().is_success() {
            debug!("GET /project/current returned {}", response.status());
            return None;
        }

        let body: Value = response
            .json()
            .await
            .inspect_err(|e| debug!("Invalid /project/current body: {}", e))
            .ok()?;
        project_path(&body)
    }
}

/// `path`, falling back to `worktree`
fn project_path(body: &Value) -> Option<String> {
    ["path", "worktree"]
        .iter()
        .filter_map(|key| body.get(key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// HTTP client for talking to a loopback server.
///
/// System proxies must not intercept `127.0.0.1` traffic.
pub(crate) fn loopback_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .build()
        .unwrap_or_else(|e| {
            warn!("Failed to build HTTP client ({}), using defaults", e);
            reqwest::Client::new()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{unused_port, MockServer, SilentListener};
    use serde_json::json;

    #[test]
    fn test_project_path_prefers_path() {
        assert_eq!(
            project_path(&json!({"path": "/a", "worktree": "/b"})),
            Some("/a".to_string())
        );
        assert_eq!(
            project_path(&json!({"worktree": "/b"})),
            Some("/b".to_string())
        );
        assert_eq!(project_path(&json!({"path": ""})), None);
        assert_eq!(project_path(&json!({"id": 1})), None);
    }

    #[tokio::test]
    async fn test_check_false_when_nothing_listens() {
        let probe = ConnectivityProbe::new(ServerConfig::new("127.0.0.1", unused_port()));
        assert!(!probe.check().await);
        assert!(probe.current_project_dir().await.is_none());
    }

    #[tokio::test]
    async fn test_check_true_against_live_server() {
        let server = MockServer::start().await;
        server.set_project_path("/work/project");

        let probe = ConnectivityProbe::new(server.config());
        assert!(probe.check().await);
        assert_eq!(
            probe.current_project_dir().await,
            Some("/work/project".to_string())
        );
    }

    #[tokio::test]
    async fn test_check_false_on_error_status() {
        let server = MockServer::start().await;
        server.set_config_status(503);

        let probe = ConnectivityProbe::new(server.config());
        assert!(!probe.check().await);
        assert!(matches!(
            probe.try_check().await,
            Err(Error::Connectivity { .. })
        ));
    }

    #[tokio::test]
    async fn test_check_within_gives_up_on_silent_server() {
        let listener = SilentListener::start().await;
        let connectivity = ConnectivityProbe::new(listener.config());

        let started = std::time::Instant::now();
        assert!(!connectivity.check_within(Duration::from_millis(100)).await);
        assert!(started.elapsed() < Duration::from_millis(800));
    }
}
