//! Server lifecycle supervision
//!
//! [`ServerSupervisor`] is the only component that spawns or stops the
//! backend. `start()` is idempotent: a live server serving the desired
//! directory is adopted rather than relaunched.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use mars_core::prelude::*;
use mars_core::{same_directory, ReadinessPolicy, ServerConfig, ServerProcessEvent, ServerState};

use crate::locator::{BinaryLocator, DEFAULT_BINARY_NAME};
use crate::port::PortArbiter;
use crate::probe::ConnectivityProbe;
use crate::process::{LaunchCommand, ServerProcess};
use crate::workdir::{resolve_workdir, LaunchEnv};

/// Default wait for a graceful server exit before force-killing
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Shortest timeout given to a readiness check near the end of the budget
const MIN_CHECK_WINDOW: Duration = Duration::from_millis(50);

/// Tunables for [`ServerSupervisor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorOptions {
    pub binary_name: String,
    /// Configured executable; bypasses discovery when it exists
    pub binary_path: Option<PathBuf>,
    pub readiness: ReadinessPolicy,
    pub stop_grace: Duration,
    /// Replace a live server that serves a different directory
    pub restart_on_workdir_mismatch: bool,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            binary_name: DEFAULT_BINARY_NAME.to_string(),
            binary_path: None,
            readiness: ReadinessPolicy::default(),
            stop_grace: DEFAULT_STOP_GRACE,
            restart_on_workdir_mismatch: true,
        }
    }
}

/// The process we launched, if any, plus whether we consider the server up
#[derive(Debug, Default)]
struct ServerHandle {
    process: Option<ServerProcess>,
    running: bool,
}

/// What to do with a server that already answers on our port
#[derive(Debug, PartialEq, Eq)]
enum Reconcile {
    Adopt,
    Replace,
}

/// Owns the server lifecycle state machine
#[derive(Debug)]
pub struct ServerSupervisor {
    config: ServerConfig,
    env: LaunchEnv,
    options: SupervisorOptions,
    probe: ConnectivityProbe,
    arbiter: PortArbiter,
    handle: ServerHandle,
    state: ServerState,
    process_events: Option<mpsc::Sender<ServerProcessEvent>>,
    spawn_count: u32,
    last_launch: Option<LaunchCommand>,
}

impl ServerSupervisor {
    pub fn new(config: ServerConfig, env: LaunchEnv, options: SupervisorOptions) -> Self {
        Self {
            probe: ConnectivityProbe::new(config.clone()),
            config,
            env,
            options,
            arbiter: PortArbiter::system(),
            handle: ServerHandle::default(),
            state: ServerState::Stopped,
            process_events: None,
            spawn_count: 0,
            last_launch: None,
        }
    }

    /// Replace the port arbiter (tests inject a fake occupancy backend)
    pub fn with_arbiter(mut self, arbiter: PortArbiter) -> Self {
        self.arbiter = arbiter;
        self
    }

    /// Forward output and exit notifications of launched processes
    pub fn with_process_events(mut self, tx: mpsc::Sender<ServerProcessEvent>) -> Self {
        self.process_events = Some(tx);
        self
    }

    /// Ensure a server serving the desired directory answers on the configured port.
    ///
    /// Adopts a matching live server without spawning. A live server serving
    /// another directory is evicted and replaced unless restarts are disabled.
    pub async fn start(&mut self) -> Result<()> {
        let desired = resolve_workdir(&self.env);
        debug!(
            "Starting server on {} (workdir: {:?})",
            self.config, desired
        );

        if self.probe.check().await {
            if self.reconcile(desired.as_deref()).await == Reconcile::Adopt {
                self.handle.running = true;
                self.state = ServerState::Running;
                return Ok(());
            }
        } else if self.handle.running || self.handle.process.is_some() {
            info!("Previously started server on {} is gone", self.config);
            self.discard_owned().await;
        }

        self.launch(desired.as_deref()).await
    }

    async fn reconcile(&mut self, desired: Option<&Path>) -> Reconcile {
        let Some(desired) = desired else {
            info!("Adopting server already running on {}", self.config);
            return Reconcile::Adopt;
        };

        // A server that cannot say what it serves counts as a mismatch
        let live = self.probe.current_project_dir().await;
        if let Some(live) = &live {
            if same_directory(Path::new(live), desired) {
                info!(
                    "Adopting server already running on {} for {}",
                    self.config, live
                );
                return Reconcile::Adopt;
            }
        }

        let live = live.unwrap_or_else(|| "an unknown directory".to_string());
        if !self.options.restart_on_workdir_mismatch {
            warn!(
                "Server on {} serves {} instead of {}; restart disabled, adopting anyway",
                self.config,
                live,
                desired.display()
            );
            return Reconcile::Adopt;
        }

        info!(
            "Server on {} serves {}, restarting for {}",
            self.config,
            live,
            desired.display()
        );
        self.discard_owned().await;
        self.arbiter.kill_occupant(self.config.port()).await;
        Reconcile::Replace
    }

    /// Spawn a new server and wait for it to answer
    async fn launch(&mut self, workdir: Option<&Path>) -> Result<()> {
        let binary = BinaryLocator::new(&self.options.binary_name, &self.env)
            .with_explicit_path(self.options.binary_path.clone())
            .locate();
        let launch = LaunchCommand::serve(&binary, &self.config, workdir);

        self.state = ServerState::Starting;
        let process = match ServerProcess::spawn(&launch, self.process_events.clone()) {
            Ok(process) => process,
            Err(e) => {
                error!("Failed to launch server: {}", e);
                self.state = ServerState::Stopped;
                return Err(e);
            }
        };

        self.spawn_count += 1;
        self.last_launch = Some(launch);
        self.handle.process = Some(process);
        self.wait_until_ready().await
    }

    /// Poll until the server answers, the child exits, or the budget runs out.
    ///
    /// Each check is capped to what is left of `policy.budget()`, so a port
    /// that accepts but never answers cannot stretch the wait.
    async fn wait_until_ready(&mut self) -> Result<()> {
        let policy = self.options.readiness;
        let started = Instant::now();
        let deadline = started + policy.budget();
        let mut attempts = 0;

        while attempts < policy.max_attempts {
            attempts += 1;
            tokio::time::sleep(policy.interval).await;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.probe.check_within(remaining.max(MIN_CHECK_WINDOW)).await {
                info!(
                    "Server ready on {} after {} attempt(s) ({:?})",
                    self.config,
                    attempts,
                    started.elapsed()
                );
                self.handle.running = true;
                self.state = ServerState::Running;
                return Ok(());
            }

            let exit_code = self.handle.process.as_ref().and_then(ServerProcess::exit_code);
            if let Some(exit_code) = exit_code {
                warn!("Server process exited during startup: {:?}", exit_code);
                self.handle.process = None;
                self.state = ServerState::Stopped;
                return Err(Error::StartupTimeout {
                    attempts,
                    waited: started.elapsed(),
                    exit_code,
                });
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        let waited = started.elapsed();
        warn!(
            "Server on {} not reachable after {} attempts ({:?})",
            self.config, attempts, waited
        );
        self.discard_owned().await;
        self.state = ServerState::Stopped;
        Err(Error::StartupTimeout {
            attempts,
            waited,
            exit_code: None,
        })
    }

    /// Shut down the owned process (if any) and forget it
    async fn discard_owned(&mut self) {
        if let Some(mut process) = self.handle.process.take() {
            if let Err(e) = process.shutdown(self.options.stop_grace).await {
                warn!("Error shutting down server process: {}", e);
            }
        }
        self.handle.running = false;
    }

    /// Stop the server. Always succeeds and is safe to call repeatedly.
    ///
    /// The owned process gets a graceful shutdown; whatever still holds the
    /// port afterwards is terminated too.
    pub async fn stop(&mut self) -> Result<()> {
        self.state = ServerState::Stopping;
        self.discard_owned().await;

        let outcome = self.arbiter.kill_occupant(self.config.port()).await;
        debug!("Port {} after stop: {:?}", self.config.port(), outcome);

        self.state = ServerState::Stopped;
        info!("Server on {} stopped", self.config);
        Ok(())
    }

    /// Live probe; never trusts cached state
    pub async fn is_running(&self) -> bool {
        self.probe.check().await
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// `true` while we hold a launched process that has not exited
    pub fn owns_process(&self) -> bool {
        self.handle
            .process
            .as_ref()
            .is_some_and(ServerProcess::is_running)
    }

    /// Number of processes launched by this supervisor
    pub fn spawn_count(&self) -> u32 {
        self.spawn_count
    }

    pub fn last_launch(&self) -> Option<&LaunchCommand> {
        self.last_launch.as_ref()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn env(&self) -> &LaunchEnv {
        &self.env
    }

    pub fn probe(&self) -> &ConnectivityProbe {
        &self.probe
    }
}
