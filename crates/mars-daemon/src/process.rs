//! opencode server process management

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Notify};

use mars_core::prelude::*;
use mars_core::{ServerConfig, ServerProcessEvent};

use crate::locator::BinaryPath;

/// Log target for lines the server writes to stdout/stderr
const SERVER_LOG_TARGET: &str = "mars::server";

/// How long to wait for the wait task after a force kill
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Fully-resolved launch parameters: `<binary> serve --port P --hostname H [workdir]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
}

impl LaunchCommand {
    pub fn serve(binary: &BinaryPath, config: &ServerConfig, workdir: Option<&Path>) -> Self {
        let mut args: Vec<OsString> = vec![
            "serve".into(),
            "--port".into(),
            config.port().to_string().into(),
            "--hostname".into(),
            config.host().into(),
        ];
        if let Some(dir) = workdir {
            args.push(dir.as_os_str().to_os_string());
        }
        Self {
            program: binary.program().to_os_string(),
            args,
            current_dir: workdir.map(Path::to_path_buf),
        }
    }

    /// Shell-like rendering for logs
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// An owned opencode server child process.
///
/// The `Child` is moved into a background wait task that records the exit
/// code. `ServerProcess` keeps a kill channel for force-kill requests, an
/// atomic flag for synchronous `has_exited()` checks and a [`Notify`] so
/// `shutdown()` can await exit without polling.
pub struct ServerProcess {
    pid: Option<u32>,
    /// Consumed on first force kill (or on drop)
    kill_tx: Option<oneshot::Sender<()>>,
    exited: Arc<AtomicBool>,
    exit_code: Arc<OnceLock<Option<i32>>>,
    exit_notify: Arc<Notify>,
}

impl std::fmt::Debug for ServerProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerProcess")
            .field("pid", &self.pid)
            .field("exited", &self.has_exited())
            .finish()
    }
}

impl ServerProcess {
    /// Spawn the server.
    ///
    /// Output lines are logged and, when `event_tx` is given, forwarded as
    /// [`ServerProcessEvent`]s along with the final exit notification.
    pub fn spawn(
        launch: &LaunchCommand,
        event_tx: Option<mpsc::Sender<ServerProcessEvent>>,
    ) -> Result<Self> {
        info!("Spawning server: {}", launch.display());

        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &launch.current_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::binary_not_found(launch.program.to_string_lossy())
            } else {
                Error::process_spawn(e.to_string())
            }
        })?;

        let pid = child.id();
        info!("Server process started with PID: {:?}", pid);

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(Self::output_reader(
                stdout,
                event_tx.clone(),
                ServerProcessEvent::Stdout,
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(Self::output_reader(
                stderr,
                event_tx.clone(),
                ServerProcessEvent::Stderr,
            ));
        }

        let exited = Arc::new(AtomicBool::new(false));
        let exit_code = Arc::new(OnceLock::new());
        let exit_notify = Arc::new(Notify::new());
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(Self::wait_for_exit(
            child,
            kill_rx,
            event_tx,
            Arc::clone(&exited),
            Arc::clone(&exit_code),
            Arc::clone(&exit_notify),
        ));

        Ok(Self {
            pid,
            kill_tx: Some(kill_tx),
            exited,
            exit_code,
            exit_notify,
        })
    }

    /// Background task: owns `child`, waits for it to exit, records the code.
    ///
    /// Ends when the child exits on its own or when `kill_rx` fires.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        event_tx: Option<mpsc::Sender<ServerProcessEvent>>,
        exited: Arc<AtomicBool>,
        exit_code: Arc<OnceLock<Option<i32>>>,
        exit_notify: Arc<Notify>,
    ) {
        let code: Option<i32> = tokio::select! {
            result = child.wait() => match result {
                Ok(status) => {
                    info!("Server process exited with status: {}", status);
                    status.code()
                }
                Err(e) => {
                    error!("Error waiting for server process: {}", e);
                    None
                }
            },
            _ = kill_rx => {
                info!("Kill signal received, force-killing server process");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill server process: {}", e);
                }
                match child.wait().await {
                    Ok(status) => status.code(),
                    Err(e) => {
                        error!("Error waiting after kill: {}", e);
                        None
                    }
                }
            }
        };

        // Publish state before waking waiters so has_exited() is already true
        let _ = exit_code.set(code);
        exited.store(true, Ordering::Release);
        exit_notify.notify_waiters();

        if let Some(tx) = event_tx {
            let _ = tx.send(ServerProcessEvent::Exited { code }).await;
        }
    }

    async fn output_reader<R>(
        stream: R,
        tx: Option<mpsc::Sender<ServerProcessEvent>>,
        wrap: fn(String) -> ServerProcessEvent,
    ) where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(stream).lines();
        let mut tx = tx;

        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: SERVER_LOG_TARGET, "{}", line);

            if let Some(sender) = &tx {
                if sender.send(wrap(line)).await.is_err() {
                    // Keep draining the pipe so the child never blocks on a full buffer
                    tx = None;
                }
            }
        }
        trace!("server output reader finished");
    }

    /// Gracefully stop the server.
    ///
    /// Sends a termination signal, waits up to `grace` for exit, then
    /// force-kills through the wait task.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<()> {
        if self.has_exited() {
            debug!("Server process already exited");
            return Ok(());
        }

        info!("Stopping server process {:?}", self.pid);
        // Create the notified() future before the last check so a fast exit is not missed
        let exit_notify = Arc::clone(&self.exit_notify);
        let notified = exit_notify.notified();
        if !self.terminate_gracefully() {
            return self.force_kill().await;
        }
        if self.has_exited() {
            return Ok(());
        }

        match tokio::time::timeout(grace, notified).await {
            Ok(()) => {
                info!("Server process exited gracefully");
                Ok(())
            }
            Err(_) => {
                warn!("Server did not exit within {:?}, force killing", grace);
                self.force_kill().await
            }
        }
    }

    /// SIGTERM on unix; `false` when no graceful signal could be delivered
    #[cfg(unix)]
    fn terminate_gracefully(&self) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            return false;
        };
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send SIGTERM to {}: {}", pid, e);
                false
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate_gracefully(&self) -> bool {
        false
    }

    /// Ask the wait task to kill the child and wait briefly for the reap
    async fn force_kill(&mut self) -> Result<()> {
        let exit_notify = Arc::clone(&self.exit_notify);
        let notified = exit_notify.notified();
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
        if self.has_exited() {
            return Ok(());
        }
        if tokio::time::timeout(KILL_REAP_TIMEOUT, notified).await.is_err() {
            warn!("Server process {:?} was not reaped after kill", self.pid);
        }
        Ok(())
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        !self.has_exited()
    }

    /// Exit code once the process has exited (`None` inside when killed by a signal)
    pub fn exit_code(&self) -> Option<Option<i32>> {
        self.exit_code.get().copied()
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("ServerProcess dropped while process may still be running");
            if let Some(tx) = self.kill_tx.take() {
                let _ = tx.send(());
            }
        }
    }
}
