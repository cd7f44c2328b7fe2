//! Port ownership arbitration
//!
//! Before launching onto a port we may have to evict whatever currently holds
//! it (a stale server from a previous run, or one serving the wrong
//! directory). [`PortArbiter::kill_occupant()`] never fails; it reports what it
//! did through [`KillOutcome`].

use std::io;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use mars_core::prelude::*;

/// How long to wait for the OS to release the port after a kill
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// OS primitives for finding and signalling port holders
#[cfg_attr(test, mockall::automock)]
pub trait PortOccupancy: Send + Sync {
    /// PIDs listening on `port`, excluding our own process
    fn occupants(&self, port: u16) -> io::Result<Vec<u32>>;

    /// Ask `pid` to terminate gracefully
    fn terminate(&self, pid: u32) -> io::Result<()>;
}

/// Result of a port eviction attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillOutcome {
    /// Nothing was listening
    NoOccupant,
    /// Every occupant was signalled
    Killed { pids: Vec<u32> },
    /// Some signals failed
    Partial { killed: Vec<u32>, failed: Vec<u32> },
    /// The occupant lookup itself failed
    LookupFailed { reason: String },
}

impl KillOutcome {
    /// `true` if at least one process was signalled
    pub fn killed_any(&self) -> bool {
        match self {
            KillOutcome::Killed { pids } => !pids.is_empty(),
            KillOutcome::Partial { killed, .. } => !killed.is_empty(),
            KillOutcome::NoOccupant | KillOutcome::LookupFailed { .. } => false,
        }
    }
}

/// Evicts port holders through a [`PortOccupancy`] backend
#[derive(Clone)]
pub struct PortArbiter {
    occupancy: Arc<dyn PortOccupancy>,
    settle: Duration,
}

impl std::fmt::Debug for PortArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortArbiter")
            .field("settle", &self.settle)
            .finish_non_exhaustive()
    }
}

impl PortArbiter {
    /// Arbiter backed by `lsof`/`kill` (unix) or `netstat`/`taskkill` (windows)
    pub fn system() -> Self {
        Self::new(Arc::new(SystemPortOccupancy))
    }

    pub fn new(occupancy: Arc<dyn PortOccupancy>) -> Self {
        Self {
            occupancy,
            settle: DEFAULT_SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Terminate every process listening on `port`.
    ///
    /// Waits the settle delay only when at least one signal was delivered.
    pub async fn kill_occupant(&self, port: u16) -> KillOutcome {
        let occupancy = Arc::clone(&self.occupancy);
        let outcome = tokio::task::spawn_blocking(move || evict(occupancy.as_ref(), port))
            .await
            .unwrap_or_else(|e| KillOutcome::LookupFailed {
                reason: format!("lookup task failed: {}", e),
            });

        match &outcome {
            KillOutcome::NoOccupant => debug!("No process listening on port {}", port),
            KillOutcome::Killed { pids } => info!("Terminated {:?} on port {}", pids, port),
            KillOutcome::Partial { killed, failed } => warn!(
                "Port {}: terminated {:?}, failed to terminate {:?}",
                port, killed, failed
            ),
            KillOutcome::LookupFailed { reason } => {
                warn!("Could not look up processes on port {}: {}", port, reason)
            }
        }

        if outcome.killed_any() {
            tokio::time::sleep(self.settle).await;
        }
        outcome
    }
}

fn evict(occupancy: &dyn PortOccupancy, port: u16) -> KillOutcome {
    let pids = match occupancy.occupants(port) {
        Ok(pids) => pids,
        Err(e) => {
            return KillOutcome::LookupFailed {
                reason: e.to_string(),
            }
        }
    };
    if pids.is_empty() {
        return KillOutcome::NoOccupant;
    }

    let mut killed = Vec::new();
    let mut failed = Vec::new();
    for pid in pids {
        match occupancy.terminate(pid) {
            Ok(()) => killed.push(pid),
            Err(e) => {
                warn!("Failed to terminate pid {}: {}", pid, e);
                failed.push(pid);
            }
        }
    }

    if failed.is_empty() {
        KillOutcome::Killed { pids: killed }
    } else {
        KillOutcome::Partial { killed, failed }
    }
}

/// Real OS backend
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPortOccupancy;

impl PortOccupancy for SystemPortOccupancy {
    #[cfg(unix)]
    fn occupants(&self, port: u16) -> io::Result<Vec<u32>> {
        let output = Command::new("lsof")
            .args(["-ti", &format!("tcp:{}", port), "-sTCP:LISTEN"])
            .output()?;

        // lsof exits 1 when nothing matches
        if !output.status.success() && !output.stderr.is_empty() {
            return Err(io::Error::other(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        let mut pids = parse_pid_list(&String::from_utf8_lossy(&output.stdout));
        pids.retain(|pid| *pid != std::process::id());
        Ok(pids)
    }

    #[cfg(windows)]
    fn occupants(&self, port: u16) -> io::Result<Vec<u32>> {
        let output = Command::new("netstat").args(["-ano", "-p", "TCP"]).output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "netstat exited with {}",
                output.status
            )));
        }
        let mut pids = parse_netstat_listeners(&String::from_utf8_lossy(&output.stdout), port);
        pids.retain(|pid| *pid != std::process::id());
        Ok(pids)
    }

    #[cfg(unix)]
    fn terminate(&self, pid: u32) -> io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(io::Error::from)
    }

    #[cfg(windows)]
    fn terminate(&self, pid: u32) -> io::Result<()> {
        let status = Command::new("taskkill")
            .args(["/PID", &pid.to_string()])
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("taskkill exited with {}", status)))
        }
    }
}

/// One PID per line, duplicates removed, order kept
pub fn parse_pid_list(output: &str) -> Vec<u32> {
    let mut pids = Vec::new();
    for pid in output.lines().filter_map(|line| line.trim().parse::<u32>().ok()) {
        if !pids.contains(&pid) {
            pids.push(pid);
        }
    }
    pids
}

/// PIDs of `LISTENING` rows whose local address ends in `:port`
pub fn parse_netstat_listeners(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{}", port);
    let mut pids = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // Proto  Local Address  Foreign Address  State  PID
        let [proto, local, _, state, pid] = fields.as_slice() else {
            continue;
        };
        if !proto.eq_ignore_ascii_case("TCP") || !state.eq_ignore_ascii_case("LISTENING") {
            continue;
        }
        if !local.ends_with(&suffix) {
            continue;
        }
        if let Ok(pid) = pid.parse::<u32>() {
            if pid != 0 && !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }
    pids
}
