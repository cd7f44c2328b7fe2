//! Launch environment capture and working-directory resolution
//!
//! Desktop launchers (Finder, `open`, app bundles) often change the process
//! working directory before our code runs. The user's intent is rebuilt from
//! several redundant signals, captured once into [`LaunchEnv`] and consulted in
//! a fixed order by [`resolve_workdir()`].

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use mars_core::normalize_lexically;
use mars_core::prelude::*;

/// Server-specific working-directory override
pub const SERVER_WORKDIR_VAR: &str = "OPENCODE_WORKDIR";

/// Launch directory captured before the process normalizes its own cwd
pub const LAUNCH_CWD_VAR: &str = "MARS_LAUNCH_CWD";

/// Environment-derived inputs for binary discovery and workdir resolution.
///
/// Built once at startup with [`LaunchEnv::from_process()`] and passed down by
/// value, so components never read the process environment themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchEnv {
    /// Directory passed on the command line (`-C`, `--workdir` or positional)
    pub cli_workdir: Option<PathBuf>,
    /// `OPENCODE_WORKDIR`
    pub server_workdir: Option<PathBuf>,
    /// `MARS_LAUNCH_CWD`, or the shell's `PWD`/cwd at capture time
    pub launch_cwd: Option<PathBuf>,
    /// Inherited `PWD`
    pub pwd: Option<PathBuf>,
    /// Fallback derived from the executable's install location
    pub install_dir: Option<PathBuf>,
    /// Inherited `PATH`
    pub path: Option<OsString>,
    /// `NVM_BIN` of the active node runtime
    pub nvm_bin: Option<PathBuf>,
    /// User home directory
    pub home: Option<PathBuf>,
}

impl LaunchEnv {
    /// Capture the launch environment of the current process
    pub fn from_process() -> Self {
        let pwd = non_empty_var("PWD").map(PathBuf::from);
        let launch_cwd = non_empty_var(LAUNCH_CWD_VAR)
            .map(PathBuf::from)
            .or_else(|| pwd.clone())
            .or_else(|| std::env::current_dir().ok());

        Self {
            cli_workdir: None,
            server_workdir: non_empty_var(SERVER_WORKDIR_VAR).map(PathBuf::from),
            launch_cwd,
            pwd,
            install_dir: install_fallback_dir(),
            path: std::env::var_os("PATH").filter(|p| !p.is_empty()),
            nvm_bin: non_empty_var("NVM_BIN").map(PathBuf::from),
            home: dirs::home_dir(),
        }
    }

    /// Set the CLI workdir override
    pub fn with_cli_workdir(mut self, dir: Option<PathBuf>) -> Self {
        self.cli_workdir = dir;
        self
    }

    /// Resolve a possibly-relative path against the original launch directory.
    ///
    /// `open`-style launchers change cwd before we start, so `.` must mean the
    /// shell's directory, not ours.
    pub fn resolve_from_launch_dir(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let base = self
            .launch_cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        normalize_lexically(&base.join(path))
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Two levels above the directory holding the running executable
fn install_fallback_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let exe_dir = exe.parent()?;
    exe_dir.parent()?.parent().map(Path::to_path_buf)
}

/// Where a workdir candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkdirSource {
    CliOverride,
    ServerOverride,
    LaunchDirectory,
    ShellPwd,
    InstallFallback,
}

impl fmt::Display for WorkdirSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkdirSource::CliOverride => write!(f, "cli"),
            WorkdirSource::ServerOverride => write!(f, "{}", SERVER_WORKDIR_VAR),
            WorkdirSource::LaunchDirectory => write!(f, "{}", LAUNCH_CWD_VAR),
            WorkdirSource::ShellPwd => write!(f, "PWD"),
            WorkdirSource::InstallFallback => write!(f, "install location"),
        }
    }
}

/// One `(source, path)` pair in resolution order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkdirCandidate {
    pub source: WorkdirSource,
    pub path: PathBuf,
}

/// Ordered workdir candidates, computed fresh on every call
pub fn workdir_candidates(env: &LaunchEnv) -> Vec<WorkdirCandidate> {
    [
        (WorkdirSource::CliOverride, &env.cli_workdir),
        (WorkdirSource::ServerOverride, &env.server_workdir),
        (WorkdirSource::LaunchDirectory, &env.launch_cwd),
        (WorkdirSource::ShellPwd, &env.pwd),
        (WorkdirSource::InstallFallback, &env.install_dir),
    ]
    .into_iter()
    .filter_map(|(source, path)| {
        path.as_ref().map(|path| WorkdirCandidate {
            source,
            path: path.clone(),
        })
    })
    .collect()
}

/// Resolve the directory the server should treat as its project root.
///
/// The first candidate that is an existing directory wins. `None` means "no
/// explicit preference".
pub fn resolve_workdir(env: &LaunchEnv) -> Option<PathBuf> {
    workdir_candidates(env).into_iter().find_map(|candidate| {
        if candidate.path.is_dir() {
            debug!(
                "Workdir resolved from {}: {}",
                candidate.source,
                candidate.path.display()
            );
            Some(candidate.path)
        } else {
            trace!(
                "Skipping workdir candidate from {} (not a directory): {}",
                candidate.source,
                candidate.path.display()
            );
            None
        }
    })
}
