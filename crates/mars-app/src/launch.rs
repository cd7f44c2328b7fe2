//! Command-line workdir capture
//!
//! The shell can be started as `mars .`, `mars -C ~/src/app`, or by a desktop
//! launcher that appends a document path to argv. Relative paths always mean
//! "relative to where the user launched from", not our current directory.

use std::path::{Path, PathBuf};

use mars_core::prelude::*;
use mars_daemon::LaunchEnv;

/// Workdir hints collected from the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkdirArgs {
    /// `-C` / `--workdir`
    pub workdir: Option<PathBuf>,
    /// Positional path
    pub path: Option<PathBuf>,
    /// Raw arguments scanned when neither hint is a directory
    pub raw_args: Vec<String>,
}

/// Resolve the CLI workdir override.
///
/// `--workdir` wins over the positional path; if neither names a directory,
/// the first non-flag raw argument that does is used.
pub fn resolve_cli_workdir(args: &WorkdirArgs, env: &LaunchEnv) -> Option<PathBuf> {
    for candidate in [&args.workdir, &args.path].into_iter().flatten() {
        let resolved = env.resolve_from_launch_dir(candidate);
        if resolved.is_dir() {
            info!("Using CLI workdir override: {}", resolved.display());
            return Some(resolved);
        }
    }

    let scanned = args
        .raw_args
        .iter()
        .filter(|arg| !arg.starts_with('-') && !arg.is_empty())
        .map(|arg| env.resolve_from_launch_dir(Path::new(arg)))
        .find(|resolved| resolved.is_dir());
    if let Some(found) = scanned {
        info!("Found workdir via argument scan: {}", found.display());
        return Some(found);
    }

    if args.workdir.is_some() || args.path.is_some() {
        warn!("CLI workdir argument provided but not a directory");
    }
    None
}

/// Capture the process environment and apply the CLI workdir override
pub fn capture_launch_env(args: &WorkdirArgs) -> LaunchEnv {
    let env = LaunchEnv::from_process();
    debug!(
        "Launch directory: {:?}, PWD: {:?}",
        env.launch_cwd, env.pwd
    );
    let cli_workdir = resolve_cli_workdir(args, &env);
    env.with_cli_workdir(cli_workdir)
}
