//! opencode binary discovery
//!
//! GUI launch contexts (Finder, `.app` bundles, desktop entries) usually get a
//! minimal `PATH`, so a plain `which` is not enough. After the search-path
//! lookup fails we probe the places node version managers and package managers
//! install global binaries, then every directory of the inherited `PATH`.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use mars_core::prelude::*;

use crate::workdir::LaunchEnv;

/// Default backend server executable name
pub const DEFAULT_BINARY_NAME: &str = "opencode";

/// The executable to launch: a verified path, or the bare name as a last resort
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryPath {
    /// Existing executable file
    Resolved(PathBuf),
    /// Nothing found; let the OS search at spawn time
    Bare(String),
}

impl BinaryPath {
    pub fn is_resolved(&self) -> bool {
        matches!(self, BinaryPath::Resolved(_))
    }

    /// Program argument for `Command::new`
    pub fn program(&self) -> &std::ffi::OsStr {
        match self {
            BinaryPath::Resolved(path) => path.as_os_str(),
            BinaryPath::Bare(name) => name.as_ref(),
        }
    }
}

impl fmt::Display for BinaryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryPath::Resolved(path) => write!(f, "{}", path.display()),
            BinaryPath::Bare(name) => write!(f, "{}", name),
        }
    }
}

/// Finds the backend server executable.
///
/// Never fails: [`BinaryLocator::locate()`] always returns something to try.
/// Results are not cached; call it once per start attempt.
#[derive(Debug, Clone)]
pub struct BinaryLocator {
    name: String,
    explicit: Option<PathBuf>,
    path_var: Option<OsString>,
    nvm_bin: Option<PathBuf>,
    home: Option<PathBuf>,
    system_dirs: Vec<PathBuf>,
}

impl BinaryLocator {
    /// Create a locator for `name` using the captured launch environment
    pub fn new(name: impl Into<String>, env: &LaunchEnv) -> Self {
        Self {
            name: name.into(),
            explicit: None,
            path_var: env.path.clone(),
            nvm_bin: env.nvm_bin.clone(),
            home: env.home.clone(),
            system_dirs: default_system_dirs(),
        }
    }

    /// Prefer a configured path when it points at an executable
    pub fn with_explicit_path(mut self, path: Option<PathBuf>) -> Self {
        self.explicit = path;
        self
    }

    /// Replace the system-wide install directories (`/usr/local/bin`, Homebrew)
    pub fn with_system_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.system_dirs = dirs;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Locate the executable.
    ///
    /// Order: configured path, search-path lookup, fallback candidates, bare name.
    pub fn locate(&self) -> BinaryPath {
        if let Some(explicit) = &self.explicit {
            if is_executable(explicit) {
                info!("Using configured {} at: {}", self.name, explicit.display());
                return BinaryPath::Resolved(explicit.clone());
            }
            warn!(
                "Configured {} path is not an executable file: {}",
                self.name,
                explicit.display()
            );
        }

        if let Some(found) = self.search_path_lookup() {
            info!("Found {} in PATH: {}", self.name, found.display());
            return BinaryPath::Resolved(found);
        }

        let candidates = self.candidates();
        if let Some(found) = candidates.iter().find(|path| is_executable(path)) {
            info!("Found {} at: {}", self.name, found.display());
            return BinaryPath::Resolved(found.clone());
        }

        let preview: Vec<_> = candidates.iter().take(5).map(|p| p.display()).collect();
        warn!(
            "Could not find {} binary. Searched {} locations, first: {:?}",
            self.name,
            candidates.len(),
            preview.iter().map(|p| p.to_string()).collect::<Vec<_>>()
        );
        BinaryPath::Bare(self.name.clone())
    }

    /// OS-level executable search against the captured `PATH`
    fn search_path_lookup(&self) -> Option<PathBuf> {
        let path_var = self.path_var.as_ref()?;
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        which::which_in(&self.name, Some(path_var), cwd)
            .inspect_err(|e| debug!("which lookup for {} failed: {}", self.name, e))
            .ok()
    }

    /// Fallback candidates, in probe order, without duplicates
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::new();

        if let Some(home) = &self.home {
            dirs.extend(nvm_version_bin_dirs(home));
        }
        if let Some(nvm_bin) = &self.nvm_bin {
            dirs.push(nvm_bin.clone());
        }
        let mut system = self.system_dirs.iter();
        // Global npm prefix comes before per-user installs, Homebrew after
        if let Some(first) = system.next() {
            dirs.push(first.clone());
        }
        if let Some(home) = &self.home {
            dirs.push(home.join(".npm-global").join("bin"));
        }
        dirs.extend(system.cloned());
        if let Some(home) = &self.home {
            dirs.push(home.join(".bun").join("bin"));
            dirs.push(home.join(".cargo").join("bin"));
            dirs.push(home.join(".local").join("bin"));
        }
        if let Some(path_var) = &self.path_var {
            dirs.extend(std::env::split_paths(path_var).filter(|p| !p.as_os_str().is_empty()));
        }

        let mut candidates: Vec<PathBuf> = Vec::with_capacity(dirs.len());
        for dir in dirs {
            for file_name in executable_names(&self.name) {
                let candidate = dir.join(&file_name);
                if !candidates.contains(&candidate) {
                    candidates.push(candidate);
                }
            }
        }
        candidates
    }
}

/// System-wide global install directories
fn default_system_dirs() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/opt/homebrew/bin"),
    ]
}

#[cfg(windows)]
fn executable_names(name: &str) -> Vec<String> {
    vec![
        name.to_string(),
        format!("{}.exe", name),
        format!("{}.cmd", name),
    ]
}

#[cfg(not(windows))]
fn executable_names(name: &str) -> Vec<String> {
    vec![name.to_string()]
}

/// `~/.nvm/versions/node/<version>/bin`, newest version first
fn nvm_version_bin_dirs(home: &Path) -> Vec<PathBuf> {
    let versions_dir = home.join(".nvm").join("versions").join("node");
    let Ok(entries) = std::fs::read_dir(&versions_dir) else {
        return Vec::new();
    };

    let mut versions: Vec<(Vec<u64>, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| {
            let key = parse_version(&entry.file_name().to_string_lossy());
            (key, entry.path().join("bin"))
        })
        .collect();

    versions.sort_by(|a, b| b.0.cmp(&a.0));
    versions.into_iter().map(|(_, bin)| bin).collect()
}

/// `v22.7.0` → `[22, 7, 0]`; non-numeric parts count as 0
fn parse_version(name: &str) -> Vec<u64> {
    name.trim_start_matches('v')
        .split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect()
}

/// Regular file with an execute bit (any file on non-unix platforms)
pub(crate) fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }

    #[cfg(not(unix))]
    {
        true
    }
}
