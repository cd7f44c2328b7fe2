//! Logging setup for the `mars` binary
//!
//! Two layers share one `MARS_LOG` filter:
//! - a daily rolling file `mars.log.<date>` under `<data_local_dir>/mars/logs/`,
//!   always on, plain text with local timestamps and source locations;
//! - a compact stderr layer, added only with `--verbose`.
//!
//! Library crates only emit events; nothing outside `main` calls [`init()`].
//!
//! ```bash
//! MARS_LOG=debug mars --verbose
//! MARS_LOG=mars_daemon=trace,mars::server=debug mars
//! ```

use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Environment variable holding the filter directives
pub const LOG_ENV_VAR: &str = "MARS_LOG";

/// Directives used when `MARS_LOG` is unset, empty or unparsable
pub const DEFAULT_FILTER: &str = "mars=info,mars_shell=info,mars_app=info,mars_daemon=info,warn";

const LOG_FILE_PREFIX: &str = "mars.log";

/// Install the global subscriber; call once from `main`.
pub fn init(verbose: bool) -> Result<()> {
    let log_dir = log_directory();
    std::fs::create_dir_all(&log_dir)?;

    let file_layer = fmt::layer()
        .with_writer(RollingFileAppender::new(
            Rotation::DAILY,
            &log_dir,
            LOG_FILE_PREFIX,
        ))
        .with_ansi(false)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(fmt::time::ChronoLocal::new(
            "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        ));

    let stderr_layer = verbose.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact()
    });

    let directives = filter_directives(std::env::var(LOG_ENV_VAR).ok().as_deref());
    tracing_subscriber::registry()
        .with(env_filter(&directives))
        .with(file_layer)
        .with(stderr_layer)
        .init();

    tracing::info!("Mars logging to {} (stderr: {})", log_dir.display(), verbose);
    Ok(())
}

/// `<data_local_dir>/mars/logs`, or `./mars/logs` without a data dir
pub fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mars")
        .join("logs")
}

fn filter_directives(env_value: Option<&str>) -> String {
    match env_value.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

fn env_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
