//! Mars - desktop shell for a local opencode server
//!
//! This is the binary entry point. All logic lives in the library crates.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser};

use mars_app::{capture_launch_env, load_settings, MarsApi, SettingsStore, WorkdirArgs};
use mars_shell::headless::{run_headless, HeadlessEvent, HeadlessOptions};

/// Mars - desktop shell for a local opencode server
#[derive(Parser, Debug)]
#[command(name = "mars")]
#[command(about = "Start and supervise a local opencode server", long_about = None)]
struct Args {
    /// Project directory the server should work in
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Project directory (takes precedence over PATH)
    #[arg(short = 'C', long, value_name = "DIR")]
    workdir: Option<PathBuf>,

    /// Server host (overrides config.toml)
    #[arg(long)]
    host: Option<String>,

    /// Server port (overrides config.toml)
    #[arg(long)]
    port: Option<u16>,

    /// Do not subscribe to the live event stream
    #[arg(long)]
    no_events: bool,

    /// Do not read commands from stdin
    #[arg(long)]
    no_stdin: bool,

    /// Stop whatever server holds the port and exit
    #[arg(long)]
    stop: bool,

    /// Also log to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Extra arguments passed by desktop launchers
    #[arg(hide = true, trailing_var_arg = true, allow_hyphen_values = true)]
    extra: Vec<String>,
}

impl Args {
    /// Parse `argv`, ignoring flags we do not define.
    ///
    /// Desktop launchers append their own switches (`-psn_0_1` on macOS);
    /// those must not abort startup.
    fn parse_known<I, T>(argv: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::try_parse_from(known_args(argv))
    }
}

/// `argv` minus any `-x`/`--name` token that is not one of our flags.
///
/// Everything after a bare `--` is kept as-is.
fn known_args<I, T>(argv: I) -> Vec<String>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    let command = Args::command();
    let longs: Vec<&str> = command
        .get_arguments()
        .filter_map(|arg| arg.get_long())
        .chain(["help"])
        .collect();
    let shorts: Vec<char> = command
        .get_arguments()
        .filter_map(|arg| arg.get_short())
        .chain(['h'])
        .collect();

    let mut kept = Vec::new();
    let mut passthrough = false;
    for (index, arg) in argv.into_iter().map(Into::into).enumerate() {
        let known = if index == 0 || passthrough || arg == "-" || !arg.starts_with('-') {
            true
        } else if arg == "--" {
            passthrough = true;
            true
        } else if let Some(long) = arg.strip_prefix("--") {
            let name = long.split('=').next().unwrap_or(long);
            longs.contains(&name)
        } else {
            arg[1..].chars().next().is_some_and(|c| shorts.contains(&c))
        };

        if known {
            kept.push(arg);
        }
    }
    kept
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let argv = std::env::args_os().map(|arg| arg.to_string_lossy().into_owned());
    let args = Args::parse_known(argv).unwrap_or_else(|e| e.exit());

    mars_core::logging::init(args.verbose)?;

    let settings = load_settings().with_overrides(args.host, args.port);
    settings.validate()?;

    let env = capture_launch_env(&WorkdirArgs {
        workdir: args.workdir,
        path: args.path,
        raw_args: args.extra,
    });
    let api = Arc::new(MarsApi::new(&settings, env, SettingsStore::user()?));

    if args.stop {
        let url = settings.server_config().base_url();
        let stopped = api.stop_server().await;
        if stopped["success"] == true {
            HeadlessEvent::server_stopped(&url).emit();
        }
        return Ok(());
    }

    run_headless(
        api,
        HeadlessOptions {
            events: !args.no_events,
            stdin: !args.no_stdin,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launcher_flag_is_ignored() {
        let args = Args::parse_known(["mars", "-psn_0_1"]).unwrap();
        assert_eq!(args.path, None);
        assert_eq!(args.workdir, None);
        assert!(!args.verbose);
    }

    #[test]
    fn test_known_flags_survive_unknown_ones() {
        let args = Args::parse_known([
            "mars",
            "-psn_0_12345",
            "-C",
            "work",
            "--bogus=1",
            "--port",
            "4100",
            "-v",
            "project",
        ])
        .unwrap();
        assert_eq!(args.workdir, Some(PathBuf::from("work")));
        assert_eq!(args.port, Some(4100));
        assert!(args.verbose);
        assert_eq!(args.path, Some(PathBuf::from("project")));
    }

    #[test]
    fn test_known_args_keeps_everything_after_double_dash() {
        assert_eq!(
            known_args(["mars", "--nope", "--", "--nope"]),
            vec!["mars", "--", "--nope"]
        );
    }

    #[test]
    fn test_bad_value_still_rejected() {
        assert!(Args::parse_known(["mars", "--port", "not-a-port"]).is_err());
    }
}
