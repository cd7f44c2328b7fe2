//! # mars-daemon - opencode Server Management
//!
//! Finds, launches, reconciles and stops the local `opencode` server, and
//! talks to it over HTTP: one-shot REST calls and the live event stream.
//!
//! Depends on [`mars_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Discovery
//! - [`LaunchEnv`] - Environment captured once at startup
//! - [`resolve_workdir()`] - Pick the server's project directory
//! - [`BinaryLocator`] - Find the server executable on an impoverished `PATH`
//!
//! ### Lifecycle
//! - [`ServerSupervisor`] - Start (idempotent), stop and live-check the server
//! - [`ServerProcess`] - Owned child process with graceful-then-forced shutdown
//! - [`ConnectivityProbe`] - Side-effect-free liveness check
//! - [`PortArbiter`] - Evict whatever holds the server port
//!
//! ### Communication
//! - [`RequestGateway`] - REST endpoint wrappers
//! - [`EventStreamClient`] - Raw-socket SSE consumer for `/global/event`

pub mod api;
pub mod locator;
pub mod port;
pub mod probe;
pub mod process;
pub mod sse;
pub mod supervisor;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod workdir;

pub use api::{CommandRequest, CreateSessionRequest, PromptPart, PromptRequest, RequestGateway};
pub use locator::{BinaryLocator, BinaryPath, DEFAULT_BINARY_NAME};
pub use port::{KillOutcome, PortArbiter, PortOccupancy, SystemPortOccupancy};
pub use probe::ConnectivityProbe;
pub use process::{LaunchCommand, ServerProcess};
pub use sse::{
    parse_data_line, EventStream, EventStreamClient, EventSubscription, StreamEnd, EVENT_PATH,
};
pub use supervisor::{ServerSupervisor, SupervisorOptions, DEFAULT_STOP_GRACE};
pub use workdir::{
    resolve_workdir, workdir_candidates, LaunchEnv, WorkdirCandidate, WorkdirSource,
    LAUNCH_CWD_VAR, SERVER_WORKDIR_VAR,
};
