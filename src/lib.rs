//! Mars shell library
//!
//! The `mars` binary parses the command line, loads configuration and hands a
//! [`mars_app::MarsApi`] to the headless runner.

pub mod headless;

// Re-export main entry points
pub use headless::{run_headless, HeadlessOptions};
