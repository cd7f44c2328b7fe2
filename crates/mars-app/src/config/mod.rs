//! Configuration file parsing for the Mars shell
//!
//! Supports:
//! - `<config_dir>/mars/config.toml` - Server, startup and binary settings

pub mod settings;
pub mod types;

pub use settings::{config_file_path, load_settings, load_settings_from, save_settings_to};
pub use types::*;
