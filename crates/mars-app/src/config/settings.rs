//! Settings parser for `<config_dir>/mars/config.toml`

use std::path::{Path, PathBuf};

use super::types::Settings;
use mars_core::prelude::*;

const CONFIG_DIR: &str = "mars";
const CONFIG_FILENAME: &str = "config.toml";

/// Per-user config file location, if the platform has a config directory
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILENAME))
}

/// Load settings from the per-user config file
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings() -> Settings {
    match config_file_path() {
        Some(path) => load_settings_from(&path),
        None => {
            debug!("No config directory on this platform, using defaults");
            Settings::default()
        }
    }
}

/// Load settings from an explicit file
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings_from(config_path: &Path) -> Settings {
    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Write settings as TOML
///
/// Uses atomic write (temp file + rename).
pub fn save_settings_to(config_path: &Path, settings: &Settings) -> Result<()> {
    if let Some(dir) = config_path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::config(format!("Failed to create config dir: {}", e)))?;
    }

    let content = toml::to_string_pretty(settings)
        .map_err(|e| Error::config(format!("Failed to serialize settings: {}", e)))?;
    let full_content = format!("{}{}", generate_config_header(), content);

    let temp_path = config_path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &full_content)
        .map_err(|e| Error::config(format!("Failed to write temp file: {}", e)))?;
    std::fs::rename(&temp_path, config_path)
        .map_err(|e| Error::config(format!("Failed to rename temp file: {}", e)))?;

    info!("Saved settings to {:?}", config_path);
    Ok(())
}

fn generate_config_header() -> String {
    r#"# Mars shell configuration
# [server]  host/port of the opencode server
# [startup] readiness polling and shutdown timing
# [binary]  executable name or explicit path

"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_missing_file() {
        let temp = tempdir().unwrap();
        let settings = load_settings_from(&temp.path().join("config.toml"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[server]
port = 4500
restart_on_workdir_mismatch = false

[startup]
max_attempts = 60
"#,
        )
        .unwrap();

        let settings = load_settings_from(&path);
        assert_eq!(settings.server.port, 4500);
        assert!(!settings.server.restart_on_workdir_mismatch);
        assert_eq!(settings.startup.max_attempts, 60);
        assert_eq!(settings.startup.poll_interval_ms, 500);
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "not valid toml {{{{").unwrap();

        assert_eq!(load_settings_from(&path), Settings::default());
    }

    #[test]
    fn test_save_then_load() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let mut settings = Settings::default();
        settings.server.port = 4321;

        save_settings_to(&path, &settings).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Mars shell configuration"));
        assert_eq!(load_settings_from(&path), settings);
    }
}
