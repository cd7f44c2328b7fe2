//! GUI settings persistence
//!
//! The GUI owns the shape of its settings; we store the JSON document as-is in
//! the per-user config directory so it survives app updates.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde_json::Value;

use mars_core::prelude::*;

const SETTINGS_DIR: &str = "Mars";
const SETTINGS_FILENAME: &str = "settings.json";

/// JSON settings file guarded by advisory file locks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config_dir>/Mars/settings.json`
    pub fn user() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::settings("no per-user config directory on this platform"))?;
        Ok(Self::new(dir.join(SETTINGS_DIR).join(SETTINGS_FILENAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored settings, or an empty object when nothing was saved yet
    pub fn load(&self) -> Result<Value> {
        if !self.path.exists() {
            debug!("No settings at {:?}", self.path);
            return Ok(Value::Object(Default::default()));
        }

        let mut file = File::open(&self.path)
            .map_err(|e| Error::settings(format!("Failed to open settings: {}", e)))?;
        file.lock_shared()
            .map_err(|e| Error::settings(format!("Failed to lock settings: {}", e)))?;

        let mut content = String::new();
        let read = file.read_to_string(&mut content);
        let _ = file.unlock();
        read.map_err(|e| Error::settings(format!("Failed to read settings: {}", e)))?;

        serde_json::from_str(&content)
            .map_err(|e| Error::settings(format!("Invalid settings file: {}", e)))
    }

    /// Replace the stored settings
    pub fn save(&self, settings: &Value) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| Error::settings(format!("Failed to create settings dir: {}", e)))?;
        }
        let content = serde_json::to_string_pretty(settings)?;

        // Truncate only after the lock is held
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| Error::settings(format!("Failed to open settings: {}", e)))?;
        file.lock_exclusive()
            .map_err(|e| Error::settings(format!("Failed to lock settings: {}", e)))?;

        let written = file
            .set_len(0)
            .and_then(|_| file.write_all(content.as_bytes()))
            .and_then(|_| file.flush());
        let _ = file.unlock();
        written.map_err(|e| Error::settings(format!("Failed to write settings: {}", e)))?;

        info!("Saved settings to {:?}", self.path);
        Ok(())
    }
}
