//! Runtime paths: where the state document and settings file live.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::settings::Settings;

/// Resolved locations for one cirun installation.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub state_file: PathBuf,
    pub settings_file: PathBuf,
}

impl Config {
    /// Resolve paths, preferring an explicit directory over the platform
    /// data directory.
    pub fn new(state_dir: Option<PathBuf>) -> Result<Self> {
        let state_dir = match state_dir {
            Some(dir) => dir,
            None => dirs::data_dir()
                .context("Failed to locate a data directory; pass --state-dir")?
                .join("cirun"),
        };
        let state_file = state_dir.join("state.json");
        let settings_file = state_dir.join("cirun.toml");
        Ok(Self {
            state_dir,
            state_file,
            settings_file,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).with_context(|| {
            format!("Failed to create state directory {}", self.state_dir.display())
        })?;
        Ok(())
    }

    pub fn load_settings(&self) -> Result<Settings> {
        Settings::load(&self.settings_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn explicit_dir_wins() {
        let dir = tempdir().unwrap();
        let config = Config::new(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(config.state_file, dir.path().join("state.json"));
        assert_eq!(config.settings_file, dir.path().join("cirun.toml"));
    }

    #[test]
    fn ensure_directories_is_idempotent() {
        let dir = tempdir().unwrap();
        let config = Config::new(Some(dir.path().join("nested"))).unwrap();
        config.ensure_directories().unwrap();
        config.ensure_directories().unwrap();
        assert!(config.state_dir.exists());
    }

    #[test]
    fn settings_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::new(Some(dir.path().to_path_buf())).unwrap();
        let settings = config.load_settings().unwrap();
        assert_eq!(settings.between_item_delay_ms, 3000);
    }
}
