//! User-facing settings, read from `cirun.toml`.
//!
//! Every key is optional with a documented default. The engine reads
//! these but does not own them; the CLI and (eventually) a real UI write
//! the file.
//!
//! # File format
//!
//! ```toml
//! instance_url = "https://example.service-now.com"
//! auto_close = true
//! between_item_delay_ms = 3000
//! affect_first = true
//! skip_auto_close = ["CHG0012345"]
//! close_notes = "Update CI เรียบร้อยครับ"
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Lowest allowed delay between queue items. The target application
/// needs settle time after a form submission before the next navigation
/// is safe.
pub const MIN_BETWEEN_ITEM_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base URL of the target instance.
    #[serde(default = "default_instance_url")]
    pub instance_url: String,
    /// Attempt the change-task closure sub-flow when a change request's
    /// items are done.
    #[serde(default)]
    pub auto_close: bool,
    /// Delay before advancing to the next queue item.
    #[serde(default = "default_between_item_delay_ms")]
    pub between_item_delay_ms: u64,
    /// Run an affect pass over all items before the update pass.
    #[serde(default)]
    pub affect_first: bool,
    /// Run only the affect pass.
    #[serde(default)]
    pub affect_only: bool,
    /// Run only the update pass.
    #[serde(default)]
    pub update_only: bool,
    /// Change numbers that must never be auto-closed.
    #[serde(default)]
    pub skip_auto_close: Vec<String>,
    /// Work notes written by the closure pages.
    #[serde(default = "default_close_notes")]
    pub close_notes: String,
}

fn default_instance_url() -> String {
    "https://example.service-now.com".to_string()
}

fn default_between_item_delay_ms() -> u64 {
    3000
}

fn default_close_notes() -> String {
    "Update CI เรียบร้อยครับ".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            instance_url: default_instance_url(),
            auto_close: false,
            between_item_delay_ms: default_between_item_delay_ms(),
            affect_first: false,
            affect_only: false,
            update_only: false,
            skip_auto_close: Vec::new(),
            close_notes: default_close_notes(),
        }
    }
}

impl Settings {
    /// Load from a TOML file, falling back to defaults when the file does
    /// not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings: Settings = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject contradictory mode flags.
    pub fn validate(&self) -> Result<()> {
        if self.affect_only && self.update_only {
            bail!("affect_only and update_only cannot both be set");
        }
        if self.affect_first && (self.affect_only || self.update_only) {
            bail!("affect_first has no meaning when an only-mode is set");
        }
        Ok(())
    }

    /// Between-item delay with the floor applied.
    pub fn effective_delay_ms(&self) -> u64 {
        self.between_item_delay_ms.max(MIN_BETWEEN_ITEM_DELAY_MS)
    }

    /// Whether the run starts with an affect pass.
    pub fn starts_with_affect(&self) -> bool {
        self.affect_first || self.affect_only
    }

    /// Exact match against the skip list, both sides normalized. Entries
    /// that do not look like a change number simply never match.
    pub fn skips_auto_close(&self, chg: &str) -> bool {
        let wanted = normalize_chg(chg);
        if wanted.is_empty() {
            return false;
        }
        self.skip_auto_close
            .iter()
            .any(|entry| normalize_chg(entry) == wanted)
    }

    pub fn with_auto_close(mut self, value: bool) -> Self {
        self.auto_close = value;
        self
    }

    pub fn with_affect_first(mut self, value: bool) -> Self {
        self.affect_first = value;
        self
    }

    pub fn with_delay_ms(mut self, value: u64) -> Self {
        self.between_item_delay_ms = value;
        self
    }
}

fn normalize_chg(raw: &str) -> String {
    raw.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let s = Settings::default();
        assert!(!s.auto_close);
        assert_eq!(s.between_item_delay_ms, 3000);
        assert!(!s.starts_with_affect());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn delay_floor_is_enforced() {
        let s = Settings::default().with_delay_ms(10);
        assert_eq!(s.effective_delay_ms(), MIN_BETWEEN_ITEM_DELAY_MS);
        let s = Settings::default().with_delay_ms(5000);
        assert_eq!(s.effective_delay_ms(), 5000);
    }

    #[test]
    fn only_modes_are_mutually_exclusive() {
        let s = Settings {
            affect_only: true,
            update_only: true,
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn affect_first_conflicts_with_only_modes() {
        let s = Settings {
            affect_first: true,
            update_only: true,
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn skip_list_matches_normalized() {
        let s = Settings {
            skip_auto_close: vec!["  chg0001 ".into(), "not-a-change".into(), "".into()],
            ..Default::default()
        };
        assert!(s.skips_auto_close("CHG0001"));
        assert!(!s.skips_auto_close("CHG0002"));
        assert!(!s.skips_auto_close(""));
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load(&dir.path().join("cirun.toml")).unwrap();
        assert_eq!(s.between_item_delay_ms, 3000);
    }

    #[test]
    fn load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cirun.toml");
        std::fs::write(&path, "auto_close = true\nbetween_item_delay_ms = 1500\n").unwrap();
        let s = Settings::load(&path).unwrap();
        assert!(s.auto_close);
        assert_eq!(s.between_item_delay_ms, 1500);
        assert_eq!(s.instance_url, "https://example.service-now.com");
    }

    #[test]
    fn load_rejects_contradictory_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cirun.toml");
        std::fs::write(&path, "affect_only = true\nupdate_only = true\n").unwrap();
        assert!(Settings::load(&path).is_err());
    }
}
