//! Persisted application settings
//!
//! Settings live in JSON at `~/.checkerbase/settings.json` with camelCase
//! keys. Writes are atomic: serialize to `settings.json.tmp`, then rename
//! over the real file, so a crash mid-write never leaves a torn settings
//! file behind.
//!
//! The resume checkpoint (byte offset, input path, timestamp) rides along in
//! the same file; see [`crate::checkpoint`] for its validity rules.

use crate::constants::paths::{APP_DIR, SETTINGS_FILE};
use crate::proxy::ProxyType;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Persisted configuration plus resume state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub input_path: PathBuf,
    pub proxy_path: Option<PathBuf>,
    pub proxy_type: ProxyType,
    pub output_dir: PathBuf,
    pub parallelism: usize,
    pub max_retries: u32,
    pub resume_byte_offset: Option<u64>,
    pub resume_input_path: Option<PathBuf>,
    pub resume_timestamp: Option<DateTime<Utc>>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("input.txt"),
            proxy_path: None,
            proxy_type: ProxyType::default(),
            output_dir: PathBuf::from("output"),
            parallelism: 4,
            max_retries: 2,
            resume_byte_offset: None,
            resume_input_path: None,
            resume_timestamp: None,
        }
    }
}

impl AppSettings {
    /// Default on-disk location: `~/.checkerbase/settings.json`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(APP_DIR).join(SETTINGS_FILE))
    }

    /// Load settings from `path`
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
        Ok(settings)
    }

    /// Load settings, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(
                "Settings file {} not found, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// Atomically persist settings to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move settings into place at {}", path.display()))?;
        Ok(())
    }

    /// Whether the stored checkpoint may apply to the configured input
    ///
    /// Valid iff the offset is present and positive and the checkpointed
    /// input path matches the current one. File-level checks (existence,
    /// truncation) are the checkpoint manager's business.
    #[must_use]
    pub fn has_valid_checkpoint(&self) -> bool {
        matches!(self.resume_byte_offset, Some(offset) if offset > 0)
            && self.resume_input_path.as_deref() == Some(self.input_path.as_path())
    }

    /// Record a checkpoint for the current input
    pub fn set_checkpoint(&mut self, offset: u64) {
        self.resume_byte_offset = Some(offset);
        self.resume_input_path = Some(self.input_path.clone());
        self.resume_timestamp = Some(Utc::now());
    }

    /// Drop any stored checkpoint
    pub fn clear_checkpoint(&mut self) {
        self.resume_byte_offset = None;
        self.resume_input_path = None;
        self.resume_timestamp = None;
    }

    /// Semantic validation; returns human-readable problems, empty when fine
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.input_path.as_os_str().is_empty() {
            problems.push("Input path is empty".to_string());
        } else if !self.input_path.exists() {
            problems.push(format!(
                "Input file {} does not exist",
                self.input_path.display()
            ));
        }

        if let Some(proxy_path) = &self.proxy_path {
            if !proxy_path.exists() {
                problems.push(format!(
                    "Proxy file {} does not exist",
                    proxy_path.display()
                ));
            }
        }

        if self.output_dir.as_os_str().is_empty() {
            problems.push("Output directory is empty".to_string());
        }

        if self.parallelism == 0 {
            problems.push("Parallelism must be at least 1".to_string());
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut settings = AppSettings::default();
        settings.parallelism = 16;
        settings.proxy_path = Some(PathBuf::from("proxies.txt"));
        settings.set_checkpoint(12345);
        settings.save(&path).unwrap();

        let loaded = AppSettings::load(&path).unwrap();
        assert_eq!(loaded, settings);

        // Second save/reload cycle is byte-identical after the first reload
        loaded.save(&path).unwrap();
        let first = std::fs::read_to_string(&path).unwrap();
        AppSettings::load(&path).unwrap().save(&path).unwrap();
        let second = std::fs::read_to_string(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_camel_case_keys() {
        let json = serde_json::to_string(&AppSettings::default()).unwrap();
        assert!(json.contains("\"inputPath\""));
        assert!(json.contains("\"maxRetries\""));
        assert!(json.contains("\"resumeByteOffset\""));
        assert!(!json.contains("\"input_path\""));
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        AppSettings::default().save(&path).unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("settings.json.tmp").exists());
    }

    #[test]
    fn test_load_or_default_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let settings = AppSettings::load_or_default(&path).unwrap();
        assert_eq!(settings, AppSettings::default());
    }

    #[test]
    fn test_checkpoint_validity_rules() {
        let mut settings = AppSettings::default();
        assert!(!settings.has_valid_checkpoint());

        settings.set_checkpoint(1000);
        assert!(settings.has_valid_checkpoint());

        // Zero offsets never count
        settings.resume_byte_offset = Some(0);
        assert!(!settings.has_valid_checkpoint());

        // A checkpoint for a different input does not apply
        settings.set_checkpoint(1000);
        settings.input_path = PathBuf::from("other.txt");
        assert!(!settings.has_valid_checkpoint());

        settings.clear_checkpoint();
        assert!(settings.resume_timestamp.is_none());
    }

    #[test]
    fn test_validate_reports_all_problems() {
        let settings = AppSettings {
            input_path: PathBuf::from("/definitely/not/here.txt"),
            parallelism: 0,
            ..AppSettings::default()
        };
        let problems = settings.validate();
        assert_eq!(problems.len(), 2);
        assert!(problems.iter().any(|p| p.contains("does not exist")));
        assert!(problems.iter().any(|p| p.contains("Parallelism")));
    }
}
