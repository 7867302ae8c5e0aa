//! Resume checkpoints
//!
//! A checkpoint is a `(byte offset, input path, timestamp)` tuple saved on
//! voluntary shutdown. Resume granularity is one byte offset, not a line
//! boundary: restarting extracts the remaining bytes `[offset, end)` into a
//! temp file and feeds that to the engine, so the reader starts exactly
//! where the previous run had fully consumed input and partial lines never
//! need skipping.

use crate::settings::AppSettings;
use anyhow::{Context, Result};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, BufReader, BufWriter};
use tracing::{debug, info};

/// Saves and restores resume state for one settings file
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    settings_path: PathBuf,
}

impl CheckpointManager {
    #[must_use]
    pub fn new(settings_path: PathBuf) -> Self {
        Self { settings_path }
    }

    /// The saved byte offset, when it is still usable
    ///
    /// Returns `None` unless a valid checkpoint exists, the input file still
    /// exists, and its length is at least the saved offset. A shorter file
    /// means the input was truncated or replaced and the offset no longer
    /// points at the same data.
    #[must_use]
    pub fn resume_position(&self, settings: &AppSettings) -> Option<u64> {
        if !settings.has_valid_checkpoint() {
            return None;
        }
        let offset = settings.resume_byte_offset?;

        let metadata = std::fs::metadata(&settings.input_path).ok()?;
        if metadata.len() < offset {
            debug!(
                "Checkpoint offset {} exceeds input length {}; discarding",
                offset,
                metadata.len()
            );
            return None;
        }
        Some(offset)
    }

    /// Persist `offset` together with the current input path and timestamp
    pub fn save_checkpoint(&self, settings: &mut AppSettings, offset: u64) -> Result<()> {
        settings.set_checkpoint(offset);
        settings.save(&self.settings_path)?;
        info!(
            "Saved resume checkpoint at byte {} for {}",
            offset,
            settings.input_path.display()
        );
        Ok(())
    }

    /// Remove any stored checkpoint (run completed, nothing to resume)
    pub fn clear_checkpoint(&self, settings: &mut AppSettings) -> Result<()> {
        settings.clear_checkpoint();
        settings.save(&self.settings_path)
    }

    /// Copy bytes `[from_byte, end)` of `input_path` into `output_path`
    ///
    /// Returns the number of bytes copied.
    pub async fn export_remaining(
        input_path: &Path,
        from_byte: u64,
        output_path: &Path,
    ) -> Result<u64> {
        let mut input = File::open(input_path)
            .await
            .with_context(|| format!("Failed to open input file {}", input_path.display()))?;
        input.seek(SeekFrom::Start(from_byte)).await?;

        let output = File::create(output_path)
            .await
            .with_context(|| format!("Failed to create {}", output_path.display()))?;

        let mut reader = BufReader::new(input);
        let mut writer = BufWriter::new(output);
        let copied = tokio::io::copy(&mut reader, &mut writer).await?;
        tokio::io::AsyncWriteExt::shutdown(&mut writer).await?;
        Ok(copied)
    }

    /// Export the remaining bytes into a randomly-named OS temp file
    pub async fn create_resume_temp(input_path: &Path, from_byte: u64) -> Result<PathBuf> {
        let temp_path = std::env::temp_dir().join(format!(
            "checkerbase-resume-{:08x}.txt",
            rand::random::<u32>()
        ));
        let copied = Self::export_remaining(input_path, from_byte, &temp_path).await?;
        info!(
            "Extracted {} remaining byte(s) into {}",
            copied,
            temp_path.display()
        );
        Ok(temp_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn manager_with_input(contents: &[u8]) -> (CheckpointManager, AppSettings, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let input_path = dir.path().join("input.txt");
        std::fs::write(&input_path, contents).unwrap();

        let settings = AppSettings {
            input_path,
            ..AppSettings::default()
        };
        let manager = CheckpointManager::new(dir.path().join("settings.json"));
        (manager, settings, dir)
    }

    #[test]
    fn test_save_then_resume_round_trip() {
        let (manager, mut settings, _dir) = manager_with_input(&[0u8; 2000]);

        manager.save_checkpoint(&mut settings, 1000).unwrap();
        assert_eq!(manager.resume_position(&settings), Some(1000));

        // Reloading from disk preserves the checkpoint
        let reloaded = AppSettings::load(&manager.settings_path).unwrap();
        assert_eq!(manager.resume_position(&reloaded), Some(1000));
    }

    #[test]
    fn test_truncated_input_invalidates_checkpoint() {
        let (manager, mut settings, _dir) = manager_with_input(&[0u8; 2000]);
        manager.save_checkpoint(&mut settings, 1000).unwrap();

        std::fs::write(&settings.input_path, [0u8; 800]).unwrap();
        assert_eq!(manager.resume_position(&settings), None);
    }

    #[test]
    fn test_missing_input_invalidates_checkpoint() {
        let (manager, mut settings, _dir) = manager_with_input(b"data");
        manager.save_checkpoint(&mut settings, 2).unwrap();

        std::fs::remove_file(&settings.input_path).unwrap();
        assert_eq!(manager.resume_position(&settings), None);
    }

    #[test]
    fn test_checkpoint_for_other_input_does_not_apply() {
        let (manager, mut settings, dir) = manager_with_input(b"0123456789");
        manager.save_checkpoint(&mut settings, 5).unwrap();

        let other = dir.path().join("other.txt");
        std::fs::write(&other, b"0123456789").unwrap();
        settings.input_path = other;
        assert_eq!(manager.resume_position(&settings), None);
    }

    #[test]
    fn test_clear_checkpoint() {
        let (manager, mut settings, _dir) = manager_with_input(b"0123456789");
        manager.save_checkpoint(&mut settings, 5).unwrap();
        manager.clear_checkpoint(&mut settings).unwrap();

        assert_eq!(manager.resume_position(&settings), None);
        let reloaded = AppSettings::load(&manager.settings_path).unwrap();
        assert!(reloaded.resume_byte_offset.is_none());
    }

    #[tokio::test]
    async fn test_export_remaining_is_byte_exact() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        input.write_all(b"0123456789abcdef").unwrap();
        input.flush().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("rest.txt");
        let copied = CheckpointManager::export_remaining(input.path(), 10, &out)
            .await
            .unwrap();

        assert_eq!(copied, 6);
        assert_eq!(std::fs::read(&out).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_export_from_end_is_empty() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        input.write_all(b"abc").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("rest.txt");
        let copied = CheckpointManager::export_remaining(input.path(), 3, &out)
            .await
            .unwrap();
        assert_eq!(copied, 0);
        assert_eq!(std::fs::metadata(&out).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_create_resume_temp() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        input.write_all(b"header\nrest-of-file").unwrap();
        input.flush().unwrap();

        let temp = CheckpointManager::create_resume_temp(input.path(), 7)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&temp).unwrap(), b"rest-of-file");
        std::fs::remove_file(&temp).unwrap();
    }
}
