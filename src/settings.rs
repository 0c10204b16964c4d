//! Mirror of the "is it night" flag for other processes.
//!
//! Written once per published state change. The write is fire-and-forget:
//! the scheduler hands the value off and never waits on the filesystem.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::constants::{CONFIG_DIR_NAME, SETTINGS_FILE_NAME};
use crate::listeners::DeliveryContext;

/// Sink for the night-mode flag.
pub trait SettingsMirror: Send + Sync {
    fn set_is_night(&self, is_night: bool);
}

/// On-disk form of the mirrored flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightModeRecord {
    pub is_night: bool,
    pub updated_at: DateTime<Utc>,
}

/// [`SettingsMirror`] that writes a small JSON file.
///
/// Writes happen on a dedicated context and replace the file atomically, so
/// readers never observe a half-written record.
pub struct FileSettingsMirror {
    path: PathBuf,
    writer: DeliveryContext,
}

impl FileSettingsMirror {
    pub fn new(path: PathBuf) -> Result<Self> {
        let writer = DeliveryContext::spawn("settings")?;
        Ok(Self { path, writer })
    }

    /// Default location: `$XDG_STATE_HOME/twilightr/night_mode.json`.
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::state_dir()
            .or_else(dirs::data_local_dir)
            .context("Could not determine state directory")?;
        Ok(base.join(CONFIG_DIR_NAME).join(SETTINGS_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back a previously mirrored record.
    pub fn read(path: &Path) -> Result<NightModeRecord> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}

/// Atomically replace `path` with the JSON form of `record`.
pub fn write_record(path: &Path, record: &NightModeRecord) -> Result<()> {
    let dir = path
        .parent()
        .context("Settings path has no parent directory")?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let json = serde_json::to_string_pretty(record).context("Failed to serialize record")?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    tmp.write_all(json.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

impl SettingsMirror for FileSettingsMirror {
    fn set_is_night(&self, is_night: bool) {
        let path = self.path.clone();
        let record = NightModeRecord {
            is_night,
            updated_at: Utc::now(),
        };

        let posted = self.writer.post(move || {
            if let Err(e) = write_record(&path, &record) {
                log_pipe!();
                log_error!("Failed to mirror night mode flag: {e:#}");
            }
        });

        if !posted {
            log_pipe!();
            log_warning!("Settings writer has shut down; night mode flag not mirrored");
        }
    }
}
