//! Default configuration file creation.
//!
//! Uses a small builder that aligns the trailing comments of all settings to
//! one column, so the generated file stays readable as defaults change.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use super::loading::private_path;
use crate::constants::*;

/// Write a commented default configuration to `path`.
///
/// With `coords`, the coordinates are written as active settings. Without,
/// they are left commented out and the scheduler stays passive until a
/// location is configured. If a `geo.toml` already sits next to `path`, the
/// coordinates go there instead of into the main file.
pub fn create_default_config(path: &Path, coords: Option<(f64, f64)>) -> Result<()> {
    let dir = path
        .parent()
        .context("Configuration path has no parent directory")?;
    fs::create_dir_all(dir).context("Failed to create config directory")?;

    let geo_path = dir.join(GEO_FILE_NAME);
    let coords_in_geo_file = geo_path.exists();

    if coords_in_geo_file && let Some((lat, lon)) = coords {
        let geo_content =
            format!("#[Private geo coordinates]\nlatitude = {lat:.6}\nlongitude = {lon:.6}\n");
        fs::write(&geo_path, geo_content)
            .with_context(|| format!("Failed to write coordinates to {}", geo_path.display()))?;
        log_indented!(
            "Saved coordinates to separate geo file: {}",
            private_path(&geo_path)
        );
    }

    let mut builder = ConfigBuilder::new().add_section("Location");
    builder = match coords {
        Some((lat, lon)) if !coords_in_geo_file => builder
            .add_setting(
                "latitude",
                &format!("{lat:.6}"),
                "Geographic latitude (-90 to 90)",
            )
            .add_setting(
                "longitude",
                &format!("{lon:.6}"),
                "Geographic longitude (-180 to 180)",
            ),
        _ => builder
            .add_commented_setting("latitude", "51.477800", "Geographic latitude (-90 to 90)")
            .add_commented_setting(
                "longitude",
                "-0.001500",
                "Geographic longitude (-180 to 180)",
            ),
    };

    let content = builder
        .add_setting(
            "accuracy",
            &format!("{DEFAULT_CONFIG_ACCURACY:.0}"),
            "Accuracy of the configured coordinates in metres",
        )
        .add_section("Clock")
        .add_setting(
            "detect_time_changes",
            &DEFAULT_DETECT_TIME_CHANGES.to_string(),
            "Re-evaluate when the wall clock is stepped",
        )
        .add_setting(
            "watch_timezone",
            &DEFAULT_WATCH_TIMEZONE.to_string(),
            "Re-evaluate when the system timezone changes",
        )
        .add_commented_setting(
            "timezone",
            "\"UTC\"",
            "IANA timezone overriding system detection",
        )
        .add_section("Settings")
        .add_commented_setting(
            "settings_file",
            &format!("\"~/.local/state/{CONFIG_DIR_NAME}/{SETTINGS_FILE_NAME}\""),
            "Where the night-mode flag is mirrored",
        )
        .build();

    fs::write(path, content + "\n").context("Failed to write default config file")?;
    Ok(())
}

/// Builder for configuration files with aligned comments.
struct ConfigBuilder {
    entries: Vec<ConfigEntry>,
}

enum ConfigEntry {
    Section(String),
    Setting { line: String, comment: String },
}

impl ConfigBuilder {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn add_section(mut self, title: &str) -> Self {
        self.entries.push(ConfigEntry::Section(format!("#[{title}]")));
        self
    }

    fn add_setting(mut self, key: &str, value: &str, comment: &str) -> Self {
        self.entries.push(ConfigEntry::Setting {
            line: format!("{key} = {value}"),
            comment: format!("# {comment}"),
        });
        self
    }

    /// A setting that is documented but left disabled.
    fn add_commented_setting(mut self, key: &str, value: &str, comment: &str) -> Self {
        self.entries.push(ConfigEntry::Setting {
            line: format!("# {key} = {value}"),
            comment: format!("# {comment}"),
        });
        self
    }

    fn build(self) -> String {
        let max_width = self
            .entries
            .iter()
            .filter_map(|entry| match entry {
                ConfigEntry::Setting { line, .. } => Some(line.len()),
                ConfigEntry::Section(_) => None,
            })
            .max()
            .unwrap_or(0)
            + 1; // one space between setting and comment

        let mut result = Vec::new();
        let mut first_section = true;

        for entry in self.entries {
            match entry {
                ConfigEntry::Section(title) => {
                    if !first_section {
                        result.push(String::new());
                    }
                    result.push(title);
                    first_section = false;
                }
                ConfigEntry::Setting { line, comment } => {
                    let padding = " ".repeat(max_width - line.len());
                    result.push(format!("{line}{padding}{comment}"));
                }
            }
        }

        result.join("\n")
    }
}
