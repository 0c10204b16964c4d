//! Configuration for the twilightr daemon.
//!
//! The configuration lives in `twilightr.toml` under
//! `$XDG_CONFIG_HOME/twilightr/` (or the directory passed with `--config`).
//! A commented default file is written on first run.
//!
//! ```toml
//! #[Location]
//! latitude = 37.400000     # Geographic latitude (-90 to 90)
//! longitude = -122.100000  # Geographic longitude (-180 to 180)
//! accuracy = 1000          # Accuracy of the configured coordinates in metres
//!
//! #[Clock]
//! detect_time_changes = true  # Re-evaluate when the wall clock is stepped
//! watch_timezone = true       # Re-evaluate when the system timezone changes
//! # timezone = "Europe/Berlin"  # Override the detected system timezone
//!
//! #[Settings]
//! # settings_file = "~/.local/state/twilightr/night_mode.json"
//! ```
//!
//! Coordinates may also be kept in a separate `geo.toml` next to the main
//! file, which then overrides `latitude` and `longitude`. This keeps the
//! location out of a version-controlled main configuration.

pub mod builder;
pub mod loading;
pub mod reload;
pub mod validation;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::PathBuf;

use crate::constants::*;
use crate::location::{Location, StaticLocationSource};
use crate::settings::FileSettingsMirror;
use crate::time_source::parse_timezone_name;

pub use builder::create_default_config;
pub use loading::{
    get_config_base_dir, get_config_path, get_custom_config_dir, load, load_from_path,
    private_path, set_config_dir,
};
pub use reload::{ReloadOutcome, reload_config};
pub use validation::validate_config;

/// Coordinates kept in `geo.toml`.
#[derive(Debug, Deserialize, Clone)]
pub(crate) struct GeoConfig {
    pub(crate) latitude: Option<f64>,
    pub(crate) longitude: Option<f64>,
}

/// Contents of `twilightr.toml`.
///
/// Every field is optional; loading fills in the
/// defaults after validation.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Geographic latitude in degrees (-90 to +90)
    pub latitude: Option<f64>,
    /// Geographic longitude in degrees (-180 to +180)
    pub longitude: Option<f64>,
    /// Accuracy reported for the configured fix, in metres
    pub accuracy: Option<f32>,
    /// Where the night-mode flag is mirrored
    pub settings_file: Option<PathBuf>,
    /// Watch for wall-clock steps (timerfd)
    pub detect_time_changes: Option<bool>,
    /// Watch /etc/localtime and /etc/timezone
    pub watch_timezone: Option<bool>,
    /// IANA timezone name overriding system detection
    pub timezone: Option<String>,
}

impl Config {
    /// The configured location as a fix, if coordinates are set.
    pub fn location(&self) -> Option<Location> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some(StaticLocationSource::config_fix(
                lat,
                lon,
                self.accuracy.unwrap_or(DEFAULT_CONFIG_ACCURACY),
            )),
            _ => None,
        }
    }

    /// The timezone override, if one is configured.
    pub fn timezone_override(&self) -> Result<Option<Tz>> {
        match self.timezone.as_deref() {
            Some(name) => parse_timezone_name(name)
                .map(Some)
                .with_context(|| format!("Unknown timezone '{name}'")),
            None => Ok(None),
        }
    }

    /// Path of the night-mode settings file.
    pub fn settings_path(&self) -> Result<PathBuf> {
        match &self.settings_file {
            Some(path) => Ok(expand_home(path)),
            None => FileSettingsMirror::default_path(),
        }
    }

    pub fn detect_time_changes(&self) -> bool {
        self.detect_time_changes
            .unwrap_or(DEFAULT_DETECT_TIME_CHANGES)
    }

    pub fn watch_timezone(&self) -> bool {
        self.watch_timezone.unwrap_or(DEFAULT_WATCH_TIMEZONE)
    }

    pub fn log_config(&self) {
        log_block_start!("Loaded configuration");

        match self.location() {
            Some(location) => {
                log_indented!("Location: {location}");
                log_indented!("Accuracy: {:.0} m", location.accuracy);
            }
            None => log_indented!("Location: not configured"),
        }

        match self.timezone.as_deref() {
            Some(name) => log_indented!("Timezone: {name} (configured)"),
            None => log_indented!("Timezone: system"),
        }

        if let Ok(path) = self.settings_path() {
            log_indented!("Settings file: {}", private_path(&path));
        }

        log_indented!(
            "Clock change detection: {}",
            if self.detect_time_changes() { "on" } else { "off" }
        );
        log_indented!(
            "Timezone watching: {}",
            if self.watch_timezone() { "on" } else { "off" }
        );
    }
}

/// Expand a leading `~/` to the home directory.
fn expand_home(path: &std::path::Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
