//! Application-wide constants.

// # Process

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

pub const CONFIG_DIR_NAME: &str = "twilightr";
pub const CONFIG_FILE_NAME: &str = "twilightr.toml";
pub const GEO_FILE_NAME: &str = "geo.toml";
pub const SETTINGS_FILE_NAME: &str = "night_mode.json";

// # Location

/// Provider name attached to fixes that come from the configuration file.
pub const CONFIG_PROVIDER: &str = "config";

/// Accuracy reported for configured coordinates when none is given (metres).
pub const DEFAULT_CONFIG_ACCURACY: f32 = 1000.0;

// # Alarm

/// Longest single wait of the wake-up thread before it re-reads the wall clock.
pub const ALARM_MAX_SLICE_SECS: u64 = 60;

// # Scheduler

/// How often the trigger loop re-checks its running flag while idle.
pub const SCHEDULER_POLL_MS: u64 = 250;

// # Timezone detection

pub const LOCALTIME_PATH: &str = "/etc/localtime";
pub const TIMEZONE_FILE_PATH: &str = "/etc/timezone";

/// Debounce for timezone file events; `timedatectl` replaces the symlink in
/// several filesystem operations.
pub const TIMEZONE_DEBOUNCE_MS: u64 = 500;

// # Defaults

pub const DEFAULT_DETECT_TIME_CHANGES: bool = true;
pub const DEFAULT_WATCH_TIMEZONE: bool = true;
