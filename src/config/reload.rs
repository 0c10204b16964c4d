//! Applying a reloaded configuration to the running daemon.

use anyhow::Result;
use std::path::Path;
use std::sync::mpsc::Sender;

use super::loading::{load_from_path, private_path};
use crate::location::StaticLocationSource;
use crate::scheduler::Trigger;
use crate::time_source::SystemClock;

/// What a reload changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadOutcome {
    /// New coordinates were pushed to the scheduler as a location update
    pub location_changed: bool,
    /// The timezone override changed and a re-evaluation was queued
    pub timezone_changed: bool,
}

/// Re-read `config_path` and hand the changes to the running collaborators.
///
/// Changed coordinates reach the scheduler through the location source, the
/// same way a provider fix would. A changed timezone override queues a
/// [`Trigger::ClockChanged`]. An invalid file leaves everything untouched.
pub fn reload_config(
    config_path: &Path,
    location_source: &StaticLocationSource,
    clock: &SystemClock,
    triggers: &Sender<Trigger>,
) -> Result<ReloadOutcome> {
    let config = load_from_path(config_path)?;
    let timezone = config.timezone_override()?;

    let location_changed = location_source.update(config.location());
    let timezone_changed = clock.set_timezone_override(timezone);
    if timezone_changed {
        // A closed channel means the scheduler is already shutting down
        let _ = triggers.send(Trigger::ClockChanged);
    }

    log_block_start!("Reloaded {}", private_path(config_path));
    if location_changed {
        log_indented!("Location updated");
    }
    if timezone_changed {
        log_indented!("Timezone override updated");
    }
    if !location_changed && !timezone_changed {
        log_indented!("No changes affecting the schedule");
    }
    if config.location().is_none() {
        log_indented!("No coordinates configured; keeping the last known location");
    }

    Ok(ReloadOutcome {
        location_changed,
        timezone_changed,
    })
}
