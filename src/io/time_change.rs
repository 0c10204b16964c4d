//! Wall-clock and timezone change detection.
//!
//! Two independent monitors feed [`Trigger::ClockChanged`] into the
//! scheduler:
//!
//! - a `timerfd` armed far in the future with `TFD_TIMER_CANCEL_ON_SET`,
//!   which the kernel cancels whenever `CLOCK_REALTIME` is stepped
//! - a `notify` watcher on `/etc/localtime` and `/etc/timezone`
//!
//! Neither detects DST transitions, which change no clock and no file. The
//! scheduler does not need them since all boundaries are absolute instants.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use notify::{
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::*;
use crate::scheduler::Trigger;

/// Detects steps of the realtime clock through a cancelled timerfd.
struct TimeChangeDetector {
    timer: TimerFd,
}

impl TimeChangeDetector {
    fn new() -> nix::Result<Self> {
        let timer = TimerFd::new(ClockId::CLOCK_REALTIME, TimerFlags::empty())?;
        let mut detector = TimeChangeDetector { timer };
        detector.arm_timer()?;
        Ok(detector)
    }

    fn arm_timer(&mut self) -> nix::Result<()> {
        let flags =
            TimerSetTimeFlags::TFD_TIMER_ABSTIME | TimerSetTimeFlags::TFD_TIMER_CANCEL_ON_SET;

        // Far enough out that it never expires on its own, small enough not to overflow
        let far_future = TimeSpec::new(i64::MAX / 1000, 0);

        self.timer.set(Expiration::OneShot(far_future), flags)?;
        Ok(())
    }

    /// Block until the clock is stepped.
    fn wait_for_time_change(&mut self) -> Result<()> {
        match self.timer.wait() {
            Ok(()) | Err(Errno::ECANCELED) => {
                self.arm_timer()
                    .context("Failed to re-arm time change timer")?;
                Ok(())
            }
            Err(other_error) => Err(anyhow::anyhow!("Timer wait error: {}", other_error)),
        }
    }
}

/// Start watching for wall-clock steps on a background thread.
///
/// Returns an error if the timerfd cannot be created, in which case the
/// daemon keeps running and relies on its own alarms.
pub fn start_time_change_monitor(triggers: Sender<Trigger>, debug_enabled: bool) -> Result<()> {
    let mut detector =
        TimeChangeDetector::new().context("Failed to create time change detector")?;

    if debug_enabled {
        log_pipe!();
        log_debug!("Starting timerfd-based time change monitoring");
    }

    thread::Builder::new()
        .name("twilightr-clock".to_string())
        .spawn(move || {
            loop {
                if let Err(e) = detector.wait_for_time_change() {
                    log_pipe!();
                    log_warning!("Time change detection stopped: {}", e);
                    break;
                }

                log_pipe!();
                log_info!("System time changed, re-evaluating");

                if triggers.send(Trigger::ClockChanged).is_err() {
                    // Scheduler gone
                    break;
                }
            }
        })
        .context("Failed to spawn time change monitor thread")?;

    Ok(())
}

/// Watches the files that define the system timezone.
pub struct TimezoneWatcher {
    triggers: Sender<Trigger>,
    debug_enabled: bool,
    watched_files: Vec<PathBuf>,
}

impl TimezoneWatcher {
    /// Watch `/etc/localtime` and `/etc/timezone`.
    pub fn new(triggers: Sender<Trigger>, debug_enabled: bool) -> Self {
        Self::with_files(
            triggers,
            debug_enabled,
            vec![PathBuf::from(LOCALTIME_PATH), PathBuf::from(TIMEZONE_FILE_PATH)],
        )
    }

    pub fn with_files(
        triggers: Sender<Trigger>,
        debug_enabled: bool,
        watched_files: Vec<PathBuf>,
    ) -> Self {
        Self {
            triggers,
            debug_enabled,
            watched_files,
        }
    }

    /// Start the watcher thread.
    ///
    /// The parent directories are watched rather than the files themselves:
    /// `timedatectl` replaces `/etc/localtime` by swapping the symlink, which a
    /// watch on the old inode would miss.
    pub fn start(self) -> Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    match event.kind {
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                            let _ = tx.send(event.paths);
                        }
                        _ => {}
                    }
                }
            },
            NotifyConfig::default(),
        )
        .context("Failed to create timezone watcher")?;

        let mut watched_dirs = HashSet::new();
        for file in &self.watched_files {
            if let Some(parent) = file.parent()
                && parent.is_dir()
                && watched_dirs.insert(parent.to_path_buf())
            {
                watcher
                    .watch(parent, RecursiveMode::NonRecursive)
                    .with_context(|| format!("Failed to watch directory: {}", parent.display()))?;
            }
        }

        if watched_dirs.is_empty() {
            anyhow::bail!("None of the timezone files' directories exist");
        }

        if self.debug_enabled {
            log_pipe!();
            log_debug!("Watching for timezone changes:");
            for file in &self.watched_files {
                log_indented!("{}", file.display());
            }
        }

        let Self {
            triggers,
            debug_enabled,
            watched_files,
        } = self;

        thread::Builder::new()
            .name("twilightr-timezone".to_string())
            .spawn(move || {
                // Keep the watcher alive for as long as the thread runs
                let _watcher = watcher;
                let quiet = Duration::from_millis(TIMEZONE_DEBOUNCE_MS);

                while let Some(changed) = next_change_burst(&rx, &watched_files, quiet) {
                    log_pipe!();
                    log_info!("System timezone changed, re-evaluating");
                    if debug_enabled {
                        for path in &changed {
                            log_indented!("Changed: {}", path.display());
                        }
                    }

                    if triggers.send(Trigger::ClockChanged).is_err() {
                        break;
                    }
                }
            })
            .context("Failed to spawn timezone watcher thread")?;

        Ok(())
    }
}

/// Wait for the next burst of timezone file changes.
///
/// Returns the paths changed during the burst once `quiet` has passed with no
/// further relevant event, so a `/etc/timezone` rewrite shortly after the
/// `/etc/localtime` swap is still seen before re-evaluating. `None` once the
/// event channel has closed.
fn next_change_burst(
    events: &Receiver<Vec<PathBuf>>,
    watched_files: &[PathBuf],
    quiet: Duration,
) -> Option<Vec<PathBuf>> {
    let mut changed = loop {
        let paths = events.recv().ok()?;
        if affects_timezone(&paths, watched_files) {
            break paths;
        }
    };

    let mut deadline = Instant::now() + quiet;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(paths) => {
                if affects_timezone(&paths, watched_files) {
                    changed.extend(paths);
                    deadline = Instant::now() + quiet;
                }
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                return Some(changed);
            }
        }
    }
}

/// Whether any of `event_paths` names one of the watched timezone files.
pub fn affects_timezone(event_paths: &[PathBuf], watched_files: &[PathBuf]) -> bool {
    event_paths.iter().any(|event_path| {
        watched_files
            .iter()
            .any(|watched| same_file_name_in_dir(event_path, watched))
    })
}

fn same_file_name_in_dir(event_path: &Path, watched: &Path) -> bool {
    event_path == watched
        || (event_path.parent() == watched.parent()
            && event_path.file_name().is_some()
            && event_path.file_name() == watched.file_name())
}
