//! Daemon coordinator that manages the complete lifecycle of twilightr.
//!
//! This module wires the scheduler to its real collaborators and runs it:
//! - Configuration loading
//! - Clock, location source, wake-up alarm and settings mirror
//! - Signal handler setup (shutdown, forced re-evaluation, reload)
//! - Monitor initialization (timerfd clock steps, timezone files)
//! - The built-in logging listener
//!
//! ```no_run
//! use twilightr::Twilightr;
//!
//! # fn main() -> anyhow::Result<()> {
//! Twilightr::new(false).run()?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::mpsc;

use crate::alarm::ThreadAlarm;
use crate::config;
use crate::io::signals::setup_signal_handler;
use crate::io::time_change::{TimezoneWatcher, start_time_change_monitor};
use crate::listeners::{DeliveryContext, TwilightListener};
use crate::location::StaticLocationSource;
use crate::scheduler::{SchedulerParams, UpdateScheduler};
use crate::settings::FileSettingsMirror;
use crate::time_source::{Clock, SystemClock};
use crate::twilight::{SolarCalculator, TwilightState};

/// Builder for running the twilightr daemon.
pub struct Twilightr {
    debug_enabled: bool,
    show_headers: bool,
}

impl Twilightr {
    pub fn new(debug_enabled: bool) -> Self {
        Self {
            debug_enabled,
            show_headers: true,
        }
    }

    /// Skip the version header
    pub fn without_headers(mut self) -> Self {
        self.show_headers = false;
        self
    }

    /// Run until a termination signal arrives.
    pub fn run(self) -> Result<()> {
        let debug_enabled = self.debug_enabled;

        if self.show_headers {
            log_version!();
            if debug_enabled {
                log_pipe!();
                log_debug!("Debug mode enabled - showing scheduler internals");
            }
        }

        let config_path = config::get_config_path()?;
        let config = config::load().context("Configuration failed")?;
        config.log_config();

        let clock = Arc::new(SystemClock::new(config.timezone_override()?));
        let location_source = Arc::new(StaticLocationSource::new(config.location()));
        let (trigger_sender, trigger_receiver) = mpsc::channel();

        let alarm = Arc::new(
            ThreadAlarm::start(clock.clone(), trigger_sender.clone(), debug_enabled)
                .context("Failed to start wake-up alarm")?,
        );
        let settings = Arc::new(FileSettingsMirror::new(config.settings_path()?)?);

        let scheduler = UpdateScheduler::new(SchedulerParams {
            calculator: Arc::new(SolarCalculator::new()),
            clock: clock.clone(),
            location_source: location_source.clone(),
            alarm,
            settings,
            trigger_sender: trigger_sender.clone(),
            debug_enabled,
        });

        let reload_source = location_source.clone();
        let reload_clock = clock.clone();
        let reload_sender = trigger_sender.clone();
        let signal_state = setup_signal_handler(
            trigger_sender.clone(),
            move || {
                if let Err(e) =
                    config::reload_config(&config_path, &reload_source, &reload_clock, &reload_sender)
                {
                    log_pipe!();
                    log_warning!("Configuration reload failed: {e:#}");
                    log_indented!("Keeping the previous configuration");
                }
            },
            debug_enabled,
        )?;

        // Both monitors are optional; alarms keep the schedule going without them
        if config.detect_time_changes()
            && let Err(e) = start_time_change_monitor(trigger_sender.clone(), debug_enabled)
        {
            log_pipe!();
            log_warning!("Clock change detection unavailable: {e:#}");
            log_indented!("Send SIGUSR1 after changing the clock to re-evaluate");
        }

        if config.watch_timezone()
            && config.timezone.is_none()
            && let Err(e) = TimezoneWatcher::new(trigger_sender.clone(), debug_enabled).start()
        {
            log_pipe!();
            log_warning!("Timezone watching unavailable: {e:#}");
            log_indented!("Send SIGUSR1 after changing the timezone to re-evaluate");
        }

        let listener: Arc<dyn TwilightListener> = Arc::new(LogListener::new(clock.clone()));
        let context = DeliveryContext::spawn("log-listener")?;
        scheduler.register_listener(listener.clone(), context)?;

        log_block_start!("Tracking twilight...");
        scheduler.run(trigger_receiver, &signal_state.running);

        scheduler.unregister_listener(&listener);
        log_block_start!("Stopped");
        log_end!();
        Ok(())
    }
}

/// Listener that writes every published change to the log.
pub struct LogListener {
    clock: Arc<dyn Clock>,
}

impl LogListener {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn period(is_night: bool) -> &'static str {
        if is_night { "night" } else { "day" }
    }
}

impl TwilightListener for LogListener {
    fn on_twilight_state_changed(&self, state: Option<TwilightState>) -> Result<()> {
        match state {
            Some(state) => {
                let now = self.clock.now();
                log_decorated!(
                    "Listener: new twilight window, currently {}",
                    Self::period(state.is_night(now))
                );
            }
            None => log_decorated!("Listener: twilight state unknown"),
        }
        Ok(())
    }

    fn on_day_night_changed(&self, _state: TwilightState, is_night: bool) -> Result<()> {
        log_decorated!("Listener: it is now {}", Self::period(is_night));
        Ok(())
    }
}
