//! The twilight update scheduler.
//!
//! All trigger sources (location fixes, clock and timezone changes, the
//! wake-up alarm, listener registration) funnel into one [`UpdateScheduler`].
//! Each trigger re-evaluates the twilight state, publishes it to listeners
//! when the boundaries changed, mirrors the night flag and re-arms the single
//! wake-up alarm at the next sunrise or sunset.
//!
//! The scheduler can be driven synchronously through
//! [`UpdateScheduler::handle_trigger`] or by a dedicated thread running
//! [`UpdateScheduler::run`] on the trigger channel.

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use crate::alarm::WakeupAlarm;
use crate::constants::SCHEDULER_POLL_MS;
use crate::listeners::{DeliveryContext, ListenerRegistry, Publication, TwilightListener};
use crate::location::{Location, LocationSource};
use crate::settings::SettingsMirror;
use crate::time_source::Clock;
use crate::twilight::{EvaluationError, StateEvaluator, TwilightCalculator, TwilightState};


/// An event that makes the scheduler re-evaluate.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// First evaluation after listeners appeared.
    Startup,
    /// A new fix from the location source.
    LocationChanged(Location),
    /// Wall clock stepped or the timezone changed.
    ClockChanged,
    /// The scheduled wake-up was reached.
    AlarmFired,
    /// Stop the trigger loop.
    Shutdown,
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::Startup => "startup",
            Trigger::LocationChanged(_) => "location update",
            Trigger::ClockChanged => "clock change",
            Trigger::AlarmFired => "wake-up alarm",
            Trigger::Shutdown => "shutdown",
        }
    }
}

/// Whether the scheduler has ever accepted a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Uninitialized,
    Tracking,
}

/// Result of one evaluate-and-publish pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// The freshly computed state. `None` if no location was available or
    /// the calculation failed.
    pub state: Option<TwilightState>,
    /// Day/night answer for `state` at evaluation time.
    pub is_night: Option<bool>,
    /// What was delivered to listeners.
    pub publication: Publication,
    /// The wake-up armed by this pass.
    pub next_wakeup: Option<DateTime<Utc>>,
}

impl Evaluation {
    fn passive(publication: Publication) -> Self {
        Self {
            state: None,
            is_night: None,
            publication,
            next_wakeup: None,
        }
    }
}

/// Collaborators for [`UpdateScheduler::new`].
pub struct SchedulerParams {
    pub calculator: Arc<dyn TwilightCalculator>,
    pub clock: Arc<dyn Clock>,
    pub location_source: Arc<dyn LocationSource>,
    pub alarm: Arc<dyn WakeupAlarm>,
    pub settings: Arc<dyn SettingsMirror>,
    /// Sending half of the channel that [`UpdateScheduler::run`] consumes.
    pub trigger_sender: Sender<Trigger>,
    pub debug_enabled: bool,
}

/// Everything guarded by the scheduler lock.
struct SchedulerState {
    last_known_location: Option<Location>,
    registry: ListenerRegistry,
}

struct Inner {
    evaluator: StateEvaluator,
    clock: Arc<dyn Clock>,
    location_source: Arc<dyn LocationSource>,
    alarm: Arc<dyn WakeupAlarm>,
    settings: Arc<dyn SettingsMirror>,
    trigger_sender: Sender<Trigger>,
    debug_enabled: bool,
    state: Mutex<SchedulerState>,
}

/// Owner of the last known location, the last published state and the
/// listener set.
///
/// Cloning yields another handle to the same scheduler. Every operation runs
/// under a single lock, so triggers arriving concurrently from different
/// threads are applied one after another. Nothing done under the lock waits
/// on I/O: listener deliveries, settings writes and alarm updates are
/// hand-offs to other threads, and logging happens after the lock is
/// released.
#[derive(Clone)]
pub struct UpdateScheduler {
    inner: Arc<Inner>,
}

impl UpdateScheduler {
    pub fn new(params: SchedulerParams) -> Self {
        Self {
            inner: Arc::new(Inner {
                evaluator: StateEvaluator::new(params.calculator),
                clock: params.clock,
                location_source: params.location_source,
                alarm: params.alarm,
                settings: params.settings,
                trigger_sender: params.trigger_sender,
                debug_enabled: params.debug_enabled,
                state: Mutex::new(SchedulerState {
                    last_known_location: None,
                    registry: ListenerRegistry::new(),
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// A sender for injecting triggers into the scheduler's channel.
    pub fn trigger_sender(&self) -> Sender<Trigger> {
        self.inner.trigger_sender.clone()
    }

    /// Subscribe `listener`, delivering on `context`.
    ///
    /// The first listener starts location updates and queues a
    /// [`Trigger::Startup`]. Registering an already registered listener only
    /// rebinds its context.
    pub fn register_listener(
        &self,
        listener: Arc<dyn TwilightListener>,
        context: DeliveryContext,
    ) -> Result<()> {
        let context_name = context.name().to_string();
        let (newly_added, count, updates_result, startup_queued) = {
            let mut state = self.lock();
            let was_empty = state.registry.is_empty();
            let newly_added = state.registry.register(listener, context);

            let (updates_result, startup_queued) = if was_empty && newly_added {
                let updates = self
                    .inner
                    .location_source
                    .request_updates(self.inner.trigger_sender.clone());
                let queued = self.inner.trigger_sender.send(Trigger::Startup).is_ok();
                (Some(updates), queued)
            } else {
                (None, true)
            };
            (newly_added, state.registry.len(), updates_result, startup_queued)
        };

        if self.inner.debug_enabled {
            log_pipe!();
            log_debug!(
                "Listener {} on '{context_name}' ({count} registered)",
                if newly_added { "registered" } else { "rebound" }
            );
        }
        if let Some(Err(e)) = updates_result {
            log_pipe!();
            log_warning!("Could not start location updates: {e:#}");
            log_indented!("Continuing with the last known location, if any");
        }
        if !startup_queued && self.inner.debug_enabled {
            log_pipe!();
            log_debug!("Trigger loop has stopped; startup evaluation not queued");
        }

        Ok(())
    }

    /// Unsubscribe `listener`. Returns false if it was not registered.
    ///
    /// Location updates stop when the last listener leaves. The last known
    /// location and state are kept.
    pub fn unregister_listener(&self, listener: &Arc<dyn TwilightListener>) -> bool {
        let last_left = {
            let mut state = self.lock();
            if !state.registry.unregister(listener) {
                return false;
            }
            let last_left = state.registry.is_empty();
            if last_left {
                self.inner.location_source.remove_updates();
            }
            last_left
        };

        if last_left && self.inner.debug_enabled {
            log_pipe!();
            log_debug!("Last listener left; location updates stopped");
        }
        true
    }

    pub fn listener_count(&self) -> usize {
        self.lock().registry.len()
    }

    /// The last published state, without re-evaluating.
    pub fn last_twilight_state(&self) -> Option<TwilightState> {
        self.lock().registry.current_state()
    }

    pub fn last_known_location(&self) -> Option<Location> {
        self.lock().last_known_location.clone()
    }

    pub fn phase(&self) -> SchedulerPhase {
        if self.lock().last_known_location.is_some() {
            SchedulerPhase::Tracking
        } else {
            SchedulerPhase::Uninitialized
        }
    }

    /// Apply one trigger.
    ///
    /// Returns `None` when the trigger caused no evaluation: a shutdown, or a
    /// location fix that was rejected.
    pub fn handle_trigger(&self, trigger: Trigger) -> Option<Evaluation> {
        let reason = trigger.name();
        match trigger {
            Trigger::Shutdown => None,
            Trigger::LocationChanged(fix) => {
                if !is_usable_fix(&fix) {
                    log_pipe!();
                    log_warning!(
                        "Ignoring location fix ({}, {}) from '{}'",
                        fix.latitude,
                        fix.longitude,
                        fix.provider
                    );
                    return None;
                }

                if self.inner.debug_enabled {
                    log_pipe!();
                    log_debug!(
                        "Accepted fix {fix} from '{}' (accuracy {:.0} m)",
                        fix.provider,
                        fix.accuracy
                    );
                }
                Some(self.evaluate(reason, Some(fix)))
            }
            Trigger::Startup | Trigger::ClockChanged | Trigger::AlarmFired => {
                Some(self.evaluate(reason, None))
            }
        }
    }

    /// Re-evaluate now with the current location and publish the outcome.
    pub fn evaluate_and_publish(&self) -> Evaluation {
        self.evaluate("request", None)
    }

    /// One pass: optionally accept `fix`, evaluate, publish, then log.
    ///
    /// Only the log output is written after the lock is released.
    fn evaluate(&self, reason: &'static str, fix: Option<Location>) -> Evaluation {
        // Detection may touch the filesystem, so it stays outside the lock
        let timezone = self.inner.clock.timezone();

        let (evaluation, pass_log) = {
            let mut state = self.lock();
            if let Some(fix) = fix {
                state.last_known_location = Some(fix);
            }
            self.evaluate_locked(&mut state, timezone)
        };

        self.write_pass_log(reason, &evaluation, pass_log);
        evaluation
    }

    fn evaluate_locked(&self, state: &mut SchedulerState, timezone: Tz) -> (Evaluation, PassLog) {
        let now = self.inner.clock.now();

        let location = state.last_known_location.clone().or_else(|| {
            self.inner
                .location_source
                .last_known_location()
                .filter(is_usable_fix)
        });

        let Some(location) = location else {
            let publication = state.registry.publish(None, now);
            return (Evaluation::passive(publication), PassLog::NoLocation);
        };

        let new_state = match self.inner.evaluator.try_evaluate(&location, now, timezone) {
            Ok(new_state) => new_state,
            Err(error) => {
                return (
                    Evaluation::passive(Publication::Unchanged),
                    PassLog::Failed { location, error },
                );
            }
        };

        let publication = state.registry.publish(Some(new_state), now);
        let is_night = new_state.is_night(now);
        if publication != Publication::Unchanged {
            self.inner.settings.set_is_night(is_night);
        }

        let next_wakeup = new_state.next_transition(now);
        self.inner.alarm.schedule_exact_wakeup(next_wakeup);

        let evaluation = Evaluation {
            state: Some(new_state),
            is_night: Some(is_night),
            publication,
            next_wakeup: Some(next_wakeup),
        };
        (evaluation, PassLog::Evaluated { timezone })
    }

    fn write_pass_log(&self, reason: &str, evaluation: &Evaluation, pass_log: PassLog) {
        match pass_log {
            PassLog::NoLocation => {
                if evaluation.publication == Publication::StateChanged {
                    log_block_start!("Twilight state unknown ({reason})");
                    log_indented!("No location available; waiting for a fix");
                } else if self.inner.debug_enabled {
                    log_pipe!();
                    log_debug!("No location available on {reason}");
                }
            }
            PassLog::Failed { location, error } => {
                log_pipe!();
                log_warning!("Could not compute twilight at {location}: {error}");
                log_indented!("Keeping the last state; no wake-up scheduled");
            }
            PassLog::Evaluated { timezone } => {
                let (Some(state), Some(is_night), Some(next_wakeup)) =
                    (evaluation.state, evaluation.is_night, evaluation.next_wakeup)
                else {
                    return;
                };
                match evaluation.publication {
                    Publication::StateChanged => {
                        log_block_start!("Twilight state updated ({reason})");
                        log_state(&state, timezone);
                        log_indented!("Now: {}", if is_night { "night" } else { "day" });
                        log_indented!("Next wake-up: {}", format_local(next_wakeup, timezone));
                    }
                    Publication::DayNightFlipped => {
                        log_block_start!(
                            "{} has begun ({reason})",
                            if is_night { "Night" } else { "Day" }
                        );
                        log_indented!("Next wake-up: {}", format_local(next_wakeup, timezone));
                    }
                    Publication::Unchanged => {
                        if self.inner.debug_enabled {
                            log_pipe!();
                            log_debug!(
                                "Twilight unchanged on {reason}; wake-up at {}",
                                format_local(next_wakeup, timezone)
                            );
                        }
                    }
                }
            }
        }
    }

    /// Consume triggers until [`Trigger::Shutdown`], a closed channel or
    /// `running` turning false.
    pub fn run(&self, receiver: Receiver<Trigger>, running: &AtomicBool) {
        let poll = StdDuration::from_millis(SCHEDULER_POLL_MS);

        while running.load(Ordering::SeqCst) {
            match receiver.recv_timeout(poll) {
                Ok(Trigger::Shutdown) => {
                    if self.inner.debug_enabled {
                        log_pipe!();
                        log_debug!("Shutdown trigger received");
                    }
                    break;
                }
                Ok(trigger) => {
                    self.handle_trigger(trigger);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

/// What a pass has to report, written once the scheduler lock is released.
enum PassLog {
    NoLocation,
    Failed {
        location: Location,
        error: EvaluationError,
    },
    Evaluated {
        timezone: Tz,
    },
}

/// Provider failures report exactly (0, 0); out-of-range fixes are unusable too.
fn is_usable_fix(fix: &Location) -> bool {
    !fix.is_provider_failure() && fix.has_valid_coordinates()
}

fn format_local(instant: DateTime<Utc>, timezone: Tz) -> String {
    instant
        .with_timezone(&timezone)
        .format("%Y-%m-%d %H:%M:%S %Z")
        .to_string()
}

fn log_state(state: &TwilightState, timezone: Tz) {
    log_indented!("Previous sunset: {}", format_local(state.previous_sunset, timezone));
    log_indented!("Sunrise: {}", format_local(state.sunrise, timezone));
    log_indented!("Sunset: {}", format_local(state.sunset, timezone));
    log_indented!("Next sunrise: {}", format_local(state.next_sunrise, timezone));
}
