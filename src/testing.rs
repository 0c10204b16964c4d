//! Test doubles for the scheduler's collaborators.
//!
//! Compiled for unit tests and for integration tests through the
//! `testing-support` feature.

use anyhow::Result;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use crate::alarm::WakeupAlarm;
use crate::listeners::{DeliveryContext, TwilightListener};
use crate::location::{Location, LocationSource};
use crate::scheduler::{SchedulerParams, Trigger, UpdateScheduler};
use crate::settings::SettingsMirror;
use crate::time_source::FixedClock;
use crate::twilight::{SolarCalculator, TwilightCalculator, TwilightState};

/// Palo Alto, used by the documented scenarios.
pub const PALO_ALTO: (f64, f64) = (37.4, -122.1);

pub fn palo_alto() -> Location {
    Location::new(PALO_ALTO.0, PALO_ALTO.1)
        .with_accuracy(50.0)
        .with_provider("test")
}

/// Alarm that records every wake-up registration it was asked for.
#[derive(Default)]
pub struct RecordingAlarm {
    slot: Mutex<AlarmRecord>,
}

#[derive(Default)]
struct AlarmRecord {
    pending: Option<DateTime<Utc>>,
    history: Vec<DateTime<Utc>>,
}

impl RecordingAlarm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every registration that replaced a different pending one, in order.
    pub fn history(&self) -> Vec<DateTime<Utc>> {
        self.slot.lock().unwrap().history.clone()
    }

    /// Consume the pending registration, as if it had fired.
    pub fn fire(&self) -> Option<DateTime<Utc>> {
        self.slot.lock().unwrap().pending.take()
    }
}

impl WakeupAlarm for RecordingAlarm {
    fn schedule_exact_wakeup(&self, at: DateTime<Utc>) {
        let mut slot = self.slot.lock().unwrap();
        if slot.pending == Some(at) {
            return;
        }
        slot.pending = Some(at);
        slot.history.push(at);
    }

    fn pending(&self) -> Option<DateTime<Utc>> {
        self.slot.lock().unwrap().pending
    }
}

/// Settings mirror that records every written value.
#[derive(Default)]
pub struct RecordingSettings {
    values: Mutex<Vec<bool>>,
}

impl RecordingSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn values(&self) -> Vec<bool> {
        self.values.lock().unwrap().clone()
    }
}

impl SettingsMirror for RecordingSettings {
    fn set_is_night(&self, is_night: bool) {
        self.values.lock().unwrap().push(is_night);
    }
}

/// Location source whose last-known fix and pushed updates are set by the test.
#[derive(Default)]
pub struct FixedLocationSource {
    last_known: Mutex<Option<Location>>,
    sink: Mutex<Option<Sender<Trigger>>>,
    requests: AtomicUsize,
    removals: AtomicUsize,
}

impl FixedLocationSource {
    pub fn new(last_known: Option<Location>) -> Self {
        Self {
            last_known: Mutex::new(last_known),
            ..Self::default()
        }
    }

    pub fn set_last_known(&self, location: Option<Location>) {
        *self.last_known.lock().unwrap() = location;
    }

    /// Deliver a fix to the subscriber. Returns false when nobody listens.
    pub fn push(&self, location: Location) -> bool {
        match self.sink.lock().unwrap().as_ref() {
            Some(sink) => sink.send(Trigger::LocationChanged(location)).is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn removal_count(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }
}

impl LocationSource for FixedLocationSource {
    fn last_known_location(&self) -> Option<Location> {
        self.last_known.lock().unwrap().clone()
    }

    fn request_updates(&self, sink: Sender<Trigger>) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn remove_updates(&self) {
        self.removals.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = None;
    }
}

/// What a [`ChannelListener`] observed.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    State(Option<TwilightState>),
    DayNight(bool),
}

/// Listener forwarding every callback into a channel.
pub struct ChannelListener {
    sink: Mutex<Sender<ListenerEvent>>,
}

impl ChannelListener {
    pub fn new() -> (Arc<dyn TwilightListener>, ListenerProbe) {
        let (tx, rx) = channel();
        let listener: Arc<dyn TwilightListener> = Arc::new(Self {
            sink: Mutex::new(tx),
        });
        (listener, ListenerProbe { receiver: rx })
    }
}

impl TwilightListener for ChannelListener {
    fn on_twilight_state_changed(&self, state: Option<TwilightState>) -> Result<()> {
        let _ = self.sink.lock().unwrap().send(ListenerEvent::State(state));
        Ok(())
    }

    fn on_day_night_changed(&self, _state: TwilightState, is_night: bool) -> Result<()> {
        let _ = self.sink.lock().unwrap().send(ListenerEvent::DayNight(is_night));
        Ok(())
    }
}

/// Receiving end of a [`ChannelListener`].
pub struct ListenerProbe {
    receiver: Receiver<ListenerEvent>,
}

impl ListenerProbe {
    const WAIT: StdDuration = StdDuration::from_secs(2);
    const QUIET: StdDuration = StdDuration::from_millis(150);

    /// Wait for the next callback.
    pub fn recv(&self) -> Option<ListenerEvent> {
        self.receiver.recv_timeout(Self::WAIT).ok()
    }

    /// Wait for the next callback and require it to be a state change.
    pub fn recv_state(&self) -> Option<TwilightState> {
        match self.recv() {
            Some(ListenerEvent::State(state)) => state,
            other => panic!("expected a state change, got {other:?}"),
        }
    }

    /// True if no callback arrives within a short grace period.
    pub fn is_quiet(&self) -> bool {
        self.receiver.recv_timeout(Self::QUIET).is_err()
    }
}

/// A scheduler wired to test doubles, driven synchronously.
pub struct Harness {
    pub scheduler: UpdateScheduler,
    pub clock: Arc<FixedClock>,
    pub location_source: Arc<FixedLocationSource>,
    pub alarm: Arc<RecordingAlarm>,
    pub settings: Arc<RecordingSettings>,
    pub triggers: Receiver<Trigger>,
}

impl Harness {
    /// Scheduler using the real solar calculator.
    pub fn new(clock: FixedClock) -> Self {
        Self::with_calculator(clock, Arc::new(SolarCalculator::new()))
    }

    pub fn with_calculator(clock: FixedClock, calculator: Arc<dyn TwilightCalculator>) -> Self {
        let clock = Arc::new(clock);
        let location_source = Arc::new(FixedLocationSource::new(None));
        let alarm = Arc::new(RecordingAlarm::new());
        let settings = Arc::new(RecordingSettings::new());
        let (trigger_sender, triggers) = channel();

        let scheduler = UpdateScheduler::new(SchedulerParams {
            calculator,
            clock: clock.clone(),
            location_source: location_source.clone(),
            alarm: alarm.clone(),
            settings: settings.clone(),
            trigger_sender,
            debug_enabled: false,
        });

        Self {
            scheduler,
            clock,
            location_source,
            alarm,
            settings,
            triggers,
        }
    }

    /// Clock at a local wall time in `timezone`.
    pub fn at_local(local: &str, timezone: Tz) -> Self {
        Self::new(FixedClock::at_local(local, timezone).unwrap())
    }

    /// Register a fresh [`ChannelListener`] on its own context.
    pub fn listen(&self, name: &str) -> (Arc<dyn TwilightListener>, ListenerProbe) {
        let (listener, probe) = ChannelListener::new();
        self.scheduler
            .register_listener(listener.clone(), DeliveryContext::spawn(name).unwrap())
            .unwrap();
        (listener, probe)
    }

    /// Handle every queued trigger. Returns how many were handled.
    pub fn drain(&self) -> usize {
        let mut handled = 0;
        while let Ok(trigger) = self.triggers.try_recv() {
            self.scheduler.handle_trigger(trigger);
            handled += 1;
        }
        handled
    }
}
