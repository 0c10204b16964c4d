//! Exact wake-up alarm.
//!
//! The scheduler keeps at most one pending wake-up. Scheduling a new instant
//! replaces the old one; there is no separate cancel.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration as StdDuration;

use crate::constants::ALARM_MAX_SLICE_SECS;
use crate::scheduler::Trigger;
use crate::time_source::Clock;

/// A single-slot exact wake-up primitive.
pub trait WakeupAlarm: Send + Sync {
    /// Arrange for one wake-up at `at`, replacing any pending one.
    ///
    /// Scheduling the instant that is already pending is a no-op.
    fn schedule_exact_wakeup(&self, at: DateTime<Utc>);

    /// The pending wake-up, if any.
    fn pending(&self) -> Option<DateTime<Utc>>;
}

struct AlarmSlot {
    target: Option<DateTime<Utc>>,
    stopped: bool,
}

struct AlarmShared {
    slot: Mutex<AlarmSlot>,
    changed: Condvar,
}

/// Wake-up alarm driven by a dedicated thread.
///
/// When the wake-up instant is reached the registration is consumed and a
/// single [`Trigger::AlarmFired`] is sent. The thread re-reads the wall clock
/// at least every [`ALARM_MAX_SLICE_SECS`] seconds, so a clock jump or a
/// system suspend delays a wake-up by at most one slice.
pub struct ThreadAlarm {
    shared: Arc<AlarmShared>,
}

impl ThreadAlarm {
    pub fn start(clock: Arc<dyn Clock>, sink: Sender<Trigger>, debug_enabled: bool) -> Result<Self> {
        Self::start_with_slice(
            clock,
            sink,
            StdDuration::from_secs(ALARM_MAX_SLICE_SECS),
            debug_enabled,
        )
    }

    pub fn start_with_slice(
        clock: Arc<dyn Clock>,
        sink: Sender<Trigger>,
        max_slice: StdDuration,
        debug_enabled: bool,
    ) -> Result<Self> {
        let shared = Arc::new(AlarmShared {
            slot: Mutex::new(AlarmSlot {
                target: None,
                stopped: false,
            }),
            changed: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("twilightr-alarm".to_string())
            .spawn(move || run_alarm(thread_shared, clock, sink, max_slice, debug_enabled))
            .context("Failed to spawn alarm thread")?;

        Ok(Self { shared })
    }
}

fn run_alarm(
    shared: Arc<AlarmShared>,
    clock: Arc<dyn Clock>,
    sink: Sender<Trigger>,
    max_slice: StdDuration,
    debug_enabled: bool,
) {
    loop {
        let fired_at = {
            let mut slot = shared.slot.lock().unwrap_or_else(PoisonError::into_inner);
            loop {
                if slot.stopped {
                    return;
                }
                match slot.target {
                    None => {
                        slot = shared
                            .changed
                            .wait(slot)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    Some(at) => {
                        let now = clock.now();
                        if now >= at {
                            slot.target = None;
                            break at;
                        }
                        let remaining = (at - now).to_std().unwrap_or(StdDuration::ZERO);
                        slot = shared
                            .changed
                            .wait_timeout(slot, remaining.min(max_slice))
                            .unwrap_or_else(PoisonError::into_inner)
                            .0;
                    }
                }
            }
        };

        if debug_enabled {
            log_pipe!();
            log_debug!("Wake-up alarm fired (scheduled for {fired_at})");
        }

        if sink.send(Trigger::AlarmFired).is_err() {
            // Scheduler loop is gone
            return;
        }
    }
}

impl WakeupAlarm for ThreadAlarm {
    fn schedule_exact_wakeup(&self, at: DateTime<Utc>) {
        let mut slot = self
            .shared
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.target == Some(at) {
            return;
        }
        slot.target = Some(at);
        self.shared.changed.notify_all();
    }

    fn pending(&self) -> Option<DateTime<Utc>> {
        self.shared
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .target
    }
}

impl Drop for ThreadAlarm {
    fn drop(&mut self) {
        let mut slot = self
            .shared
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slot.stopped = true;
        self.shared.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_source::FixedClock;
    use chrono::{Duration, TimeZone};
    use chrono_tz::Tz;
    use std::sync::mpsc::channel;

    fn fixed_clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2023, 6, 21, 19, 0, 0).unwrap(),
            Tz::UTC,
        ))
    }

    #[test]
    fn test_past_instant_fires_once() {
        let clock = fixed_clock();
        let (tx, rx) = channel();
        let alarm = ThreadAlarm::start(clock.clone(), tx, false).unwrap();

        alarm.schedule_exact_wakeup(clock.now() - Duration::seconds(1));

        assert!(matches!(
            rx.recv_timeout(StdDuration::from_secs(2)),
            Ok(Trigger::AlarmFired)
        ));
        assert!(rx.recv_timeout(StdDuration::from_millis(200)).is_err());
        assert_eq!(alarm.pending(), None);
    }

    #[test]
    fn test_future_instant_waits_for_clock() {
        let clock = fixed_clock();
        let (tx, rx) = channel();
        let alarm =
            ThreadAlarm::start_with_slice(clock.clone(), tx, StdDuration::from_millis(20), false)
                .unwrap();

        let at = clock.now() + Duration::hours(1);
        alarm.schedule_exact_wakeup(at);
        assert!(rx.recv_timeout(StdDuration::from_millis(150)).is_err());
        assert_eq!(alarm.pending(), Some(at));

        clock.set(at);
        assert!(matches!(
            rx.recv_timeout(StdDuration::from_secs(2)),
            Ok(Trigger::AlarmFired)
        ));
    }

    #[test]
    fn test_rescheduling_replaces_pending() {
        let clock = fixed_clock();
        let (tx, rx) = channel();
        let alarm =
            ThreadAlarm::start_with_slice(clock.clone(), tx, StdDuration::from_millis(20), false)
                .unwrap();

        let first = clock.now() + Duration::hours(2);
        let second = clock.now() + Duration::hours(1);
        alarm.schedule_exact_wakeup(first);
        alarm.schedule_exact_wakeup(first);
        alarm.schedule_exact_wakeup(second);
        assert_eq!(alarm.pending(), Some(second));

        clock.set(first);
        assert!(matches!(
            rx.recv_timeout(StdDuration::from_secs(2)),
            Ok(Trigger::AlarmFired)
        ));
        // The replaced registration never fires on its own
        assert!(rx.recv_timeout(StdDuration::from_millis(200)).is_err());
    }
}
