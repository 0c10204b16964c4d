use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use proptest::prelude::*;
use std::sync::Arc;

use twilightr::alarm::WakeupAlarm;
use twilightr::listeners::Publication;
use twilightr::location::Location;
use twilightr::logger::Log;
use twilightr::scheduler::Trigger;
use twilightr::testing::Harness;
use twilightr::time_source::FixedClock;
use twilightr::twilight::{SolarCalculator, StateEvaluator};

/// Latitudes where the sun rises and sets every day of the year
fn latitude_strategy() -> impl Strategy<Value = f64> {
    -55.0..=55.0
}

/// Longitudes close enough to Greenwich that UTC is a sensible local day
fn longitude_strategy() -> impl Strategy<Value = f64> {
    -30.0..=30.0
}

/// Any second of 2024 (UTC)
fn instant_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..366 * 24 * 3600).prop_map(|secs| {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    })
}

fn evaluator() -> StateEvaluator {
    StateEvaluator::new(Arc::new(SolarCalculator::new()))
}

/// Properties of a single evaluation
#[cfg(test)]
mod evaluation_tests {
    use super::*;

    proptest! {
        /// Evaluating twice with the same inputs gives the same state
        #[test]
        fn test_evaluation_is_deterministic(
            lat in latitude_strategy(),
            lon in longitude_strategy(),
            now in instant_strategy()
        ) {
            let location = Location::new(lat, lon);
            let first = evaluator().evaluate(Some(&location), now, Tz::UTC);
            let second = evaluator().evaluate(Some(&location), now, Tz::UTC);
            prop_assert_eq!(first, second);
        }

        /// Boundaries are strictly ordered and the next transition lies ahead
        #[test]
        fn test_state_is_ordered_and_transition_is_ahead(
            lat in latitude_strategy(),
            lon in longitude_strategy(),
            now in instant_strategy()
        ) {
            let location = Location::new(lat, lon);
            let state = evaluator()
                .try_evaluate(&location, now, Tz::UTC)
                .map_err(|e| TestCaseError::fail(format!("({lat}, {lon}) at {now}: {e}")))?;

            prop_assert!(state.previous_sunset < state.sunrise);
            prop_assert!(state.sunrise < state.sunset);
            prop_assert!(state.sunset < state.next_sunrise);

            let next = state.next_transition(now);
            prop_assert!(next > now);
            prop_assert!(next == state.sunrise || next == state.sunset || next == state.next_sunrise);

            // The flag flips exactly at the next transition
            prop_assert_ne!(state.is_night(now), state.is_night(next));
        }

        /// The rest of the day/night period evaluates to the same day/night answer
        #[test]
        fn test_is_night_is_stable_until_next_transition(
            lat in latitude_strategy(),
            lon in longitude_strategy(),
            now in instant_strategy(),
            fraction in 0.0f64..1.0
        ) {
            let location = Location::new(lat, lon);
            let state = evaluator().evaluate(Some(&location), now, Tz::UTC).unwrap();
            let next = state.next_transition(now);
            let span = (next - now).num_seconds();
            let later = now + Duration::seconds((span as f64 * fraction) as i64);

            prop_assert!(later < next);
            prop_assert_eq!(state.is_night(now), state.is_night(later));
        }
    }
}

/// Properties of the scheduler driven by triggers
#[cfg(test)]
mod scheduler_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// After any evaluation, the alarm is armed at the state's next transition
        #[test]
        fn test_alarm_follows_next_transition(
            lat in latitude_strategy(),
            lon in longitude_strategy(),
            now in instant_strategy()
        ) {
            Log::set_enabled(false);
            prop_assume!(!(lat == 0.0 && lon == 0.0));
            let harness = Harness::new(FixedClock::new(now, Tz::UTC));
            let evaluation = harness
                .scheduler
                .handle_trigger(Trigger::LocationChanged(Location::new(lat, lon)))
                .unwrap();

            let state = evaluation.state.unwrap();
            prop_assert_eq!(harness.alarm.pending(), Some(state.next_transition(now)));
            prop_assert_eq!(evaluation.next_wakeup, harness.alarm.pending());
            prop_assert_eq!(harness.settings.values(), vec![state.is_night(now)]);
        }

        /// Re-evaluating without any change publishes nothing new
        #[test]
        fn test_unchanged_inputs_are_deduplicated(
            lat in latitude_strategy(),
            lon in longitude_strategy(),
            now in instant_strategy(),
            repeats in 1usize..4
        ) {
            Log::set_enabled(false);
            prop_assume!(!(lat == 0.0 && lon == 0.0));
            let harness = Harness::new(FixedClock::new(now, Tz::UTC));
            let first = harness
                .scheduler
                .handle_trigger(Trigger::LocationChanged(Location::new(lat, lon)))
                .unwrap();
            prop_assert_eq!(first.publication, Publication::StateChanged);

            for _ in 0..repeats {
                let again = harness.scheduler.handle_trigger(Trigger::ClockChanged).unwrap();
                prop_assert_eq!(again.publication, Publication::Unchanged);
                prop_assert_eq!(again.state, first.state);
            }
            prop_assert_eq!(harness.settings.values().len(), 1);
            prop_assert_eq!(harness.alarm.history().len(), 1);
        }

        /// Firing the alarm at its scheduled instant always flips day and night
        #[test]
        fn test_alarm_firing_flips_day_night(
            lat in latitude_strategy(),
            lon in longitude_strategy(),
            now in instant_strategy()
        ) {
            Log::set_enabled(false);
            prop_assume!(!(lat == 0.0 && lon == 0.0));
            let harness = Harness::new(FixedClock::new(now, Tz::UTC));
            let before = harness
                .scheduler
                .handle_trigger(Trigger::LocationChanged(Location::new(lat, lon)))
                .unwrap();

            let wakeup = harness.alarm.fire().unwrap();
            harness.clock.set(wakeup);
            let after = harness.scheduler.handle_trigger(Trigger::AlarmFired).unwrap();

            prop_assert_eq!(after.is_night, before.is_night.map(|night| !night));
            prop_assert_ne!(after.publication, Publication::Unchanged);
            prop_assert!(harness.alarm.pending().unwrap() > wakeup);
        }
    }
}
