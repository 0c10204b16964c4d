//! The published twilight state value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Day/night boundaries around "today", as of one evaluation.
///
/// Two states are equal only when all four boundaries match. Change
/// detection relies on this: a new calendar day produces a new state even
/// when the day/night flag is the same as before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TwilightState {
    /// Yesterday's sunset
    pub previous_sunset: DateTime<Utc>,
    /// Today's sunrise
    pub sunrise: DateTime<Utc>,
    /// Today's sunset
    pub sunset: DateTime<Utc>,
    /// Tomorrow's sunrise
    pub next_sunrise: DateTime<Utc>,
}

impl TwilightState {
    /// Build a state, rejecting boundaries that are not strictly ordered
    /// `previous_sunset < sunrise < sunset < next_sunrise`.
    pub fn new(
        previous_sunset: DateTime<Utc>,
        sunrise: DateTime<Utc>,
        sunset: DateTime<Utc>,
        next_sunrise: DateTime<Utc>,
    ) -> Option<Self> {
        let ordered = previous_sunset < sunrise && sunrise < sunset && sunset < next_sunrise;
        ordered.then_some(Self {
            previous_sunset,
            sunrise,
            sunset,
            next_sunrise,
        })
    }

    /// Whether `now` is outside today's daylight window.
    pub fn is_night(&self, now: DateTime<Utc>) -> bool {
        now < self.sunrise || now >= self.sunset
    }

    /// The boundary at which the day/night flag next flips.
    ///
    /// Before today's sunrise this is today's sunrise, during the day it is
    /// today's sunset, and after sunset it is tomorrow's sunrise.
    pub fn next_transition(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if now < self.sunrise {
            self.sunrise
        } else if now < self.sunset {
            self.sunset
        } else {
            self.next_sunrise
        }
    }
}

impl std::fmt::Display for TwilightState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sunrise {} / sunset {}",
            self.sunrise.format("%Y-%m-%d %H:%M:%S UTC"),
            self.sunset.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample() -> TwilightState {
        let day = Utc.with_ymd_and_hms(2023, 6, 21, 0, 0, 0).unwrap();
        TwilightState::new(
            day - Duration::hours(4),
            day + Duration::hours(6),
            day + Duration::hours(20),
            day + Duration::hours(30),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_unordered_boundaries() {
        let s = sample();
        assert!(TwilightState::new(s.sunrise, s.sunrise, s.sunset, s.next_sunrise).is_none());
        assert!(TwilightState::new(s.previous_sunset, s.sunset, s.sunrise, s.next_sunrise).is_none());
        assert!(TwilightState::new(s.previous_sunset, s.sunrise, s.sunset, s.sunset).is_none());
    }

    #[test]
    fn test_is_night_boundaries() {
        let s = sample();
        assert!(s.is_night(s.previous_sunset));
        assert!(s.is_night(s.sunrise - Duration::seconds(1)));
        assert!(!s.is_night(s.sunrise));
        assert!(!s.is_night(s.sunset - Duration::seconds(1)));
        assert!(s.is_night(s.sunset));
        assert!(s.is_night(s.next_sunrise - Duration::minutes(1)));
    }

    #[test]
    fn test_next_transition() {
        let s = sample();
        assert_eq!(s.next_transition(s.previous_sunset), s.sunrise);
        assert_eq!(s.next_transition(s.sunrise), s.sunset);
        assert_eq!(s.next_transition(s.sunrise + Duration::hours(1)), s.sunset);
        assert_eq!(s.next_transition(s.sunset), s.next_sunrise);
    }

    #[test]
    fn test_equality_covers_all_boundaries() {
        let a = sample();
        let mut b = a;
        b.next_sunrise += Duration::minutes(1);
        // Same day/night answer, different boundaries
        let noon = a.sunrise + Duration::hours(6);
        assert_eq!(a.is_night(noon), b.is_night(noon));
        assert_ne!(a, b);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"previous_sunset\""));
        assert!(json.contains("\"next_sunrise\":\"2023-06-22T06:00:00Z\""));
    }
}
