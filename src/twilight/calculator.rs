//! Sunrise and sunset instants for a location and calendar day.
//!
//! [`SolarCalculator`] wraps the `sunrise` crate. That crate has no notion of
//! "the sun never rises today"; at polar latitudes its hour-angle math
//! degenerates and yields instants nowhere near the requested day. Those
//! results are detected here and surfaced as [`SolarError::NoEvent`] so that
//! callers never see a fabricated boundary.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use sunrise::{Coordinates, SolarDay, SolarEvent};

use crate::location::Location;

/// Furthest an event may sit from local noon of its day and still belong to it.
const MAX_EVENT_OFFSET_HOURS: i64 = 20;

/// Which boundary was being computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolarBoundary {
    Sunrise,
    Sunset,
}

impl SolarBoundary {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolarBoundary::Sunrise => "sunrise",
            SolarBoundary::Sunset => "sunset",
        }
    }
}

/// Failure of a sunrise/sunset computation.
#[derive(Debug, Clone, PartialEq)]
pub enum SolarError {
    /// Coordinates outside the valid latitude/longitude ranges.
    InvalidCoordinates { latitude: f64, longitude: f64 },
    /// The event does not happen on this day (polar day or polar night).
    NoEvent {
        boundary: SolarBoundary,
        day: NaiveDate,
    },
}

impl std::fmt::Display for SolarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolarError::InvalidCoordinates {
                latitude,
                longitude,
            } => write!(f, "invalid coordinates: lat={latitude:.4}, lon={longitude:.4}"),
            SolarError::NoEvent { boundary, day } => {
                write!(f, "no {} on {day} at this latitude", boundary.as_str())
            }
        }
    }
}

impl std::error::Error for SolarError {}

/// Computes official sunrise/sunset instants.
pub trait TwilightCalculator: Send + Sync {
    fn sunrise_for(
        &self,
        location: &Location,
        day: NaiveDate,
        timezone: Tz,
    ) -> Result<DateTime<Utc>, SolarError>;

    fn sunset_for(
        &self,
        location: &Location,
        day: NaiveDate,
        timezone: Tz,
    ) -> Result<DateTime<Utc>, SolarError>;
}

/// [`TwilightCalculator`] backed by the `sunrise` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SolarCalculator;

impl SolarCalculator {
    pub fn new() -> Self {
        Self
    }

    fn event(
        &self,
        location: &Location,
        day: NaiveDate,
        timezone: Tz,
        boundary: SolarBoundary,
    ) -> Result<DateTime<Utc>, SolarError> {
        let coord = Coordinates::new(location.latitude, location.longitude).ok_or(
            SolarError::InvalidCoordinates {
                latitude: location.latitude,
                longitude: location.longitude,
            },
        )?;

        let solar_day = SolarDay::new(coord, day);
        let instant = match boundary {
            SolarBoundary::Sunrise => solar_day.event_time(SolarEvent::Sunrise),
            SolarBoundary::Sunset => solar_day.event_time(SolarEvent::Sunset),
        };

        if belongs_to_day(instant, day, timezone) {
            Ok(instant)
        } else {
            Err(SolarError::NoEvent { boundary, day })
        }
    }
}

impl TwilightCalculator for SolarCalculator {
    fn sunrise_for(
        &self,
        location: &Location,
        day: NaiveDate,
        timezone: Tz,
    ) -> Result<DateTime<Utc>, SolarError> {
        self.event(location, day, timezone, SolarBoundary::Sunrise)
    }

    fn sunset_for(
        &self,
        location: &Location,
        day: NaiveDate,
        timezone: Tz,
    ) -> Result<DateTime<Utc>, SolarError> {
        self.event(location, day, timezone, SolarBoundary::Sunset)
    }
}

/// Local noon of `day` in `timezone`, as a UTC instant.
fn local_noon(day: NaiveDate, timezone: Tz) -> DateTime<Utc> {
    let noon = day.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default());
    timezone
        .from_local_datetime(&noon)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&noon))
}

fn belongs_to_day(instant: DateTime<Utc>, day: NaiveDate, timezone: Tz) -> bool {
    let offset = instant - local_noon(day, timezone);
    offset.abs() <= Duration::hours(MAX_EVENT_OFFSET_HOURS)
}
