//! Device location fixes and the location-provider seam.
//!
//! A [`Location`] is a best-effort fix delivered by some provider. The
//! scheduler only ever keeps the most recent accepted fix; there is no fusion
//! of several fixes by accuracy.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;
use std::sync::{Mutex, PoisonError};

use crate::constants::CONFIG_PROVIDER;
use crate::scheduler::Trigger;

/// A single location fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Geographic latitude in degrees (-90 to +90)
    pub latitude: f64,
    /// Geographic longitude in degrees (-180 to +180)
    pub longitude: f64,
    /// Estimated horizontal accuracy in metres
    pub accuracy: f32,
    /// When the fix was taken
    pub timestamp: DateTime<Utc>,
    /// Name of the provider that produced the fix
    pub provider: String,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: 0.0,
            timestamp: Utc::now(),
            provider: String::new(),
        }
    }

    pub fn with_accuracy(mut self, accuracy: f32) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Providers report exactly (0.0, 0.0) when they fail to get a fix.
    pub fn is_provider_failure(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    pub fn has_valid_coordinates(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lat_dir = if self.latitude >= 0.0 { "N" } else { "S" };
        let lon_dir = if self.longitude >= 0.0 { "E" } else { "W" };
        write!(
            f,
            "{:.4}°{lat_dir}, {:.4}°{lon_dir}",
            self.latitude.abs(),
            self.longitude.abs()
        )
    }
}

/// A provider of location fixes.
///
/// Providers push fixes into the scheduler's trigger channel as
/// [`Trigger::LocationChanged`] once `request_updates` has been called, and
/// must stop doing so after `remove_updates`.
#[cfg_attr(test, mockall::automock)]
pub trait LocationSource: Send + Sync {
    /// Best last-known fix, if the provider has one.
    fn last_known_location(&self) -> Option<Location>;

    /// Start delivering fixes into `sink`.
    fn request_updates(&self, sink: Sender<Trigger>) -> Result<()>;

    /// Stop delivering fixes.
    fn remove_updates(&self);
}

/// Location source backed by coordinates from the configuration file.
///
/// The configured fix is delivered once when updates are requested, and again
/// whenever the configuration is reloaded with different coordinates.
pub struct StaticLocationSource {
    location: Mutex<Option<Location>>,
    sink: Mutex<Option<Sender<Trigger>>>,
}

impl StaticLocationSource {
    pub fn new(location: Option<Location>) -> Self {
        Self {
            location: Mutex::new(location),
            sink: Mutex::new(None),
        }
    }

    /// Build the fix for configured coordinates.
    pub fn config_fix(latitude: f64, longitude: f64, accuracy: f32) -> Location {
        Location::new(latitude, longitude)
            .with_accuracy(accuracy)
            .with_provider(CONFIG_PROVIDER)
    }

    /// Replace the configured location.
    ///
    /// Returns true when the coordinates changed and the new fix was pushed
    /// to an active subscriber.
    pub fn update(&self, location: Option<Location>) -> bool {
        let changed = {
            let mut current = self.location.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = match (&*current, &location) {
                (Some(old), Some(new)) => {
                    old.latitude != new.latitude || old.longitude != new.longitude
                }
                (None, None) => false,
                _ => true,
            };
            *current = location.clone();
            changed
        };

        if !changed {
            return false;
        }

        let sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        match (sink.as_ref(), location) {
            (Some(sink), Some(fix)) => sink.send(Trigger::LocationChanged(fix)).is_ok(),
            _ => false,
        }
    }
}

impl LocationSource for StaticLocationSource {
    fn last_known_location(&self) -> Option<Location> {
        self.location
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn request_updates(&self, sink: Sender<Trigger>) -> Result<()> {
        if let Some(fix) = self.last_known_location() {
            sink.send(Trigger::LocationChanged(fix))
                .map_err(|_| anyhow::anyhow!("Trigger channel closed"))?;
        }
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        Ok(())
    }

    fn remove_updates(&self) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn test_provider_failure_sentinel() {
        assert!(Location::new(0.0, 0.0).is_provider_failure());
        assert!(!Location::new(0.0, 12.5).is_provider_failure());
        assert!(!Location::new(-0.5, 0.0).is_provider_failure());
    }

    #[test]
    fn test_coordinate_ranges() {
        assert!(Location::new(90.0, -180.0).has_valid_coordinates());
        assert!(!Location::new(90.5, 0.0).has_valid_coordinates());
        assert!(!Location::new(0.0, 181.0).has_valid_coordinates());
    }

    #[test]
    fn test_display_uses_hemispheres() {
        let location = Location::new(37.4, -122.1);
        assert_eq!(location.to_string(), "37.4000°N, 122.1000°W");
    }

    #[test]
    fn test_static_source_delivers_on_request() {
        let source = StaticLocationSource::new(Some(StaticLocationSource::config_fix(
            51.5, -0.12, 500.0,
        )));
        let (tx, rx) = channel();
        source.request_updates(tx).unwrap();

        match rx.try_recv() {
            Ok(Trigger::LocationChanged(fix)) => {
                assert_eq!(fix.latitude, 51.5);
                assert_eq!(fix.provider, CONFIG_PROVIDER);
                assert_eq!(fix.accuracy, 500.0);
            }
            other => panic!("expected a location trigger, got {other:?}"),
        }
    }

    #[test]
    fn test_static_source_without_location_stays_silent() {
        let source = StaticLocationSource::new(None);
        let (tx, rx) = channel();
        source.request_updates(tx).unwrap();
        assert!(rx.try_recv().is_err());
        assert!(source.last_known_location().is_none());
    }

    #[test]
    fn test_static_source_update_pushes_only_changes() {
        let source = StaticLocationSource::new(Some(Location::new(10.0, 10.0)));
        let (tx, rx) = channel();
        source.request_updates(tx).unwrap();
        let _initial = rx.try_recv();

        assert!(!source.update(Some(Location::new(10.0, 10.0))));
        assert!(rx.try_recv().is_err());

        assert!(source.update(Some(Location::new(20.0, 10.0))));
        assert!(matches!(rx.try_recv(), Ok(Trigger::LocationChanged(_))));

        source.remove_updates();
        assert!(!source.update(Some(Location::new(30.0, 10.0))));
        assert_eq!(source.last_known_location().unwrap().latitude, 30.0);
    }
}
