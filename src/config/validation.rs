//! Configuration validation functionality.
//!
//! Rejects configurations the scheduler cannot work with: coordinates out of
//! range or only half specified, negative accuracy and unknown timezones.

use anyhow::Result;

use super::Config;
use crate::time_source::parse_timezone_name;

/// Validate a loaded configuration (after `geo.toml` has been merged).
pub fn validate_config(config: &Config) -> Result<()> {
    match (config.latitude, config.longitude) {
        (Some(_), None) => anyhow::bail!("latitude is set but longitude is missing"),
        (None, Some(_)) => anyhow::bail!("longitude is set but latitude is missing"),
        _ => {}
    }

    if let Some(lat) = config.latitude
        && !(-90.0..=90.0).contains(&lat)
    {
        anyhow::bail!("latitude must be between -90 and 90 degrees (got {})", lat);
    }

    if let Some(lon) = config.longitude
        && !(-180.0..=180.0).contains(&lon)
    {
        anyhow::bail!(
            "longitude must be between -180 and 180 degrees (got {})",
            lon
        );
    }

    // (0, 0) is the provider-failure sentinel and would never be accepted
    if let Some(location) = config.location()
        && location.is_provider_failure()
    {
        anyhow::bail!("latitude and longitude cannot both be 0");
    }

    if let Some(accuracy) = config.accuracy
        && !(accuracy.is_finite() && accuracy >= 0.0)
    {
        anyhow::bail!(
            "accuracy must be a non-negative number of metres (got {})",
            accuracy
        );
    }

    if let Some(name) = config.timezone.as_deref()
        && parse_timezone_name(name).is_none()
    {
        anyhow::bail!("timezone '{}' is not a known IANA timezone name", name);
    }

    Ok(())
}
