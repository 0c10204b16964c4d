//! Status command - evaluate the twilight state once and print it.
//!
//! Uses the configured location and timezone, and either the current time or
//! the local time given with `--at`. Supports JSON and human-readable output.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;

use crate::config::{self, Config};
use crate::logger::Log;
use crate::time_source::{Clock, FixedClock, SystemClock};
use crate::twilight::{SolarCalculator, StateEvaluator, TwilightCalculator, TwilightState};

/// Result of a single evaluation, as printed by `twilightr status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub evaluated_at: DateTime<Utc>,
    /// `None` when no state could be computed
    pub is_night: Option<bool>,
    pub state: Option<TwilightState>,
    pub next_transition: Option<DateTime<Utc>>,
    /// Why `state` is missing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Handle the status command.
///
/// # Arguments
/// * `at` - Local time to evaluate at (`YYYY-MM-DD HH:MM:SS`), or now
/// * `json` - Output in JSON format
pub fn handle_status_command(at: Option<&str>, json: bool, debug_enabled: bool) -> Result<()> {
    // Keep stdout parseable
    if json {
        Log::set_enabled(false);
    }

    let config = config::load().context("Configuration failed")?;
    let system_clock = SystemClock::new(config.timezone_override()?);
    let timezone = system_clock.timezone();

    let clock: Box<dyn Clock> = match at {
        Some(local) => Box::new(FixedClock::at_local(local, timezone).map_err(anyhow::Error::msg)?),
        None => Box::new(system_clock),
    };

    if debug_enabled {
        log_pipe!();
        log_debug!("Evaluating at {} in {}", clock.now(), timezone);
    }

    let report = build_status_report(&config, clock.as_ref(), Arc::new(SolarCalculator::new()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        display_human_readable(&report, timezone);
    }
    Ok(())
}

/// Evaluate the configured location at the clock's current instant.
pub fn build_status_report(
    config: &Config,
    clock: &dyn Clock,
    calculator: Arc<dyn TwilightCalculator>,
) -> Result<StatusReport> {
    let location = config
        .location()
        .context("No location configured; set latitude and longitude first")?;
    let now = clock.now();
    let timezone = clock.timezone();

    let evaluator = StateEvaluator::new(calculator);
    let (state, error) = match evaluator.try_evaluate(&location, now, timezone) {
        Ok(state) => (Some(state), None),
        Err(e) => (None, Some(e.to_string())),
    };

    Ok(StatusReport {
        latitude: location.latitude,
        longitude: location.longitude,
        timezone: timezone.name().to_string(),
        evaluated_at: now,
        is_night: state.map(|s| s.is_night(now)),
        state,
        next_transition: state.map(|s| s.next_transition(now)),
        error,
    })
}

fn display_human_readable(report: &StatusReport, timezone: Tz) {
    let local = |instant: DateTime<Utc>| {
        instant
            .with_timezone(&timezone)
            .format("%Y-%m-%d %H:%M:%S %Z")
            .to_string()
    };

    println!("       Location: {:.4}, {:.4}", report.latitude, report.longitude);
    println!("       Timezone: {}", report.timezone);
    println!("   Evaluated at: {}", local(report.evaluated_at));

    match (&report.state, report.is_night) {
        (Some(state), Some(is_night)) => {
            println!("         Period: {}", if is_night { "Night" } else { "Day" });
            println!("Previous sunset: {}", local(state.previous_sunset));
            println!("        Sunrise: {}", local(state.sunrise));
            println!("         Sunset: {}", local(state.sunset));
            println!("   Next sunrise: {}", local(state.next_sunrise));
            if let Some(next) = report.next_transition {
                println!("Next transition: {}", local(next));
            }
        }
        _ => {
            println!("         Period: Unknown");
            if let Some(error) = &report.error {
                println!("         Reason: {error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Los_Angeles;

    fn palo_alto_config() -> Config {
        Config {
            latitude: Some(37.4),
            longitude: Some(-122.1),
            ..Config::default()
        }
    }

    #[test]
    fn test_report_at_midday() {
        let clock = FixedClock::at_local("2024-06-21 12:00:00", Los_Angeles).unwrap();
        let report =
            build_status_report(&palo_alto_config(), &clock, Arc::new(SolarCalculator::new()))
                .unwrap();

        assert_eq!(report.is_night, Some(false));
        let state = report.state.unwrap();
        assert_eq!(report.next_transition, Some(state.sunset));
        assert_eq!(report.timezone, "America/Los_Angeles");
        assert!(report.error.is_none());
    }

    #[test]
    fn test_report_requires_location() {
        let clock = FixedClock::at_local("2024-06-21 12:00:00", Los_Angeles).unwrap();
        let result =
            build_status_report(&Config::default(), &clock, Arc::new(SolarCalculator::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_polar_night_reports_reason() {
        let config = Config {
            latitude: Some(78.22),
            longitude: Some(15.65),
            ..Config::default()
        };
        let clock = FixedClock::at_local("2024-12-21 12:00:00", chrono_tz::Arctic::Longyearbyen)
            .unwrap();
        let report =
            build_status_report(&config, &clock, Arc::new(SolarCalculator::new())).unwrap();

        assert!(report.state.is_none());
        assert!(report.is_night.is_none());
        assert!(report.error.is_some());

        let json = serde_json::to_value(&report).unwrap();
        assert!(json["state"].is_null());
        assert!(json["error"].is_string());
    }
}
