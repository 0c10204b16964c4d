//! Clock abstraction for real and fixed time.
//!
//! The scheduler never reads the system clock directly. It asks a [`Clock`]
//! for the current instant and for the timezone that defines "today", so that
//! tests and the `status --at` command can pin both.

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDateTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::{Mutex, PoisonError};

/// Source of the current instant and the current timezone.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;

    /// The timezone whose calendar day is "today".
    ///
    /// Read on every evaluation so that a timezone change followed by a
    /// clock-change trigger is picked up without restarting.
    fn timezone(&self) -> Tz;
}

/// Wall clock with system timezone detection.
pub struct SystemClock {
    /// Timezone forced by configuration, bypassing detection
    timezone_override: Mutex<Option<Tz>>,
}

impl SystemClock {
    pub fn new(timezone_override: Option<Tz>) -> Self {
        Self {
            timezone_override: Mutex::new(timezone_override),
        }
    }

    /// Replace the configured override. Returns true if it changed.
    pub fn set_timezone_override(&self, timezone: Option<Tz>) -> bool {
        let mut current = self
            .timezone_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let changed = *current != timezone;
        *current = timezone;
        changed
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn timezone(&self) -> Tz {
        let timezone_override = *self
            .timezone_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(timezone) = timezone_override.or_else(detect_system_timezone) {
            return timezone;
        }
        if let Some(timezone) = zone_matching_local(Utc::now()) {
            return timezone;
        }
        log_pipe!();
        log_warning!("Could not determine the system timezone; falling back to UTC");
        Tz::UTC
    }
}

/// Detect the system timezone by name.
///
/// A `TZ` environment variable wins; otherwise the platform zone name comes
/// from `iana-time-zone` (the `/etc/localtime` link or `/etc/timezone` on
/// Linux).
pub fn detect_system_timezone() -> Option<Tz> {
    if let Ok(tz) = std::env::var("TZ")
        && let Some(parsed) = parse_timezone_name(&tz)
    {
        return Some(parsed);
    }

    iana_time_zone::get_timezone()
        .ok()
        .and_then(|name| parse_timezone_name(&name))
}

/// Find a zone that agrees with `chrono::Local` over the year around `now`.
///
/// For systems whose `/etc/localtime` is a copied TZif file with no name
/// attached. chrono reads the file contents, so the local calendar day still
/// comes out right.
pub fn zone_matching_local(now: DateTime<Utc>) -> Option<Tz> {
    zone_matching_offsets(now, |instant| {
        Local.offset_from_utc_datetime(&instant.naive_utc()).fix()
    })
}

fn zone_matching_offsets<F>(now: DateTime<Utc>, offset_at: F) -> Option<Tz>
where
    F: Fn(DateTime<Utc>) -> FixedOffset,
{
    // Quarterly samples pick up both sides of a DST rule
    let samples: Vec<(DateTime<Utc>, FixedOffset)> = [0, 91, 182, 273]
        .into_iter()
        .map(|days| now + Duration::days(days))
        .map(|instant| (instant, offset_at(instant)))
        .collect();

    chrono_tz::TZ_VARIANTS
        .iter()
        .copied()
        .filter(|tz| {
            samples.iter().all(|(instant, expected)| {
                tz.offset_from_utc_datetime(&instant.naive_utc()).fix() == *expected
            })
        })
        // Prefer Area/City names over legacy aliases such as CET or EST5EDT
        .min_by_key(|tz| !tz.name().contains('/') || tz.name().starts_with("Etc/"))
}

/// Parse an IANA name, accepting the `:Area/City` form allowed in `TZ`.
pub fn parse_timezone_name(name: &str) -> Option<Tz> {
    let name = name.trim().trim_start_matches(':');
    if name.is_empty() {
        return None;
    }
    name.parse::<Tz>().ok()
}

/// Clock pinned to a settable instant and timezone.
///
/// Used by tests to step time across sunrise and sunset, and by
/// `twilightr status --at` to evaluate an arbitrary moment.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
    timezone: Mutex<Tz>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, timezone: Tz) -> Self {
        Self {
            now: Mutex::new(now),
            timezone: Mutex::new(timezone),
        }
    }

    /// Create a clock from a local wall time in `timezone`.
    pub fn at_local(local: &str, timezone: Tz) -> Result<Self, String> {
        let now = parse_datetime_in_tz(local, timezone)?;
        Ok(Self::new(now.with_timezone(&Utc), timezone))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += by;
    }

    pub fn set_timezone(&self, timezone: Tz) {
        *self.timezone.lock().unwrap_or_else(PoisonError::into_inner) = timezone;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timezone(&self) -> Tz {
        *self.timezone.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parse a datetime string in the format "YYYY-MM-DD HH:MM:SS" in a specific timezone
pub fn parse_datetime_in_tz(s: &str, tz: Tz) -> Result<DateTime<Tz>, String> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map_err(|e| format!("Invalid datetime format: {e}. Use YYYY-MM-DD HH:MM:SS"))
        .and_then(|naive| {
            tz.from_local_datetime(&naive)
                .single()
                .ok_or_else(|| format!("Ambiguous or invalid time in timezone {tz}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_timezone_name() {
        assert_eq!(
            parse_timezone_name("America/Los_Angeles"),
            Some(chrono_tz::America::Los_Angeles)
        );
        assert_eq!(
            parse_timezone_name(":Europe/Berlin"),
            Some(chrono_tz::Europe::Berlin)
        );
        assert_eq!(parse_timezone_name(""), None);
        assert_eq!(parse_timezone_name("Not/AZone"), None);
    }

    #[test]
    fn test_zone_matching_offsets_follows_dst() {
        let berlin = chrono_tz::Europe::Berlin;
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let matched = zone_matching_offsets(now, |instant| {
            berlin.offset_from_utc_datetime(&instant.naive_utc()).fix()
        })
        .unwrap();

        assert!(matched.name().contains('/'));
        // 23:30 UTC on midsummer eve is already the next day in Berlin
        let late = Utc.with_ymd_and_hms(2024, 6, 20, 23, 30, 0).unwrap();
        assert_eq!(
            late.with_timezone(&matched).date_naive(),
            late.with_timezone(&berlin).date_naive()
        );
        let winter = Utc.with_ymd_and_hms(2024, 12, 20, 23, 30, 0).unwrap();
        assert_eq!(
            winter.with_timezone(&matched).date_naive(),
            winter.with_timezone(&berlin).date_naive()
        );
    }

    #[test]
    fn test_zone_matching_offsets_rejects_unknown_offset() {
        let odd = FixedOffset::east_opt(7 * 3600 + 17 * 60).unwrap();
        assert_eq!(zone_matching_offsets(Utc::now(), |_| odd), None);
    }

    #[test]
    fn test_zone_matching_local_agrees_with_chrono_local() {
        let now = Utc::now();
        let matched = zone_matching_local(now).unwrap();
        assert_eq!(
            now.with_timezone(&matched).naive_local(),
            now.with_timezone(&Local).naive_local()
        );
    }

    #[test]
    fn test_system_clock_override_wins() {
        let clock = SystemClock::new(Some(chrono_tz::Australia::Sydney));
        assert_eq!(clock.timezone(), chrono_tz::Australia::Sydney);

        assert!(!clock.set_timezone_override(Some(chrono_tz::Australia::Sydney)));
        assert!(clock.set_timezone_override(Some(chrono_tz::Asia::Tokyo)));
        assert_eq!(clock.timezone(), chrono_tz::Asia::Tokyo);
    }

    #[test]
    fn test_fixed_clock_at_local() {
        let clock =
            FixedClock::at_local("2023-06-21 12:00:00", chrono_tz::America::Los_Angeles).unwrap();
        // PDT is UTC-7 in June
        assert_eq!(clock.now().hour(), 19);
        assert_eq!(clock.timezone(), chrono_tz::America::Los_Angeles);
    }

    #[test]
    fn test_fixed_clock_advance_and_set() {
        let clock = FixedClock::new(Utc::now(), Tz::UTC);
        let start = clock.now();
        clock.advance(Duration::hours(3));
        assert_eq!(clock.now() - start, Duration::hours(3));

        clock.set(start);
        assert_eq!(clock.now(), start);

        clock.set_timezone(chrono_tz::Europe::Paris);
        assert_eq!(clock.timezone(), chrono_tz::Europe::Paris);
    }

    #[test]
    fn test_parse_datetime_in_tz_rejects_bad_input() {
        assert!(parse_datetime_in_tz("2023-06-21T12:00:00", Tz::UTC).is_err());
        // Skipped hour during the spring-forward transition
        assert!(
            parse_datetime_in_tz("2023-03-12 02:30:00", chrono_tz::America::Los_Angeles).is_err()
        );
    }
}
