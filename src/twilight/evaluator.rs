//! Evaluation of the twilight state for a location and an instant.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

use super::calculator::{SolarError, TwilightCalculator};
use super::state::TwilightState;
use crate::location::Location;

/// Why an evaluation produced no state.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// The calculator could not produce one of the four boundaries.
    Solar(SolarError),
    /// The boundaries came back out of order.
    Unordered { day: NaiveDate },
}

impl std::fmt::Display for EvaluationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvaluationError::Solar(err) => write!(f, "{err}"),
            EvaluationError::Unordered { day } => {
                write!(f, "twilight boundaries around {day} are not in order")
            }
        }
    }
}

impl std::error::Error for EvaluationError {}

impl From<SolarError> for EvaluationError {
    fn from(err: SolarError) -> Self {
        EvaluationError::Solar(err)
    }
}

/// Combines a location and an instant into a [`TwilightState`].
///
/// "Today" is the calendar day containing `now` in the given timezone.
/// Yesterday and tomorrow are always derived from that day afresh; nothing
/// is carried over from earlier evaluations.
#[derive(Clone)]
pub struct StateEvaluator {
    calculator: Arc<dyn TwilightCalculator>,
}

impl StateEvaluator {
    pub fn new(calculator: Arc<dyn TwilightCalculator>) -> Self {
        Self { calculator }
    }

    /// Evaluate, folding every failure into an absent state.
    pub fn evaluate(
        &self,
        location: Option<&Location>,
        now: DateTime<Utc>,
        timezone: Tz,
    ) -> Option<TwilightState> {
        let location = location?;
        self.try_evaluate(location, now, timezone).ok()
    }

    /// Evaluate, reporting why no state could be produced.
    pub fn try_evaluate(
        &self,
        location: &Location,
        now: DateTime<Utc>,
        timezone: Tz,
    ) -> Result<TwilightState, EvaluationError> {
        let today = now.with_timezone(&timezone).date_naive();
        let yesterday = today - Duration::days(1);
        let tomorrow = today + Duration::days(1);

        let previous_sunset = self.calculator.sunset_for(location, yesterday, timezone)?;
        let sunrise = self.calculator.sunrise_for(location, today, timezone)?;
        let sunset = self.calculator.sunset_for(location, today, timezone)?;
        let next_sunrise = self.calculator.sunrise_for(location, tomorrow, timezone)?;

        TwilightState::new(previous_sunset, sunrise, sunset, next_sunrise)
            .ok_or(EvaluationError::Unordered { day: today })
    }
}
