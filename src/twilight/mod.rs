//! Twilight boundaries: the value type, the calculator seam and the evaluator.
//!
//! ## Module Structure
//!
//! - [`state`]: the immutable [`TwilightState`] published to listeners
//! - [`calculator`]: sunrise/sunset computation for one calendar day
//! - [`evaluator`]: yesterday/today/tomorrow windowing around an instant

pub mod calculator;
pub mod evaluator;
pub mod state;

pub use calculator::{SolarBoundary, SolarCalculator, SolarError, TwilightCalculator};
pub use evaluator::{EvaluationError, StateEvaluator};
pub use state::TwilightState;
