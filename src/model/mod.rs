//! Online model for the direction of the current hourly candle.
//!
//! Hourly bars feed [`HourlyStats`] (base rate, Markov transitions, range
//! scale); minute closes feed [`Features`] (displacement from the hour open,
//! slope, RSI). [`fuse`] combines both in log-odds space into a [`Prediction`]
//! that abstains below the confidence threshold.

pub mod evidence;
pub mod features;
pub mod history;
pub mod predictor;
pub mod stats;

pub use evidence::{fuse, Decision, EvidenceSource, Prediction};
pub use features::Features;
pub use history::{HourBar, HourlyHistory, MinuteHistory};
pub use predictor::HourlyModel;
pub use stats::HourlyStats;

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.62;

/// Direction of a closed hourly bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn sign(&self) -> i8 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
