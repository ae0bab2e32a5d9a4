//! Online estimate of whether the current hourly candle closes up or down,
//! with abstention below a confidence threshold.

pub mod config;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod model;
pub mod types;

pub use config::Settings;
pub use engine::{DirectionTracker, ModelStatus, SharedModel, TrackerUpdate};
pub use error::{FeedError, ModelError, TrackerError};
pub use model::{Decision, HourlyModel, Prediction};
