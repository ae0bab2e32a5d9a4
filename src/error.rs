use chrono::{DateTime, Utc};
use thiserror::Error;

/// Input rejected by the model; the model state is left untouched.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ModelError {
    #[error("non-finite {field}: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("non-positive {field}: {value}")]
    NonPositive { field: &'static str, value: f64 },

    #[error("hourly bar {index}: high {high} is below low {low}")]
    InvertedRange { index: usize, high: f64, low: f64 },

    #[error("hourly bar {index} opens at {open_time}, not after the previous bar at {previous}")]
    OutOfOrder {
        index: usize,
        previous: DateTime<Utc>,
        open_time: DateTime<Utc>,
    },
}

/// Failures talking to the market-data provider.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },

    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("no streams subscribed")]
    NoStreams,
}

impl FeedError {
    pub fn malformed(what: &'static str, reason: impl ToString) -> Self {
        FeedError::Malformed {
            what,
            reason: reason.to_string(),
        }
    }
}

/// Failure to (re)prime a tracker; the previous model stays in place.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("rejected market data: {0}")]
    Model(#[from] ModelError),
}
