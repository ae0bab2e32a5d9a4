use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::indicators::clamp;
use crate::types::Symbol;

/// Environment variables with this prefix override file settings,
/// e.g. `ORACLE__TRACKER__SYMBOL=ETHUSDT`.
pub const ENV_PREFIX: &str = "ORACLE";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub model: ModelSettings,
    pub feed: FeedSettings,
    pub tracker: TrackerSettings,
}

impl Settings {
    /// Defaults, then the TOML file at `path` if it exists, then `ORACLE__*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&Settings::default())
            .context("failed to serialize default settings")?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .context("failed to read settings")?
            .try_deserialize()
            .context("failed to parse settings")?;

        settings
            .validate()
            .map_err(|errors| anyhow!("invalid settings: {}", errors.join(", ")))?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        // Model validation
        let model = &self.model;
        if model.minute_capacity < model.min_minutes {
            errors.push("model.minute_capacity must be >= model.min_minutes".to_string());
        }
        if model.min_minutes < 1 {
            errors.push("model.min_minutes must be >= 1".to_string());
        }
        if model.hourly_window < 2 {
            errors.push("model.hourly_window must be >= 2".to_string());
        }
        if let Err(e) = model.prior_band.check("model.prior_band") {
            errors.push(e);
        }
        if let Err(e) = model.transition_band.check("model.transition_band") {
            errors.push(e);
        }
        if model.slope_lookback < 2 {
            errors.push("model.slope_lookback must be >= 2".to_string());
        }
        if model.rsi_period == 0 {
            errors.push("model.rsi_period must be > 0".to_string());
        }
        if !(model.fallback_scale_fraction > 0.0) {
            errors.push("model.fallback_scale_fraction must be > 0".to_string());
        }

        // Feed validation
        let feed = &self.feed;
        if !feed.rest_base.starts_with("http") {
            errors.push("feed.rest_base must be an http(s) URL".to_string());
        }
        if !feed.stream_base.starts_with("ws") {
            errors.push("feed.stream_base must be a ws(s) URL".to_string());
        }
        if feed.hourly_limit < 2 || feed.hourly_limit > 1000 {
            errors.push("feed.hourly_limit must be between 2 and 1000".to_string());
        }
        if feed.minute_backfill == 0 || feed.minute_backfill > 1000 {
            errors.push("feed.minute_backfill must be between 1 and 1000".to_string());
        }
        if feed.request_timeout_secs == 0 {
            errors.push("feed.request_timeout_secs must be > 0".to_string());
        }
        if feed.channel_capacity == 0 {
            errors.push("feed.channel_capacity must be > 0".to_string());
        }

        // Tracker validation
        let threshold = self.tracker.confidence_threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            errors.push("tracker.confidence_threshold must be in (0, 1)".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Closed interval a probability is clamped into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub lo: f64,
    pub hi: f64,
}

impl Band {
    pub const fn new(lo: f64, hi: f64) -> Self {
        Self { lo, hi }
    }

    pub fn clamp(&self, x: f64) -> f64 {
        clamp(self.lo, self.hi, x)
    }

    pub fn contains(&self, x: f64) -> bool {
        x >= self.lo && x <= self.hi
    }

    fn check(&self, name: &str) -> Result<(), String> {
        if self.lo > 0.0 && self.lo <= self.hi && self.hi < 1.0 {
            Ok(())
        } else {
            Err(format!("{} must satisfy 0 < lo <= hi < 1", name))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Minute closes kept in the sliding window.
    pub minute_capacity: usize,
    /// Minute closes required before a call is attempted.
    pub min_minutes: usize,
    /// Hourly bars retained and used for statistics (~30 days).
    pub hourly_window: usize,
    pub slope_lookback: usize,
    pub rsi_period: usize,
    /// Fraction of the hour open used as volatility scale when no range is known.
    pub fallback_scale_fraction: f64,
    pub prior_band: Band,
    pub transition_band: Band,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            minute_capacity: 600,
            min_minutes: 3,
            hourly_window: 720,
            prior_band: Band::new(0.35, 0.65),
            transition_band: Band::new(0.40, 0.60),
            slope_lookback: 20,
            rsi_period: 14,
            fallback_scale_fraction: 0.003,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSettings {
    pub rest_base: String,
    pub stream_base: String,
    pub hourly_limit: u32,
    pub minute_backfill: u32,
    pub request_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    pub channel_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            rest_base: "https://api.binance.com".to_string(),
            stream_base: "wss://stream.binance.com:9443".to_string(),
            hourly_limit: 720,
            minute_backfill: 200,
            request_timeout_secs: 10,
            reconnect_delay_secs: 5,
            channel_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSettings {
    pub symbol: Symbol,
    pub confidence_threshold: f64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            symbol: Symbol::default(),
            confidence_threshold: 0.62,
        }
    }
}
