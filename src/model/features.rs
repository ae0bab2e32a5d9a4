use serde::Serialize;

use crate::config::ModelSettings;
use crate::indicators::{last_n, linreg_slope, window_rsi, DENOMINATOR_FLOOR};

/// Smallest volatility scale the fallback may produce.
const SCALE_FLOOR: f64 = 1e-8;

const MINUTES_PER_HOUR: f64 = 60.0;

/// Intra-hour readings extracted from the minute window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Features {
    pub latest: f64,
    /// Latest close minus the hour open.
    pub delta: f64,
    /// Volatility scale the readings are normalised by.
    pub scale: f64,
    /// `delta / scale`.
    pub z: f64,
    /// OLS slope of the recent closes, price units per minute.
    pub slope: f64,
    /// `slope / (scale / 60)`.
    pub slope_z: f64,
    pub rsi: f64,
}

impl Features {
    /// `None` until `settings.min_minutes` closes are available.
    pub fn extract(
        minutes: &[f64],
        hour_open: f64,
        atr: f64,
        settings: &ModelSettings,
    ) -> Option<Self> {
        if minutes.len() < settings.min_minutes.max(1) {
            return None;
        }

        let latest = *minutes.last()?;
        let delta = latest - hour_open;
        let scale = volatility_scale(atr, hour_open, settings.fallback_scale_fraction);
        let z = delta / scale.max(DENOMINATOR_FLOOR);

        let slope = linreg_slope(last_n(minutes, settings.slope_lookback));
        let slope_z = slope / (scale / MINUTES_PER_HOUR).max(DENOMINATOR_FLOOR);

        let rsi = window_rsi(minutes, settings.rsi_period);

        Some(Self {
            latest,
            delta,
            scale,
            z,
            slope,
            slope_z,
            rsi,
        })
    }
}

/// The hourly range when it is usable, otherwise a fixed fraction of the
/// hour open.
pub fn volatility_scale(atr: f64, hour_open: f64, fallback_fraction: f64) -> f64 {
    if atr.is_finite() && atr > 0.0 {
        atr
    } else {
        (hour_open.abs() * fallback_fraction).max(SCALE_FLOOR)
    }
}
