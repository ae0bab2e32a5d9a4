use tracing::debug;

use super::{fuse, Features, HourlyHistory, HourlyStats, MinuteHistory, Prediction};
use crate::config::ModelSettings;
use crate::error::ModelError;
use crate::types::Candle;

/// Per-symbol model state. Mutated only through `load_hourly`,
/// `set_hour_open` and `push_minute`; `predict` is a pure read.
#[derive(Debug, Clone)]
pub struct HourlyModel {
    settings: ModelSettings,
    hourly: HourlyHistory,
    stats: HourlyStats,
    minutes: MinuteHistory,
    hour_open: Option<f64>,
}

impl Default for HourlyModel {
    fn default() -> Self {
        Self::new(ModelSettings::default())
    }
}

impl HourlyModel {
    pub fn new(settings: ModelSettings) -> Self {
        let minutes = MinuteHistory::new(settings.minute_capacity);
        Self {
            settings,
            hourly: HourlyHistory::default(),
            stats: HourlyStats::default(),
            minutes,
            hour_open: None,
        }
    }

    /// Replaces the hourly history and re-derives the statistics.
    ///
    /// A batch with fewer than two bars replaces the history but keeps the
    /// previous statistics. A rejected batch leaves every field as it was.
    pub fn load_hourly(&mut self, candles: &[Candle]) -> Result<(), ModelError> {
        let history = HourlyHistory::from_candles(candles, self.settings.hourly_window)?;
        let Some(stats) = HourlyStats::derive(history.bars(), &self.settings) else {
            debug!(bars = history.len(), "Too few hourly bars, keeping previous statistics");
            self.hourly = history;
            return Ok(());
        };

        debug!(
            bars = history.len(),
            prior_up = stats.prior_up,
            p_up_given_up = stats.p_up_given_up,
            p_up_given_down = stats.p_up_given_down,
            atr = ?stats.atr,
            "Hourly statistics refreshed"
        );
        self.hourly = history;
        self.stats = stats;
        Ok(())
    }

    pub fn set_hour_open(&mut self, price: f64) -> Result<(), ModelError> {
        check_price("hour_open", price)?;
        self.hour_open = Some(price);
        Ok(())
    }

    pub fn push_minute(&mut self, close: f64) -> Result<(), ModelError> {
        check_price("minute close", close)?;
        self.minutes.push(close);
        Ok(())
    }

    /// Abstains with "insufficient data" until the hour open, a range
    /// estimate and enough minute closes are all present.
    pub fn predict(&self, threshold: f64) -> Prediction {
        let (Some(hour_open), Some(atr)) = (self.hour_open, self.stats.atr) else {
            return Prediction::insufficient_data();
        };
        match Features::extract(self.minutes.as_slice(), hour_open, atr, &self.settings) {
            Some(features) => fuse(self.stats.transition_prior(), &features, threshold),
            None => Prediction::insufficient_data(),
        }
    }

    pub fn stats(&self) -> &HourlyStats {
        &self.stats
    }

    pub fn prior_up(&self) -> f64 {
        self.stats.prior_up
    }

    pub fn p_up_given_up(&self) -> f64 {
        self.stats.p_up_given_up
    }

    pub fn p_up_given_down(&self) -> f64 {
        self.stats.p_up_given_down
    }

    pub fn atr(&self) -> Option<f64> {
        self.stats.atr
    }

    /// +1, -1, or 0 before any hourly history was loaded.
    pub fn last_closed_hour_dir(&self) -> i8 {
        self.stats.last_dir_sign()
    }

    pub fn hour_open(&self) -> Option<f64> {
        self.hour_open
    }

    pub fn minutes(&self) -> &[f64] {
        self.minutes.as_slice()
    }

    pub fn minute_len(&self) -> usize {
        self.minutes.len()
    }

    pub fn hourly_len(&self) -> usize {
        self.hourly.len()
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }
}

fn check_price(field: &'static str, value: f64) -> Result<(), ModelError> {
    if !value.is_finite() {
        return Err(ModelError::NonFinite { field, value });
    }
    if value <= 0.0 {
        return Err(ModelError::NonPositive { field, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Decision;
    use crate::types::{Interval, Symbol};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn hour(index: i64, open: Decimal, close: Decimal) -> Candle {
        let open_time = Utc.timestamp_millis_opt(0).unwrap() + Duration::hours(index);
        Candle {
            symbol: Symbol::default(),
            interval: Interval::H1,
            open_time,
            close_time: open_time + Duration::milliseconds(3_599_999),
            open,
            high: open.max(close) + dec!(0.25),
            low: open.min(close) - dec!(0.25),
            close,
            volume: dec!(5),
            is_final: true,
        }
    }

    fn up_hours(n: i64) -> Vec<Candle> {
        (0..n).map(|i| hour(i, dec!(100), dec!(100.5))).collect()
    }

    fn primed() -> HourlyModel {
        let mut model = HourlyModel::default();
        model.load_hourly(&up_hours(10)).unwrap();
        model.set_hour_open(100.0).unwrap();
        for _ in 0..3 {
            model.push_minute(100.3).unwrap();
        }
        model
    }

    #[test]
    fn test_new_model_abstains() {
        let model = HourlyModel::default();
        let prediction = model.predict(0.62);
        assert_eq!(prediction.decision, Decision::NoCall);
        assert_eq!(prediction.prob_up, 0.5);
        assert_eq!(prediction.confidence, 0.5);
        assert_eq!(prediction.signals, vec!["insufficient data"]);
        assert_eq!(model.last_closed_hour_dir(), 0);
        assert_eq!(model.atr(), None);
    }

    #[test]
    fn test_abstains_until_every_input_is_present() {
        let mut model = HourlyModel::default();
        model.load_hourly(&up_hours(10)).unwrap();
        assert_eq!(model.predict(0.62).decision, Decision::NoCall);

        model.set_hour_open(100.0).unwrap();
        model.push_minute(100.3).unwrap();
        model.push_minute(100.3).unwrap();
        assert_eq!(model.predict(0.62).signals, vec!["insufficient data"]);

        model.push_minute(100.3).unwrap();
        assert_eq!(model.predict(0.62).decision, Decision::Up);
    }

    #[test]
    fn test_strong_up_scenario() {
        let model = primed();
        assert_eq!(model.p_up_given_up(), 0.60);
        assert_eq!(model.atr(), Some(1.0));
        assert_eq!(model.last_closed_hour_dir(), 1);

        let prediction = model.predict(0.62);
        assert_eq!(prediction.decision, Decision::Up);
        assert!((prediction.prob_up - 0.7324).abs() < 1e-3);
        assert_eq!(prediction.signals[0], "prior=0.60");
        assert_eq!(prediction.rsi, Some(50.0));
        assert_eq!(prediction.slope_z, Some(0.0));
    }

    #[test]
    fn test_threshold_sweep_is_side_effect_free() {
        let model = primed();
        assert_eq!(model.predict(0.80).decision, Decision::NoCall);
        assert_eq!(model.predict(0.70).decision, Decision::Up);
        assert_eq!(model.predict(0.80).decision, Decision::NoCall);
        assert_eq!(model.minute_len(), 3);
    }

    #[test]
    fn test_reload_is_idempotent() {
        let mut pattern = up_hours(4);
        pattern.push(hour(4, dec!(100), dec!(99)));
        pattern.push(hour(5, dec!(99), dec!(99.5)));

        let mut model = HourlyModel::default();
        model.load_hourly(&pattern).unwrap();
        let first = *model.stats();
        model.load_hourly(&pattern).unwrap();
        assert_eq!(*model.stats(), first);
        assert_eq!(model.hourly_len(), 6);
    }

    #[test]
    fn test_short_reload_replaces_history_keeps_statistics() {
        let mut model = HourlyModel::default();
        model.load_hourly(&up_hours(10)).unwrap();
        let before = *model.stats();

        model.load_hourly(&up_hours(1)).unwrap();
        assert_eq!(*model.stats(), before);
        assert_eq!(model.hourly_len(), 1);

        model.load_hourly(&[]).unwrap();
        assert_eq!(*model.stats(), before);
        assert_eq!(model.hourly_len(), 0);
        assert_eq!(model.last_closed_hour_dir(), 1);
    }

    #[test]
    fn test_rejected_reload_leaves_state_untouched() {
        let mut model = HourlyModel::default();
        model.load_hourly(&up_hours(10)).unwrap();
        let before = *model.stats();

        let mut bad = up_hours(5);
        bad.swap(1, 3);
        assert!(matches!(
            model.load_hourly(&bad),
            Err(ModelError::OutOfOrder { .. })
        ));
        assert_eq!(*model.stats(), before);
        assert_eq!(model.hourly_len(), 10);
    }

    #[test]
    fn test_rejects_bad_prices() {
        let mut model = HourlyModel::default();
        assert!(model.set_hour_open(f64::NAN).is_err());
        assert!(model.set_hour_open(0.0).is_err());
        assert_eq!(model.hour_open(), None);

        assert!(model.push_minute(f64::INFINITY).is_err());
        assert!(model.push_minute(-1.0).is_err());
        assert_eq!(model.minute_len(), 0);
    }

    #[test]
    fn test_minute_window_is_bounded() {
        let mut model = HourlyModel::default();
        for i in 1..=1000 {
            model.push_minute(i as f64).unwrap();
        }
        assert_eq!(model.minute_len(), 600);
        assert_eq!(model.minutes()[0], 401.0);
        assert_eq!(model.minutes()[599], 1000.0);
    }

    #[test]
    fn test_down_hour_selects_down_transition() {
        let mut bars = up_hours(9);
        bars.push(hour(9, dec!(100), dec!(99)));

        let mut model = HourlyModel::default();
        model.load_hourly(&bars).unwrap();
        model.set_hour_open(100.0).unwrap();
        for _ in 0..3 {
            model.push_minute(100.0).unwrap();
        }

        assert_eq!(model.last_closed_hour_dir(), -1);
        let prediction = model.predict(0.62);
        assert_eq!(
            prediction.signals[0],
            format!("prior={:.2}", model.p_up_given_down())
        );
    }
}
