use chrono::{DateTime, Utc};

use super::Direction;
use crate::error::ModelError;
use crate::types::Candle;

/// Hourly bar reduced to the floats the statistics need.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourBar {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl HourBar {
    pub fn from_candle(candle: &Candle) -> Self {
        Self {
            open_time: candle.open_time,
            open: candle.open_f64(),
            high: candle.high_f64(),
            low: candle.low_f64(),
            close: candle.close_f64(),
        }
    }

    pub fn is_up(&self) -> bool {
        self.close >= self.open
    }

    pub fn direction(&self) -> Direction {
        if self.is_up() {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    fn validate(&self, index: usize) -> Result<(), ModelError> {
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if !value.is_finite() {
                return Err(ModelError::NonFinite { field, value });
            }
            if value <= 0.0 {
                return Err(ModelError::NonPositive { field, value });
            }
        }
        if self.high < self.low {
            return Err(ModelError::InvertedRange {
                index,
                high: self.high,
                low: self.low,
            });
        }
        Ok(())
    }
}

/// Most recent hourly bars, oldest first, bounded to `window` entries.
#[derive(Debug, Clone, Default)]
pub struct HourlyHistory {
    bars: Vec<HourBar>,
}

impl HourlyHistory {
    /// Validates a whole batch before anything is kept: prices must be
    /// finite and positive, `high >= low`, and open times strictly ascending.
    pub fn from_candles(candles: &[Candle], window: usize) -> Result<Self, ModelError> {
        let start = candles.len().saturating_sub(window);
        let mut bars: Vec<HourBar> = Vec::with_capacity(candles.len() - start);

        for (index, candle) in candles.iter().enumerate().skip(start) {
            let bar = HourBar::from_candle(candle);
            bar.validate(index)?;
            if let Some(prev) = bars.last() {
                if bar.open_time <= prev.open_time {
                    return Err(ModelError::OutOfOrder {
                        index,
                        previous: prev.open_time,
                        open_time: bar.open_time,
                    });
                }
            }
            bars.push(bar);
        }

        Ok(Self { bars })
    }

    pub fn bars(&self) -> &[HourBar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&HourBar> {
        self.bars.last()
    }
}

/// Sliding FIFO window of minute closes.
///
/// Backed by a `Vec` that is compacted once the evicted prefix reaches
/// `capacity`, so pushes are amortized O(1) and reads are one contiguous
/// slice.
#[derive(Debug, Clone)]
pub struct MinuteHistory {
    buf: Vec<f64>,
    start: usize,
    capacity: usize,
}

impl MinuteHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: Vec::with_capacity(capacity * 2),
            start: 0,
            capacity,
        }
    }

    pub fn push(&mut self, close: f64) {
        if self.len() == self.capacity {
            self.start += 1;
        }
        self.buf.push(close);

        if self.start >= self.capacity {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.buf[self.start..]
    }

    pub fn latest(&self) -> Option<f64> {
        self.as_slice().last().copied()
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Interval, Symbol};
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn hour(index: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        let open_time = Utc.timestamp_millis_opt(0).unwrap() + Duration::hours(index);
        Candle {
            symbol: Symbol::default(),
            interval: Interval::H1,
            open_time,
            close_time: open_time + Duration::milliseconds(3_599_999),
            open,
            high,
            low,
            close,
            volume: dec!(1),
            is_final: true,
        }
    }

    #[test]
    fn test_minute_history_capacity_bound() {
        let mut history = MinuteHistory::new(600);
        for i in 0..1000 {
            history.push(i as f64);
        }

        assert_eq!(history.len(), 600);
        let expected: Vec<f64> = (400..1000).map(|i| i as f64).collect();
        assert_eq!(history.as_slice(), &expected[..]);
        assert_eq!(history.latest(), Some(999.0));
    }

    #[test]
    fn test_minute_history_survives_compaction() {
        let mut history = MinuteHistory::new(3);
        for i in 0..20 {
            history.push(i as f64);
            assert!(history.len() <= 3);
        }
        assert_eq!(history.as_slice(), &[17.0, 18.0, 19.0]);
    }

    #[test]
    fn test_minute_history_below_capacity() {
        let mut history = MinuteHistory::new(600);
        assert!(history.is_empty());
        history.push(1.5);
        history.push(2.5);
        assert_eq!(history.as_slice(), &[1.5, 2.5]);
    }

    #[test]
    fn test_hourly_history_keeps_window() {
        let candles: Vec<Candle> = (0..10)
            .map(|i| hour(i, dec!(100), dec!(101), dec!(99), dec!(100.5)))
            .collect();
        let history = HourlyHistory::from_candles(&candles, 4).unwrap();
        assert_eq!(history.len(), 4);
        assert_eq!(history.bars()[0].open_time, candles[6].open_time);
    }

    #[test]
    fn test_hourly_history_rejects_out_of_order() {
        let candles = vec![
            hour(1, dec!(100), dec!(101), dec!(99), dec!(100)),
            hour(0, dec!(100), dec!(101), dec!(99), dec!(100)),
        ];
        let err = HourlyHistory::from_candles(&candles, 720).unwrap_err();
        assert!(matches!(err, ModelError::OutOfOrder { index: 1, .. }));
    }

    #[test]
    fn test_hourly_history_rejects_duplicates() {
        let candles = vec![
            hour(3, dec!(100), dec!(101), dec!(99), dec!(100)),
            hour(3, dec!(100), dec!(101), dec!(99), dec!(100)),
        ];
        assert!(HourlyHistory::from_candles(&candles, 720).is_err());
    }

    #[test]
    fn test_hourly_history_rejects_bad_prices() {
        let zero = vec![hour(0, dec!(0), dec!(101), dec!(99), dec!(100))];
        assert!(matches!(
            HourlyHistory::from_candles(&zero, 720),
            Err(ModelError::NonPositive { field: "open", .. })
        ));

        let inverted = vec![hour(0, dec!(100), dec!(99), dec!(101), dec!(100))];
        assert!(matches!(
            HourlyHistory::from_candles(&inverted, 720),
            Err(ModelError::InvertedRange { index: 0, .. })
        ));
    }

    #[test]
    fn test_bar_direction() {
        let flat = HourBar::from_candle(&hour(0, dec!(100), dec!(101), dec!(99), dec!(100)));
        assert_eq!(flat.direction(), Direction::Up);
        let down = HourBar::from_candle(&hour(0, dec!(100), dec!(101), dec!(99), dec!(99.5)));
        assert_eq!(down.direction(), Direction::Down);
        assert!((down.range() - 2.0).abs() < 1e-12);
    }
}
