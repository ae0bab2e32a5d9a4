use super::DENOMINATOR_FLOOR;

pub const RSI_NEUTRAL: f64 = 50.0;

/// Simple (non-smoothed) RSI over the last `period` differences of `closes`.
///
/// Returns the neutral 50 when fewer than `period + 1` closes are available.
/// A window with gains but no losses reads 100, one with losses but no gains
/// reads 0, and a flat window reads 50.
pub fn window_rsi(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period + 1 {
        return RSI_NEUTRAL;
    }

    let window = &closes[closes.len() - period - 1..];
    let (gains, losses) = window.windows(2).fold((0.0, 0.0), |(gains, losses), pair| {
        let diff = pair[1] - pair[0];
        if diff >= 0.0 {
            (gains + diff, losses)
        } else {
            (gains, losses - diff)
        }
    });

    let rs = if losses > DENOMINATOR_FLOOR {
        gains / losses
    } else if gains > DENOMINATOR_FLOOR {
        return 100.0;
    } else {
        1.0
    };

    100.0 - (100.0 / (1.0 + rs))
}
