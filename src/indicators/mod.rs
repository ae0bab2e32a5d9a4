pub mod atr;
pub mod regression;
pub mod rsi;

pub use atr::*;
pub use regression::*;
pub use rsi::*;

/// Floor applied to denominators that may collapse to zero.
pub const DENOMINATOR_FLOOR: f64 = 1e-9;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn clamp(lo: f64, hi: f64, x: f64) -> f64 {
    x.max(lo).min(hi)
}

/// The most recent `n` values (all of them when fewer are available).
pub fn last_n(values: &[f64], n: usize) -> &[f64] {
    let len = values.len();
    if n >= len {
        values
    } else {
        &values[len - n..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[1.0, 2.0, 6.0]), Some(3.0));
    }

    #[test]
    fn test_clamp_keeps_band() {
        assert_eq!(clamp(0.35, 0.65, 0.9), 0.65);
        assert_eq!(clamp(0.35, 0.65, 0.1), 0.35);
        assert_eq!(clamp(0.35, 0.65, 0.5), 0.5);
    }

    #[test]
    fn test_last_n() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(last_n(&v, 2), &[3.0, 4.0]);
        assert_eq!(last_n(&v, 10), &v[..]);
    }
}
