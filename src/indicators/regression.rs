use super::DENOMINATOR_FLOOR;

/// Ordinary least-squares slope of `y` against its index `0..n`, in units of
/// `y` per step.
pub fn linreg_slope(y: &[f64]) -> f64 {
    let n = y.len();
    if n == 0 {
        return 0.0;
    }

    let x_mean = (n as f64 - 1.0) / 2.0;
    let (num, den) = y
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, &value)| {
            let dx = i as f64 - x_mean;
            (num + dx * value, den + dx * dx)
        });

    num / den.max(DENOMINATOR_FLOOR)
}
