/// Mean high-minus-low range of the supplied `(high, low)` pairs.
///
/// A simple volatility proxy, not Wilder's true range: gaps between bars are
/// ignored.
pub fn mean_range<I>(bars: I) -> Option<f64>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (sum, count) = bars
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), (high, low)| (sum + (high - low), count + 1));

    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
