//! Local extrema (swing point) detection
//!
//! An index `i` is a local maximum of order `k` when `series[i]` is greater
//! than or equal to every value within `k` positions on either side. Ties are
//! allowed, so a plateau yields several adjacent indices. Near the window edges
//! the neighbourhood is clipped to the series, which means the last bar of a
//! strictly rising series counts as a maximum and the first as a minimum.

/// Indices of local maxima (plateau-inclusive).
pub fn find_local_maxima(series: &[f64], order: usize) -> Vec<usize> {
    find_extrema(series, order, |center, other| center >= other)
}

/// Indices of local minima (plateau-inclusive).
pub fn find_local_minima(series: &[f64], order: usize) -> Vec<usize> {
    find_extrema(series, order, |center, other| center <= other)
}

fn find_extrema(series: &[f64], order: usize, keeps: impl Fn(f64, f64) -> bool) -> Vec<usize> {
    let len = series.len();
    if len < 2 * order + 1 {
        return Vec::new();
    }
    (0..len)
        .filter(|&i| {
            let lo = i.saturating_sub(order);
            let hi = (i + order).min(len - 1);
            series[lo..=hi].iter().all(|&other| keeps(series[i], other))
        })
        .collect()
}

/// Closest swing high strictly above `price`.
///
/// Falls back to the highest value of the series when no swing high sits
/// above the price. Returns `None` only for an empty series.
pub fn nearest_swing_high(highs: &[f64], price: f64, order: usize) -> Option<f64> {
    let above = find_local_maxima(highs, order)
        .into_iter()
        .map(|i| highs[i])
        .filter(|&h| h > price)
        .reduce(f64::min);
    above.or_else(|| highs.iter().copied().reduce(f64::max))
}

/// Closest swing low strictly below `price`, falling back to the series low.
pub fn nearest_swing_low(lows: &[f64], price: f64, order: usize) -> Option<f64> {
    let below = find_local_minima(lows, order)
        .into_iter()
        .map(|i| lows[i])
        .filter(|&l| l < price)
        .reduce(f64::max);
    below.or_else(|| lows.iter().copied().reduce(f64::min))
}
