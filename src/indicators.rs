//! Technical indicators over price series
//!
//! Pure functions returning a series aligned to the input (index `i` of the
//! output belongs to bar `i`). Rolling indicators yield `None` until enough
//! history has accumulated. When the input is shorter than the longest window
//! an indicator needs, the result is empty (or `None` for the composite
//! indicators); callers treat that as "indicator unavailable", never as a
//! hard error.

// ============================================================
// MOVING AVERAGES
// ============================================================

/// Exponential moving average seeded with the first value.
///
/// Smoothing factor is `2 / (period + 1)`. Returns an empty vector when
/// `period == 0` or the series is shorter than `period`.
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for &v in &values[1..] {
        prev = alpha * v + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// Simple moving average over a trailing window of `period` values.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }
    let mut out = vec![None; values.len()];
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

/// Mean of a non-empty slice.
#[inline]
pub fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

// ============================================================
// RSI
// ============================================================

/// Relative strength index.
///
/// Average gain and average loss are plain means of the last `period` price
/// deltas. A window with zero average loss has an unbounded RS and is
/// reported as 100 rather than NaN, including the flat case where gain is
/// zero as well.
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }
    let mut out = vec![None; closes.len()];
    for i in period..closes.len() {
        let (mut gain, mut loss) = (0.0, 0.0);
        for j in (i + 1 - period)..=i {
            let delta = closes[j] - closes[j - 1];
            if delta > 0.0 {
                gain += delta;
            } else {
                loss -= delta;
            }
        }
        let avg_gain = gain / period as f64;
        let avg_loss = loss / period as f64;
        out[i] = Some(if avg_loss <= 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        });
    }
    out
}

// ============================================================
// MACD
// ============================================================

/// MACD line, signal line and histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// MACD with the given fast/slow/signal spans (12/26/9 classically).
pub fn macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    let longest = fast.max(slow).max(signal);
    if fast == 0 || slow == 0 || signal == 0 || closes.len() < longest {
        return None;
    }
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    let line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal_line = ema(&line, signal);
    let histogram = line.iter().zip(&signal_line).map(|(m, s)| m - s).collect();
    Some(Macd {
        macd: line,
        signal: signal_line,
        histogram,
    })
}

// ============================================================
// BOLLINGER BANDS
// ============================================================

/// Bollinger bands: SMA middle line with `k` sample standard deviations.
#[derive(Debug, Clone, PartialEq)]
pub struct Bollinger {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

pub fn bollinger(closes: &[f64], period: usize, k: f64) -> Option<Bollinger> {
    // Sample deviation needs at least two points.
    if period < 2 || closes.len() < period {
        return None;
    }
    let middle = sma(closes, period);
    let mut upper = vec![None; closes.len()];
    let mut lower = vec![None; closes.len()];
    for i in (period - 1)..closes.len() {
        let Some(mid) = middle[i] else { continue };
        let window = &closes[i + 1 - period..=i];
        let var = window.iter().map(|v| (v - mid).powi(2)).sum::<f64>() / (period - 1) as f64;
        let sd = var.sqrt();
        upper[i] = Some(mid + k * sd);
        lower[i] = Some(mid - k * sd);
    }
    Some(Bollinger { upper, middle, lower })
}

// ============================================================
// ICHIMOKU
// ============================================================

/// `(highest high + lowest low) / 2` over a trailing window.
pub fn rolling_midpoint(highs: &[f64], lows: &[f64], period: usize) -> Vec<Option<f64>> {
    let len = highs.len().min(lows.len());
    if period == 0 || len < period {
        return Vec::new();
    }
    let mut out = vec![None; len];
    for i in (period - 1)..len {
        let start = i + 1 - period;
        let hh = highs[start..=i].iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let ll = lows[start..=i].iter().copied().fold(f64::INFINITY, f64::min);
        out[i] = Some((hh + ll) / 2.0);
    }
    out
}

/// Ichimoku periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IchimokuPeriods {
    pub tenkan: usize,
    pub kijun: usize,
    pub senkou_b: usize,
    /// Forward shift of the cloud and backward shift of the lagging line.
    pub displacement: usize,
}

impl Default for IchimokuPeriods {
    fn default() -> Self {
        Self {
            tenkan: 9,
            kijun: 26,
            senkou_b: 52,
            displacement: 26,
        }
    }
}

impl IchimokuPeriods {
    /// Bars needed before the cloud under the latest bar is defined.
    pub fn min_bars(&self) -> usize {
        self.senkou_b.max(self.kijun).max(self.tenkan) + self.displacement
    }
}

/// Ichimoku components, every line aligned to the bar it is read at.
///
/// `senkou_a[i]` / `senkou_b[i]` are the values projected onto bar `i` from
/// bar `i - displacement`. `chikou[i]` is the close of bar `i + displacement`,
/// so it is `None` for the most recent `displacement` bars.
#[derive(Debug, Clone, PartialEq)]
pub struct Ichimoku {
    pub tenkan: Vec<Option<f64>>,
    pub kijun: Vec<Option<f64>>,
    pub senkou_a: Vec<Option<f64>>,
    pub senkou_b: Vec<Option<f64>>,
    pub chikou: Vec<Option<f64>>,
}

pub fn ichimoku(
    highs: &[f64],
    lows: &[f64],
    closes: &[f64],
    periods: IchimokuPeriods,
) -> Option<Ichimoku> {
    let len = highs.len().min(lows.len()).min(closes.len());
    if periods.tenkan == 0 || periods.kijun == 0 || len < periods.min_bars() {
        return None;
    }
    let tenkan = rolling_midpoint(&highs[..len], &lows[..len], periods.tenkan);
    let kijun = rolling_midpoint(&highs[..len], &lows[..len], periods.kijun);
    let span_b_raw = rolling_midpoint(&highs[..len], &lows[..len], periods.senkou_b);

    let shift = periods.displacement;
    let mut senkou_a = vec![None; len];
    let mut senkou_b = vec![None; len];
    let mut chikou = vec![None; len];
    for i in 0..len {
        if i >= shift {
            let src = i - shift;
            senkou_a[i] = match (tenkan[src], kijun[src]) {
                (Some(t), Some(k)) => Some((t + k) / 2.0),
                _ => None,
            };
            senkou_b[i] = span_b_raw[src];
        }
        if i + shift < len {
            chikou[i] = Some(closes[i + shift]);
        }
    }

    Some(Ichimoku {
        tenkan,
        kijun,
        senkou_a,
        senkou_b,
        chikou,
    })
}

// ============================================================
// REGRESSION
// ============================================================

/// Least-squares slope of `values` against their ordinal position.
pub fn linear_slope(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;
    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    (den > 0.0).then(|| num / den)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_seed_and_smoothing() {
        let values = [10.0, 11.0, 12.0];
        let out = ema(&values, 3);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], 10.0);
        // alpha = 0.5
        assert!((out[1] - 10.5).abs() < 1e-12);
        assert!((out[2] - 11.25).abs() < 1e-12);
    }

    #[test]
    fn test_ema_insufficient_history() {
        assert!(ema(&[1.0, 2.0], 5).is_empty());
        assert!(ema(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn test_sma() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(out, vec![None, Some(1.5), Some(2.5), Some(3.5)]);
    }

    #[test]
    fn test_rsi_flat_series_is_100() {
        let closes = vec![50.0; 30];
        let out = rsi(&closes, 14);
        assert!(out[..14].iter().all(Option::is_none));
        assert!(out[14..].iter().all(|v| *v == Some(100.0)));
    }

    #[test]
    fn test_rsi_falling_series_is_zero() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        let out = rsi(&closes, 14);
        assert_eq!(out[19], Some(0.0));
    }

    #[test]
    fn test_rsi_balanced_moves() {
        // Alternating +1/-1 deltas: equal average gain and loss.
        let closes: Vec<f64> = (0..16).map(|i| if i % 2 == 0 { 10.0 } else { 11.0 }).collect();
        let out = rsi(&closes, 14);
        assert!((out[15].unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_rsi_too_short() {
        assert!(rsi(&[1.0; 14], 14).is_empty());
    }

    #[test]
    fn test_macd_constant_series() {
        let closes = vec![42.0; 40];
        let m = macd(&closes, 12, 26, 9).unwrap();
        assert!(m.macd.iter().all(|v| v.abs() < 1e-12));
        assert!(m.histogram.iter().all(|v| v.abs() < 1e-12));
        assert!(macd(&closes[..20], 12, 26, 9).is_none());
    }

    #[test]
    fn test_bollinger_constant_series_collapses() {
        let closes = vec![5.0; 25];
        let b = bollinger(&closes, 20, 2.0).unwrap();
        assert_eq!(b.middle[19], Some(5.0));
        assert_eq!(b.upper[24], Some(5.0));
        assert_eq!(b.lower[24], Some(5.0));
        assert_eq!(b.upper[18], None);
    }

    #[test]
    fn test_rolling_midpoint() {
        let highs = [3.0, 5.0, 4.0];
        let lows = [1.0, 2.0, 0.0];
        let out = rolling_midpoint(&highs, &lows, 2);
        assert_eq!(out, vec![None, Some(3.0), Some(2.5)]);
    }

    #[test]
    fn test_ichimoku_alignment() {
        let n = 90;
        let highs: Vec<f64> = (0..n).map(|i| 101.0 + i as f64).collect();
        let lows: Vec<f64> = (0..n).map(|i| 99.0 + i as f64).collect();
        let closes: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
        let ich = ichimoku(&highs, &lows, &closes, IchimokuPeriods::default()).unwrap();

        // Tenkan over a linear ramp: midpoint of bars i-8..=i.
        assert_eq!(ich.tenkan[8], Some((109.0 + 99.0) / 2.0));
        assert_eq!(ich.senkou_b[76], None);
        assert!(ich.senkou_b[77].is_some());
        assert_eq!(ich.chikou[0], Some(closes[26]));
        assert_eq!(ich.chikou[n - 26], None);
    }

    #[test]
    fn test_ichimoku_requires_history() {
        let v = vec![1.0; 77];
        assert!(ichimoku(&v, &v, &v, IchimokuPeriods::default()).is_none());
    }

    #[test]
    fn test_linear_slope() {
        assert_eq!(linear_slope(&[1.0, 3.0, 5.0]), Some(2.0));
        assert_eq!(linear_slope(&[1.0]), None);
        assert_eq!(linear_slope(&[4.0, 4.0, 4.0]), Some(0.0));
    }
}
