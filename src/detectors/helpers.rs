//! Common helper functions for chart pattern detection
//!
//! Column extraction from generic bars plus the small numeric building blocks
//! shared across detector modules.

use crate::{Details, OHLCV};

// ============================================================
// COLUMN EXTRACTION
// ============================================================

/// Column-major copy of a bar slice.
#[derive(Debug, Clone, Default)]
pub struct Series {
    pub opens: Vec<f64>,
    pub highs: Vec<f64>,
    pub lows: Vec<f64>,
    pub closes: Vec<f64>,
    pub volumes: Vec<f64>,
}

impl Series {
    pub fn from_bars<T: OHLCV>(bars: &[T]) -> Self {
        let mut s = Series {
            opens: Vec::with_capacity(bars.len()),
            highs: Vec::with_capacity(bars.len()),
            lows: Vec::with_capacity(bars.len()),
            closes: Vec::with_capacity(bars.len()),
            volumes: Vec::with_capacity(bars.len()),
        };
        for bar in bars {
            s.opens.push(bar.open());
            s.highs.push(bar.high());
            s.lows.push(bar.low());
            s.closes.push(bar.close());
            s.volumes.push(bar.volume());
        }
        s
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.closes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    /// Close of the most recent bar.
    #[inline]
    pub fn last_close(&self) -> Option<f64> {
        self.closes.last().copied()
    }
}

/// The most recent `n` bars, or all of them when fewer exist.
#[inline]
pub fn tail<T>(bars: &[T], n: usize) -> &[T] {
    &bars[bars.len().saturating_sub(n)..]
}

// ============================================================
// NUMERIC HELPERS
// ============================================================

/// Percentage change from `from` to `to`.
#[inline]
pub fn pct_change(from: f64, to: f64) -> Option<f64> {
    (from != 0.0).then(|| (to - from) / from)
}

/// Boolean evidence flag encoded as a detail value.
#[inline]
pub fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Current volume relative to the mean of the `lookback` volumes before it.
///
/// Zero when there is no positive average to compare against.
pub fn volume_ratio(volumes: &[f64], lookback: usize) -> f64 {
    let Some((&current, prior)) = volumes.split_last() else {
        return 0.0;
    };
    let window = tail(prior, lookback);
    if window.is_empty() {
        return 0.0;
    }
    let avg = window.iter().sum::<f64>() / window.len() as f64;
    if avg > 0.0 {
        current / avg
    } else {
        0.0
    }
}

/// Details map from literal key/value pairs.
#[inline]
pub fn details<const N: usize>(pairs: [(&'static str, f64); N]) -> Details {
    Details::from(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail() {
        let v = [1, 2, 3, 4, 5];
        assert_eq!(tail(&v, 2), &[4, 5]);
        assert_eq!(tail(&v, 10), &v);
    }

    #[test]
    fn test_volume_ratio() {
        let mut vols = vec![100.0; 20];
        vols.push(150.0);
        assert!((volume_ratio(&vols, 20) - 1.5).abs() < 1e-12);
        assert_eq!(volume_ratio(&[0.0, 0.0, 5.0], 20), 0.0);
        assert_eq!(volume_ratio(&[5.0], 20), 0.0);
    }
}
