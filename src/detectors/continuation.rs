//! Continuation pattern detectors
//!
//! Bull/Bear Flag (impulse pole followed by a tight channel) and
//! Ascending/Descending Triangle (flat level against a sloping side).

use std::collections::HashMap;

use super::helpers::{details, pct_change, tail, Series};
use crate::{
    extrema::{find_local_maxima, find_local_minima},
    indicators::{linear_slope, mean},
    params::{get_period, get_ratio, ParamMeta, ParameterizedDetector},
    DetectionResult, Direction, PatternDetector, PatternError, PatternId, Period, Ratio, Result,
    Timeframe, OHLCV,
};

// ============================================================
// BULL / BEAR FLAG
// ============================================================

/// Pole of `pole_bars` closes followed by `consolidation_bars` of sideways
/// trading in a narrow channel.
#[derive(Debug, Clone)]
pub struct FlagDetector {
    /// Minimum absolute pole move.
    pub impulse_threshold: Ratio,
    /// Maximum consolidation range relative to its midpoint.
    pub channel_width_max: Ratio,
    /// How far the consolidation may drift against the pole.
    pub counter_slope_max: Ratio,
    pub pole_bars: Period,
    pub consolidation_bars: Period,
}

impl Default for FlagDetector {
    fn default() -> Self {
        Self {
            impulse_threshold: Ratio::new_const(0.03),
            channel_width_max: Ratio::new_const(0.015),
            counter_slope_max: Ratio::new_const(0.01),
            pole_bars: Period::new_const(5),
            consolidation_bars: Period::new_const(10),
        }
    }
}

impl PatternDetector for FlagDetector {
    fn id(&self) -> PatternId {
        PatternId::BullBearFlag
    }

    fn min_bars(&self) -> usize {
        self.pole_bars.get() + self.consolidation_bars.get() + 2
    }

    fn supported_timeframes(&self) -> &'static [Timeframe] {
        &[Timeframe::H1, Timeframe::H4, Timeframe::D1]
    }

    fn detect<T: OHLCV>(&self, bars: &[T]) -> DetectionResult {
        let not_found = DetectionResult::not_found(self.id());
        if bars.len() < self.min_bars() {
            return not_found;
        }
        let s = Series::from_bars(bars);
        let n = s.len();
        let consol_len = self.consolidation_bars.get();
        let pole_end = n - consol_len;
        let pole = &s.closes[pole_end - self.pole_bars.get()..pole_end];

        let (Some(&pole_start), Some(&pole_last)) = (pole.first(), pole.last()) else {
            return not_found;
        };
        let Some(pole_move) = pct_change(pole_start, pole_last) else {
            return not_found;
        };

        let consol_high = s.highs[pole_end..].iter().copied().fold(f64::MIN, f64::max);
        let consol_low = s.lows[pole_end..].iter().copied().fold(f64::MAX, f64::min);
        let mid = (consol_high + consol_low) / 2.0;
        let channel_width = if mid > 0.0 {
            (consol_high - consol_low) / mid
        } else {
            1.0
        };
        let Some(consol_slope) = pct_change(s.closes[pole_end], s.closes[n - 1]) else {
            return not_found;
        };

        let threshold = self.impulse_threshold.get();
        let width_max = self.channel_width_max.get();
        let counter = self.counter_slope_max.get();
        if channel_width >= width_max || pole_move.abs() <= threshold {
            return not_found;
        }

        let direction = if pole_move > 0.0 {
            // A flag that drifts up too fast is no longer consolidating.
            if consol_slope > counter {
                return not_found;
            }
            Direction::Bullish
        } else {
            if consol_slope < -counter {
                return not_found;
            }
            Direction::Bearish
        };

        let impulse = ((pole_move.abs() - threshold) / threshold).min(1.0);
        let tightness = 1.0 - channel_width / width_max;
        let confidence = 60.0 + impulse * 20.0 + tightness * 20.0;

        DetectionResult::found(
            self.id(),
            direction,
            confidence,
            details([
                ("pole_move_pct", pole_move * 100.0),
                ("channel_width_pct", channel_width * 100.0),
                ("pole_start", pole_start),
                ("pole_end", pole_last),
                ("pole_start_bar", (pole_end - self.pole_bars.get()) as f64),
                ("consolidation_start_bar", pole_end as f64),
                ("support", consol_low),
                ("resistance", consol_high),
                ("current_close", s.closes[n - 1]),
            ]),
        )
    }

    fn validate_config(&self) -> Result<()> {
        if self.impulse_threshold.get() <= 0.0 || self.channel_width_max.get() <= 0.0 {
            return Err(PatternError::InvalidConfig(
                "bull_bear_flag thresholds must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// TRIANGLES
// ============================================================

/// Flat resistance over rising lows (ascending) or flat support over
/// falling highs (descending), with price pressing on the flat side.
#[derive(Debug, Clone)]
pub struct TriangleDetector {
    pub lookback: Period,
    /// Maximum mean deviation of the flat-side touches from their median.
    pub flat_tolerance: Ratio,
    pub min_touches: Period,
    /// Maximum distance between the latest close and the flat level.
    pub proximity: Ratio,
    pub order: Period,
}

impl Default for TriangleDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(50),
            flat_tolerance: Ratio::new_const(0.015),
            min_touches: Period::new_const(3),
            proximity: Ratio::new_const(0.03),
            order: Period::new_const(4),
        }
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Flat level of the most recent `touches` prices and its mean deviation.
fn flat_level(prices: &[f64], touches: usize) -> Option<(f64, f64)> {
    let recent = tail(prices, touches);
    let level = median(recent)?;
    if level <= 0.0 {
        return None;
    }
    let deviations: Vec<f64> = recent.iter().map(|p| (p - level).abs() / level).collect();
    Some((level, mean(&deviations)?))
}

impl TriangleDetector {
    fn check_ascending(&self, s: &Series, peaks: &[usize], troughs: &[usize]) -> Option<DetectionResult> {
        let touches = self.min_touches.get();
        if peaks.len() < touches || troughs.len() < 2 {
            return None;
        }
        let peak_prices: Vec<f64> = peaks.iter().map(|&i| s.highs[i]).collect();
        let (resistance, deviation) = flat_level(&peak_prices, touches)?;
        let tol = self.flat_tolerance.get();
        if deviation > tol {
            return None;
        }

        let trough_prices: Vec<f64> = troughs.iter().map(|&i| s.lows[i]).collect();
        let slope = linear_slope(&trough_prices)?;
        if slope <= 0.0 {
            return None;
        }

        let close = s.last_close()?;
        if (close - resistance).abs() / resistance > self.proximity.get() {
            return None;
        }

        let flatness = 1.0 - deviation / tol;
        let slope_score = (slope / mean(&s.lows)? * 100.0).min(1.0);
        let confidence = 60.0 + flatness * 20.0 + slope_score * 20.0;

        Some(DetectionResult::found(
            PatternId::Triangles,
            Direction::Bullish,
            confidence,
            details([
                ("resistance", resistance),
                ("support", *trough_prices.last()?),
                ("rising_low_slope", slope),
                ("touches", peaks.len().min(touches) as f64),
                ("current_close", close),
            ]),
        ))
    }

    fn check_descending(&self, s: &Series, peaks: &[usize], troughs: &[usize]) -> Option<DetectionResult> {
        let touches = self.min_touches.get();
        if troughs.len() < touches || peaks.len() < 2 {
            return None;
        }
        let trough_prices: Vec<f64> = troughs.iter().map(|&i| s.lows[i]).collect();
        let (support, deviation) = flat_level(&trough_prices, touches)?;
        let tol = self.flat_tolerance.get();
        if deviation > tol {
            return None;
        }

        let peak_prices: Vec<f64> = peaks.iter().map(|&i| s.highs[i]).collect();
        let slope = linear_slope(&peak_prices)?;
        if slope >= 0.0 {
            return None;
        }

        let close = s.last_close()?;
        if (close - support).abs() / support > self.proximity.get() {
            return None;
        }

        let flatness = 1.0 - deviation / tol;
        let slope_score = (slope.abs() / mean(&s.highs)? * 100.0).min(1.0);
        let confidence = 60.0 + flatness * 20.0 + slope_score * 20.0;

        Some(DetectionResult::found(
            PatternId::Triangles,
            Direction::Bearish,
            confidence,
            details([
                ("support", support),
                ("resistance", *peak_prices.last()?),
                ("falling_high_slope", slope),
                ("touches", troughs.len().min(touches) as f64),
                ("current_close", close),
            ]),
        ))
    }
}

impl PatternDetector for TriangleDetector {
    fn id(&self) -> PatternId {
        PatternId::Triangles
    }

    fn min_bars(&self) -> usize {
        self.lookback.get()
    }

    fn supported_timeframes(&self) -> &'static [Timeframe] {
        &[Timeframe::H4, Timeframe::D1]
    }

    fn detect<T: OHLCV>(&self, bars: &[T]) -> DetectionResult {
        if bars.len() < self.min_bars() {
            return DetectionResult::not_found(self.id());
        }
        let s = Series::from_bars(tail(bars, self.lookback.get()));
        let order = self.order.get();
        let peaks = find_local_maxima(&s.highs, order);
        let troughs = find_local_minima(&s.lows, order);

        self.check_ascending(&s, &peaks, &troughs)
            .filter(|r| r.found)
            .or_else(|| self.check_descending(&s, &peaks, &troughs))
            .unwrap_or_else(|| DetectionResult::not_found(self.id()))
    }

    fn validate_config(&self) -> Result<()> {
        if self.flat_tolerance.get() <= 0.0 {
            return Err(PatternError::InvalidConfig(
                "triangles.flat_tolerance must be > 0".into(),
            ));
        }
        if self.lookback.get() < 2 * self.order.get() + 1 {
            return Err(PatternError::InvalidConfig(
                "triangles.lookback too short for swing order".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// PARAMETERS
// ============================================================

static FLAG_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio("impulse_threshold", 0.03, (0.01, 0.1, 0.005), "Minimum pole move"),
    ParamMeta::ratio(
        "channel_width_max",
        0.015,
        (0.005, 0.05, 0.005),
        "Maximum consolidation range relative to its midpoint",
    ),
    ParamMeta::ratio(
        "counter_slope_max",
        0.01,
        (0.0, 0.05, 0.005),
        "Maximum consolidation drift against the pole",
    ),
    ParamMeta::period("pole_bars", 5.0, (3.0, 10.0, 1.0), "Bars in the pole"),
    ParamMeta::period("consolidation_bars", 10.0, (5.0, 20.0, 1.0), "Bars in the channel"),
];

static TRIANGLE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("lookback", 50.0, (30.0, 100.0, 10.0), "Window inspected"),
    ParamMeta::ratio(
        "flat_tolerance",
        0.015,
        (0.005, 0.04, 0.005),
        "Maximum mean deviation of the flat side",
    ),
    ParamMeta::period("min_touches", 3.0, (2.0, 5.0, 1.0), "Touches of the flat side"),
    ParamMeta::ratio("proximity", 0.03, (0.01, 0.06, 0.005), "Close-to-level distance"),
    ParamMeta::period("order", 4.0, (2.0, 6.0, 1.0), "Swing point neighbourhood"),
];

impl ParameterizedDetector for FlagDetector {
    fn param_meta() -> &'static [ParamMeta] {
        FLAG_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            impulse_threshold: get_ratio(params, "impulse_threshold", 0.03)?,
            channel_width_max: get_ratio(params, "channel_width_max", 0.015)?,
            counter_slope_max: get_ratio(params, "counter_slope_max", 0.01)?,
            pole_bars: get_period(params, "pole_bars", 5)?,
            consolidation_bars: get_period(params, "consolidation_bars", 10)?,
        })
    }
}

impl ParameterizedDetector for TriangleDetector {
    fn param_meta() -> &'static [ParamMeta] {
        TRIANGLE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            lookback: get_period(params, "lookback", 50)?,
            flat_tolerance: get_ratio(params, "flat_tolerance", 0.015)?,
            min_touches: get_period(params, "min_touches", 3)?,
            proximity: get_ratio(params, "proximity", 0.03)?,
            order: get_period(params, "order", 4)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    struct Bar {
        high: f64,
        low: f64,
        close: f64,
    }

    impl OHLCV for Bar {
        fn open(&self) -> f64 {
            self.close
        }
        fn high(&self) -> f64 {
            self.high
        }
        fn low(&self) -> f64 {
            self.low
        }
        fn close(&self) -> f64 {
            self.close
        }
        fn volume(&self) -> f64 {
            1.0
        }
    }

    fn flat(close: f64, n: usize) -> Vec<Bar> {
        vec![
            Bar {
                high: close + 0.2,
                low: close - 0.2,
                close,
            };
            n
        ]
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_bull_flag() {
        // Quiet base, pole 100 -> 106, then a tight channel just under 106.
        let mut bars = flat(100.0, 5);
        for c in [100.0, 101.5, 103.0, 104.5, 106.0] {
            bars.push(Bar { high: c + 0.2, low: c - 0.2, close: c });
        }
        bars.extend(flat(105.8, 10));
        let r = FlagDetector::default().detect(&bars);
        assert!(r.found);
        assert_eq!(r.direction, Direction::Bullish);
        assert_eq!(r.detail("pole_start"), Some(100.0));
        assert_eq!(r.detail("pole_end"), Some(106.0));
        assert!(r.confidence >= 80.0);
    }

    #[test]
    fn test_bear_flag() {
        // Pole 106 -> 100, then a tight channel just above the low.
        let mut bars = flat(106.0, 5);
        for c in [106.0, 104.5, 103.0, 101.5, 100.0] {
            bars.push(Bar { high: c + 0.2, low: c - 0.2, close: c });
        }
        bars.extend(flat(100.2, 10));
        let r = FlagDetector::default().detect(&bars);
        assert!(r.found);
        assert_eq!(r.direction, Direction::Bearish);
        assert_eq!(r.detail("pole_start"), Some(106.0));
        assert_eq!(r.detail("pole_end"), Some(100.0));
        assert_eq!(r.confidence, 92.4);
    }

    #[test]
    fn test_flag_rejects_wide_channel() {
        let mut bars = flat(100.0, 5);
        for c in [100.0, 101.5, 103.0, 104.5, 106.0] {
            bars.push(Bar { high: c + 0.2, low: c - 0.2, close: c });
        }
        for i in 0..10 {
            let c = if i % 2 == 0 { 103.0 } else { 107.0 };
            bars.push(Bar { high: c + 0.2, low: c - 0.2, close: c });
        }
        assert!(!FlagDetector::default().detect(&bars).found);
    }

    #[test]
    fn test_triangle_too_short() {
        let bars = flat(100.0, 49);
        assert!(!TriangleDetector::default().detect(&bars).found);
    }
}
