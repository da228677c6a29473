//! Reversal pattern detectors
//!
//! Double Top / Double Bottom and Head & Shoulders (regular and inverse).
//! Both work on swing points of order 5 and only report a pattern once the
//! latest close has broken through the neckline.

use std::collections::HashMap;

use super::helpers::{details, Series};
use crate::{
    extrema::{find_local_maxima, find_local_minima},
    params::{get_period, get_ratio, ParamMeta, ParameterizedDetector},
    DetectionResult, Direction, PatternDetector, PatternError, PatternId, Period, Ratio, Result,
    Timeframe, OHLCV,
};

// ============================================================
// DOUBLE TOP / BOTTOM
// ============================================================

/// Two similar swing highs (lows) with a neckline between them, confirmed by a
/// close through the neckline. Tops are checked before bottoms.
#[derive(Debug, Clone)]
pub struct DoubleTopBottomDetector {
    /// Maximum relative difference between the two extremes.
    pub peak_tolerance: Ratio,
    pub order: Period,
}

impl Default for DoubleTopBottomDetector {
    fn default() -> Self {
        Self {
            peak_tolerance: Ratio::new_const(0.02),
            order: Period::new_const(5),
        }
    }
}

impl DoubleTopBottomDetector {
    fn check_top(&self, s: &Series, peaks: &[usize], troughs: &[usize]) -> Option<DetectionResult> {
        let [.., p1_i, p2_i] = *peaks else {
            return None;
        };
        let (p1, p2) = (s.highs[p1_i], s.highs[p2_i]);
        let avg_peak = (p1 + p2) / 2.0;
        let tol = self.peak_tolerance.get();
        if avg_peak <= 0.0 || tol <= 0.0 || (p1 - p2).abs() / avg_peak > tol {
            return None;
        }

        let t_i = troughs.iter().copied().find(|&t| p1_i < t && t < p2_i)?;
        let neckline = s.lows[t_i];
        let close = s.last_close()?;
        if close >= neckline {
            return None;
        }

        let similarity = 1.0 - (p1 - p2).abs() / avg_peak / tol;
        let break_depth = (neckline - close) / neckline;
        let confidence = 60.0 + similarity * 20.0 + (break_depth * 200.0).min(20.0);

        Some(DetectionResult::found(
            PatternId::DoubleTopBottom,
            Direction::Bearish,
            confidence,
            details([
                ("peak1", p1),
                ("peak2", p2),
                ("peak1_bar", p1_i as f64),
                ("peak2_bar", p2_i as f64),
                ("neckline", neckline),
                ("current_close", close),
                ("support", neckline),
                ("resistance", avg_peak),
            ]),
        ))
    }

    fn check_bottom(&self, s: &Series, peaks: &[usize], troughs: &[usize]) -> Option<DetectionResult> {
        let [.., t1_i, t2_i] = *troughs else {
            return None;
        };
        let (t1, t2) = (s.lows[t1_i], s.lows[t2_i]);
        let avg_trough = (t1 + t2) / 2.0;
        let tol = self.peak_tolerance.get();
        if avg_trough <= 0.0 || tol <= 0.0 || (t1 - t2).abs() / avg_trough > tol {
            return None;
        }

        let p_i = peaks.iter().copied().find(|&p| t1_i < p && p < t2_i)?;
        let neckline = s.highs[p_i];
        let close = s.last_close()?;
        if close <= neckline {
            return None;
        }

        let similarity = 1.0 - (t1 - t2).abs() / avg_trough / tol;
        let break_height = (close - neckline) / neckline;
        let confidence = 60.0 + similarity * 20.0 + (break_height * 200.0).min(20.0);

        Some(DetectionResult::found(
            PatternId::DoubleTopBottom,
            Direction::Bullish,
            confidence,
            details([
                ("trough1", t1),
                ("trough2", t2),
                ("trough1_bar", t1_i as f64),
                ("trough2_bar", t2_i as f64),
                ("neckline", neckline),
                ("current_close", close),
                ("support", avg_trough),
                ("resistance", neckline),
            ]),
        ))
    }
}

impl PatternDetector for DoubleTopBottomDetector {
    fn id(&self) -> PatternId {
        PatternId::DoubleTopBottom
    }

    fn min_bars(&self) -> usize {
        30
    }

    fn supported_timeframes(&self) -> &'static [Timeframe] {
        &[Timeframe::H1, Timeframe::H4, Timeframe::D1]
    }

    fn detect<T: OHLCV>(&self, bars: &[T]) -> DetectionResult {
        if bars.len() < self.min_bars() {
            return DetectionResult::not_found(self.id());
        }
        let s = Series::from_bars(bars);
        let order = self.order.get();
        let peaks = find_local_maxima(&s.highs, order);
        let troughs = find_local_minima(&s.lows, order);

        self.check_top(&s, &peaks, &troughs)
            .filter(|r| r.found)
            .or_else(|| self.check_bottom(&s, &peaks, &troughs))
            .unwrap_or_else(|| DetectionResult::not_found(self.id()))
    }

    fn validate_config(&self) -> Result<()> {
        if self.peak_tolerance.get() <= 0.0 {
            return Err(PatternError::InvalidConfig(
                "double_top_bottom.peak_tolerance must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// HEAD & SHOULDERS
// ============================================================

/// Three most recent swing highs with a dominant middle one, confirmed by a
/// close below the neckline. The inverse form mirrors it on swing lows.
#[derive(Debug, Clone)]
pub struct HeadAndShouldersDetector {
    /// Maximum relative difference between the shoulders.
    pub shoulder_tolerance: Ratio,
    pub order: Period,
}

impl Default for HeadAndShouldersDetector {
    fn default() -> Self {
        Self {
            shoulder_tolerance: Ratio::new_const(0.03),
            order: Period::new_const(5),
        }
    }
}

impl HeadAndShouldersDetector {
    fn check_top(&self, s: &Series, peaks: &[usize], troughs: &[usize]) -> Option<DetectionResult> {
        let [.., ls_i, head_i, rs_i] = *peaks else {
            return None;
        };
        let (ls, head, rs) = (s.highs[ls_i], s.highs[head_i], s.highs[rs_i]);
        if !(head > ls && head > rs) {
            return None;
        }
        let avg_shoulder = (ls + rs) / 2.0;
        let tol = self.shoulder_tolerance.get();
        if avg_shoulder <= 0.0 || tol <= 0.0 || (ls - rs).abs() / avg_shoulder > tol {
            return None;
        }

        // Neckline troughs hug the head: last one before it, first one after.
        let t1 = troughs.iter().copied().filter(|&t| ls_i < t && t < head_i).last()?;
        let t2 = troughs.iter().copied().find(|&t| head_i < t && t < rs_i)?;
        let neckline = (s.lows[t1] + s.lows[t2]) / 2.0;

        let close = s.last_close()?;
        if close >= neckline {
            return None;
        }

        let symmetry = 1.0 - (ls - rs).abs() / avg_shoulder / tol;
        let prominence = (head - avg_shoulder) / head;
        let break_depth = (neckline - close) / neckline;
        let confidence =
            55.0 + symmetry * 15.0 + prominence * 500.0 + (break_depth * 300.0).min(15.0);

        Some(DetectionResult::found(
            PatternId::HeadAndShoulders,
            Direction::Bearish,
            confidence,
            details([
                ("left_shoulder", ls),
                ("head", head),
                ("right_shoulder", rs),
                ("left_shoulder_bar", ls_i as f64),
                ("head_bar", head_i as f64),
                ("right_shoulder_bar", rs_i as f64),
                ("neckline", neckline),
                ("current_close", close),
                ("support", neckline),
                ("resistance", head),
            ]),
        ))
    }

    fn check_inverse(&self, s: &Series, peaks: &[usize], troughs: &[usize]) -> Option<DetectionResult> {
        let [.., ls_i, head_i, rs_i] = *troughs else {
            return None;
        };
        let (ls, head, rs) = (s.lows[ls_i], s.lows[head_i], s.lows[rs_i]);
        if !(head < ls && head < rs) {
            return None;
        }
        let avg_shoulder = (ls + rs) / 2.0;
        let tol = self.shoulder_tolerance.get();
        if avg_shoulder <= 0.0 || tol <= 0.0 || (ls - rs).abs() / avg_shoulder > tol {
            return None;
        }

        let p1 = peaks.iter().copied().filter(|&p| ls_i < p && p < head_i).last()?;
        let p2 = peaks.iter().copied().find(|&p| head_i < p && p < rs_i)?;
        let neckline = (s.highs[p1] + s.highs[p2]) / 2.0;

        let close = s.last_close()?;
        if close <= neckline {
            return None;
        }

        let symmetry = 1.0 - (ls - rs).abs() / avg_shoulder / tol;
        let depth = (avg_shoulder - head) / avg_shoulder;
        let break_height = (close - neckline) / neckline;
        let confidence = 55.0 + symmetry * 15.0 + depth * 500.0 + (break_height * 300.0).min(15.0);

        Some(DetectionResult::found(
            PatternId::HeadAndShoulders,
            Direction::Bullish,
            confidence,
            details([
                ("left_shoulder", ls),
                ("head", head),
                ("right_shoulder", rs),
                ("left_shoulder_bar", ls_i as f64),
                ("head_bar", head_i as f64),
                ("right_shoulder_bar", rs_i as f64),
                ("neckline", neckline),
                ("current_close", close),
                ("support", head),
                ("resistance", neckline),
            ]),
        ))
    }
}

impl PatternDetector for HeadAndShouldersDetector {
    fn id(&self) -> PatternId {
        PatternId::HeadAndShoulders
    }

    fn min_bars(&self) -> usize {
        40
    }

    fn supported_timeframes(&self) -> &'static [Timeframe] {
        &[Timeframe::H4, Timeframe::D1]
    }

    fn detect<T: OHLCV>(&self, bars: &[T]) -> DetectionResult {
        if bars.len() < self.min_bars() {
            return DetectionResult::not_found(self.id());
        }
        let s = Series::from_bars(bars);
        let order = self.order.get();
        let peaks = find_local_maxima(&s.highs, order);
        let troughs = find_local_minima(&s.lows, order);

        self.check_top(&s, &peaks, &troughs)
            .filter(|r| r.found)
            .or_else(|| self.check_inverse(&s, &peaks, &troughs))
            .unwrap_or_else(|| DetectionResult::not_found(self.id()))
    }

    fn validate_config(&self) -> Result<()> {
        if self.shoulder_tolerance.get() <= 0.0 {
            return Err(PatternError::InvalidConfig(
                "head_and_shoulders.shoulder_tolerance must be > 0".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// PARAMETERS
// ============================================================

static DOUBLE_TOP_BOTTOM_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio(
        "peak_tolerance",
        0.02,
        (0.005, 0.05, 0.005),
        "Max relative difference between the two peaks/troughs",
    ),
    ParamMeta::period("order", 5.0, (3.0, 8.0, 1.0), "Swing point neighbourhood"),
];

static HEAD_AND_SHOULDERS_PARAMS: &[ParamMeta] = &[
    ParamMeta::ratio(
        "shoulder_tolerance",
        0.03,
        (0.01, 0.06, 0.005),
        "Max relative difference between the shoulders",
    ),
    ParamMeta::period("order", 5.0, (3.0, 8.0, 1.0), "Swing point neighbourhood"),
];

impl ParameterizedDetector for DoubleTopBottomDetector {
    fn param_meta() -> &'static [ParamMeta] {
        DOUBLE_TOP_BOTTOM_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            peak_tolerance: get_ratio(params, "peak_tolerance", 0.02)?,
            order: get_period(params, "order", 5)?,
        })
    }
}

impl ParameterizedDetector for HeadAndShouldersDetector {
    fn param_meta() -> &'static [ParamMeta] {
        HEAD_AND_SHOULDERS_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            shoulder_tolerance: get_ratio(params, "shoulder_tolerance", 0.03)?,
            order: get_period(params, "order", 5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    struct Bar(f64, f64, f64);

    impl OHLCV for Bar {
        fn open(&self) -> f64 {
            self.2
        }
        fn high(&self) -> f64 {
            self.0
        }
        fn low(&self) -> f64 {
            self.1
        }
        fn close(&self) -> f64 {
            self.2
        }
        fn volume(&self) -> f64 {
            1.0
        }
    }

    /// Piecewise-linear path through `(bar, price)` anchors; each bar spans
    /// price +/- 0.5.
    fn path(anchors: &[(usize, f64)]) -> Vec<Bar> {
        let mut out = Vec::new();
        for w in anchors.windows(2) {
            let ((i0, p0), (i1, p1)) = (w[0], w[1]);
            for i in i0..i1 {
                let p = p0 + (p1 - p0) * (i - i0) as f64 / (i1 - i0) as f64;
                out.push(Bar(p + 0.5, p - 0.5, p));
            }
        }
        let &(_, last) = anchors.last().unwrap();
        out.push(Bar(last + 0.5, last - 0.5, last));
        out
    }

    #[test]
    fn test_short_window_not_found() {
        let bars = path(&[(0, 100.0), (20, 110.0)]);
        let r = DoubleTopBottomDetector::default().detect(&bars);
        assert!(!r.found);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn test_head_and_shoulders_top() {
        // LS 110, head 120, RS 110, troughs 100, final close 97.
        let bars = path(&[
            (0, 95.0),
            (10, 110.0),
            (20, 100.0),
            (30, 120.0),
            (40, 100.0),
            (50, 110.0),
            (60, 97.0),
        ]);
        let r = HeadAndShouldersDetector::default().detect(&bars);
        assert!(r.found);
        assert_eq!(r.direction, Direction::Bearish);
        assert_eq!(r.detail("head"), Some(120.5));
        assert_eq!(r.neckline(), Some(99.5));
        assert_eq!(r.confidence, 100.0);
    }

    #[test]
    fn test_head_not_dominant() {
        let bars = path(&[
            (0, 95.0),
            (10, 110.0),
            (20, 100.0),
            (30, 109.0),
            (40, 100.0),
            (50, 110.0),
            (60, 97.0),
        ]);
        let r = HeadAndShouldersDetector::default().detect(&bars);
        assert!(!r.found || r.direction == Direction::Bullish);
    }

    #[test]
    fn test_double_bottom() {
        // Troughs 90 / 90.5, neckline peak 100, breakout close 103.
        let bars = path(&[(0, 100.0), (10, 90.0), (20, 100.0), (30, 90.5), (40, 103.0)]);
        let r = DoubleTopBottomDetector::default().detect(&bars);
        assert!(r.found);
        assert_eq!(r.direction, Direction::Bullish);
        assert_eq!(r.resistance(), Some(100.5));
        assert_eq!(r.detail("trough1_bar"), Some(10.0));
        assert_eq!(r.detail("trough2_bar"), Some(30.0));
    }
}
