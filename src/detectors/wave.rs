//! Elliott-wave ABC correction detector
//!
//! Bullish form: origin swing high, wave A down to a swing low, wave B
//! retracing part of A, wave C down again to a fresh swing low near the
//! current price. The bearish form is the mirror image.

use std::collections::HashMap;

use super::helpers::{details, tail, Series};
use crate::{
    extrema::{find_local_maxima, find_local_minima},
    params::{get_factor, get_period, get_ratio, ParamMeta, ParameterizedDetector},
    DetectionResult, Direction, PatternDetector, PatternError, PatternId, Period, Ratio, Result,
    Timeframe, OHLCV,
};

#[derive(Debug, Clone)]
pub struct AbcCorrectionDetector {
    pub lookback: Period,
    pub order: Period,
    /// Wave C pivot must sit within this many bars of the window end.
    pub freshness: Period,
    /// Minimum wave A size relative to the origin price.
    pub min_move: Ratio,
    pub b_retrace_min: Ratio,
    pub b_retrace_max: Ratio,
    pub c_length_min: f64,
    pub c_length_max: f64,
    /// Maximum distance between the latest close and the wave C pivot.
    pub proximity: Ratio,
}

impl Default for AbcCorrectionDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(80),
            order: Period::new_const(5),
            freshness: Period::new_const(15),
            min_move: Ratio::new_const(0.02),
            b_retrace_min: Ratio::new_const(0.382),
            b_retrace_max: Ratio::new_const(0.618),
            c_length_min: 0.786,
            c_length_max: 1.618,
            proximity: Ratio::new_const(0.03),
        }
    }
}

/// Validated wave geometry.
#[derive(Debug, Clone, Copy)]
struct Waves {
    origin: f64,
    a: f64,
    b: f64,
    c: f64,
    wave_a: f64,
    b_retrace: f64,
    c_ratio: f64,
}

impl AbcCorrectionDetector {
    /// Check one origin/A/B/C candidate. `sign` is +1 when wave A points
    /// down (bullish setup) and -1 when it points up.
    fn measure(&self, origin: f64, a: f64, b: f64, c: f64, sign: f64) -> Option<Waves> {
        let wave_a = sign * (origin - a);
        if wave_a <= 0.0 || origin <= 0.0 || wave_a / origin < self.min_move.get() {
            return None;
        }
        let wave_b = sign * (b - a);
        // B may not run past the origin.
        if wave_b <= 0.0 || sign * (b - origin) >= 0.0 {
            return None;
        }
        let b_retrace = wave_b / wave_a;
        if b_retrace < self.b_retrace_min.get() || b_retrace > self.b_retrace_max.get() {
            return None;
        }
        let wave_c = sign * (b - c);
        if wave_c <= 0.0 {
            return None;
        }
        let c_ratio = wave_c / wave_a;
        if c_ratio < self.c_length_min || c_ratio > self.c_length_max {
            return None;
        }
        Some(Waves {
            origin,
            a,
            b,
            c,
            wave_a,
            b_retrace,
            c_ratio,
        })
    }

    fn confidence(&self, w: &Waves, sign: f64) -> f64 {
        let mut confidence = 60.0;
        if (0.5..=0.618).contains(&w.b_retrace) {
            confidence += 15.0;
        } else if w.b_retrace >= self.b_retrace_min.get() && w.b_retrace < 0.5 {
            confidence += 8.0;
        }
        if (0.9..=1.1).contains(&w.c_ratio) {
            confidence += 15.0;
        } else if w.c_ratio >= self.c_length_min && w.c_ratio < 0.9 {
            confidence += 8.0;
        }
        // Clean correction: C stops short of A.
        if sign * (w.c - w.a) > 0.0 {
            confidence += 10.0;
        }
        confidence
    }

    /// Scan consecutive A/C pivots. `ac` are the A/C pivot indices read from
    /// `ac_prices`; `bo` are the origin/B pivots read from `bo_prices`.
    fn search(
        &self,
        ac: &[usize],
        ac_prices: &[f64],
        bo: &[usize],
        bo_prices: &[f64],
        close: f64,
        sign: f64,
    ) -> Option<Waves> {
        let fresh_from = ac_prices.len().saturating_sub(self.freshness.get());
        for pair in ac.windows(2) {
            let (a_i, c_i) = (pair[0], pair[1]);
            if c_i < fresh_from {
                continue;
            }
            let Some(b_i) = bo.iter().copied().filter(|&p| a_i < p && p < c_i).last() else {
                continue;
            };
            let Some(origin_i) = bo.iter().copied().filter(|&p| p < a_i).last() else {
                continue;
            };
            let Some(w) = self.measure(bo_prices[origin_i], ac_prices[a_i], bo_prices[b_i], ac_prices[c_i], sign)
            else {
                continue;
            };
            if w.c <= 0.0 || (close - w.c).abs() / w.c > self.proximity.get() {
                continue;
            }
            return Some(w);
        }
        None
    }
}

impl PatternDetector for AbcCorrectionDetector {
    fn id(&self) -> PatternId {
        PatternId::AbcCorrection
    }

    fn min_bars(&self) -> usize {
        self.lookback.get() + 10
    }

    fn supported_timeframes(&self) -> &'static [Timeframe] {
        &[Timeframe::H4, Timeframe::D1]
    }

    fn detect<T: OHLCV>(&self, bars: &[T]) -> DetectionResult {
        let not_found = DetectionResult::not_found(self.id());
        if bars.len() < self.min_bars() {
            return not_found;
        }
        let s = Series::from_bars(tail(bars, self.lookback.get()));
        let order = self.order.get();
        let peaks = find_local_maxima(&s.highs, order);
        let troughs = find_local_minima(&s.lows, order);
        if peaks.len() < 2 || troughs.len() < 2 {
            return not_found;
        }
        let Some(close) = s.last_close() else {
            return not_found;
        };

        let (direction, sign, w) = if let Some(w) = self.search(&troughs, &s.lows, &peaks, &s.highs, close, 1.0) {
            (Direction::Bullish, 1.0, w)
        } else if let Some(w) = self.search(&peaks, &s.highs, &troughs, &s.lows, close, -1.0) {
            (Direction::Bearish, -1.0, w)
        } else {
            return not_found;
        };

        let (support, resistance) = match direction {
            Direction::Bullish => (w.c * 0.99, w.b),
            _ => (w.b, w.c * 1.01),
        };

        DetectionResult::found(
            self.id(),
            direction,
            self.confidence(&w, sign),
            details([
                ("origin_price", w.origin),
                ("wave_a_price", w.a),
                ("wave_b_price", w.b),
                ("wave_c_price", w.c),
                ("wave_a_size_pct", w.wave_a / w.origin * 100.0),
                ("b_retracement_pct", w.b_retrace * 100.0),
                ("c_to_a_ratio", w.c_ratio),
                ("tp_target", w.origin),
                ("support", support),
                ("resistance", resistance),
                ("neckline", w.b),
                ("current_close", close),
            ]),
        )
    }

    fn validate_config(&self) -> Result<()> {
        if self.b_retrace_min > self.b_retrace_max || self.c_length_min > self.c_length_max {
            return Err(PatternError::InvalidConfig(
                "abc_correction ranges must have min <= max".into(),
            ));
        }
        Ok(())
    }
}

static ABC_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("lookback", 80.0, (40.0, 160.0, 10.0), "Window searched for waves"),
    ParamMeta::period("order", 5.0, (3.0, 8.0, 1.0), "Swing point neighbourhood"),
    ParamMeta::period("freshness", 15.0, (5.0, 30.0, 1.0), "Max age of the wave C pivot"),
    ParamMeta::ratio("min_move", 0.02, (0.005, 0.1, 0.005), "Minimum wave A size"),
    ParamMeta::ratio("b_retrace_min", 0.382, (0.236, 0.5, 0.001), "Lower wave B retracement"),
    ParamMeta::ratio("b_retrace_max", 0.618, (0.5, 0.786, 0.001), "Upper wave B retracement"),
    ParamMeta::factor("c_length_min", 0.786, (0.5, 1.0, 0.001), "Shortest wave C vs A"),
    ParamMeta::factor("c_length_max", 1.618, (1.0, 2.618, 0.001), "Longest wave C vs A"),
    ParamMeta::ratio("proximity", 0.03, (0.01, 0.06, 0.005), "Close-to-C distance"),
];

impl ParameterizedDetector for AbcCorrectionDetector {
    fn param_meta() -> &'static [ParamMeta] {
        ABC_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            lookback: get_period(params, "lookback", 80)?,
            order: get_period(params, "order", 5)?,
            freshness: get_period(params, "freshness", 15)?,
            min_move: get_ratio(params, "min_move", 0.02)?,
            b_retrace_min: get_ratio(params, "b_retrace_min", 0.382)?,
            b_retrace_max: get_ratio(params, "b_retrace_max", 0.618)?,
            c_length_min: get_factor(params, "c_length_min", 0.786)?,
            c_length_max: get_factor(params, "c_length_max", 1.618)?,
            proximity: get_ratio(params, "proximity", 0.03)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    struct Bar(f64);

    impl OHLCV for Bar {
        fn open(&self) -> f64 {
            self.0
        }
        fn high(&self) -> f64 {
            self.0 + 0.5
        }
        fn low(&self) -> f64 {
            self.0 - 0.5
        }
        fn close(&self) -> f64 {
            self.0
        }
        fn volume(&self) -> f64 {
            1.0
        }
    }

    fn path(anchors: &[(usize, f64)]) -> Vec<Bar> {
        let mut out = Vec::new();
        for w in anchors.windows(2) {
            let ((i0, p0), (i1, p1)) = (w[0], w[1]);
            for i in i0..i1 {
                out.push(Bar(p0 + (p1 - p0) * (i - i0) as f64 / (i1 - i0) as f64));
            }
        }
        out.push(Bar(anchors[anchors.len() - 1].1));
        out
    }

    #[test]
    fn test_bullish_abc() {
        // Origin 120 -> A 100 -> B 110 -> C 90, close 91.
        let bars = path(&[(0, 108.0), (10, 110.0), (30, 120.0), (50, 100.0), (65, 110.0), (82, 90.0), (89, 91.0)]);
        assert_eq!(bars.len(), 90);
        let r = AbcCorrectionDetector::default().detect(&bars);
        assert!(r.found);
        assert_eq!(r.direction, Direction::Bullish);
        assert_eq!(r.detail("origin_price"), Some(120.5));
        assert_eq!(r.detail("wave_c_price"), Some(89.5));
        assert_eq!(r.neckline(), Some(110.5));
        assert_eq!(r.resistance(), Some(110.5));
        assert_eq!(r.detail("c_to_a_ratio"), Some(1.0));
        assert_eq!(r.confidence, 90.0);
    }

    #[test]
    fn test_bearish_abc() {
        // Origin 80 -> A 100 -> B 90 -> C 110, close 109.
        let bars = path(&[(0, 92.0), (10, 90.0), (30, 80.0), (50, 100.0), (65, 90.0), (82, 110.0), (89, 109.0)]);
        assert_eq!(bars.len(), 90);
        let r = AbcCorrectionDetector::default().detect(&bars);
        assert!(r.found);
        assert_eq!(r.direction, Direction::Bearish);
        assert_eq!(r.detail("origin_price"), Some(79.5));
        assert_eq!(r.detail("wave_a_price"), Some(100.5));
        assert_eq!(r.detail("wave_c_price"), Some(110.5));
        assert_eq!(r.neckline(), Some(89.5));
        assert_eq!(r.support(), Some(89.5));
        assert_eq!(r.detail("tp_target"), Some(79.5));
        assert_eq!(r.detail("c_to_a_ratio"), Some(1.0));
        assert_eq!(r.confidence, 90.0);
    }

    #[test]
    fn test_requires_history() {
        let bars = path(&[(0, 108.0), (10, 110.0), (30, 120.0), (50, 100.0), (65, 110.0), (82, 90.0), (89, 91.0)]);
        assert!(!AbcCorrectionDetector::default().detect(&bars[1..]).found);
    }

    #[test]
    fn test_shallow_b_rejected() {
        let d = AbcCorrectionDetector::default();
        // B retraces only 25% of A.
        assert!(d.measure(120.0, 100.0, 105.0, 85.0, 1.0).is_none());
        // B beyond the origin.
        assert!(d.measure(120.0, 100.0, 121.0, 95.0, 1.0).is_none());
        // Bearish mirror: origin 100 -> A 120 -> B 110 -> C 130.
        let w = d.measure(100.0, 120.0, 110.0, 130.0, -1.0).unwrap();
        assert_eq!(w.b_retrace, 0.5);
        assert_eq!(w.c_ratio, 1.0);
    }
}
