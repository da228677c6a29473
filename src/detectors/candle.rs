//! Engulfing candlestick detector
//!
//! The last bar's body must contain the previous bar's body and be of the
//! opposite colour. Edges may coincide, but the engulfing body must be
//! strictly larger than `min_body_ratio` times the previous one, so two
//! mirror-image candles of equal size never qualify.

use std::collections::HashMap;

use super::helpers::{details, pct_change, tail, Series};
use crate::{
    extrema::{nearest_swing_high, nearest_swing_low},
    params::{get_factor, get_period, ParamMeta, ParameterizedDetector},
    DetectionResult, Direction, OHLCVExt, PatternDetector, PatternId, Period, Result, Timeframe,
    OHLCV,
};

/// Bullish or bearish engulfing candle, graded by relative size and by the
/// trend it reverses.
#[derive(Debug, Clone)]
pub struct EngulfingDetector {
    /// Closes before the two-bar pattern used to measure the prior trend.
    pub trend_lookback: Period,
    /// Engulfing body must exceed this multiple of the previous body.
    pub min_body_ratio: f64,
    pub swing_lookback: Period,
    pub swing_order: Period,
}

impl Default for EngulfingDetector {
    fn default() -> Self {
        Self {
            trend_lookback: Period::new_const(10),
            min_body_ratio: 1.0,
            swing_lookback: Period::new_const(50),
            swing_order: Period::new_const(3),
        }
    }
}

impl PatternDetector for EngulfingDetector {
    fn id(&self) -> PatternId {
        PatternId::Engulfing
    }

    fn min_bars(&self) -> usize {
        self.trend_lookback.get() + 2
    }

    fn supported_timeframes(&self) -> &'static [Timeframe] {
        &[Timeframe::H4, Timeframe::D1]
    }

    fn detect<T: OHLCV>(&self, bars: &[T]) -> DetectionResult {
        let not_found = DetectionResult::not_found(self.id());
        let n = bars.len();
        if n < self.min_bars() {
            return not_found;
        }
        let (prev, curr) = (&bars[n - 2], &bars[n - 1]);
        let (prev_body, curr_body) = (prev.signed_body(), curr.signed_body());
        if prev_body == 0.0 || curr_body == 0.0 {
            return not_found;
        }

        let contains = curr.body_top() >= prev.body_top() && curr.body_bottom() <= prev.body_bottom();
        let size_ratio = curr_body.abs() / prev_body.abs();
        if !contains || size_ratio <= self.min_body_ratio {
            return not_found;
        }

        let s = Series::from_bars(bars);
        let trend_start = s.closes[n - 2 - self.trend_lookback.get()];
        let Some(trend) = pct_change(trend_start, s.closes[n - 3]) else {
            return not_found;
        };
        let close = curr.close();
        let size_bonus = ((size_ratio - 1.0) * 20.0).min(20.0);
        let lookback = self.swing_lookback.get();
        let order = self.swing_order.get();

        let (direction, trend_bonus, support, resistance) = if prev_body < 0.0 && curr_body > 0.0 {
            let Some(level) = nearest_swing_high(tail(&s.highs, lookback), close, order) else {
                return not_found;
            };
            (Direction::Bullish, (-trend).max(0.0) * 200.0, curr.body_bottom(), level)
        } else if prev_body > 0.0 && curr_body < 0.0 {
            let Some(level) = nearest_swing_low(tail(&s.lows, lookback), close, order) else {
                return not_found;
            };
            (Direction::Bearish, trend.max(0.0) * 200.0, level, curr.body_top())
        } else {
            return not_found;
        };

        DetectionResult::found(
            self.id(),
            direction,
            60.0 + trend_bonus + size_bonus,
            details([
                ("prev_open", prev.open()),
                ("prev_close", prev.close()),
                ("curr_open", curr.open()),
                ("curr_close", close),
                ("size_ratio", size_ratio),
                ("prior_trend_pct", trend * 100.0),
                ("support", support),
                ("resistance", resistance),
                ("current_close", close),
            ]),
        )
    }
}

static ENGULFING_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("trend_lookback", 10.0, (5.0, 30.0, 1.0), "Closes measuring the prior trend"),
    ParamMeta::factor(
        "min_body_ratio",
        1.0,
        (1.0, 3.0, 0.1),
        "Engulfing body must exceed this multiple of the previous body",
    ),
    ParamMeta::period("swing_lookback", 50.0, (20.0, 100.0, 10.0), "Swing level search window"),
    ParamMeta::period("swing_order", 3.0, (2.0, 6.0, 1.0), "Swing point neighbourhood"),
];

impl ParameterizedDetector for EngulfingDetector {
    fn param_meta() -> &'static [ParamMeta] {
        ENGULFING_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            trend_lookback: get_period(params, "trend_lookback", 10)?,
            min_body_ratio: get_factor(params, "min_body_ratio", 1.0)?,
            swing_lookback: get_period(params, "swing_lookback", 50)?,
            swing_order: get_period(params, "swing_order", 3)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    struct Candle {
        open: f64,
        close: f64,
    }

    impl OHLCV for Candle {
        fn open(&self) -> f64 {
            self.open
        }
        fn high(&self) -> f64 {
            self.open.max(self.close) + 0.5
        }
        fn low(&self) -> f64 {
            self.open.min(self.close) - 0.5
        }
        fn close(&self) -> f64 {
            self.close
        }
        fn volume(&self) -> f64 {
            1.0
        }
    }

    fn downtrend(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let c = 120.0 - 2.0 * i as f64;
                Candle { open: c + 1.0, close: c }
            })
            .collect()
    }

    #[test]
    fn test_bullish_engulfing_after_downtrend() {
        let mut bars = downtrend(12);
        bars.push(Candle { open: 97.0, close: 95.0 });
        bars.push(Candle { open: 94.0, close: 99.0 });
        let r = EngulfingDetector::default().detect(&bars);
        assert!(r.found);
        assert_eq!(r.direction, Direction::Bullish);
        assert_eq!(r.support(), Some(94.0));
        assert_eq!(r.detail("size_ratio"), Some(2.5));
        assert_eq!(r.confidence, 100.0);
    }

    #[test]
    fn test_equal_bodies_not_engulfing() {
        let mut bars = downtrend(12);
        bars.push(Candle { open: 100.0, close: 98.0 });
        bars.push(Candle { open: 98.0, close: 100.0 });
        assert!(!EngulfingDetector::default().detect(&bars).found);
    }

    #[test]
    fn test_same_colour_not_engulfing() {
        let mut bars = downtrend(12);
        bars.push(Candle { open: 97.0, close: 95.0 });
        bars.push(Candle { open: 99.0, close: 93.0 });
        assert!(!EngulfingDetector::default().detect(&bars).found);
    }

    #[test]
    fn test_doji_rejected() {
        let mut bars = downtrend(12);
        bars.push(Candle { open: 96.0, close: 96.0 });
        bars.push(Candle { open: 94.0, close: 99.0 });
        assert!(!EngulfingDetector::default().detect(&bars).found);
    }
}
