//! Indicator-driven detectors
//!
//! Golden/Death Cross (EMA crossover), RSI Divergence and the Ichimoku
//! Tenkan/Kijun cross. All three read indicator series from
//! [`crate::indicators`] and look at the last two bars only.

use std::collections::HashMap;

use super::helpers::{details, flag, tail, volume_ratio, Series};
use crate::{
    extrema::{nearest_swing_high, nearest_swing_low},
    indicators::{ema, ichimoku, rsi, IchimokuPeriods},
    params::{get_factor, get_period, get_ratio, ParamMeta, ParameterizedDetector},
    DetectionResult, Direction, PatternDetector, PatternError, PatternId, Period, Ratio, Result,
    Timeframe, OHLCV,
};

// ============================================================
// GOLDEN / DEATH CROSS
// ============================================================

/// Fast EMA crossing the slow EMA on the latest bar.
#[derive(Debug, Clone)]
pub struct CrossDetector {
    pub fast: Period,
    pub slow: Period,
    /// Crossing-bar volume multiple of its trailing average that earns the
    /// volume bonus.
    pub volume_factor: f64,
    pub volume_lookback: Period,
    /// Bars searched for the opposing swing level.
    pub swing_lookback: Period,
    pub swing_order: Period,
}

impl Default for CrossDetector {
    fn default() -> Self {
        Self {
            fast: Period::new_const(50),
            slow: Period::new_const(200),
            volume_factor: 1.2,
            volume_lookback: Period::new_const(20),
            swing_lookback: Period::new_const(100),
            swing_order: Period::new_const(5),
        }
    }
}

impl PatternDetector for CrossDetector {
    fn id(&self) -> PatternId {
        PatternId::GoldenDeathCross
    }

    fn min_bars(&self) -> usize {
        self.slow.get() + 10
    }

    fn supported_timeframes(&self) -> &'static [Timeframe] {
        &[Timeframe::D1]
    }

    fn detect<T: OHLCV>(&self, bars: &[T]) -> DetectionResult {
        let not_found = DetectionResult::not_found(self.id());
        if bars.len() < self.min_bars() {
            return not_found;
        }
        let s = Series::from_bars(bars);
        let fast = ema(&s.closes, self.fast.get());
        let slow = ema(&s.closes, self.slow.get());
        let n = s.len();
        if fast.len() != n || slow.len() != n {
            return not_found;
        }

        let prev_diff = fast[n - 2] - slow[n - 2];
        let curr_diff = fast[n - 1] - slow[n - 1];
        let direction = if prev_diff < 0.0 && curr_diff > 0.0 {
            Direction::Bullish
        } else if prev_diff > 0.0 && curr_diff < 0.0 {
            Direction::Bearish
        } else {
            return not_found;
        };

        let ratio = volume_ratio(&s.volumes, self.volume_lookback.get());
        let confirmed = ratio >= self.volume_factor;
        let volume_bonus = if confirmed {
            ((ratio - 1.0) * 30.0).min(15.0)
        } else {
            0.0
        };
        let ema_slow = slow[n - 1];
        if ema_slow <= 0.0 {
            return not_found;
        }
        let separation = curr_diff.abs() / ema_slow * 100.0;
        let confidence = 65.0 + volume_bonus + (separation * 20.0).min(10.0);

        let close = s.closes[n - 1];
        let lookback = self.swing_lookback.get();
        let order = self.swing_order.get();
        let (support, resistance) = match direction {
            Direction::Bullish => {
                let Some(level) = nearest_swing_high(tail(&s.highs, lookback), close, order) else {
                    return not_found;
                };
                (ema_slow, level)
            }
            _ => {
                let Some(level) = nearest_swing_low(tail(&s.lows, lookback), close, order) else {
                    return not_found;
                };
                (level, ema_slow)
            }
        };

        DetectionResult::found(
            self.id(),
            direction,
            confidence,
            details([
                ("ema50", fast[n - 1]),
                ("ema200", ema_slow),
                ("volume_ratio", ratio),
                ("volume_confirmed", flag(confirmed)),
                ("support", support),
                ("resistance", resistance),
                ("current_close", close),
            ]),
        )
    }

    fn validate_config(&self) -> Result<()> {
        if self.fast >= self.slow {
            return Err(PatternError::InvalidConfig(
                "golden_death_cross.fast must be shorter than slow".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// RSI DIVERGENCE
// ============================================================

/// Price and RSI extremes disagreeing between the two halves of a short
/// lookback.
#[derive(Debug, Clone)]
pub struct RsiDivergenceDetector {
    pub lookback: Period,
    pub rsi_period: Period,
}

impl Default for RsiDivergenceDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(20),
            rsi_period: Period::new_const(14),
        }
    }
}

fn min_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

impl PatternDetector for RsiDivergenceDetector {
    fn id(&self) -> PatternId {
        PatternId::RsiDivergence
    }

    fn min_bars(&self) -> usize {
        self.lookback.get() + self.rsi_period.get() + 5
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
        let lookback = self.lookback.get();
        let rsi_values: Vec<f64> = rsi(&s.closes, self.rsi_period.get()).into_iter().flatten().collect();
        if rsi_values.len() < lookback {
            return not_found;
        }

        let closes = tail(&s.closes, lookback);
        let rsis = tail(&rsi_values, lookback);
        let mid = lookback / 2;
        let close = s.closes[s.len() - 1];
        let current_rsi = rsis[rsis.len() - 1];

        // Bullish: lower price low, higher RSI low.
        let price_low_recent = min_of(&closes[mid..]);
        let price_low_past = min_of(&closes[..mid]);
        let rsi_low_recent = min_of(&rsis[mid..]);
        let rsi_low_past = min_of(&rsis[..mid]);
        if price_low_recent < price_low_past && rsi_low_recent > rsi_low_past && price_low_past > 0.0 {
            let price_div = (price_low_past - price_low_recent) / price_low_past;
            let rsi_div = (rsi_low_recent - rsi_low_past) / (100.0 - rsi_low_past + 0.01);
            let confidence = 55.0 + price_div * 500.0 + rsi_div * 100.0;
            return DetectionResult::found(
                self.id(),
                Direction::Bullish,
                confidence,
                details([
                    ("price_low_recent", price_low_recent),
                    ("price_low_past", price_low_past),
                    ("rsi_low_recent", rsi_low_recent),
                    ("rsi_low_past", rsi_low_past),
                    ("current_rsi", current_rsi),
                    ("support", price_low_recent),
                    ("resistance", close * 1.04),
                    ("current_close", close),
                ]),
            );
        }

        // Bearish: higher price high, lower RSI high.
        let price_high_recent = max_of(&closes[mid..]);
        let price_high_past = max_of(&closes[..mid]);
        let rsi_high_recent = max_of(&rsis[mid..]);
        let rsi_high_past = max_of(&rsis[..mid]);
        if price_high_recent > price_high_past && rsi_high_recent < rsi_high_past && price_high_past > 0.0 {
            let price_div = (price_high_recent - price_high_past) / price_high_past;
            let rsi_div = (rsi_high_past - rsi_high_recent) / (rsi_high_past + 0.01);
            let confidence = 55.0 + price_div * 500.0 + rsi_div * 100.0;
            return DetectionResult::found(
                self.id(),
                Direction::Bearish,
                confidence,
                details([
                    ("price_high_recent", price_high_recent),
                    ("price_high_past", price_high_past),
                    ("rsi_high_recent", rsi_high_recent),
                    ("rsi_high_past", rsi_high_past),
                    ("current_rsi", current_rsi),
                    ("support", close * 0.96),
                    ("resistance", price_high_recent),
                    ("current_close", close),
                ]),
            );
        }

        not_found
    }

    fn validate_config(&self) -> Result<()> {
        if self.lookback.get() < 4 {
            return Err(PatternError::InvalidConfig(
                "rsi_divergence.lookback must be >= 4".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// ICHIMOKU
// ============================================================

/// Tenkan/Kijun cross on the latest bar, graded by position against the cloud.
#[derive(Debug, Clone)]
pub struct IchimokuDetector {
    pub tenkan: Period,
    pub kijun: Period,
    pub senkou_b: Period,
    pub displacement: Period,
    /// Cloud thinner than this fraction of price is treated as no signal.
    pub min_cloud_width: Ratio,
}

impl Default for IchimokuDetector {
    fn default() -> Self {
        Self {
            tenkan: Period::new_const(9),
            kijun: Period::new_const(26),
            senkou_b: Period::new_const(52),
            displacement: Period::new_const(26),
            min_cloud_width: Ratio::new_const(0.002),
        }
    }
}

impl IchimokuDetector {
    fn periods(&self) -> IchimokuPeriods {
        IchimokuPeriods {
            tenkan: self.tenkan.get(),
            kijun: self.kijun.get(),
            senkou_b: self.senkou_b.get(),
            displacement: self.displacement.get(),
        }
    }
}

impl PatternDetector for IchimokuDetector {
    fn id(&self) -> PatternId {
        PatternId::Ichimoku
    }

    fn min_bars(&self) -> usize {
        self.periods().min_bars()
    }

    fn supported_timeframes(&self) -> &'static [Timeframe] {
        &[Timeframe::H4, Timeframe::D1]
    }

    fn detect<T: OHLCV>(&self, bars: &[T]) -> DetectionResult {
        let not_found = DetectionResult::not_found(self.id());
        if bars.len() < self.min_bars() {
            return not_found;
        }
        let s = Series::from_bars(bars);
        let Some(ich) = ichimoku(&s.highs, &s.lows, &s.closes, self.periods()) else {
            return not_found;
        };
        let n = s.len();
        let (
            Some(t_curr),
            Some(t_prev),
            Some(k_curr),
            Some(k_prev),
            Some(span_a),
            Some(span_b),
        ) = (
            ich.tenkan[n - 1],
            ich.tenkan[n - 2],
            ich.kijun[n - 1],
            ich.kijun[n - 2],
            ich.senkou_a[n - 1],
            ich.senkou_b[n - 1],
        )
        else {
            return not_found;
        };

        let close = s.closes[n - 1];
        let cloud_top = span_a.max(span_b);
        let cloud_bottom = span_a.min(span_b);
        if cloud_top - cloud_bottom < close * self.min_cloud_width.get() {
            return not_found;
        }

        // The lagging line plotted on the bar `displacement` back is today's
        // close; compare it with that bar's own close.
        let ref_idx = n.checked_sub(self.displacement.get() + 1);
        let chikou = ref_idx.and_then(|i| ich.chikou[i].map(|c| (c, s.closes[i])));

        let bullish_cross = t_prev <= k_prev && t_curr > k_curr;
        let bearish_cross = t_prev >= k_prev && t_curr < k_curr;

        let (direction, outside_cloud, chikou_agrees, cloud_agrees) = if bullish_cross {
            (
                Direction::Bullish,
                close > cloud_top,
                chikou.is_some_and(|(lagging, past)| lagging > past),
                span_a > span_b,
            )
        } else if bearish_cross {
            (
                Direction::Bearish,
                close < cloud_bottom,
                chikou.is_some_and(|(lagging, past)| lagging < past),
                span_b > span_a,
            )
        } else {
            return not_found;
        };

        let mut confidence = 60.0;
        if outside_cloud {
            confidence += 15.0;
        }
        if chikou_agrees {
            confidence += 15.0;
        }
        if cloud_agrees {
            confidence += 10.0;
        }

        let (cloud_key, color_key, chikou_key) = match direction {
            Direction::Bullish => ("above_cloud", "cloud_bullish", "chikou_bullish"),
            _ => ("below_cloud", "cloud_bearish", "chikou_bearish"),
        };

        DetectionResult::found(
            self.id(),
            direction,
            confidence,
            details([
                ("tenkan", t_curr),
                ("kijun", k_curr),
                ("senkou_a", span_a),
                ("senkou_b", span_b),
                ("cloud_top", cloud_top),
                ("cloud_bottom", cloud_bottom),
                (cloud_key, flag(outside_cloud)),
                (color_key, flag(cloud_agrees)),
                (chikou_key, flag(chikou_agrees)),
                ("support", cloud_bottom),
                ("resistance", cloud_top),
                ("current_close", close),
            ]),
        )
    }

    fn validate_config(&self) -> Result<()> {
        if self.tenkan >= self.kijun || self.kijun >= self.senkou_b {
            return Err(PatternError::InvalidConfig(
                "ichimoku periods must satisfy tenkan < kijun < senkou_b".into(),
            ));
        }
        Ok(())
    }
}

// ============================================================
// PARAMETERS
// ============================================================

static CROSS_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("fast", 50.0, (10.0, 100.0, 5.0), "Fast EMA period"),
    ParamMeta::period("slow", 200.0, (100.0, 300.0, 10.0), "Slow EMA period"),
    ParamMeta::factor(
        "volume_factor",
        1.2,
        (1.0, 3.0, 0.1),
        "Crossing volume multiple that earns the volume bonus",
    ),
    ParamMeta::period("volume_lookback", 20.0, (5.0, 50.0, 5.0), "Volume average window"),
    ParamMeta::period("swing_lookback", 100.0, (20.0, 200.0, 10.0), "Swing level search window"),
    ParamMeta::period("swing_order", 5.0, (2.0, 8.0, 1.0), "Swing point neighbourhood"),
];

static RSI_DIVERGENCE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("lookback", 20.0, (10.0, 40.0, 2.0), "Bars compared (two halves)"),
    ParamMeta::period("rsi_period", 14.0, (7.0, 21.0, 1.0), "RSI period"),
];

static ICHIMOKU_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("tenkan", 9.0, (5.0, 20.0, 1.0), "Conversion line period"),
    ParamMeta::period("kijun", 26.0, (15.0, 40.0, 1.0), "Base line period"),
    ParamMeta::period("senkou_b", 52.0, (30.0, 80.0, 2.0), "Leading span B period"),
    ParamMeta::period("displacement", 26.0, (15.0, 40.0, 1.0), "Cloud/lagging shift"),
    ParamMeta::ratio(
        "min_cloud_width",
        0.002,
        (0.0, 0.02, 0.001),
        "Minimum cloud thickness relative to price",
    ),
];

impl ParameterizedDetector for CrossDetector {
    fn param_meta() -> &'static [ParamMeta] {
        CROSS_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            fast: get_period(params, "fast", 50)?,
            slow: get_period(params, "slow", 200)?,
            volume_factor: get_factor(params, "volume_factor", 1.2)?,
            volume_lookback: get_period(params, "volume_lookback", 20)?,
            swing_lookback: get_period(params, "swing_lookback", 100)?,
            swing_order: get_period(params, "swing_order", 5)?,
        })
    }
}

impl ParameterizedDetector for RsiDivergenceDetector {
    fn param_meta() -> &'static [ParamMeta] {
        RSI_DIVERGENCE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            lookback: get_period(params, "lookback", 20)?,
            rsi_period: get_period(params, "rsi_period", 14)?,
        })
    }
}

impl ParameterizedDetector for IchimokuDetector {
    fn param_meta() -> &'static [ParamMeta] {
        ICHIMOKU_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            tenkan: get_period(params, "tenkan", 9)?,
            kijun: get_period(params, "kijun", 26)?,
            senkou_b: get_period(params, "senkou_b", 52)?,
            displacement: get_period(params, "displacement", 26)?,
            min_cloud_width: get_ratio(params, "min_cloud_width", 0.002)?,
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
            100.0
        }
    }

    #[test]
    fn test_cross_requires_history() {
        let bars: Vec<Bar> = (0..209).map(|i| Bar(100.0 + i as f64)).collect();
        assert!(!CrossDetector::default().detect(&bars).found);
    }

    #[test]
    fn test_no_cross_in_steady_trend() {
        let bars: Vec<Bar> = (0..260).map(|i| Bar(100.0 + i as f64)).collect();
        assert!(!CrossDetector::default().detect(&bars).found);
    }

    #[test]
    fn test_flat_series_has_no_divergence() {
        // Zero change everywhere: RSI pinned at 100, extremes equal.
        let bars = vec![Bar(50.0); 60];
        assert!(!RsiDivergenceDetector::default().detect(&bars).found);
    }

    #[test]
    fn test_bearish_rsi_divergence() {
        // Sharp rally, pullback, then a slow grind to a marginal new high.
        let mut closes: Vec<f64> = vec![100.0; 20];
        closes.extend((1..=10).map(|i| 100.0 + 2.0 * i as f64));
        closes.extend((1..=5).map(|i| 120.0 - i as f64));
        closes.extend((1..=10).map(|i| 115.0 + 0.6 * i as f64));
        let bars: Vec<Bar> = closes.into_iter().map(Bar).collect();
        let r = RsiDivergenceDetector::default().detect(&bars);
        assert!(r.found);
        assert_eq!(r.direction, Direction::Bearish);
        assert_eq!(r.resistance(), r.detail("price_high_recent"));
    }

    #[test]
    fn test_bullish_rsi_divergence() {
        // Sharp sell-off, bounce, then a slow bleed to a marginal new low.
        let mut closes: Vec<f64> = vec![100.0; 20];
        closes.extend((1..=10).map(|i| 100.0 - 2.0 * i as f64));
        closes.extend((1..=5).map(|i| 80.0 + i as f64));
        closes.extend((1..=10).map(|i| 85.0 - 0.6 * i as f64));
        let bars: Vec<Bar> = closes.into_iter().map(Bar).collect();
        let r = RsiDivergenceDetector::default().detect(&bars);
        assert!(r.found);
        assert_eq!(r.direction, Direction::Bullish);
        assert_eq!(r.detail("price_low_recent"), Some(79.0));
        assert_eq!(r.detail("price_low_past"), Some(80.0));
        assert_eq!(r.support(), Some(79.0));
        assert_eq!(r.confidence, 84.4);
    }

    /// Linear closes between `(bar, price)` anchors.
    fn ramp(anchors: &[(usize, f64)]) -> Vec<Bar> {
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
    fn test_ichimoku_bullish_tk_cross() {
        // Steady rally, short pullback, then the recovery bar where tenkan
        // moves back above kijun.
        let bars = ramp(&[(0, 100.0), (60, 160.0), (70, 150.0), (80, 160.0)]);
        assert_eq!(bars.len(), 81);

        let r = IchimokuDetector::default().detect(&bars);
        assert!(r.found);
        assert_eq!(r.direction, Direction::Bullish);
        assert_eq!(r.detail("tenkan"), Some(156.0));
        assert_eq!(r.detail("kijun"), Some(155.0));
        assert_eq!(r.support(), Some(128.5));
        assert_eq!(r.resistance(), Some(145.75));
        assert_eq!(r.detail("above_cloud"), Some(1.0));
        assert_eq!(r.detail("chikou_bullish"), Some(1.0));
        assert_eq!(r.detail("cloud_bullish"), Some(1.0));
        assert_eq!(r.confidence, 100.0);

        // One bar earlier the lines are level: no cross yet.
        assert!(!IchimokuDetector::default().detect(&bars[..80]).found);
    }

    #[test]
    fn test_ichimoku_flat_cloud_rejected() {
        let bars = vec![Bar(10.0); 100];
        assert!(!IchimokuDetector::default().detect(&bars).found);
    }

    #[test]
    fn test_ichimoku_min_bars() {
        assert_eq!(IchimokuDetector::default().min_bars(), 78);
    }
}
