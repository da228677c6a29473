//! Support / resistance break detector
//!
//! Swing highs and lows of the recent history are clustered into price
//! levels. A level touched often enough that the latest bar closes through
//! is reported as a breakout (resistance crossed upward) or a breakdown
//! (support crossed downward).

use std::collections::HashMap;

use super::helpers::{details, flag, tail, volume_ratio, Series};
use crate::{
    extrema::{find_local_maxima, find_local_minima},
    params::{get_factor, get_period, get_ratio, ParamMeta, ParameterizedDetector},
    DetectionResult, Direction, PatternDetector, PatternId, Period, Ratio, Result, Timeframe,
    OHLCV,
};

/// Which side of price a level was found on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelKind {
    Support,
    Resistance,
}

/// Clustered price level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Level {
    pub kind: LevelKind,
    pub price: f64,
    pub touches: usize,
}

/// Greedy clustering: each unused candidate anchors a cluster that absorbs
/// every later-unused candidate within `tolerance` of the anchor price.
///
/// Clusters are returned most-touched first; equal counts keep discovery
/// order. An empty result is returned when `closes` has no range.
pub fn cluster_levels(candidates: &[(LevelKind, f64)], closes: &[f64], tolerance: f64) -> Vec<Level> {
    let lo = closes.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = closes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = hi - lo;
    if candidates.is_empty() || range.is_nan() || range <= 0.0 {
        return Vec::new();
    }

    let mut used = vec![false; candidates.len()];
    let mut levels = Vec::new();
    for (i, &(kind, anchor)) in candidates.iter().enumerate() {
        if used[i] {
            continue;
        }
        used[i] = true;
        let (mut sum, mut count, mut resistances) = (anchor, 1usize, usize::from(kind == LevelKind::Resistance));
        for (j, &(other_kind, price)) in candidates.iter().enumerate() {
            if used[j] || anchor <= 0.0 || (anchor - price).abs() / anchor >= tolerance {
                continue;
            }
            used[j] = true;
            sum += price;
            count += 1;
            resistances += usize::from(other_kind == LevelKind::Resistance);
        }
        let kind = if resistances >= count - resistances {
            LevelKind::Resistance
        } else {
            LevelKind::Support
        };
        levels.push(Level {
            kind,
            price: sum / count as f64,
            touches: count,
        });
    }
    levels.sort_by(|a, b| b.touches.cmp(&a.touches));
    levels
}

/// Close through a level touched at least `min_touches` times.
#[derive(Debug, Clone)]
pub struct SupportResistanceDetector {
    /// History bars searched for levels (the latest two bars excluded).
    pub lookback: Period,
    pub min_touches: Period,
    /// Relative distance within which swing points belong to one level.
    pub level_tolerance: Ratio,
    /// Breakout volume multiple of the trailing average that earns the bonus.
    pub volume_factor: f64,
    pub volume_lookback: Period,
    /// Distance from the broken level to the projected next level.
    pub target_offset: Ratio,
    pub order: Period,
}

impl Default for SupportResistanceDetector {
    fn default() -> Self {
        Self {
            lookback: Period::new_const(50),
            min_touches: Period::new_const(3),
            level_tolerance: Ratio::new_const(0.005),
            volume_factor: 1.5,
            volume_lookback: Period::new_const(20),
            target_offset: Ratio::new_const(0.03),
            order: Period::new_const(3),
        }
    }
}

impl PatternDetector for SupportResistanceDetector {
    fn id(&self) -> PatternId {
        PatternId::SupportResistanceBreak
    }

    fn min_bars(&self) -> usize {
        self.lookback.get() + 5
    }

    fn supported_timeframes(&self) -> &'static [Timeframe] {
        &[Timeframe::H1, Timeframe::H4, Timeframe::D1]
    }

    fn detect<T: OHLCV>(&self, bars: &[T]) -> DetectionResult {
        let not_found = DetectionResult::not_found(self.id());
        if bars.len() < self.min_bars() {
            return not_found;
        }
        let s = Series::from_bars(tail(bars, self.min_bars()));
        let n = s.len();
        let history = n - 2;
        let (highs, lows, closes) = (&s.highs[..history], &s.lows[..history], &s.closes[..history]);

        let order = self.order.get();
        let candidates: Vec<(LevelKind, f64)> = find_local_maxima(highs, order)
            .into_iter()
            .map(|i| (LevelKind::Resistance, highs[i]))
            .chain(
                find_local_minima(lows, order)
                    .into_iter()
                    .map(|i| (LevelKind::Support, lows[i])),
            )
            .collect();
        let levels = cluster_levels(&candidates, closes, self.level_tolerance.get());

        let close = s.closes[n - 1];
        let prev_close = s.closes[n - 2];
        let ratio = volume_ratio(&s.volumes, self.volume_lookback.get());
        let confirmed = ratio >= self.volume_factor;
        let offset = self.target_offset.get();

        for level in levels.iter().filter(|l| l.touches >= self.min_touches.get()) {
            let price = level.price;
            let (direction, support, resistance) = match level.kind {
                LevelKind::Resistance if prev_close < price && close > price => {
                    (Direction::Bullish, price, price * (1.0 + offset))
                }
                LevelKind::Support if prev_close > price && close < price => {
                    (Direction::Bearish, price * (1.0 - offset), price)
                }
                _ => continue,
            };

            let touch_score = (level.touches as f64 / 5.0).min(1.0);
            let vol_score = if confirmed {
                ((ratio - 1.0) / 2.0).min(1.0)
            } else {
                0.0
            };
            return DetectionResult::found(
                self.id(),
                direction,
                60.0 + touch_score * 20.0 + vol_score * 20.0,
                details([
                    ("level_price", price),
                    ("touches", level.touches as f64),
                    ("volume_ratio", ratio),
                    ("volume_confirmed", flag(confirmed)),
                    ("support", support),
                    ("resistance", resistance),
                    ("current_close", close),
                ]),
            );
        }

        not_found
    }
}

static SUPPORT_RESISTANCE_PARAMS: &[ParamMeta] = &[
    ParamMeta::period("lookback", 50.0, (30.0, 120.0, 10.0), "History searched for levels"),
    ParamMeta::period("min_touches", 3.0, (2.0, 6.0, 1.0), "Touches that make a level"),
    ParamMeta::ratio(
        "level_tolerance",
        0.005,
        (0.001, 0.02, 0.001),
        "Relative distance grouping swing points into one level",
    ),
    ParamMeta::factor("volume_factor", 1.5, (1.0, 3.0, 0.1), "Breakout volume multiple"),
    ParamMeta::period("volume_lookback", 20.0, (5.0, 50.0, 5.0), "Volume average window"),
    ParamMeta::ratio("target_offset", 0.03, (0.01, 0.1, 0.005), "Projected next level distance"),
    ParamMeta::period("order", 3.0, (2.0, 6.0, 1.0), "Swing point neighbourhood"),
];

impl ParameterizedDetector for SupportResistanceDetector {
    fn param_meta() -> &'static [ParamMeta] {
        SUPPORT_RESISTANCE_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            lookback: get_period(params, "lookback", 50)?,
            min_touches: get_period(params, "min_touches", 3)?,
            level_tolerance: get_ratio(params, "level_tolerance", 0.005)?,
            volume_factor: get_factor(params, "volume_factor", 1.5)?,
            volume_lookback: get_period(params, "volume_lookback", 20)?,
            target_offset: get_ratio(params, "target_offset", 0.03)?,
            order: get_period(params, "order", 3)?,
        })
    }
}
