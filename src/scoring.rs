//! Risk/reward scoring and conflict resolution
//!
//! The trade setup is derived from a detection's key levels the same way for
//! every pattern:
//!
//! | direction | entry                                   | stop                          |
//! |-----------|-----------------------------------------|-------------------------------|
//! | bullish   | resistance, else neckline, else price   | support, else entry - 4%      |
//! | bearish   | support, else neckline, else price      | resistance, else entry + 4%   |
//!
//! The first take-profit sits three risk units beyond the entry.

use serde::Serialize;

use crate::{DetectionResult, Direction, PatternId};

/// Take-profit distance in multiples of the entry-to-stop distance.
pub const TAKE_PROFIT_MULTIPLE: f64 = 3.0;
/// Stop offset from entry when the opposing level is missing.
pub const FALLBACK_STOP: f64 = 0.04;

/// Entry, stop and first target derived from a detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TradeSetup {
    pub direction: Direction,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// `None` when entry and stop coincide.
    pub risk_reward: Option<f64>,
}

/// Usable price level: present, finite and positive.
fn level(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// Derive the trade setup for a found, directional detection.
///
/// Returns `None` for neutral results or when no usable entry exists.
pub fn trade_setup(result: &DetectionResult, current_price: f64) -> Option<TradeSetup> {
    let price = level(Some(current_price));
    let (entry, stop_loss, take_profit) = match result.direction {
        Direction::Bullish => {
            let entry = level(result.resistance())
                .or_else(|| level(result.neckline()))
                .or(price)?;
            let stop = level(result.support()).unwrap_or(entry * (1.0 - FALLBACK_STOP));
            (entry, stop, entry + (entry - stop) * TAKE_PROFIT_MULTIPLE)
        }
        Direction::Bearish => {
            let entry = level(result.support())
                .or_else(|| level(result.neckline()))
                .or(price)?;
            let stop = level(result.resistance()).unwrap_or(entry * (1.0 + FALLBACK_STOP));
            (entry, stop, entry - (stop - entry) * TAKE_PROFIT_MULTIPLE)
        }
        Direction::Neutral => return None,
    };

    let risk = (entry - stop_loss).abs();
    let reward = (take_profit - entry).abs();
    // Rounded so that float noise never drops an exact 3.0 below a 3.0 threshold.
    let risk_reward = (risk > 0.0)
        .then(|| reward / risk)
        .filter(|rr| rr.is_finite())
        .map(|rr| (rr * 1e6).round() / 1e6);

    Some(TradeSetup {
        direction: result.direction,
        entry,
        stop_loss,
        take_profit,
        risk_reward,
    })
}

/// Risk/reward ratio of a detection, `None` when undefined.
pub fn risk_reward(result: &DetectionResult, current_price: f64) -> Option<f64> {
    trade_setup(result, current_price).and_then(|s| s.risk_reward)
}

// ============================================================
// CONFLICT RESOLUTION
// ============================================================

/// Detection that passed the confidence and R/R thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredDetection {
    pub pattern_id: PatternId,
    pub direction: Direction,
    pub confidence: f64,
    pub risk_reward: f64,
}

impl ScoredDetection {
    /// `weight x confidence x R/R`
    pub fn score(&self) -> f64 {
        f64::from(self.pattern_id.weight()) * self.confidence * self.risk_reward
    }
}

/// Outcome of weighing bullish against bearish detections for one asset and
/// timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Resolution {
    pub bullish_score: f64,
    pub bearish_score: f64,
    /// Side allowed to alert; `None` on an exact tie between both sides.
    pub winner: Option<Direction>,
    pub conflicted: bool,
}

impl Resolution {
    /// Whether detections in `direction` may still alert.
    pub fn allows(&self, direction: Direction) -> bool {
        !self.conflicted || self.winner == Some(direction)
    }
}

/// Sum scores per side; the higher total wins when both sides are present.
pub fn resolve_conflicts(detections: &[ScoredDetection]) -> Resolution {
    let side_total = |dir: Direction| -> (bool, f64) {
        detections
            .iter()
            .filter(|d| d.direction == dir)
            .fold((false, 0.0), |(_, sum), d| (true, sum + d.score()))
    };
    let (has_bull, bullish_score) = side_total(Direction::Bullish);
    let (has_bear, bearish_score) = side_total(Direction::Bearish);
    let conflicted = has_bull && has_bear;

    let winner = if conflicted {
        if bullish_score > bearish_score {
            Some(Direction::Bullish)
        } else if bearish_score > bullish_score {
            Some(Direction::Bearish)
        } else {
            None
        }
    } else if has_bull {
        Some(Direction::Bullish)
    } else if has_bear {
        Some(Direction::Bearish)
    } else {
        None
    };

    Resolution {
        bullish_score,
        bearish_score,
        winner,
        conflicted,
    }
}
