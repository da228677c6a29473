//! Property tests over random price walks.

use chartscan::extrema::{find_local_maxima, find_local_minima};
use chartscan::prelude::*;
use chartscan::scoring::ScoredDetection;
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
struct TestBar {
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

impl OHLCV for TestBar {
    fn open(&self) -> f64 {
        self.o
    }

    fn high(&self) -> f64 {
        self.h
    }

    fn low(&self) -> f64 {
        self.l
    }

    fn close(&self) -> f64 {
        self.c
    }

    fn volume(&self) -> f64 {
        self.v
    }
}

/// Multiplicative random walk starting at 100; prices stay positive.
fn walk() -> impl Strategy<Value = Vec<TestBar>> {
    prop::collection::vec((-3.0f64..3.0, 0.0f64..1.5, 100.0f64..5000.0), 0..300).prop_map(|steps| {
        let mut price = 100.0;
        steps
            .into_iter()
            .map(|(pct, wick, v)| {
                let o = price;
                let c = price * (1.0 + pct / 100.0);
                price = c;
                TestBar {
                    o,
                    h: o.max(c) * (1.0 + wick / 100.0),
                    l: o.min(c) * (1.0 - wick / 100.0),
                    c,
                    v,
                }
            })
            .collect()
    })
}

fn pattern_id() -> impl Strategy<Value = PatternId> {
    prop::sample::select(PatternId::ALL.to_vec())
}

fn direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Bullish), Just(Direction::Bearish)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn detection_results_are_well_formed(bars in walk()) {
        for id in PatternId::ALL {
            let result = BuiltinDetector::default_for(id).detect(&bars);
            prop_assert_eq!(result.pattern_id, id);
            if result.found {
                prop_assert!((0.0..=100.0).contains(&result.confidence));
                prop_assert_ne!(result.direction, Direction::Neutral);
                prop_assert!(result.details.values().all(|v| v.is_finite()));
                prop_assert!(result.details.contains_key("current_close"));
            } else {
                prop_assert_eq!(result.confidence, 0.0);
                prop_assert_eq!(result.direction, Direction::Neutral);
                prop_assert!(result.details.is_empty());
            }
        }
    }

    #[test]
    fn detection_is_idempotent(bars in walk()) {
        for id in PatternId::ALL {
            let detector = BuiltinDetector::default_for(id);
            prop_assert_eq!(detector.detect(&bars), detector.detect(&bars));
        }
    }

    #[test]
    fn risk_reward_is_three_to_one(bars in walk()) {
        let Some(price) = bars.last().map(|b| b.c) else {
            return Ok(());
        };
        for id in PatternId::ALL {
            let result = BuiltinDetector::default_for(id).detect(&bars);
            if let Some(rr) = risk_reward(&result, price) {
                prop_assert!((rr - 3.0).abs() < 1e-3, "{} r/r {}", id, rr);
            }
        }
    }

    #[test]
    fn extrema_dominate_their_neighbourhood(
        series in prop::collection::vec(1.0f64..200.0, 0..120),
        order in 1usize..8,
    ) {
        let maxima = find_local_maxima(&series, order);
        let minima = find_local_minima(&series, order);
        if series.len() < 2 * order + 1 {
            prop_assert!(maxima.is_empty() && minima.is_empty());
        }
        prop_assert!(maxima.windows(2).all(|w| w[0] < w[1]));
        prop_assert!(minima.windows(2).all(|w| w[0] < w[1]));
        for &i in &maxima {
            let lo = i.saturating_sub(order);
            let hi = (i + order).min(series.len() - 1);
            prop_assert!(series[lo..=hi].iter().all(|&v| series[i] >= v));
        }
        for &i in &minima {
            let lo = i.saturating_sub(order);
            let hi = (i + order).min(series.len() - 1);
            prop_assert!(series[lo..=hi].iter().all(|&v| series[i] <= v));
        }
    }

    #[test]
    fn conflict_winner_is_always_allowed(
        entries in prop::collection::vec((pattern_id(), direction(), 65.0f64..100.0), 0..8),
    ) {
        let scored: Vec<ScoredDetection> = entries
            .iter()
            .map(|&(pattern_id, direction, confidence)| ScoredDetection {
                pattern_id,
                direction,
                confidence,
                risk_reward: 3.0,
            })
            .collect();
        let res = resolve_conflicts(&scored);
        if let Some(winner) = res.winner {
            prop_assert!(res.allows(winner));
        }
        let sides = scored.iter().map(|s| s.direction).collect::<std::collections::HashSet<_>>();
        prop_assert_eq!(res.conflicted, sides.len() == 2);
        if !res.conflicted {
            for s in &scored {
                prop_assert!(res.allows(s.direction));
            }
        }
    }
}
