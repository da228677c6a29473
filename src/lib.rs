//! # chartscan - chart pattern scanner
//!
//! Detects classical technical-analysis chart patterns in OHLCV windows,
//! scores them with a confidence value and a risk/reward ratio, and drives
//! an alerting pass over configured assets and timeframes.
//!
//! ## Quick Start
//!
//! ```rust
//! use chartscan::prelude::*;
//!
//! // Create an engine with all ten detectors
//! let engine = EngineBuilder::new()
//!     .with_all_defaults()
//!     .build()
//!     .unwrap();
//!
//! // Scan a window (any type implementing OHLCV works)
//! let bars: Vec<PriceBar> = vec![];
//! let detections = engine.scan(&bars, Timeframe::D1);
//! assert!(detections.is_empty());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod detectors;
pub mod extrema;
pub mod indicators;
pub mod params;
pub mod scanner;
pub mod scoring;
pub mod sinks;

pub mod prelude {
    pub use crate::{
        // Detectors
        detectors::*,
        // Parameters
        params::{get_factor, get_period, get_ratio, ParamMeta, ParamType, ParameterizedDetector},
        // Scoring
        scoring::{resolve_conflicts, risk_reward, trade_setup, Resolution, TradeSetup},
        // Orchestration
        scanner::{
            Alert, AlertStore, MarketDataSource, Notifier, ScanJob, ScanReport, ScanSettings,
            Scanner,
        },
        AssetType,
        // Engine
        BuiltinDetector,
        DetectionResult,
        Details,
        Direction,
        EngineBuilder,
        OHLCVExt,
        // Core traits
        PatternDetector,
        PatternEngine,
        // Errors
        PatternError,
        PatternId,
        Period,
        // Types
        PriceBar,
        PriceWindow,
        Ratio,
        Result,
        Timeframe,
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, PatternError>;

/// Errors raised while validating data or configuration.
///
/// Detection itself never fails: detectors degrade to a not-found result.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} bars, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Invalid OHLCV at index {index}: {reason}")]
    InvalidOHLCV { index: usize, reason: &'static str },

    #[error("Timestamps not strictly ascending at index {index}")]
    UnorderedTimestamps { index: usize },

    #[error("Unknown pattern: {0}")]
    UnknownPattern(String),

    #[error("Unknown timeframe: {0}")]
    UnknownTimeframe(String),
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(PatternError::InvalidValue(
                "Ratio cannot be NaN or infinite",
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(PatternError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    /// Create a Ratio from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period in bars (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(PatternError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    /// Signed body: positive for a bullish candle.
    #[inline]
    fn signed_body(&self) -> f64 {
        self.close() - self.open()
    }

    #[inline]
    fn body(&self) -> f64 {
        self.signed_body().abs()
    }

    #[inline]
    fn body_top(&self) -> f64 {
        self.open().max(self.close())
    }

    #[inline]
    fn body_bottom(&self) -> f64 {
        self.open().min(self.close())
    }

    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    #[inline]
    fn is_bullish(&self) -> bool {
        self.close() > self.open()
    }

    #[inline]
    fn is_bearish(&self) -> bool {
        self.close() < self.open()
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        let prices = [self.open(), self.high(), self.low(), self.close()];
        if prices.iter().any(|p| p.is_nan()) || self.volume().is_nan() {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if prices.iter().any(|p| p.is_infinite()) || self.volume().is_infinite() {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if prices.iter().any(|p| *p <= 0.0) {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "non-positive price",
            });
        }
        if self.high() < self.low() {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "high < low",
            });
        }
        if self.volume() < 0.0 {
            return Err(PatternError::InvalidOHLCV {
                index: 0,
                reason: "negative volume",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

// ============================================================
// PRICE DATA
// ============================================================

/// One OHLCV observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for PriceBar {
    fn open(&self) -> f64 {
        self.open
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
        self.volume
    }
}

/// Validated, time-ordered sequence of bars for one asset and timeframe.
///
/// Timestamps are strictly ascending and every bar passes
/// [`OHLCVExt::validate`]. Detectors only ever borrow the bars.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceWindow {
    bars: Vec<PriceBar>,
}

impl PriceWindow {
    pub fn new(bars: Vec<PriceBar>) -> Result<Self> {
        for (i, bar) in bars.iter().enumerate() {
            bar.validate().map_err(|e| match e {
                PatternError::InvalidOHLCV { reason, .. } => {
                    PatternError::InvalidOHLCV { index: i, reason }
                }
                other => other,
            })?;
            if i > 0 && bars[i - 1].timestamp >= bar.timestamp {
                return Err(PatternError::UnorderedTimestamps { index: i });
            }
        }
        Ok(Self { bars })
    }

    #[inline]
    pub fn bars(&self) -> &[PriceBar] {
        &self.bars
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    #[inline]
    pub fn last(&self) -> Option<&PriceBar> {
        self.bars.last()
    }

    /// Keep only the most recent `n` bars.
    pub fn tail(mut self, n: usize) -> Self {
        if self.bars.len() > n {
            self.bars.drain(..self.bars.len() - n);
        }
        self
    }
}

/// Candle granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::H1, Timeframe::H4, Timeframe::D1];

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self> {
        Timeframe::ALL
            .into_iter()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| PatternError::UnknownTimeframe(s.to_string()))
    }
}

/// Market the asset trades on; the data source uses it to pick a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Crypto,
    Stock,
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AssetType::Crypto => "crypto",
            AssetType::Stock => "stock",
        })
    }
}

// ============================================================
// PATTERN IDS
// ============================================================

/// Closed set of chart patterns the scanner knows about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PatternId {
    DoubleTopBottom,
    HeadAndShoulders,
    #[serde(rename = "bull_bear_flag")]
    BullBearFlag,
    Triangles,
    GoldenDeathCross,
    RsiDivergence,
    Engulfing,
    SupportResistanceBreak,
    Ichimoku,
    AbcCorrection,
}

impl PatternId {
    /// Canonical detector order.
    pub const ALL: [PatternId; 10] = [
        PatternId::DoubleTopBottom,
        PatternId::HeadAndShoulders,
        PatternId::BullBearFlag,
        PatternId::Triangles,
        PatternId::GoldenDeathCross,
        PatternId::RsiDivergence,
        PatternId::Engulfing,
        PatternId::SupportResistanceBreak,
        PatternId::Ichimoku,
        PatternId::AbcCorrection,
    ];

    /// Stable string identifier, as stored with alerts.
    pub fn as_str(self) -> &'static str {
        match self {
            PatternId::DoubleTopBottom => "double_top_bottom",
            PatternId::HeadAndShoulders => "head_and_shoulders",
            PatternId::BullBearFlag => "bull_bear_flag",
            PatternId::Triangles => "triangles",
            PatternId::GoldenDeathCross => "golden_death_cross",
            PatternId::RsiDivergence => "rsi_divergence",
            PatternId::Engulfing => "engulfing",
            PatternId::SupportResistanceBreak => "support_resistance_break",
            PatternId::Ichimoku => "ichimoku",
            PatternId::AbcCorrection => "abc_correction",
        }
    }

    /// Human-readable name for messages.
    pub fn display_name(self) -> &'static str {
        match self {
            PatternId::DoubleTopBottom => "Double Top / Bottom",
            PatternId::HeadAndShoulders => "Head and Shoulders",
            PatternId::BullBearFlag => "Bull / Bear Flag",
            PatternId::Triangles => "Triangle",
            PatternId::GoldenDeathCross => "Golden / Death Cross",
            PatternId::RsiDivergence => "RSI Divergence",
            PatternId::Engulfing => "Engulfing Candle",
            PatternId::SupportResistanceBreak => "S/R Level Break",
            PatternId::Ichimoku => "Ichimoku Cloud",
            PatternId::AbcCorrection => "ABC Correction",
        }
    }

    /// Priority weight used to settle opposite-direction conflicts.
    pub fn weight(self) -> u32 {
        match self {
            PatternId::HeadAndShoulders => 10,
            PatternId::DoubleTopBottom | PatternId::GoldenDeathCross => 9,
            PatternId::Triangles | PatternId::SupportResistanceBreak => 8,
            PatternId::Ichimoku | PatternId::AbcCorrection => 7,
            PatternId::BullBearFlag => 6,
            PatternId::RsiDivergence => 5,
            PatternId::Engulfing => 4,
        }
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternId {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self> {
        PatternId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| PatternError::UnknownPattern(s.to_string()))
    }
}

/// Direction/bias of a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Neutral,
    Bearish,
}

impl Direction {
    #[inline]
    pub fn is_bullish(self) -> bool {
        matches!(self, Direction::Bullish)
    }

    #[inline]
    pub fn is_bearish(self) -> bool {
        matches!(self, Direction::Bearish)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Bullish => "bullish",
            Direction::Neutral => "neutral",
            Direction::Bearish => "bearish",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// DETECTION RESULT
// ============================================================

/// Named numeric evidence: key levels, pivot prices, bar offsets, flags
/// (booleans are stored as 1.0 / 0.0).
pub type Details = BTreeMap<&'static str, f64>;

/// Output of one detector invocation.
///
/// Not-found results always carry zero confidence and a neutral direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub pattern_id: PatternId,
    pub found: bool,
    pub direction: Direction,
    /// Heuristic score 0.0..=100.0
    pub confidence: f64,
    pub details: Details,
}

impl DetectionResult {
    pub fn not_found(pattern_id: PatternId) -> Self {
        Self {
            pattern_id,
            found: false,
            direction: Direction::Neutral,
            confidence: 0.0,
            details: Details::new(),
        }
    }

    /// Build a positive detection.
    ///
    /// Confidence is clamped to [0, 100] and rounded to one decimal. A
    /// non-finite confidence or evidence value turns the result into
    /// not-found, so NaN never reaches threshold comparisons.
    pub fn found(
        pattern_id: PatternId,
        direction: Direction,
        confidence: f64,
        details: Details,
    ) -> Self {
        if !confidence.is_finite() || details.values().any(|v| !v.is_finite()) {
            return Self::not_found(pattern_id);
        }
        let confidence = (confidence.clamp(0.0, 100.0) * 10.0).round() / 10.0;
        Self {
            pattern_id,
            found: true,
            direction,
            confidence,
            details,
        }
    }

    #[inline]
    pub fn detail(&self, key: &str) -> Option<f64> {
        self.details.get(key).copied()
    }

    pub fn support(&self) -> Option<f64> {
        self.detail("support")
    }

    pub fn resistance(&self) -> Option<f64> {
        self.detail("resistance")
    }

    pub fn neckline(&self) -> Option<f64> {
        self.detail("neckline")
    }
}

// ============================================================
// PATTERN DETECTOR TRAIT
// ============================================================

/// Contract shared by every chart-pattern detector.
///
/// Detectors are stateless: calling `detect` twice on the same bars yields
/// identical results. They never panic or error on well-formed input;
/// short windows and numeric degeneracies produce a not-found result.
pub trait PatternDetector: Send + Sync {
    fn id(&self) -> PatternId;

    /// Minimum window length the detector needs.
    fn min_bars(&self) -> usize;

    fn supported_timeframes(&self) -> &'static [Timeframe];

    /// Inspect the most recent bars of `bars` (oldest first).
    fn detect<T: OHLCV>(&self, bars: &[T]) -> DetectionResult;

    fn supports(&self, timeframe: Timeframe) -> bool {
        self.supported_timeframes().contains(&timeframe)
    }

    fn validate_config(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// BUILTIN DETECTORS - generated via macro
// ============================================================

use detectors::*;
use params::ParameterizedDetector;

/// Macro to generate BuiltinDetector enum without boilerplate.
/// Variant names match the `PatternId` variants.
macro_rules! define_builtin_detectors {
    (
        $(
            $variant:ident($detector:ty)
        ),* $(,)?
    ) => {
        /// All builtin detectors - enum dispatch over the closed pattern set
        #[derive(Debug, Clone)]
        pub enum BuiltinDetector {
            $($variant($detector)),*
        }

        impl BuiltinDetector {
            /// Detector with its default constants.
            pub fn default_for(id: PatternId) -> Self {
                match id {
                    $(PatternId::$variant => Self::$variant(<$detector>::default())),*
                }
            }

            /// Detector with constants overridden from `params`.
            pub fn with_params(
                id: PatternId,
                params: &std::collections::HashMap<&str, f64>,
            ) -> Result<Self> {
                Ok(match id {
                    $(PatternId::$variant => {
                        Self::$variant(<$detector as ParameterizedDetector>::with_params(params)?)
                    }),*
                })
            }

            pub fn param_meta(&self) -> &'static [params::ParamMeta] {
                match self {
                    $(Self::$variant(_) => <$detector as ParameterizedDetector>::param_meta()),*
                }
            }

            #[inline]
            pub fn detect<T: OHLCV>(&self, bars: &[T]) -> DetectionResult {
                match self {
                    $(Self::$variant(d) => PatternDetector::detect(d, bars)),*
                }
            }

            #[inline]
            pub fn id(&self) -> PatternId {
                match self {
                    $(Self::$variant(d) => PatternDetector::id(d)),*
                }
            }

            #[inline]
            pub fn min_bars(&self) -> usize {
                match self {
                    $(Self::$variant(d) => PatternDetector::min_bars(d)),*
                }
            }

            #[inline]
            pub fn supports(&self, timeframe: Timeframe) -> bool {
                match self {
                    $(Self::$variant(d) => PatternDetector::supports(d, timeframe)),*
                }
            }

            pub fn validate_config(&self) -> Result<()> {
                match self {
                    $(Self::$variant(d) => PatternDetector::validate_config(d)),*
                }
            }
        }
    };
}

define_builtin_detectors! {
    DoubleTopBottom(DoubleTopBottomDetector),
    HeadAndShoulders(HeadAndShouldersDetector),
    BullBearFlag(FlagDetector),
    Triangles(TriangleDetector),
    GoldenDeathCross(CrossDetector),
    RsiDivergence(RsiDivergenceDetector),
    Engulfing(EngulfingDetector),
    SupportResistanceBreak(SupportResistanceDetector),
    Ichimoku(IchimokuDetector),
    AbcCorrection(AbcCorrectionDetector),
}

// ============================================================
// PATTERN ENGINE
// ============================================================

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub pattern_filter: Option<Vec<PatternId>>,
}

/// Runs the enabled detectors over a window in a fixed order.
#[derive(Debug, Clone)]
pub struct PatternEngine {
    builtin: Vec<BuiltinDetector>,
    config: EngineConfig,
}

impl PatternEngine {
    /// Enabled detectors, in run order.
    pub fn detectors(&self) -> &[BuiltinDetector] {
        &self.builtin
    }

    /// Run every enabled detector that supports `timeframe` and return the
    /// positive detections in detector order.
    pub fn scan<T: OHLCV>(&self, bars: &[T], timeframe: Timeframe) -> Vec<DetectionResult> {
        self.builtin
            .iter()
            .filter(|d| self.is_enabled(d.id()) && d.supports(timeframe))
            .filter_map(|d| Self::run_detector(d, bars))
            .filter(|r| r.found)
            .collect()
    }

    #[inline]
    pub fn scan_window(&self, window: &PriceWindow, timeframe: Timeframe) -> Vec<DetectionResult> {
        self.scan(window.bars(), timeframe)
    }

    /// Run one detector, isolating a panic so sibling detectors still run.
    pub fn run_detector<T: OHLCV>(detector: &BuiltinDetector, bars: &[T]) -> Option<DetectionResult> {
        match panic::catch_unwind(AssertUnwindSafe(|| detector.detect(bars))) {
            Ok(result) => Some(result),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(pattern = %detector.id(), %reason, "detector panicked, skipping");
                None
            }
        }
    }

    fn is_enabled(&self, id: PatternId) -> bool {
        self.config
            .pattern_filter
            .as_ref()
            .map_or(true, |filter| filter.contains(&id))
    }

    fn validate(&self) -> Result<()> {
        for d in &self.builtin {
            d.validate_config()?;
        }
        Ok(())
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for creating PatternEngine instances
#[derive(Debug, Default)]
pub struct EngineBuilder {
    builtin: Vec<BuiltinDetector>,
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add all ten detectors with default constants, in canonical order
    pub fn with_all_defaults(self) -> Self {
        self.with_patterns(PatternId::ALL)
    }

    /// Add default detectors for the given patterns, in the given order
    pub fn with_patterns(mut self, ids: impl IntoIterator<Item = PatternId>) -> Self {
        self.builtin
            .extend(ids.into_iter().map(BuiltinDetector::default_for));
        self
    }

    /// Add with config validation
    pub fn add_checked(mut self, detector: BuiltinDetector) -> Result<Self> {
        detector.validate_config()?;
        self.builtin.push(detector);
        Ok(self)
    }

    /// Filter to specific patterns only
    pub fn only_patterns(mut self, ids: impl IntoIterator<Item = PatternId>) -> Self {
        self.config.pattern_filter = Some(ids.into_iter().collect());
        self
    }

    /// Build the engine
    pub fn build(self) -> Result<PatternEngine> {
        let engine = PatternEngine {
            builtin: self.builtin,
            config: self.config,
        };
        engine.validate()?;
        Ok(engine)
    }
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bar_at(i: i64, close: f64) -> PriceBar {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i);
        PriceBar::new(ts, close, close + 1.0, close - 1.0, close, 1000.0)
    }

    #[test]
    fn test_ratio_validation() {
        assert!(Ratio::new(0.0).is_ok());
        assert!(Ratio::new(1.0).is_ok());
        assert!(Ratio::new(0.5).is_ok());
        assert!(Ratio::new(-0.1).is_err());
        assert!(Ratio::new(1.1).is_err());
        assert!(Ratio::new(f64::NAN).is_err());
        assert!(Ratio::new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_period_validation() {
        assert!(Period::new(1).is_ok());
        assert!(Period::new(100).is_ok());
        assert!(Period::new(0).is_err());
    }

    #[test]
    fn test_ohlcv_ext() {
        let bar = bar_at(0, 100.0);
        let bar = PriceBar { close: 105.0, high: 110.0, low: 90.0, ..bar };
        assert_eq!(bar.body(), 5.0);
        assert_eq!(bar.range(), 20.0);
        assert_eq!(bar.body_top(), 105.0);
        assert_eq!(bar.body_bottom(), 100.0);
        assert!(bar.is_bullish());
        assert!(!bar.is_bearish());
    }

    #[test]
    fn test_window_rejects_unordered_timestamps() {
        let bars = vec![bar_at(1, 10.0), bar_at(0, 11.0)];
        assert!(matches!(
            PriceWindow::new(bars),
            Err(PatternError::UnorderedTimestamps { index: 1 })
        ));
        let dup = vec![bar_at(0, 10.0), bar_at(0, 11.0)];
        assert!(PriceWindow::new(dup).is_err());
    }

    #[test]
    fn test_window_rejects_invalid_bar() {
        let mut bars: Vec<PriceBar> = (0..3).map(|i| bar_at(i, 10.0)).collect();
        bars[2].high = 5.0;
        assert!(matches!(
            PriceWindow::new(bars),
            Err(PatternError::InvalidOHLCV { index: 2, reason: "high < low" })
        ));
    }

    #[test]
    fn test_window_tail() {
        let bars: Vec<PriceBar> = (0..10).map(|i| bar_at(i, 10.0 + i as f64)).collect();
        let window = PriceWindow::new(bars).unwrap().tail(4);
        assert_eq!(window.len(), 4);
        assert_eq!(window.bars()[0].close, 16.0);
        assert_eq!(window.last().unwrap().close, 19.0);
    }

    #[test]
    fn test_pattern_id_round_trip() {
        for id in PatternId::ALL {
            assert_eq!(id.as_str().parse::<PatternId>().unwrap(), id);
        }
        assert!("cup_and_handle".parse::<PatternId>().is_err());
    }

    #[test]
    fn test_timeframe_parse() {
        assert_eq!("4h".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert!("15m".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_found_clamps_and_rounds() {
        let r = DetectionResult::found(
            PatternId::Engulfing,
            Direction::Bullish,
            123.456,
            Details::new(),
        );
        assert_eq!(r.confidence, 100.0);
        let r = DetectionResult::found(
            PatternId::Engulfing,
            Direction::Bullish,
            71.26,
            Details::new(),
        );
        assert_eq!(r.confidence, 71.3);
    }

    #[test]
    fn test_found_with_nan_degrades() {
        let mut details = Details::new();
        details.insert("support", f64::NAN);
        let r = DetectionResult::found(PatternId::Triangles, Direction::Bearish, 70.0, details);
        assert!(!r.found);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.direction, Direction::Neutral);
    }

    #[test]
    fn test_engine_builder() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        assert_eq!(engine.detectors().len(), 10);
        let ids: Vec<PatternId> = engine.detectors().iter().map(|d| d.id()).collect();
        assert_eq!(ids, PatternId::ALL.to_vec());
    }

    #[test]
    fn test_empty_scan() {
        let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
        let bars: Vec<PriceBar> = vec![];
        assert!(engine.scan(&bars, Timeframe::D1).is_empty());
    }

    #[test]
    fn test_pattern_filter() {
        let engine = EngineBuilder::new()
            .with_all_defaults()
            .only_patterns([PatternId::Engulfing])
            .build()
            .unwrap();
        let bars: Vec<PriceBar> = (0..120).map(|i| bar_at(i, 100.0 + (i % 7) as f64)).collect();
        assert!(engine
            .scan(&bars, Timeframe::D1)
            .iter()
            .all(|r| r.pattern_id == PatternId::Engulfing));
    }

    #[test]
    fn test_weights() {
        assert_eq!(PatternId::HeadAndShoulders.weight(), 10);
        assert_eq!(PatternId::Engulfing.weight(), 4);
    }
}
