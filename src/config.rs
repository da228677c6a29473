//! YAML scanner configuration
//!
//! ```yaml
//! scanner:
//!   min_confidence: 65
//!   min_rr: 3.0
//!   alert_cooldown_hours: 24
//!   patterns_enabled: [double_top_bottom, triangles]
//!   detectors:
//!     triangles: { flat_tolerance: 0.02 }
//! assets:
//!   crypto:
//!     - { symbol: BTC/USDT, timeframes: [1h, 4h] }
//!   stocks:
//!     - { symbol: AAPL }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    params::check_params,
    scanner::{ScanJob, ScanSettings},
    AssetType, BuiltinDetector, EngineBuilder, PatternEngine, PatternError, PatternId, Timeframe,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// `scanner:` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub min_confidence: f64,
    pub min_rr: f64,
    pub alert_cooldown_hours: u32,
    pub resolve_conflicts: bool,
    pub parallel: bool,
    pub patterns_enabled: Vec<PatternId>,
    /// Per-detector constant overrides, keyed by parameter name.
    pub detectors: BTreeMap<PatternId, HashMap<String, f64>>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        let settings = ScanSettings::default();
        Self {
            min_confidence: settings.min_confidence,
            min_rr: settings.min_rr,
            alert_cooldown_hours: settings.cooldown_hours,
            resolve_conflicts: settings.resolve_conflicts,
            parallel: settings.parallel,
            patterns_enabled: PatternId::ALL.to_vec(),
            detectors: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframes: Option<Vec<Timeframe>>,
}

/// `assets:` section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    pub crypto: Vec<AssetEntry>,
    pub stocks: Vec<AssetEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub assets: AssetsConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&text)?;
        debug!(path = %path.display(), jobs = config.jobs().len(), "configuration loaded");
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line threshold overrides, then re-validate.
    pub fn with_overrides(
        mut self,
        min_confidence: Option<f64>,
        min_rr: Option<f64>,
        parallel: bool,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = min_confidence {
            self.scanner.min_confidence = v;
        }
        if let Some(v) = min_rr {
            self.scanner.min_rr = v;
        }
        self.scanner.parallel |= parallel;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scanner;
        if !(0.0..=100.0).contains(&s.min_confidence) {
            return Err(ConfigError::Invalid(format!(
                "min_confidence must be within 0..=100, got {}",
                s.min_confidence
            )));
        }
        if !s.min_rr.is_finite() || s.min_rr < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "min_rr must be a non-negative number, got {}",
                s.min_rr
            )));
        }
        if s.patterns_enabled.is_empty() {
            return Err(ConfigError::Invalid("patterns_enabled is empty".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = s.patterns_enabled.iter().find(|id| !seen.insert(**id)) {
            return Err(ConfigError::Invalid(format!("pattern '{dup}' enabled twice")));
        }
        for (id, overrides) in &s.detectors {
            let params = borrow_params(overrides);
            check_params(BuiltinDetector::default_for(*id).param_meta(), &params)
                .map_err(|e| ConfigError::Invalid(format!("{id}: {e}")))?;
        }
        if let Some(entry) = self
            .assets
            .crypto
            .iter()
            .chain(&self.assets.stocks)
            .find(|a| a.symbol.trim().is_empty() || a.timeframes.as_ref().is_some_and(Vec::is_empty))
        {
            return Err(ConfigError::Invalid(format!(
                "asset '{}' needs a symbol and at least one timeframe",
                entry.symbol
            )));
        }
        Ok(())
    }

    pub fn settings(&self) -> ScanSettings {
        let s = &self.scanner;
        ScanSettings {
            min_confidence: s.min_confidence,
            min_rr: s.min_rr,
            cooldown_hours: s.alert_cooldown_hours,
            resolve_conflicts: s.resolve_conflicts,
            parallel: s.parallel,
        }
    }

    /// Engine with the enabled detectors, in `patterns_enabled` order.
    pub fn build_engine(&self) -> Result<PatternEngine, ConfigError> {
        let invalid = |id: PatternId| move |e: PatternError| ConfigError::Invalid(format!("{id}: {e}"));
        let mut builder = EngineBuilder::new();
        for &id in &self.scanner.patterns_enabled {
            let detector = match self.scanner.detectors.get(&id) {
                Some(overrides) => {
                    BuiltinDetector::with_params(id, &borrow_params(overrides)).map_err(invalid(id))?
                }
                None => BuiltinDetector::default_for(id),
            };
            builder = builder.add_checked(detector).map_err(invalid(id))?;
        }
        builder
            .build()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Crypto jobs first, then stocks; each asset's timeframes in listed order.
    pub fn jobs(&self) -> Vec<ScanJob> {
        let expand = |entries: &[AssetEntry], asset_type: AssetType, default_tf: Timeframe| {
            entries
                .iter()
                .flat_map(move |a| {
                    let tfs = a.timeframes.clone().unwrap_or_else(|| vec![default_tf]);
                    tfs.into_iter()
                        .map(move |tf| ScanJob::new(a.symbol.clone(), tf, asset_type))
                })
                .collect::<Vec<_>>()
        };
        let mut jobs = expand(&self.assets.crypto, AssetType::Crypto, Timeframe::H1);
        jobs.extend(expand(&self.assets.stocks, AssetType::Stock, Timeframe::D1));
        jobs
    }
}

fn borrow_params(overrides: &HashMap<String, f64>) -> HashMap<&str, f64> {
    overrides.iter().map(|(k, v)| (k.as_str(), *v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
scanner:
  min_confidence: 70
  alert_cooldown_hours: 12
  patterns_enabled: [triangles, double_top_bottom]
  detectors:
    triangles: { flat_tolerance: 0.02 }
assets:
  crypto:
    - { symbol: BTC/USDT, timeframes: [1h, 4h] }
    - { symbol: ETH/USDT }
  stocks:
    - { symbol: AAPL }
telegram:
  enabled: false
"#;

    #[test]
    fn test_defaults_when_empty() {
        let config = Config::from_yaml_str("{}").unwrap();
        assert_eq!(config.settings(), ScanSettings::default());
        assert_eq!(config.scanner.patterns_enabled, PatternId::ALL.to_vec());
        assert!(config.jobs().is_empty());
        assert_eq!(config.build_engine().unwrap().detectors().len(), 10);
    }

    #[test]
    fn test_sample_config() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        let settings = config.settings();
        assert_eq!(settings.min_confidence, 70.0);
        assert_eq!(settings.min_rr, 3.0);
        assert_eq!(settings.cooldown_hours, 12);

        let jobs = config.jobs();
        assert_eq!(
            jobs,
            vec![
                ScanJob::new("BTC/USDT", Timeframe::H1, AssetType::Crypto),
                ScanJob::new("BTC/USDT", Timeframe::H4, AssetType::Crypto),
                ScanJob::new("ETH/USDT", Timeframe::H1, AssetType::Crypto),
                ScanJob::new("AAPL", Timeframe::D1, AssetType::Stock),
            ]
        );

        let engine = config.build_engine().unwrap();
        let ids: Vec<_> = engine.detectors().iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec![PatternId::Triangles, PatternId::DoubleTopBottom]);
        match &engine.detectors()[0] {
            BuiltinDetector::Triangles(d) => assert_eq!(d.flat_tolerance.get(), 0.02),
            other => panic!("unexpected detector {other:?}"),
        }
    }

    #[test]
    fn test_unknown_pattern_rejected() {
        let err = Config::from_yaml_str("scanner: { patterns_enabled: [cup_and_handle] }").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_unknown_timeframe_rejected() {
        let yaml = "assets: { crypto: [ { symbol: BTC/USDT, timeframes: [15m] } ] }";
        assert!(matches!(Config::from_yaml_str(yaml), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_bad_override_rejected() {
        let yaml = "scanner: { detectors: { triangles: { bogus: 1.0 } } }";
        assert!(matches!(Config::from_yaml_str(yaml), Err(ConfigError::Invalid(_))));
        let yaml = "scanner: { detectors: { double_top_bottom: { peak_tolerance: 5.0 } } }";
        assert!(matches!(Config::from_yaml_str(yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_cli_overrides_win() {
        let config = Config::from_yaml_str(SAMPLE)
            .unwrap()
            .with_overrides(Some(80.0), Some(2.5), true)
            .unwrap();
        let settings = config.settings();
        assert_eq!(settings.min_confidence, 80.0);
        assert_eq!(settings.min_rr, 2.5);
        assert!(settings.parallel);

        let err = Config::default().with_overrides(Some(120.0), None, false);
        assert!(matches!(err, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_and_empty_patterns() {
        let yaml = "scanner: { patterns_enabled: [engulfing, engulfing] }";
        assert!(matches!(Config::from_yaml_str(yaml), Err(ConfigError::Invalid(_))));
        let yaml = "scanner: { patterns_enabled: [] }";
        assert!(matches!(Config::from_yaml_str(yaml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
