//! Parameter metadata for pattern detectors
//!
//! Every detector exposes its tuning constants through [`ParamMeta`], which
//! lets the YAML config override them by name.
//!
//! # Example
//!
//! ```rust
//! use std::collections::HashMap;
//!
//! use chartscan::params::{ParamMeta, ParamType, ParameterizedDetector};
//! use chartscan::prelude::*;
//!
//! for param in DoubleTopBottomDetector::param_meta() {
//!   println!("{}: {:?} (default: {})", param.name, param.param_type, param.default);
//! }
//!
//! let mut overrides = HashMap::new();
//! overrides.insert("peak_tolerance", 0.03);
//! let detector = DoubleTopBottomDetector::with_params(&overrides).unwrap();
//! assert_eq!(detector.peak_tolerance.get(), 0.03);
//! ```

use std::collections::HashMap;

use crate::{PatternError, Period, Ratio, Result};

// ============================================================
// PARAMETER TYPES
// ============================================================

/// Type of parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
  /// Ratio value (0.0..=1.0)
  Ratio,
  /// Period value (positive integer)
  Period,
  /// Positive multiplier, may exceed 1.0 (volume ratios, Fibonacci extensions)
  Factor,
}

/// Metadata for a single detector parameter
#[derive(Debug, Clone)]
pub struct ParamMeta {
  /// Parameter name (e.g., "peak_tolerance")
  pub name: &'static str,
  pub param_type: ParamType,
  pub default: f64,
  /// Accepted range: (min, max, step)
  pub range: (f64, f64, f64),
  pub description: &'static str,
}

impl ParamMeta {
  /// Create a new ParamMeta for a Ratio parameter
  pub const fn ratio(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Ratio, default, range, description }
  }

  /// Create a new ParamMeta for a Period parameter
  pub const fn period(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Period, default, range, description }
  }

  /// Create a new ParamMeta for a Factor parameter
  pub const fn factor(
    name: &'static str,
    default: f64,
    range: (f64, f64, f64),
    description: &'static str,
  ) -> Self {
    Self { name, param_type: ParamType::Factor, default, range, description }
  }

  /// Validate a value for this parameter
  pub fn validate(&self, value: f64) -> Result<()> {
    let (min, max, _) = self.range;
    if value.is_nan() || value < min || value > max {
      return Err(PatternError::OutOfRange { field: self.name, value, min, max });
    }
    match self.param_type {
      ParamType::Ratio => Ratio::new(value).map(|_| ()),
      ParamType::Period => {
        if value < 1.0 || value.fract() != 0.0 {
          return Err(PatternError::InvalidValue("Period must be a positive integer"));
        }
        Ok(())
      },
      ParamType::Factor => {
        if value <= 0.0 || value.is_infinite() {
          return Err(PatternError::InvalidValue("Factor must be positive and finite"));
        }
        Ok(())
      },
    }
  }
}

// ============================================================
// PARAMETERIZED DETECTOR TRAIT
// ============================================================

/// Trait for detectors whose constants can be overridden by name
pub trait ParameterizedDetector: Sized {
  /// Returns metadata for all configurable parameters
  fn param_meta() -> &'static [ParamMeta];

  /// Creates a detector with parameters from a HashMap
  ///
  /// Missing parameters use their default values.
  fn with_params(params: &HashMap<&str, f64>) -> Result<Self>;
}

/// Reject keys the detector does not know and values outside their range.
pub fn check_params(meta: &[ParamMeta], params: &HashMap<&str, f64>) -> Result<()> {
  for (key, value) in params {
    let Some(m) = meta.iter().find(|m| m.name == *key) else {
      return Err(PatternError::InvalidConfig(format!("unknown parameter '{key}'")));
    };
    m.validate(*value)?;
  }
  Ok(())
}

// ============================================================
// PARAMETER VALUE HELPERS
// ============================================================

/// Helper to get a Ratio from params with default fallback
pub fn get_ratio(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<Ratio> {
  let value = params.get(key).copied().unwrap_or(default);
  Ratio::new(value)
}

/// Helper to get a Period from params with default fallback
pub fn get_period(params: &HashMap<&str, f64>, key: &str, default: usize) -> Result<Period> {
  let value = params.get(key).copied().unwrap_or(default as f64);
  if value < 1.0 || value.fract() != 0.0 {
    return Err(PatternError::InvalidValue("Period must be a positive integer"));
  }
  Period::new(value as usize)
}

/// Helper to get a positive Factor from params with default fallback
pub fn get_factor(params: &HashMap<&str, f64>, key: &str, default: f64) -> Result<f64> {
  let value = params.get(key).copied().unwrap_or(default);
  if !value.is_finite() || value <= 0.0 {
    return Err(PatternError::InvalidValue("Factor must be positive and finite"));
  }
  Ok(value)
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_param_meta_ratio() {
    let meta = ParamMeta::ratio("test_ratio", 0.5, (0.3, 0.7, 0.1), "Test ratio parameter");

    assert_eq!(meta.name, "test_ratio");
    assert_eq!(meta.param_type, ParamType::Ratio);
    assert_eq!(meta.default, 0.5);
  }

  #[test]
  fn test_param_meta_factor() {
    let meta = ParamMeta::factor("volume_factor", 1.5, (1.0, 3.0, 0.25), "Volume multiple");
    assert_eq!(meta.param_type, ParamType::Factor);
    assert!(meta.validate(2.0).is_ok());
    assert!(meta.validate(0.5).is_err());
  }

  #[test]
  fn test_validate_period() {
    let meta = ParamMeta::period("test", 14.0, (10.0, 20.0, 2.0), "Test");

    assert!(meta.validate(14.0).is_ok());
    assert!(meta.validate(10.0).is_ok());
    assert!(meta.validate(20.0).is_ok());
    assert!(meta.validate(8.0).is_err());
    assert!(meta.validate(14.5).is_err());
    assert!(meta.validate(f64::NAN).is_err());
  }

  #[test]
  fn test_check_params() {
    let meta = [ParamMeta::ratio("tol", 0.02, (0.0, 0.1, 0.01), "Tolerance")];
    let mut params = HashMap::new();
    params.insert("tol", 0.05);
    assert!(check_params(&meta, &params).is_ok());

    params.insert("bogus", 1.0);
    assert!(matches!(check_params(&meta, &params), Err(PatternError::InvalidConfig(_))));
  }

  #[test]
  fn test_value_helpers() {
    let mut params = HashMap::new();
    params.insert("ratio", 0.8);
    params.insert("period", 20.0);
    params.insert("factor", 1.618);

    assert!((get_ratio(&params, "ratio", 0.5).unwrap().get() - 0.8).abs() < f64::EPSILON);
    assert!((get_ratio(&params, "missing", 0.5).unwrap().get() - 0.5).abs() < f64::EPSILON);
    assert_eq!(get_period(&params, "period", 14).unwrap().get(), 20);
    assert_eq!(get_period(&params, "missing", 14).unwrap().get(), 14);
    assert_eq!(get_factor(&params, "factor", 1.0).unwrap(), 1.618);
    assert!(get_factor(&params, "missing", -1.0).is_err());
  }
}
