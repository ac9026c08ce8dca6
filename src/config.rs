//! Configuration for significance analysis
//!
//! Every threshold that shapes the null model lives here rather than as a
//! constant in the algorithms, so runs can be reproduced from a TOML file.

use crate::cv::CvOptions;
use crate::decomposition::DecompositionFallback;
use crate::error::{NpfgaError, Result};
use crate::graph::CorrelationMeasure;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Operator cost table used to derive node complexities for phasing
pub fn default_op_complexity() -> BTreeMap<String, f64> {
    [
        ("I", 0.0),
        ("r", 0.75),
        ("2", 0.75),
        ("s", 1.00),
        ("|", 1.25),
        ("e", 1.50),
        ("l", 1.50),
        ("*", 1.75),
        (":", 2.00),
        ("+", 2.25),
        ("-", 2.25),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Configuration for null-distribution estimation and permutation testing
///
/// # Example
/// ```
/// use npfga::config::AnalysisConfig;
///
/// let config = AnalysisConfig::default();
/// assert_eq!(config.tail_fraction, 0.01);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Fraction of the null sample treated as the tail (peaks over threshold)
    ///
    /// - 0.01 (default): top 1% of randomized-control covariances per channel
    /// - larger values give a more stable but less extreme pivot
    pub tail_fraction: f64,

    /// Number of bootstrap resamples of the true data (0 = no bootstrapping)
    pub bootstrap: usize,

    /// Stratify bootstrap resamples by target class (`y < threshold` vs rest)
    pub bootstrap_by_mode: bool,

    /// Class boundary used when `bootstrap_by_mode` is set
    pub bootstrap_mode_threshold: f64,

    /// Seed for the analysis RNG; `None` draws from OS entropy
    pub seed: Option<u64>,

    /// How node values are correlated with the target (`moment` or `rank`)
    pub correlation_measure: CorrelationMeasure,

    /// Multiply exceedances by the fitted tail weight instead of 1
    ///
    /// The weight is always computed; applying it is off by default.
    pub apply_fitted_tail_weight: bool,

    /// Percentile of the observed statistic used as the phase edge (100 = max)
    pub edge_percentile: f64,

    /// Null percentiles averaged into the phase offset
    pub null_edge_percentiles: Vec<f64>,

    /// Per-operator complexity cost
    pub op_complexity: BTreeMap<String, f64>,

    /// Behavior when no decomposition candidate passes the root filter
    pub decomposition_fallback: DecompositionFallback,

    /// Directory for whitespace-delimited diagnostic tables
    pub dump_dir: Option<PathBuf>,

    /// Cross-validation settings
    pub cv: CvOptions,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            tail_fraction: 0.01,
            bootstrap: 0,
            bootstrap_by_mode: false,
            bootstrap_mode_threshold: 0.5,
            seed: None,
            correlation_measure: CorrelationMeasure::Moment,
            apply_fitted_tail_weight: false,
            edge_percentile: 100.0,
            null_edge_percentiles: vec![10.0],
            op_complexity: default_op_complexity(),
            decomposition_fallback: DecompositionFallback::BestScore,
            dump_dir: None,
            cv: CvOptions::default(),
        }
    }
}

impl AnalysisConfig {
    /// Narrow tail, heavy bootstrap, and no silent decomposition fallback
    pub fn strict() -> Self {
        Self {
            tail_fraction: 0.005,
            bootstrap: 100,
            null_edge_percentiles: vec![5.0, 10.0],
            decomposition_fallback: DecompositionFallback::Fail,
            ..Self::default()
        }
    }

    /// Wide tail, no bootstrap
    pub fn permissive() -> Self {
        Self {
            tail_fraction: 0.05,
            bootstrap: 0,
            null_edge_percentiles: vec![25.0],
            ..Self::default()
        }
    }

    /// Load from a TOML file; missing keys fall back to defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// RNG for one analysis batch, seeded once if a seed is configured
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.tail_fraction > 0.0 && self.tail_fraction < 1.0) {
            return Err(NpfgaError::config(format!(
                "tail_fraction must be in (0, 1), got {}",
                self.tail_fraction
            )));
        }

        if !(0.0..=100.0).contains(&self.edge_percentile) {
            return Err(NpfgaError::config(format!(
                "edge_percentile must be in [0, 100], got {}",
                self.edge_percentile
            )));
        }

        if self.null_edge_percentiles.is_empty() {
            return Err(NpfgaError::config(
                "null_edge_percentiles must contain at least one percentile",
            ));
        }

        if let Some(p) = self
            .null_edge_percentiles
            .iter()
            .find(|p| !(0.0..=100.0).contains(*p))
        {
            return Err(NpfgaError::config(format!(
                "null edge percentile must be in [0, 100], got {p}"
            )));
        }

        if let Some((op, cost)) = self.op_complexity.iter().find(|(_, c)| **c < 0.0) {
            return Err(NpfgaError::config(format!(
                "complexity of operator '{op}' must be non-negative, got {cost}"
            )));
        }

        self.cv.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cv::CvMode;

    #[test]
    fn test_default_config() {
        let config = AnalysisConfig::default();
        assert_eq!(config.tail_fraction, 0.01);
        assert_eq!(config.bootstrap, 0);
        assert!(!config.apply_fitted_tail_weight);
        assert_eq!(config.null_edge_percentiles, vec![10.0]);
        assert_eq!(config.op_complexity["+"], 2.25);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_strict_config() {
        let config = AnalysisConfig::strict();
        assert_eq!(config.tail_fraction, 0.005);
        assert_eq!(config.decomposition_fallback, DecompositionFallback::Fail);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_permissive_config() {
        let config = AnalysisConfig::permissive();
        assert_eq!(config.tail_fraction, 0.05);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[allow(clippy::field_reassign_with_default)]
    fn test_invalid_tail_fraction() {
        let mut config = AnalysisConfig::default();
        config.tail_fraction = 1.0;
        assert!(config.validate().is_err());
        config.tail_fraction = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    #[allow(clippy::field_reassign_with_default)]
    fn test_invalid_null_percentiles() {
        let mut config = AnalysisConfig::default();
        config.null_edge_percentiles = vec![];
        assert!(config.validate().is_err());
        config.null_edge_percentiles = vec![150.0];
        assert!(config.validate().is_err());
    }

    #[test]
    #[allow(clippy::field_reassign_with_default)]
    fn test_negative_op_cost_rejected() {
        let mut config = AnalysisConfig::default();
        config.op_complexity.insert("e".to_string(), -1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = AnalysisConfig::from_toml_str(
            r#"
            tail_fraction = 0.1
            bootstrap = 5
            seed = 7

            [cv]
            mode = "mc"
            n_mccv = 3
            f_mccv = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(config.tail_fraction, 0.1);
        assert_eq!(config.bootstrap, 5);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.cv.mode, CvMode::MonteCarlo);
        assert_eq!(config.cv.n_mccv, 3);
        // untouched keys keep their defaults
        assert_eq!(config.null_edge_percentiles, vec![10.0]);
        assert_eq!(config.correlation_measure, CorrelationMeasure::Moment);
    }

    #[test]
    fn test_from_toml_correlation_and_fallback() {
        let config = AnalysisConfig::from_toml_str(
            r#"
            correlation_measure = "rank"
            decomposition_fallback = "fail"
            "#,
        )
        .unwrap();
        assert_eq!(config.correlation_measure, CorrelationMeasure::Rank);
        assert_eq!(config.decomposition_fallback, DecompositionFallback::Fail);
        assert!(AnalysisConfig::from_toml_str(r#"correlation_measure = "mixed""#).is_err());
    }

    #[test]
    fn test_from_toml_unknown_cv_mode_fails() {
        let result = AnalysisConfig::from_toml_str(
            r#"
            [cv]
            mode = "kfold"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        use rand::Rng;
        let config = AnalysisConfig {
            seed: Some(42),
            ..AnalysisConfig::default()
        };
        let mut r1 = config.rng();
        let mut r2 = config.rng();
        let s1: Vec<u32> = (0..5).map(|_| r1.gen()).collect();
        let s2: Vec<u32> = (0..5).map(|_| r2.gen()).collect();
        assert_eq!(s1, s2);
    }
}
