//! Drift detection module
//!
//! Compares a window of live observations against the reference baseline,
//! one feature at a time, and aggregates the per-feature outcomes into a
//! dataset-level verdict.
//!
//! Threshold semantics are explicit: every method is paired with a
//! [`ThresholdRule`], and a value exactly on the threshold is not drift.

mod categorical;
mod data_drift;
mod detector;
mod feature_drift;
mod verdict;

pub use categorical::{CategoricalJensenShannon, ChiSquaredTest};
pub use data_drift::{JensenShannonDivergence, KolmogorovSmirnovTest, PopulationStabilityIndex};
pub use detector::{DriftDetector, ZERO_VARIANCE_REFERENCE};
pub use feature_drift::{FeatureDriftResult, FeatureStats, FeatureStatus};
pub use verdict::DatasetVerdict;

use crate::error::{AegisError, Result};
use crate::schema::{FeatureKind, MonitoredFeature, SchemaConfig};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Statistical comparison used for one feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftMethod {
    /// Two-sample Kolmogorov-Smirnov test (continuous)
    #[serde(alias = "ks")]
    KolmogorovSmirnov,
    /// Population Stability Index over reference quantile bins (continuous)
    #[serde(alias = "psi")]
    PopulationStability,
    /// Jensen-Shannon divergence (continuous or categorical)
    #[serde(alias = "js")]
    JensenShannon,
    /// Chi-squared homogeneity test (categorical)
    #[serde(alias = "chi2")]
    ChiSquared,
}

impl DriftMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftMethod::KolmogorovSmirnov => "kolmogorov_smirnov",
            DriftMethod::PopulationStability => "population_stability",
            DriftMethod::JensenShannon => "jensen_shannon",
            DriftMethod::ChiSquared => "chi_squared",
        }
    }

    /// Whether this method is defined for features of `kind`
    pub fn supports(&self, kind: FeatureKind) -> bool {
        match self {
            DriftMethod::KolmogorovSmirnov | DriftMethod::PopulationStability => {
                kind == FeatureKind::Continuous
            }
            DriftMethod::ChiSquared => kind == FeatureKind::Categorical,
            DriftMethod::JensenShannon => true,
        }
    }

    /// Hypothesis tests report a p-value; the rest report a distance score
    pub fn uses_p_value(&self) -> bool {
        matches!(self, DriftMethod::KolmogorovSmirnov | DriftMethod::ChiSquared)
    }
}

impl fmt::Display for DriftMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a test outcome is turned into a drifted flag
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", content = "value", rename_all = "snake_case")]
pub enum ThresholdRule {
    /// Drifted iff `p < alpha`
    PValueBelow(f64),
    /// Drifted iff `score > threshold`
    ScoreAbove(f64),
}

impl ThresholdRule {
    pub fn value(&self) -> f64 {
        match self {
            ThresholdRule::PValueBelow(v) | ThresholdRule::ScoreAbove(v) => *v,
        }
    }

    /// Apply the rule; a missing p-value never counts as drift
    pub fn is_drift(&self, score: f64, p_value: Option<f64>) -> bool {
        match self {
            ThresholdRule::PValueBelow(alpha) => p_value.map_or(false, |p| p < *alpha),
            ThresholdRule::ScoreAbove(threshold) => score > *threshold,
        }
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdRule::PValueBelow(alpha) => write!(f, "p < {}", alpha),
            ThresholdRule::ScoreAbove(threshold) => write!(f, "score > {}", threshold),
        }
    }
}

/// Outcome of one statistical comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftResult {
    /// Whether drift was detected
    pub drift_detected: bool,
    /// Test statistic or distance score
    pub score: f64,
    /// P-value (hypothesis tests only)
    pub p_value: Option<f64>,
    /// Rule the flag was derived from
    pub threshold: ThresholdRule,
    /// Additional information
    pub message: String,
}

impl DriftResult {
    /// Apply `rule` to a computed statistic
    pub fn evaluate(method: DriftMethod, score: f64, p_value: Option<f64>, rule: ThresholdRule) -> Self {
        let drift_detected = rule.is_drift(score, p_value);
        let observed = match p_value {
            Some(p) => format!("{} statistic {:.4} (p = {:.4})", method, score, p),
            None => format!("{} score {:.4}", method, score),
        };
        let message = if drift_detected {
            format!("{} meets drift rule {}", observed, rule)
        } else {
            format!("{} within {}", observed, rule)
        };

        Self {
            drift_detected,
            score,
            p_value,
            threshold: rule,
            message,
        }
    }
}

/// A two-sample comparison between reference and window values
pub trait DriftTest: Send + Sync {
    fn method(&self) -> DriftMethod;

    /// Rule applied to the computed statistic
    fn rule(&self) -> ThresholdRule;

    /// Compare reference values against window values
    fn detect(&self, reference: &Array1<f64>, window: &Array1<f64>) -> Result<DriftResult>;
}

pub(crate) fn computation_error(reason: impl Into<String>) -> AegisError {
    AegisError::StatisticComputation {
        feature: String::new(),
        reason: reason.into(),
    }
}

/// Reject empty or non-finite input before any statistic is computed
pub(crate) fn check_samples(reference: &Array1<f64>, window: &Array1<f64>) -> Result<()> {
    if reference.is_empty() || window.is_empty() {
        return Err(computation_error("empty sample"));
    }
    if reference.iter().chain(window.iter()).any(|v| !v.is_finite()) {
        return Err(computation_error("non-finite value in sample"));
    }
    Ok(())
}

/// Global threshold values, one per method
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Significance level for the KS test
    pub ks_alpha: f64,
    /// Significance level for the chi-squared test
    pub chi_squared_alpha: f64,
    /// PSI above which a feature has drifted
    pub psi: f64,
    /// Normalized Jensen-Shannon divergence above which a feature has drifted
    pub jensen_shannon: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            ks_alpha: 0.05,
            chi_squared_alpha: 0.05,
            psi: 0.1,
            jensen_shannon: 0.1,
        }
    }
}

impl ThresholdConfig {
    /// Rule for `method`, with an optional per-feature value
    pub fn rule_for(&self, method: DriftMethod, value: Option<f64>) -> ThresholdRule {
        match method {
            DriftMethod::KolmogorovSmirnov => ThresholdRule::PValueBelow(value.unwrap_or(self.ks_alpha)),
            DriftMethod::ChiSquared => ThresholdRule::PValueBelow(value.unwrap_or(self.chi_squared_alpha)),
            DriftMethod::PopulationStability => ThresholdRule::ScoreAbove(value.unwrap_or(self.psi)),
            DriftMethod::JensenShannon => ThresholdRule::ScoreAbove(value.unwrap_or(self.jensen_shannon)),
        }
    }
}

/// Dataset-level drift policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetPolicy {
    /// Drifted iff `drift_share > threshold`
    ShareAbove { threshold: f64 },
    /// Drifted iff at least `count` features drifted
    CountAtLeast { count: usize },
}

impl Default for DatasetPolicy {
    fn default() -> Self {
        DatasetPolicy::ShareAbove { threshold: 0.0 }
    }
}

impl DatasetPolicy {
    /// Nothing evaluated is never drift
    pub fn is_drifted(&self, drifted: usize, evaluated: usize, drift_share: f64) -> bool {
        if evaluated == 0 {
            return false;
        }
        match self {
            DatasetPolicy::ShareAbove { threshold } => drift_share > *threshold,
            DatasetPolicy::CountAtLeast { count } => drifted >= *count,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            DatasetPolicy::ShareAbove { threshold } if !(0.0..=1.0).contains(threshold) => {
                Err(AegisError::ConfigError(format!(
                    "dataset share threshold must be in [0, 1] (got {})",
                    threshold
                )))
            }
            DatasetPolicy::CountAtLeast { count } if *count == 0 => Err(AegisError::ConfigError(
                "dataset drift count must be at least 1".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for DatasetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetPolicy::ShareAbove { threshold } => write!(f, "drift share > {}", threshold),
            DatasetPolicy::CountAtLeast { count } => write!(f, "drifted features >= {}", count),
        }
    }
}

/// Detection settings bound to a [`DriftDetector`] at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Default method for continuous features
    pub continuous_method: DriftMethod,
    /// Default method for categorical features and the prediction
    pub categorical_method: DriftMethod,
    pub thresholds: ThresholdConfig,
    /// Quantile bins for PSI
    pub psi_bins: usize,
    /// Histogram bins for continuous Jensen-Shannon
    pub histogram_bins: usize,
    pub dataset_policy: DatasetPolicy,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            continuous_method: DriftMethod::KolmogorovSmirnov,
            categorical_method: DriftMethod::ChiSquared,
            thresholds: ThresholdConfig::default(),
            psi_bins: 10,
            histogram_bins: 20,
            dataset_policy: DatasetPolicy::default(),
        }
    }
}

impl DetectionConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.continuous_method.supports(FeatureKind::Continuous) {
            return Err(AegisError::ConfigError(format!(
                "{} cannot be the continuous default",
                self.continuous_method
            )));
        }
        if !self.categorical_method.supports(FeatureKind::Categorical) {
            return Err(AegisError::ConfigError(format!(
                "{} cannot be the categorical default",
                self.categorical_method
            )));
        }

        let t = &self.thresholds;
        for (name, alpha) in [("ks_alpha", t.ks_alpha), ("chi_squared_alpha", t.chi_squared_alpha)] {
            check_alpha(name, alpha)?;
        }
        for (name, score) in [("psi", t.psi), ("jensen_shannon", t.jensen_shannon)] {
            check_score(name, score)?;
        }

        if self.psi_bins < 2 || self.histogram_bins < 2 {
            return Err(AegisError::ConfigError("psi_bins and histogram_bins must be >= 2".into()));
        }
        self.dataset_policy.validate()
    }

    /// Per-feature overrides must make sense for the method they end up applied to
    pub fn validate_overrides(&self, schema: &SchemaConfig) -> Result<()> {
        let entries = schema
            .features
            .iter()
            .map(|f| (&f.name, f.kind, f.method, f.threshold))
            .chain(std::iter::once((
                &schema.prediction.name,
                FeatureKind::Categorical,
                schema.prediction.method,
                schema.prediction.threshold,
            )));

        for (name, kind, method, threshold) in entries {
            let method = method.unwrap_or_else(|| self.default_method(kind));
            if let Some(value) = threshold {
                if method.uses_p_value() {
                    check_alpha(name, value)?;
                } else {
                    check_score(name, value)?;
                }
            }
        }
        Ok(())
    }

    pub fn default_method(&self, kind: FeatureKind) -> DriftMethod {
        match kind {
            FeatureKind::Continuous => self.continuous_method,
            FeatureKind::Categorical => self.categorical_method,
        }
    }

    pub fn method_for(&self, feature: &MonitoredFeature) -> DriftMethod {
        feature.method.unwrap_or_else(|| self.default_method(feature.kind))
    }

    pub fn rule_for(&self, feature: &MonitoredFeature) -> ThresholdRule {
        self.thresholds.rule_for(self.method_for(feature), feature.threshold)
    }

    /// Instantiate the test for `feature`
    pub fn build_test(&self, feature: &MonitoredFeature) -> Box<dyn DriftTest> {
        let method = self.method_for(feature);
        let rule = self.rule_for(feature);
        match (method, feature.kind) {
            (DriftMethod::KolmogorovSmirnov, _) => Box::new(KolmogorovSmirnovTest::new(rule.value())),
            (DriftMethod::PopulationStability, _) => {
                Box::new(PopulationStabilityIndex::new(self.psi_bins, rule.value()))
            }
            (DriftMethod::ChiSquared, _) => Box::new(ChiSquaredTest::new(rule.value())),
            (DriftMethod::JensenShannon, FeatureKind::Continuous) => {
                Box::new(JensenShannonDivergence::new(rule.value()).with_bins(self.histogram_bins))
            }
            (DriftMethod::JensenShannon, FeatureKind::Categorical) => {
                Box::new(CategoricalJensenShannon::new(rule.value()))
            }
        }
    }
}

fn check_alpha(name: &str, alpha: f64) -> Result<()> {
    if alpha > 0.0 && alpha < 1.0 {
        Ok(())
    } else {
        Err(AegisError::ConfigError(format!(
            "p-value threshold for '{}' must be in (0, 1) (got {})",
            name, alpha
        )))
    }
}

fn check_score(name: &str, score: f64) -> Result<()> {
    if score.is_finite() && score > 0.0 {
        Ok(())
    } else {
        Err(AegisError::ConfigError(format!(
            "score threshold for '{}' must be > 0 (got {})",
            name, score
        )))
    }
}
