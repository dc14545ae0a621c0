//! Per-feature drift results

use crate::drift::{DriftMethod, DriftResult, ThresholdRule};
use crate::schema::{FeatureKind, MonitoredFeature};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Outcome of one feature's comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    Drifted,
    Stable,
    /// No statistic could be computed; excluded from the drift share
    Inconclusive,
}

/// Result for a single feature's drift analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDriftResult {
    pub feature_name: String,
    pub kind: FeatureKind,
    pub method: DriftMethod,
    /// Test statistic or distance score; absent when inconclusive
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub threshold: ThresholdRule,
    pub drifted: bool,
    pub status: FeatureStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inconclusive_reason: Option<String>,
    pub reference_stats: FeatureStats,
    pub window_stats: FeatureStats,
}

impl FeatureDriftResult {
    pub fn evaluated(
        feature: &MonitoredFeature,
        method: DriftMethod,
        result: DriftResult,
        reference_stats: FeatureStats,
        window_stats: FeatureStats,
    ) -> Self {
        Self {
            feature_name: feature.name.clone(),
            kind: feature.kind,
            method,
            statistic: Some(result.score),
            p_value: result.p_value,
            threshold: result.threshold,
            drifted: result.drift_detected,
            status: if result.drift_detected {
                FeatureStatus::Drifted
            } else {
                FeatureStatus::Stable
            },
            inconclusive_reason: None,
            reference_stats,
            window_stats,
        }
    }

    pub fn inconclusive(
        feature: &MonitoredFeature,
        method: DriftMethod,
        threshold: ThresholdRule,
        reason: String,
        reference_stats: FeatureStats,
        window_stats: FeatureStats,
    ) -> Self {
        Self {
            feature_name: feature.name.clone(),
            kind: feature.kind,
            method,
            statistic: None,
            p_value: None,
            threshold,
            drifted: false,
            status: FeatureStatus::Inconclusive,
            inconclusive_reason: Some(reason),
            reference_stats,
            window_stats,
        }
    }

    pub fn is_inconclusive(&self) -> bool {
        self.status == FeatureStatus::Inconclusive
    }
}

/// Basic statistics for a feature, over its finite values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub q25: f64,
    pub q75: f64,
    pub n_unique: usize,
    /// Share of values that were NaN or infinite
    pub non_finite_rate: f64,
}

impl FeatureStats {
    pub fn from_data(data: &Array1<f64>) -> Self {
        let mut sorted: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
        let non_finite = data.len() - sorted.len();
        let non_finite_rate = if data.is_empty() {
            0.0
        } else {
            non_finite as f64 / data.len() as f64
        };

        if sorted.is_empty() {
            return Self {
                non_finite_rate,
                ..Self::default()
            };
        }
        sorted.sort_by(f64::total_cmp);

        let len = sorted.len();
        let n = len as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n;

        let median = if len % 2 == 0 {
            (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
        } else {
            sorted[len / 2]
        };

        let mut unique = sorted.clone();
        unique.dedup();

        Self {
            count: len,
            mean,
            std: variance.sqrt(),
            min: sorted[0],
            max: sorted[len - 1],
            median,
            q25: sorted[len / 4],
            q75: sorted[(3 * len) / 4],
            n_unique: unique.len(),
            non_finite_rate,
        }
    }

    /// True when every finite value is identical
    pub fn has_zero_variance(&self) -> bool {
        self.count > 0 && self.min == self.max
    }
}
