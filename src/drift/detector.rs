//! Dataset drift detector
//!
//! Runs one test per monitored feature, in parallel, and aggregates the
//! outcomes. A feature whose statistic cannot be computed is recorded as
//! inconclusive; it never aborts the comparison.

use crate::drift::{DatasetVerdict, DetectionConfig, FeatureDriftResult, FeatureStats};
use crate::error::{AegisError, Result};
use crate::reference::ReferenceBaseline;
use crate::schema::MonitoredFeature;
use crate::window::Window;
use rayon::prelude::*;
use tracing::{debug, warn};

/// Reason recorded when the reference holds a single distinct value
pub const ZERO_VARIANCE_REFERENCE: &str = "zero_variance_reference";

#[derive(Debug, Clone, Default)]
pub struct DriftDetector {
    config: DetectionConfig,
}

impl DriftDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Compare `window` against `reference`; deterministic for a given pair
    pub fn detect(&self, reference: &ReferenceBaseline, window: &Window) -> Result<DatasetVerdict> {
        check_schemas(reference.features(), window.features())?;

        let features = reference
            .features()
            .par_iter()
            .map(|feature| self.evaluate_feature(feature, reference, window))
            .collect::<Result<Vec<_>>>()?;

        let verdict = DatasetVerdict::aggregate(
            features,
            self.config.dataset_policy,
            reference.len(),
            window.len(),
        );
        debug!(
            drifted = verdict.drifted_count,
            evaluated = verdict.evaluated_features,
            drift_share = verdict.drift_share,
            "Drift detection finished"
        );
        Ok(verdict)
    }

    fn evaluate_feature(
        &self,
        feature: &MonitoredFeature,
        reference: &ReferenceBaseline,
        window: &Window,
    ) -> Result<FeatureDriftResult> {
        let missing = |side: &str| {
            AegisError::SchemaMismatch(format!("feature '{}' has no {} values", feature.name, side))
        };
        let ref_values = reference.column(feature).ok_or_else(|| missing("reference"))?;
        let win_values = window.column(feature).ok_or_else(|| missing("window"))?;

        let method = self.config.method_for(feature);
        let rule = self.config.rule_for(feature);
        let ref_stats = FeatureStats::from_data(&ref_values);
        let win_stats = FeatureStats::from_data(&win_values);

        if ref_stats.has_zero_variance() {
            debug!(feature = %feature.name, "Reference has zero variance, skipping test");
            return Ok(FeatureDriftResult::inconclusive(
                feature,
                method,
                rule,
                ZERO_VARIANCE_REFERENCE.to_string(),
                ref_stats,
                win_stats,
            ));
        }

        let test = self.config.build_test(feature);
        match test.detect(&ref_values, &win_values) {
            Ok(result) => Ok(FeatureDriftResult::evaluated(feature, method, result, ref_stats, win_stats)),
            Err(err) => {
                let reason = match err {
                    AegisError::StatisticComputation { reason, .. } => reason,
                    other => other.to_string(),
                };
                warn!(feature = %feature.name, method = %method, reason = %reason, "Feature test inconclusive");
                Ok(FeatureDriftResult::inconclusive(
                    feature,
                    method,
                    rule,
                    format!("computation_failed: {}", reason),
                    ref_stats,
                    win_stats,
                ))
            }
        }
    }
}

/// Same names, same kinds, same order
fn check_schemas(reference: &[MonitoredFeature], window: &[MonitoredFeature]) -> Result<()> {
    let names = |features: &[MonitoredFeature]| {
        features.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", ")
    };

    let matches = reference.len() == window.len()
        && reference
            .iter()
            .zip(window)
            .all(|(r, w)| r.name == w.name && r.kind == w.kind);

    if matches {
        Ok(())
    } else {
        Err(AegisError::SchemaMismatch(format!(
            "reference features [{}] differ from window features [{}]",
            names(reference),
            names(window)
        )))
    }
}
