//! Dataset-level verdict

use crate::drift::{DatasetPolicy, FeatureDriftResult, FeatureStatus};
use serde::{Deserialize, Serialize};

/// Aggregate of all per-feature results for one comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetVerdict {
    pub dataset_drifted: bool,
    /// drifted / evaluated, in [0, 1]
    pub drift_share: f64,
    /// Monitored features, conclusive or not
    pub total_features: usize,
    /// Features with a conclusive test outcome
    pub evaluated_features: usize,
    pub drifted_count: usize,
    pub inconclusive_count: usize,
    pub policy: DatasetPolicy,
    pub reference_rows: usize,
    pub window_rows: usize,
    /// Per-feature results in schema order
    pub features: Vec<FeatureDriftResult>,
}

impl DatasetVerdict {
    pub fn aggregate(
        features: Vec<FeatureDriftResult>,
        policy: DatasetPolicy,
        reference_rows: usize,
        window_rows: usize,
    ) -> Self {
        let total_features = features.len();
        let inconclusive_count = features.iter().filter(|f| f.is_inconclusive()).count();
        let drifted_count = features
            .iter()
            .filter(|f| f.status == FeatureStatus::Drifted)
            .count();
        let evaluated_features = total_features - inconclusive_count;

        let drift_share = if evaluated_features == 0 {
            0.0
        } else {
            drifted_count as f64 / evaluated_features as f64
        };

        Self {
            dataset_drifted: policy.is_drifted(drifted_count, evaluated_features, drift_share),
            drift_share,
            total_features,
            evaluated_features,
            drifted_count,
            inconclusive_count,
            policy,
            reference_rows,
            window_rows,
            features,
        }
    }

    pub fn feature(&self, name: &str) -> Option<&FeatureDriftResult> {
        self.features.iter().find(|f| f.feature_name == name)
    }

    pub fn drifted_feature_names(&self) -> Vec<&str> {
        self.features
            .iter()
            .filter(|f| f.drifted)
            .map(|f| f.feature_name.as_str())
            .collect()
    }

    pub fn inconclusive_share(&self) -> f64 {
        if self.total_features == 0 {
            0.0
        } else {
            self.inconclusive_count as f64 / self.total_features as f64
        }
    }

    /// Plain-text summary for logs and the terminal
    pub fn summary(&self) -> String {
        let mut s = String::new();
        s.push_str("Drift Verdict\n");
        s.push_str("=============\n");
        s.push_str(&format!("Reference rows: {}\n", self.reference_rows));
        s.push_str(&format!("Window rows: {}\n", self.window_rows));
        s.push_str(&format!(
            "Features: {} monitored, {} evaluated, {} inconclusive\n",
            self.total_features, self.evaluated_features, self.inconclusive_count
        ));
        s.push_str(&format!(
            "Drifted features: {} (share {:.2})\n",
            self.drifted_count, self.drift_share
        ));
        s.push_str(&format!(
            "Dataset drift: {} (policy: {})\n",
            if self.dataset_drifted { "YES" } else { "no" },
            self.policy
        ));

        if !self.features.is_empty() {
            s.push('\n');
        }
        for f in &self.features {
            let status = match f.status {
                FeatureStatus::Drifted => "DRIFTED",
                FeatureStatus::Stable => "stable",
                FeatureStatus::Inconclusive => "inconclusive",
            };
            match (f.statistic, f.p_value) {
                (Some(stat), Some(p)) => s.push_str(&format!(
                    "  - {} [{}] {} = {:.4}, p = {:.4}\n",
                    f.feature_name, status, f.method, stat, p
                )),
                (Some(stat), None) => s.push_str(&format!(
                    "  - {} [{}] {} = {:.4}\n",
                    f.feature_name, status, f.method, stat
                )),
                _ => s.push_str(&format!(
                    "  - {} [{}] {}\n",
                    f.feature_name,
                    status,
                    f.inconclusive_reason.as_deref().unwrap_or("no statistic")
                )),
            }
        }

        s
    }
}
