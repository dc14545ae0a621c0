//! Drift tests for categorical features and the model prediction

use crate::drift::data_drift::js_divergence;
use crate::drift::{check_samples, computation_error, DriftMethod, DriftResult, DriftTest, ThresholdRule};
use crate::error::Result;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Category counts over the union of values seen on either side
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Contingency {
    pub categories: Vec<f64>,
    pub reference: Vec<usize>,
    pub window: Vec<usize>,
}

impl Contingency {
    pub fn from_samples(reference: &Array1<f64>, window: &Array1<f64>) -> Self {
        let mut categories: Vec<f64> = reference.iter().chain(window.iter()).copied().collect();
        categories.sort_by(f64::total_cmp);
        categories.dedup();

        let count = |data: &Array1<f64>| {
            let mut counts = vec![0usize; categories.len()];
            for value in data {
                if let Ok(idx) = categories.binary_search_by(|c| c.total_cmp(value)) {
                    counts[idx] += 1;
                }
            }
            counts
        };

        let reference = count(reference);
        let window = count(window);
        Self {
            categories,
            reference,
            window,
        }
    }

    fn frequencies(counts: &[usize]) -> Vec<f64> {
        let total: usize = counts.iter().sum();
        counts.iter().map(|&c| c as f64 / total as f64).collect()
    }
}

/// Chi-squared test of homogeneity over a 2 x k contingency table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChiSquaredTest {
    alpha: f64,
}

impl ChiSquaredTest {
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }

    /// Returns the statistic and its degrees of freedom
    pub(crate) fn statistic(table: &Contingency) -> (f64, usize) {
        let n_ref: usize = table.reference.iter().sum();
        let n_win: usize = table.window.iter().sum();
        let total = (n_ref + n_win) as f64;

        let mut chi2 = 0.0;
        for (&r, &w) in table.reference.iter().zip(table.window.iter()) {
            let column = (r + w) as f64;
            for (observed, row_total) in [(r, n_ref), (w, n_win)] {
                let expected = row_total as f64 * column / total;
                if expected > 0.0 {
                    chi2 += (observed as f64 - expected).powi(2) / expected;
                }
            }
        }
        (chi2, table.categories.len().saturating_sub(1))
    }
}

impl Default for ChiSquaredTest {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl DriftTest for ChiSquaredTest {
    fn method(&self) -> DriftMethod {
        DriftMethod::ChiSquared
    }

    fn rule(&self) -> ThresholdRule {
        ThresholdRule::PValueBelow(self.alpha)
    }

    fn detect(&self, reference: &Array1<f64>, window: &Array1<f64>) -> Result<DriftResult> {
        check_samples(reference, window)?;

        let table = Contingency::from_samples(reference, window);
        let (chi2, df) = Self::statistic(&table);
        if df == 0 {
            return Err(computation_error("fewer than two categories observed"));
        }

        let distribution = ChiSquared::new(df as f64)
            .map_err(|e| computation_error(format!("chi-squared distribution: {}", e)))?;
        let p = distribution.sf(chi2).clamp(0.0, 1.0);

        Ok(DriftResult::evaluate(self.method(), chi2, Some(p), self.rule()))
    }
}

/// Jensen-Shannon divergence between category frequencies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalJensenShannon {
    threshold: f64,
}

impl CategoricalJensenShannon {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl DriftTest for CategoricalJensenShannon {
    fn method(&self) -> DriftMethod {
        DriftMethod::JensenShannon
    }

    fn rule(&self) -> ThresholdRule {
        ThresholdRule::ScoreAbove(self.threshold)
    }

    fn detect(&self, reference: &Array1<f64>, window: &Array1<f64>) -> Result<DriftResult> {
        check_samples(reference, window)?;

        let table = Contingency::from_samples(reference, window);
        let p = Contingency::frequencies(&table.reference);
        let q = Contingency::frequencies(&table.window);

        Ok(DriftResult::evaluate(self.method(), js_divergence(&p, &q), None, self.rule()))
    }
}
