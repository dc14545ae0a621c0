//! Drift tests for continuous features

use crate::drift::{check_samples, computation_error, DriftMethod, DriftResult, DriftTest, ThresholdRule};
use crate::error::Result;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

fn sorted(data: &Array1<f64>) -> Vec<f64> {
    let mut values: Vec<f64> = data.iter().copied().collect();
    values.sort_by(f64::total_cmp);
    values
}

/// Two-sample Kolmogorov-Smirnov test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KolmogorovSmirnovTest {
    /// Significance level (alpha)
    alpha: f64,
}

impl KolmogorovSmirnovTest {
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }

    /// Largest gap between the two empirical CDFs; inputs must be sorted
    pub fn statistic(reference: &[f64], window: &[f64]) -> f64 {
        let (n, m) = (reference.len(), window.len());
        let (mut i, mut j) = (0, 0);
        let mut d: f64 = 0.0;

        while i < n && j < m {
            let x = reference[i].min(window[j]);
            while i < n && reference[i] <= x {
                i += 1;
            }
            while j < m && window[j] <= x {
                j += 1;
            }
            d = d.max((i as f64 / n as f64 - j as f64 / m as f64).abs());
        }
        d
    }

    /// Asymptotic p-value with the small-sample correction of Stephens (1970)
    pub fn p_value(d: f64, n: usize, m: usize) -> f64 {
        let en = ((n * m) as f64 / (n + m) as f64).sqrt();
        let lambda = (en + 0.12 + 0.11 / en) * d;
        Self::kolmogorov_q(lambda)
    }

    /// Q_KS(λ) = 2 Σ (-1)^(k-1) exp(-2 k² λ²)
    fn kolmogorov_q(lambda: f64) -> f64 {
        if lambda < 1e-3 {
            return 1.0;
        }
        let a2 = -2.0 * lambda * lambda;
        let mut sign = 2.0;
        let mut sum = 0.0;
        let mut previous = 0.0;

        for k in 1..=100 {
            let k = k as f64;
            let term = sign * (a2 * k * k).exp();
            sum += term;
            if term.abs() <= 1e-3 * previous || term.abs() <= 1e-8 * sum {
                return sum.clamp(0.0, 1.0);
            }
            sign = -sign;
            previous = term.abs();
        }
        // The series fails to converge only for very small λ
        1.0
    }
}

impl Default for KolmogorovSmirnovTest {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl DriftTest for KolmogorovSmirnovTest {
    fn method(&self) -> DriftMethod {
        DriftMethod::KolmogorovSmirnov
    }

    fn rule(&self) -> ThresholdRule {
        ThresholdRule::PValueBelow(self.alpha)
    }

    fn detect(&self, reference: &Array1<f64>, window: &Array1<f64>) -> Result<DriftResult> {
        check_samples(reference, window)?;

        let ref_sorted = sorted(reference);
        let win_sorted = sorted(window);

        let d = Self::statistic(&ref_sorted, &win_sorted);
        let p = Self::p_value(d, ref_sorted.len(), win_sorted.len());

        Ok(DriftResult::evaluate(self.method(), d, Some(p), self.rule()))
    }
}

/// Population Stability Index (PSI)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationStabilityIndex {
    /// Number of bins
    n_bins: usize,
    /// PSI above which a feature has drifted
    threshold: f64,
}

impl PopulationStabilityIndex {
    pub fn new(n_bins: usize, threshold: f64) -> Self {
        Self {
            n_bins: n_bins.max(2),
            threshold,
        }
    }

    /// Interior bin edges at the reference quantiles
    fn compute_bin_edges(&self, sorted: &[f64]) -> Vec<f64> {
        (1..self.n_bins)
            .map(|i| sorted[(i * sorted.len()) / self.n_bins])
            .collect()
    }

    /// Bin proportions over `(-inf, e1], (e1, e2], ..., (ek, inf)`
    fn bin_data(&self, data: &Array1<f64>, edges: &[f64]) -> Vec<f64> {
        let n = data.len() as f64;
        let mut counts = vec![0usize; self.n_bins];

        for &value in data {
            counts[edges.partition_point(|&e| e < value)] += 1;
        }

        // Floor empty bins so the log term stays finite
        counts.iter().map(|&c| (c as f64 / n).max(0.0001)).collect()
    }
}

impl Default for PopulationStabilityIndex {
    fn default() -> Self {
        Self::new(10, 0.1)
    }
}

impl DriftTest for PopulationStabilityIndex {
    fn method(&self) -> DriftMethod {
        DriftMethod::PopulationStability
    }

    fn rule(&self) -> ThresholdRule {
        ThresholdRule::ScoreAbove(self.threshold)
    }

    fn detect(&self, reference: &Array1<f64>, window: &Array1<f64>) -> Result<DriftResult> {
        check_samples(reference, window)?;

        let edges = self.compute_bin_edges(&sorted(reference));
        let ref_props = self.bin_data(reference, &edges);
        let win_props = self.bin_data(window, &edges);

        let psi: f64 = ref_props
            .iter()
            .zip(win_props.iter())
            .map(|(&p_ref, &p_win)| (p_win - p_ref) * (p_win / p_ref).ln())
            .sum();

        if !psi.is_finite() {
            return Err(computation_error("PSI is not finite"));
        }
        Ok(DriftResult::evaluate(self.method(), psi, None, self.rule()))
    }
}

/// Jensen-Shannon divergence over a shared histogram, normalized to [0, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JensenShannonDivergence {
    /// Number of bins for histogram
    n_bins: usize,
    /// Threshold for drift detection
    threshold: f64,
}

impl JensenShannonDivergence {
    pub fn new(threshold: f64) -> Self {
        Self { n_bins: 20, threshold }
    }

    pub fn with_bins(mut self, n: usize) -> Self {
        self.n_bins = n.max(2);
        self
    }

    fn histogram(&self, data: &Array1<f64>, min_val: f64, max_val: f64) -> Vec<f64> {
        let bin_width = (max_val - min_val) / self.n_bins as f64;
        let mut counts = vec![0usize; self.n_bins];
        let n = data.len() as f64;

        for &value in data {
            let bin = ((value - min_val) / bin_width).floor() as usize;
            counts[bin.min(self.n_bins - 1)] += 1;
        }

        counts.iter().map(|&c| c as f64 / n).collect()
    }
}

impl Default for JensenShannonDivergence {
    fn default() -> Self {
        Self::new(0.1)
    }
}

/// JS divergence in bits between two discrete distributions
pub(crate) fn js_divergence(p: &[f64], q: &[f64]) -> f64 {
    let kl_to_mid = |a: &[f64], b: &[f64]| -> f64 {
        a.iter()
            .zip(b.iter())
            .filter(|(&ai, _)| ai > 0.0)
            .map(|(&ai, &bi)| ai * (2.0 * ai / (ai + bi)).log2())
            .sum::<f64>()
    };
    let js = (kl_to_mid(p, q) + kl_to_mid(q, p)) / 2.0;
    js.clamp(0.0, 1.0)
}

impl DriftTest for JensenShannonDivergence {
    fn method(&self) -> DriftMethod {
        DriftMethod::JensenShannon
    }

    fn rule(&self) -> ThresholdRule {
        ThresholdRule::ScoreAbove(self.threshold)
    }

    fn detect(&self, reference: &Array1<f64>, window: &Array1<f64>) -> Result<DriftResult> {
        check_samples(reference, window)?;

        let min_val = reference.iter().chain(window.iter()).copied().fold(f64::INFINITY, f64::min);
        let max_val = reference.iter().chain(window.iter()).copied().fold(f64::NEG_INFINITY, f64::max);

        if max_val - min_val <= f64::EPSILON * max_val.abs().max(1.0) {
            return Ok(DriftResult::evaluate(self.method(), 0.0, None, self.rule()));
        }

        let p = self.histogram(reference, min_val, max_val);
        let q = self.histogram(window, min_val, max_val);
        let js = js_divergence(&p, &q);

        Ok(DriftResult::evaluate(self.method(), js, None, self.rule()))
    }
}
