//! Integration test: detector behaviour on constructed distributions

use aegis_ml::drift::{
    DatasetPolicy, DetectionConfig, DriftDetector, DriftMethod, FeatureStatus, ThresholdRule,
    ZERO_VARIANCE_REFERENCE,
};
use aegis_ml::reference::ReferenceBaseline;
use aegis_ml::schema::{FeatureKind, FeatureRole, MonitoredFeature};
use aegis_ml::store::FeatureRecord;
use aegis_ml::window::Window;
use chrono::{Duration, TimeZone, Utc};
use rand::distributions::Distribution;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use statrs::distribution::{ContinuousCDF, Normal};

fn continuous(name: &str) -> MonitoredFeature {
    MonitoredFeature {
        name: name.to_string(),
        kind: FeatureKind::Continuous,
        role: FeatureRole::Input,
        method: None,
        threshold: None,
    }
}

/// Evenly spaced quantiles of N(mean, sd)
fn normal_quantiles(n: usize, mean: f64, sd: f64) -> Vec<f64> {
    let normal = Normal::new(mean, sd).unwrap();
    (0..n)
        .map(|i| normal.inverse_cdf((i as f64 + 0.5) / n as f64))
        .collect()
}

fn reference(features: &[MonitoredFeature], columns: &[Vec<f64>]) -> ReferenceBaseline {
    let rows: Vec<Vec<f64>> = (0..columns[0].len())
        .map(|r| columns.iter().map(|c| c[r]).collect())
        .collect();
    ReferenceBaseline::from_rows(features.to_vec(), &rows).unwrap()
}

fn window(features: &[MonitoredFeature], columns: &[Vec<f64>]) -> Window {
    let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let n = columns[0].len();
    let records = (0..n)
        .map(|r| FeatureRecord {
            sequence: (n - r) as i64,
            timestamp: base - Duration::seconds(r as i64),
            values: features
                .iter()
                .zip(columns)
                .map(|(f, c)| (f.name.clone(), c[r]))
                .collect(),
            prediction: 0,
        })
        .collect();
    Window::new(features.to_vec(), records)
}

#[test]
fn test_one_of_two_features_scaled() {
    let features = vec![continuous("A"), continuous("B")];
    let reference = reference(
        &features,
        &[normal_quantiles(100, 0.0, 1.0), normal_quantiles(100, 0.0, 1.0)],
    );
    let scaled: Vec<f64> = normal_quantiles(50, 0.0, 1.0).iter().map(|v| v * 3.0).collect();
    let window = window(&features, &[scaled, normal_quantiles(50, 0.0, 1.0)]);

    let verdict = DriftDetector::default().detect(&reference, &window).unwrap();

    assert_eq!(verdict.total_features, 2);
    assert_eq!(verdict.evaluated_features, 2);
    assert_eq!(verdict.drifted_count, 1);
    assert!((verdict.drift_share - 0.5).abs() < 1e-12);
    assert!(verdict.dataset_drifted);

    let a = verdict.feature("A").unwrap();
    let b = verdict.feature("B").unwrap();
    assert!(a.drifted);
    assert_eq!(a.method, DriftMethod::KolmogorovSmirnov);
    assert!(a.p_value.unwrap() < 0.05);
    assert!(!b.drifted);
    assert_eq!(b.status, FeatureStatus::Stable);
    assert_eq!(verdict.features[0].feature_name, "A");
    assert_eq!(verdict.features[1].feature_name, "B");
}

#[test]
fn test_share_policy_threshold_is_strict() {
    let features = vec![continuous("A"), continuous("B")];
    let reference = reference(
        &features,
        &[normal_quantiles(400, 0.0, 1.0), normal_quantiles(400, 0.0, 1.0)],
    );
    let window = window(
        &features,
        &[normal_quantiles(150, 3.0, 1.0), normal_quantiles(150, 0.0, 1.0)],
    );

    let config = DetectionConfig {
        dataset_policy: DatasetPolicy::ShareAbove { threshold: 0.5 },
        ..DetectionConfig::default()
    };
    let verdict = DriftDetector::new(config).detect(&reference, &window).unwrap();
    assert!((verdict.drift_share - 0.5).abs() < 1e-12);
    assert!(!verdict.dataset_drifted);

    let config = DetectionConfig {
        dataset_policy: DatasetPolicy::CountAtLeast { count: 1 },
        ..DetectionConfig::default()
    };
    assert!(DriftDetector::new(config).detect(&reference, &window).unwrap().dataset_drifted);
}

#[test]
fn test_scaled_feature_is_flagged_by_every_continuous_method() {
    let features = vec![continuous("mean radius")];
    let reference = reference(&features, &[normal_quantiles(500, 14.0, 3.5)]);
    let scaled: Vec<f64> = normal_quantiles(200, 14.0, 3.5).iter().map(|v| v * 2.0).collect();
    let window = window(&features, &[scaled]);

    for method in [
        DriftMethod::KolmogorovSmirnov,
        DriftMethod::PopulationStability,
        DriftMethod::JensenShannon,
    ] {
        let config = DetectionConfig {
            continuous_method: method,
            ..DetectionConfig::default()
        };
        let verdict = DriftDetector::new(config).detect(&reference, &window).unwrap();
        assert_eq!(verdict.drifted_count, 1, "{} missed the scaled feature", method);
        assert!(verdict.dataset_drifted);
    }
}

#[test]
fn test_same_distribution_rarely_flagged() {
    let features = vec![continuous("x")];
    let detector = DriftDetector::default();
    let normal = Normal::new(0.0, 1.0).unwrap();
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);

    let trials = 200;
    let mut flagged = 0;
    for _ in 0..trials {
        let reference_values: Vec<f64> = (0..300).map(|_| normal.sample(&mut rng)).collect();
        let window_values: Vec<f64> = (0..100).map(|_| normal.sample(&mut rng)).collect();
        let verdict = detector
            .detect(
                &reference(&features, &[reference_values]),
                &window(&features, &[window_values]),
            )
            .unwrap();
        if verdict.dataset_drifted {
            flagged += 1;
        }
    }
    // Nominal false positive rate is 5%
    assert!(flagged <= trials * 12 / 100, "{} of {} trials flagged", flagged, trials);
}

#[test]
fn test_detect_is_idempotent() {
    let features = vec![continuous("A"), continuous("B")];
    let reference = reference(
        &features,
        &[normal_quantiles(300, 0.0, 1.0), normal_quantiles(300, 1.0, 1.0)],
    );
    let window = window(
        &features,
        &[normal_quantiles(80, 0.4, 1.0), normal_quantiles(80, 1.0, 1.3)],
    );

    let detector = DriftDetector::default();
    let first = detector.detect(&reference, &window).unwrap();
    let second = detector.detect(&reference, &window).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_p_value_equal_to_alpha_is_not_drift() {
    let plain = vec![continuous("A")];
    let ref_values = normal_quantiles(300, 0.0, 1.0);
    let win_values = normal_quantiles(60, 0.35, 1.0);

    let verdict = DriftDetector::default()
        .detect(&reference(&plain, &[ref_values.clone()]), &window(&plain, &[win_values.clone()]))
        .unwrap();
    let p = verdict.features[0].p_value.unwrap();
    assert!(p > 0.0 && p < 1.0);

    // Alpha set to exactly the observed p-value
    let at_threshold = vec![MonitoredFeature {
        threshold: Some(p),
        ..continuous("A")
    }];
    let verdict = DriftDetector::default()
        .detect(
            &reference(&at_threshold, &[ref_values.clone()]),
            &window(&at_threshold, &[win_values.clone()]),
        )
        .unwrap();
    let result = &verdict.features[0];
    assert_eq!(result.threshold, ThresholdRule::PValueBelow(p));
    assert_eq!(result.p_value, Some(p));
    assert!(!result.drifted);
    assert_eq!(result.status, FeatureStatus::Stable);

    let just_above = vec![MonitoredFeature {
        threshold: Some(p * (1.0 + 1e-9)),
        ..continuous("A")
    }];
    let verdict = DriftDetector::default()
        .detect(&reference(&just_above, &[ref_values]), &window(&just_above, &[win_values]))
        .unwrap();
    assert!(verdict.features[0].drifted);
}

#[test]
fn test_score_equal_to_threshold_is_not_drift() {
    let psi = MonitoredFeature {
        method: Some(DriftMethod::PopulationStability),
        ..continuous("A")
    };
    let ref_values = normal_quantiles(400, 0.0, 1.0);
    let win_values = normal_quantiles(120, 0.5, 1.0);

    let verdict = DriftDetector::default()
        .detect(
            &reference(&[psi.clone()], &[ref_values.clone()]),
            &window(&[psi.clone()], &[win_values.clone()]),
        )
        .unwrap();
    let score = verdict.features[0].statistic.unwrap();
    assert!(score > 0.0);

    let at_threshold = MonitoredFeature {
        threshold: Some(score),
        ..psi
    };
    let verdict = DriftDetector::default()
        .detect(
            &reference(&[at_threshold.clone()], &[ref_values]),
            &window(&[at_threshold], &[win_values]),
        )
        .unwrap();
    assert_eq!(verdict.features[0].threshold, ThresholdRule::ScoreAbove(score));
    assert!(!verdict.features[0].drifted);
}

#[test]
fn test_zero_variance_reference_is_inconclusive() {
    let features = vec![continuous("A"), continuous("constant")];
    let reference = reference(&features, &[normal_quantiles(200, 0.0, 1.0), vec![1.0; 200]]);
    let window = window(
        &features,
        &[normal_quantiles(100, 4.0, 1.0), normal_quantiles(100, 1.0, 0.1)],
    );

    let verdict = DriftDetector::default().detect(&reference, &window).unwrap();

    let constant = verdict.feature("constant").unwrap();
    assert_eq!(constant.status, FeatureStatus::Inconclusive);
    assert_eq!(constant.inconclusive_reason.as_deref(), Some(ZERO_VARIANCE_REFERENCE));
    assert!(constant.statistic.is_none());
    assert!(!constant.drifted);

    assert_eq!(verdict.total_features, 2);
    assert_eq!(verdict.evaluated_features, 1);
    assert_eq!(verdict.inconclusive_count, 1);
    assert_eq!(verdict.drifted_count, 1);
    assert!((verdict.drift_share - 1.0).abs() < 1e-12);
}

#[test]
fn test_categorical_prediction_shift() {
    let prediction = MonitoredFeature {
        name: "prediction".to_string(),
        kind: FeatureKind::Categorical,
        role: FeatureRole::Prediction,
        method: None,
        threshold: None,
    };
    let reference = ReferenceBaseline::from_rows(
        vec![prediction.clone()],
        &(0..100).map(|i| vec![if i < 60 { 1.0 } else { 0.0 }]).collect::<Vec<_>>(),
    )
    .unwrap();

    let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let records = (0..50)
        .map(|i| FeatureRecord {
            sequence: 50 - i,
            timestamp: base - Duration::seconds(i),
            values: Vec::new(),
            prediction: if i < 10 { 1 } else { 0 },
        })
        .collect();
    let window = Window::new(vec![prediction], records);

    let verdict = DriftDetector::default().detect(&reference, &window).unwrap();
    let result = &verdict.features[0];
    assert_eq!(result.method, DriftMethod::ChiSquared);
    assert!((result.statistic.unwrap() - 150.0 / 7.0).abs() < 1e-9);
    assert!(result.drifted);
}

#[test]
fn test_schema_mismatch_between_reference_and_window() {
    let reference = reference(&[continuous("A"), continuous("B")], &[vec![1.0, 2.0], vec![3.0, 4.0]]);
    let swapped = [continuous("B"), continuous("A")];
    let window = window(&swapped, &[vec![1.0, 2.0], vec![3.0, 4.0]]);

    let err = DriftDetector::default().detect(&reference, &window).unwrap_err();
    assert!(matches!(err, aegis_ml::AegisError::SchemaMismatch(_)));
}
