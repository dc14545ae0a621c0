//! Schema alignment
//!
//! The store and the reference baseline name the same features differently
//! (the ingestion side uses SQL-safe identifiers, the training export keeps
//! the original dataset headers). Alignment is an explicit mapping table,
//! validated once at startup against both sources, that renames every
//! monitored column to one canonical name and coerces stored values into
//! their typed form.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::drift::DriftMethod;
use crate::error::{AegisError, Result};
use crate::store::{FeatureRecord, RawRecord, RawValue};

/// Declared statistical type of a monitored feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Continuous,
    Categorical,
}

impl Default for FeatureKind {
    fn default() -> Self {
        FeatureKind::Continuous
    }
}

/// Whether a monitored feature is a model input or the model's own output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureRole {
    Input,
    Prediction,
}

/// One row of the mapping table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMapping {
    /// Canonical name used in verdicts
    pub name: String,
    /// Column name in the observation store
    pub store_column: String,
    /// Column name in the reference CSV
    pub reference_column: String,
    #[serde(default)]
    pub kind: FeatureKind,
    /// Overrides the default method for this feature's kind
    #[serde(default)]
    pub method: Option<DriftMethod>,
    /// Overrides the method's global threshold value
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl FeatureMapping {
    pub fn new(name: &str, store_column: &str, reference_column: &str, kind: FeatureKind) -> Self {
        Self {
            name: name.to_string(),
            store_column: store_column.to_string(),
            reference_column: reference_column.to_string(),
            kind,
            method: None,
            threshold: None,
        }
    }
}

fn default_prediction_name() -> String {
    "prediction".to_string()
}

fn default_true() -> bool {
    true
}

/// Mapping for the model prediction column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMapping {
    #[serde(default = "default_prediction_name")]
    pub name: String,
    pub store_column: String,
    pub reference_column: String,
    /// Allowed class labels; empty accepts any integer
    #[serde(default)]
    pub labels: Vec<i64>,
    /// Compare the prediction distribution as a categorical feature
    #[serde(default = "default_true")]
    pub monitor: bool,
    #[serde(default)]
    pub method: Option<DriftMethod>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl Default for PredictionMapping {
    fn default() -> Self {
        Self {
            name: default_prediction_name(),
            store_column: "prediction".to_string(),
            reference_column: "prediction".to_string(),
            labels: vec![0, 1],
            monitor: true,
            method: None,
            threshold: None,
        }
    }
}

/// The declarative mapping table as configured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub features: Vec<FeatureMapping>,
    pub prediction: PredictionMapping,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            features: vec![
                FeatureMapping::new("mean radius", "mean_radius", "mean radius", FeatureKind::Continuous),
                FeatureMapping::new("mean texture", "mean_texture", "mean texture", FeatureKind::Continuous),
                FeatureMapping::new(
                    "mean smoothness",
                    "mean_smoothness",
                    "mean smoothness",
                    FeatureKind::Continuous,
                ),
            ],
            prediction: PredictionMapping::default(),
        }
    }
}

impl SchemaConfig {
    /// Internal consistency of the table itself
    pub fn validate(&self) -> Result<()> {
        if self.features.is_empty() {
            return Err(AegisError::ConfigError("schema.features must not be empty".into()));
        }

        let mut names = HashSet::new();
        let mut store_columns = HashSet::new();
        let mut reference_columns = HashSet::new();

        let entries = self
            .features
            .iter()
            .map(|f| (&f.name, &f.store_column, &f.reference_column))
            .chain(std::iter::once((
                &self.prediction.name,
                &self.prediction.store_column,
                &self.prediction.reference_column,
            )));

        for (name, store_column, reference_column) in entries {
            if name.trim().is_empty() || store_column.trim().is_empty() || reference_column.trim().is_empty() {
                return Err(AegisError::ConfigError(format!(
                    "schema entry '{}' has an empty name or column",
                    name
                )));
            }
            if !names.insert(name.as_str()) {
                return Err(AegisError::ConfigError(format!("duplicate canonical feature '{}'", name)));
            }
            if !store_columns.insert(store_column.as_str()) {
                return Err(AegisError::ConfigError(format!(
                    "store column '{}' is mapped twice",
                    store_column
                )));
            }
            if !reference_columns.insert(reference_column.as_str()) {
                return Err(AegisError::ConfigError(format!(
                    "reference column '{}' is mapped twice",
                    reference_column
                )));
            }
        }

        for feature in &self.features {
            if let Some(method) = feature.method {
                if !method.supports(feature.kind) {
                    return Err(AegisError::ConfigError(format!(
                        "method {} cannot test {:?} feature '{}'",
                        method.as_str(),
                        feature.kind,
                        feature.name
                    )));
                }
            }
            if let Some(threshold) = feature.threshold {
                if !(threshold.is_finite() && threshold > 0.0) {
                    return Err(AegisError::ConfigError(format!(
                        "threshold for '{}' must be a positive number",
                        feature.name
                    )));
                }
            }
        }
        if let Some(method) = self.prediction.method {
            if !method.supports(FeatureKind::Categorical) {
                return Err(AegisError::ConfigError(format!(
                    "method {} cannot test the categorical prediction",
                    method.as_str()
                )));
            }
        }

        Ok(())
    }
}

/// A feature as the detector sees it: canonical name, kind and overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredFeature {
    pub name: String,
    pub kind: FeatureKind,
    pub role: FeatureRole,
    pub method: Option<DriftMethod>,
    pub threshold: Option<f64>,
}

/// Validated mapping between store, reference and canonical names
#[derive(Debug, Clone)]
pub struct SchemaMap {
    config: SchemaConfig,
    timestamp_column: String,
    ignored_columns: Vec<String>,
}

impl SchemaMap {
    /// Build from the configured table; the table must be internally consistent
    pub fn new(config: SchemaConfig, timestamp_column: &str, ignored_columns: &[String]) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            timestamp_column: timestamp_column.to_string(),
            ignored_columns: ignored_columns.to_vec(),
        })
    }

    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    pub fn timestamp_column(&self) -> &str {
        &self.timestamp_column
    }

    pub fn prediction(&self) -> &PredictionMapping {
        &self.config.prediction
    }

    pub fn features(&self) -> &[FeatureMapping] {
        &self.config.features
    }

    /// Ordered canonical feature list; the prediction comes last when monitored
    pub fn monitored(&self) -> Vec<MonitoredFeature> {
        let mut features: Vec<MonitoredFeature> = self
            .config
            .features
            .iter()
            .map(|f| MonitoredFeature {
                name: f.name.clone(),
                kind: f.kind,
                role: FeatureRole::Input,
                method: f.method,
                threshold: f.threshold,
            })
            .collect();

        let prediction = &self.config.prediction;
        if prediction.monitor {
            features.push(MonitoredFeature {
                name: prediction.name.clone(),
                kind: FeatureKind::Categorical,
                role: FeatureRole::Prediction,
                method: prediction.method,
                threshold: prediction.threshold,
            });
        }
        features
    }

    /// Check the mapping against the columns both sources actually expose.
    ///
    /// Store columns that are neither mapped, the timestamp column, nor
    /// explicitly ignored are reported rather than dropped.
    pub fn validate_sources(&self, store_columns: &[String], reference_columns: &[String]) -> Result<()> {
        let mut problems = Vec::new();

        let store: HashSet<&str> = store_columns.iter().map(String::as_str).collect();
        let reference: HashSet<&str> = reference_columns.iter().map(String::as_str).collect();

        if !store.contains(self.timestamp_column.as_str()) {
            problems.push(format!(
                "timestamp column '{}' missing from store",
                self.timestamp_column
            ));
        }

        let mapped_store: Vec<&str> = self.mapped_store_columns().collect();
        for column in &mapped_store {
            if !store.contains(column) {
                problems.push(format!("store column '{}' not found", column));
            }
        }
        for column in self.mapped_reference_columns() {
            if !reference.contains(column) {
                problems.push(format!("reference column '{}' not found", column));
            }
        }

        for column in store_columns {
            let accounted = column == &self.timestamp_column
                || mapped_store.contains(&column.as_str())
                || self.ignored_columns.iter().any(|c| c == column);
            if !accounted {
                problems.push(format!(
                    "store column '{}' has no mapping (map it or list it in store.ignored_columns)",
                    column
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(AegisError::SchemaMismatch(problems.join("; ")))
        }
    }

    fn mapped_store_columns(&self) -> impl Iterator<Item = &str> {
        self.config
            .features
            .iter()
            .map(|f| f.store_column.as_str())
            .chain(std::iter::once(self.config.prediction.store_column.as_str()))
    }

    fn mapped_reference_columns(&self) -> impl Iterator<Item = &str> {
        self.config
            .features
            .iter()
            .map(|f| f.reference_column.as_str())
            .chain(std::iter::once(self.config.prediction.reference_column.as_str()))
    }

    /// Rename and coerce one stored record into canonical form
    pub fn align_record(&self, raw: &RawRecord) -> Result<FeatureRecord> {
        let timestamp = coerce_timestamp(&self.timestamp_column, &raw.timestamp)?;

        let mut values = Vec::with_capacity(self.config.features.len());
        for mapping in &self.config.features {
            let value = raw.get(&mapping.store_column).ok_or_else(|| {
                AegisError::SchemaMismatch(format!(
                    "record {} has no column '{}'",
                    raw.sequence, mapping.store_column
                ))
            })?;
            values.push((mapping.name.clone(), coerce_number(&mapping.store_column, value)?));
        }

        let prediction_mapping = &self.config.prediction;
        let raw_prediction = raw.get(&prediction_mapping.store_column).ok_or_else(|| {
            AegisError::SchemaMismatch(format!(
                "record {} has no column '{}'",
                raw.sequence, prediction_mapping.store_column
            ))
        })?;
        let prediction = coerce_raw_label(
            &prediction_mapping.store_column,
            raw_prediction,
            &prediction_mapping.labels,
        )?;

        Ok(FeatureRecord {
            sequence: raw.sequence,
            timestamp,
            values,
            prediction,
        })
    }
}

/// Numeric coercion for feature values
pub fn coerce_number(column: &str, value: &RawValue) -> Result<f64> {
    let number = match value {
        RawValue::Integer(v) => *v as f64,
        RawValue::Real(v) => *v,
        RawValue::Text(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| AegisError::coercion(column, value, "not a number"))?,
        RawValue::Null => return Err(AegisError::coercion(column, value, "missing value")),
    };
    if !number.is_finite() {
        return Err(AegisError::coercion(column, value, "non-finite value"));
    }
    Ok(number)
}

fn coerce_raw_label(column: &str, value: &RawValue, labels: &[i64]) -> Result<i64> {
    match value {
        RawValue::Integer(v) => check_label(column, *v, labels),
        RawValue::Null => Err(AegisError::coercion(column, value, "missing value")),
        other => coerce_label(column, coerce_number(column, other)?, labels),
    }
}

/// Map a numeric label onto the fixed integer domain
pub fn coerce_label(column: &str, value: f64, labels: &[i64]) -> Result<i64> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(AegisError::coercion(column, value, "label is not an integer"));
    }
    if value < i64::MIN as f64 || value > i64::MAX as f64 {
        return Err(AegisError::coercion(column, value, "label out of integer range"));
    }
    check_label(column, value as i64, labels)
}

fn check_label(column: &str, label: i64, labels: &[i64]) -> Result<i64> {
    if !labels.is_empty() && !labels.contains(&label) {
        return Err(AegisError::coercion(
            column,
            label,
            &format!("label outside configured domain {:?}", labels),
        ));
    }
    Ok(label)
}

/// Capture timestamps: RFC 3339, naive ISO-8601 (taken as UTC) or unix seconds
pub fn coerce_timestamp(column: &str, value: &RawValue) -> Result<DateTime<Utc>> {
    match value {
        RawValue::Text(text) => {
            let text = text.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
                return Ok(ts.with_timezone(&Utc));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                    return Ok(Utc.from_utc_datetime(&naive));
                }
            }
            Err(AegisError::coercion(column, value, "unrecognized timestamp format"))
        }
        RawValue::Integer(secs) => Utc
            .timestamp_opt(*secs, 0)
            .single()
            .ok_or_else(|| AegisError::coercion(column, value, "timestamp out of range")),
        RawValue::Real(secs) if secs.is_finite() => {
            let whole = secs.trunc() as i64;
            let nanos = ((secs - secs.trunc()) * 1e9).round() as u32;
            Utc.timestamp_opt(whole, nanos.min(999_999_999))
                .single()
                .ok_or_else(|| AegisError::coercion(column, value, "timestamp out of range"))
        }
        _ => Err(AegisError::coercion(column, value, "missing or invalid timestamp")),
    }
}
