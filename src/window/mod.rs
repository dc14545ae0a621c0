//! Window selection
//!
//! Each cycle takes a fresh snapshot of the most recent observations. The
//! store is only read, never modified.

use chrono::{DateTime, Utc};
use ndarray::Array1;
use tracing::debug;

use crate::error::{AegisError, Result};
use crate::schema::{FeatureRole, MonitoredFeature, SchemaMap};
use crate::store::{FeatureRecord, ObservationStore};

/// The bounded set of recent observations compared in one cycle
#[derive(Debug, Clone)]
pub struct Window {
    features: Vec<MonitoredFeature>,
    /// Newest first
    records: Vec<FeatureRecord>,
    captured_at: DateTime<Utc>,
}

impl Window {
    pub fn new(features: Vec<MonitoredFeature>, records: Vec<FeatureRecord>) -> Self {
        Self {
            features,
            records,
            captured_at: Utc::now(),
        }
    }

    pub fn features(&self) -> &[MonitoredFeature] {
        &self.features
    }

    pub fn records(&self) -> &[FeatureRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Capture time span covered by the window (oldest, newest)
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let newest = self.records.first()?.timestamp;
        let oldest = self.records.last()?.timestamp;
        Some((oldest, newest))
    }

    pub fn feature_names(&self) -> Vec<&str> {
        self.features.iter().map(|f| f.name.as_str()).collect()
    }

    /// Values of one monitored feature, newest first
    pub fn column(&self, feature: &MonitoredFeature) -> Option<Array1<f64>> {
        let monitored = self.features.iter().find(|f| f.name == feature.name)?;
        match monitored.role {
            FeatureRole::Prediction => Some(self.records.iter().map(|r| r.prediction as f64).collect()),
            FeatureRole::Input => self
                .records
                .iter()
                .map(|r| r.value(&monitored.name))
                .collect::<Option<Array1<f64>>>(),
        }
    }
}

/// Reads the most recent observations from the store
#[derive(Debug, Clone, Copy)]
pub struct WindowSelector {
    capacity: usize,
    min_size: usize,
}

impl WindowSelector {
    pub fn new(capacity: usize, min_size: usize) -> Self {
        Self { capacity, min_size }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Up to `capacity` newest records, aligned to canonical form.
    ///
    /// Fails with `InsufficientData` before any alignment when the store
    /// yields fewer than `min_size` records.
    pub fn select(&self, store: &dyn ObservationStore, schema: &SchemaMap) -> Result<Window> {
        let raw = store.latest(self.capacity)?;
        if raw.len() < self.min_size {
            return Err(AegisError::InsufficientData {
                available: raw.len(),
                required: self.min_size,
            });
        }

        let records = raw
            .iter()
            .map(|record| schema.align_record(record))
            .collect::<Result<Vec<_>>>()?;

        debug!(rows = records.len(), capacity = self.capacity, "Selected window");
        Ok(Window::new(schema.monitored(), records))
    }
}
