//! Traffic simulation
//!
//! Stands in for the serving process: replays rows of a CSV in reference
//! layout into the observation store, one row per tick. After a configured
//! number of rows one feature is multiplied by a random factor, the way a
//! failing sensor would skew it.

use chrono::Utc;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{AegisError, Result};
use crate::reference::read_numeric;
use crate::schema::{coerce_label, SchemaMap};
use crate::store::{ColumnType, RawValue, SqliteIngestor};

/// Range of the multiplicative skew applied once drift starts
pub const DRIFT_FACTOR_RANGE: std::ops::Range<f64> = 1.5..3.0;

#[derive(Debug, Clone)]
pub struct SimulationSettings {
    /// CSV with the reference column layout, including the prediction
    pub source: PathBuf,
    /// Canonical name of the feature to skew
    pub drift_feature: String,
    /// Rows emitted unmodified before the skew starts
    pub drift_after: usize,
    pub tick: Duration,
    /// Stop after this many rows; `None` runs until shutdown
    pub limit: Option<usize>,
    pub seed: Option<u64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            source: PathBuf::from("data/production_data_source.csv"),
            drift_feature: "mean radius".to_string(),
            drift_after: 50,
            tick: Duration::from_millis(500),
            limit: None,
            seed: None,
        }
    }
}

/// One row written to the store
#[derive(Debug, Clone, Serialize)]
pub struct EmittedRow {
    pub index: usize,
    pub sequence: i64,
    pub drifted: bool,
    pub values: Vec<(String, f64)>,
    pub prediction: i64,
}

pub struct TrafficSimulator {
    feature_names: Vec<String>,
    /// Source values in mapping order, one Vec per row
    rows: Vec<Vec<f64>>,
    predictions: Vec<i64>,
    drift_index: usize,
    settings: SimulationSettings,
    ingestor: SqliteIngestor,
    rng: StdRng,
    emitted: usize,
}

impl TrafficSimulator {
    /// Load the source CSV and open (creating if needed) the store table
    pub fn new(schema: &SchemaMap, store: &StoreConfig, settings: SimulationSettings) -> Result<Self> {
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(1000))
            .try_into_reader_with_file_path(Some(settings.source.clone()))?
            .finish()?;
        if df.height() == 0 {
            return Err(AegisError::Reference(format!("{} has no rows", settings.source.display())));
        }

        let mut columns = Vec::with_capacity(schema.features().len());
        for mapping in schema.features() {
            columns.push(read_numeric(&df, &mapping.reference_column)?);
        }
        let prediction = schema.prediction();
        let predictions = read_numeric(&df, &prediction.reference_column)?
            .into_iter()
            .map(|v| coerce_label(&prediction.reference_column, v, &prediction.labels))
            .collect::<Result<Vec<i64>>>()?;

        let rows = (0..df.height())
            .map(|r| columns.iter().map(|c| c[r]).collect())
            .collect();
        let feature_names: Vec<String> = schema.features().iter().map(|m| m.name.clone()).collect();
        let drift_index = feature_names
            .iter()
            .position(|n| n == &settings.drift_feature)
            .ok_or_else(|| {
                AegisError::ConfigError(format!("drift feature '{}' is not mapped", settings.drift_feature))
            })?;

        let mut table: Vec<(String, ColumnType)> = schema
            .features()
            .iter()
            .map(|m| (m.store_column.clone(), ColumnType::Real))
            .collect();
        table.push((prediction.store_column.clone(), ColumnType::Integer));
        let ingestor = SqliteIngestor::create(&store.path, &store.table, &store.timestamp_column, &table)?;

        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            source = %settings.source.display(),
            rows = df.height(),
            store = %store.path.display(),
            drift_feature = %settings.drift_feature,
            drift_after = settings.drift_after,
            "Traffic simulator ready"
        );

        Ok(Self {
            feature_names,
            rows,
            predictions,
            drift_index,
            settings,
            ingestor,
            rng,
            emitted: 0,
        })
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn source(&self) -> &Path {
        &self.settings.source
    }

    /// Write the next source row, cycling through the source
    pub fn emit(&mut self) -> Result<EmittedRow> {
        let index = self.emitted;
        let row = index % self.rows.len();
        let mut values = self.rows[row].clone();

        let drifted = index > self.settings.drift_after;
        if drifted {
            values[self.drift_index] *= self.rng.gen_range(DRIFT_FACTOR_RANGE);
        }
        let prediction = self.predictions[row];

        let mut raw: Vec<RawValue> = values.iter().map(|&v| RawValue::Real(v)).collect();
        raw.push(RawValue::Integer(prediction));
        let sequence = self.ingestor.append(Utc::now(), &raw)?;
        self.emitted += 1;

        debug!(index, sequence, drifted, "Emitted row");
        Ok(EmittedRow {
            index,
            sequence,
            drifted,
            values: self.feature_names.iter().cloned().zip(values).collect(),
            prediction,
        })
    }

    /// Emit rows on a fixed tick until the limit or shutdown
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<usize> {
        loop {
            if *shutdown.borrow() || self.settings.limit.is_some_and(|limit| self.emitted >= limit) {
                break;
            }
            let row = self.emit()?;
            if row.index % 10 == 0 {
                info!(index = row.index, drifted = row.drifted, "Simulated traffic");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.tick) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(rows = self.emitted, "Traffic simulator stopped");
        Ok(self.emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaConfig;
    use crate::store::{ObservationStore, SqliteStore};
    use std::io::Write;

    fn setup(dir: &tempfile::TempDir, drift_after: usize) -> (TrafficSimulator, StoreConfig) {
        let source = dir.path().join("source.csv");
        let mut file = std::fs::File::create(&source).unwrap();
        writeln!(file, "mean radius,mean texture,mean smoothness,prediction").unwrap();
        for i in 0..5 {
            writeln!(file, "{},{},0.1,{}", 10 + i, 20 + i, i % 2).unwrap();
        }

        let store = StoreConfig {
            path: dir.path().join("db").join("monitoring.db"),
            ..StoreConfig::default()
        };
        let schema = SchemaMap::new(SchemaConfig::default(), &store.timestamp_column, &[]).unwrap();
        let settings = SimulationSettings {
            source,
            drift_after,
            tick: Duration::from_millis(1),
            limit: Some(8),
            seed: Some(7),
            ..SimulationSettings::default()
        };
        (TrafficSimulator::new(&schema, &store, settings).unwrap(), store)
    }

    #[test]
    fn test_emit_cycles_source_and_skews_after_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sim, _) = setup(&dir, 5);

        let rows: Vec<EmittedRow> = (0..8).map(|_| sim.emit().unwrap()).collect();
        assert!(rows[..6].iter().all(|r| !r.drifted));
        assert_eq!(rows[5].values[0].1, 10.0);

        let skewed = &rows[6];
        assert!(skewed.drifted);
        let factor = skewed.values[0].1 / 11.0;
        assert!(DRIFT_FACTOR_RANGE.contains(&factor));
        // Only the configured feature is touched
        assert_eq!(skewed.values[1].1, 21.0);
        assert_eq!(skewed.prediction, 1);
    }

    #[tokio::test]
    async fn test_run_stops_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sim, store) = setup(&dir, 50);
        let (_tx, rx) = watch::channel(false);

        assert_eq!(sim.run(rx).await.unwrap(), 8);

        let reader = SqliteStore::open_read_only(
            &store.path,
            &store.table,
            &store.timestamp_column,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(reader.count().unwrap(), 8);
    }
}
