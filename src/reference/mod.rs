//! Reference baseline
//!
//! The distribution snapshot captured at training time. Loaded once at
//! startup and never modified afterwards.

use ndarray::{Array1, Array2};
use polars::prelude::*;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::Path;
use tracing::info;

use crate::error::{AegisError, Result};
use crate::schema::{coerce_label, FeatureRole, MonitoredFeature, SchemaMap};

/// Immutable reference table in canonical feature order
#[derive(Debug, Clone)]
pub struct ReferenceBaseline {
    features: Vec<MonitoredFeature>,
    /// One column per monitored feature
    data: Array2<f64>,
    /// Header of the source table, for schema validation
    source_columns: Vec<String>,
    digest: String,
}

impl ReferenceBaseline {
    /// Load the reference CSV and align it through the schema mapping
    pub fn from_csv(path: &Path, schema: &SchemaMap) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| AegisError::Reference(format!("cannot read {}: {}", path.display(), e)))?;
        let digest = hex::encode(Sha256::digest(&bytes));

        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(1000))
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()?;

        let source_columns: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let features = schema.monitored();
        let mut columns = Vec::with_capacity(features.len());
        for feature in &features {
            let column = match feature.role {
                FeatureRole::Input => {
                    let mapping = schema
                        .features()
                        .iter()
                        .find(|m| m.name == feature.name)
                        .ok_or_else(|| AegisError::SchemaMismatch(format!("no mapping for '{}'", feature.name)))?;
                    read_numeric(&df, &mapping.reference_column)?
                }
                FeatureRole::Prediction => {
                    let prediction = schema.prediction();
                    read_numeric(&df, &prediction.reference_column)?
                        .iter()
                        .map(|&v| coerce_label(&prediction.reference_column, v, &prediction.labels).map(|l| l as f64))
                        .collect::<Result<Vec<f64>>>()?
                }
            };
            columns.push(column);
        }

        let baseline = Self::from_columns(features, columns, source_columns, digest)?;
        info!(
            path = %path.display(),
            rows = baseline.len(),
            features = baseline.features.len(),
            digest = %&baseline.digest[..12],
            "Loaded reference baseline"
        );
        Ok(baseline)
    }

    /// Build a baseline in memory; each row holds one value per feature
    pub fn from_rows(features: Vec<MonitoredFeature>, rows: &[Vec<f64>]) -> Result<Self> {
        let mut hasher = Sha256::new();
        let mut columns = vec![Vec::with_capacity(rows.len()); features.len()];
        for (i, row) in rows.iter().enumerate() {
            if row.len() != features.len() {
                return Err(AegisError::Reference(format!(
                    "row {} has {} values, expected {}",
                    i,
                    row.len(),
                    features.len()
                )));
            }
            for (column, &value) in columns.iter_mut().zip(row) {
                hasher.update(value.to_le_bytes());
                column.push(value);
            }
        }

        let source_columns = features.iter().map(|f| f.name.clone()).collect();
        let digest = hex::encode(hasher.finalize());
        Self::from_columns(features, columns, source_columns, digest)
    }

    fn from_columns(
        features: Vec<MonitoredFeature>,
        columns: Vec<Vec<f64>>,
        source_columns: Vec<String>,
        digest: String,
    ) -> Result<Self> {
        let n_rows = columns.first().map_or(0, Vec::len);
        if n_rows == 0 {
            return Err(AegisError::Reference("reference table has no rows".into()));
        }
        let data = Array2::from_shape_fn((n_rows, columns.len()), |(r, c)| columns[c][r]);

        Ok(Self {
            features,
            data,
            source_columns,
            digest,
        })
    }

    pub fn features(&self) -> &[MonitoredFeature] {
        &self.features
    }

    /// Column header of the source table
    pub fn columns(&self) -> &[String] {
        &self.source_columns
    }

    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    /// Hex SHA-256 of the source
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Values of one monitored feature
    pub fn column(&self, feature: &MonitoredFeature) -> Option<Array1<f64>> {
        let idx = self.features.iter().position(|f| f.name == feature.name)?;
        Some(self.data.column(idx).to_owned())
    }
}

/// Read a column as f64; missing or non-numeric cells are coercion errors
pub(crate) fn read_numeric(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = df
        .column(name)
        .map_err(|_| AegisError::SchemaMismatch(format!("reference column '{}' not found", name)))?;
    let original = column.as_materialized_series();
    let cast = original.cast(&DataType::Float64)?;

    cast.f64()?
        .into_iter()
        .enumerate()
        .map(|(row, value)| match value {
            Some(v) if v.is_finite() => Ok(v),
            Some(v) => Err(AegisError::coercion(name, v, &format!("non-finite value in row {}", row))),
            None => {
                let raw = original
                    .get(row)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|_| "?".to_string());
                Err(AegisError::coercion(name, raw, &format!("missing or non-numeric value in row {}", row)))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn schema() -> SchemaMap {
        SchemaMap::new(SchemaConfig::default(), "timestamp", &[]).unwrap()
    }

    fn csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_reference_csv() {
        let file = csv(
            "mean radius,mean texture,mean smoothness,mean area,prediction\n\
             14.1,19.2,0.09,600.0,1\n\
             20.5,21.0,0.11,1200.0,0\n\
             12.0,17.5,0.08,450.0,1\n",
        );
        let baseline = ReferenceBaseline::from_csv(file.path(), &schema()).unwrap();

        assert_eq!(baseline.len(), 3);
        assert_eq!(baseline.features().len(), 4);
        assert!(baseline.columns().contains(&"mean area".to_string()));
        assert_eq!(baseline.digest().len(), 64);

        let radius = baseline.column(&baseline.features()[0].clone()).unwrap();
        assert_eq!(radius.to_vec(), vec![14.1, 20.5, 12.0]);
        let prediction = baseline.column(&baseline.features()[3].clone()).unwrap();
        assert_eq!(prediction.to_vec(), vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_missing_cell_is_coercion_error() {
        let file = csv(
            "mean radius,mean texture,mean smoothness,prediction\n\
             14.1,,0.09,1\n\
             20.5,21.0,0.11,0\n",
        );
        let err = ReferenceBaseline::from_csv(file.path(), &schema()).unwrap_err();
        assert!(matches!(err, AegisError::TypeCoercion { ref column, .. } if column == "mean texture"));
    }

    #[test]
    fn test_label_outside_domain_is_coercion_error() {
        let file = csv(
            "mean radius,mean texture,mean smoothness,prediction\n\
             14.1,19.0,0.09,3\n",
        );
        let err = ReferenceBaseline::from_csv(file.path(), &schema()).unwrap_err();
        assert!(matches!(err, AegisError::TypeCoercion { .. }));
    }

    #[test]
    fn test_missing_file_is_reference_error() {
        let err = ReferenceBaseline::from_csv(Path::new("/nonexistent/reference.csv"), &schema()).unwrap_err();
        assert!(matches!(err, AegisError::Reference(_)));
    }

    #[test]
    fn test_from_rows_digest_is_stable() {
        let features = schema().monitored();
        let rows = vec![vec![1.0, 2.0, 3.0, 0.0], vec![4.0, 5.0, 6.0, 1.0]];
        let a = ReferenceBaseline::from_rows(features.clone(), &rows).unwrap();
        let b = ReferenceBaseline::from_rows(features.clone(), &rows).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert!(ReferenceBaseline::from_rows(features, &[vec![1.0]]).is_err());
    }
}
