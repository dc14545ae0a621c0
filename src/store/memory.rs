//! In-process observation store

use parking_lot::RwLock;
use std::sync::Arc;

use super::{ObservationStore, RawRecord, RawValue, StoreOpener};
use crate::error::{AegisError, Result};

/// Append-only in-memory log; clones share the same records
#[derive(Debug, Clone)]
pub struct MemoryStore {
    columns: Arc<Vec<String>>,
    timestamp_column: Arc<String>,
    records: Arc<RwLock<Vec<RawRecord>>>,
}

impl MemoryStore {
    /// `columns` are the data columns, excluding the timestamp column
    pub fn new(timestamp_column: &str, columns: &[&str]) -> Self {
        Self {
            columns: Arc::new(columns.iter().map(|c| c.to_string()).collect()),
            timestamp_column: Arc::new(timestamp_column.to_string()),
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Append one observation; values must follow the column order given at construction
    pub fn append(&self, timestamp: RawValue, values: Vec<RawValue>) -> Result<i64> {
        if values.len() != self.columns.len() {
            return Err(AegisError::Store(format!(
                "expected {} values, got {}",
                self.columns.len(),
                values.len()
            )));
        }

        let mut records = self.records.write();
        let sequence = records.len() as i64 + 1;
        records.push(RawRecord {
            sequence,
            timestamp,
            values: self.columns.iter().cloned().zip(values).collect(),
        });
        Ok(sequence)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ObservationStore for MemoryStore {
    fn columns(&self) -> Result<Vec<String>> {
        let mut columns = vec![self.timestamp_column.to_string()];
        columns.extend(self.columns.iter().cloned());
        Ok(columns)
    }

    fn count(&self) -> Result<usize> {
        Ok(self.len())
    }

    fn latest(&self, limit: usize) -> Result<Vec<RawRecord>> {
        let records = self.records.read();
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}

impl StoreOpener for MemoryStore {
    fn open(&self) -> Result<Box<dyn ObservationStore>> {
        Ok(Box::new(self.clone()))
    }

    fn describe(&self) -> String {
        format!("memory ({} records)", self.len())
    }
}
