//! Observation store access
//!
//! The store is owned by the ingestion process; the monitor only ever reads
//! it. A fresh handle is opened for each detection cycle through a
//! [`StoreOpener`] and dropped when the cycle ends.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{ColumnType, SqliteIngestor, SqliteOpener, SqliteStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// An untyped stored value, before schema coercion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Null => write!(f, "NULL"),
            RawValue::Integer(v) => write!(f, "{}", v),
            RawValue::Real(v) => write!(f, "{}", v),
            RawValue::Text(v) => write!(f, "'{}'", v),
        }
    }
}

/// One stored observation, keyed by store column names
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Monotonic insertion sequence (the ordering key)
    pub sequence: i64,
    pub timestamp: RawValue,
    pub values: Vec<(String, RawValue)>,
}

impl RawRecord {
    pub fn get(&self, column: &str) -> Option<&RawValue> {
        self.values.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }
}

/// One observation in canonical form
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRecord {
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
    /// Feature values in mapping-table order, keyed by canonical name
    pub values: Vec<(String, f64)>,
    pub prediction: i64,
}

impl FeatureRecord {
    pub fn value(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

/// Read access to the observation log
pub trait ObservationStore: Send {
    /// Every column the store exposes, including the timestamp column
    fn columns(&self) -> Result<Vec<String>>;

    /// Number of stored observations
    fn count(&self) -> Result<usize>;

    /// Up to `limit` most recently inserted observations, newest first
    fn latest(&self, limit: usize) -> Result<Vec<RawRecord>>;
}

/// Opens scoped store handles, one per cycle
pub trait StoreOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn ObservationStore>>;

    /// Human-readable location for logs
    fn describe(&self) -> String;
}
