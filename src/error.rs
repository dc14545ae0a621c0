//! Error types for the Aegis drift monitor

use thiserror::Error;

/// Result type alias for Aegis operations
pub type Result<T> = std::result::Result<T, AegisError>;

/// Main error type for the drift monitor
#[derive(Error, Debug)]
pub enum AegisError {
    #[error("Insufficient data: window holds {available} records, at least {required} required")]
    InsufficientData { available: usize, required: usize },

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Type coercion failed for column '{column}' (value {value}): {reason}")]
    TypeCoercion {
        column: String,
        value: String,
        reason: String,
    },

    #[error("Statistic computation failed for feature '{feature}': {reason}")]
    StatisticComputation { feature: String, reason: String },

    #[error("Artifact write error: {0}")]
    ArtifactWrite(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Reference data error: {0}")]
    Reference(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle aborted: {0}")]
    CycleAborted(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AegisError {
    /// Whether this error means the cycle should be skipped rather than counted as failed
    pub fn is_skip(&self) -> bool {
        matches!(self, AegisError::InsufficientData { .. })
    }

    /// Short stable label, used in logs and cycle reports
    pub fn kind(&self) -> &'static str {
        match self {
            AegisError::InsufficientData { .. } => "insufficient_data",
            AegisError::SchemaMismatch(_) => "schema_mismatch",
            AegisError::TypeCoercion { .. } => "type_coercion",
            AegisError::StatisticComputation { .. } => "statistic_computation",
            AegisError::ArtifactWrite(_) => "artifact_write",
            AegisError::Store(_) => "store",
            AegisError::Reference(_) => "reference",
            AegisError::Timeout { .. } => "timeout",
            AegisError::ConfigError(_) => "config",
            AegisError::CycleAborted(_) => "cycle_aborted",
            AegisError::IoError(_) => "io",
            AegisError::SerializationError(_) => "serialization",
        }
    }

    pub(crate) fn coercion(column: &str, value: impl std::fmt::Display, reason: &str) -> Self {
        AegisError::TypeCoercion {
            column: column.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<rusqlite::Error> for AegisError {
    fn from(err: rusqlite::Error) -> Self {
        AegisError::Store(err.to_string())
    }
}

impl From<polars::error::PolarsError> for AegisError {
    fn from(err: polars::error::PolarsError) -> Self {
        AegisError::Reference(err.to_string())
    }
}

impl From<serde_json::Error> for AegisError {
    fn from(err: serde_json::Error) -> Self {
        AegisError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for AegisError {
    fn from(err: toml::de::Error) -> Self {
        AegisError::ConfigError(err.to_string())
    }
}
