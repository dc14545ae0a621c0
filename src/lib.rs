//! Aegis - drift monitoring for deployed classification models
//!
//! Live prediction inputs are logged to an observation store. On a fixed
//! interval the most recent window is compared, feature by feature, against
//! the reference distribution captured at training time, and the outcome is
//! published as a durable verdict artifact.
//!
//! # Modules
//!
//! ## Pipeline
//! - [`store`] - Observation store access (SQLite, in-memory)
//! - [`schema`] - Mapping between store, reference and canonical names
//! - [`reference`] - Reference baseline loading
//! - [`window`] - Selection of the most recent observations
//! - [`drift`] - Statistical tests, aggregation and the dataset verdict
//! - [`report`] - Atomic publishing of JSON and HTML artifacts
//!
//! ## Operation
//! - [`scheduler`] - Timer and manual detection cycles
//! - [`monitoring`] - Cycle statistics and alerting
//! - [`ingest`] - Traffic simulation into the store
//!
//! ## Services
//! - [`server`] - HTTP API
//! - [`cli`] - Command-line interface

// Core error handling and configuration
pub mod error;
pub mod config;

// Pipeline
pub mod store;
pub mod schema;
pub mod reference;
pub mod window;
pub mod drift;
pub mod report;

// Operation
pub mod scheduler;
pub mod monitoring;
pub mod ingest;

// Services
pub mod server;
pub mod cli;

pub use error::{AegisError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{AegisError, Result};

    // Configuration
    pub use crate::config::MonitorConfig;

    // Store and schema
    pub use crate::store::{MemoryStore, ObservationStore, SqliteIngestor, SqliteOpener, StoreOpener};
    pub use crate::schema::{FeatureKind, FeatureMapping, MonitoredFeature, SchemaConfig, SchemaMap};

    // Detection
    pub use crate::reference::ReferenceBaseline;
    pub use crate::window::{Window, WindowSelector};
    pub use crate::drift::{
        DatasetPolicy, DatasetVerdict, DetectionConfig, DriftDetector, DriftMethod, FeatureDriftResult,
        FeatureStatus, ThresholdRule,
    };

    // Artifacts
    pub use crate::report::{ArtifactReader, ArtifactState, ArtifactWriter, VerdictArtifact};

    // Scheduling
    pub use crate::scheduler::{CycleOutcome, CycleReport, MonitorEngine, Scheduler, Trigger};
}
