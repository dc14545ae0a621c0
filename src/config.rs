//! Monitor configuration
//!
//! Loaded from a TOML file, falling back to defaults that match the stock
//! breast-cancer classifier deployment. A handful of paths and the schedule
//! interval can be overridden from the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::drift::{DatasetPolicy, DetectionConfig};
use crate::error::{AegisError, Result};
use crate::schema::SchemaConfig;

/// Observation store location and layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database written by the ingestion process
    pub path: PathBuf,
    /// Table holding one row per prediction event
    pub table: String,
    /// Column carrying the capture timestamp
    pub timestamp_column: String,
    /// How long a read waits on a locked database before giving up
    pub busy_timeout_ms: u64,
    /// Store columns that are deliberately not monitored
    pub ignored_columns: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/monitoring.db"),
            table: "predictions".to_string(),
            timestamp_column: "timestamp".to_string(),
            busy_timeout_ms: 2_000,
            ignored_columns: Vec::new(),
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Reference baseline source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub path: PathBuf,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/reference_data.csv"),
        }
    }
}

/// Window sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Maximum number of recent observations compared per cycle
    pub capacity: usize,
    /// Below this many observations the cycle is skipped
    pub min_size: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            min_size: 10,
        }
    }
}

/// Scheduler cadence and per-cycle bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Fixed delay between the end of one cycle and the start of the next
    pub interval_secs: u64,
    /// Upper bound on reading the window from the store
    pub store_timeout_ms: u64,
    /// Upper bound on publishing the artifacts
    pub write_timeout_ms: u64,
    /// Consecutive failed cycles before the failure alert fires
    pub failure_alert_after: u32,
    /// Minimum seconds between two firings of the same alert
    pub alert_cooldown_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            store_timeout_ms: 5_000,
            write_timeout_ms: 5_000,
            failure_alert_after: 3,
            alert_cooldown_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Where and how verdict artifacts are published
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub dir: PathBuf,
    pub json_name: String,
    pub html_name: String,
    /// Timestamped JSON copies kept under `history/` (0 disables)
    pub history: usize,
    /// Age after which the latest artifact counts as stale; defaults to three intervals
    pub stale_after_secs: Option<u64>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("reports"),
            json_name: "drift_report_latest.json".to_string(),
            html_name: "drift_report_latest.html".to_string(),
            history: 0,
            stale_after_secs: None,
        }
    }
}

/// HTTP surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

/// Top-level monitor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub store: StoreConfig,
    pub reference: ReferenceConfig,
    pub schema: SchemaConfig,
    pub window: WindowConfig,
    pub detection: DetectionConfig,
    pub scheduler: SchedulerConfig,
    pub artifacts: ArtifactConfig,
    pub server: ServerSettings,
}

impl MonitorConfig {
    /// Load from an optional TOML file, apply environment overrides, validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating it
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AegisError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Override selected settings from `AEGIS_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("AEGIS_DB_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("AEGIS_REFERENCE_PATH") {
            self.reference.path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("AEGIS_REPORTS_DIR") {
            self.artifacts.dir = PathBuf::from(dir);
        }
        if let Some(secs) = std::env::var("AEGIS_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.scheduler.interval_secs = secs;
        }
    }

    /// Age after which a published artifact is reported as stale
    pub fn stale_after(&self) -> Duration {
        match self.artifacts.stale_after_secs {
            Some(secs) => Duration::from_secs(secs),
            None => self.scheduler.interval() * 3,
        }
    }

    /// Check every recognized option for a usable value
    pub fn validate(&self) -> Result<()> {
        if self.window.capacity == 0 {
            return Err(AegisError::ConfigError("window.capacity must be > 0".into()));
        }
        if self.window.min_size == 0 || self.window.min_size > self.window.capacity {
            return Err(AegisError::ConfigError(format!(
                "window.min_size must be in 1..={} (got {})",
                self.window.capacity, self.window.min_size
            )));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(AegisError::ConfigError("scheduler.interval_secs must be > 0".into()));
        }
        if self.scheduler.store_timeout_ms == 0 || self.scheduler.write_timeout_ms == 0 {
            return Err(AegisError::ConfigError("scheduler timeouts must be > 0".into()));
        }
        if self.store.table.trim().is_empty() || self.store.timestamp_column.trim().is_empty() {
            return Err(AegisError::ConfigError(
                "store.table and store.timestamp_column must be set".into(),
            ));
        }
        if self.artifacts.json_name == self.artifacts.html_name {
            return Err(AegisError::ConfigError(
                "artifacts.json_name and artifacts.html_name must differ".into(),
            ));
        }
        self.detection.validate()?;
        self.schema.validate()?;
        self.detection.validate_overrides(&self.schema)?;
        Ok(())
    }

    /// Dataset policy shortcut used by the CLI banner
    pub fn dataset_policy(&self) -> DatasetPolicy {
        self.detection.dataset_policy
    }
}
