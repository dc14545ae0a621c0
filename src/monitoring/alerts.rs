//! Alert System
//!
//! Alerting on cycle metrics: dataset drift, repeated cycle failures and
//! features whose tests keep coming back inconclusive.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::{error, info, warn};

/// Metric names produced by each detection cycle
pub mod metric {
    pub const DATASET_DRIFTED: &str = "dataset_drifted";
    pub const DRIFT_SHARE: &str = "drift_share";
    pub const INCONCLUSIVE_SHARE: &str = "inconclusive_share";
    pub const CONSECUTIVE_FAILURES: &str = "consecutive_failures";
}

const HISTORY_LIMIT: usize = 1_000;

/// Severity level for alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    /// Requires immediate attention
    Critical,
}

/// Condition that triggers an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    GreaterThan(f64),
    AtLeast(f64),
    LessThan(f64),
}

impl AlertCondition {
    pub fn evaluate(&self, value: f64) -> bool {
        match self {
            AlertCondition::GreaterThan(threshold) => value > *threshold,
            AlertCondition::AtLeast(threshold) => value >= *threshold,
            AlertCondition::LessThan(threshold) => value < *threshold,
        }
    }
}

/// A single alert definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub name: String,
    /// Name of the metric to watch
    pub metric_name: String,
    pub condition: AlertCondition,
    pub level: AlertLevel,
    /// Human-readable message when triggered
    pub message: String,
    /// Minimum seconds between consecutive triggers
    pub cooldown_secs: u64,
    #[serde(skip)]
    pub last_triggered: Option<Instant>,
    pub triggered_count: u64,
}

impl Alert {
    pub fn new(
        name: impl Into<String>,
        metric_name: impl Into<String>,
        condition: AlertCondition,
        level: AlertLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            metric_name: metric_name.into(),
            condition,
            level,
            message: message.into(),
            cooldown_secs: 60,
            last_triggered: None,
            triggered_count: 0,
        }
    }

    pub fn with_cooldown(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    pub fn is_in_cooldown(&self) -> bool {
        match self.last_triggered {
            Some(last) => last.elapsed().as_secs() < self.cooldown_secs,
            None => false,
        }
    }
}

/// Record of a triggered alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub name: String,
    pub level: AlertLevel,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// The metric value that triggered the alert
    pub metric_value: f64,
    pub message: String,
}

type AlertHandler = Box<dyn Fn(&AlertRecord) + Send + Sync>;

/// Manages alert definitions, evaluation, and history
pub struct AlertManager {
    alerts: Vec<Alert>,
    handlers: Vec<AlertHandler>,
    history: VecDeque<AlertRecord>,
}

impl AlertManager {
    pub fn new() -> Self {
        Self {
            alerts: Vec::new(),
            handlers: Vec::new(),
            history: VecDeque::new(),
        }
    }

    /// The monitor's standard alerts, logged through `tracing`
    pub fn with_defaults(failure_alert_after: u32, cooldown_secs: u64) -> Self {
        let mut manager = Self::new();
        manager.add_alert(
            Alert::new(
                "dataset_drift",
                metric::DATASET_DRIFTED,
                AlertCondition::GreaterThan(0.5),
                AlertLevel::Critical,
                "Dataset drift detected in live traffic",
            )
            .with_cooldown(cooldown_secs),
        );
        manager.add_alert(
            Alert::new(
                "repeated_cycle_failures",
                metric::CONSECUTIVE_FAILURES,
                AlertCondition::AtLeast(f64::from(failure_alert_after.max(1))),
                AlertLevel::Error,
                "Detection cycles keep failing; the published verdict is going stale",
            )
            .with_cooldown(cooldown_secs),
        );
        manager.add_alert(
            Alert::new(
                "inconclusive_features",
                metric::INCONCLUSIVE_SHARE,
                AlertCondition::GreaterThan(0.5),
                AlertLevel::Warning,
                "Most monitored features could not be tested",
            )
            .with_cooldown(cooldown_secs),
        );
        manager.add_handler(Box::new(log_alert));
        manager
    }

    pub fn add_alert(&mut self, alert: Alert) {
        self.alerts.push(alert);
    }

    pub fn remove_alert(&mut self, name: &str) {
        self.alerts.retain(|a| a.name != name);
    }

    /// Register a handler called for every triggered alert
    pub fn add_handler(&mut self, handler: AlertHandler) {
        self.handlers.push(handler);
    }

    /// Evaluate all alerts against current metric values; returns the records of those that fired
    pub fn check_alerts(&mut self, metrics: &HashMap<String, f64>) -> Vec<AlertRecord> {
        let mut triggered = Vec::new();

        for alert in self.alerts.iter_mut() {
            let Some(&value) = metrics.get(&alert.metric_name) else {
                continue;
            };
            if !alert.condition.evaluate(value) || alert.is_in_cooldown() {
                continue;
            }

            alert.last_triggered = Some(Instant::now());
            alert.triggered_count += 1;

            let record = AlertRecord {
                name: alert.name.clone(),
                level: alert.level,
                timestamp: chrono::Utc::now(),
                metric_value: value,
                message: format!("{} (value: {:.4})", alert.message, value),
            };
            for handler in &self.handlers {
                handler(&record);
            }

            self.history.push_back(record.clone());
            if self.history.len() > HISTORY_LIMIT {
                self.history.pop_front();
            }
            triggered.push(record);
        }

        triggered
    }

    pub fn get_active_alerts(&self) -> Vec<&Alert> {
        self.alerts.iter().collect()
    }

    /// Triggered alerts, oldest first
    pub fn get_alert_history(&self) -> Vec<AlertRecord> {
        self.history.iter().cloned().collect()
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}

fn log_alert(record: &AlertRecord) {
    match record.level {
        AlertLevel::Critical | AlertLevel::Error => {
            error!(alert = %record.name, value = record.metric_value, "{}", record.message)
        }
        AlertLevel::Warning => warn!(alert = %record.name, value = record.metric_value, "{}", record.message),
        AlertLevel::Info => info!(alert = %record.name, value = record.metric_value, "{}", record.message),
    }
}
