//! Monitoring Module
//!
//! Cycle statistics and alerting.

pub mod alerts;
mod stats;

pub use alerts::{metric, Alert, AlertCondition, AlertLevel, AlertManager, AlertRecord};
pub use stats::{CycleStats, CycleStatsSnapshot, StatsSummary};
