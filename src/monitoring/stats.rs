//! Cycle Statistics
//!
//! Counters and rolling timings for detection cycles.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Statistics summary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub std_dev: f64,
    pub sum: f64,
}

impl StatsSummary {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let count = values.len() as u64;
        let sum: f64 = values.iter().sum();
        let avg = sum / count as f64;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let variance: f64 = values.iter().map(|&x| (x - avg).powi(2)).sum::<f64>() / count as f64;

        Self {
            count,
            min,
            max,
            avg,
            std_dev: variance.sqrt(),
            sum,
        }
    }
}

#[derive(Debug, Default)]
struct LastEvents {
    outcome: Option<String>,
    success_at: Option<DateTime<Utc>>,
    failure_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// Detection cycle statistics, shared between the scheduler and readers
pub struct CycleStats {
    window_size: usize,
    durations_ms: RwLock<VecDeque<f64>>,

    completed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    consecutive_failures: AtomicU64,
    drifted_verdicts: AtomicU64,

    last: RwLock<LastEvents>,
    start_time: Instant,
}

impl CycleStats {
    /// `window_size` bounds the rolling duration sample
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            durations_ms: RwLock::new(VecDeque::with_capacity(window_size)),
            completed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            drifted_verdicts: AtomicU64::new(0),
            last: RwLock::new(LastEvents::default()),
            start_time: Instant::now(),
        }
    }

    fn record_duration(&self, duration_ms: f64) {
        let mut times = self.durations_ms.write();
        times.push_back(duration_ms);
        if times.len() > self.window_size {
            times.pop_front();
        }
    }

    pub fn record_completed(&self, duration_ms: f64, dataset_drifted: bool) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.consecutive_failures.store(0, Ordering::SeqCst);
        if dataset_drifted {
            self.drifted_verdicts.fetch_add(1, Ordering::SeqCst);
        }
        self.record_duration(duration_ms);

        let mut last = self.last.write();
        last.outcome = Some("completed".to_string());
        last.success_at = Some(Utc::now());
    }

    /// A skipped cycle neither resets nor extends the failure streak
    pub fn record_skipped(&self, duration_ms: f64) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.record_duration(duration_ms);
        self.last.write().outcome = Some("skipped".to_string());
    }

    pub fn record_failed(&self, duration_ms: f64, error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
        self.record_duration(duration_ms);

        let mut last = self.last.write();
        last.outcome = Some("failed".to_string());
        last.failure_at = Some(Utc::now());
        last.error = Some(error.to_string());
    }

    pub fn total_cycles(&self) -> u64 {
        self.completed() + self.skipped() + self.failed()
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub fn duration_stats(&self) -> StatsSummary {
        let times = self.durations_ms.read();
        let values: Vec<f64> = times.iter().copied().collect();
        StatsSummary::from_values(&values)
    }

    pub fn failure_rate(&self) -> f64 {
        let total = self.total_cycles();
        if total > 0 {
            self.failed() as f64 / total as f64
        } else {
            0.0
        }
    }

    pub fn uptime_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn snapshot(&self) -> CycleStatsSnapshot {
        let last = self.last.read();
        CycleStatsSnapshot {
            total_cycles: self.total_cycles(),
            completed: self.completed(),
            skipped: self.skipped(),
            failed: self.failed(),
            consecutive_failures: self.consecutive_failures(),
            drifted_verdicts: self.drifted_verdicts.load(Ordering::SeqCst),
            failure_rate: self.failure_rate(),
            last_outcome: last.outcome.clone(),
            last_success_at: last.success_at,
            last_failure_at: last.failure_at,
            last_error: last.error.clone(),
            uptime_secs: self.uptime_secs(),
            duration_ms: self.duration_stats(),
        }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Point-in-time view of [`CycleStats`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleStatsSnapshot {
    pub total_cycles: u64,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub consecutive_failures: u64,
    /// Completed cycles whose verdict flagged dataset drift
    pub drifted_verdicts: u64,
    pub failure_rate: f64,
    pub last_outcome: Option<String>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub uptime_secs: f64,
    /// Rolling cycle durations
    pub duration_ms: StatsSummary,
}
