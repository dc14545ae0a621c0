//! Detection cycle scheduling
//!
//! Timer-driven and manually triggered cycles share one entry point,
//! [`Scheduler::trigger`], which serializes cycles through an async gate.
//! Store reads and artifact writes run on the blocking pool with an upper
//! bound each; a cycle that exceeds either bound is a failed cycle and the
//! next one starts after the regular delay. A timed-out task still holds the
//! gate until it returns, and a timed-out publish never commits.

mod engine;

pub use engine::MonitorEngine;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AegisError, Result};
use crate::report::CommitToken;
use crate::monitoring::{metric, AlertManager, AlertRecord, CycleStats, CycleStatsSnapshot};

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Timer,
    Manual,
}

/// Typed result of one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed {
        dataset_drifted: bool,
        drift_share: f64,
        drifted_features: Vec<String>,
        inconclusive_count: usize,
        window_rows: usize,
        artifact: PathBuf,
    },
    /// Not enough data yet; nothing was published
    Skipped { reason: String },
    Failed { kind: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub trigger: Trigger,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Completed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Failed { .. })
    }
}

/// Runs detection cycles against a bootstrapped engine
pub struct Scheduler {
    engine: Arc<MonitorEngine>,
    gate: tokio::sync::Mutex<()>,
    interval: Duration,
    store_timeout: Duration,
    write_timeout: Duration,
    stats: CycleStats,
    alerts: Mutex<AlertManager>,
    last_report: RwLock<Option<CycleReport>>,
}

impl Scheduler {
    pub fn new(engine: MonitorEngine) -> Self {
        let scheduler = &engine.config().scheduler;
        let interval = scheduler.interval();
        let store_timeout = scheduler.store_timeout();
        let write_timeout = scheduler.write_timeout();
        let alerts = AlertManager::with_defaults(scheduler.failure_alert_after, scheduler.alert_cooldown_secs);

        Self {
            engine: Arc::new(engine),
            gate: tokio::sync::Mutex::new(()),
            interval,
            store_timeout,
            write_timeout,
            stats: CycleStats::default(),
            alerts: Mutex::new(alerts),
            last_report: RwLock::new(None),
        }
    }

    /// Override the delay between timer cycles
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeouts(mut self, store: Duration, write: Duration) -> Self {
        self.store_timeout = store;
        self.write_timeout = write;
        self
    }

    pub fn engine(&self) -> &MonitorEngine {
        &self.engine
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a cycle currently holds the gate
    pub fn is_running(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    pub fn stats(&self) -> CycleStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn alert_history(&self) -> Vec<AlertRecord> {
        self.alerts.lock().get_alert_history()
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.read().clone()
    }

    /// Run one cycle on its own task, so the cycle finishes under the gate
    /// even if the caller stops waiting for it.
    pub async fn trigger_detached(self: &Arc<Self>, trigger: Trigger) -> Result<CycleReport> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.trigger(trigger).await })
            .await
            .map_err(|e| AegisError::CycleAborted(format!("cycle task failed: {}", e)))
    }

    /// Run one cycle. Waits for any in-flight cycle to finish first.
    ///
    /// Dropping the returned future mid-cycle releases the gate early; callers
    /// that may be cancelled use [`trigger_detached`](Self::trigger_detached).
    pub async fn trigger(&self, trigger: Trigger) -> CycleReport {
        let _guard = self.gate.lock().await;

        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        let outcome = match self.run_cycle(cycle_id).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_skip() => {
                info!(%cycle_id, reason = %err, "Cycle skipped");
                CycleOutcome::Skipped { reason: err.to_string() }
            }
            Err(err) => {
                error!(%cycle_id, kind = err.kind(), error = %err, "Cycle failed");
                CycleOutcome::Failed {
                    kind: err.kind().to_string(),
                    error: err.to_string(),
                }
            }
        };

        let duration = start.elapsed();
        let duration_ms = duration.as_millis() as u64;
        self.record(&outcome, duration.as_secs_f64() * 1000.0);

        let report = CycleReport {
            cycle_id,
            trigger,
            started_at,
            duration_ms,
            outcome,
        };
        *self.last_report.write() = Some(report.clone());
        report
    }

    async fn run_cycle(&self, cycle_id: Uuid) -> Result<CycleOutcome> {
        let engine = Arc::clone(&self.engine);
        let window = bounded("store read", self.store_timeout, None, move || engine.read_window()).await?;

        let engine = Arc::clone(&self.engine);
        let (window, verdict) = tokio::task::spawn_blocking(move || {
            let verdict = engine.detect(&window);
            (window, verdict)
        })
        .await
        .map_err(|e| AegisError::CycleAborted(format!("detection task failed: {}", e)))?;
        let verdict = verdict?;

        let artifact = self.engine.build_artifact(cycle_id, &window, verdict);
        let outcome = CycleOutcome::Completed {
            dataset_drifted: artifact.verdict.dataset_drifted,
            drift_share: artifact.verdict.drift_share,
            drifted_features: artifact
                .verdict
                .drifted_feature_names()
                .into_iter()
                .map(String::from)
                .collect(),
            inconclusive_count: artifact.verdict.inconclusive_count,
            window_rows: window.len(),
            artifact: self.engine.writer().json_path(),
        };

        let engine = Arc::clone(&self.engine);
        let published_artifact = artifact.clone();
        let token = Arc::new(CommitToken::new());
        let publish_token = Arc::clone(&token);
        bounded("artifact write", self.write_timeout, Some(token), move || {
            engine.publish_with(&published_artifact, &publish_token)
        })
        .await?;

        let verdict = &artifact.verdict;
        if verdict.dataset_drifted {
            warn!(
                %cycle_id,
                drift_share = verdict.drift_share,
                drifted = ?verdict.drifted_feature_names(),
                window_rows = verdict.window_rows,
                "Dataset drift detected"
            );
        } else {
            info!(
                %cycle_id,
                drift_share = verdict.drift_share,
                inconclusive = verdict.inconclusive_count,
                window_rows = verdict.window_rows,
                "No dataset drift"
            );
        }
        Ok(outcome)
    }

    fn record(&self, outcome: &CycleOutcome, duration_ms: f64) {
        let mut metrics = HashMap::new();
        match outcome {
            CycleOutcome::Completed {
                dataset_drifted,
                drift_share,
                inconclusive_count,
                ..
            } => {
                self.stats.record_completed(duration_ms, *dataset_drifted);
                metrics.insert(metric::DATASET_DRIFTED.to_string(), if *dataset_drifted { 1.0 } else { 0.0 });
                metrics.insert(metric::DRIFT_SHARE.to_string(), *drift_share);
                let total = self.engine.reference().features().len().max(1) as f64;
                metrics.insert(metric::INCONCLUSIVE_SHARE.to_string(), *inconclusive_count as f64 / total);
            }
            CycleOutcome::Skipped { .. } => self.stats.record_skipped(duration_ms),
            CycleOutcome::Failed { kind, .. } => self.stats.record_failed(duration_ms, kind),
        }
        metrics.insert(
            metric::CONSECUTIVE_FAILURES.to_string(),
            self.stats.consecutive_failures() as f64,
        );
        self.alerts.lock().check_alerts(&metrics);
    }

    /// Timer loop: cycle, then wait the fixed interval, until shutdown.
    ///
    /// The shutdown signal only interrupts the wait; a running cycle always
    /// completes first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            store = %self.engine.store_location(),
            "Scheduler started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.trigger(Trigger::Timer).await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(cycles = self.stats.total_cycles(), "Scheduler stopped");
    }
}

/// Run blocking work on the blocking pool with an upper bound.
///
/// On timeout the work is not abandoned: `token` (if any) is cancelled and
/// the task is awaited before returning, so the caller keeps the gate until
/// the blocking pool is done with it. If the work already passed its commit
/// point its own result is returned instead of the timeout.
async fn bounded<T, F>(operation: &str, limit: Duration, token: Option<Arc<CommitToken>>, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let mut handle = tokio::task::spawn_blocking(work);
    let joined = match tokio::time::timeout(limit, &mut handle).await {
        Ok(joined) => joined,
        Err(_) => {
            let timed_out = token.as_ref().map_or(true, |token| token.cancel());
            warn!(operation, timeout_ms = limit.as_millis() as u64, "Waiting for timed out task to return");
            let joined = handle.await;
            if timed_out {
                return Err(AegisError::Timeout {
                    operation: operation.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                });
            }
            joined
        }
    };
    match joined {
        Ok(result) => result,
        Err(join_err) => Err(AegisError::CycleAborted(format!("{} task failed: {}", operation, join_err))),
    }
}
