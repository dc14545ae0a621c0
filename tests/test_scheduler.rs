//! Integration test: cycle serialization, failure isolation and shutdown

use aegis_ml::config::MonitorConfig;
use aegis_ml::reference::ReferenceBaseline;
use aegis_ml::report::ArtifactReader;
use aegis_ml::scheduler::{CycleOutcome, MonitorEngine, Scheduler, Trigger};
use aegis_ml::schema::SchemaMap;
use aegis_ml::server::{create_router, AppState};
use aegis_ml::store::{MemoryStore, ObservationStore, RawRecord, RawValue, StoreOpener};
use aegis_ml::{AegisError, Result};
use axum::body::Body;
use axum::http::Request;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tower::ServiceExt;

/// Memory store whose opens can fail and whose reads can be slow
struct TestOpener {
    inner: MemoryStore,
    opens: AtomicUsize,
    /// Opens (1-based) that fail with a store error
    failing: Box<dyn Fn(usize) -> bool + Send + Sync>,
    read_delay: Duration,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl TestOpener {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            opens: AtomicUsize::new(0),
            failing: Box::new(|_| false),
            read_delay: Duration::ZERO,
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing(mut self, failing: impl Fn(usize) -> bool + Send + Sync + 'static) -> Self {
        self.failing = Box::new(failing);
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }
}

impl StoreOpener for TestOpener {
    fn open(&self) -> Result<Box<dyn ObservationStore>> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if (self.failing)(attempt) {
            return Err(AegisError::Store("database is locked".into()));
        }
        Ok(Box::new(SlowStore {
            inner: StoreOpener::open(&self.inner)?,
            delay: self.read_delay,
            active: Arc::clone(&self.active),
            max_active: Arc::clone(&self.max_active),
        }))
    }

    fn describe(&self) -> String {
        "test://memory".to_string()
    }
}

struct SlowStore {
    inner: Box<dyn ObservationStore>,
    delay: Duration,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl ObservationStore for SlowStore {
    fn columns(&self) -> Result<Vec<String>> {
        self.inner.columns()
    }

    fn count(&self) -> Result<usize> {
        self.inner.count()
    }

    fn latest(&self, limit: usize) -> Result<Vec<RawRecord>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let records = self.inner.latest(limit);
        self.active.fetch_sub(1, Ordering::SeqCst);
        records
    }
}

fn store(rows: usize) -> MemoryStore {
    let store = MemoryStore::new(
        "timestamp",
        &["mean_radius", "mean_texture", "mean_smoothness", "prediction"],
    );
    for i in 0..rows {
        let x = i as f64;
        store
            .append(
                RawValue::Integer(1_700_000_000 + i as i64),
                vec![
                    RawValue::Real(10.0 + (x * 0.37) % 5.0),
                    RawValue::Real(20.0 - (x * 0.11) % 3.0),
                    RawValue::Real(0.09 + (x * 0.001) % 0.02),
                    RawValue::Integer((i % 2) as i64),
                ],
            )
            .unwrap();
    }
    store
}

fn engine(opener: TestOpener, configure: impl FnOnce(&mut MonitorConfig)) -> (TempDir, MonitorEngine) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = MonitorConfig::default();
    config.artifacts.dir = dir.path().join("reports");
    configure(&mut config);

    let schema = SchemaMap::new(config.schema.clone(), &config.store.timestamp_column, &[]).unwrap();
    let rows: Vec<Vec<f64>> = (0..200)
        .map(|i| {
            let x = i as f64;
            vec![
                10.0 + (x * 0.37) % 5.0,
                20.0 - (x * 0.11) % 3.0,
                0.09 + (x * 0.001) % 0.02,
                (i % 2) as f64,
            ]
        })
        .collect();
    let reference = ReferenceBaseline::from_rows(schema.monitored(), &rows).unwrap();

    let engine = MonitorEngine::with_reference(config, Arc::new(opener), reference).unwrap();
    (dir, engine)
}

#[tokio::test]
async fn test_failed_cycle_does_not_stop_the_next() {
    // Open 1 is the startup check, open 2 the first cycle
    let opener = TestOpener::new(store(40)).failing(|attempt| attempt == 2);
    let (_dir, engine) = engine(opener, |_| {});
    let scheduler = Scheduler::new(engine);

    let first = scheduler.trigger(Trigger::Timer).await;
    match &first.outcome {
        CycleOutcome::Failed { kind, error } => {
            assert_eq!(kind, "store");
            assert!(error.contains("locked"));
        }
        other => panic!("expected a failed cycle, got {:?}", other),
    }
    assert_eq!(scheduler.stats().consecutive_failures, 1);

    let second = scheduler.trigger(Trigger::Timer).await;
    assert!(second.is_completed(), "{:?}", second.outcome);

    let stats = scheduler.stats();
    assert_eq!(stats.total_cycles, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(scheduler.last_report().unwrap().cycle_id, second.cycle_id);
}

#[tokio::test]
async fn test_repeated_failures_raise_alert() {
    let opener = TestOpener::new(store(40)).failing(|attempt| attempt > 1);
    let (_dir, engine) = engine(opener, |config| {
        config.scheduler.failure_alert_after = 3;
    });
    let scheduler = Scheduler::new(engine);

    for _ in 0..2 {
        assert!(scheduler.trigger(Trigger::Timer).await.is_failed());
    }
    assert!(!scheduler
        .alert_history()
        .iter()
        .any(|alert| alert.name == "repeated_cycle_failures"));

    assert!(scheduler.trigger(Trigger::Timer).await.is_failed());
    let history = scheduler.alert_history();
    let alert = history
        .iter()
        .find(|alert| alert.name == "repeated_cycle_failures")
        .expect("failure alert");
    assert_eq!(alert.metric_value, 3.0);
}

#[tokio::test]
async fn test_slow_store_read_times_out() {
    let opener = TestOpener::new(store(40)).slow(Duration::from_millis(300));
    let (_dir, engine) = engine(opener, |_| {});
    let scheduler = Scheduler::new(engine).with_timeouts(Duration::from_millis(50), Duration::from_secs(5));

    let report = scheduler.trigger(Trigger::Manual).await;
    match &report.outcome {
        CycleOutcome::Failed { kind, error } => {
            assert_eq!(kind, "timeout");
            assert!(error.contains("50ms"), "{}", error);
        }
        other => panic!("expected a timed out cycle, got {:?}", other),
    }
    // The gate is held until the slow read has actually returned
    assert!(report.duration_ms >= 250, "released after {}ms", report.duration_ms);
    assert!(!scheduler.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timed_out_write_keeps_previous_artifact() {
    let shared = tempfile::tempdir().unwrap();
    let reports = shared.path().join("reports");

    let (_first_dir, engine_a) = engine(TestOpener::new(store(40)), |config| {
        config.artifacts.dir = reports.clone();
    });
    let artifacts = engine_a.config().artifacts.clone();
    let published = Scheduler::new(engine_a).trigger(Trigger::Manual).await;
    assert!(published.is_completed(), "{:?}", published.outcome);

    let (_second_dir, engine_b) = engine(TestOpener::new(store(40)), |config| {
        config.artifacts.dir = reports.clone();
    });
    let scheduler = Scheduler::new(engine_b).with_timeouts(Duration::from_secs(5), Duration::ZERO);
    let reader = ArtifactReader::new(&artifacts);

    // A publish that beats the deadline counts as completed; one that does
    // not must leave the previous artifact in place
    let mut authoritative = published.cycle_id;
    let mut timed_out = 0;
    for _ in 0..5 {
        let report = scheduler.trigger(Trigger::Manual).await;
        assert!(!scheduler.is_running());
        match &report.outcome {
            CycleOutcome::Failed { kind, .. } => {
                assert_eq!(kind, "timeout");
                timed_out += 1;
            }
            CycleOutcome::Completed { .. } => authoritative = report.cycle_id,
            other => panic!("unexpected outcome {:?}", other),
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(reader.latest().unwrap().unwrap().cycle_id, authoritative);
        let html = reader.html().unwrap().unwrap();
        assert!(html.contains(&authoritative.to_string()));
        if report.is_failed() {
            assert!(!html.contains(&report.cycle_id.to_string()));
        }
    }
    assert!(timed_out > 0);

    let leftovers = std::fs::read_dir(&reports)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandoned_manual_request_finishes_its_cycle() {
    let opener = TestOpener::new(store(40)).slow(Duration::from_millis(200));
    let max_active = Arc::clone(&opener.max_active);
    let (_dir, engine) = engine(opener, |_| {});
    let scheduler = Arc::new(Scheduler::new(engine));
    let app = create_router(Arc::new(AppState::new(Arc::clone(&scheduler))));

    let request = tokio::spawn(async move {
        app.oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/cycles")
                .body(Body::empty())
                .unwrap(),
        )
        .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(scheduler.is_running());

    // The client goes away while the store read is still in progress
    request.abort();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(scheduler.is_running());

    // A timer cycle queued behind it must not overlap
    let timer = scheduler.trigger(Trigger::Timer).await;
    assert!(timer.is_completed(), "{:?}", timer.outcome);
    assert_eq!(max_active.load(Ordering::SeqCst), 1);

    let stats = scheduler.stats();
    assert_eq!(stats.total_cycles, 2);
    assert_eq!(stats.completed, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_triggers_never_overlap() {
    let opener = TestOpener::new(store(40)).slow(Duration::from_millis(80));
    let max_active = Arc::clone(&opener.max_active);
    let (_dir, engine) = engine(opener, |_| {});
    let scheduler = Arc::new(Scheduler::new(engine));

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let scheduler = Arc::clone(&scheduler);
            let trigger = if i == 0 { Trigger::Timer } else { Trigger::Manual };
            tokio::spawn(async move { scheduler.trigger(trigger).await })
        })
        .collect();

    let mut reports = Vec::new();
    for handle in handles {
        reports.push(handle.await.unwrap());
    }

    assert!(reports.iter().all(|r| r.is_completed()));
    assert_eq!(max_active.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.stats().total_cycles, 3);

    // Serialized cycles start no earlier than the previous one's duration
    reports.sort_by_key(|r| r.started_at);
    for pair in reports.windows(2) {
        let gap = (pair[1].started_at - pair[0].started_at).num_milliseconds();
        assert!(gap >= 70, "cycles overlapped: gap {}ms", gap);
    }
}

#[tokio::test]
async fn test_timer_loop_runs_until_shutdown() {
    let opener = TestOpener::new(store(40));
    let (_dir, engine) = engine(opener, |_| {});
    let scheduler = Arc::new(Scheduler::new(engine).with_interval(Duration::from_millis(20)));
    let (tx, rx) = watch::channel(false);

    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(rx).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), runner)
        .await
        .expect("scheduler stops after shutdown")
        .unwrap();

    let cycles = scheduler.stats().total_cycles;
    assert!(cycles >= 2, "only {} cycles ran", cycles);
    assert_eq!(scheduler.stats().completed, cycles);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_waits_for_in_flight_cycle() {
    let opener = TestOpener::new(store(40)).slow(Duration::from_millis(250));
    let (_dir, engine) = engine(opener, |_| {});
    let scheduler = Arc::new(Scheduler::new(engine).with_interval(Duration::from_secs(60)));
    let (tx, rx) = watch::channel(false);

    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(rx).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(scheduler.is_running());
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("scheduler stops after the in-flight cycle")
        .unwrap();

    assert!(!scheduler.is_running());
    let stats = scheduler.stats();
    assert_eq!(stats.total_cycles, 1);
    assert_eq!(stats.completed, 1);
    assert!(scheduler.last_report().unwrap().is_completed());
}
