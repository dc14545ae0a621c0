//! Integration test: Server API endpoints

use aegis_ml::config::MonitorConfig;
use aegis_ml::reference::ReferenceBaseline;
use aegis_ml::scheduler::{MonitorEngine, Scheduler};
use aegis_ml::schema::SchemaMap;
use aegis_ml::server::{create_router, AppState};
use aegis_ml::store::{MemoryStore, RawValue};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

fn memory_store(rows: usize) -> MemoryStore {
    let store = MemoryStore::new(
        "timestamp",
        &["mean_radius", "mean_texture", "mean_smoothness", "prediction"],
    );
    for i in 0..rows {
        let x = i as f64;
        store
            .append(
                RawValue::Text(format!("2024-03-01T12:{:02}:{:02}Z", i / 60, i % 60)),
                vec![
                    RawValue::Real(12.0 + (x * 0.61) % 4.0),
                    RawValue::Real(18.0 + (x * 0.29) % 6.0),
                    RawValue::Real(0.08 + (x * 0.0013) % 0.03),
                    RawValue::Integer((i % 2) as i64),
                ],
            )
            .unwrap();
    }
    store
}

fn test_app(rows: usize) -> (TempDir, axum::Router) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = MonitorConfig::default();
    config.artifacts.dir = dir.path().join("reports");

    let schema = SchemaMap::new(config.schema.clone(), "timestamp", &[]).unwrap();
    let reference_rows: Vec<Vec<f64>> = (0..120)
        .map(|i| {
            let x = i as f64;
            vec![
                12.0 + (x * 0.61) % 4.0,
                18.0 + (x * 0.29) % 6.0,
                0.08 + (x * 0.0013) % 0.03,
                (i % 2) as f64,
            ]
        })
        .collect();
    let reference = ReferenceBaseline::from_rows(schema.monitored(), &reference_rows).unwrap();

    let engine = MonitorEngine::with_reference(config, Arc::new(memory_store(rows)), reference).unwrap();
    let state = Arc::new(AppState::new(Arc::new(Scheduler::new(engine))));
    (dir, create_router(state))
}

async fn send(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    (status, bytes.to_vec())
}

fn json(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, app) = test_app(20);
    let (status, body) = send(&app, "GET", "/api/health").await;
    assert_eq!(status, StatusCode::OK);

    let body = json(&body);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["cycle_running"], false);
}

#[tokio::test]
async fn test_verdict_missing_before_first_cycle() {
    let (_dir, app) = test_app(20);

    let (status, body) = send(&app, "GET", "/api/verdict").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json(&body)["error"], true);

    let (status, _) = send(&app, "GET", "/api/report").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "GET", "/api/verdict/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["state"], "missing");
}

#[tokio::test]
async fn test_manual_cycle_publishes_verdict() {
    let (_dir, app) = test_app(30);

    let (status, body) = send(&app, "POST", "/api/cycles").await;
    assert_eq!(status, StatusCode::OK);
    let report = json(&body);
    assert_eq!(report["trigger"], "manual");
    assert_eq!(report["outcome"]["status"], "completed");
    assert_eq!(report["outcome"]["window_rows"], 30);

    let (status, body) = send(&app, "GET", "/api/verdict").await;
    assert_eq!(status, StatusCode::OK);
    let verdict = json(&body);
    assert_eq!(verdict["cycle_id"], report["cycle_id"]);
    assert_eq!(verdict["total_features"], 4);
    assert_eq!(verdict["features"].as_array().unwrap().len(), 4);

    let (status, body) = send(&app, "GET", "/api/verdict/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["state"], "fresh");

    let (status, body) = send(&app, "GET", "/api/report").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).unwrap().contains("<html"));

    let (status, body) = send(&app, "GET", "/api/cycles/stats").await;
    assert_eq!(status, StatusCode::OK);
    let stats = json(&body);
    assert_eq!(stats["stats"]["total_cycles"], 1);
    assert_eq!(stats["stats"]["completed"], 1);
    assert_eq!(stats["last_cycle"]["cycle_id"], report["cycle_id"]);
}

#[tokio::test]
async fn test_manual_cycle_with_too_few_rows_is_skipped() {
    let (_dir, app) = test_app(3);

    let (status, body) = send(&app, "POST", "/api/cycles").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["outcome"]["status"], "skipped");

    let (status, _) = send(&app, "GET", "/api/verdict").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_alerts_endpoint() {
    let (_dir, app) = test_app(20);
    let (status, body) = send(&app, "GET", "/api/alerts").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json(&body).as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_route_and_method() {
    let (_dir, app) = test_app(20);

    let (status, _) = send(&app, "GET", "/api/nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "DELETE", "/api/verdict").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}
