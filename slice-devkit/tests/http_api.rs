use reqwest::StatusCode;
use serde_json::Value;
use slice_devkit::Harness;
use slice_kernel::health::HealthTracker;
use slice_kernel::http::{build_router, AppState};
use std::sync::Arc;
use tokio::net::TcpListener;

async fn serve(h: &Harness, api_key: Option<&str>) -> String {
    let app = build_router(AppState {
        engine: h.engine.clone(),
        health_tracker: HealthTracker::new(),
        api_key: api_key.map(Arc::from),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn activate_status_deactivate_over_http() {
    let h = Harness::lab();
    let base = serve(&h, None).await;
    let client = reqwest::Client::new();

    let resp = client.post(format!("{base}/slice/gaming/activate")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["message"], "Slice 'gaming' activated successfully.");
    assert_eq!(body["installedFlows"], serde_json::json!(["h1->gs"]));
    assert_eq!(body["installedRules"], 6);
    assert_eq!(body["preemptedSlices"], serde_json::json!([]));

    let resp = client.post(format!("{base}/slice/video/activate")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "InsufficientBandwidth");
    assert!(body["message"].as_str().unwrap().contains("s1-s4"));

    let status: Value = client.get(format!("{base}/slices/status")).send().await.unwrap().json().await.unwrap();
    assert_eq!(status["activeSlices"][0]["name"], "gaming");
    assert_eq!(status["activeSlices"][0]["reservedPerLink"]["s1-s4"], 60.0);

    let resp = client.post(format!("{base}/slice/gaming/deactivate")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Slice 'gaming' deactivated successfully.");
    assert_eq!(body["warnings"], serde_json::json!([]));

    let resp = client.post(format!("{base}/slice/gaming/deactivate")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "NotActive");
}

#[tokio::test]
async fn preemption_is_reported_in_the_message() {
    let h = Harness::lab();
    let base = serve(&h, None).await;
    let client = reqwest::Client::new();

    client.post(format!("{base}/slice/gaming/activate")).send().await.unwrap();
    let body: Value = client.post(format!("{base}/slice/emergency/activate")).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["preemptedSlices"], serde_json::json!(["gaming"]));
    assert!(body["message"].as_str().unwrap().contains("Preempted: gaming"));
}

#[tokio::test]
async fn unknown_slice_is_404() {
    let h = Harness::lab();
    let base = serve(&h, None).await;
    let resp = reqwest::Client::new().post(format!("{base}/slice/nope/activate")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Slice 'nope' not found.");
}

#[tokio::test]
async fn catalog_topology_and_health_are_readable() {
    let h = Harness::lab();
    let base = serve(&h, None).await;
    let client = reqwest::Client::new();

    let slices: Value = client.get(format!("{base}/slices")).send().await.unwrap().json().await.unwrap();
    assert_eq!(slices.as_array().unwrap().len(), 6);

    let topo: Value = client.get(format!("{base}/topology")).send().await.unwrap().json().await.unwrap();
    assert_eq!(topo["hosts"].as_array().unwrap().len(), 9);
    assert_eq!(topo["links"].as_array().unwrap().len(), 4);

    let health: Value = client.get(format!("{base}/system/health")).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["slices_defined"], 6);
    assert_eq!(health["slices_active"], 0);
    assert_eq!(health["engine_running"], true);

    let ok = client.get(format!("{base}/health")).send().await.unwrap().text().await.unwrap();
    assert_eq!(ok, "ok");
}

#[tokio::test]
async fn api_key_guards_everything_but_health() {
    let h = Harness::lab();
    let base = serve(&h, Some("s3cret")).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{base}/slices/status")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = client.get(format!("{base}/slices/status")).header("x-api-key", "wrong").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = client.get(format!("{base}/slices/status")).header("x-api-key", "s3cret").send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
