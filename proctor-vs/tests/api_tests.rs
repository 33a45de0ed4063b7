//! HTTP endpoint tests
//!
//! Drive the router with `oneshot` requests; no socket is bound.

mod helpers;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use helpers::{marker_png, wait_for_idle, Marker, TestHarness};
use proctor_vs::pipeline::PipelineSettings;
use proctor_vs::{build_router, AppState};

const BOUNDARY: &str = "proctor-test-boundary";

async fn setup() -> (TestHarness, Router) {
    let harness = TestHarness::start(PipelineSettings::default()).await;
    let app = build_router(AppState::new(harness.pipeline.clone()));
    (harness, app)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn multipart_alert(alert_type: Option<&str>, image: Option<&[u8]>) -> Request<Body> {
    let mut body: Vec<u8> = Vec::new();

    if let Some(alert_type) = alert_type {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"alert_type\"\r\n\r\n{alert_type}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"device_id\"\r\n\r\nedge-07\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"timestamp\"\r\n\r\n1700000000.5\r\n"
        )
        .as_bytes(),
    );
    if let Some(image) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"frame.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(image);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/ingest-alert")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_harness, app) = setup().await;

    let (status, body) = send(&app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "proctor-vs");
    assert_eq!(body["epoch"], 1);
    assert!(body.get("last_error").is_none());
}

#[tokio::test]
async fn test_heartbeat_accepted() {
    let (harness, app) = setup().await;

    let payload = json!({
        "device_id": "edge-07",
        "duration_seconds": 30.0,
        "frames_processed": 500,
        "frames_discarded": 450
    });
    let (status, body) = send(&app, post_json("/heartbeat", payload.to_string())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "recorded");
    assert_eq!(body["epoch"], 1);

    let snapshot = harness.pipeline.snapshot().await;
    assert_eq!(snapshot.counters.frames_processed_total, 500);
    assert_eq!(snapshot.counters.local_incidents_total, 0);
}

#[tokio::test]
async fn test_malformed_heartbeat_rejected() {
    let (harness, app) = setup().await;

    let (status, body) = send(&app, post_json("/heartbeat", "{not json".to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");

    let missing_field = json!({ "device_id": "edge-07", "duration_seconds": 1.0 });
    let (status, _) = send(&app, post_json("/heartbeat", missing_field.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let negative = json!({
        "device_id": "edge-07",
        "duration_seconds": -3.0,
        "frames_processed": 1,
        "frames_discarded": 1
    });
    let (status, _) = send(&app, post_json("/heartbeat", negative.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unstorable = json!({
        "device_id": "edge-07",
        "duration_seconds": 1.0,
        "frames_processed": u64::MAX,
        "frames_discarded": 1
    });
    let (status, body) = send(&app, post_json("/heartbeat", unstorable.to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");

    let (status, _) = send(&app, get("/session")).await;
    assert_eq!(status, StatusCode::OK);

    assert!(harness.pipeline.snapshot().await.counters.is_empty());
}

#[tokio::test]
async fn test_ingest_alert_accepted() {
    let (harness, app) = setup().await;
    let image = marker_png(Marker::Face);

    let (status, body) = send(&app, multipart_alert(Some("multiple_faces"), Some(&image))).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["epoch"], 1);
    assert_eq!(body["alert_type"], "multiple_faces");
    let server_filename = body["server_filename"].as_str().unwrap();
    assert!(server_filename.contains("_multiple_faces_"));
    assert!(server_filename.ends_with(".png"));

    wait_for_idle(&harness.pipeline).await;
    let snapshot = harness.pipeline.snapshot().await;
    assert_eq!(snapshot.counters.true_positive_total, 1);
}

#[tokio::test]
async fn test_ingest_alert_rejections() {
    let (harness, app) = setup().await;

    let (status, body) = send(&app, multipart_alert(Some("no_face"), Some(b"garbage"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_IMAGE");

    let (status, body) = send(&app, multipart_alert(Some("no_face"), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_IMAGE");

    let image = marker_png(Marker::NoFace);
    let (status, body) = send(&app, multipart_alert(None, Some(&image))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");

    let snapshot = harness.pipeline.snapshot().await;
    assert_eq!(snapshot.counters.pending_verifications, 0);
    assert_eq!(harness.detector.calls(), 0);
}

#[tokio::test]
async fn test_session_close_and_report_retrieval() {
    let (harness, app) = setup().await;
    let image = marker_png(Marker::NoFace);

    send(&app, multipart_alert(Some("multiple_faces"), Some(&image))).await;
    wait_for_idle(&harness.pipeline).await;

    let (status, session) = send(&app, get("/session")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["epoch"], 1);
    assert_eq!(session["counters"]["false_positive_total"], 1);
    assert_eq!(session["metrics"]["verification_accuracy"], 0.0);
    assert_eq!(session["awaiting_report"], json!([]));

    let close = Request::builder()
        .method("POST")
        .uri("/session/close")
        .body(Body::empty())
        .unwrap();
    let (status, report) = send(&app, close).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["epoch"], 1);
    assert_eq!(report["counters"]["false_positive_total"], 1);
    assert!(report["artifact"].is_string());

    let report_id = report["report_id"].as_str().unwrap();
    let (status, document) = send(&app, get(&format!("/reports/{}", report_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(document["report_id"], report_id);
    assert_eq!(document["ledger"].as_array().unwrap().len(), 1);

    let (_, session) = send(&app, get("/session")).await;
    assert_eq!(session["epoch"], 2);
    assert_eq!(session["counters"]["false_positive_total"], 0);
}

#[tokio::test]
async fn test_failed_close_reported() {
    let (harness, app) = setup().await;
    harness.renderer.fail_next(1);

    let close = Request::builder()
        .method("POST")
        .uri("/session/close")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, close).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "RENDER_FAILURE");

    let (_, session) = send(&app, get("/session")).await;
    assert_eq!(session["awaiting_report"].as_array().unwrap().len(), 1);

    let (_, health) = send(&app, get("/health")).await;
    assert!(health["last_error"].as_str().unwrap().contains("rendering failed"));
}

#[tokio::test]
async fn test_unknown_report() {
    let (_harness, app) = setup().await;

    let (status, body) = send(&app, get(&format!("/reports/{}", uuid::Uuid::new_v4()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = send(&app, get("/reports/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
