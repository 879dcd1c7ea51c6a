use crate::server::config::ServerConfig;
use crate::server::handler::{AppState, StartResponse, router};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use certflow::{Environment, SessionStatus, Stage};
use core::time::Duration;
use serde_json::{Value, json};
use tower::ServiceExt;

fn app() -> (Router, AppState) {
    app_with(ServerConfig::default())
}

fn app_with(config: ServerConfig) -> (Router, AppState) {
    let state = AppState::new(&config);
    (router(state.clone()), state)
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Number of server-sent events with the given name.
fn events(text: &str, name: &str) -> usize {
    text.lines()
        .filter_map(|line| line.strip_prefix("event:"))
        .filter(|event| event.trim() == name)
        .count()
}

async fn start(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/generations",
            json!({ "transactionId": "tx-1", "userId": "user-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let started: StartResponse = serde_json::from_slice(&bytes).unwrap();
    started.session_id
}

#[tokio::test]
async fn health_check() {
    let (app, _) = app();
    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
}

#[tokio::test]
async fn started_session_is_readable() {
    let (app, _) = app();
    let id = start(&app).await;

    let response = app
        .clone()
        .oneshot(get(&format!("/generations/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], id.as_str());
    assert_eq!(body["transactionId"], "tx-1");
    assert_eq!(body["status"], "pending");
    assert_eq!(body["progress"], 0);
}

#[tokio::test]
async fn start_rejects_missing_ids_and_excessive_timeouts() {
    let (app, _) = app();

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/generations",
            json!({ "transactionId": " ", "userId": "user-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errorCode"], "VALIDATION_ERROR");
    assert_eq!(body["success"], false);
    assert!(body.get("details").is_none());

    let response = app
        .oneshot(json_request(
            Method::POST,
            "/generations",
            json!({ "transactionId": "tx", "userId": "u", "timeoutSecs": 86400 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn development_errors_include_details() {
    let config = ServerConfig {
        environment: Environment::Development,
        ..ServerConfig::default()
    };
    let (app, _) = app_with(config);

    let response = app
        .oneshot(json_request(
            Method::POST,
            "/certificate-numbers",
            json!({ "entityId": "acme", "year": 1200 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["details"]["context"]["year"], 1200);
    assert!(body["details"]["correlationId"].is_string());
}

#[tokio::test]
async fn unknown_sessions_are_not_found() {
    let (app, _) = app();

    let response = app.clone().oneshot(get("/generations/nope")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["errorCode"], "SESSION_NOT_FOUND");

    let response = app
        .clone()
        .oneshot(get("/generations/nope/events"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/generations/nope/progress",
            json!({ "stage": "data_validation", "percent": 10.0, "message": "x" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(json_request(Method::POST, "/generations/nope/complete", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reported_progress_reaches_the_tracker() {
    let (app, state) = app();
    let id = start(&app).await;

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/generations/{id}/progress"),
            json!({
                "stage": "pdf_generation",
                "percent": 70.0,
                "message": "Rendering",
                "metadata": { "pages": 2 },
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let session = state.tracker.get_progress(&id).unwrap();
    assert_eq!(session.status, SessionStatus::InProgress);
    assert_eq!(session.stage, Stage::PdfGeneration);
    assert_eq!(session.metadata["pages"], 2);

    let response = app
        .oneshot(json_request(
            Method::POST,
            &format!("/generations/{id}/complete"),
            json!({ "metadata": { "downloadUrl": "https://files/1" } }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["completed"], true);
    let session = state.tracker.get_progress(&id).unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.overall_progress, 100);
}

#[tokio::test]
async fn fail_and_cancel_report_whether_they_applied() {
    let (app, state) = app();
    let id = start(&app).await;

    let response = app
        .clone()
        .oneshot(json_request(
            Method::POST,
            &format!("/generations/{id}/fail"),
            json!({ "stage": "file_preparation", "error": "bucket unavailable" }),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["failed"], true);
    assert_eq!(
        state.tracker.get_progress(&id).unwrap().error.as_deref(),
        Some("bucket unavailable")
    );

    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/generations/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(body_json(response).await["cancelled"], false);

    let id = start(&app).await;
    let request = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/generations/{id}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(body_json(response).await["cancelled"], true);
}

#[tokio::test]
async fn event_stream_ends_with_completion() {
    let (app, state) = app();
    let id = start(&app).await;

    let response = app
        .oneshot(get(&format!("/generations/{id}/events")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

    let tracker = state.tracker.clone();
    tokio::spawn(async move {
        tracker.advance(&id, Stage::DataValidation, 100.0, "Validated", None);
        tracker.complete(&id, None);
    });

    let text = body_text(response).await;
    assert_eq!(events(&text, "progress"), 2, "{text}");
    assert_eq!(events(&text, "complete"), 1, "{text}");
    assert!(text.contains("\"status\":\"completed\""));
}

#[tokio::test(start_paused = true)]
async fn idle_event_stream_closes() {
    let config = ServerConfig {
        sse_idle_timeout: Duration::from_secs(5),
        ..ServerConfig::default()
    };
    let (app, _) = app_with(config);
    let id = start(&app).await;

    let response = app
        .oneshot(get(&format!("/generations/{id}/events")))
        .await
        .unwrap();
    let text = body_text(response).await;
    assert_eq!(events(&text, "progress"), 1, "{text}");
    assert_eq!(events(&text, "complete"), 0, "{text}");
}

#[tokio::test]
async fn numbers_are_issued_in_sequence() {
    let (app, _) = app();

    let mut numbers = Vec::new();
    for _ in 0..3 {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/certificate-numbers")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-user-id", "clerk-7")
            .body(Body::from(
                json!({ "entityId": "acme", "year": 2025, "prefix": "AC" }).to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["generatedBy"], "clerk-7");
        numbers.push(body["certificateNumber"].as_str().unwrap().to_owned());
    }
    assert_eq!(numbers, ["AC-2025-0001", "AC-2025-0002", "AC-2025-0003"]);
}

#[tokio::test]
async fn idempotent_number_requests_replay() {
    let (app, _) = app();
    let body = json!({ "entityId": "acme", "year": 2025, "idempotencyKey": "tx-9" });

    let first = body_json(
        app.clone()
            .oneshot(json_request(Method::POST, "/certificate-numbers", body.clone()))
            .await
            .unwrap(),
    )
    .await;
    let second = body_json(
        app.oneshot(json_request(Method::POST, "/certificate-numbers", body))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(first["certificateNumber"], second["certificateNumber"]);
    assert_eq!(first["generatedBy"], "api");
}
