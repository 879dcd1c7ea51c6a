use crate::server::config::ServerConfig;
use crate::server::error::ApiError;
use crate::server::stream::session_events;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use certflow::{
    ClassifiedError, Environment, GenerationSession, MemorySequenceStore, Metadata,
    NumberingRequest, NumberingService, ProgressTracker, SequenceAssignment, Stage, StartOptions,
};
use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Header naming the caller recorded as issuer of a certificate number.
pub const ISSUED_BY_HEADER: &str = "x-user-id";

/// Shared state of every request handler.
#[derive(Clone)]
pub struct AppState {
    pub tracker: ProgressTracker,
    pub numbering: Arc<NumberingService<MemorySequenceStore>>,
    pub environment: Environment,
    pub max_session_timeout: Duration,
    pub sse_idle_timeout: Duration,
}

impl AppState {
    /// Must be called inside a Tokio runtime; the tracker spawns its sweeper.
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            tracker: ProgressTracker::new(config.tracker.clone()),
            numbering: Arc::new(NumberingService::new(
                Arc::new(MemorySequenceStore::default()),
                config.numbering.clone(),
            )),
            environment: config.environment,
            max_session_timeout: config.max_session_timeout,
            sse_idle_timeout: config.sse_idle_timeout,
        }
    }

    fn reject(&self, error: ClassifiedError) -> ApiError {
        ApiError::classified(error, self.environment)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/generations", post(start_generation))
        .route(
            "/generations/{id}",
            get(get_generation).delete(cancel_generation),
        )
        .route("/generations/{id}/events", get(generation_events))
        .route("/generations/{id}/progress", post(report_progress))
        .route("/generations/{id}/complete", post(complete_generation))
        .route("/generations/{id}/fail", post(fail_generation))
        .route("/certificate-numbers", post(issue_number))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub transaction_id: String,
    pub user_id: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ProgressReport {
    pub stage: Stage,
    pub percent: f64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteReport {
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
pub struct FailReport {
    pub stage: Stage,
    pub error: String,
}

async fn healthz() -> &'static str {
    "ok"
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(transaction_id = %request.transaction_id)))]
async fn start_generation(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.transaction_id.trim().is_empty() {
        return Err(state.reject(ClassifiedError::validation("transactionId is required")));
    }
    if request.user_id.trim().is_empty() {
        return Err(state.reject(ClassifiedError::validation("userId is required")));
    }
    let timeout = match request.timeout_secs {
        None => None,
        Some(secs) if secs > 0 && Duration::from_secs(secs) <= state.max_session_timeout => {
            Some(Duration::from_secs(secs))
        }
        Some(secs) => {
            return Err(state.reject(
                ClassifiedError::validation(format!(
                    "timeoutSecs must be between 1 and {}",
                    state.max_session_timeout.as_secs()
                ))
                .with_field("timeoutSecs", secs),
            ));
        }
    };

    let id = state.tracker.start(
        &request.transaction_id,
        &request.user_id,
        StartOptions { timeout },
    );
    Ok((
        StatusCode::CREATED,
        Json(StartResponse {
            session_id: id.to_string(),
        }),
    ))
}

async fn get_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GenerationSession>, ApiError> {
    state
        .tracker
        .get_progress(&id)
        .map(Json)
        .ok_or(ApiError::SessionNotFound(id))
}

async fn generation_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let subscription = state
        .tracker
        .subscribe(&id)
        .ok_or_else(|| ApiError::SessionNotFound(id.clone()))?;

    #[cfg(feature = "tracing")]
    tracing::debug!("Streaming events for session {id}");

    Ok(Sse::new(session_events(subscription, state.sse_idle_timeout))
        .keep_alive(KeepAlive::default()))
}

async fn cancel_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "cancelled": state.tracker.cancel(&id) }))
}

async fn report_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(report): Json<ProgressReport>,
) -> Result<StatusCode, ApiError> {
    if state.tracker.advance(
        &id,
        report.stage,
        report.percent,
        report.message,
        report.metadata,
    ) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound(id))
    }
}

async fn complete_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(report): Json<CompleteReport>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.tracker.get_progress(&id).is_none() {
        return Err(ApiError::SessionNotFound(id));
    }
    let completed = state.tracker.complete(&id, report.metadata);
    Ok(Json(serde_json::json!({ "completed": completed })))
}

async fn fail_generation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(report): Json<FailReport>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.tracker.get_progress(&id).is_none() {
        return Err(ApiError::SessionNotFound(id));
    }
    let failed = state.tracker.fail(&id, report.stage, &report.error);
    Ok(Json(serde_json::json!({ "failed": failed })))
}

#[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(entity_id = %request.entity_id, year = request.year)))]
async fn issue_number(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<NumberingRequest>,
) -> Result<Json<SequenceAssignment>, ApiError> {
    let issued_by = headers
        .get(ISSUED_BY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("api");

    state
        .numbering
        .issue(&request, issued_by)
        .await
        .map(Json)
        .map_err(|e| state.reject(e))
}
