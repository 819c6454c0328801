use super::error::AppError;
use super::model::{JobRecord, TracingOptions};
use super::schema::{ExecuteRequest, HealthMetricsView, HealthResponse, SubmitExecutionResponse};
use crate::app::AppState;
use crate::service::execute_service;
use crate::service::metrics_service;
use crate::service::queue_service::{self, ConnectionStatus};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use std::time::Duration;
use tracing::info;

const TRACEPARENT_HEADER: &str = "traceparent";

pub async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ExecuteRequest>,
) -> Result<(StatusCode, Json<SubmitExecutionResponse>), AppError> {
    let resp = execute_service::execute(&state, req, tracing_options(&headers)).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>, AppError> {
    let job = queue_service::get_job_by_id(state.infra.queue.as_ref(), &job_id).await?;
    Ok(Json(job))
}

pub async fn subscribe_to_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let events = queue_service::subscribe_to_job(
        state.infra.queue.clone(),
        &job_id,
        tracing_options(&headers),
        Duration::from_millis(state.config.job_watch_interval_ms),
    )
    .await?;
    info!(job_id = %job_id, "job subscription started");

    let stream = events.map(|event| {
        Event::default()
            .event(event.status.as_str())
            .json_data(&event)
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let queue_status = state.infra.queue.status().await;
    let metrics = metrics_service::snapshot();
    let ok = queue_status == ConnectionStatus::Ready;
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            ok,
            queue_backend: state.config.queue_backend.as_str().to_string(),
            queue_status: queue_status.as_str().to_string(),
            metrics: HealthMetricsView {
                jobs_submitted: metrics.jobs_submitted,
                validation_failures: metrics.validation_failures,
                enqueue_failures: metrics.enqueue_failures,
                subscriptions_opened: metrics.subscriptions_opened,
                last_error_ts: metrics.last_error_ts,
            },
        }),
    )
}

fn tracing_options(headers: &HeaderMap) -> TracingOptions {
    TracingOptions::new(
        headers
            .get(TRACEPARENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned),
    )
}
