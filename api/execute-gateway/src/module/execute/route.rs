use super::controller;
use crate::app::AppState;
use axum::Router;
use axum::routing::{get, post};

pub fn register_routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/execute", post(controller::execute))
        .route("/v1/health", get(controller::health))
        .route("/v1/job/:job_id", get(controller::get_job))
        .route(
            "/v1/job/subscribe/:job_id",
            get(controller::subscribe_to_job),
        )
        .with_state(state)
}
