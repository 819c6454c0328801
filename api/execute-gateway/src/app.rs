use crate::config::environment::AppConfig;
use crate::infra::InfraClients;
use crate::module::execute::route::register_routes;
use crate::service::provider_service::RpcConnector;
use axum::Router;
use axum::http::{HeaderValue, Method};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub infra: InfraClients,
    pub connector: Arc<dyn RpcConnector>,
}

impl AppState {
    pub fn new(config: AppConfig, infra: InfraClients, connector: Arc<dyn RpcConnector>) -> Self {
        Self {
            config,
            infra,
            connector,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    register_routes(state).layer(cors)
}
